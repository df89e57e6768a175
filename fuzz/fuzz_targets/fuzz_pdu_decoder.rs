#![no_main]

use libfuzzer_sys::fuzz_target;

use async_agentx::pdu::Pdu;

fuzz_target!(|data: &[u8]| {
    // Decoding must never panic; well-formed frames must re-encode to the
    // same bytes' semantic content.
    if let Ok(pdu) = Pdu::decode(data) {
        let frame = pdu.encode().expect("decoded PDU must re-encode");
        let again = Pdu::decode(&frame).expect("re-encoded PDU must decode");
        assert_eq!(pdu, again);
    }
});
