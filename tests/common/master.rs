//! Scripted master agent for driving a subagent over a real socket.

use std::time::Duration;

use async_agentx::Oid;
use async_agentx::pdu::{Payload, Pdu, RawHeader, ResponsePayload};
use async_agentx::value::Value;
use async_agentx::varbind::SearchRange;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

/// One accepted subagent connection, driven frame by frame by the test.
pub struct MockMaster {
    stream: TcpStream,
    session_id: u32,
    next_packet_id: u32,
}

impl MockMaster {
    /// Accept a connection and complete the Open handshake, assigning
    /// `session_id` to the subagent.
    pub async fn accept_session(listener: &TcpListener, session_id: u32) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        let mut master = Self {
            stream,
            session_id,
            next_packet_id: 1000,
        };

        let open = master.read_pdu().await;
        assert!(
            matches!(open.payload, Payload::Open(_)),
            "expected Open, got {:?}",
            open.pdu_type()
        );
        let mut response = Pdu::response_to(&open, ResponsePayload::success(vec![]));
        response.session_id = session_id;
        master.write_pdu(&response).await;
        master
    }

    /// Read the subagent's Register PDU and accept it.
    pub async fn accept_register(&mut self) -> Pdu {
        let register = self.read_pdu().await;
        assert!(
            matches!(register.payload, Payload::Register(_)),
            "expected Register, got {:?}",
            register.pdu_type()
        );
        self.respond(&register, ResponsePayload::success(vec![])).await;
        register
    }

    pub async fn read_pdu(&mut self) -> Pdu {
        let mut header = [0u8; RawHeader::LEN];
        self.stream.read_exact(&mut header).await.unwrap();
        let raw = RawHeader::parse(&header).unwrap();
        let mut payload = vec![0u8; raw.payload_length as usize];
        self.stream.read_exact(&mut payload).await.unwrap();
        Pdu::decode_frame(&raw, &payload).unwrap()
    }

    pub async fn write_pdu(&mut self, pdu: &Pdu) {
        self.stream.write_all(&pdu.encode().unwrap()).await.unwrap();
    }

    pub async fn respond(&mut self, request: &Pdu, payload: ResponsePayload) {
        self.write_pdu(&Pdu::response_to(request, payload)).await;
    }

    /// Send a request PDU stamped with this session's id and a fresh
    /// packet id; returns the packet id used.
    pub async fn send_request(&mut self, payload: Payload, transaction_id: u32) -> u32 {
        self.next_packet_id += 1;
        let packet_id = self.next_packet_id;
        let pdu =
            Pdu::new(payload).with_ids(self.session_id, transaction_id, packet_id);
        self.write_pdu(&pdu).await;
        packet_id
    }

    /// Send a request and read the subagent's response to it.
    pub async fn round_trip(&mut self, payload: Payload, transaction_id: u32) -> ResponsePayload {
        let packet_id = self.send_request(payload, transaction_id).await;
        let response = self.read_pdu().await;
        assert_eq!(response.packet_id, packet_id, "response correlation");
        match response.payload {
            Payload::Response(payload) => payload,
            other => panic!("expected Response, got {:?}", other),
        }
    }

    /// Poll with Get until `name` resolves to a concrete value (updaters
    /// publish their first snapshot asynchronously).
    pub async fn await_binding(&mut self, name: Oid) -> Value {
        for _ in 0..200 {
            let response = self
                .round_trip(
                    Payload::Get {
                        ranges: vec![SearchRange::exact(name.clone())],
                    },
                    0,
                )
                .await;
            let value = response.varbinds[0].value.clone();
            if !value.is_exception() {
                return value;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("binding {} never appeared", name);
    }

    /// Answer the subagent's Close PDU, unblocking a graceful stop.
    pub async fn ack_close(&mut self) {
        loop {
            let pdu = self.read_pdu().await;
            if matches!(pdu.payload, Payload::Close { .. }) {
                self.respond(&pdu, ResponsePayload::success(vec![])).await;
                return;
            }
        }
    }
}
