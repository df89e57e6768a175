//! Framed PDU stream to the master agent.
//!
//! AgentX runs over a single reliable byte stream: TCP port 705 by default,
//! or the master's Unix-domain socket where it exposes one. Frames are
//! delimited by the fixed-size header: read 20 bytes, learn the payload
//! length, then read exactly that many more before handing the frame to the
//! codec. A payload that fails to decode under a valid header has already
//! been consumed, so the stream stays in sync and the caller can drop the
//! PDU and continue.

use std::path::PathBuf;
use std::str::FromStr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::error::{Error, Result};
use crate::pdu::{Pdu, RawHeader};

/// Default master TCP endpoint (RFC 2741 section 8).
pub const DEFAULT_TCP_ENDPOINT: &str = "127.0.0.1:705";

/// Default master Unix-domain socket path.
pub const DEFAULT_UNIX_SOCKET: &str = "/var/agentx/master";

// Framing sanity cap; a declared length beyond this means the stream desynced.
const MAX_PAYLOAD_LEN: u32 = 1 << 24;

/// Address of the master agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP `host:port`.
    Tcp(String),
    /// Unix-domain stream socket path.
    Unix(PathBuf),
}

impl Endpoint {
    /// The conventional local master endpoint.
    pub fn master_default() -> Self {
        Self::Tcp(DEFAULT_TCP_ENDPOINT.to_string())
    }
}

impl FromStr for Endpoint {
    type Err = std::convert::Infallible;

    /// Absolute paths select the Unix-domain transport; anything else is
    /// treated as a TCP `host:port`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.starts_with('/') {
            Ok(Self::Unix(PathBuf::from(s)))
        } else {
            Ok(Self::Tcp(s.to_string()))
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

enum MasterStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// A connected, framed PDU stream.
pub struct Transport {
    stream: MasterStream,
    endpoint: String,
}

impl Transport {
    /// Connect to the master.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let stream = match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str())
                    .await
                    .map_err(|e| Self::conn_err(endpoint, e))?;
                stream.set_nodelay(true).map_err(|e| Self::conn_err(endpoint, e))?;
                MasterStream::Tcp(stream)
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => MasterStream::Unix(
                UnixStream::connect(path)
                    .await
                    .map_err(|e| Self::conn_err(endpoint, e))?,
            ),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => {
                return Err(Self::conn_err(
                    endpoint,
                    std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "unix sockets are not available on this platform",
                    ),
                ));
            }
        };
        tracing::debug!(agentx.endpoint = %endpoint, "connected to master");
        Ok(Self {
            stream,
            endpoint: endpoint.to_string(),
        })
    }

    fn conn_err(endpoint: &Endpoint, source: std::io::Error) -> Error {
        Error::Connection {
            endpoint: Some(endpoint.to_string()),
            source,
        }
    }

    fn io_err(&self, source: std::io::Error) -> Error {
        Error::Connection {
            endpoint: Some(self.endpoint.clone()),
            source,
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let res = match &mut self.stream {
            MasterStream::Tcp(s) => s.read_exact(buf).await,
            #[cfg(unix)]
            MasterStream::Unix(s) => s.read_exact(buf).await,
        };
        res.map(|_| ()).map_err(|e| self.io_err(e))
    }

    /// Read one PDU.
    ///
    /// [`Error::Connection`] means the stream is gone. [`Error::Wire`] with
    /// an intact header means only this PDU was bad; the payload has been
    /// consumed and the next read starts at a frame boundary.
    pub async fn read_pdu(&mut self) -> Result<Pdu> {
        let mut header_bytes = [0u8; RawHeader::LEN];
        self.read_exact(&mut header_bytes).await?;
        let header = RawHeader::parse(&header_bytes)?;
        if header.payload_length > MAX_PAYLOAD_LEN {
            return Err(Error::io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("implausible payload length {}", header.payload_length),
            )));
        }

        let mut payload = vec![0u8; header.payload_length as usize];
        self.read_exact(&mut payload).await?;

        tracing::trace!(
            agentx.pdu_type = header.pdu_type,
            agentx.packet_id = header.packet_id,
            agentx.payload_len = header.payload_length,
            "read frame"
        );
        Pdu::decode_frame(&header, &payload)
    }

    /// Write one PDU as a single frame.
    pub async fn write_pdu(&mut self, pdu: &Pdu) -> Result<()> {
        let frame = pdu.encode()?;
        tracing::trace!(
            agentx.pdu_type = pdu.pdu_type().as_u8(),
            agentx.packet_id = pdu.packet_id,
            agentx.frame_len = frame.len(),
            "write frame"
        );
        let res = match &mut self.stream {
            MasterStream::Tcp(s) => s.write_all(&frame).await,
            #[cfg(unix)]
            MasterStream::Unix(s) => s.write_all(&frame).await,
        };
        res.map_err(|e| self.io_err(e))
    }

    /// Shut down the write side; best effort.
    pub async fn close(mut self) {
        let res = match &mut self.stream {
            MasterStream::Tcp(s) => s.shutdown().await,
            #[cfg(unix)]
            MasterStream::Unix(s) => s.shutdown().await,
        };
        if let Err(e) = res {
            tracing::debug!(error = %e, "shutdown after close");
        }
    }
}
