//! Subagent sessions.
//!
//! A [`Session`] owns the connection to one master agent: it opens the
//! AgentX session, registers regions, serves requests against their
//! snapshots, and reconnects with backoff when the transport drops. Create
//! one with [`Session::open`], declare regions with [`Session::register`],
//! then drive it with [`Session::start`] or [`Session::start_blocking`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_agentx::handler::{BoxFuture, Updater};
//! use async_agentx::{Endpoint, RegionOptions, Result, Session, SnapshotBuilder, oid};
//!
//! struct Sensors;
//!
//! impl Updater for Sensors {
//!     fn update<'a>(&'a self, builder: &'a mut SnapshotBuilder) -> BoxFuture<'a, Result<()>> {
//!         Box::pin(async move {
//!             builder.set_gauge32(oid!(1, 0), 21)?;
//!             Ok(())
//!         })
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let mut session = Session::open(
//!     Endpoint::master_default(),
//!     oid!(1, 3, 6, 1, 4, 1, 12345),
//!     "example subagent",
//! );
//! session
//!     .register(
//!         oid!(1, 3, 6, 1, 4, 1, 12345, 1),
//!         Arc::new(Sensors),
//!         RegionOptions::new(Duration::from_secs(30)),
//!     )
//!     .await?;
//! session.start_blocking().await
//! # }
//! ```

mod dispatch;
mod runner;
mod set;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use self::runner::{Command, Runner};
use crate::error::{Error, ResponseError, Result};
use crate::handler::Updater;
use crate::oid::Oid;
use crate::region::{Region, RegionHandle, RegionOptions, RegionTable};
use crate::transport::Endpoint;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared between the session handle and its event loop.
pub(crate) struct SessionShared {
    pub regions: Mutex<RegionTable>,
    pub running: AtomicBool,
    pub session_id: AtomicU32,
}

/// Session configuration captured at [`Session::open`].
#[derive(Clone)]
pub(crate) struct SessionConfig {
    pub endpoint: Endpoint,
    pub agent_id: Oid,
    pub description: Bytes,
    pub timeout: Duration,
    pub reconnect: bool,
}

/// An AgentX subagent session.
pub struct Session {
    config: SessionConfig,
    shared: Arc<SessionShared>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: Option<mpsc::UnboundedReceiver<Command>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    next_region_id: AtomicU64,
    opened_at: Instant,
}

impl Session {
    /// Create a session towards `endpoint`, identified to the master by the
    /// subagent's enterprise OID and a human-readable description.
    ///
    /// Nothing touches the network until [`start`](Self::start) or
    /// [`start_blocking`](Self::start_blocking).
    pub fn open(endpoint: Endpoint, agent_id: Oid, description: impl Into<String>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            config: SessionConfig {
                endpoint,
                agent_id,
                description: Bytes::from(description.into()),
                timeout: DEFAULT_TIMEOUT,
                reconnect: true,
            },
            shared: Arc::new(SessionShared {
                regions: Mutex::new(RegionTable::new()),
                running: AtomicBool::new(false),
                session_id: AtomicU32::new(0),
            }),
            cmd_tx,
            cmd_rx: Some(cmd_rx),
            cancel: CancellationToken::new(),
            task: None,
            next_region_id: AtomicU64::new(1),
            opened_at: Instant::now(),
        }
    }

    /// Session-wide timeout: the Open PDU's timeout field, the wait on
    /// requests to the master, and the SET transaction expiry.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Disable automatic reconnection; the session then ends on the first
    /// transport failure.
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    /// Register a region rooted at `subtree`, served by `updater`.
    ///
    /// Overlap with an already-declared region is rejected locally. On a
    /// running session this negotiates with the master and returns once the
    /// Register PDU is answered; on an unstarted session the region is
    /// recorded and registered during the connection handshake.
    pub async fn register(
        &self,
        subtree: Oid,
        updater: Arc<dyn Updater>,
        options: RegionOptions,
    ) -> Result<RegionHandle> {
        let id = self.next_region_id.fetch_add(1, Ordering::Relaxed);
        let region = Arc::new(Region::new(id, subtree, updater, options));
        self.shared.regions.lock().unwrap().insert(region.clone())?;

        if self.shared.running.load(Ordering::Acquire) {
            let (tx, rx) = oneshot::channel();
            if self
                .cmd_tx
                .send(Command::Register {
                    region: region.clone(),
                    reply: tx,
                })
                .is_err()
            {
                self.shared.regions.lock().unwrap().remove(id);
                return Err(Error::SessionClosed);
            }
            match rx.await {
                Ok(Ok(())) => {}
                // The runner already rolled the region back out of the table.
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    self.shared.regions.lock().unwrap().remove(id);
                    return Err(Error::SessionClosed);
                }
            }
        }
        Ok(RegionHandle(id))
    }

    /// Unregister a region.
    ///
    /// On a running session this round-trips an Unregister PDU; otherwise
    /// the declaration is simply dropped.
    pub async fn unregister(&self, handle: RegionHandle) -> Result<()> {
        if self.shared.running.load(Ordering::Acquire) {
            let (tx, rx) = oneshot::channel();
            if self
                .cmd_tx
                .send(Command::Unregister {
                    region_id: handle.0,
                    reply: tx,
                })
                .is_err()
            {
                return Err(Error::SessionClosed);
            }
            return match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::SessionClosed),
            };
        }

        match self.shared.regions.lock().unwrap().remove(handle.0) {
            Some(_) => Ok(()),
            None => Err(Error::Registration {
                subtree: Oid::empty(),
                status: ResponseError::UnknownRegistration,
            }),
        }
    }

    /// Start serving in a background task.
    pub fn start(&mut self) -> Result<()> {
        let cmd_rx = self.cmd_rx.take().ok_or(Error::SessionClosed)?;
        self.shared.running.store(true, Ordering::Release);
        let runner = Runner::new(
            self.config.clone(),
            self.shared.clone(),
            cmd_rx,
            self.cancel.clone(),
        );
        self.task = Some(tokio::spawn(runner.run()));
        Ok(())
    }

    /// Serve on the calling task until [`stop`](Self::stop) or a fatal
    /// error with reconnection disabled.
    pub async fn start_blocking(&mut self) -> Result<()> {
        let cmd_rx = self.cmd_rx.take().ok_or(Error::SessionClosed)?;
        self.shared.running.store(true, Ordering::Release);
        let runner = Runner::new(
            self.config.clone(),
            self.shared.clone(),
            cmd_rx,
            self.cancel.clone(),
        );
        runner.run().await;
        Ok(())
    }

    /// Stop serving: cancel updaters, send Close to the master (bounded,
    /// best effort), and tear the transport down.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "session task join failed");
            }
        }
    }

    /// Liveness probe: send a Ping PDU and await the master's response.
    pub async fn ping(&self) -> Result<()> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(Error::SessionClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Ping { reply: tx })
            .map_err(|_| Error::SessionClosed)?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::SessionClosed),
        }
    }

    /// TimeTicks (hundredths of a second) since this session was created,
    /// suitable for the sysUpTime field of subagent-originated PDUs.
    pub fn uptime(&self) -> u32 {
        (self.opened_at.elapsed().as_millis() / 10) as u32
    }

    /// The session id assigned by the master, or 0 while disconnected.
    pub fn session_id(&self) -> u32 {
        self.shared.session_id.load(Ordering::Acquire)
    }

    /// Whether the event loop is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BoxFuture;
    use crate::oid;
    use crate::snapshot::SnapshotBuilder;

    struct NullUpdater;

    impl Updater for NullUpdater {
        fn update<'a>(&'a self, _builder: &'a mut SnapshotBuilder) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn session() -> Session {
        Session::open(
            Endpoint::Tcp("127.0.0.1:705".into()),
            oid!(1, 3, 6, 1, 4, 1, 12345),
            "test subagent",
        )
    }

    #[tokio::test]
    async fn test_register_before_start_is_local() {
        let session = session();
        let handle = session
            .register(
                oid!(1, 3, 6, 1, 4, 1, 12345, 1),
                Arc::new(NullUpdater),
                RegionOptions::new(Duration::from_secs(30)),
            )
            .await
            .unwrap();

        // Overlapping declaration is rejected without any I/O.
        let overlap = session
            .register(
                oid!(1, 3, 6, 1, 4, 1, 12345, 1, 2),
                Arc::new(NullUpdater),
                RegionOptions::new(Duration::from_secs(30)),
            )
            .await;
        assert!(matches!(overlap, Err(Error::Registration { .. })));

        session.unregister(handle).await.unwrap();
        assert!(session.shared.regions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_unknown_handle() {
        let session = session();
        let err = session.unregister(RegionHandle(42)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Registration {
                status: ResponseError::UnknownRegistration,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_ping_requires_running_session() {
        let session = session();
        assert!(matches!(session.ping().await, Err(Error::SessionClosed)));
    }

    #[test]
    fn test_uptime_is_monotonic() {
        let session = session();
        let a = session.uptime();
        let b = session.uptime();
        assert!(b >= a);
        assert_eq!(session.session_id(), 0);
        assert!(!session.is_running());
    }
}
