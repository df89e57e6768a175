//! Connection lifecycle and the per-session event loop.
//!
//! One cooperative loop owns the transport, the pending-request table, and
//! the SET transaction table. Inbound requests are handled to completion in
//! arrival order, so responses leave in strict FIFO. Updaters run as
//! separate tasks and touch only their region's published-snapshot cell.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::dispatch::{self, RegionView};
use super::set::SetTable;
use super::{SessionConfig, SessionShared};
use crate::error::{Error, Result};
use crate::handler::{SetError, SetHandler};
use crate::oid::Oid;
use crate::pdu::{
    CloseReason, OpenPayload, Payload, Pdu, PduType, RegisterPayload, ResponsePayload,
    UnregisterPayload,
};
use crate::region::Region;
use crate::snapshot::SnapshotBuilder;
use crate::transport::Transport;
use crate::varbind::VarBind;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
const UPDATER_GRACE: Duration = Duration::from_secs(5);
const GC_INTERVAL: Duration = Duration::from_secs(1);

/// Requests from the session handle into the event loop.
pub(crate) enum Command {
    Register {
        region: Arc<Region>,
        reply: oneshot::Sender<Result<()>>,
    },
    Unregister {
        region_id: u64,
        reply: oneshot::Sender<Result<()>>,
    },
    Ping {
        reply: oneshot::Sender<Result<()>>,
    },
}

enum PendingKind {
    Register {
        region: Arc<Region>,
        reply: oneshot::Sender<Result<()>>,
    },
    Unregister {
        region_id: u64,
        subtree: Oid,
        reply: oneshot::Sender<Result<()>>,
    },
    Ping {
        reply: oneshot::Sender<Result<()>>,
    },
}

struct PendingRequest {
    kind: PendingKind,
    deadline: Instant,
}

enum ServeEnd {
    /// `stop()` was called.
    Stopped,
    /// The master sent Close; reconnect without backoff growth.
    MasterClosed(CloseReason),
}

/// Exponential backoff with +/-25% jitter.
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: BACKOFF_BASE,
        }
    }

    fn reset(&mut self) {
        self.current = BACKOFF_BASE;
    }

    fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (base * 2).min(BACKOFF_CAP);
        // Time-based entropy is plenty here; the jitter only needs to
        // de-synchronize reconnect storms, not be unpredictable.
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let factor = 0.75 + f64::from(nanos % 1000) / 2000.0;
        base.mul_f64(factor)
    }
}

/// Updater tasks for the current connection.
struct UpdaterSet {
    token: CancellationToken,
    tasks: HashMap<u64, (CancellationToken, JoinHandle<()>)>,
}

impl UpdaterSet {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: HashMap::new(),
        }
    }

    fn spawn(&mut self, region: &Arc<Region>) {
        let token = self.token.child_token();
        let task = tokio::spawn(run_updater(region.clone(), token.clone()));
        self.tasks.insert(region.id, (token, task));
    }

    async fn stop(&mut self, region_id: u64) {
        if let Some((token, task)) = self.tasks.remove(&region_id) {
            token.cancel();
            join_with_grace(region_id, task).await;
        }
    }

    async fn shutdown(&mut self) {
        self.token.cancel();
        for (region_id, (_, task)) in self.tasks.drain() {
            join_with_grace(region_id, task).await;
        }
    }
}

async fn join_with_grace(region_id: u64, mut task: JoinHandle<()>) {
    if timeout(UPDATER_GRACE, &mut task).await.is_err() {
        tracing::warn!(agentx.region_id = region_id, "updater unresponsive, aborting");
        task.abort();
    }
}

async fn run_updater(region: Arc<Region>, cancel: CancellationToken) {
    loop {
        let mut builder = SnapshotBuilder::new(region.subtree.clone());
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            result = region.updater.update(&mut builder) => result,
        };
        match outcome {
            Ok(()) => {
                let snapshot = builder.finish();
                tracing::debug!(
                    agentx.subtree = %region.subtree,
                    agentx.bindings = snapshot.len(),
                    "snapshot published"
                );
                region.publish(snapshot);
            }
            Err(e) => {
                // Previous snapshot stays published.
                tracing::warn!(
                    agentx.subtree = %region.subtree,
                    error = %e,
                    "updater failed"
                );
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(region.frequency) => {}
        }
    }
}

/// State scoped to one master connection.
struct Conn {
    transport: Transport,
    session_id: u32,
    set_table: SetTable,
    updaters: UpdaterSet,
    /// Ids of regions the master accepted on this connection.
    active: HashSet<u64>,
}

pub(crate) struct Runner {
    config: SessionConfig,
    shared: Arc<SessionShared>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    next_packet_id: u32,
    pending: HashMap<u32, PendingRequest>,
}

impl Runner {
    pub fn new(
        config: SessionConfig,
        shared: Arc<SessionShared>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            shared,
            cmd_rx,
            cancel,
            next_packet_id: 0,
            pending: HashMap::new(),
        }
    }

    /// Run the session until `stop()` or a fatal, non-reconnectable error.
    pub async fn run(mut self) {
        let mut backoff = Backoff::new();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.serve_connection(&mut backoff).await {
                Ok(ServeEnd::Stopped) => break,
                Ok(ServeEnd::MasterClosed(reason)) => {
                    tracing::info!(agentx.reason = %reason, "master closed the session");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "session error");
                }
            }
            self.abort_pending();
            if !self.config.reconnect {
                break;
            }
            let delay = backoff.next_delay();
            tracing::debug!(agentx.delay_ms = delay.as_millis() as u64, "reconnect backoff");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.shared.running.store(false, Ordering::Release);
        self.shared.session_id.store(0, Ordering::Release);
        self.abort_pending();
        self.cmd_rx.close();
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            fail_command(cmd);
        }
        tracing::debug!("session loop exited");
    }

    fn next_packet_id(&mut self) -> u32 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        self.next_packet_id
    }

    async fn serve_connection(&mut self, backoff: &mut Backoff) -> Result<ServeEnd> {
        let mut transport = Transport::connect(&self.config.endpoint).await?;
        let session_id = self.open_handshake(&mut transport).await?;
        backoff.reset();
        self.shared.session_id.store(session_id, Ordering::Release);
        tracing::info!(agentx.session_id = session_id, "session opened");

        let mut conn = Conn {
            transport,
            session_id,
            set_table: SetTable::new(self.config.timeout),
            updaters: UpdaterSet::new(),
            active: HashSet::new(),
        };

        // Register every declared region. A master rejection parks that
        // region for this connection; a transport failure restarts the
        // whole session.
        let regions: Vec<Arc<Region>> = self.shared.regions.lock().unwrap().iter().cloned().collect();
        for region in regions {
            match self.register_region(&mut conn, &region).await {
                Ok(()) => {
                    conn.active.insert(region.id);
                    conn.updaters.spawn(&region);
                }
                Err(e @ Error::Registration { .. }) => {
                    tracing::warn!(
                        agentx.subtree = %region.subtree,
                        error = %e,
                        "master rejected region, parking it"
                    );
                }
                Err(e) => {
                    conn.updaters.shutdown().await;
                    return Err(e);
                }
            }
        }

        let result = self.dispatch_loop(&mut conn).await;
        conn.updaters.shutdown().await;
        // Open transactions die with the connection (implicitly cleaned).
        conn.set_table.clear();
        if matches!(result, Ok(ServeEnd::Stopped)) {
            self.graceful_close(&mut conn).await;
        }
        result
    }

    async fn open_handshake(&mut self, transport: &mut Transport) -> Result<u32> {
        let packet_id = self.next_packet_id();
        let open = Pdu::new(Payload::Open(OpenPayload {
            timeout: self.config.timeout.as_secs().min(255) as u8,
            id: self.config.agent_id.clone(),
            description: self.config.description.clone(),
        }))
        .with_ids(0, 0, packet_id);
        transport.write_pdu(&open).await?;

        let response = self.await_response(transport, packet_id).await?;
        let Payload::Response(payload) = &response.payload else {
            unreachable!("await_response only returns Response PDUs");
        };
        if !payload.error.is_ok() || response.session_id == 0 {
            return Err(Error::Connection {
                endpoint: Some(self.config.endpoint.to_string()),
                source: std::io::Error::other(format!(
                    "master refused session: {}",
                    payload.error
                )),
            });
        }
        Ok(response.session_id)
    }

    async fn register_region(&mut self, conn: &mut Conn, region: &Arc<Region>) -> Result<()> {
        let packet_id = self.next_packet_id();
        let pdu = register_pdu(region, conn.session_id, packet_id);
        conn.transport.write_pdu(&pdu).await?;

        let response = self.await_response(&mut conn.transport, packet_id).await?;
        let Payload::Response(payload) = &response.payload else {
            unreachable!("await_response only returns Response PDUs");
        };
        if !payload.error.is_ok() {
            return Err(Error::Registration {
                subtree: region.subtree.clone(),
                status: payload.error,
            });
        }
        tracing::debug!(agentx.subtree = %region.subtree, "region registered");
        Ok(())
    }

    // Await the Response matching `packet_id`, used only during the
    // handshake phases where no other traffic is expected. Recoverable wire
    // errors and unrelated PDUs are skipped.
    async fn await_response(&self, transport: &mut Transport, packet_id: u32) -> Result<Pdu> {
        let wait = self.config.timeout;
        timeout(wait, async {
            loop {
                match transport.read_pdu().await {
                    Ok(pdu)
                        if pdu.pdu_type() == PduType::Response && pdu.packet_id == packet_id =>
                    {
                        return Ok(pdu);
                    }
                    Ok(pdu) => {
                        tracing::debug!(
                            agentx.pdu_type = pdu.pdu_type().as_u8(),
                            "ignoring PDU during handshake"
                        );
                    }
                    Err(e) if !e.is_fatal() => {
                        tracing::warn!(error = %e, "dropping malformed PDU during handshake");
                    }
                    Err(e) => return Err(e),
                }
            }
        })
        .await
        .unwrap_or(Err(Error::Timeout {
            elapsed: wait,
            packet_id,
        }))
    }

    async fn dispatch_loop(&mut self, conn: &mut Conn) -> Result<ServeEnd> {
        let mut gc = tokio::time::interval(GC_INTERVAL);
        gc.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Ok(ServeEnd::Stopped);
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(conn, cmd).await?,
                    // All session handles are gone; shut down cleanly.
                    None => return Ok(ServeEnd::Stopped),
                },
                read = conn.transport.read_pdu() => match read {
                    Ok(pdu) => {
                        if let Some(end) = self.handle_pdu(conn, pdu).await? {
                            return Ok(end);
                        }
                    }
                    Err(e) if !e.is_fatal() => {
                        tracing::warn!(error = %e, "dropping malformed PDU");
                    }
                    Err(e) => return Err(e),
                },
                _ = gc.tick() => {
                    conn.set_table.expire().await;
                    self.expire_pending();
                }
            }
        }
    }

    async fn handle_command(&mut self, conn: &mut Conn, cmd: Command) -> Result<()> {
        match cmd {
            Command::Register { region, reply } => {
                let packet_id = self.next_packet_id();
                let pdu = register_pdu(&region, conn.session_id, packet_id);
                if let Err(e) = conn.transport.write_pdu(&pdu).await {
                    let _ = reply.send(Err(Error::SessionClosed));
                    return Err(e);
                }
                self.insert_pending(packet_id, PendingKind::Register { region, reply });
            }
            Command::Unregister { region_id, reply } => {
                let Some(region) = self.shared.regions.lock().unwrap().get(region_id).cloned()
                else {
                    let _ = reply.send(Err(Error::Registration {
                        subtree: Oid::empty(),
                        status: crate::error::ResponseError::UnknownRegistration,
                    }));
                    return Ok(());
                };
                let packet_id = self.next_packet_id();
                let mut pdu = Pdu::new(Payload::Unregister(UnregisterPayload {
                    priority: region.priority,
                    range_subid: region.range_subid,
                    subtree: region.subtree.clone(),
                    upper_bound: region.upper_bound,
                }))
                .with_ids(conn.session_id, 0, packet_id);
                pdu.context = region.context.clone();
                if let Err(e) = conn.transport.write_pdu(&pdu).await {
                    let _ = reply.send(Err(Error::SessionClosed));
                    return Err(e);
                }
                self.insert_pending(
                    packet_id,
                    PendingKind::Unregister {
                        region_id,
                        subtree: region.subtree.clone(),
                        reply,
                    },
                );
            }
            Command::Ping { reply } => {
                let packet_id = self.next_packet_id();
                let pdu = Pdu::new(Payload::Ping).with_ids(conn.session_id, 0, packet_id);
                if let Err(e) = conn.transport.write_pdu(&pdu).await {
                    let _ = reply.send(Err(Error::SessionClosed));
                    return Err(e);
                }
                self.insert_pending(packet_id, PendingKind::Ping { reply });
            }
        }
        Ok(())
    }

    fn insert_pending(&mut self, packet_id: u32, kind: PendingKind) {
        self.pending.insert(
            packet_id,
            PendingRequest {
                kind,
                deadline: Instant::now() + self.config.timeout,
            },
        );
    }

    async fn handle_pdu(&mut self, conn: &mut Conn, pdu: Pdu) -> Result<Option<ServeEnd>> {
        // Responses correlate to requests we initiated; everything else is
        // master-originated and keyed by our session id.
        if let Payload::Response(payload) = &pdu.payload {
            let payload = payload.clone();
            self.complete_pending(conn, pdu.packet_id, &payload).await;
            return Ok(None);
        }

        if pdu.session_id != conn.session_id {
            tracing::warn!(
                agentx.session_id = pdu.session_id,
                agentx.pdu_type = pdu.pdu_type().as_u8(),
                "PDU for unknown session"
            );
            let response = Pdu::response_to(
                &pdu,
                ResponsePayload::error(crate::error::ResponseError::NotOpen, 0, vec![]),
            );
            conn.transport.write_pdu(&response).await?;
            return Ok(None);
        }

        match &pdu.payload {
            Payload::Get { ranges } => {
                let views = self.views(conn);
                let payload = dispatch::get(&views, ranges);
                self.respond(conn, &pdu, payload).await?;
            }
            Payload::GetNext { ranges } => {
                let views = self.views(conn);
                let payload = dispatch::get_next(&views, ranges);
                self.respond(conn, &pdu, payload).await?;
            }
            Payload::GetBulk(bulk) => {
                let views = self.views(conn);
                let payload = dispatch::get_bulk(&views, bulk);
                self.respond(conn, &pdu, payload).await?;
            }
            Payload::TestSet { varbinds } => {
                let resolved = self.resolve_set_handler(conn, varbinds);
                let payload = conn
                    .set_table
                    .test(pdu.transaction_id, varbinds.clone(), resolved)
                    .await;
                self.respond(conn, &pdu, payload).await?;
            }
            Payload::CommitSet => {
                let payload = conn.set_table.commit(pdu.transaction_id).await;
                self.respond(conn, &pdu, payload).await?;
            }
            Payload::UndoSet => {
                let payload = conn.set_table.undo(pdu.transaction_id).await;
                self.respond(conn, &pdu, payload).await?;
            }
            Payload::CleanupSet => {
                conn.set_table.cleanup(pdu.transaction_id).await;
            }
            Payload::Ping => {
                self.respond(conn, &pdu, ResponsePayload::success(vec![])).await?;
            }
            Payload::Close { reason } => {
                let reason = *reason;
                self.respond(conn, &pdu, ResponsePayload::success(vec![])).await?;
                return Ok(Some(ServeEnd::MasterClosed(reason)));
            }
            // Administrative echoes: acknowledge and move on.
            Payload::Notify { .. }
            | Payload::AddAgentCaps { .. }
            | Payload::RemoveAgentCaps { .. } => {
                self.respond(conn, &pdu, ResponsePayload::success(vec![])).await?;
            }
            // Subagent-originated types have no business arriving here.
            Payload::Open(_)
            | Payload::Register(_)
            | Payload::Unregister(_)
            | Payload::IndexAllocate(_)
            | Payload::IndexDeallocate { .. } => {
                tracing::warn!(
                    agentx.pdu_type = pdu.pdu_type().as_u8(),
                    "dropping unexpected PDU from master"
                );
            }
            Payload::Response(_) => unreachable!("handled above"),
        }
        Ok(None)
    }

    async fn respond(&mut self, conn: &mut Conn, request: &Pdu, payload: ResponsePayload) -> Result<()> {
        let response = Pdu::response_to(request, payload);
        conn.transport.write_pdu(&response).await
    }

    fn views(&self, conn: &Conn) -> Vec<RegionView> {
        self.shared
            .regions
            .lock()
            .unwrap()
            .iter()
            .filter(|r| conn.active.contains(&r.id))
            .map(|r| RegionView {
                subtree: r.subtree.clone(),
                snapshot: r.snapshot(),
            })
            .collect()
    }

    // All VarBinds of a transaction must land in one writable region.
    fn resolve_set_handler(
        &self,
        conn: &Conn,
        varbinds: &[VarBind],
    ) -> std::result::Result<Arc<dyn SetHandler>, (SetError, u16)> {
        let regions = self.shared.regions.lock().unwrap();
        let mut resolved: Option<(u64, Arc<dyn SetHandler>)> = None;
        for (i, vb) in varbinds.iter().enumerate() {
            let index = (i + 1) as u16;
            let region = regions
                .find_containing(&vb.name)
                .filter(|r| conn.active.contains(&r.id))
                .ok_or((SetError::NotWritable, index))?;
            let handler = region
                .set_handler
                .clone()
                .ok_or((SetError::NotWritable, index))?;
            match &resolved {
                None => resolved = Some((region.id, handler)),
                Some((id, _)) if *id != region.id => {
                    return Err((SetError::InconsistentName, index));
                }
                Some(_) => {}
            }
        }
        resolved.map(|(_, h)| h).ok_or((SetError::GenErr, 0))
    }

    async fn complete_pending(&mut self, conn: &mut Conn, packet_id: u32, payload: &ResponsePayload) {
        let Some(request) = self.pending.remove(&packet_id) else {
            tracing::debug!(agentx.packet_id = packet_id, "response for unknown request");
            return;
        };
        match request.kind {
            PendingKind::Register { region, reply } => {
                if payload.error.is_ok() {
                    conn.active.insert(region.id);
                    conn.updaters.spawn(&region);
                    tracing::debug!(agentx.subtree = %region.subtree, "region registered");
                    let _ = reply.send(Ok(()));
                } else {
                    // The caller's registration failed; roll the region
                    // back out of the table.
                    self.shared.regions.lock().unwrap().remove(region.id);
                    let _ = reply.send(Err(Error::Registration {
                        subtree: region.subtree.clone(),
                        status: payload.error,
                    }));
                }
            }
            PendingKind::Unregister {
                region_id,
                subtree,
                reply,
            } => {
                if payload.error.is_ok() {
                    conn.active.remove(&region_id);
                    conn.updaters.stop(region_id).await;
                    self.shared.regions.lock().unwrap().remove(region_id);
                    tracing::debug!(agentx.subtree = %subtree, "region unregistered");
                    let _ = reply.send(Ok(()));
                } else {
                    let _ = reply.send(Err(Error::Registration {
                        subtree,
                        status: payload.error,
                    }));
                }
            }
            PendingKind::Ping { reply } => {
                if !payload.error.is_ok() {
                    tracing::warn!(agentx.status = %payload.error, "ping answered with error");
                }
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn expire_pending(&mut self) {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&id, _)| id)
            .collect();
        for packet_id in expired {
            if let Some(request) = self.pending.remove(&packet_id) {
                tracing::warn!(agentx.packet_id = packet_id, "request timed out");
                fail_pending(
                    request.kind,
                    Error::Timeout {
                        elapsed: self.config.timeout,
                        packet_id,
                    },
                );
            }
        }
    }

    fn abort_pending(&mut self) {
        for (_, request) in self.pending.drain() {
            fail_pending(
                request.kind,
                Error::io(std::io::Error::other(
                    "connection lost before the master answered",
                )),
            );
        }
    }

    async fn graceful_close(&mut self, conn: &mut Conn) {
        let packet_id = self.next_packet_id();
        let close = Pdu::new(Payload::Close {
            reason: CloseReason::Shutdown,
        })
        .with_ids(conn.session_id, 0, packet_id);
        if conn.transport.write_pdu(&close).await.is_err() {
            return;
        }

        // Best effort: bounded wait for the master's acknowledgement.
        let deadline = sleep(CLOSE_TIMEOUT);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                read = conn.transport.read_pdu() => match read {
                    Ok(pdu) if pdu.pdu_type() == PduType::Response
                        && pdu.packet_id == packet_id => break,
                    Ok(_) => {}
                    Err(e) if !e.is_fatal() => {
                        tracing::debug!(error = %e, "ignoring PDU while closing");
                    }
                    Err(_) => break,
                },
            }
        }
        tracing::info!(agentx.session_id = conn.session_id, "session closed");
    }
}

fn register_pdu(region: &Arc<Region>, session_id: u32, packet_id: u32) -> Pdu {
    let mut pdu = Pdu::new(Payload::Register(RegisterPayload {
        timeout: 0,
        priority: region.priority,
        range_subid: region.range_subid,
        subtree: region.subtree.clone(),
        upper_bound: region.upper_bound,
        instance: false,
    }))
    .with_ids(session_id, 0, packet_id);
    pdu.context = region.context.clone();
    pdu
}

fn fail_command(cmd: Command) {
    match cmd {
        Command::Register { reply, .. } => {
            let _ = reply.send(Err(Error::SessionClosed));
        }
        Command::Unregister { reply, .. } => {
            let _ = reply.send(Err(Error::SessionClosed));
        }
        Command::Ping { reply } => {
            let _ = reply.send(Err(Error::SessionClosed));
        }
    }
}

fn fail_pending(kind: PendingKind, error: Error) {
    match kind {
        PendingKind::Register { reply, .. } => {
            let _ = reply.send(Err(error));
        }
        PendingKind::Unregister { reply, .. } => {
            let _ = reply.send(Err(error));
        }
        PendingKind::Ping { reply } => {
            let _ = reply.send(Err(error));
        }
    }
}
