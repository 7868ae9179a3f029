//! The IO task: connection lifecycle, outbound queue and inbound decoding.
//!
//! One spawned task owns the transport. It connects through a
//! [`Connector`], queues the handshake, drains the outbound queue and
//! decodes everything the gateway pushes. When the session fails it waits
//! out the reconnect delay and starts over. Frames queued while
//! disconnected are kept and sent after the next handshake.
//!
//! Decoded changes go two ways: onto the broadcast event channel, and to
//! the listener dispatch thread (see [`crate::listeners`]).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use ampio_core::error::{Error, Result};
use ampio_core::events::{ChannelChange, ClientEvent};
use ampio_core::transport::{Connector, Transport};
use ampio_core::types::ConnectionState;
use ampio_core::{format_bytes, format_mac};

use crate::can;
use crate::decoder::{self, Classification, Reading};
use crate::frame::{self, StreamFault, TransportFrame, frame_type};
use crate::listeners::{self, ListenerRegistry};
use crate::state::StateStore;

/// Bytes read from the transport per call.
const READ_CHUNK: usize = 1024;

/// Inbound bytes kept while waiting for a frame to complete.
const MAX_INBOUND_BUF: usize = 2 * frame::MAX_FRAME_LEN as usize;

/// Configuration for the IO task.
pub(crate) struct IoConfig {
    /// User, password and info frames, in send order.
    pub handshake: [Bytes; 3],
    /// Wait between a failure and the next connection attempt.
    pub reconnect_delay: Duration,
    /// Upper bound on a single transport read, so queued frames are not
    /// held back by a quiet gateway.
    pub poll_interval: Duration,
}

/// State shared between the client handle and the IO task.
pub(crate) struct Shared {
    pub registry: Arc<Mutex<ListenerRegistry>>,
    state: Mutex<StateStore>,
    event_tx: broadcast::Sender<ClientEvent>,
    conn_state: watch::Sender<ConnectionState>,
    /// Commands accepted by `enqueue` and not yet written to a transport.
    pending: watch::Sender<usize>,
}

impl Shared {
    pub fn new(event_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity);
        let (conn_state, _) = watch::channel(ConnectionState::Disconnected);
        let (pending, _) = watch::channel(0);
        Self {
            registry: Arc::new(Mutex::new(ListenerRegistry::new())),
            state: Mutex::new(StateStore::new()),
            event_tx,
            conn_state,
            pending,
        }
    }

    pub fn lock_state(&self) -> MutexGuard<'_, StateStore> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.conn_state.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.conn_state.borrow()
    }

    pub fn watch_pending(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    fn command_queued(&self) {
        self.pending.send_modify(|n| *n += 1);
    }

    fn command_done(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Broadcast an event. Having no subscribers is not an error.
    fn emit(&self, event: ClientEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.conn_state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }
}

/// Handle to the IO task. Stored inside `AmpioClient`.
pub(crate) struct ClientIo {
    outbound_tx: mpsc::UnboundedSender<Bytes>,
    shared: Arc<Shared>,
    /// Cancellation token for graceful shutdown.
    pub cancel: CancellationToken,
    /// Join handle for the IO task.
    pub task: JoinHandle<()>,
    dispatcher: Option<std::thread::JoinHandle<()>>,
}

impl ClientIo {
    /// Queue an encoded frame for sending.
    ///
    /// Succeeds while the IO task is alive, whether or not a session is
    /// currently up.
    pub fn enqueue(&self, frame: Vec<u8>) -> Result<()> {
        self.shared.command_queued();
        self.outbound_tx.send(Bytes::from(frame)).map_err(|_| {
            self.shared.command_done();
            Error::NotConnected
        })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the IO task, close the transport and wait for pending listener
    /// callbacks to finish.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.task).await {
            if e.is_panic() {
                error!("IO task panicked");
            }
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            join_dispatcher(dispatcher).await;
        }
    }
}

/// Wait for the listener dispatch thread to exit. Returns `false` if it
/// panicked or could not be joined.
async fn join_dispatcher(dispatcher: std::thread::JoinHandle<()>) -> bool {
    match tokio::task::spawn_blocking(move || dispatcher.join()).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => {
            error!("Listener dispatch thread panicked");
            false
        }
        Err(e) => {
            error!(error = %e, "Failed to join listener dispatch thread");
            false
        }
    }
}

/// Spawn the IO task and the listener dispatch thread.
pub(crate) fn spawn_io_task(
    connector: Box<dyn Connector>,
    config: IoConfig,
    shared: Arc<Shared>,
) -> Result<ClientIo> {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (change_tx, change_rx) = mpsc::unbounded_channel();
    let dispatcher = listeners::spawn_dispatcher(Arc::clone(&shared.registry), change_rx)?;

    let cancel = CancellationToken::new();
    let queue = OutboundQueue {
        front: VecDeque::new(),
        rx: outbound_rx,
    };
    let task = tokio::spawn(io_loop(
        connector,
        config,
        Arc::clone(&shared),
        queue,
        change_tx,
        cancel.clone(),
    ));

    Ok(ClientIo {
        outbound_tx,
        shared,
        cancel,
        task,
        dispatcher: Some(dispatcher),
    })
}

/// Outbound commands: callers feed `rx`; the session drains `front` first.
///
/// `front` holds commands taken off `rx` but not yet written, including
/// one whose write failed, so they go out ahead of later requests on the
/// next session. Handshake frames never enter this queue.
struct OutboundQueue {
    front: VecDeque<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

/// Why a session ended.
enum SessionEnd {
    /// Shutdown requested.
    Cancelled,
    /// Every client handle is gone.
    Abandoned,
    /// The transport failed.
    Lost(Error),
}

/// Supervisor loop. Runs as a spawned Tokio task.
async fn io_loop(
    connector: Box<dyn Connector>,
    config: IoConfig,
    shared: Arc<Shared>,
    mut queue: OutboundQueue,
    change_tx: mpsc::UnboundedSender<ChannelChange>,
    cancel: CancellationToken,
) {
    let endpoint = connector.endpoint();
    let mut attempt: u32 = 0;

    loop {
        shared.set_state(ConnectionState::Connecting);
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = connector.connect() => result,
        };

        match connected {
            Ok(mut transport) => {
                info!(endpoint = %endpoint, "Connected to gateway");
                attempt = 0;

                let end = run_session(
                    &mut *transport,
                    &config,
                    &shared,
                    &mut queue,
                    &change_tx,
                    &cancel,
                )
                .await;

                if let Err(e) = transport.close().await {
                    debug!(error = %e, "Failed to close transport (continuing anyway)");
                }

                match end {
                    SessionEnd::Cancelled => {
                        debug!("IO task cancelled");
                        break;
                    }
                    SessionEnd::Abandoned => {
                        debug!("all client handles dropped, exiting IO task");
                        break;
                    }
                    SessionEnd::Lost(e) => {
                        warn!(endpoint = %endpoint, error = %e, "Connection to gateway lost");
                        shared.set_state(ConnectionState::Disconnected);
                        shared.emit(ClientEvent::Disconnected);
                    }
                }
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Could not connect to gateway");
            }
        }

        attempt = attempt.saturating_add(1);
        shared.set_state(ConnectionState::Reconnecting);
        shared.emit(ClientEvent::Reconnecting { attempt });
        info!(
            endpoint = %endpoint,
            attempt,
            delay_ms = config.reconnect_delay.as_millis() as u64,
            "Reconnecting"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }

    shared.set_state(ConnectionState::Disconnected);
}

/// Run one session on a freshly connected transport until it fails or
/// the client shuts down.
async fn run_session(
    transport: &mut dyn Transport,
    config: &IoConfig,
    shared: &Shared,
    queue: &mut OutboundQueue,
    change_tx: &mpsc::UnboundedSender<ChannelChange>,
    cancel: &CancellationToken,
) -> SessionEnd {
    shared.set_state(ConnectionState::Handshaking);
    shared.set_state(ConnectionState::Ready);
    shared.emit(ClientEvent::Connected);

    // Written straight from the config, never queued: a session that fails
    // here leaves nothing behind for the next one to replay.
    for frame in &config.handshake {
        if let Err(e) = write_frame(transport, frame).await {
            return SessionEnd::Lost(e);
        }
    }

    let mut inbound = BytesMut::with_capacity(READ_CHUNK * 2);
    let mut buf = [0u8; READ_CHUNK];

    loop {
        while let Some(frame) = queue.front.pop_front() {
            if let Err(e) = write_frame(transport, &frame).await {
                queue.front.push_front(frame);
                return SessionEnd::Lost(e);
            }
            shared.command_done();
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => return SessionEnd::Cancelled,

            next = queue.rx.recv() => match next {
                Some(frame) => queue.front.push_back(frame),
                None => return SessionEnd::Abandoned,
            },

            read = transport.receive(&mut buf, config.poll_interval) => match read {
                Ok(n) => {
                    inbound.extend_from_slice(&buf[..n]);
                    process_inbound(&mut inbound, shared, change_tx);
                }
                Err(Error::Timeout) => {}
                Err(e) => return SessionEnd::Lost(e),
            },
        }
    }
}

async fn write_frame(transport: &mut dyn Transport, frame: &Bytes) -> Result<()> {
    debug!(
        frame_type = frame.get(6).copied().unwrap_or_default(),
        len = frame.len(),
        "Sending frame"
    );
    trace!(bytes = %format_bytes(frame), "Outbound frame");
    transport.send(frame).await
}

/// Decode and handle every complete frame in `inbound`, leaving any
/// trailing partial frame in place.
fn process_inbound(
    inbound: &mut BytesMut,
    shared: &Shared,
    change_tx: &mpsc::UnboundedSender<ChannelChange>,
) {
    loop {
        let decoded = frame::decode_stream(inbound);

        for fault in &decoded.faults {
            match fault {
                StreamFault::ChecksumMismatch {
                    frame_type: kind,
                    expected,
                    received,
                } => warn!(
                    frame_type = kind,
                    expected = format_args!("{expected:#06x}"),
                    received = format_args!("{received:#06x}"),
                    "CRC error"
                ),
                StreamFault::Desync {
                    offset,
                    preamble,
                    length,
                } => error!(
                    offset,
                    preamble = format_args!("{preamble:#06x}"),
                    length,
                    "Framing lost, resynchronising"
                ),
            }
        }

        for frame in &decoded.frames {
            handle_frame(frame, shared, change_tx);
        }
        inbound.advance(decoded.consumed);

        if !decoded.is_desynced() {
            break;
        }
        let skip = frame::resync_offset(inbound);
        trace!(skipped = %format_bytes(&inbound[..skip]), "Discarding unframed bytes");
        inbound.advance(skip);
    }

    if inbound.len() > MAX_INBOUND_BUF {
        warn!(len = inbound.len(), "Inbound buffer overflow, resetting");
        inbound.clear();
    }
}

fn handle_frame(
    frame: &TransportFrame,
    shared: &Shared,
    change_tx: &mpsc::UnboundedSender<ChannelChange>,
) {
    trace!(
        frame_type = frame.frame_type,
        payload = %format_bytes(&frame.payload),
        "Received frame"
    );
    if frame.frame_type != frame_type::CAN {
        debug!(frame_type = frame.frame_type, "Ignoring non-CAN frame");
        return;
    }

    for can in can::subframes(&frame.payload) {
        let mac = can.mac();
        match decoder::classify(&can) {
            Classification::Reading(Reading::Temperatures(temps)) => {
                debug!(mac = %format_mac(mac), ?temps, "Temperature report");
            }
            Classification::Reading(reading) => {
                debug!(mac = %format_mac(mac), ?reading, "Status report");
                let changes = match shared.lock_state().apply(mac, &reading) {
                    Ok(changes) => changes,
                    Err(e) => {
                        warn!(mac = %format_mac(mac), error = %e, "Rejected status report");
                        continue;
                    }
                };
                for change in changes {
                    shared.emit(ClientEvent::ChannelChanged(change));
                    let _ = change_tx.send(change);
                }
            }
            Classification::Status(info) => {
                debug!(mac = %format_mac(mac), ?info, "Informational status");
            }
            Classification::ClientApp => {
                debug!(mac = %format_mac(mac), data = %format_bytes(can.data()), "Client application frame");
            }
            Classification::Debug => {
                debug!(mac = %format_mac(mac), data = %format_bytes(can.data()), "Debug frame");
            }
            Classification::Unknown(d0) => {
                debug!(mac = %format_mac(mac), d0, frame = %can, "Unknown frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::CanFrame;
    use crate::commands;
    use crate::frame::encode_transport_frame;
    use ampio_core::{ChannelValue, ReadingKind};
    use ampio_test_harness::{MockConnector, MockHandle, MockTransport};

    const MAC: u32 = 0x1305;

    fn test_config(reconnect_delay: Duration) -> IoConfig {
        let handshake = commands::handshake_frames(
            commands::DEFAULT_USERNAME,
            commands::DEFAULT_PASSWORD,
        )
        .unwrap()
        .map(Bytes::from);
        IoConfig {
            handshake,
            reconnect_delay,
            poll_interval: Duration::from_millis(100),
        }
    }

    fn status(mac: u32, kind: u8, values: [u8; 6]) -> CanFrame {
        let mut data = vec![decoder::D0_STATUS, kind];
        data.extend_from_slice(&values);
        CanFrame::new(mac, 8, &data)
    }

    fn can_frame(subframes: &[CanFrame]) -> Vec<u8> {
        let payload: Vec<u8> = subframes.iter().flat_map(|f| *f.as_bytes()).collect();
        encode_transport_frame(frame_type::CAN, &payload).unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ChannelChange>) -> Vec<ChannelChange> {
        let mut out = Vec::new();
        while let Ok(change) = rx.try_recv() {
            out.push(change);
        }
        out
    }

    fn expected_handshake() -> Vec<Vec<u8>> {
        commands::handshake_frames(commands::DEFAULT_USERNAME, commands::DEFAULT_PASSWORD)
            .unwrap()
            .to_vec()
    }

    // ---------------------------------------------------------------
    // Inbound processing
    // ---------------------------------------------------------------

    #[test]
    fn three_subframes_yield_changes_in_order() {
        let shared = Shared::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let frames = [
            status(0x10, decoder::status_type::BYTE_1_6, [1, 0, 0, 0, 0, 0]),
            status(0x20, decoder::status_type::BYTE_7_12, [0, 0, 0, 0, 0, 2]),
            status(0x30, decoder::status_type::TEMP_F_1_3, [0xBF, 0x04, 0, 0, 0, 0]),
        ];
        let mut inbound = BytesMut::from(&can_frame(&frames)[..]);
        process_inbound(&mut inbound, &shared, &tx);

        assert!(inbound.is_empty());
        let macs: Vec<u32> = drain(&mut rx).iter().map(|c| c.mac).collect();
        let mut expected = vec![0x10; 6];
        expected.extend([0x20; 6]);
        expected.push(0x30);
        assert_eq!(macs, expected);
    }

    #[test]
    fn fresh_byte_cache_reports_zero() {
        let shared = Shared::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let frame = status(MAC, decoder::status_type::BYTE_1_6, [5, 5, 0, 5, 5, 5]);
        let mut inbound = BytesMut::from(&can_frame(&[frame])[..]);
        process_inbound(&mut inbound, &shared, &tx);

        let changes = drain(&mut rx);
        assert_eq!(changes.len(), 6);
        assert_eq!(changes[2].channel, 3);
        assert_eq!(changes[2].value, ChannelValue::Byte(0));
    }

    #[test]
    fn repeated_report_is_silent() {
        let shared = Shared::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bytes = can_frame(&[status(MAC, decoder::status_type::BINARY, [0; 6])]);

        let mut inbound = BytesMut::from(&bytes[..]);
        process_inbound(&mut inbound, &shared, &tx);
        assert_eq!(drain(&mut rx).len(), 48);

        inbound.extend_from_slice(&bytes);
        process_inbound(&mut inbound, &shared, &tx);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let shared = Shared::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bytes = can_frame(&[status(MAC, decoder::status_type::BYTE_1_6, [1; 6])]);

        let mut inbound = BytesMut::from(&bytes[..10]);
        process_inbound(&mut inbound, &shared, &tx);
        assert_eq!(inbound.len(), 10);
        assert!(drain(&mut rx).is_empty());

        inbound.extend_from_slice(&bytes[10..]);
        process_inbound(&mut inbound, &shared, &tx);
        assert!(inbound.is_empty());
        assert_eq!(drain(&mut rx).len(), 6);
    }

    #[test]
    fn garbage_is_skipped_up_to_next_preamble() {
        let shared = Shared::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut bytes = vec![0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        bytes.extend(can_frame(&[status(MAC, decoder::status_type::BYTE_1_6, [7; 6])]));

        let mut inbound = BytesMut::from(&bytes[..]);
        process_inbound(&mut inbound, &shared, &tx);
        assert!(inbound.is_empty());
        assert_eq!(drain(&mut rx).len(), 6);
    }

    #[test]
    fn bad_checksum_is_still_decoded() {
        let shared = Shared::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut bytes = can_frame(&[status(MAC, decoder::status_type::BYTE_1_6, [7; 6])]);
        let crc_at = bytes.len() - 1;
        bytes[crc_at] ^= 0x55;

        let mut inbound = BytesMut::from(&bytes[..]);
        process_inbound(&mut inbound, &shared, &tx);
        assert_eq!(drain(&mut rx).len(), 6);
    }

    #[test]
    fn non_can_frames_and_unknown_subframes_are_ignored() {
        let shared = Shared::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut bytes = encode_transport_frame(frame_type::INFO, b"ok").unwrap();
        bytes.extend(can_frame(&[
            CanFrame::new(MAC, 8, &[0x42, 0x0F, 1, 2, 3, 4, 5, 6]),
            status(MAC, decoder::status_type::TEMP, [120, 0, 0, 0, 0, 0]),
            status(MAC, decoder::status_type::DATE_TIME, [1; 6]),
        ]));

        let mut inbound = BytesMut::from(&bytes[..]);
        process_inbound(&mut inbound, &shared, &tx);
        assert!(inbound.is_empty());
        assert!(drain(&mut rx).is_empty());
        assert!(shared.lock_state().devices().is_empty());
    }

    #[test]
    fn changes_are_broadcast_as_events() {
        let shared = Shared::new(64);
        let mut events = shared.subscribe();
        let (tx, _rx) = mpsc::unbounded_channel();

        let frame = status(MAC, decoder::status_type::TEMP_F_4_6, [0xBF, 0x04, 0, 0, 0, 0]);
        let mut inbound = BytesMut::from(&can_frame(&[frame])[..]);
        process_inbound(&mut inbound, &shared, &tx);

        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::ChannelChanged(ChannelChange {
                mac: MAC,
                channel: 4,
                kind: ReadingKind::TempF,
                value: ChannelValue::Temperature(21.5),
            })
        );
        assert!(events.try_recv().is_err());
    }

    // ---------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------

    fn spawn(connector: &MockConnector, reconnect_delay: Duration) -> (ClientIo, Arc<Shared>) {
        let shared = Arc::new(Shared::new(64));
        let io = spawn_io_task(
            Box::new(connector.clone()),
            test_config(reconnect_delay),
            Arc::clone(&shared),
        )
        .unwrap();
        (io, shared)
    }

    async fn wait_sent(handle: &MockHandle, count: usize) -> Vec<Vec<u8>> {
        handle
            .wait_for_sent(count, Duration::from_secs(30))
            .await
            .expect("frames were not sent in time")
    }

    #[tokio::test]
    async fn handshake_precedes_queued_frames() {
        let connector = MockConnector::new();
        let handle = connector.push_connection();
        let (io, shared) = spawn(&connector, Duration::from_secs(5));

        // Queued before the IO task has run at all.
        let command = commands::set_byte_output(MAC, 1, 2).unwrap();
        io.enqueue(command.clone()).unwrap();

        let sent = wait_sent(&handle, 4).await;
        let mut expected = expected_handshake();
        expected.push(command);
        assert_eq!(sent, expected);
        assert_eq!(shared.connection_state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn inbound_reports_reach_listeners() {
        let connector = MockConnector::new();
        let handle = connector.push_connection();
        let (_io, shared) = spawn(&connector, Duration::from_secs(5));

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let listener = listeners::Listener::new(move |mac, channel, kind, value| {
            let _ = seen_tx.send((mac, channel, kind, value));
        });
        listeners::lock_registry(&shared.registry).register(
            listeners::ListenerKey::new(MAC, 2, ReadingKind::Input),
            listener,
        );

        wait_sent(&handle, 3).await;
        handle.push_inbound(&can_frame(&[status(
            MAC,
            decoder::status_type::BINARY,
            [0b101, 0, 0, 0, 0, 0],
        )]));

        let seen = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, (MAC, 2, ReadingKind::Input, ChannelValue::Bit(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_once_after_delay_and_flushes_queue() {
        let connector = MockConnector::new();
        let first = connector.push_connection();
        let second = connector.push_connection();
        let (io, shared) = spawn(&connector, Duration::from_secs(5));
        let mut events = shared.subscribe();

        wait_sent(&first, 3).await;
        first.close_remote();

        let mut state = shared.watch_state();
        state
            .wait_for(|s| *s == ConnectionState::Reconnecting)
            .await
            .unwrap();

        // Sent while disconnected; must survive until the next session.
        let command = commands::set_binary_output(0, 3, true).unwrap();
        io.enqueue(command.clone()).unwrap();

        let sent = wait_sent(&second, 4).await;
        let mut expected = expected_handshake();
        expected.push(command);
        assert_eq!(sent, expected);

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 2);
        let waited = attempts[1] - first.lost_at().unwrap();
        assert!(
            waited >= Duration::from_secs(5) && waited < Duration::from_millis(5050),
            "reconnected after {waited:?}"
        );
        assert!(first.is_closed());

        assert_eq!(events.recv().await.unwrap(), ClientEvent::Connected);
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Disconnected);
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::Reconnecting { attempt: 1 }
        );
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_handshake_is_not_replayed_on_next_session() {
        let connector = MockConnector::new();
        let first = MockTransport::closing();
        let first_handle = first.handle();
        connector.push_transport(first);
        let second = MockTransport::closing();
        connector.push_transport(second);
        let good = connector.push_connection();
        let (io, shared) = spawn(&connector, Duration::from_secs(5));

        let command = commands::set_byte_output(MAC, 1, 2).unwrap();
        io.enqueue(command.clone()).unwrap();

        let sent = wait_sent(&good, 4).await;
        let mut expected = expected_handshake();
        expected.push(command);
        assert_eq!(sent, expected);
        assert!(first_handle.sent_frames().is_empty());

        let frame_types: Vec<u8> = sent.iter().map(|f| f[6]).collect();
        assert_eq!(
            frame_types,
            vec![
                frame_type::USER,
                frame_type::PASSWORD,
                frame_type::INFO,
                frame_type::CAN
            ]
        );
        assert_eq!(shared.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_count_tracks_unwritten_commands() {
        let connector = MockConnector::new();
        connector.push_refusal("refused");
        let handle = connector.push_connection();
        let (io, shared) = spawn(&connector, Duration::from_secs(5));

        io.enqueue(commands::set_byte_output(MAC, 1, 1).unwrap()).unwrap();
        io.enqueue(commands::set_byte_output(MAC, 1, 2).unwrap()).unwrap();
        assert_eq!(shared.pending(), 2);

        let mut pending = shared.watch_pending();
        tokio::time::timeout(Duration::from_secs(30), pending.wait_for(|n| *n == 0))
            .await
            .expect("queue never drained")
            .unwrap();
        assert_eq!(handle.sent_frames().len(), 5);
    }

    #[tokio::test]
    async fn dispatcher_panic_is_reported_on_join() {
        let clean = std::thread::spawn(|| {});
        assert!(join_dispatcher(clean).await);

        let crashed = std::thread::spawn(|| panic!("dispatch thread failure"));
        assert!(!join_dispatcher(crashed).await);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_back_off_by_fixed_delay() {
        let connector = MockConnector::new();
        connector.push_refusal("refused");
        connector.push_refusal("refused");
        let handle = connector.push_connection();
        let (_io, _shared) = spawn(&connector, Duration::from_secs(5));

        wait_sent(&handle, 3).await;
        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 3);
        for pair in attempts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(
                gap >= Duration::from_secs(5) && gap < Duration::from_millis(5050),
                "attempt gap {gap:?}"
            );
        }
    }

    #[tokio::test]
    async fn shutdown_closes_transport() {
        let connector = MockConnector::new();
        let handle = connector.push_connection();
        let (mut io, shared) = spawn(&connector, Duration::from_secs(5));

        wait_sent(&handle, 3).await;
        io.shutdown().await;

        assert!(handle.is_closed());
        assert!(!io.is_running());
        assert_eq!(shared.connection_state(), ConnectionState::Disconnected);
        assert_eq!(connector.attempts().len(), 1);
    }
}
