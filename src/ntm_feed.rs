// Live vehicle feed: websocket connection lifecycle, reconnect backoff and snapshot ingestion
//
// The worker thread owns the socket and only forwards FeedEvents. All state changes
// (dataset, last update, connection state) happen in FeedSession on the event thread.

use crate::ntm_health::ClockState;
use crate::ntm_models::{decode_snapshot, NTMError, RecordError, Result, VehicleDataset};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::client::IntoClientRequest;
use tungstenite::protocol::Message;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::WebSocket;

pub const FEED_PATH: &str = "/ws";

/// `ws://host:port/ws`, or `wss://` when the origin is served securely.
pub fn feed_url(secure: bool, host: &str, port: u16) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    format!("{}://{}:{}{}", scheme, host, port, FEED_PATH)
}

// ============================================================================
// States and Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Connecting { attempt: u32 },
    Opened,
    Message { payload: Vec<u8>, received_at: DateTime<Utc> },
    Closed { reason: String },
    RetryScheduled { attempt: u32, delay: Duration },
    GaveUp { attempts: u32 },
}

/// Observer receiving feed events; returning false detaches the worker.
pub type FeedSink = Box<dyn FnMut(FeedEvent) -> bool + Send>;

// ============================================================================
// Backoff
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up; 0 retries forever.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// `base * 2^(failures - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.base
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts != 0 && failures >= self.max_attempts
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Payload(Vec<u8>),
    /// Nothing arrived within the poll interval, or a control frame was handled.
    Idle,
    Closed(String),
}

pub trait FeedConnection: Send {
    fn read_payload(&mut self) -> Result<ReadOutcome>;
    fn close(&mut self);
}

pub trait FeedTransport: Send + Sync {
    fn connect(&self, url: &str) -> Result<Box<dyn FeedConnection>>;
}

pub struct TungsteniteTransport {
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        TungsteniteTransport {
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl TungsteniteTransport {
    fn open_tcp(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| NTMError::NetworkError(format!("Failed to resolve {}: {}", host, e)))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }

        Err(NTMError::NetworkError(match last_error {
            Some(e) => format!("Failed to connect to {}:{}: {}", host, port, e),
            None => format!("No address found for {}", host),
        }))
    }
}

impl FeedTransport for TungsteniteTransport {
    fn connect(&self, url: &str) -> Result<Box<dyn FeedConnection>> {
        let request = url
            .into_client_request()
            .map_err(|e| NTMError::NetworkError(format!("Invalid feed URL {}: {}", url, e)))?;

        let uri = request.uri();
        let secure = uri.scheme_str() == Some("wss");
        let host = uri
            .host()
            .ok_or_else(|| NTMError::NetworkError(format!("Feed URL {} has no host", url)))?
            .to_string();
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });

        let stream = self.open_tcp(&host, port)?;
        stream
            .set_read_timeout(Some(self.connect_timeout))
            .map_err(|e| NTMError::NetworkError(format!("Failed to configure socket: {}", e)))?;

        let (socket, response) = tungstenite::client_tls(request, stream)
            .map_err(|e| NTMError::NetworkError(format!("Websocket handshake with {} failed: {}", url, e)))?;
        debug!("Feed handshake completed with status {}", response.status());

        set_read_timeout(socket.get_ref(), self.poll_interval)?;
        Ok(Box::new(TungsteniteConnection { socket }))
    }
}

fn set_read_timeout(stream: &MaybeTlsStream<TcpStream>, timeout: Duration) -> Result<()> {
    let tcp = match stream {
        MaybeTlsStream::Plain(s) => s,
        MaybeTlsStream::NativeTls(s) => s.get_ref(),
        _ => return Ok(()),
    };
    tcp.set_read_timeout(Some(timeout))
        .map_err(|e| NTMError::NetworkError(format!("Failed to configure socket: {}", e)))
}

struct TungsteniteConnection {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl FeedConnection for TungsteniteConnection {
    fn read_payload(&mut self) -> Result<ReadOutcome> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(ReadOutcome::Payload(text.as_str().as_bytes().to_vec())),
            Ok(Message::Binary(bytes)) => Ok(ReadOutcome::Payload(bytes.to_vec())),
            Ok(Message::Close(frame)) => Ok(ReadOutcome::Closed(
                frame
                    .map(|f| format!("closed by server ({}) {}", u16::from(f.code), f.reason.as_str()))
                    .unwrap_or_else(|| "closed by server".to_string()),
            )),
            Ok(_) => Ok(ReadOutcome::Idle),
            Err(tungstenite::Error::Io(e)) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(ReadOutcome::Idle)
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(ReadOutcome::Closed("connection closed".to_string()))
            }
            Err(e) => Err(NTMError::NetworkError(format!("Feed read failed: {}", e))),
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.socket.close(None).and_then(|_| self.socket.flush()) {
            debug!("Feed close handshake not completed: {}", e);
        }
    }
}

// ============================================================================
// Connection Manager (worker side)
// ============================================================================

#[derive(Clone)]
pub struct ConnectionManager {
    transport: Arc<dyn FeedTransport>,
    policy: BackoffPolicy,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn FeedTransport>, policy: BackoffPolicy) -> Self {
        ConnectionManager { transport, policy }
    }

    pub fn websocket(policy: BackoffPolicy) -> Self {
        Self::new(Arc::new(TungsteniteTransport::default()), policy)
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Starts a feed worker for `url`; events go to `sink` until the handle is closed.
    pub fn open(&self, url: &str, sink: FeedSink) -> Result<FeedHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let worker = FeedWorker {
            url: url.to_string(),
            transport: Arc::clone(&self.transport),
            policy: self.policy,
            stop: stop_rx,
            sink,
        };

        let handle = thread::Builder::new()
            .name("ntm-feed".to_string())
            .spawn(move || worker.run())
            .map_err(|e| NTMError::NetworkError(format!("Failed to start feed thread: {}", e)))?;

        info!("Opening feed {}", url);
        Ok(FeedHandle { stop: Some(stop_tx), worker: Some(handle) })
    }
}

pub struct FeedHandle {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl FeedHandle {
    /// Stops the worker, closing the socket if one is open.
    pub fn close(&mut self) -> Result<()> {
        self.stop.take();
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| NTMError::TeardownError("feed thread panicked".to_string()))?;
            debug!("Feed worker stopped");
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct FeedWorker {
    url: String,
    transport: Arc<dyn FeedTransport>,
    policy: BackoffPolicy,
    stop: Receiver<()>,
    sink: FeedSink,
}

enum SessionEnd {
    Stopped,
    Lost(String),
}

impl FeedWorker {
    fn stop_requested(&self) -> bool {
        !matches!(self.stop.try_recv(), Err(TryRecvError::Empty))
    }

    fn run(mut self) {
        let mut failures = 0u32;

        loop {
            if self.stop_requested() {
                return;
            }
            if !(self.sink)(FeedEvent::Connecting { attempt: failures + 1 }) {
                return;
            }

            let reason = match self.transport.connect(&self.url) {
                Ok(mut connection) => {
                    failures = 0;
                    info!("Feed connected to {}", self.url);
                    match self.pump(connection.as_mut()) {
                        SessionEnd::Stopped => {
                            connection.close();
                            return;
                        }
                        SessionEnd::Lost(reason) => reason,
                    }
                }
                Err(e) => e.to_string(),
            };

            warn!("Feed disconnected: {}", reason);
            if !(self.sink)(FeedEvent::Closed { reason }) {
                return;
            }

            failures += 1;
            if self.policy.exhausted(failures) {
                warn!("Giving up on feed after {} failed attempts", failures);
                (self.sink)(FeedEvent::GaveUp { attempts: failures });
                return;
            }

            let delay = self.policy.delay_for(failures);
            if !(self.sink)(FeedEvent::RetryScheduled { attempt: failures, delay }) {
                return;
            }
            match self.stop.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
        }
    }

    fn pump(&mut self, connection: &mut dyn FeedConnection) -> SessionEnd {
        if !(self.sink)(FeedEvent::Opened) {
            return SessionEnd::Stopped;
        }

        loop {
            if self.stop_requested() {
                return SessionEnd::Stopped;
            }
            match connection.read_payload() {
                Ok(ReadOutcome::Payload(payload)) => {
                    let event = FeedEvent::Message { payload, received_at: Utc::now() };
                    if !(self.sink)(event) {
                        return SessionEnd::Stopped;
                    }
                }
                Ok(ReadOutcome::Idle) => {}
                Ok(ReadOutcome::Closed(reason)) => return SessionEnd::Lost(reason),
                Err(e) => return SessionEnd::Lost(e.to_string()),
            }
        }
    }
}

// ============================================================================
// Feed Session (event thread side)
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SnapshotReport {
    pub accepted: usize,
    pub rejected: Vec<RecordError>,
}

#[derive(Debug, Clone)]
pub struct FeedSession {
    state: ConnectionState,
    retries_exhausted: bool,
    last_close_reason: Option<String>,
}

impl Default for FeedSession {
    fn default() -> Self {
        FeedSession {
            state: ConnectionState::Disconnected,
            retries_exhausted: false,
            last_close_reason: None,
        }
    }
}

impl FeedSession {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retries_exhausted
    }

    pub fn last_close_reason(&self) -> Option<&str> {
        self.last_close_reason.as_deref()
    }

    /// Applies a lifecycle event. `Message` events go through `ingest` instead.
    pub fn apply(&mut self, event: &FeedEvent) {
        match event {
            FeedEvent::Connecting { attempt } => {
                self.retries_exhausted = false;
                self.state = if *attempt <= 1 {
                    ConnectionState::Connecting
                } else {
                    ConnectionState::Reconnecting { attempt: *attempt }
                };
            }
            FeedEvent::Opened => {
                debug!("Feed open, waiting for first snapshot");
            }
            FeedEvent::Message { .. } => {}
            FeedEvent::Closed { reason } => {
                self.state = ConnectionState::Disconnected;
                self.last_close_reason = Some(reason.clone());
            }
            FeedEvent::RetryScheduled { attempt, delay } => {
                debug!("Feed retry #{} in {:?}", attempt, delay);
                self.state = ConnectionState::Reconnecting { attempt: *attempt };
            }
            FeedEvent::GaveUp { .. } => {
                self.state = ConnectionState::Disconnected;
                self.retries_exhausted = true;
            }
        }
    }

    /// Decodes one feed message and, if it is a valid snapshot, replaces the
    /// dataset and stamps `last_update`. A failed decode changes nothing.
    pub fn ingest(
        &mut self,
        payload: &[u8],
        received_at: DateTime<Utc>,
        dataset: &mut VehicleDataset,
        clock: &mut ClockState,
    ) -> Result<SnapshotReport> {
        let decoded = decode_snapshot(payload)?;

        let report = SnapshotReport {
            accepted: decoded.snapshot.vehicles.len(),
            rejected: decoded.rejected,
        };
        dataset.replace(decoded.snapshot);
        clock.last_update = received_at;
        if self.state != ConnectionState::Connected {
            info!("Feed live ({} vehicles)", report.accepted);
            self.state = ConnectionState::Connected;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    #[test]
    fn builds_feed_urls() {
        assert_eq!(feed_url(false, "localhost", 8080), "ws://localhost:8080/ws");
        assert_eq!(feed_url(true, "transit.example.org", 443), "wss://transit.example.org:443/ws");
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            max_attempts: 4,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(5));
        assert_eq!(policy.delay_for(400), Duration::from_secs(5));
        assert!(!policy.exhausted(3));
        assert!(policy.exhausted(4));

        let forever = BackoffPolicy { max_attempts: 0, ..policy };
        assert!(!forever.exhausted(u32::MAX));
    }

    // ------------------------------------------------------------------------
    // Scripted transport
    // ------------------------------------------------------------------------

    enum Script {
        Refuse,
        Serve(Vec<ReadOutcome>),
        /// Stays open, returning Idle until closed.
        Hold,
    }

    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
        closes: Arc<Mutex<u32>>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(ScriptedTransport {
                scripts: Mutex::new(scripts.into()),
                closes: Arc::new(Mutex::new(0)),
            })
        }
    }

    struct ScriptedConnection {
        reads: VecDeque<ReadOutcome>,
        hold: bool,
        closes: Arc<Mutex<u32>>,
    }

    impl FeedConnection for ScriptedConnection {
        fn read_payload(&mut self) -> Result<ReadOutcome> {
            match self.reads.pop_front() {
                Some(outcome) => Ok(outcome),
                None if self.hold => {
                    thread::sleep(Duration::from_millis(2));
                    Ok(ReadOutcome::Idle)
                }
                None => Err(NTMError::NetworkError("reset by peer".to_string())),
            }
        }

        fn close(&mut self) {
            *self.closes.lock().unwrap() += 1;
        }
    }

    impl FeedTransport for ScriptedTransport {
        fn connect(&self, _url: &str) -> Result<Box<dyn FeedConnection>> {
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Refuse);
            let (reads, hold) = match script {
                Script::Refuse => return Err(NTMError::NetworkError("connection refused".to_string())),
                Script::Serve(reads) => (reads.into(), false),
                Script::Hold => (VecDeque::new(), true),
            };
            Ok(Box::new(ScriptedConnection { reads, hold, closes: Arc::clone(&self.closes) }))
        }
    }

    fn quick_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_attempts,
        }
    }

    fn collecting_sink() -> (FeedSink, Arc<Mutex<Vec<FeedEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let sink: FeedSink = Box::new(move |event: FeedEvent| {
            sink_events.lock().unwrap().push(event);
            true
        });
        (sink, events)
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for feed worker");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn kinds(events: &[FeedEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                FeedEvent::Connecting { .. } => "connecting",
                FeedEvent::Opened => "opened",
                FeedEvent::Message { .. } => "message",
                FeedEvent::Closed { .. } => "closed",
                FeedEvent::RetryScheduled { .. } => "retry",
                FeedEvent::GaveUp { .. } => "gave_up",
            })
            .collect()
    }

    #[test]
    fn delivers_messages_then_reconnects_after_close() {
        let transport = ScriptedTransport::new(vec![
            Script::Serve(vec![
                ReadOutcome::Payload(b"[]".to_vec()),
                ReadOutcome::Idle,
                ReadOutcome::Payload(b"[1]".to_vec()),
                ReadOutcome::Closed("bye".to_string()),
            ]),
            Script::Hold,
        ]);
        let manager = ConnectionManager::new(transport.clone(), quick_policy(3));
        let (sink, events) = collecting_sink();

        let mut handle = manager.open("ws://test:1/ws", sink).unwrap();
        wait_until(|| events.lock().unwrap().iter().filter(|e| **e == FeedEvent::Opened).count() == 2);
        handle.close().unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            kinds(&events),
            vec!["connecting", "opened", "message", "message", "closed", "retry", "connecting", "opened"]
        );
        assert_eq!(events[4], FeedEvent::Closed { reason: "bye".to_string() });
        assert_eq!(events[5], FeedEvent::RetryScheduled { attempt: 1, delay: Duration::from_millis(1) });
        assert_eq!(events[6], FeedEvent::Connecting { attempt: 2 });
        // the held connection was closed on teardown
        assert_eq!(*transport.closes.lock().unwrap(), 1);
        assert!(handle.is_finished());
    }

    #[test]
    fn gives_up_after_bounded_attempts() {
        let transport = ScriptedTransport::new(vec![Script::Refuse, Script::Refuse, Script::Refuse]);
        let manager = ConnectionManager::new(transport, quick_policy(3));
        let (sink, events) = collecting_sink();

        let mut handle = manager.open("ws://test:1/ws", sink).unwrap();
        wait_until(|| events.lock().unwrap().iter().any(|e| matches!(e, FeedEvent::GaveUp { .. })));
        handle.close().unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            kinds(&events),
            vec!["connecting", "closed", "retry", "connecting", "closed", "retry", "connecting", "closed", "gave_up"]
        );
        assert_eq!(events[5], FeedEvent::RetryScheduled { attempt: 2, delay: Duration::from_millis(2) });
        assert_eq!(*events.last().unwrap(), FeedEvent::GaveUp { attempts: 3 });
    }

    #[test]
    fn successful_open_resets_failure_count() {
        let transport = ScriptedTransport::new(vec![
            Script::Refuse,
            Script::Serve(vec![ReadOutcome::Closed("drop".to_string())]),
            Script::Hold,
        ]);
        let manager = ConnectionManager::new(transport, quick_policy(2));
        let (sink, events) = collecting_sink();

        let mut handle = manager.open("ws://test:1/ws", sink).unwrap();
        wait_until(|| events.lock().unwrap().iter().filter(|e| **e == FeedEvent::Opened).count() == 2);
        handle.close().unwrap();

        let events = events.lock().unwrap();
        assert!(!events.iter().any(|e| matches!(e, FeedEvent::GaveUp { .. })));
    }

    #[test]
    fn detached_sink_stops_worker() {
        let transport = ScriptedTransport::new(vec![Script::Hold]);
        let manager = ConnectionManager::new(transport, quick_policy(0));
        let mut handle = manager.open("ws://test:1/ws", Box::new(|_: FeedEvent| false)).unwrap();
        wait_until(|| handle.is_finished());
        assert!(handle.close().is_ok());
    }

    // ------------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------------

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 14, 31, 0).unwrap()
    }

    const TWO_VEHICLES: &[u8] = br#"[
        {"vid":"1","rt":"57","des":"A","lat":"29.95","lon":"-90.07","hdg":"10","tmstmp":"t"},
        {"vid":"2","rt":"39","des":"B","lat":"29.96","lon":"-90.08","hdg":"20","tmstmp":"t"}
    ]"#;

    #[test]
    fn snapshot_connects_and_stamps_last_update() {
        let mut session = FeedSession::default();
        let mut dataset = VehicleDataset::new();
        let mut clock = ClockState::starting_at(t0());

        session.apply(&FeedEvent::Connecting { attempt: 1 });
        assert_eq!(session.state(), ConnectionState::Connecting);
        session.apply(&FeedEvent::Opened);
        assert_eq!(session.state(), ConnectionState::Connecting);

        let at = t0() + chrono::Duration::seconds(3);
        let report = session.ingest(TWO_VEHICLES, at, &mut dataset, &mut clock).unwrap();
        assert_eq!(report.accepted, 2);
        assert!(report.rejected.is_empty());
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(clock.last_update, at);
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn bad_payload_keeps_previous_state() {
        let mut session = FeedSession::default();
        let mut dataset = VehicleDataset::new();
        let mut clock = ClockState::starting_at(t0());
        session.ingest(TWO_VEHICLES, t0(), &mut dataset, &mut clock).unwrap();

        let later = t0() + chrono::Duration::seconds(5);
        assert!(session.ingest(b"{\"oops\":true}", later, &mut dataset, &mut clock).is_err());
        assert_eq!(dataset.len(), 2);
        assert_eq!(clock.last_update, t0());
        assert!(session.is_connected());
    }

    #[test]
    fn lifecycle_events_drive_state() {
        let mut session = FeedSession::default();
        session.apply(&FeedEvent::Connecting { attempt: 1 });
        session.apply(&FeedEvent::Closed { reason: "refused".to_string() });
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.last_close_reason(), Some("refused"));

        session.apply(&FeedEvent::RetryScheduled { attempt: 1, delay: Duration::from_secs(1) });
        assert_eq!(session.state(), ConnectionState::Reconnecting { attempt: 1 });
        session.apply(&FeedEvent::Connecting { attempt: 2 });
        assert_eq!(session.state(), ConnectionState::Reconnecting { attempt: 2 });

        session.apply(&FeedEvent::GaveUp { attempts: 2 });
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.retries_exhausted());

        session.apply(&FeedEvent::Connecting { attempt: 1 });
        assert!(!session.retries_exhausted());
    }
}
