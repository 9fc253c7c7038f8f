//! BLE connection management.
//!
//! Maintains a self-healing link to the thermometer:
//!
//! ```text
//! Idle -> Scanning -> Connecting -> Listening -> Scanning ...
//! ```
//!
//! Every failure is logged, reported as `connected = false` to the
//! [`ReadingHandler`], and followed by a fixed backoff before the next scan.
//! The loop only ends when its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::StreamExt;
use parking_lot::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::transport::{BleTransport, NotificationStream};
use crate::ble::uuids::DEFAULT_NOTIFY_CHARACTERISTICS;
use crate::data::{ConnectionStatus, Reading};
use crate::error::{Error, Result};
use crate::protocol::Decoder;

/// State of the link to the thermometer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    /// Manager not running.
    #[default]
    Idle,
    /// Looking for the peripheral.
    Scanning,
    /// Peripheral found, connecting.
    Connecting,
    /// Subscribed and waiting for notifications.
    Listening,
}

impl LinkState {
    /// Check if readings can arrive in this state.
    pub fn is_listening(&self) -> bool {
        matches!(self, Self::Listening)
    }

    /// Status reported to viewers for this state.
    pub fn connection_status(&self) -> ConnectionStatus {
        match self {
            Self::Idle => ConnectionStatus::Disconnected,
            Self::Scanning | Self::Connecting => ConnectionStatus::Searching,
            Self::Listening => ConnectionStatus::Connected,
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Listening => write!(f, "Listening"),
        }
    }
}

/// Receiver of everything the connection manager produces.
///
/// Both methods are called from inside the connection loop and must return
/// quickly: a slow handler delays the next notification.
pub trait ReadingHandler: Send + Sync {
    /// Called exactly once per decoded reading, in arrival order.
    fn on_reading(&self, reading: Reading);

    /// Called with `true` when listening starts and `false` after every
    /// failed or finished link attempt.
    fn on_link_change(&self, connected: bool);
}

/// Timing and identity of the link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    /// Address (or name) the scanner looks for.
    pub identifier: String,
    /// Label stamped onto every reading.
    pub device_label: String,
    /// Notification characteristics, tried in order.
    pub characteristics: Vec<Uuid>,
    /// Upper bound of a single scan.
    pub scan_timeout: Duration,
    /// Upper bound of a single connect attempt.
    pub connect_timeout: Duration,
    /// Fixed delay between attempts.
    pub backoff: Duration,
    /// How often liveness is polled while listening.
    pub liveness_interval: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            identifier: "FF:00:00:00:01:C8".to_string(),
            device_label: "FT95".to_string(),
            characteristics: DEFAULT_NOTIFY_CHARACTERISTICS.to_vec(),
            scan_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            backoff: Duration::from_secs(2),
            liveness_interval: Duration::from_secs(1),
        }
    }
}

/// Extra time the manager grants the transport beyond its own scan and
/// connect timeouts, so the transport can stop scanning or drop a
/// half-open link before its future is abandoned.
pub const TRANSPORT_GRACE: Duration = Duration::from_secs(1);

/// How a link attempt ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkEnd {
    /// Scan window elapsed without seeing the peripheral.
    NotFound,
    /// Cancellation requested.
    Shutdown,
}

/// Keeps the thermometer linked and turns notifications into readings.
pub struct ConnectionManager<T: BleTransport> {
    transport: Arc<T>,
    settings: LinkSettings,
    decoder: Decoder,
    handler: Arc<dyn ReadingHandler>,
    state: RwLock<LinkState>,
}

impl<T: BleTransport> ConnectionManager<T> {
    /// Create a new connection manager.
    pub fn new(
        transport: Arc<T>,
        settings: LinkSettings,
        decoder: Decoder,
        handler: Arc<dyn ReadingHandler>,
    ) -> Self {
        Self {
            transport,
            settings,
            decoder,
            handler,
            state: RwLock::new(LinkState::Idle),
        }
    }

    /// Get the current link state.
    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    /// Check if listening for notifications.
    pub fn is_connected(&self) -> bool {
        self.state().is_listening()
    }

    /// The settings this manager runs with.
    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Run the scan/connect/listen cycle until `cancel` fires.
    ///
    /// Never returns an error; failures only show up in logs and as
    /// `connected = false` on the handler.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            identifier = %self.settings.identifier,
            "Connection manager started"
        );

        while !cancel.is_cancelled() {
            match self.cycle(&cancel).await {
                Ok(LinkEnd::Shutdown) => break,
                Ok(LinkEnd::NotFound) => {
                    debug!("{} not in range", self.settings.identifier);
                }
                Err(e) => {
                    warn!("Link to {} failed: {}", self.settings.identifier, e);
                }
            }

            self.handler.on_link_change(false);
            self.set_state(LinkState::Scanning);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.backoff) => {}
            }
        }

        self.handler.on_link_change(false);
        self.set_state(LinkState::Idle);
        info!("Connection manager stopped");
    }

    /// One scan, connect and listen attempt.
    async fn cycle(&self, cancel: &CancellationToken) -> Result<LinkEnd> {
        self.set_state(LinkState::Scanning);

        let scan_timeout = self.settings.scan_timeout;
        let scan = tokio::time::timeout(
            scan_timeout + TRANSPORT_GRACE,
            self.transport.scan(&self.settings.identifier, scan_timeout),
        );

        let device = tokio::select! {
            _ = cancel.cancelled() => return Ok(LinkEnd::Shutdown),
            found = scan => match found {
                Ok(Ok(Some(device))) => device,
                Ok(Ok(None)) | Err(_) => return Ok(LinkEnd::NotFound),
                Ok(Err(e)) => return Err(e),
            },
        };

        info!("Found {}, connecting", self.settings.identifier);
        self.set_state(LinkState::Connecting);

        let connect_timeout = self.settings.connect_timeout;
        let connect = tokio::time::timeout(
            connect_timeout + TRANSPORT_GRACE,
            self.transport.connect(device, connect_timeout),
        );

        let handle = tokio::select! {
            _ = cancel.cancelled() => return Ok(LinkEnd::Shutdown),
            connected = connect => connected.map_err(|_| Error::Timeout {
                operation: "connect",
            })??,
        };

        let end = self.listen(&handle, cancel).await;

        if let Err(e) = self.transport.disconnect(&handle).await {
            debug!("Disconnect after link end failed: {}", e);
        }

        end
    }

    /// Stay subscribed until the link drops or shutdown is requested.
    async fn listen(&self, handle: &T::Handle, cancel: &CancellationToken) -> Result<LinkEnd> {
        let (characteristic, mut notifications) = self.subscribe_first(handle).await?;

        info!(
            %characteristic,
            "Connected to {}, waiting for readings", self.settings.identifier
        );
        self.set_state(LinkState::Listening);
        self.handler.on_link_change(true);

        let mut liveness = tokio::time::interval(self.settings.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        liveness.reset();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(LinkEnd::Shutdown),
                payload = notifications.next() => match payload {
                    Some(bytes) => {
                        self.deliver(&bytes);
                    }
                    None => return Err(Error::ConnectionLost),
                },
                _ = liveness.tick() => {
                    if !self.transport.is_alive(handle).await {
                        return Err(Error::ConnectionLost);
                    }
                }
            }
        }
    }

    /// Subscribe to the first characteristic the peripheral accepts.
    async fn subscribe_first(&self, handle: &T::Handle) -> Result<(Uuid, NotificationStream)> {
        for &uuid in &self.settings.characteristics {
            match self.transport.subscribe(handle, uuid).await {
                Ok(stream) => return Ok((uuid, stream)),
                Err(e) => debug!("Cannot subscribe to {}: {}", uuid, e),
            }
        }

        Err(Error::CharacteristicNotFound {
            uuid: self
                .settings
                .characteristics
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Decode one payload and hand the reading to the handler.
    fn deliver(&self, payload: &[u8]) {
        match self.decoder.decode_celsius(payload) {
            Ok(celsius) => {
                let reading = Reading::capture(celsius, self.settings.device_label.as_str());
                debug!(
                    "Reading {:.1}°C / {:.1}°F",
                    reading.temperature_celsius(),
                    reading.temperature_fahrenheit()
                );
                self.handler.on_reading(reading);
            }
            Err(e) => {
                warn!("Dropping notification {:02X?}: {}", payload, e);
            }
        }
    }

    /// Update the link state.
    fn set_state(&self, new_state: LinkState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("Link state changed: {} -> {}", old_state, new_state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{FT95_TEMPERATURE_UUID, TEMPERATURE_MEASUREMENT_UUID};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::channel::mpsc as fmpsc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    const SAMPLE: [u8; 5] = [0x00, 0x76, 0x01, 0xFF, 0xFE];
    // Timer wheel rounds deadlines up to the next millisecond
    const TICK_SLACK: Duration = Duration::from_millis(5);

    /// Scripted transport: every scan finds the device while `present`,
    /// every subscribe pops the next queued notification feed.
    struct FakeTransport {
        present: AtomicBool,
        alive: AtomicBool,
        accepted: Vec<Uuid>,
        feeds: parking_lot::Mutex<VecDeque<fmpsc::UnboundedReceiver<Bytes>>>,
        scan_times: parking_lot::Mutex<Vec<Instant>>,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl FakeTransport {
        fn new(accepted: Vec<Uuid>) -> Self {
            Self {
                present: AtomicBool::new(true),
                alive: AtomicBool::new(true),
                accepted,
                feeds: parking_lot::Mutex::new(VecDeque::new()),
                scan_times: parking_lot::Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
            }
        }

        fn add_feed(&self) -> fmpsc::UnboundedSender<Bytes> {
            let (tx, rx) = fmpsc::unbounded();
            self.feeds.lock().push_back(rx);
            tx
        }

        fn scans(&self) -> usize {
            self.scan_times.lock().len()
        }
    }

    #[async_trait]
    impl BleTransport for FakeTransport {
        type Device = ();
        type Handle = usize;

        async fn scan(&self, _identifier: &str, timeout: Duration) -> Result<Option<()>> {
            self.scan_times.lock().push(Instant::now());
            if self.present.load(Ordering::SeqCst) {
                Ok(Some(()))
            } else {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }

        async fn connect(&self, _device: (), _timeout: Duration) -> Result<usize> {
            self.alive.store(true, Ordering::SeqCst);
            Ok(self.connects.fetch_add(1, Ordering::SeqCst))
        }

        async fn subscribe(&self, _handle: &usize, characteristic: Uuid) -> Result<NotificationStream> {
            if !self.accepted.contains(&characteristic) {
                return Err(Error::CharacteristicNotFound {
                    uuid: characteristic.to_string(),
                });
            }
            match self.feeds.lock().pop_front() {
                Some(rx) => Ok(Box::pin(rx)),
                None => Err(Error::ConnectionLost),
            }
        }

        async fn is_alive(&self, _handle: &usize) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn disconnect(&self, _handle: &usize) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug, PartialEq)]
    enum Seen {
        Reading(f64),
        Link(bool),
    }

    struct ChannelHandler {
        tx: mpsc::UnboundedSender<(Seen, Instant)>,
    }

    impl ReadingHandler for ChannelHandler {
        fn on_reading(&self, reading: Reading) {
            let _ = self
                .tx
                .send((Seen::Reading(reading.temperature_celsius()), Instant::now()));
        }

        fn on_link_change(&self, connected: bool) {
            let _ = self.tx.send((Seen::Link(connected), Instant::now()));
        }
    }

    fn settings() -> LinkSettings {
        LinkSettings {
            scan_timeout: Duration::from_secs(5),
            backoff: Duration::from_secs(2),
            liveness_interval: Duration::from_secs(1),
            ..LinkSettings::default()
        }
    }

    fn start(
        transport: Arc<FakeTransport>,
    ) -> (
        Arc<ConnectionManager<FakeTransport>>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
        mpsc::UnboundedReceiver<(Seen, Instant)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(ConnectionManager::new(
            transport,
            settings(),
            Decoder::default(),
            Arc::new(ChannelHandler { tx }),
        ));
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let manager = manager.clone();
            let cancel = cancel.clone();
            async move { manager.run(cancel).await }
        });
        (manager, cancel, task, rx)
    }

    async fn next_seen(rx: &mut mpsc::UnboundedReceiver<(Seen, Instant)>) -> (Seen, Instant) {
        rx.recv().await.expect("handler channel closed")
    }

    #[test]
    fn test_link_state() {
        assert!(LinkState::Listening.is_listening());
        assert!(!LinkState::Scanning.is_listening());
        assert_eq!(
            LinkState::Connecting.connection_status(),
            ConnectionStatus::Searching
        );
        assert_eq!(
            LinkState::Listening.connection_status(),
            ConnectionStatus::Connected
        );
        assert_eq!(format!("{}", LinkState::Idle), "Idle");
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_notification_does_not_break_listening() {
        let transport = Arc::new(FakeTransport::new(vec![TEMPERATURE_MEASUREMENT_UUID]));
        let feed = transport.add_feed();
        feed.unbounded_send(Bytes::from_static(&SAMPLE)).unwrap();
        feed.unbounded_send(Bytes::from_static(&[0x01])).unwrap();
        feed.unbounded_send(Bytes::from_static(&[0x00, 0x6E, 0x01]))
            .unwrap();

        let (manager, cancel, task, mut rx) = start(transport.clone());

        assert_eq!(next_seen(&mut rx).await.0, Seen::Link(true));
        match next_seen(&mut rx).await.0 {
            Seen::Reading(c) => assert!((c - 37.4).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
        match next_seen(&mut rx).await.0 {
            Seen::Reading(c) => assert!((c - 36.6).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
        assert!(manager.is_connected());

        cancel.cancel();
        task.await.unwrap();

        assert_eq!(manager.state(), LinkState::Idle);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
        drop(feed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_resumes_scanning_within_backoff() {
        let transport = Arc::new(FakeTransport::new(vec![TEMPERATURE_MEASUREMENT_UUID]));
        let _first = transport.add_feed();
        let _second = transport.add_feed();

        let (manager, cancel, task, mut rx) = start(transport.clone());

        assert_eq!(next_seen(&mut rx).await.0, Seen::Link(true));
        assert_eq!(transport.scans(), 1);

        transport.alive.store(false, Ordering::SeqCst);

        let (seen, dropped_at) = next_seen(&mut rx).await;
        assert_eq!(seen, Seen::Link(false));
        assert!(!manager.is_connected());

        // Reconnects on the second feed
        assert_eq!(next_seen(&mut rx).await.0, Seen::Link(true));
        let rescan_at = transport.scan_times.lock()[1];
        assert!(rescan_at.duration_since(dropped_at) <= settings().backoff + TICK_SLACK);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_device_is_rescanned_with_fixed_backoff() {
        let transport = Arc::new(FakeTransport::new(vec![TEMPERATURE_MEASUREMENT_UUID]));
        transport.present.store(false, Ordering::SeqCst);

        let (manager, cancel, task, _rx) = start(transport.clone());

        while transport.scans() < 3 {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        cancel.cancel();
        task.await.unwrap();

        let times = transport.scan_times.lock().clone();
        let expected = settings().scan_timeout + settings().backoff;
        for pair in times.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(gap >= expected && gap <= expected + TICK_SLACK, "gap {:?}", gap);
        }
        assert_eq!(transport.connects.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state(), LinkState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_vendor_characteristic() {
        let transport = Arc::new(FakeTransport::new(vec![FT95_TEMPERATURE_UUID]));
        let feed = transport.add_feed();
        feed.unbounded_send(Bytes::from_static(&SAMPLE)).unwrap();

        let (_manager, cancel, task, mut rx) = start(transport.clone());

        assert_eq!(next_seen(&mut rx).await.0, Seen::Link(true));
        assert!(matches!(next_seen(&mut rx).await.0, Seen::Reading(_)));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_usable_characteristic_backs_off() {
        let transport = Arc::new(FakeTransport::new(Vec::new()));

        let (manager, cancel, task, mut rx) = start(transport.clone());

        assert_eq!(next_seen(&mut rx).await.0, Seen::Link(false));
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
        assert!(!manager.is_connected());
        assert_ne!(manager.state(), LinkState::Listening);

        cancel.cancel();
        task.await.unwrap();
    }

    /// Transport that spends time on setup I/O, then waits out its own
    /// timeout and cleans up: stops the scan, or drops a link whose service
    /// discovery never finishes.
    #[derive(Default)]
    struct SlowTransport {
        present: AtomicBool,
        scans_started: AtomicUsize,
        scans_stopped: AtomicUsize,
        links_up: AtomicUsize,
        links_down: AtomicUsize,
    }

    const SETUP_IO: Duration = Duration::from_millis(20);

    #[async_trait]
    impl BleTransport for SlowTransport {
        type Device = ();
        type Handle = ();

        async fn scan(&self, _identifier: &str, timeout: Duration) -> Result<Option<()>> {
            self.scans_started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(SETUP_IO).await;
            let found = if self.present.load(Ordering::SeqCst) {
                Some(())
            } else {
                let _ = tokio::time::timeout(timeout, futures::future::pending::<()>()).await;
                None
            };
            self.scans_stopped.fetch_add(1, Ordering::SeqCst);
            Ok(found)
        }

        async fn connect(&self, _device: (), timeout: Duration) -> Result<()> {
            tokio::time::sleep(SETUP_IO).await;
            self.links_up.fetch_add(1, Ordering::SeqCst);
            let _ = tokio::time::timeout(timeout, futures::future::pending::<()>()).await;
            self.links_down.fetch_add(1, Ordering::SeqCst);
            Err(Error::Timeout {
                operation: "connect",
            })
        }

        async fn subscribe(&self, _handle: &(), _characteristic: Uuid) -> Result<NotificationStream> {
            Err(Error::ConnectionLost)
        }

        async fn is_alive(&self, _handle: &()) -> bool {
            true
        }

        async fn disconnect(&self, _handle: &()) -> Result<()> {
            Ok(())
        }
    }

    struct NullHandler;

    impl ReadingHandler for NullHandler {
        fn on_reading(&self, _reading: Reading) {}
        fn on_link_change(&self, _connected: bool) {}
    }

    async fn run_for(transport: Arc<SlowTransport>, duration: Duration) {
        let manager = Arc::new(ConnectionManager::new(
            transport,
            settings(),
            Decoder::default(),
            Arc::new(NullHandler),
        ));
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let manager = manager.clone();
            let cancel = cancel.clone();
            async move { manager.run(cancel).await }
        });

        tokio::time::sleep(duration).await;
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_scans_are_stopped_by_the_transport() {
        let transport = Arc::new(SlowTransport::default());
        run_for(transport.clone(), Duration::from_secs(30)).await;

        let started = transport.scans_started.load(Ordering::SeqCst);
        let stopped = transport.scans_stopped.load(Ordering::SeqCst);
        assert!(started >= 4, "only {started} scans");
        // At most the scan in flight at shutdown is left unfinished
        assert!(started - stopped <= 1, "started {started}, stopped {stopped}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connect_drops_its_link() {
        let transport = Arc::new(SlowTransport::default());
        transport.present.store(true, Ordering::SeqCst);
        run_for(transport.clone(), Duration::from_secs(40)).await;

        let up = transport.links_up.load(Ordering::SeqCst);
        let down = transport.links_down.load(Ordering::SeqCst);
        assert!(up >= 3, "only {up} connects");
        assert!(up - down <= 1, "up {up}, down {down}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_stream_counts_as_disconnect() {
        let transport = Arc::new(FakeTransport::new(vec![TEMPERATURE_MEASUREMENT_UUID]));
        let feed = transport.add_feed();

        let (_manager, cancel, task, mut rx) = start(transport.clone());

        assert_eq!(next_seen(&mut rx).await.0, Seen::Link(true));
        drop(feed);
        assert_eq!(next_seen(&mut rx).await.0, Seen::Link(false));

        cancel.cancel();
        task.await.unwrap();
    }
}
