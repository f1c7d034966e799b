use btleplug::api::BDAddr;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    ble::BleTransport,
    error::{Result, TurtlUpError},
    feedback::FeedbackActuator,
    history::HistoryStats,
    protocol::{decode_frame, Command, FrameIdGenerator},
    session::{DisconnectStep, Session},
    tracker::PostureTracker,
    transport::{SerialWriter, Transport, TransportEvent},
    types::{
        ConnectionParams, ConnectionState, DisconnectReason, ImuFrame, MonitorConfig,
        NotificationMode, PostureClassification,
    },
};

/// Notifications published to subscribers of a [`PostureMonitor`]
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// Session entered the Connected state
    Connected,
    /// Session left the Connected state
    Disconnected {
        /// Caller-initiated or lost
        reason: DisconnectReason,
    },
    /// A connection attempt failed
    ConnectionError {
        /// Failure description
        reason: String,
    },
    /// A notification was decoded into a frame
    ImuFrame(ImuFrame),
    /// A frame was classified
    Classification(PostureClassification),
    /// A verdict was added to history
    HistoryChanged(HistoryStats),
    /// The reference posture was replaced
    ReferenceChanged(ImuFrame),
}

/// Background tasks bound to one live connection
struct SessionTasks {
    ingest: JoinHandle<()>,
    feedback: JoinHandle<()>,
}

impl SessionTasks {
    fn abort(self) {
        self.ingest.abort();
        self.feedback.abort();
    }

    /// Let the ingest task run to completion, then stop the feedback worker
    async fn finish(self) {
        if let Err(e) = self.ingest.await {
            if e.is_panic() {
                warn!("Ingest task of the previous connection panicked");
            }
        }
        self.feedback.abort();
    }
}

/// Posture monitoring session over a TurtlUp device
///
/// Owns the transport, the connection state machine and the posture state.
/// Notifications are processed strictly in arrival order by one ingest task
/// per connection: each frame is decoded, classified, recorded and, on bad
/// posture, answered with a vibration cue before the next one is taken.
///
/// Clones share the same session.
///
/// # Examples
///
/// ```no_run
/// use turtlup::{MonitorEvent, PostureMonitor};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let monitor = PostureMonitor::with_ble(Default::default(), Default::default()).await?;
///     let mut events = monitor.subscribe();
///
///     monitor.connect().await?;
///
///     while let Ok(event) = events.recv().await {
///         if let MonitorEvent::ImuFrame(_) = event {
///             monitor.capture_reference().await?;
///             break;
///         }
///     }
///
///     println!("{}", monitor.stats().await);
///     monitor.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct PostureMonitor<T: Transport> {
    transport: Arc<T>,
    writer: Arc<SerialWriter<T>>,
    params: ConnectionParams,
    config: MonitorConfig,
    session: Arc<RwLock<Session>>,
    tracker: Arc<Mutex<PostureTracker>>,
    events: broadcast::Sender<MonitorEvent>,
    tasks: Arc<Mutex<Option<SessionTasks>>>,
}

impl<T: Transport> Clone for PostureMonitor<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            writer: self.writer.clone(),
            params: self.params.clone(),
            config: self.config.clone(),
            session: self.session.clone(),
            tracker: self.tracker.clone(),
            events: self.events.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl PostureMonitor<BleTransport> {
    /// Create a monitor backed by the host Bluetooth adapter
    ///
    /// # Errors
    ///
    /// Returns [`TurtlUpError::Ble`] if the Bluetooth manager cannot be
    /// initialized, or [`TurtlUpError::InvalidParameters`] for a bad config.
    pub async fn with_ble(params: ConnectionParams, config: MonitorConfig) -> Result<Self> {
        let transport = BleTransport::new(params.clone()).await?;
        Self::new(transport, params, config)
    }

    /// Bluetooth address of the connected device, if any
    pub async fn device_address(&self) -> Option<BDAddr> {
        self.transport.address().await
    }
}

impl<T: Transport> PostureMonitor<T> {
    /// Create a disconnected monitor over `transport`
    ///
    /// # Errors
    ///
    /// Returns [`TurtlUpError::InvalidParameters`] if `config` fails validation.
    pub fn new(transport: T, params: ConnectionParams, config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let transport = Arc::new(transport);

        Ok(Self {
            writer: Arc::new(SerialWriter::new(transport.clone())),
            transport,
            params,
            tracker: Arc::new(Mutex::new(PostureTracker::new(&config))),
            config,
            session: Arc::new(RwLock::new(Session::new())),
            events,
            tasks: Arc::new(Mutex::new(None)),
        })
    }

    /// Subscribe to monitor events; drop the receiver to unsubscribe
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Connect to the device
    ///
    /// Does nothing if a connection exists or is already being established.
    /// On failure the session passes through Error, a
    /// [`MonitorEvent::ConnectionError`] is published and the session settles
    /// back to Disconnected. There is no automatic retry.
    ///
    /// # Errors
    ///
    /// Returns the transport error that made the attempt fail.
    pub async fn connect(&self) -> Result<()> {
        if !self.session.write().await.begin_connect() {
            return Ok(());
        }

        let mut tasks = self.tasks.lock().await;
        if let Some(stale) = tasks.take() {
            stale.finish().await;
        }

        info!("Connecting to {:?}", self.params.device_name);

        match self.transport.connect(&self.params.device_name).await {
            Ok(inbound) => {
                self.session.write().await.mark_connected();
                self.emit(MonitorEvent::Connected);
                *tasks = Some(self.start_session_tasks(inbound));

                let tracker = self.tracker.lock().await;
                info!(
                    "Posture monitoring started (threshold {}, history of {})",
                    tracker.threshold(),
                    tracker.history().capacity()
                );
                Ok(())
            }
            Err(e) => {
                error!("Connection attempt failed: {e}");
                self.session.write().await.fail(e.to_string());
                self.emit(MonitorEvent::ConnectionError {
                    reason: e.to_string(),
                });

                if let Err(cleanup) = self.transport.disconnect().await {
                    warn!("Cleanup after failed connect also failed: {cleanup}");
                }
                self.session.write().await.settle_after_error();
                Err(e)
            }
        }
    }

    /// Disconnect from the device
    ///
    /// Idempotent. An in-flight connect attempt is not cancelled; it settles
    /// on its own.
    ///
    /// # Errors
    ///
    /// Returns the transport error if teardown failed. The session is
    /// Disconnected either way.
    pub async fn disconnect(&self) -> Result<()> {
        match self.session.write().await.begin_disconnect() {
            DisconnectStep::AlreadyDisconnected => return Ok(()),
            DisconnectStep::ConnectInFlight => {
                warn!("Disconnect requested while connecting; letting the attempt settle");
                return Ok(());
            }
            DisconnectStep::Proceed => {}
        }

        info!("Disconnecting from device");

        if let Some(tasks) = self.tasks.lock().await.take() {
            tasks.abort();
        }
        let result = self.transport.disconnect().await;

        self.session.write().await.finish_disconnect();
        self.emit(MonitorEvent::Disconnected {
            reason: DisconnectReason::Requested,
        });

        result
    }

    /// Replace the reference posture with `frame`
    pub async fn set_reference(&self, frame: ImuFrame) {
        let classification = self.tracker.lock().await.set_reference(frame.clone());
        info!("Reference posture set from frame {}", frame.id);
        self.emit(MonitorEvent::ReferenceChanged(frame));
        self.emit(MonitorEvent::Classification(classification));
    }

    /// Promote the most recent frame to reference posture
    ///
    /// # Errors
    ///
    /// Returns [`TurtlUpError::NoFrame`] if no frame has been received yet.
    pub async fn capture_reference(&self) -> Result<ImuFrame> {
        let (frame, classification) = {
            let mut tracker = self.tracker.lock().await;
            let frame = tracker.capture_reference()?;
            (frame, tracker.classification())
        };

        info!("Reference posture captured from frame {}", frame.id);
        self.emit(MonitorEvent::ReferenceChanged(frame.clone()));
        self.emit(MonitorEvent::Classification(classification));
        Ok(frame)
    }

    /// Send a command to the device
    ///
    /// # Errors
    ///
    /// Returns [`TurtlUpError::NotConnected`] outside the Connected state, or
    /// [`TurtlUpError::Write`] if the device rejects the write.
    pub async fn send_command(&self, command: Command) -> Result<()> {
        if !self.session.read().await.is_connected() {
            return Err(TurtlUpError::NotConnected);
        }
        debug!("Sending {command}");
        self.writer.write(&command.to_bytes()).await
    }

    /// Ask the device to calibrate its own neutral position
    ///
    /// # Errors
    ///
    /// See [`PostureMonitor::send_command`].
    pub async fn request_device_calibration(&self) -> Result<()> {
        self.send_command(Command::Calibrate).await
    }

    /// Select how the device alerts the wearer
    ///
    /// # Errors
    ///
    /// See [`PostureMonitor::send_command`].
    pub async fn set_notification_mode(&self, mode: NotificationMode) -> Result<()> {
        self.send_command(Command::SetMode(mode)).await
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        self.session.read().await.state()
    }

    /// Check if the device is connected
    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_connected()
    }

    /// How long the current connection has been up
    pub async fn connected_for(&self) -> Option<Duration> {
        self.session
            .read()
            .await
            .connected_since()
            .map(|since| since.elapsed())
    }

    /// Reason of the last failed connection attempt
    pub async fn last_error(&self) -> Option<String> {
        self.session.read().await.last_error().map(str::to_string)
    }

    /// Why the last connection ended
    pub async fn last_disconnect_reason(&self) -> Option<DisconnectReason> {
        self.session.read().await.last_disconnect()
    }

    /// Most recent frame
    pub async fn current_frame(&self) -> Option<ImuFrame> {
        self.tracker.lock().await.current_frame().cloned()
    }

    /// Reference posture
    pub async fn reference(&self) -> Option<ImuFrame> {
        self.tracker.lock().await.reference().cloned()
    }

    /// Verdict for the current frame
    pub async fn classification(&self) -> PostureClassification {
        self.tracker.lock().await.classification()
    }

    /// Recorded verdicts, oldest first, `true` meaning good posture
    pub async fn history(&self) -> Vec<bool> {
        self.tracker.lock().await.history().entries()
    }

    /// Statistics over recorded history
    pub async fn stats(&self) -> HistoryStats {
        self.tracker.lock().await.stats()
    }

    /// Forget recorded history
    pub async fn clear_history(&self) {
        self.tracker.lock().await.clear_history();
        self.emit(MonitorEvent::HistoryChanged(HistoryStats::default()));
    }

    /// Monitor settings in effect
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn emit(&self, event: MonitorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn start_session_tasks(
        &self,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> SessionTasks {
        let (feedback, feedback_task) = FeedbackActuator::spawn(
            self.writer.clone(),
            self.session.clone(),
            self.config.feedback_enabled,
        );
        let ingest = tokio::spawn(run_ingest(self.clone(), inbound, feedback));

        SessionTasks {
            ingest,
            feedback: feedback_task,
        }
    }

    async fn process_payload(
        &self,
        payload: &[u8],
        ids: &mut FrameIdGenerator,
        feedback: &FeedbackActuator,
    ) {
        if !self.session.read().await.is_connected() {
            debug!("Ignoring notification outside the Connected state");
            return;
        }

        let frame = match decode_frame(payload, ids) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping notification: {e}");
                return;
            }
        };

        debug!("Frame {} with {} sample(s)", frame.id, frame.samples.len());

        let (outcome, stats) = {
            let mut tracker = self.tracker.lock().await;
            let outcome = tracker.ingest(frame.clone());
            (outcome, tracker.stats())
        };

        self.emit(MonitorEvent::ImuFrame(frame));
        self.emit(MonitorEvent::Classification(outcome.classification));

        if outcome.recorded {
            self.emit(MonitorEvent::HistoryChanged(stats));
            if self.session.read().await.is_connected() {
                feedback.on_classification(outcome.classification);
            }
        }
    }

    async fn handle_lost(&self) {
        // Held until the event is out so a reconnect cannot start mid-cleanup.
        let mut session = self.session.write().await;
        if !session.mark_lost() {
            return;
        }

        warn!("Connection lost; monitoring halted until the next connect");
        if let Err(e) = self.transport.disconnect().await {
            warn!("Cleanup after lost connection failed: {e}");
        }
        self.emit(MonitorEvent::Disconnected {
            reason: DisconnectReason::Lost,
        });
        drop(session);
    }
}

/// Consume inbound transport events for one connection, in order
async fn run_ingest<T: Transport>(
    monitor: PostureMonitor<T>,
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    feedback: FeedbackActuator,
) {
    let mut ids = FrameIdGenerator::new();

    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Data(payload) => {
                monitor.process_payload(&payload, &mut ids, &feedback).await;
            }
            TransportEvent::Lost => break,
        }
    }

    // A closed channel while still Connected means the transport went away.
    monitor.handle_lost().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::FakeTransport;
    use crate::types::ImuSample;
    use std::{sync::atomic::Ordering, time::Duration};
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};

    type FakeMonitor = PostureMonitor<Arc<FakeTransport>>;

    fn monitor_with(config: MonitorConfig) -> (FakeMonitor, Arc<FakeTransport>) {
        let fake = FakeTransport::new();
        let monitor = PostureMonitor::new(fake.clone(), ConnectionParams::default(), config)
            .expect("valid config");
        (monitor, fake)
    }

    fn monitor() -> (FakeMonitor, Arc<FakeTransport>) {
        monitor_with(MonitorConfig::default())
    }

    fn payload(ax: f64) -> String {
        format!(r#"{{"data":[{{"ax":{ax},"ay":0,"az":0}}]}}"#)
    }

    async fn next_event(events: &mut broadcast::Receiver<MonitorEvent>) -> MonitorEvent {
        timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event within a second")
            .expect("channel open")
    }

    async fn next_classification(
        events: &mut broadcast::Receiver<MonitorEvent>,
    ) -> PostureClassification {
        loop {
            if let MonitorEvent::Classification(c) = next_event(events).await {
                return c;
            }
        }
    }

    async fn next_frame(events: &mut broadcast::Receiver<MonitorEvent>) -> ImuFrame {
        loop {
            if let MonitorEvent::ImuFrame(frame) = next_event(events).await {
                return frame;
            }
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    async fn calibrated_at_origin(monitor: &FakeMonitor) {
        monitor
            .set_reference(ImuFrame::new("reference", vec![ImuSample::new(0.0, 0.0, 0.0)]))
            .await;
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = MonitorConfig {
            threshold: -2.0,
            ..Default::default()
        };
        let result = PostureMonitor::new(
            FakeTransport::new(),
            ConnectionParams::default(),
            config,
        );
        assert!(matches!(result, Err(TurtlUpError::InvalidParameters(_))));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_lifecycle() {
        let (monitor, fake) = monitor();
        let mut events = monitor.subscribe();

        assert_eq!(monitor.state().await, ConnectionState::Disconnected);
        assert_ok!(monitor.connect().await);
        assert_eq!(monitor.state().await, ConnectionState::Connected);
        assert_eq!(next_event(&mut events).await, MonitorEvent::Connected);

        assert_ok!(monitor.disconnect().await);
        assert_eq!(monitor.state().await, ConnectionState::Disconnected);
        assert_eq!(
            next_event(&mut events).await,
            MonitorEvent::Disconnected {
                reason: DisconnectReason::Requested
            }
        );
        assert_eq!(
            monitor.last_disconnect_reason().await,
            Some(DisconnectReason::Requested)
        );

        // Second disconnect is a no-op and publishes nothing.
        assert_ok!(monitor.disconnect().await);
        assert_eq!(fake.disconnects.load(Ordering::SeqCst), 1);
        settle().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_connect_makes_one_attempt() {
        let (monitor, fake) = monitor();
        let gate = fake.gate_connect();

        let first = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.connect().await })
        };
        while monitor.state().await != ConnectionState::Connecting {
            tokio::task::yield_now().await;
        }

        assert_ok!(monitor.connect().await);
        assert_eq!(monitor.state().await, ConnectionState::Connecting);

        gate.notify_one();
        assert_ok!(first.await.unwrap());

        assert_eq!(fake.connect_attempts.load(Ordering::SeqCst), 1);
        assert!(monitor.is_connected().await);

        // Already connected: still a no-op.
        assert_ok!(monitor.connect().await);
        assert_eq!(fake.connect_attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_observable() {
        let (monitor, fake) = monitor();
        let mut events = monitor.subscribe();
        fake.fail_next_connect(TurtlUpError::Discovery("no TurtlUp in range".to_string()));

        let result = monitor.connect().await;
        assert!(matches!(result, Err(TurtlUpError::Discovery(_))));

        match next_event(&mut events).await {
            MonitorEvent::ConnectionError { reason } => assert!(reason.contains("no TurtlUp")),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(monitor.state().await, ConnectionState::Disconnected);
        assert!(monitor.last_error().await.unwrap().contains("no TurtlUp"));
        assert_eq!(fake.disconnects.load(Ordering::SeqCst), 1);

        // A fresh connect works and clears the error.
        assert_ok!(monitor.connect().await);
        assert!(monitor.last_error().await.is_none());
    }

    #[tokio::test]
    async fn test_frames_are_unknown_until_calibrated() {
        let (monitor, fake) = monitor();
        let mut events = monitor.subscribe();
        assert_ok!(monitor.connect().await);

        fake.push(&payload(1.0));
        assert_eq!(
            next_classification(&mut events).await,
            PostureClassification::Unknown
        );
        assert!(monitor.history().await.is_empty());
        assert_eq!(monitor.stats().await.total, 0);
        assert_eq!(monitor.classification().await, PostureClassification::Unknown);
    }

    #[tokio::test]
    async fn test_classification_history_and_feedback() {
        let (monitor, fake) = monitor();
        let mut events = monitor.subscribe();
        assert_ok!(monitor.connect().await);
        calibrated_at_origin(&monitor).await;

        fake.push(&payload(3.0));
        assert_eq!(next_classification(&mut events).await, PostureClassification::Unknown);
        assert_eq!(next_classification(&mut events).await, PostureClassification::Good);

        fake.push(&payload(5.0));
        assert_eq!(next_classification(&mut events).await, PostureClassification::Bad);
        match next_event(&mut events).await {
            MonitorEvent::HistoryChanged(stats) => {
                assert_eq!(stats.total, 2);
                assert_eq!(stats.bad_count, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }

        settle().await;
        assert_eq!(fake.writes(), vec!["VIBRATE".to_string()]);
        assert_eq!(monitor.history().await, vec![true, false]);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let (monitor, fake) = monitor();
        let mut events = monitor.subscribe();
        assert_ok!(monitor.connect().await);
        assert_eq!(next_event(&mut events).await, MonitorEvent::Connected);

        fake.push("{not valid json");
        fake.push(&payload(2.5));

        let frame = next_frame(&mut events).await;
        assert_eq!(frame.samples, vec![ImuSample::new(2.5, 0.0, 0.0)]);
        assert!(monitor.is_connected().await);
    }

    #[tokio::test]
    async fn test_frames_are_processed_in_arrival_order() {
        let (monitor, fake) = monitor();
        let mut events = monitor.subscribe();
        assert_ok!(monitor.connect().await);
        calibrated_at_origin(&monitor).await;

        let deviations = [1.0, 9.0, 2.0, 8.0, 0.0];
        for ax in deviations {
            fake.push(&payload(ax));
        }

        let mut seen = Vec::new();
        for _ in deviations {
            seen.push(next_frame(&mut events).await.samples[0].ax);
        }
        assert_eq!(seen, deviations);
        assert_eq!(
            monitor.history().await,
            vec![true, false, true, false, true]
        );
    }

    #[tokio::test]
    async fn test_lost_connection_keeps_history_and_reference() {
        let (monitor, fake) = monitor();
        let mut events = monitor.subscribe();
        assert_ok!(monitor.connect().await);
        calibrated_at_origin(&monitor).await;

        fake.push(&payload(6.0));
        next_frame(&mut events).await;
        settle().await;
        assert_eq!(fake.writes(), vec!["VIBRATE".to_string()]);

        fake.drop_link();
        loop {
            if let MonitorEvent::Disconnected { reason } = next_event(&mut events).await {
                assert_eq!(reason, DisconnectReason::Lost);
                break;
            }
        }
        assert_eq!(monitor.state().await, ConnectionState::Disconnected);
        assert_eq!(
            monitor.last_disconnect_reason().await,
            Some(DisconnectReason::Lost)
        );

        // Ingestion is halted and nothing is written after the drop.
        fake.push(&payload(7.0));
        settle().await;
        assert_eq!(monitor.history().await, vec![false]);
        assert_eq!(fake.writes(), vec!["VIBRATE".to_string()]);

        // Both survive a reconnect.
        assert_ok!(monitor.connect().await);
        assert_eq!(monitor.reference().await.unwrap().id, "reference");
        assert_eq!(monitor.history().await, vec![false]);
        assert_eq!(fake.connect_attempts.load(Ordering::SeqCst), 2);

        // Disconnect after a reconnect publishes exactly one more event.
        assert_ok!(monitor.disconnect().await);
        let mut disconnects = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, MonitorEvent::Disconnected { .. }) {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_reconnect_waits_for_lost_cleanup() {
        let (monitor, fake) = monitor();
        let mut events = monitor.subscribe();
        assert_ok!(monitor.connect().await);
        assert_eq!(next_event(&mut events).await, MonitorEvent::Connected);
        let cleanup = fake.gate_disconnect();

        fake.drop_link();
        while fake.disconnects.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let reconnect = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.connect().await })
        };
        settle().await;
        assert_eq!(fake.connect_attempts.load(Ordering::SeqCst), 1);

        cleanup.notify_one();
        assert_ok!(reconnect.await.unwrap());
        assert_eq!(fake.connect_attempts.load(Ordering::SeqCst), 2);
        assert_eq!(
            next_event(&mut events).await,
            MonitorEvent::Disconnected {
                reason: DisconnectReason::Lost
            }
        );
        assert_eq!(next_event(&mut events).await, MonitorEvent::Connected);

        // The new link survived the old connection's cleanup.
        fake.push(&payload(1.0));
        next_frame(&mut events).await;
        assert!(monitor.is_connected().await);
        assert_eq!(fake.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_commands_do_not_overlap_feedback_cues() {
        let (monitor, fake) = monitor();
        let mut events = monitor.subscribe();
        assert_ok!(monitor.connect().await);
        calibrated_at_origin(&monitor).await;

        fake.gate_writes();
        fake.push(&payload(9.0));
        next_frame(&mut events).await;
        settle().await;

        let command = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.request_device_calibration().await })
        };
        settle().await;
        fake.release_writes();
        assert_ok!(command.await.unwrap());

        assert!(!fake.saw_overlapping_writes());
        assert_eq!(
            fake.writes(),
            vec!["VIBRATE".to_string(), "CALIBRATE".to_string()]
        );
    }

    #[tokio::test]
    async fn test_connected_for_tracks_the_live_connection() {
        let (monitor, _fake) = monitor();
        assert!(monitor.connected_for().await.is_none());

        assert_ok!(monitor.connect().await);
        assert!(monitor.connected_for().await.is_some());

        assert_ok!(monitor.disconnect().await);
        assert!(monitor.connected_for().await.is_none());
    }

    #[tokio::test]
    async fn test_recalibration_does_not_rewrite_history() {
        let (monitor, fake) = monitor();
        let mut events = monitor.subscribe();
        assert_ok!(monitor.connect().await);
        calibrated_at_origin(&monitor).await;

        fake.push(&payload(10.0));
        next_frame(&mut events).await;
        assert_eq!(monitor.history().await, vec![false]);

        let reference = assert_ok!(monitor.capture_reference().await);
        assert_eq!(reference.samples[0].ax, 10.0);
        assert_eq!(monitor.classification().await, PostureClassification::Good);
        assert_eq!(monitor.history().await, vec![false]);

        fake.push(&payload(10.0));
        next_frame(&mut events).await;
        assert_eq!(monitor.history().await, vec![false, true]);
    }

    #[tokio::test]
    async fn test_capture_reference_without_frame_fails() {
        let (monitor, _fake) = monitor();
        assert!(matches!(
            monitor.capture_reference().await,
            Err(TurtlUpError::NoFrame)
        ));
        assert!(monitor.reference().await.is_none());
    }

    #[tokio::test]
    async fn test_history_capacity_is_enforced() {
        let config = MonitorConfig {
            history_capacity: 10,
            feedback_enabled: false,
            ..Default::default()
        };
        let (monitor, fake) = monitor_with(config);
        let mut events = monitor.subscribe();
        assert_ok!(monitor.connect().await);
        calibrated_at_origin(&monitor).await;

        fake.push(&payload(9.0));
        for _ in 0..10 {
            fake.push(&payload(0.0));
        }
        for _ in 0..11 {
            next_frame(&mut events).await;
        }

        let stats = monitor.stats().await;
        assert_eq!(stats.total, 10);
        assert_eq!(stats.bad_count, 0);
        settle().await;
        assert!(fake.writes().is_empty());
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let (monitor, fake) = monitor();
        assert_err!(monitor.request_device_calibration().await);

        assert_ok!(monitor.connect().await);
        assert_ok!(monitor.request_device_calibration().await);
        assert_ok!(monitor.set_notification_mode(NotificationMode::App).await);

        assert_eq!(
            fake.writes(),
            vec!["CALIBRATE".to_string(), "MODE:app".to_string()]
        );
    }

    #[tokio::test]
    async fn test_feedback_write_failure_does_not_affect_history() {
        let (monitor, fake) = monitor();
        let mut events = monitor.subscribe();
        assert_ok!(monitor.connect().await);
        calibrated_at_origin(&monitor).await;
        fake.fail_writes.store(true, Ordering::SeqCst);

        fake.push(&payload(9.0));
        fake.push(&payload(0.0));
        next_frame(&mut events).await;
        next_frame(&mut events).await;
        settle().await;

        assert!(monitor.is_connected().await);
        assert_eq!(monitor.history().await, vec![false, true]);
        assert!(fake.writes().is_empty());
    }
}
