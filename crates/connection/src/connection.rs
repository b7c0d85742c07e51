//! Connection - event dispatch loop and public API
//!
//! One background thread polls the transport, routes every event into the
//! correlation engine and notifies observers synchronously. Application
//! threads only touch state through the methods below; every shared table is
//! behind its own lock.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use contracts::{
    CalibrationEntry, ConfigValue, ConnectionConfig, ConnectionEvent, ConnectionObserver,
    ConnectionStatus, ContractError, DeviceInfo, FailedDevice, Frame, FrameId, Image,
    ImageCompletion, ImageRequest, LogMessage, LogSeverity, Perspective, PolicyFlag, PolicyMask,
    PollOutcome, PoolStats, TrackedQuad, Transport, TransportEvent, TransportResult,
    TransportStatus,
};
use dispatcher::{ObserverId, ObserverList};
use frame_sync::{
    Admission, CalibrationObservation, CorrelationEngine, PendingConfigRequests, PolicyState,
    ReconcilerStats,
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::devices::DeviceList;
use crate::error::{ConnectionError, Result};
use crate::status::StatusReporter;

/// Name of the poll thread
pub const POLL_THREAD_NAME: &str = "tracksync-poll";

/// Status messages raised off the poll thread wait here; older ones are
/// dropped beyond this many.
const MAX_DEFERRED: usize = 64;

/// Upper bound of the pause after a failed reconnect
const RECONNECT_BACKOFF: Duration = Duration::from_millis(250);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A connection to the tracking service
pub struct Connection<T: Transport> {
    shared: Arc<Shared<T>>,
    poll_thread: Mutex<Option<JoinHandle<()>>>,
}

/// State shared between the poll thread and application threads
struct Shared<T> {
    transport: T,
    config: ConnectionConfig,
    running: AtomicBool,
    opened: AtomicBool,
    engine: Mutex<CorrelationEngine>,
    policy: Mutex<PolicyState>,
    config_requests: Mutex<PendingConfigRequests>,
    devices: Mutex<DeviceList>,
    status: Mutex<StatusReporter>,
    observers: ObserverList,
    deferred: Mutex<Vec<ConnectionEvent>>,
    handler_panics: AtomicU64,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        let shared = Shared {
            engine: Mutex::new(CorrelationEngine::new(config.clone())),
            transport,
            config,
            running: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            policy: Mutex::new(PolicyState::default()),
            config_requests: Mutex::new(PendingConfigRequests::default()),
            devices: Mutex::new(DeviceList::new()),
            status: Mutex::new(StatusReporter::new()),
            observers: ObserverList::new(),
            deferred: Mutex::new(Vec::new()),
            handler_panics: AtomicU64::new(0),
        };
        Self {
            shared: Arc::new(shared),
            poll_thread: Mutex::new(None),
        }
    }

    /// Open the transport (first start only) and spawn the poll thread.
    #[instrument(name = "connection_start", skip(self))]
    pub fn start(&self) -> Result<()> {
        let mut slot = lock(&self.poll_thread);
        if self.shared.running.load(Ordering::Acquire) {
            return Err(ConnectionError::AlreadyRunning);
        }

        // A loop that ended on its own (connection lost) or was stopped is
        // reaped before the flag flips back.
        if let Some(previous) = slot.take() {
            if previous.join().is_err() {
                warn!("previous poll thread panicked");
            }
        }
        self.shared.running.store(true, Ordering::Release);

        if !self.shared.opened.swap(true, Ordering::AcqRel) {
            let result = self.shared.transport.open();
            self.shared.report_deferred("open", &result);
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(POLL_THREAD_NAME.to_string())
            .spawn(move || shared.poll_loop());

        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                info!("connection started");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                error!(error = %e, "failed to spawn poll thread");
                Err(ConnectionError::Io(e))
            }
        }
    }

    /// Ask the poll loop to exit after its current poll returns
    #[instrument(name = "connection_stop", skip(self))]
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
    }

    /// Wait for the poll thread to finish
    pub fn join(&self) {
        let handle = lock(&self.poll_thread).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("poll thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    // ===== Observers =====

    pub fn subscribe(&self, observer: Arc<dyn ConnectionObserver>) -> ObserverId {
        self.shared.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.shared.observers.unsubscribe(id)
    }

    /// Observer panics caught so far
    pub fn observer_failures(&self) -> u64 {
        self.shared.observers.failures()
    }

    /// Event handler panics caught by the poll loop
    pub fn handler_panics(&self) -> u64 {
        self.shared.handler_panics.load(Ordering::Relaxed)
    }

    // ===== Policy =====

    /// Request a capability; takes effect once the transport acknowledges it
    #[instrument(name = "connection_set_policy", skip(self))]
    pub fn set_policy(&self, flag: PolicyFlag) -> Result<()> {
        let mut policy = lock(&self.shared.policy);
        let (set, clear) = policy.request(flag);
        self.send_policy(set, clear)
    }

    /// Withdraw a capability request
    #[instrument(name = "connection_clear_policy", skip(self))]
    pub fn clear_policy(&self, flag: PolicyFlag) -> Result<()> {
        let mut policy = lock(&self.shared.policy);
        let (set, clear) = policy.clear(flag);
        self.send_policy(set, clear)
    }

    fn send_policy(&self, set: PolicyMask, clear: PolicyMask) -> Result<()> {
        debug!(%set, "sending policy flags");
        let result = self.shared.transport.set_policy_flags(set, clear);
        self.shared.report_deferred("set_policy_flags", &result);
        result.map_err(|status| ConnectionError::transport("set_policy_flags", status))
    }

    /// Whether the transport has acknowledged `flag`
    pub fn is_policy_set(&self, flag: PolicyFlag) -> bool {
        lock(&self.shared.policy).is_set(flag)
    }

    pub fn requested_policy(&self) -> PolicyMask {
        lock(&self.shared.policy).requested()
    }

    pub fn active_policy(&self) -> PolicyMask {
        lock(&self.shared.policy).active()
    }

    // ===== Configuration =====

    /// Ask for a configuration value; the answer arrives as a
    /// `ConfigResponse` notification carrying the returned request id.
    #[instrument(name = "connection_get_config", skip(self))]
    pub fn get_config_value(&self, key: &str) -> Result<u32> {
        // Held across the call so the response cannot be resolved first.
        let mut requests = lock(&self.shared.config_requests);
        let result = self.shared.transport.request_config_value(key);
        self.shared.report_deferred("request_config_value", &result);
        let request_id =
            result.map_err(|status| ConnectionError::transport("request_config_value", status))?;
        requests.record(request_id, key);
        Ok(request_id)
    }

    /// Store a configuration value; confirmed by a `ConfigChanged`
    /// notification carrying the returned request id.
    #[instrument(name = "connection_set_config", skip(self, value))]
    pub fn set_config_value(&self, key: &str, value: impl Into<ConfigValue>) -> Result<u32> {
        let value = value.into();
        if matches!(value, ConfigValue::Unknown) {
            return Err(ContractError::UnsupportedConfigValue {
                key: key.to_string(),
            }
            .into());
        }

        let mut requests = lock(&self.shared.config_requests);
        let result = self.shared.transport.save_config_value(key, &value);
        self.shared.report_deferred("save_config_value", &result);
        let request_id =
            result.map_err(|status| ConnectionError::transport("save_config_value", status))?;
        requests.record(request_id, key);
        Ok(request_id)
    }

    /// Config requests still waiting for an answer
    pub fn pending_config_requests(&self) -> usize {
        lock(&self.shared.config_requests).len()
    }

    // ===== Queries =====

    /// Transport clock (microseconds)
    pub fn now(&self) -> i64 {
        self.shared.transport.now()
    }

    pub fn latest_images(&self) -> Vec<Image> {
        lock(&self.shared.engine).latest_images()
    }

    pub fn images_for_frame(&self, frame_id: FrameId) -> Vec<Image> {
        lock(&self.shared.engine).images_for_frame(frame_id)
    }

    pub fn latest_tracked_quad(&self) -> Option<TrackedQuad> {
        lock(&self.shared.engine).latest_tracked_quad()
    }

    /// Released frame `offset` slots behind the newest
    pub fn frame(&self, offset: usize) -> Option<Arc<Frame>> {
        lock(&self.shared.engine).frame(offset)
    }

    pub fn distortion(&self, version: u64) -> Option<Arc<CalibrationEntry>> {
        lock(&self.shared.engine).distortion(version)
    }

    pub fn current_calibration(&self, perspective: Perspective) -> Option<u64> {
        lock(&self.shared.engine).current_calibration(perspective)
    }

    /// Whether the last completed image switched calibration
    pub fn calibration_changed(&self) -> bool {
        lock(&self.shared.engine).calibration_changed()
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        lock(&self.shared.engine).pool_stats()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.shared.engine).pending_len()
    }

    pub fn reconciler_stats(&self) -> ReconcilerStats {
        lock(&self.shared.engine).reconciler_stats()
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        lock(&self.shared.devices).attached().to_vec()
    }

    pub fn failed_devices(&self) -> Vec<FailedDevice> {
        lock(&self.shared.devices).failed().to_vec()
    }

    /// Whether the transport reports a live service connection
    pub fn is_service_connected(&self) -> bool {
        if !self.shared.opened.load(Ordering::Acquire) {
            return false;
        }
        let result = self.shared.transport.connection_status();
        self.shared.report_deferred("connection_status", &result);
        matches!(result, Ok(ConnectionStatus::Connected))
    }

    /// Service connected and at least one device attached
    pub fn is_connected(&self) -> bool {
        self.is_service_connected() && !lock(&self.shared.devices).is_empty()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        self.stop();
        self.join();
        if self.shared.opened.swap(false, Ordering::AcqRel) {
            self.shared.transport.close();
        }
    }
}

impl<T: Transport> Shared<T> {
    fn poll_loop(&self) {
        info!("poll loop started");
        self.notify(&ConnectionEvent::Init);
        let timeout = self.config.poll_timeout();

        while self.running.load(Ordering::Acquire) {
            self.flush_deferred();
            let outcome = self.transport.poll(timeout);

            let handled = panic::catch_unwind(AssertUnwindSafe(|| self.handle_outcome(outcome)));
            if handled.is_err() {
                self.handler_panics.fetch_add(1, Ordering::Relaxed);
                error!("event handler panicked; continuing with the next event");
            }
        }

        self.flush_deferred();
        info!("poll loop stopped");
    }

    fn handle_outcome(&self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Event(event) => {
                self.report_now("poll", TransportStatus::Success);
                if self.handle_event(event) {
                    self.check_pending_frames();
                }
            }
            PollOutcome::Timeout => {
                self.report_now("poll", TransportStatus::Timeout);
                self.check_pending_frames();
            }
            PollOutcome::Failed(status) => {
                self.report_now("poll", status);
            }
            PollOutcome::Disconnected => {
                self.report_now("poll", TransportStatus::NotConnected);
                self.notify(&ConnectionEvent::ConnectionLost);
                self.reconnect();
            }
        }
    }

    fn reconnect(&self) {
        info!("transport disconnected, reconnecting");
        self.transport.close();
        self.release_transport_buffers();
        let result = self.transport.open();
        let failed = result.is_err();
        if let Some(message) = self.status_message("open", &result) {
            self.notify(&ConnectionEvent::Log(message));
        }
        if failed {
            thread::sleep(self.config.poll_timeout().min(RECONNECT_BACKOFF));
        }
    }

    /// Apply one transport event; true when pending frames may have become
    /// releasable.
    #[instrument(
        level = "trace",
        name = "handle_event",
        skip(self, event),
        fields(kind = event.kind())
    )]
    fn handle_event(&self, event: TransportEvent) -> bool {
        let mut outgoing = Vec::new();

        let check_pending = match event {
            TransportEvent::Connection => {
                outgoing.push(ConnectionEvent::Connected);
                false
            }
            TransportEvent::ConnectionLost => {
                lock(&self.devices).clear();
                self.release_transport_buffers();
                self.running.store(false, Ordering::Release);
                outgoing.push(ConnectionEvent::ConnectionLost);
                false
            }
            TransportEvent::Device(device) => {
                let added = lock(&self.devices).add_or_update(device.clone());
                debug!(handle = device.handle, serial = %device.serial, added, "device");
                outgoing.push(ConnectionEvent::DeviceConnected(device));
                false
            }
            TransportEvent::DeviceLost { handle } => {
                if let Some(device) = lock(&self.devices).remove(handle) {
                    outgoing.push(ConnectionEvent::DeviceLost(device));
                }
                false
            }
            TransportEvent::DeviceFailure { handle, status } => {
                let failed = lock(&self.devices).record_failure(handle, status);
                warn!(serial = %failed.serial, ?status, "device failure");
                outgoing.push(ConnectionEvent::DeviceFailure(failed));
                false
            }
            TransportEvent::Tracking(tracking) => {
                lock(&self.engine).on_tracking(tracking);
                true
            }
            TransportEvent::ImageRequest(request) => {
                self.start_image(&request);
                false
            }
            TransportEvent::ImageComplete(completion) => {
                self.complete_image(completion, &mut outgoing);
                true
            }
            TransportEvent::TrackedQuad(quad) => {
                let attached = lock(&self.engine).on_tracked_quad(quad.clone());
                trace!(frame_id = quad.frame_id, attached, "tracked quad");
                outgoing.push(ConnectionEvent::TrackedQuad(quad));
                true
            }
            TransportEvent::Log(message) => {
                mirror_log(&message);
                outgoing.push(ConnectionEvent::Log(message));
                false
            }
            TransportEvent::PolicyChange { current } => {
                let previous = lock(&self.policy).acknowledge(current);
                let requirements = lock(&self.engine).apply_policy(current);
                info!(%previous, %current, ?requirements, "policy changed");
                outgoing.push(ConnectionEvent::PolicyChanged { previous, current });
                false
            }
            TransportEvent::ConfigChange { request_id, status } => {
                let key = lock(&self.config_requests).resolve(request_id);
                debug!(request_id, key = %key, status, "config change");
                outgoing.push(ConnectionEvent::ConfigChanged {
                    key,
                    status,
                    request_id,
                });
                false
            }
            TransportEvent::ConfigResponse { request_id, value } => {
                let key = lock(&self.config_requests).resolve(request_id);
                debug!(request_id, key = %key, value_type = value.type_name(), "config response");
                outgoing.push(ConnectionEvent::ConfigResponse {
                    key,
                    value,
                    request_id,
                });
                false
            }
            TransportEvent::Unknown { code } => {
                warn!(code, "unhandled transport event type");
                false
            }
        };

        for notification in &outgoing {
            self.notify(notification);
        }
        check_pending
    }

    /// Free the pool slots whose buffers the transport no longer holds
    fn release_transport_buffers(&self) {
        let abandoned = lock(&self.engine).abandon_in_flight_images();
        if abandoned > 0 {
            warn!(abandoned, "image buffers lost with the transport");
        }
    }

    /// Answer an image request with a pool buffer or a discard
    fn start_image(&self, request: &ImageRequest) {
        let admission = lock(&self.engine).admit_image_request(request);
        match admission {
            Admission::Provide { slot, buffer } => {
                let result = self.transport.provide_image_buffer(request, slot, buffer);
                if result.is_err() {
                    lock(&self.engine).abandon_slot(slot);
                }
                self.report_result("provide_image_buffer", &result);
            }
            Admission::Discard(reason) => {
                trace!(
                    frame_id = request.frame_id,
                    reason = reason.as_str(),
                    "image request discarded"
                );
                observability::record_image_dropped(reason.as_str());
                let result = self.transport.discard_image(request);
                self.report_result("discard_image", &result);
            }
        }
    }

    fn complete_image(&self, completion: ImageCompletion, outgoing: &mut Vec<ConnectionEvent>) {
        let perspective = completion.perspective;
        let completed = lock(&self.engine).on_image_complete(completion);

        match completed {
            Ok(done) => {
                observability::record_image_completed(perspective);
                if let CalibrationObservation::Changed { previous, current } = done.calibration {
                    info!(
                        perspective = perspective.as_str(),
                        ?previous,
                        current,
                        "calibration changed"
                    );
                    observability::record_calibration_change(perspective);
                    outgoing.push(ConnectionEvent::CalibrationChanged {
                        perspective,
                        previous,
                        current,
                    });
                }
                outgoing.push(ConnectionEvent::ImageComplete(done.image));
            }
            Err(rejected) => {
                debug!(reason = rejected.as_str(), "image completion dropped");
                observability::record_image_dropped(rejected.as_str());
            }
        }
    }

    /// Release every frame at the head of the pending queue that is ready
    fn check_pending_frames(&self) {
        let now = self.transport.now();
        let (released, depth, pool) = {
            let mut engine = lock(&self.engine);
            let released = engine.release_ready(now);
            (released, engine.pending_len(), engine.pool_stats())
        };

        observability::record_pending_depth(depth);
        if let Some(stats) = pool {
            observability::record_pool_stats(&stats);
        }

        for frame in released {
            observability::record_frame_released(
                frame.reason,
                frame.frame.images.len(),
                frame.age_us,
            );
            self.notify(&ConnectionEvent::FrameReady {
                frame: frame.frame,
                reason: frame.reason,
            });
        }
    }

    fn notify(&self, event: &ConnectionEvent) {
        self.observers.notify(event);
    }

    // ===== Status reporting =====

    fn status_message<R>(
        &self,
        operation: &str,
        result: &TransportResult<R>,
    ) -> Option<LogMessage> {
        let now = self.transport.now();
        lock(&self.status).check(operation, result, now)
    }

    /// Report from the poll thread: publish immediately
    fn report_result<R>(&self, operation: &str, result: &TransportResult<R>) {
        if let Some(message) = self.status_message(operation, result) {
            self.notify(&ConnectionEvent::Log(message));
        }
    }

    fn report_now(&self, operation: &str, status: TransportStatus) {
        let now = self.transport.now();
        let message = lock(&self.status).observe(operation, status, now);
        if let Some(message) = message {
            self.notify(&ConnectionEvent::Log(message));
        }
    }

    /// Report from an application thread: queue for the poll thread
    fn report_deferred<R>(&self, operation: &str, result: &TransportResult<R>) {
        if let Some(message) = self.status_message(operation, result) {
            let mut deferred = lock(&self.deferred);
            if deferred.len() >= MAX_DEFERRED {
                deferred.remove(0);
            }
            deferred.push(ConnectionEvent::Log(message));
        }
    }

    fn flush_deferred(&self) {
        let pending = std::mem::take(&mut *lock(&self.deferred));
        for event in &pending {
            self.notify(event);
        }
    }
}

/// Mirror a transport log message into tracing
fn mirror_log(message: &LogMessage) {
    match message.severity {
        LogSeverity::Critical => {
            error!(timestamp = message.timestamp, "{}", message.message)
        }
        LogSeverity::Warning => warn!(timestamp = message.timestamp, "{}", message.message),
        LogSeverity::Information => {
            info!(timestamp = message.timestamp, "{}", message.message)
        }
        LogSeverity::Unknown => debug!(timestamp = message.timestamp, "{}", message.message),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use contracts::{DeviceFailureStatus, ReleaseReason, TrackingEvent, UNAVAILABLE_SERIAL};

    use super::*;
    use crate::mock::{MockCall, MockConfig, MockOperation, MockTransport};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ConnectionEvent>>,
    }

    impl Recorder {
        fn kinds(&self) -> Vec<&'static str> {
            lock(&self.events).iter().map(ConnectionEvent::kind).collect()
        }

        fn count(&self, kind: &str) -> usize {
            self.kinds().iter().filter(|k| **k == kind).count()
        }

        fn frames(&self) -> Vec<(FrameId, ReleaseReason, usize)> {
            lock(&self.events)
                .iter()
                .filter_map(|event| match event {
                    ConnectionEvent::FrameReady { frame, reason } => {
                        Some((frame.id, *reason, frame.images.len()))
                    }
                    _ => None,
                })
                .collect()
        }

        fn find<R>(&self, f: impl Fn(&ConnectionEvent) -> Option<R>) -> Option<R> {
            lock(&self.events).iter().find_map(f)
        }
    }

    impl ConnectionObserver for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_event(&self, event: &ConnectionEvent) {
            lock(&self.events).push(event.clone());
        }
    }

    struct Panicker;

    impl ConnectionObserver for Panicker {
        fn on_event(&self, event: &ConnectionEvent) {
            if matches!(event, ConnectionEvent::Connected) {
                panic!("observer failure");
            }
        }
    }

    fn fast_config() -> ConnectionConfig {
        ConnectionConfig {
            poll_timeout_ms: 5,
            distortion_grid: 1,
            ..ConnectionConfig::default()
        }
    }

    fn started(mock: &MockTransport) -> (Connection<MockTransport>, Arc<Recorder>) {
        let connection = Connection::new(mock.clone(), fast_config());
        let recorder = Arc::new(Recorder::default());
        connection.subscribe(recorder.clone());
        connection.start().unwrap();
        (connection, recorder)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn tracking(frame_id: FrameId, timestamp: i64) -> TransportEvent {
        TransportEvent::Tracking(TrackingEvent {
            frame_id,
            timestamp,
            tracking_frame_id: frame_id,
            framerate: 90.0,
            hand_count: 0,
            payload: bytes::Bytes::new(),
        })
    }

    #[test]
    fn test_start_announces_connection() {
        let mock = MockTransport::scripted();
        let (connection, recorder) = started(&mock);

        wait_until(|| recorder.count("connected") == 1);
        assert_eq!(recorder.kinds()[0], "init");
        assert!(connection.is_service_connected());
        // No device attached yet
        assert!(!connection.is_connected());
        assert_eq!(mock.calls().first(), Some(&MockCall::Open));
    }

    #[test]
    fn test_start_twice_rejected() {
        let mock = MockTransport::scripted();
        let (connection, _recorder) = started(&mock);

        assert!(matches!(
            connection.start(),
            Err(ConnectionError::AlreadyRunning)
        ));

        connection.stop();
        connection.join();
        assert!(!connection.is_running());
        connection.start().unwrap();
        // The transport is opened once across restarts
        let opens = mock.calls().iter().filter(|c| **c == MockCall::Open).count();
        assert_eq!(opens, 1);
    }

    #[test]
    fn test_policy_takes_effect_on_ack() {
        let mock = MockTransport::new(MockConfig {
            auto_ack_policy: false,
            ..MockConfig::scripted()
        });
        let (connection, recorder) = started(&mock);

        connection.set_policy(PolicyFlag::Images).unwrap();
        assert!(!connection.is_policy_set(PolicyFlag::Images));
        assert!(connection.requested_policy().contains(PolicyFlag::Images));

        let set = PolicyMask::EMPTY.with(PolicyFlag::Images);
        assert!(mock.calls().contains(&MockCall::SetPolicyFlags {
            set,
            clear: set.complement(),
        }));

        mock.push(TransportEvent::PolicyChange { current: set });
        wait_until(|| connection.is_policy_set(PolicyFlag::Images));
        let previous = recorder.find(|event| match event {
            ConnectionEvent::PolicyChanged { previous, .. } => Some(*previous),
            _ => None,
        });
        assert_eq!(previous, Some(PolicyMask::EMPTY));
    }

    #[test]
    fn test_policy_failure_reported() {
        let mock = MockTransport::scripted();
        let connection = Connection::new(mock.clone(), fast_config());
        mock.fail_next(MockOperation::SetPolicyFlags, TransportStatus::NotConnected);

        let err = connection.set_policy(PolicyFlag::TrackedQuads).unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Transport {
                operation: "set_policy_flags",
                status: TransportStatus::NotConnected,
            }
        ));

        let recorder = Arc::new(Recorder::default());
        connection.subscribe(recorder.clone());
        connection.start().unwrap();
        // The queued status message is published by the poll thread
        wait_until(|| recorder.count("log") >= 1);
        let message = recorder.find(|event| match event {
            ConnectionEvent::Log(message) => Some(message.clone()),
            _ => None,
        });
        let message = message.unwrap();
        assert_eq!(message.severity, LogSeverity::Critical);
        assert!(message.message.contains("set_policy_flags"));
    }

    #[test]
    fn test_config_answers_carry_key() {
        let mock = MockTransport::scripted();
        let (connection, recorder) = started(&mock);

        let saved = connection.set_config_value("image_processing_auto_flip", true).unwrap();
        let asked = connection.get_config_value("image_processing_auto_flip").unwrap();
        assert_ne!(saved, asked);

        wait_until(|| connection.pending_config_requests() == 0);
        wait_until(|| recorder.count("config_response") == 1);

        let changed = recorder.find(|event| match event {
            ConnectionEvent::ConfigChanged {
                key,
                status,
                request_id,
            } => Some((key.clone(), *status, *request_id)),
            _ => None,
        });
        assert_eq!(
            changed,
            Some(("image_processing_auto_flip".to_string(), true, saved))
        );

        let response = recorder.find(|event| match event {
            ConnectionEvent::ConfigResponse { key, value, .. } => Some((key.clone(), value.clone())),
            _ => None,
        });
        assert_eq!(
            response,
            Some((
                "image_processing_auto_flip".to_string(),
                ConfigValue::Boolean(true)
            ))
        );
    }

    #[test]
    fn test_unknown_config_value_rejected() {
        let connection = Connection::new(MockTransport::scripted(), fast_config());
        let err = connection
            .set_config_value("tracking_priority", ConfigValue::Unknown)
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Contract(ContractError::UnsupportedConfigValue { .. })
        ));
        assert_eq!(connection.pending_config_requests(), 0);
    }

    #[test]
    fn test_device_lifecycle() {
        let mock = MockTransport::scripted();
        let (connection, recorder) = started(&mock);
        let device = DeviceInfo {
            handle: 7,
            serial: "LP-7".to_string(),
            h_fov: 2.0,
            v_fov: 2.0,
            range_mm: 400,
            baseline_mm: 40,
            embedded: false,
            streaming: true,
        };

        mock.push(TransportEvent::Device(device.clone()));
        wait_until(|| connection.is_connected());

        mock.push(TransportEvent::DeviceFailure {
            handle: Some(7),
            status: DeviceFailureStatus::BadCalibration,
        });
        mock.push(TransportEvent::DeviceFailure {
            handle: None,
            status: DeviceFailureStatus::BadTransport,
        });
        // Unknown handle: no notification
        mock.push(TransportEvent::DeviceLost { handle: 99 });
        mock.push(TransportEvent::DeviceLost { handle: 7 });

        wait_until(|| recorder.count("device_lost") == 1);
        assert!(connection.devices().is_empty());
        assert!(!connection.is_connected());

        let failed = connection.failed_devices();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].serial, "LP-7");
        assert_eq!(failed[1].serial, UNAVAILABLE_SERIAL);
    }

    #[test]
    fn test_frame_released_when_images_complete() {
        let mock = MockTransport::scripted();
        let (connection, recorder) = started(&mock);

        connection.set_policy(PolicyFlag::Images).unwrap();
        wait_until(|| connection.is_policy_set(PolicyFlag::Images));

        mock.emit_frame(1);
        wait_until(|| !recorder.frames().is_empty());

        assert_eq!(recorder.frames(), vec![(1, ReleaseReason::Complete, 2)]);
        assert_eq!(connection.images_for_frame(1).len(), 2);
        assert_eq!(connection.frame(0).map(|f| f.id), Some(1));
        assert_eq!(connection.pending_len(), 0);
        // First image of each perspective reports a calibration change
        assert_eq!(recorder.count("calibration_changed"), 2);
        assert_eq!(connection.current_calibration(Perspective::Left), Some(1));
        assert!(connection.distortion(1).is_some());
    }

    #[test]
    fn test_incomplete_frame_times_out() {
        let mock = MockTransport::new(MockConfig {
            auto_complete_images: false,
            ..MockConfig::scripted()
        });
        let (connection, recorder) = started(&mock);

        connection.set_policy(PolicyFlag::Images).unwrap();
        wait_until(|| connection.is_policy_set(PolicyFlag::Images));

        mock.emit_frame(1);
        wait_until(|| mock.in_flight() == 2);
        assert!(recorder.frames().is_empty());

        // Only the left image arrives
        assert!(mock.complete_image(1 << 2));
        wait_until(|| connection.images_for_frame(1).len() == 1);
        assert!(recorder.frames().is_empty());

        mock.advance(connection.config().pending_timeout_us + 1);
        wait_until(|| !recorder.frames().is_empty());
        assert_eq!(recorder.frames(), vec![(1, ReleaseReason::TimedOut, 1)]);
    }

    #[test]
    fn test_frames_released_in_order() {
        let mock = MockTransport::scripted();
        let (connection, recorder) = started(&mock);

        for id in 1..=3 {
            mock.push(tracking(id, 0));
        }
        wait_until(|| recorder.frames().len() == 3);

        let ids: Vec<FrameId> = recorder.frames().iter().map(|f| f.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(connection.frame(0).map(|f| f.id), Some(3));
        assert_eq!(connection.frame(2).map(|f| f.id), Some(1));
    }

    #[test]
    fn test_images_discarded_when_disabled() {
        let mock = MockTransport::scripted();
        let (_connection, recorder) = started(&mock);

        mock.push(TransportEvent::ImageRequest(ImageRequest {
            token: 5,
            frame_id: 1,
            perspective: Perspective::Left,
            kind: contracts::ImageKind::Processed,
            width: 4,
            height: 4,
            bytes_per_pixel: 1,
        }));
        wait_until(|| mock.calls().contains(&MockCall::DiscardImage { token: 5 }));
        assert_eq!(recorder.count("image_complete"), 0);
    }

    #[test]
    fn test_observer_panic_isolated() {
        let mock = MockTransport::scripted();
        let connection = Connection::new(mock.clone(), fast_config());
        connection.subscribe(Arc::new(Panicker));
        let recorder = Arc::new(Recorder::default());
        connection.subscribe(recorder.clone());
        connection.start().unwrap();

        wait_until(|| recorder.count("connected") == 1);
        mock.push(tracking(1, 0));
        wait_until(|| recorder.frames().len() == 1);

        assert_eq!(connection.observer_failures(), 1);
        assert_eq!(connection.handler_panics(), 0);
        assert!(connection.is_running());
    }

    #[test]
    fn test_disconnect_reopens_transport() {
        let mock = MockTransport::scripted();
        let (connection, recorder) = started(&mock);
        wait_until(|| recorder.count("connected") == 1);

        mock.inject_disconnect();
        wait_until(|| recorder.count("connected") == 2);

        assert_eq!(recorder.count("connection_lost"), 1);
        assert!(connection.is_running());
        let calls = mock.calls();
        assert!(calls.contains(&MockCall::Close));
        assert_eq!(calls.iter().filter(|c| **c == MockCall::Open).count(), 2);
    }

    #[test]
    fn test_pool_slots_recovered_after_reconnect() {
        let mock = MockTransport::new(MockConfig {
            auto_complete_images: false,
            ..MockConfig::scripted()
        });
        let connection = Connection::new(
            mock.clone(),
            ConnectionConfig {
                image_buffer_len: 2,
                grow_image_pool: false,
                ..fast_config()
            },
        );
        let recorder = Arc::new(Recorder::default());
        connection.subscribe(recorder.clone());
        connection.start().unwrap();
        connection.set_policy(PolicyFlag::Images).unwrap();
        wait_until(|| connection.is_policy_set(PolicyFlag::Images));

        let image_request = |token: u64| {
            TransportEvent::ImageRequest(ImageRequest {
                token,
                frame_id: 1,
                perspective: Perspective::Left,
                kind: contracts::ImageKind::Processed,
                width: 4,
                height: 4,
                bytes_per_pixel: 1,
            })
        };

        mock.push(image_request(1));
        mock.push(image_request(2));
        wait_until(|| mock.in_flight() == 2);
        assert_eq!(connection.pool_stats().unwrap().in_flight, 2);

        mock.inject_disconnect();
        wait_until(|| recorder.count("connected") == 2);
        assert_eq!(mock.in_flight(), 0);
        assert_eq!(connection.pool_stats().unwrap().in_flight, 0);

        for token in 3..=4 {
            mock.push(image_request(token));
        }
        wait_until(|| mock.in_flight() == 2);
        let stats = connection.pool_stats().unwrap();
        assert_eq!(stats.exhausted, 0);
        assert_eq!(stats.in_flight, 2);
        assert!(!mock
            .calls()
            .iter()
            .any(|call| matches!(call, MockCall::DiscardImage { .. })));

        connection.stop();
        connection.join();
    }

    #[test]
    fn test_connection_lost_event_stops_loop() {
        let mock = MockTransport::scripted();
        let (connection, recorder) = started(&mock);

        mock.push(TransportEvent::ConnectionLost);
        wait_until(|| !connection.is_running());
        connection.join();
        assert_eq!(recorder.count("connection_lost"), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mock = MockTransport::scripted();
        let (connection, recorder) = started(&mock);
        wait_until(|| recorder.count("connected") == 1);

        let late = Arc::new(Recorder::default());
        let id = connection.subscribe(late.clone());
        assert!(connection.unsubscribe(id));
        assert!(!connection.unsubscribe(id));

        mock.push(tracking(1, 0));
        wait_until(|| recorder.frames().len() == 1);
        assert!(late.kinds().is_empty());
    }
}
