//! Mock transport
//!
//! In-process stand-in for the tracking service. Tests script events, drive
//! a manual clock, inject call failures and inspect recorded calls; demos run
//! the synthetic generator thread, which emits tracking frames, image
//! requests and planar surfaces according to the active policy.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use contracts::{
    ConfigValue, ConnectionStatus, DeviceInfo, ImageCompletion, ImageKind, ImageRequest,
    Perspective, PolicyFlag, PolicyMask, PollOutcome, SlotHandle, TrackedQuad, TrackingEvent,
    Transport, TransportConfig, TransportEvent, TransportResult, TransportStatus,
};
use tracing::{debug, trace};

/// Mock transport configuration
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Generator frame rate (Hz)
    pub framerate_hz: f64,
    pub image_width: u32,
    pub image_height: u32,
    /// Calibration version stamped on completed images
    pub calibration_version: u64,
    /// Distortion grid size sent with completions (`2 * grid * grid` floats)
    pub distortion_grid: u32,
    /// Clock only moves through [`MockTransport::advance`]
    pub manual_clock: bool,
    /// Complete an image as soon as its buffer is provided
    pub auto_complete_images: bool,
    /// Answer policy requests with a policy-change event
    pub auto_ack_policy: bool,
    /// Answer config requests with response/change events
    pub auto_respond_config: bool,
    /// Device announced after every successful open
    pub device: Option<DeviceInfo>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            framerate_hz: 90.0,
            image_width: 640,
            image_height: 240,
            calibration_version: 1,
            distortion_grid: 64,
            manual_clock: false,
            auto_complete_images: true,
            auto_ack_policy: true,
            auto_respond_config: true,
            device: Some(DeviceInfo {
                handle: 1,
                serial: "MOCK-0001".to_string(),
                h_fov: 2.4,
                v_fov: 2.0,
                range_mm: 470,
                baseline_mm: 40,
                embedded: false,
                streaming: true,
            }),
        }
    }
}

impl MockConfig {
    /// Deterministic setup for tests: manual clock, no announced device
    pub fn scripted() -> Self {
        Self {
            manual_clock: true,
            device: None,
            distortion_grid: 1,
            ..Self::default()
        }
    }

    pub fn from_transport(config: &TransportConfig) -> Self {
        Self {
            framerate_hz: config.framerate_hz,
            image_width: config.image_width,
            image_height: config.image_height,
            calibration_version: config.calibration_version,
            ..Self::default()
        }
    }
}

/// Transport operation, for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Open,
    SetPolicyFlags,
    RequestConfigValue,
    SaveConfigValue,
    ProvideImageBuffer,
    DiscardImage,
    ConnectionStatus,
}

/// A recorded transport call
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Open,
    Close,
    SetPolicyFlags { set: PolicyMask, clear: PolicyMask },
    RequestConfigValue { key: String },
    SaveConfigValue { key: String, value: ConfigValue },
    ProvideImageBuffer { token: u64, slot: SlotHandle, size: usize },
    DiscardImage { token: u64 },
    ConnectionStatus,
}

/// Buffer handed over for a requested image
#[derive(Debug)]
struct InFlight {
    request: ImageRequest,
    slot: SlotHandle,
    buffer: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    queue: VecDeque<PollOutcome>,
    open: bool,
    active_policy: PolicyMask,
    calibration_version: u64,
    next_request_id: u32,
    next_sequence_id: u64,
    config_store: HashMap<String, ConfigValue>,
    in_flight: HashMap<u64, InFlight>,
    failures: HashMap<MockOperation, VecDeque<TransportStatus>>,
    calls: Vec<MockCall>,
}

#[derive(Debug)]
struct MockInner {
    config: MockConfig,
    state: Mutex<MockState>,
    ready: Condvar,
    epoch: Instant,
    manual_now: AtomicI64,
    generating: AtomicBool,
    generator: Mutex<Option<JoinHandle<()>>>,
}

/// Scriptable in-process transport. Clones share the same state.
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}

impl MockTransport {
    pub fn new(config: MockConfig) -> Self {
        let state = MockState {
            calibration_version: config.calibration_version,
            next_request_id: 1,
            ..MockState::default()
        };
        Self {
            inner: Arc::new(MockInner {
                config,
                state: Mutex::new(state),
                ready: Condvar::new(),
                epoch: Instant::now(),
                manual_now: AtomicI64::new(0),
                generating: AtomicBool::new(false),
                generator: Mutex::new(None),
            }),
        }
    }

    /// Mock with [`MockConfig::scripted`]
    pub fn scripted() -> Self {
        Self::new(MockConfig::scripted())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Scripting =====

    /// Queue an event for the next poll
    pub fn push(&self, event: TransportEvent) {
        self.push_outcome(PollOutcome::Event(event));
    }

    pub fn push_outcome(&self, outcome: PollOutcome) {
        self.state().queue.push_back(outcome);
        self.inner.ready.notify_all();
    }

    /// Make the next poll report a lost service connection
    pub fn inject_disconnect(&self) {
        self.push_outcome(PollOutcome::Disconnected);
    }

    /// Fail the next call of `operation` with `status`
    pub fn fail_next(&self, operation: MockOperation, status: TransportStatus) {
        self.state()
            .failures
            .entry(operation)
            .or_default()
            .push_back(status);
    }

    /// Calibration version stamped on subsequent completions
    pub fn set_calibration_version(&self, version: u64) {
        self.state().calibration_version = version;
    }

    /// Complete the in-flight image `token`; false if no buffer was provided
    pub fn complete_image(&self, token: u64) -> bool {
        let mut state = self.state();
        let Some(in_flight) = state.in_flight.remove(&token) else {
            return false;
        };
        let completion = self.build_completion(&mut state, in_flight);
        state
            .queue
            .push_back(PollOutcome::Event(TransportEvent::ImageComplete(completion)));
        drop(state);
        self.inner.ready.notify_all();
        true
    }

    fn build_completion(&self, state: &mut MockState, in_flight: InFlight) -> ImageCompletion {
        let InFlight {
            request,
            slot,
            mut buffer,
        } = in_flight;

        let shade = (request.frame_id as u8).wrapping_mul(3) ^ request.perspective.index() as u8;
        buffer.resize(request.size_bytes().unwrap_or(0), 0);
        buffer.fill(shade);

        state.next_sequence_id += 1;
        let grid = self.inner.config.distortion_grid as usize;
        let version = state.calibration_version;

        ImageCompletion {
            token: request.token,
            slot,
            frame_id: request.frame_id,
            sequence_id: state.next_sequence_id,
            timestamp: self.now(),
            perspective: request.perspective,
            kind: request.kind,
            width: request.width,
            height: request.height,
            bytes_per_pixel: request.bytes_per_pixel,
            calibration_version: version,
            distortion: vec![version as f32; 2 * grid * grid],
            pixels: buffer,
        }
    }

    // ===== Clock =====

    /// Advance the manual clock
    pub fn advance(&self, micros: i64) {
        self.inner.manual_now.fetch_add(micros, Ordering::SeqCst);
    }

    pub fn set_now(&self, micros: i64) {
        self.inner.manual_now.store(micros, Ordering::SeqCst);
    }

    // ===== Inspection =====

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Events not yet polled
    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }

    /// Image buffers provided and not yet completed
    pub fn in_flight(&self) -> usize {
        self.state().in_flight.len()
    }

    pub fn active_policy(&self) -> PolicyMask {
        self.state().active_policy
    }

    // ===== Generator =====

    /// Emit synthetic frames at the configured rate until stopped
    pub fn start_generator(&self) {
        if self.inner.generating.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let interval = Duration::from_secs_f64(1.0 / self.inner.config.framerate_hz.max(1.0));
        let spawned = thread::Builder::new()
            .name("tracksync-mock-gen".to_string())
            .spawn(move || generate(weak, interval));

        match spawned {
            Ok(handle) => {
                *self
                    .inner
                    .generator
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(e) => {
                self.inner.generating.store(false, Ordering::SeqCst);
                tracing::error!(error = %e, "failed to spawn mock generator");
            }
        }
    }

    pub fn stop_generator(&self) {
        self.inner.generating.store(false, Ordering::SeqCst);
        let handle = self
            .inner
            .generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Queue one synthetic frame: tracking data, image requests and the
    /// planar surface, as enabled by the active policy.
    pub fn emit_frame(&self, frame_id: i64) {
        let now = self.now();
        let config = &self.inner.config;
        let mut state = self.state();
        let policy = state.active_policy;

        let mut events = vec![TransportEvent::Tracking(TrackingEvent {
            frame_id,
            timestamp: now,
            tracking_frame_id: frame_id,
            framerate: config.framerate_hz as f32,
            hand_count: (frame_id % 3) as u32,
            payload: Bytes::from(frame_id.to_le_bytes().to_vec()),
        })];

        let mut kinds = Vec::new();
        if policy.contains(PolicyFlag::Images) {
            kinds.push(ImageKind::Processed);
            if policy.contains(PolicyFlag::RawImages) {
                kinds.push(ImageKind::Raw);
            }
        }
        for kind in kinds {
            for perspective in [Perspective::Left, Perspective::Right] {
                let token = (frame_id as u64) << 2
                    | (kind as u64) << 1
                    | perspective.index() as u64;
                events.push(TransportEvent::ImageRequest(ImageRequest {
                    token,
                    frame_id,
                    perspective,
                    kind,
                    width: config.image_width,
                    height: config.image_height,
                    bytes_per_pixel: 1,
                }));
            }
        }

        if policy.contains(PolicyFlag::TrackedQuads) {
            events.push(TransportEvent::TrackedQuad(TrackedQuad {
                frame_id,
                timestamp: now,
                valid: true,
                visible: true,
                width: 300.0,
                height: 200.0,
                resolution_x: 640,
                resolution_y: 480,
                position: [0.0, 250.0, 0.0],
                orientation: [0.0, 0.0, 0.0, 1.0],
            }));
        }

        state.queue.extend(events.into_iter().map(PollOutcome::Event));
        drop(state);
        self.inner.ready.notify_all();
    }

    /// Pop a scripted failure for `operation` and record `call`
    fn enter(
        &self,
        state: &mut MockState,
        operation: MockOperation,
        call: MockCall,
    ) -> TransportResult<()> {
        state.calls.push(call);
        let injected = state
            .failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        match injected {
            Some(status) => {
                trace!(?operation, %status, "injected failure");
                Err(status)
            }
            None => Ok(()),
        }
    }

    fn queue_event(&self, state: &mut MockState, event: TransportEvent) {
        state.queue.push_back(PollOutcome::Event(event));
        self.inner.ready.notify_all();
    }
}

fn generate(weak: Weak<MockInner>, interval: Duration) {
    debug!(interval_us = interval.as_micros() as u64, "mock generator started");
    let mut frame_id: i64 = 0;

    loop {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        if !inner.generating.load(Ordering::SeqCst) {
            break;
        }
        let transport = MockTransport { inner };
        if transport.is_open() {
            frame_id += 1;
            transport.emit_frame(frame_id);
        }
        drop(transport);
        thread::sleep(interval);
    }

    debug!(frames = frame_id, "mock generator stopped");
}

impl Transport for MockTransport {
    fn open(&self) -> TransportResult<()> {
        let mut state = self.state();
        self.enter(&mut state, MockOperation::Open, MockCall::Open)?;
        state.open = true;
        self.queue_event(&mut state, TransportEvent::Connection);
        if let Some(device) = self.inner.config.device.clone() {
            self.queue_event(&mut state, TransportEvent::Device(device));
        }
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state();
        state.calls.push(MockCall::Close);
        state.open = false;
        state.in_flight.clear();
    }

    fn poll(&self, timeout: Duration) -> PollOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();

        loop {
            if let Some(outcome) = state.queue.pop_front() {
                return outcome;
            }
            if !state.open {
                return PollOutcome::Disconnected;
            }

            let now = Instant::now();
            if now >= deadline {
                return PollOutcome::Timeout;
            }
            state = self
                .inner
                .ready
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn set_policy_flags(&self, set: PolicyMask, clear: PolicyMask) -> TransportResult<()> {
        let mut state = self.state();
        self.enter(
            &mut state,
            MockOperation::SetPolicyFlags,
            MockCall::SetPolicyFlags { set, clear },
        )?;

        if self.inner.config.auto_ack_policy {
            let current = PolicyMask((state.active_policy.bits() | set.bits()) & !clear.bits());
            state.active_policy = current;
            self.queue_event(&mut state, TransportEvent::PolicyChange { current });
        }
        Ok(())
    }

    fn request_config_value(&self, key: &str) -> TransportResult<u32> {
        let mut state = self.state();
        self.enter(
            &mut state,
            MockOperation::RequestConfigValue,
            MockCall::RequestConfigValue {
                key: key.to_string(),
            },
        )?;

        let request_id = state.next_request_id;
        state.next_request_id += 1;
        if self.inner.config.auto_respond_config {
            let value = state
                .config_store
                .get(key)
                .cloned()
                .unwrap_or(ConfigValue::Unknown);
            self.queue_event(&mut state, TransportEvent::ConfigResponse { request_id, value });
        }
        Ok(request_id)
    }

    fn save_config_value(&self, key: &str, value: &ConfigValue) -> TransportResult<u32> {
        let mut state = self.state();
        self.enter(
            &mut state,
            MockOperation::SaveConfigValue,
            MockCall::SaveConfigValue {
                key: key.to_string(),
                value: value.clone(),
            },
        )?;

        let request_id = state.next_request_id;
        state.next_request_id += 1;
        state.config_store.insert(key.to_string(), value.clone());
        if self.inner.config.auto_respond_config {
            self.queue_event(
                &mut state,
                TransportEvent::ConfigChange {
                    request_id,
                    status: true,
                },
            );
        }
        Ok(request_id)
    }

    fn now(&self) -> i64 {
        if self.inner.config.manual_clock {
            self.inner.manual_now.load(Ordering::SeqCst)
        } else {
            self.inner.epoch.elapsed().as_micros() as i64
        }
    }

    fn provide_image_buffer(
        &self,
        request: &ImageRequest,
        slot: SlotHandle,
        buffer: Vec<u8>,
    ) -> TransportResult<()> {
        let mut state = self.state();
        self.enter(
            &mut state,
            MockOperation::ProvideImageBuffer,
            MockCall::ProvideImageBuffer {
                token: request.token,
                slot,
                size: buffer.len(),
            },
        )?;

        let in_flight = InFlight {
            request: request.clone(),
            slot,
            buffer,
        };
        if self.inner.config.auto_complete_images {
            let completion = self.build_completion(&mut state, in_flight);
            self.queue_event(&mut state, TransportEvent::ImageComplete(completion));
        } else {
            state.in_flight.insert(request.token, in_flight);
        }
        Ok(())
    }

    fn discard_image(&self, request: &ImageRequest) -> TransportResult<()> {
        let mut state = self.state();
        self.enter(
            &mut state,
            MockOperation::DiscardImage,
            MockCall::DiscardImage {
                token: request.token,
            },
        )
    }

    fn connection_status(&self) -> TransportResult<ConnectionStatus> {
        let mut state = self.state();
        self.enter(
            &mut state,
            MockOperation::ConnectionStatus,
            MockCall::ConnectionStatus,
        )
        .map(|()| {
            if state.open {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::NotConnected
            }
        })
    }
}
