//! Replay transport - plays back a recorded capture
//!
//! A capture is a JSONL file, one [`CaptureRecord`] per line: the transport
//! clock at which the event was recorded plus the event itself. Playback
//! keeps the original pacing scaled by `speed`. Image buffers handed over by
//! the connection are filled from the recorded pixels.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use contracts::{
    ConfigValue, ConnectionStatus, FrameId, ImageRequest, PollOutcome, PolicyMask, SlotHandle,
    Transport, TransportConfig, TransportEvent, TransportResult, TransportStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::{ConnectionError, Result};

/// One line of a capture file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// Transport clock when recorded (microseconds)
    pub at_us: i64,
    pub event: TransportEvent,
}

/// Replay configuration
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub path: PathBuf,
    /// Playback speed multiplier (1.0 = recorded pace)
    pub speed: f64,
    /// Start over at the end of the capture
    pub loop_playback: bool,
}

impl ReplayConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            speed: 1.0,
            loop_playback: false,
        }
    }

    /// `None` when the transport section names no capture file
    pub fn from_transport(config: &TransportConfig) -> Option<Self> {
        config.replay_path.as_ref().map(|path| Self {
            path: path.clone(),
            speed: config.replay_speed,
            loop_playback: config.replay_loop,
        })
    }
}

#[derive(Debug)]
struct ReplayState {
    open: bool,
    cursor: usize,
    /// Wall clock of the current pass start
    started: Option<Instant>,
    /// Added to recorded frame ids; grows on every loop
    frame_offset: FrameId,
    /// Added to recorded timestamps; grows on every loop
    time_offset: i64,
    passes: u64,
    /// Buffers handed over, keyed by image token
    buffers: HashMap<u64, (SlotHandle, Vec<u8>)>,
    /// Synthetic answers delivered before the next recorded event
    replies: VecDeque<TransportEvent>,
    next_request_id: u32,
}

/// Transport that replays a capture file
#[derive(Debug)]
pub struct ReplayTransport {
    records: Vec<CaptureRecord>,
    config: ReplayConfig,
    first_at: i64,
    span_us: i64,
    frame_span: FrameId,
    state: Mutex<ReplayState>,
}

impl ReplayTransport {
    /// Load and time-sort a capture
    pub fn load(config: ReplayConfig) -> Result<Self> {
        let file = File::open(&config.path)
            .map_err(|e| ConnectionError::replay(&config.path, e.to_string()))?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| ConnectionError::replay(&config.path, e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: CaptureRecord = serde_json::from_str(&line).map_err(|e| {
                ConnectionError::replay(&config.path, format!("line {}: {e}", number + 1))
            })?;
            records.push(record);
        }

        info!(
            path = %config.path.display(),
            records = records.len(),
            "loaded capture"
        );
        Ok(Self::from_records(records, config))
    }

    /// Build from in-memory records (sorted by `at_us`, stable)
    pub fn from_records(mut records: Vec<CaptureRecord>, config: ReplayConfig) -> Self {
        records.sort_by_key(|record| record.at_us);

        let first_at = records.first().map_or(0, |r| r.at_us);
        let last_at = records.last().map_or(0, |r| r.at_us);
        let (min_id, max_id) = records
            .iter()
            .filter_map(|r| event_frame_id(&r.event))
            .fold((FrameId::MAX, FrameId::MIN), |(lo, hi), id| {
                (lo.min(id), hi.max(id))
            });
        let frame_span = if min_id <= max_id {
            max_id - min_id + 1
        } else {
            0
        };

        Self {
            records,
            first_at,
            span_us: last_at - first_at + 1,
            frame_span,
            config,
            state: Mutex::new(ReplayState {
                open: false,
                cursor: 0,
                started: None,
                frame_offset: 0,
                time_offset: 0,
                passes: 0,
                buffers: HashMap::new(),
                replies: VecDeque::new(),
                next_request_id: 1,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn speed(&self) -> f64 {
        self.config.speed.max(0.01)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every record was delivered and looping is off
    pub fn finished(&self) -> bool {
        let state = self.state();
        !self.config.loop_playback && state.cursor >= self.records.len()
    }

    /// Completed passes over the capture
    pub fn passes(&self) -> u64 {
        self.state().passes
    }

    /// Wall-clock offset of `record` from the pass start
    fn due(&self, record: &CaptureRecord) -> Duration {
        let offset_us = (record.at_us - self.first_at).max(0) as f64 / self.speed();
        Duration::from_micros(offset_us as u64)
    }

    /// Shift a recorded event into the current pass; `None` for completions
    /// nobody provided a buffer for.
    fn prepare(&self, state: &mut ReplayState, event: &TransportEvent) -> Option<TransportEvent> {
        let mut event = event.clone();
        shift_event(&mut event, state.frame_offset, state.time_offset);

        if let TransportEvent::ImageComplete(completion) = &mut event {
            let Some((slot, mut buffer)) = state.buffers.remove(&completion.token) else {
                trace!(token = completion.token, "skipping unclaimed image");
                return None;
            };
            buffer.clear();
            buffer.extend_from_slice(&completion.pixels);
            completion.slot = slot;
            completion.pixels = buffer;
        }
        Some(event)
    }

    fn rewind(&self, state: &mut ReplayState) {
        state.passes += 1;
        state.cursor = 0;
        state.started = Some(Instant::now());
        state.frame_offset += self.frame_span;
        state.time_offset += self.span_us;
        debug!(passes = state.passes, "looping capture");
    }
}

impl Transport for ReplayTransport {
    fn open(&self) -> TransportResult<()> {
        let mut state = self.state();
        state.open = true;
        if state.started.is_none() {
            state.started = Some(Instant::now());
        }
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state();
        state.open = false;
        state.buffers.clear();
    }

    fn poll(&self, timeout: Duration) -> PollOutcome {
        loop {
            let mut state = self.state();
            if !state.open {
                return PollOutcome::Disconnected;
            }
            if let Some(reply) = state.replies.pop_front() {
                return PollOutcome::Event(reply);
            }

            if state.cursor >= self.records.len() {
                if self.config.loop_playback && !self.records.is_empty() {
                    self.rewind(&mut state);
                    continue;
                }
                drop(state);
                thread::sleep(timeout);
                return PollOutcome::Timeout;
            }

            let started = *state.started.get_or_insert_with(Instant::now);
            let record = &self.records[state.cursor];
            let due = self.due(record);
            let elapsed = started.elapsed();

            if due > elapsed {
                let wait = due - elapsed;
                if wait > timeout {
                    drop(state);
                    thread::sleep(timeout);
                    return PollOutcome::Timeout;
                }
                drop(state);
                thread::sleep(wait);
                continue;
            }

            state.cursor += 1;
            if let Some(event) = self.prepare(&mut state, &record.event) {
                return PollOutcome::Event(event);
            }
        }
    }

    fn set_policy_flags(&self, set: PolicyMask, clear: PolicyMask) -> TransportResult<()> {
        let current = PolicyMask(set.bits() & !clear.bits());
        self.state()
            .replies
            .push_back(TransportEvent::PolicyChange { current });
        Ok(())
    }

    fn request_config_value(&self, key: &str) -> TransportResult<u32> {
        let mut state = self.state();
        let request_id = state.next_request_id;
        state.next_request_id += 1;
        debug!(key, request_id, "config value unavailable during replay");
        state.replies.push_back(TransportEvent::ConfigResponse {
            request_id,
            value: ConfigValue::Unknown,
        });
        Ok(request_id)
    }

    fn save_config_value(&self, key: &str, _value: &ConfigValue) -> TransportResult<u32> {
        let mut state = self.state();
        let request_id = state.next_request_id;
        state.next_request_id += 1;
        debug!(key, request_id, "config write ignored during replay");
        state.replies.push_back(TransportEvent::ConfigChange {
            request_id,
            status: false,
        });
        Ok(request_id)
    }

    /// Capture clock: recorded time of the pass start plus scaled wall time
    fn now(&self) -> i64 {
        let state = self.state();
        let elapsed = state
            .started
            .map_or(Duration::ZERO, |started| started.elapsed());
        self.first_at + state.time_offset + (elapsed.as_micros() as f64 * self.speed()) as i64
    }

    fn provide_image_buffer(
        &self,
        request: &ImageRequest,
        slot: SlotHandle,
        buffer: Vec<u8>,
    ) -> TransportResult<()> {
        let mut state = self.state();
        if !state.open {
            return Err(TransportStatus::NotConnected);
        }
        state.buffers.insert(request.token, (slot, buffer));
        Ok(())
    }

    fn discard_image(&self, request: &ImageRequest) -> TransportResult<()> {
        self.state().buffers.remove(&request.token);
        Ok(())
    }

    fn connection_status(&self) -> TransportResult<ConnectionStatus> {
        let state = self.state();
        Ok(if state.open {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::NotConnected
        })
    }
}

/// Frame id an event belongs to, if any
fn event_frame_id(event: &TransportEvent) -> Option<FrameId> {
    match event {
        TransportEvent::Tracking(tracking) => Some(tracking.frame_id),
        TransportEvent::ImageRequest(request) => Some(request.frame_id),
        TransportEvent::ImageComplete(completion) => Some(completion.frame_id),
        TransportEvent::TrackedQuad(quad) => Some(quad.frame_id),
        _ => None,
    }
}

fn shift_event(event: &mut TransportEvent, frames: FrameId, micros: i64) {
    if frames == 0 && micros == 0 {
        return;
    }
    match event {
        TransportEvent::Tracking(tracking) => {
            tracking.frame_id += frames;
            tracking.timestamp += micros;
        }
        TransportEvent::ImageRequest(request) => {
            request.frame_id += frames;
        }
        TransportEvent::ImageComplete(completion) => {
            completion.frame_id += frames;
            completion.timestamp += micros;
        }
        TransportEvent::TrackedQuad(quad) => {
            quad.frame_id += frames;
            quad.timestamp += micros;
        }
        _ => {}
    }
}

/// Write records as a capture file
pub fn write_capture(path: &Path, records: &[CaptureRecord]) -> Result<()> {
    let mut file =
        File::create(path).map_err(|e| ConnectionError::replay(path, e.to_string()))?;
    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| ConnectionError::replay(path, e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| ConnectionError::replay(path, e.to_string()))?;
    }
    if records.is_empty() {
        warn!(path = %path.display(), "wrote empty capture");
    }
    Ok(())
}
