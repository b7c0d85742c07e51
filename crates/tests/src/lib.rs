//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 模拟传输 e2e 测试（真实轮询线程 + 手动时钟）
//! - 回放 → 分发 → 文件 sink 全链路

#[cfg(test)]
mod contract_tests {
    use contracts::{ConnectionConfig, PolicyFlag, PolicyMask};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_connection_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.frame_buffer_len, 60);
        assert_eq!(config.image_buffer_len, 80);
        assert_eq!(config.quad_buffer_len, 60);
        assert_eq!(config.pending_timeout_us, 100);
        assert_eq!(config.poll_timeout_ms, 1000);
        assert!(!config.grow_image_pool);
    }

    #[test]
    fn test_policy_mask_snapshot() {
        let mask = PolicyMask::EMPTY
            .with(PolicyFlag::Images)
            .with(PolicyFlag::TrackedQuads);
        let flags: Vec<&str> = mask.flags().map(PolicyFlag::as_str).collect();
        assert_eq!(flags, vec!["images", "tracked_quads"]);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, PoisonError};
    use std::thread;
    use std::time::{Duration, Instant};

    use connection::{
        write_capture, CaptureRecord, Connection, ConnectionRegistry, MockConfig, MockTransport,
        ReplayConfig, ReplayTransport,
    };
    use contracts::{
        ConnectionConfig, ConnectionEvent, ConnectionObserver, Frame, FrameId, Perspective,
        PolicyFlag, ReleaseReason, SinkConfig, SinkType, TrackingEvent, TransportEvent,
    };
    use dispatcher::{create_dispatcher, ChannelObserver};
    use tokio::sync::mpsc;

    /// Collects every notification on the poll thread
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ConnectionEvent>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<ConnectionEvent> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn count(&self, kind: &str) -> usize {
            self.events().iter().filter(|e| e.kind() == kind).count()
        }

        fn frames(&self) -> Vec<(Arc<Frame>, ReleaseReason)> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    ConnectionEvent::FrameReady { frame, reason } => Some((frame, reason)),
                    _ => None,
                })
                .collect()
        }

        fn calibration_changes(&self, perspective: Perspective) -> Vec<(Option<u64>, u64)> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    ConnectionEvent::CalibrationChanged {
                        perspective: p,
                        previous,
                        current,
                    } if p == perspective => Some((previous, current)),
                    _ => None,
                })
                .collect()
        }
    }

    impl ConnectionObserver for Recorder {
        fn name(&self) -> &str {
            "e2e-recorder"
        }

        fn on_event(&self, event: &ConnectionEvent) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
        }
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
            hand_count: 1,
            payload: bytes::Bytes::from_static(b"hands"),
        })
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            poll_timeout_ms: 5,
            distortion_grid: 1,
            ..ConnectionConfig::default()
        }
    }

    /// Start a connection over a scripted mock with `policies` acknowledged
    fn connect(
        mock: &MockTransport,
        policies: &[PolicyFlag],
    ) -> (Connection<MockTransport>, Arc<Recorder>) {
        let connection = Connection::new(mock.clone(), config());
        let recorder = Arc::new(Recorder::default());
        connection.subscribe(recorder.clone());
        connection.start().unwrap();
        for &flag in policies {
            connection.set_policy(flag).unwrap();
            wait_until(|| connection.is_policy_set(flag));
        }
        (connection, recorder)
    }

    /// Processed stereo images only: both images inside the timeout release
    /// the frame once, complete.
    #[test]
    fn test_stereo_frame_released_complete() {
        let mock = MockTransport::scripted();
        let (connection, recorder) = connect(&mock, &[PolicyFlag::Images]);

        mock.emit_frame(100);
        wait_until(|| !recorder.frames().is_empty());

        let frames = recorder.frames();
        assert_eq!(frames.len(), 1);
        let (frame, reason) = &frames[0];
        assert_eq!(frame.id, 100);
        assert_eq!(*reason, ReleaseReason::Complete);
        assert_eq!(frame.images.len(), 2);
        assert_eq!(connection.images_for_frame(100).len(), 2);

        // Time passing after release never fires the timeout path
        mock.advance(config().pending_timeout_us * 10);
        mock.push(tracking(101, connection.now()));
        wait_until(|| connection.reconciler_stats().enqueued == 2);
        assert_eq!(connection.reconciler_stats().released_timed_out, 0);
        assert_eq!(
            recorder
                .frames()
                .iter()
                .filter(|(frame, _)| frame.id == 100)
                .count(),
            1
        );

        connection.stop();
        connection.join();
    }

    /// Planar surface enabled but never delivered: the frame is released by
    /// the timeout with no surface attached.
    #[test]
    fn test_missing_quad_times_out() {
        let mock = MockTransport::scripted();
        let (connection, recorder) = connect(&mock, &[PolicyFlag::TrackedQuads]);

        mock.push(tracking(200, 0));
        wait_until(|| connection.pending_len() == 1);
        assert!(recorder.frames().is_empty());

        mock.advance(config().pending_timeout_us + 1);
        wait_until(|| !recorder.frames().is_empty());

        let frames = recorder.frames();
        assert_eq!(frames.len(), 1);
        let (frame, reason) = &frames[0];
        assert_eq!(frame.id, 200);
        assert_eq!(*reason, ReleaseReason::TimedOut);
        assert!(frame.tracked_quad.is_none());
        assert!(!frame.has_valid_quad());

        connection.stop();
        connection.join();
    }

    /// A calibration version change is announced once per perspective and
    /// version.
    #[test]
    fn test_calibration_change_announced_once() {
        let mock = MockTransport::scripted();
        let (connection, recorder) = connect(&mock, &[PolicyFlag::Images]);

        mock.emit_frame(1);
        wait_until(|| recorder.frames().len() == 1);
        assert_eq!(
            recorder.calibration_changes(Perspective::Left),
            vec![(None, 1)]
        );

        mock.set_calibration_version(2);
        mock.emit_frame(2);
        mock.emit_frame(3);
        wait_until(|| recorder.frames().len() == 3);
        assert_eq!(
            recorder.calibration_changes(Perspective::Left),
            vec![(None, 1), (Some(1), 2)]
        );

        mock.set_calibration_version(3);
        mock.emit_frame(4);
        wait_until(|| recorder.frames().len() == 4);
        assert_eq!(
            recorder.calibration_changes(Perspective::Left),
            vec![(None, 1), (Some(1), 2), (Some(2), 3)]
        );
        assert_eq!(
            connection.current_calibration(Perspective::Left),
            Some(3)
        );
        // Coefficients stay retrievable per version
        assert!(connection.distortion(1).is_some());
        assert!(connection.distortion(3).is_some());

        connection.stop();
        connection.join();
    }

    /// An image for a frame released by the timeout is still delivered as an
    /// image but does not release the frame again.
    #[test]
    fn test_late_image_dropped_from_frame() {
        let mock = MockTransport::new(MockConfig {
            auto_complete_images: false,
            ..MockConfig::scripted()
        });
        let (connection, recorder) = connect(&mock, &[PolicyFlag::Images]);

        mock.emit_frame(7);
        wait_until(|| mock.in_flight() == 2);
        mock.advance(config().pending_timeout_us + 1);
        wait_until(|| recorder.frames().len() == 1);
        assert_eq!(recorder.frames()[0].1, ReleaseReason::TimedOut);
        assert!(recorder.frames()[0].0.images.is_empty());

        // Left processed image for frame 7
        assert!(mock.complete_image(7 << 2));
        wait_until(|| recorder.count("image_complete") == 1);
        assert_eq!(recorder.frames().len(), 1);
        assert_eq!(connection.reconciler_stats().late_images, 1);

        connection.stop();
        connection.join();
    }

    /// Registry hands out one connection per key
    #[test]
    fn test_registry_sessions() {
        let registry = ConnectionRegistry::new(|_key, _config: &ConnectionConfig| {
            Ok(MockTransport::scripted())
        });

        let first = registry.get_or_create(1, config()).unwrap();
        let again = registry.get_or_create(1, config()).unwrap();
        let second = registry.get_or_create(2, config()).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.keys(), vec![1, 2]);

        first.start().unwrap();
        second.start().unwrap();
        registry.stop_all();
        assert!(!first.is_running());
        assert!(!second.is_running());
    }

    /// A parsed session drives the connection buffers and policies
    #[test]
    fn test_session_config_drives_connection() {
        let session = config_loader::ConfigLoader::load_from_str(
            r#"
policies = ["images", "raw_images"]

[connection]
pending_timeout_us = 250
image_buffer_len = 8
poll_timeout_ms = 5
distortion_grid = 1

[transport]
kind = "mock"
"#,
            config_loader::ConfigFormat::Toml,
        )
        .unwrap();

        let mock = MockTransport::scripted();
        let connection = Connection::new(mock.clone(), session.connection.clone());
        let recorder = Arc::new(Recorder::default());
        connection.subscribe(recorder.clone());
        connection.start().unwrap();
        for &flag in &session.policies {
            connection.set_policy(flag).unwrap();
        }
        wait_until(|| connection.is_policy_set(PolicyFlag::RawImages));

        mock.emit_frame(1);
        wait_until(|| !recorder.frames().is_empty());
        let frames = recorder.frames();
        assert_eq!(frames[0].1, ReleaseReason::Complete);
        // Processed and raw, both perspectives
        assert_eq!(frames[0].0.images.len(), 4);
        assert_eq!(connection.pool_stats().map(|s| s.capacity), Some(8));

        connection.stop();
        connection.join();
    }

    /// Capture file -> replay transport -> connection -> dispatcher -> file sink
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replay_into_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("capture.jsonl");
        let records: Vec<CaptureRecord> = (1..=3)
            .map(|id| CaptureRecord {
                at_us: id * 500,
                event: tracking(id, id * 500),
            })
            .collect();
        write_capture(&capture, &records).unwrap();

        let out_dir = dir.path().join("out");
        let mut params = HashMap::new();
        params.insert(
            "base_path".to_string(),
            out_dir.display().to_string(),
        );
        let sinks = vec![SinkConfig {
            name: "records".to_string(),
            sink_type: SinkType::File,
            queue_capacity: 64,
            params,
        }];

        let (dispatch_tx, dispatch_rx) = mpsc::channel(64);
        let dispatcher = create_dispatcher(sinks, dispatch_rx).unwrap();
        let dispatcher_handle = dispatcher.spawn();

        let replay = ReplayTransport::load(ReplayConfig::new(&capture)).unwrap();
        assert_eq!(replay.len(), 3);
        let connection = Arc::new(Connection::new(replay, config()));
        let (observer, mut events) = ChannelObserver::new("e2e", 64);
        connection.subscribe(Arc::new(observer));
        connection.start().unwrap();

        let mut released = 0;
        let forward = async {
            while let Some(event) = events.recv().await {
                if matches!(event, ConnectionEvent::FrameReady { .. }) {
                    released += 1;
                }
                dispatch_tx.send(event).await.unwrap();
                if released == 3 {
                    break;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), forward)
            .await
            .unwrap();
        assert!(connection.transport().finished());

        connection.stop();
        let joiner = Arc::clone(&connection);
        tokio::task::spawn_blocking(move || joiner.join())
            .await
            .unwrap();
        drop(dispatch_tx);

        let metrics = tokio::time::timeout(Duration::from_secs(5), dispatcher_handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].0, "records");

        let written = std::fs::read_to_string(out_dir.join("events.jsonl")).unwrap();
        let kinds: Vec<String> = written
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["kind"].as_str().unwrap_or_default().to_string()
            })
            .collect();
        assert_eq!(kinds.iter().filter(|k| *k == "frame_ready").count(), 3);
        assert_eq!(kinds.first().map(String::as_str), Some("init"));
    }
}
