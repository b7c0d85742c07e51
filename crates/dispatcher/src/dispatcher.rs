//! Dispatcher - async fan-out of connection notifications to sinks

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use contracts::{ConnectionEvent, SinkConfig, SinkType};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::sinks::{FileSink, LogSink};

/// Dispatcher configuration
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    pub sinks: Vec<SinkConfig>,
}

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    input_rx: mpsc::Receiver<ConnectionEvent>,
}

impl DispatcherBuilder {
    pub fn new(config: DispatcherConfig, input_rx: mpsc::Receiver<ConnectionEvent>) -> Self {
        Self { config, input_rx }
    }

    /// Create every configured sink and its worker
    #[instrument(
        name = "dispatcher_builder_build",
        skip(self),
        fields(sink_count = self.config.sinks.len())
    )]
    pub fn build(self) -> Result<Dispatcher, DispatcherError> {
        let mut names = HashSet::new();
        if let Some(dup) = self.config.sinks.iter().find(|s| !names.insert(s.name.as_str())) {
            return Err(DispatcherError::DuplicateSink(dup.name.clone()));
        }

        let handles = self
            .config
            .sinks
            .iter()
            .map(create_sink_handle)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Dispatcher {
            handles,
            input_rx: self.input_rx,
        })
    }
}

/// Create a SinkHandle from configuration
#[instrument(
    name = "dispatcher_create_sink_handle",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
fn create_sink_handle(config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
    match config.sink_type {
        SinkType::Log => {
            let sink = LogSink::from_params(&config.name, &config.params);
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
        SinkType::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| {
                    DispatcherError::sink_creation(&config.name, config.sink_type, e.to_string())
                })?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
    }
}

/// Fans notifications out to every sink handle
pub struct Dispatcher {
    handles: Vec<SinkHandle>,
    input_rx: mpsc::Receiver<ConnectionEvent>,
}

impl Dispatcher {
    /// Create a dispatcher with custom sink handles (for testing)
    pub fn with_handles(
        handles: Vec<SinkHandle>,
        input_rx: mpsc::Receiver<ConnectionEvent>,
    ) -> Self {
        Self { handles, input_rx }
    }

    /// Metrics of every sink
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Consume notifications until the input channel closes, then drain and
    /// shut down every sink. Returns the final sink metrics.
    #[instrument(name = "dispatcher_run", skip(self))]
    pub async fn run(mut self) -> Vec<(String, MetricsSnapshot)> {
        info!(sinks = self.handles.len(), "dispatcher started");

        let mut count: u64 = 0;
        while let Some(event) = self.input_rx.recv().await {
            count += 1;
            for handle in &self.handles {
                handle.try_send(event.clone());
            }

            if count.is_multiple_of(500) {
                debug!(notifications = count, "dispatcher progress");
            }
        }

        info!(notifications = count, "dispatcher input closed, shutting down");

        let mut summary = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            let name = handle.name().to_string();
            let metrics = Arc::clone(handle.metrics());
            handle.shutdown().await;
            summary.push((name, metrics.snapshot()));
        }

        info!("dispatcher shutdown complete");
        summary
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self) -> JoinHandle<Vec<(String, MetricsSnapshot)>> {
        tokio::spawn(self.run())
    }
}

/// Create a dispatcher from sink configs
#[instrument(name = "dispatcher_create", skip(sink_configs, input_rx))]
pub fn create_dispatcher(
    sink_configs: Vec<SinkConfig>,
    input_rx: mpsc::Receiver<ConnectionEvent>,
) -> Result<Dispatcher, DispatcherError> {
    let config = DispatcherConfig {
        sinks: sink_configs,
    };
    DispatcherBuilder::new(config, input_rx).build()
}
