//! FileSink - appends notification records to a JSON-lines file

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use contracts::{ConnectionEvent, ContractError, Image, NotificationSink};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::record::EventRecord;

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output directory
    pub base_path: PathBuf,
    /// Record file name inside `base_path`
    pub file_name: String,
    /// Also dump raw pixels of completed images under `images/`
    pub save_images: bool,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./output"),
            file_name: "events.jsonl".to_string(),
            save_images: false,
        }
    }
}

impl FileSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            base_path: params
                .get("base_path")
                .map(PathBuf::from)
                .unwrap_or(defaults.base_path),
            file_name: params
                .get("file_name")
                .cloned()
                .unwrap_or(defaults.file_name),
            save_images: params
                .get("save_images")
                .is_some_and(|value| value.eq_ignore_ascii_case("true")),
        }
    }
}

/// One line of the record file
#[derive(Serialize)]
struct RecordLine<'a> {
    recorded_at: String,
    #[serde(flatten)]
    record: &'a EventRecord,
}

/// Sink that writes notification records to disk
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    writer: BufWriter<File>,
    images_dir: Option<PathBuf>,
    lines: u64,
}

impl FileSink {
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.base_path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(config.base_path.join(&config.file_name))?;

        let images_dir = if config.save_images {
            let dir = config.base_path.join("images");
            fs::create_dir_all(&dir)?;
            Some(dir)
        } else {
            None
        };

        Ok(Self {
            name: name.into(),
            config,
            writer: BufWriter::new(file),
            images_dir,
            lines: 0,
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(name, FileSinkConfig::from_params(params))
    }

    /// Path of the record file
    pub fn path(&self) -> PathBuf {
        self.config.base_path.join(&self.config.file_name)
    }

    fn append(&mut self, event: &ConnectionEvent) -> std::io::Result<()> {
        let record = EventRecord::from(event);
        let line = RecordLine {
            recorded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            record: &record,
        };
        serde_json::to_writer(&mut self.writer, &line)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(b"\n")?;
        self.lines += 1;

        if let (Some(dir), ConnectionEvent::ImageComplete(image)) = (&self.images_dir, event) {
            save_pixels(dir, image)?;
        }
        Ok(())
    }

    fn persist(&mut self, event: &ConnectionEvent) -> Result<(), ContractError> {
        self.append(event).map_err(|e| {
            error!(sink = %self.name, kind = event.kind(), error = %e, "write failed");
            ContractError::sink_write(&self.name, e.to_string())
        })
    }
}

fn save_pixels(dir: &Path, image: &Image) -> std::io::Result<()> {
    let file_name = format!(
        "{}_{}_{}.raw",
        image.frame_id,
        image.kind.as_str(),
        image.perspective.as_str()
    );
    fs::write(dir.join(file_name), image.pixels.as_slice())
}

impl NotificationSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        level = "trace",
        name = "file_sink_write",
        skip(self, event),
        fields(sink = %self.name, kind = event.kind())
    )]
    async fn write(&mut self, event: &ConnectionEvent) -> Result<(), ContractError> {
        self.persist(event)
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        self.writer
            .flush()
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.writer.flush()?;
        debug!(sink = %self.name, lines = self.lines, "FileSink closed");
        Ok(())
    }
}
