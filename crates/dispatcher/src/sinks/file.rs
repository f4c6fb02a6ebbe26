//! FileSink - writes merged point clouds to disk
//!
//! Layout under the configured directory:
//! - `{frame:06}.bin`: little-endian f32 samples, 4 per point
//! - `{frame:06}.json`: [`FrameMetadata`] sidecar

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use contracts::{CompletedFrame, ContractError, FrameId, FrameSink, VehicleId};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

/// Param key for the output directory
const PATH_PARAM: &str = "path";

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output directory
    pub base_path: PathBuf,
}

impl FileSinkConfig {
    pub fn from_params(params: &HashMap<String, String>) -> std::io::Result<Self> {
        let base_path = params.get(PATH_PARAM).map(PathBuf::from).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("missing '{PATH_PARAM}' parameter"),
            )
        })?;
        Ok(Self { base_path })
    }
}

/// Sidecar written next to each `.bin`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub frame_id: FrameId,
    pub vehicles: Vec<VehicleId>,
    pub point_count: usize,
    pub latency_ms: Option<f64>,
    /// RFC 3339
    pub written_at: String,
}

/// Sink that writes frames to disk files
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    frames_written: u64,
}

impl FileSink {
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.base_path)?;
        Ok(Self {
            name: name.into(),
            config,
            frames_written: 0,
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(name, FileSinkConfig::from_params(params)?)
    }

    pub fn points_path(&self, frame_id: FrameId) -> PathBuf {
        self.config.base_path.join(format!("{frame_id:06}.bin"))
    }

    pub fn metadata_path(&self, frame_id: FrameId) -> PathBuf {
        self.config.base_path.join(format!("{frame_id:06}.json"))
    }

    fn write_frame_to_disk(&self, frame: &CompletedFrame) -> std::io::Result<()> {
        write_points(&self.points_path(frame.frame_id), &frame.points)?;

        let metadata = FrameMetadata {
            frame_id: frame.frame_id,
            vehicles: frame.vehicles.clone(),
            point_count: frame.point_count(),
            latency_ms: frame.latency_ms,
            written_at: chrono::Utc::now().to_rfc3339(),
        };
        let file = File::create(self.metadata_path(frame.frame_id))?;
        serde_json::to_writer_pretty(file, &metadata)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    fn persist_frame(&mut self, frame: &CompletedFrame) -> Result<(), ContractError> {
        self.write_frame_to_disk(frame).map_err(|e| {
            error!(sink = %self.name, frame_id = frame.frame_id, error = %e, "Write failed");
            ContractError::sink_write(&self.name, e.to_string())
        })?;
        self.frames_written += 1;
        Ok(())
    }
}

fn write_points(path: &Path, points: &[f32]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for value in points {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()
}

impl FrameSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, frame),
        fields(sink = %self.name, frame_id = frame.frame_id)
    )]
    async fn write(&mut self, frame: &CompletedFrame) -> Result<(), ContractError> {
        self.persist_frame(frame)
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        debug!(sink = %self.name, frames = self.frames_written, "FileSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::test_frame;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_sink_writes_points_and_sidecar() {
        let dir = tempdir().unwrap();
        let config = FileSinkConfig {
            base_path: dir.path().join("frames"),
        };
        let mut sink = FileSink::new("test_file", config).unwrap();

        sink.write(&test_frame(7)).await.unwrap();
        sink.flush().await.unwrap();

        let bin = fs::read(dir.path().join("frames/000007.bin")).unwrap();
        assert_eq!(bin.len(), 8 * 4);
        assert_eq!(&bin[..4], &1.0f32.to_le_bytes());

        let json = fs::read_to_string(dir.path().join("frames/000007.json")).unwrap();
        let metadata: FrameMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(metadata.frame_id, 7);
        assert_eq!(metadata.vehicles, vec![1, 2]);
        assert_eq!(metadata.point_count, 2);
        assert_eq!(metadata.latency_ms, Some(42.0));
    }

    #[test]
    fn test_from_params_requires_path() {
        assert!(FileSink::from_params("f", &HashMap::new()).is_err());

        let dir = tempdir().unwrap();
        let params = HashMap::from([(
            "path".to_string(),
            dir.path().to_string_lossy().into_owned(),
        )]);
        let sink = FileSink::from_params("f", &params).unwrap();
        assert_eq!(sink.points_path(3), dir.path().join("000003.bin"));
    }
}
