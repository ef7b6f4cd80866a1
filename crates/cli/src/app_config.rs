use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use facewatch_core::capture::domain::device_selector::DeviceSelector;
use facewatch_core::session::session_config::{ManagerConfig, TrackingConfig};

/// One stream entry in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub id: String,
    /// `default`, `synthetic`, `dir:<path>`, a device path or a URL.
    pub source: String,
    /// Replaces the top-level tracking block for this stream only.
    #[serde(default)]
    pub tracking: Option<TrackingConfig>,
}

/// Everything the binary needs to build a session manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub streams: Vec<StreamConfig>,
    pub tracking: TrackingConfig,
    pub manager: ManagerConfig,
}

/// A stream ready to be registered with the manager.
#[derive(Debug, Clone)]
pub struct ResolvedStream {
    pub id: String,
    pub selector: DeviceSelector,
    pub tracking: TrackingConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("Cannot read config {}: {e}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&text)
            .map_err(|e| format!("Invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Adds a `--source` argument: `id=selector` or a bare selector,
    /// which gets a generated `stream-N` id.
    pub fn add_source_arg(&mut self, arg: &str) -> Result<(), String> {
        let (id, source) = match arg.split_once('=') {
            Some((id, source)) if is_stream_id(id) => (id.to_string(), source.to_string()),
            _ => (format!("stream-{}", self.streams.len() + 1), arg.to_string()),
        };
        if source.trim().is_empty() {
            return Err(format!("Source for stream '{id}' is empty"));
        }
        self.streams.push(StreamConfig {
            id,
            source,
            tracking: None,
        });
        Ok(())
    }

    /// Parses every selector and applies per-stream tracking overrides.
    /// With no streams configured, a single `default` camera stream is used.
    pub fn resolve_streams(&self) -> Result<Vec<ResolvedStream>, String> {
        if self.streams.is_empty() {
            return Ok(vec![ResolvedStream {
                id: "default".to_string(),
                selector: DeviceSelector::Default,
                tracking: self.tracking.clone(),
            }]);
        }
        self.streams
            .iter()
            .map(|stream| {
                let selector = stream
                    .source
                    .parse::<DeviceSelector>()
                    .map_err(|e| format!("Stream '{}': {e}", stream.id))?;
                Ok(ResolvedStream {
                    id: stream.id.clone(),
                    selector,
                    tracking: stream
                        .tracking
                        .clone()
                        .unwrap_or_else(|| self.tracking.clone()),
                })
            })
            .collect()
    }
}

/// Ids are plain identifiers so `rtsp://host/path?a=b` is never split.
fn is_stream_id(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
