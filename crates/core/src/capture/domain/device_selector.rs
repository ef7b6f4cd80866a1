use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Which video source a stream session should try to acquire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceSelector {
    /// The platform default camera.
    Default,
    /// A device path, file path or network URL (e.g. `rtsp://...`).
    Device(String),
    /// A directory of still images replayed in a loop.
    ImageDirectory(PathBuf),
    /// Explicit request for the synthetic fallback generator.
    Synthetic,
}

impl DeviceSelector {
    /// Stable label for logs and the consumer read model.
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Default => write!(f, "default"),
            DeviceSelector::Device(d) => write!(f, "{d}"),
            DeviceSelector::ImageDirectory(p) => write!(f, "dir:{}", p.display()),
            DeviceSelector::Synthetic => write!(f, "synthetic"),
        }
    }
}

impl FromStr for DeviceSelector {
    type Err = String;

    /// `default`, `synthetic`/`mock`, `dir:<path>`; anything else is a
    /// device path or URL.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("device selector must not be empty".to_string());
        }
        Ok(match s.to_ascii_lowercase().as_str() {
            "default" => DeviceSelector::Default,
            "synthetic" | "mock" => DeviceSelector::Synthetic,
            _ => match s.strip_prefix("dir:") {
                Some("") => return Err("dir: selector needs a path".to_string()),
                Some(path) => DeviceSelector::ImageDirectory(PathBuf::from(path)),
                None => DeviceSelector::Device(s.to_string()),
            },
        })
    }
}
