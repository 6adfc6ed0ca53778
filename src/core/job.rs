use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::counting::{Orientation, SessionConfig};

/// Detector weights to load. The identifier is passed through to the video backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelChoice {
    Nano,
    Medium,
    #[default]
    Large,
    /// Custom weights trained for the deployment.
    Custom,
}

impl ModelChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nano => "n",
            Self::Medium => "m",
            Self::Large => "l",
            Self::Custom => "p",
        }
    }

    pub fn weights_file(&self) -> &'static str {
        match self {
            Self::Nano => "yolov8n.pt",
            Self::Medium => "yolov8m.pt",
            Self::Large => "yolov8l.pt",
            Self::Custom => "best.pt",
        }
    }
}

impl FromStr for ModelChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "n" => Ok(Self::Nano),
            "m" => Ok(Self::Medium),
            "l" => Ok(Self::Large),
            "p" => Ok(Self::Custom),
            other => Err(anyhow::anyhow!("Invalid model choice: {}", other)),
        }
    }
}

impl TryFrom<String> for ModelChoice {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelChoice> for String {
    fn from(model: ModelChoice) -> Self {
        model.as_str().to_string()
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Line position ratio must be within [0, 1], got {0}")]
    RatioOutOfRange(f64),

    #[error("Target class list contains an empty name")]
    EmptyClassName,

    #[error("Job name must not be empty")]
    EmptyJobName,

    #[error("Job name must not contain path separators: {0}")]
    JobNameHasSeparator(String),
}

fn default_ratio() -> f64 {
    0.5
}

fn default_annotate() -> bool {
    true
}

/// Per-job counting options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub orientation: Orientation,
    #[serde(default = "default_ratio")]
    pub line_position_ratio: f64,
    #[serde(default)]
    pub model: ModelChoice,
    /// `None` counts every detected class.
    #[serde(default)]
    pub target_classes: Option<Vec<String>>,
    #[serde(default = "default_annotate")]
    pub annotate: bool,
    /// Remove the source from remote storage after a successful run.
    #[serde(default)]
    pub delete_remote_source: bool,
}

impl JobConfig {
    pub fn new(orientation: Orientation) -> Self {
        Self {
            orientation,
            line_position_ratio: default_ratio(),
            model: ModelChoice::default(),
            target_classes: None,
            annotate: default_annotate(),
            delete_remote_source: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.line_position_ratio) {
            return Err(ConfigError::RatioOutOfRange(self.line_position_ratio));
        }
        if let Some(classes) = &self.target_classes {
            if classes.iter().any(|c| c.trim().is_empty()) {
                return Err(ConfigError::EmptyClassName);
            }
        }
        Ok(())
    }

    pub fn session_config(&self, video: impl Into<String>) -> SessionConfig {
        SessionConfig {
            video: video.into(),
            orientation: self.orientation,
            line_position_ratio: self.line_position_ratio,
            target_classes: self
                .target_classes
                .as_ref()
                .map(|classes| classes.iter().cloned().collect::<HashSet<_>>()),
        }
    }
}

/// Where the worker finds the input video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum VideoRef {
    Local(PathBuf),
    /// Path relative to the remote storage root.
    Remote(String),
}

impl VideoRef {
    pub fn file_name(&self) -> String {
        let name = match self {
            Self::Local(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            Self::Remote(path) => Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
        };
        name.unwrap_or_else(|| "video".to_string())
    }
}

/// Unique job key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobName(String);

impl JobName {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyJobName);
        }
        // The name doubles as the output file name.
        if name.contains(['/', '\\']) {
            return Err(ConfigError::JobNameHasSeparator(name));
        }
        Ok(Self(name))
    }

    /// A collision-free name that keeps the extension of `file_name`.
    pub fn generate(file_name: &str) -> Self {
        let id = Uuid::new_v4();
        match Path::new(file_name).extension().and_then(|ext| ext.to_str()) {
            Some(ext) => Self(format!("{}.{}", id, ext)),
            None => Self(id.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: JobName,
    pub video: VideoRef,
    pub config: JobConfig,
}
