// config.rs — Compilation settings
//
// Values that describe the target environment of a compilation unit.
// They feed the native-module prepare context and bound the rewrite driver.

use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_MAX_REWRITES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileSettings {
    /// Base sample rate in Hz (upsample factor 1).
    pub sample_rate: u32,
    pub input_channel_count: u32,
    pub output_channel_count: u32,
    /// Upper bound on rewrites per optimization run.
    pub max_rewrites: usize,
}

impl Default for CompileSettings {
    fn default() -> Self {
        CompileSettings {
            sample_rate: DEFAULT_SAMPLE_RATE,
            input_channel_count: 2,
            output_channel_count: 2,
            max_rewrites: DEFAULT_MAX_REWRITES,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("sample rate must be positive")]
    ZeroSampleRate,
}

impl CompileSettings {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let settings = Self::from_json(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        Ok(())
    }
}
