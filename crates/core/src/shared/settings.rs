use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::domain::cadence::CadenceError;
use crate::detection::domain::tuning::{EnsembleTuning, TuningError};
use crate::shared::constants::DEFAULT_ACCURATE_INTERVAL;
use crate::shared::face_box::DEFAULT_OVERLAP_THRESHOLD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    Seeta,
    Haar,
}

impl ClassifierBackend {
    pub const ALL: &[ClassifierBackend] = &[ClassifierBackend::Seeta, ClassifierBackend::Haar];

    /// Haar when OpenCV is compiled in, since only it fills all four
    /// ensemble slots. Otherwise the SeetaFace primary on its own.
    pub fn preferred() -> Self {
        if cfg!(feature = "opencv") {
            ClassifierBackend::Haar
        } else {
            ClassifierBackend::Seeta
        }
    }
}

impl std::fmt::Display for ClassifierBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifierBackend::Seeta => write!(f, "seeta"),
            ClassifierBackend::Haar => write!(f, "haar"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid setting: {0}")]
    Invalid(String),
    #[error("invalid setting: {0}")]
    Cadence(#[from] CadenceError),
    #[error("invalid tuning for {0}")]
    Tuning(#[from] TuningError),
}

/// Static ensemble configuration. Missing fields in a settings file take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub backend: ClassifierBackend,
    /// Every Nth stream frame gets the accurate pass.
    pub cadence_interval: u64,
    pub overlap_threshold: f64,
    pub tuning: EnsembleTuning,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::preferred(),
            cadence_interval: DEFAULT_ACCURATE_INTERVAL,
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
            tuning: EnsembleTuning::default(),
        }
    }
}

impl DetectionSettings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("FaceCascade").join("settings.json"))
    }

    /// Settings from the user config file, or defaults when there is none.
    pub fn load() -> Result<Self, SettingsError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path).map_err(|e| SettingsError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings: Self = serde_json::from_str(&json).map_err(|e| SettingsError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let write_err = |e| SettingsError::Write {
            path: path.to_path_buf(),
            source: e,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;
        fs::write(path, json).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.cadence_interval < 1 {
            return Err(CadenceError::ZeroInterval.into());
        }
        if !(0.0..=1.0).contains(&self.overlap_threshold) {
            return Err(SettingsError::Invalid(format!(
                "overlap_threshold must be within [0, 1], got {}",
                self.overlap_threshold
            )));
        }
        Ok(self.tuning.validate()?)
    }
}
