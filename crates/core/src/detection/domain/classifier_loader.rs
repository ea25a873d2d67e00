use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::detection::domain::cascade_classifier::CascadeClassifier;

/// The four classifier slots of the ensemble.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CascadeModel {
    /// Primary frontal model; the only one the fast pass uses.
    FrontalDefault,
    FrontalAlt,
    FrontalAlt2,
    Profile,
}

impl CascadeModel {
    pub const ALL: [CascadeModel; 4] = [
        CascadeModel::FrontalDefault,
        CascadeModel::FrontalAlt,
        CascadeModel::FrontalAlt2,
        CascadeModel::Profile,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CascadeModel::FrontalDefault => "frontal-default",
            CascadeModel::FrontalAlt => "frontal-alt",
            CascadeModel::FrontalAlt2 => "frontal-alt2",
            CascadeModel::Profile => "profile",
        }
    }
}

impl fmt::Display for CascadeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("{model} model not found at {path}")]
    Missing { model: CascadeModel, path: PathBuf },
    #[error("failed to parse {model} model from {path}: {message}")]
    Corrupt {
        model: CascadeModel,
        path: PathBuf,
        message: String,
    },
    #[error("{backend} backend has no {model} model")]
    Unsupported {
        backend: &'static str,
        model: CascadeModel,
    },
    #[error("failed to resolve {model} model: {message}")]
    Resolve {
        model: CascadeModel,
        message: String,
    },
}

/// Model store: turns a slot into a ready classifier.
pub trait ClassifierLoader {
    fn backend_name(&self) -> &'static str;

    fn load(&self, model: CascadeModel) -> Result<Box<dyn CascadeClassifier>, LoadError>;
}
