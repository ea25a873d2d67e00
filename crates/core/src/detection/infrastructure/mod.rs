pub mod model_resolver;
#[cfg(feature = "opencv")]
pub mod haar_cascade_classifier;
pub mod seeta_cascade_classifier;

use crate::detection::domain::classifier_loader::ClassifierLoader;
use crate::detection::infrastructure::model_resolver::ModelStore;
use crate::shared::settings::ClassifierBackend;

#[derive(thiserror::Error, Debug)]
#[error("{0} backend is not compiled in (rebuild with --features opencv)")]
pub struct BackendUnavailable(pub ClassifierBackend);

/// Builds the model loader for the configured backend.
pub fn create_loader(
    backend: ClassifierBackend,
    store: ModelStore,
) -> Result<Box<dyn ClassifierLoader>, BackendUnavailable> {
    match backend {
        ClassifierBackend::Seeta => Ok(Box::new(
            seeta_cascade_classifier::SeetaClassifierLoader::new(store),
        )),
        #[cfg(feature = "opencv")]
        ClassifierBackend::Haar => Ok(Box::new(
            haar_cascade_classifier::HaarClassifierLoader::new(store),
        )),
        #[cfg(not(feature = "opencv"))]
        ClassifierBackend::Haar => {
            drop(store);
            Err(BackendUnavailable(backend))
        }
    }
}
