use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
    #[error("{name} is not cached and downloads are disabled")]
    Offline { name: String },
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Shared progress callback that also receives the artifact name.
pub type NamedProgressFn = Arc<dyn Fn(&str, u64, u64) + Send + Sync>;

/// Resolve a model file by name, checking cache locations before downloading.
///
/// Resolution order:
/// 1. User cache directory (platform-specific)
/// 2. Bundled path (for development / pre-packaged installs)
/// 3. Download from URL to cache
pub fn resolve(
    name: &str,
    url: &str,
    bundled_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    resolve_in(&model_cache_dir()?, name, url, bundled_dir, progress)
}

/// [`resolve`] against an explicit cache directory.
pub fn resolve_in(
    cache_dir: &Path,
    name: &str,
    url: &str,
    bundled_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    if let Some(found) = find_local(cache_dir, name, bundled_dir) {
        return Ok(found);
    }
    let cached_path = cache_dir.join(name);
    fs::create_dir_all(cache_dir).map_err(ModelResolveError::CacheDir)?;
    download(url, &cached_path, progress)?;
    Ok(cached_path)
}

fn find_local(cache_dir: &Path, name: &str, bundled_dir: Option<&Path>) -> Option<PathBuf> {
    let cached_path = cache_dir.join(name);
    if cached_path.exists() {
        return Some(cached_path);
    }
    bundled_dir
        .map(|dir| dir.join(name))
        .filter(|path| path.exists())
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/FaceCascade/models/`
/// - Linux: `$XDG_CACHE_HOME/FaceCascade/models/` or `~/.cache/FaceCascade/models/`
/// - Windows: `%LOCALAPPDATA%/FaceCascade/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join("FaceCascade").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join("FaceCascade").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}

/// Where classifier backends find their artifacts.
#[derive(Clone, Default)]
pub struct ModelStore {
    cache_dir: Option<PathBuf>,
    bundled_dir: Option<PathBuf>,
    offline: bool,
    progress: Option<NamedProgressFn>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the platform cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_bundled_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundled_dir = Some(dir.into());
        self
    }

    /// Never download; only cached or bundled artifacts resolve.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_progress(mut self, progress: NamedProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn locate(&self, name: &str, url: &str) -> Result<PathBuf, ModelResolveError> {
        let cache_dir = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => model_cache_dir()?,
        };
        let bundled = self.bundled_dir.as_deref();

        if self.offline {
            return find_local(&cache_dir, name, bundled).ok_or_else(|| {
                ModelResolveError::Offline {
                    name: name.to_string(),
                }
            });
        }

        let progress = self.progress.clone().map(|cb| {
            let name = name.to_string();
            Box::new(move |done: u64, total: u64| cb(&name, done, total)) as ProgressFn
        });
        resolve_in(&cache_dir, name, url, bundled, progress)
    }
}

fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");

    let result = download_inner(url, dest, &temp_path, progress);

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }

    result
}

fn download_inner(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    progress: Option<ProgressFn>,
) -> Result<(), ModelResolveError> {
    log::info!("Downloading {url}");
    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;

    let total = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;

    let write_err = |e| ModelResolveError::Write {
        path: temp_path.to_path_buf(),
        source: e,
    };
    let mut file = fs::File::create(temp_path).map_err(write_err)?;

    let mut reader = response;
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(write_err)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err)?;
        downloaded += n as u64;
        if let Some(ref cb) = progress {
            cb(downloaded, total);
        }
    }

    file.flush().map_err(write_err)?;
    drop(file);

    fs::rename(temp_path, dest).map_err(|e| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source: e,
    })?;

    Ok(())
}
