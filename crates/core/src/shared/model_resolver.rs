use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("model file not found: {0}")]
    Missing(PathBuf),
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
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 when the server sends no Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Where a face-pipeline model comes from.
pub struct ModelSource<'a> {
    pub name: &'a str,
    pub url: &'a str,
}

/// Resolves a model file.
///
/// An explicit path wins and must exist. Otherwise the user cache is
/// checked and the model is downloaded into it on a miss.
pub fn resolve(
    source: &ModelSource<'_>,
    explicit: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    if let Some(path) = explicit {
        return require_file(path);
    }
    let cache_dir = model_cache_dir()?;
    if let Some(found) = find_in(&cache_dir, source.name) {
        return Ok(found);
    }
    fs::create_dir_all(&cache_dir).map_err(ModelResolveError::CacheDir)?;
    let dest = cache_dir.join(source.name);
    log::info!("downloading {} to {}", source.url, dest.display());
    download(source.url, &dest, progress)?;
    Ok(dest)
}

/// Checks that a user-supplied model path points at a file.
pub fn require_file(path: &Path) -> Result<PathBuf, ModelResolveError> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(ModelResolveError::Missing(path.to_path_buf()))
    }
}

fn find_in(dir: &Path, name: &str) -> Option<PathBuf> {
    let candidate = dir.join(name);
    candidate.is_file().then_some(candidate)
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/FaceTrack/models/`
/// - elsewhere: `<cache_dir>/FaceTrack/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    let base = dirs::data_dir();
    #[cfg(not(target_os = "macos"))]
    let base = dirs::cache_dir();

    base.map(|d| d.join("FaceTrack").join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");
    let result = stream_to(url, dest, &temp_path, progress);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn stream_to(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    progress: Option<ProgressFn>,
) -> Result<(), ModelResolveError> {
    let download_err = |e| ModelResolveError::Download {
        url: url.to_string(),
        source: e,
    };
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |e| ModelResolveError::Write { path, source: e }
    };

    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(download_err)?;
    let total = response.content_length().unwrap_or(0);

    let mut file = fs::File::create(temp_path).map_err(write_err(temp_path))?;
    let mut buf = vec![0u8; 1024 * 1024];
    let mut downloaded: u64 = 0;
    loop {
        let n = response.read(&mut buf).map_err(write_err(temp_path))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err(temp_path))?;
        downloaded += n as u64;
        if let Some(ref cb) = progress {
            cb(downloaded, total);
        }
    }
    file.flush().map_err(write_err(temp_path))?;
    drop(file);

    fs::rename(temp_path, dest).map_err(write_err(dest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_path_is_returned() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("person.onnx");
        fs::write(&path, b"model").unwrap();

        let source = ModelSource {
            name: "unused.onnx",
            url: "http://invalid.nonexistent.example.com/unused.onnx",
        };
        assert_eq!(resolve(&source, Some(&path), None).unwrap(), path);
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("absent.onnx");
        assert!(matches!(
            require_file(&path),
            Err(ModelResolveError::Missing(p)) if p == path
        ));
    }

    #[test]
    fn test_directory_is_not_a_model() {
        let tmp = TempDir::new().unwrap();
        assert!(require_file(tmp.path()).is_err());
    }

    #[test]
    fn test_find_in_locates_cached_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("face.onnx"), b"x").unwrap();
        assert_eq!(
            find_in(tmp.path(), "face.onnx"),
            Some(tmp.path().join("face.onnx"))
        );
        assert!(find_in(tmp.path(), "other.onnx").is_none());
    }

    #[test]
    fn test_model_cache_dir_names_app() {
        let path = model_cache_dir().unwrap();
        assert!(path.to_string_lossy().contains("FaceTrack"));
        assert!(path.ends_with("models"));
    }

    #[test]
    fn test_failed_download_leaves_no_partial_file() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("model.onnx");
        let result = download("http://invalid.nonexistent.example.com/model", &dest, None);
        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(!dest.with_extension("part").exists());
    }
}
