use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use common::Asset;
use indicatif::{ProgressBar, ProgressStyle};

const CHUNK_SIZE: usize = 8192;
const DEFAULT_CACHE_NAME: &str = "model.glb";

#[derive(thiserror::Error, Debug)]
pub enum AcquisitionError {
    #[error("Model file not found: {0:?}")]
    FileNotFound(PathBuf),
    #[error("Request for {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("Request for {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Download of {url} interrupted after {received} bytes: {source}")]
    Interrupted {
        url: String,
        received: u64,
        #[source]
        source: io::Error,
    },
    #[error("Cache error at {0:?}: {1}")]
    Io(PathBuf, #[source] io::Error),
}

/// Open response body of a remote fetch.
pub struct FetchResponse {
    /// Advertised `Content-Length`, when the server sent one.
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

/// Outbound fetch capability. Implementations must not buffer the whole body.
pub trait Fetch {
    fn fetch(&self, url: &str) -> Result<FetchResponse, AcquisitionError>;
}

pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl Default for UreqFetcher {
    fn default() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

impl Fetch for UreqFetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse, AcquisitionError> {
        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(status, _) => AcquisitionError::Status {
                url: url.to_owned(),
                status,
            },
            other => AcquisitionError::Transport {
                url: url.to_owned(),
                reason: other.to_string(),
            },
        })?;

        let content_length = response
            .header("Content-Length")
            .and_then(|l| l.parse::<u64>().ok());

        Ok(FetchResponse {
            content_length,
            body: Box::new(response.into_reader()),
        })
    }
}

pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Cache file name for a URL: the last path segment, ignoring query and fragment.
pub fn cache_name_for_url(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let without_query = without_scheme
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or_default();

    // Anything before the first slash is the authority, not the path
    let path = without_query.split_once('/').map_or("", |(_, path)| path);

    match path.rsplit('/').next() {
        Some(tail) if !tail.is_empty() => tail.to_owned(),
        _ => DEFAULT_CACHE_NAME.to_owned(),
    }
}

/// Resolves model locators to local files, downloading remote ones into a trusted cache.
pub struct AssetAcquirer<F> {
    cache_dir: PathBuf,
    fetcher: F,
    show_progress: bool,
}

impl AssetAcquirer<UreqFetcher> {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self::with_fetcher(cache_dir, UreqFetcher::default())
    }
}

impl<F: Fetch> AssetAcquirer<F> {
    pub fn with_fetcher(cache_dir: impl Into<PathBuf>, fetcher: F) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            fetcher,
            show_progress: true,
        }
    }

    pub fn hide_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn acquire(&self, source: &str) -> Result<Asset, AcquisitionError> {
        if is_remote(source) {
            self.acquire_remote(source)
        } else {
            acquire_local(source)
        }
    }

    fn acquire_remote(&self, url: &str) -> Result<Asset, AcquisitionError> {
        let name = cache_name_for_url(url);
        let cache_path = self.cache_dir.join(&name);

        // Trusted cache: presence is enough, no freshness check
        if cache_path.is_file() {
            log::info!("Using cached model: {}", cache_path.display());
            let size = file_size(&cache_path)?;
            return Ok(Asset::new(url, cache_path, size, Some(name)));
        }

        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| AcquisitionError::Io(self.cache_dir.clone(), e))?;

        log::info!("Downloading model from {url}");
        let response = self.fetcher.fetch(url)?;

        let part_path = self.cache_dir.join(format!("{name}.part"));
        match self.stream_to_file(url, response, &part_path) {
            Ok(received) => {
                fs::rename(&part_path, &cache_path)
                    .map_err(|e| AcquisitionError::Io(cache_path.clone(), e))?;
                log::info!("Downloaded {received} bytes to {}", cache_path.display());
                Ok(Asset::new(url, cache_path, received, Some(name)))
            }
            Err(e) => {
                if part_path.exists() {
                    if let Err(remove) = fs::remove_file(&part_path) {
                        log::warn!(
                            "Could not remove partial download {}: {remove}",
                            part_path.display()
                        );
                    }
                }
                Err(e)
            }
        }
    }

    fn stream_to_file(
        &self,
        url: &str,
        mut response: FetchResponse,
        path: &Path,
    ) -> Result<u64, AcquisitionError> {
        let mut file =
            fs::File::create(path).map_err(|e| AcquisitionError::Io(path.to_owned(), e))?;

        let bar = self.progress_bar(response.content_length);
        let mut buf = [0u8; CHUNK_SIZE];
        let mut received = 0u64;

        loop {
            let n = match response.body.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    bar.abandon();
                    return Err(AcquisitionError::Interrupted {
                        url: url.to_owned(),
                        received,
                        source,
                    });
                }
            };

            file.write_all(&buf[..n])
                .map_err(|e| AcquisitionError::Io(path.to_owned(), e))?;
            received += n as u64;
            bar.set_position(received);

            if let Some(total) = response.content_length.filter(|&t| t > 0) {
                log::trace!(
                    "Progress: {:.1}% ({received} / {total} bytes)",
                    received as f64 / total as f64 * 100.0
                );
            }
        }

        file.flush()
            .map_err(|e| AcquisitionError::Io(path.to_owned(), e))?;
        bar.finish_and_clear();

        Ok(received)
    }

    fn progress_bar(&self, total: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("Downloading [{bar:30}] {bytes}/{total_bytes} ({percent}%)")
                {
                    bar.set_style(style);
                }
                bar
            }
            None => ProgressBar::new_spinner(),
        }
    }
}

fn acquire_local(source: &str) -> Result<Asset, AcquisitionError> {
    let path = PathBuf::from(source);
    if !path.exists() {
        return Err(AcquisitionError::FileNotFound(path));
    }
    let size = file_size(&path)?;
    Ok(Asset::new(source, path, size, None))
}

fn file_size(path: &Path) -> Result<u64, AcquisitionError> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| AcquisitionError::Io(path.to_owned(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_names_come_from_the_path_tail() {
        assert_eq!(
            cache_name_for_url("https://example.com/models/sponza.glb"),
            "sponza.glb"
        );
        assert_eq!(
            cache_name_for_url("https://example.com/a/b/vase.glb?token=1#frag"),
            "vase.glb"
        );
        assert_eq!(cache_name_for_url("https://example.com/"), "model.glb");
        assert_eq!(cache_name_for_url("https://example.com"), "model.glb");
    }

    #[test]
    fn remote_detection() {
        assert!(is_remote("http://localhost/a.glb"));
        assert!(is_remote("https://example.com/a.glb"));
        assert!(!is_remote("models/a.glb"));
    }

    #[test]
    fn missing_local_file_is_reported() {
        let acquirer = AssetAcquirer::new("unused-cache").hide_progress();
        let err = acquirer.acquire("does/not/exist.glb").unwrap_err();
        assert!(matches!(err, AcquisitionError::FileNotFound(_)));
    }

    #[test]
    fn local_file_is_returned_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rock.glb");
        fs::write(&path, b"0123456789").unwrap();

        let acquirer = AssetAcquirer::new(dir.path().join("cache")).hide_progress();
        let asset = acquirer.acquire(path.to_str().unwrap()).unwrap();

        assert_eq!(asset.path(), path);
        assert_eq!(asset.byte_size(), 10);
        assert!(!asset.is_remote());
        assert_eq!(asset.name(), "rock");
        assert!(!dir.path().join("cache").exists());
    }
}
