//! Source fetching: retrieval, checksum verification, and the
//! content-addressed archive cache.
//!
//! Archives are cached under `cache/<sha256>-<filename>`; the key is the
//! declared checksum, so a cache hit needs no network and no re-hash.
//! Entries are published with a tmp-file write followed by an atomic
//! rename, so concurrent builders only ever see complete, verified
//! archives.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::SourceSpec;
use crate::util::hash::sha256_bytes;

/// Error after every candidate URL has been tried.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("all sources exhausted for `{filename}`:\n{}", attempts.join("\n"))]
    Exhausted {
        filename: String,
        /// One line per attempt: URL and why it was rejected.
        attempts: Vec<String>,
    },

    #[error(transparent)]
    Cache(#[from] anyhow::Error),
}

/// Byte retrieval, separated from caching so tests can stub the network.
pub trait Transport {
    /// Retrieve the body at `url`, following redirects.
    fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP(S) transport backed by a blocking reqwest client.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("keg/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("request failed: {}", url))?
            .error_for_status()
            .with_context(|| format!("server rejected: {}", url))?;

        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read body: {}", url))?;
        Ok(bytes.to_vec())
    }
}

/// Retrieves and verifies source archives, with mirror fallback.
pub struct Fetcher {
    cache_dir: PathBuf,
    transport: Box<dyn Transport>,
}

impl Fetcher {
    /// Fetcher with the real HTTP transport.
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        Ok(Fetcher {
            cache_dir,
            transport: Box::new(HttpTransport::new()?),
        })
    }

    /// Fetcher with a custom transport (tests).
    pub fn with_transport(cache_dir: PathBuf, transport: Box<dyn Transport>) -> Self {
        Fetcher {
            cache_dir,
            transport,
        }
    }

    /// Cache location for a source. Keyed by checksum; keeps the upstream
    /// filename so extraction can infer the compression from the name.
    pub fn cached_path(&self, source: &SourceSpec) -> PathBuf {
        self.cache_dir
            .join(format!("{}-{}", source.sha256, source.filename()))
    }

    /// Fetch a verified archive, preferring the cache.
    ///
    /// On a miss, tries the primary URL then each mirror in declared
    /// order; a candidate is rejected on network error or digest
    /// mismatch. Exhausting all candidates reports every attempt.
    pub fn fetch(&self, source: &SourceSpec) -> Result<PathBuf, FetchError> {
        let dest = self.cached_path(source);
        if dest.is_file() {
            debug!(archive = %dest.display(), "cache hit");
            return Ok(dest);
        }

        crate::util::fs::ensure_dir(&self.cache_dir)?;

        let mut attempts = Vec::new();
        for url in source.candidates() {
            info!(%url, "fetching");
            let bytes = match self.transport.get(url) {
                Ok(bytes) => bytes,
                Err(e) => {
                    attempts.push(format!("  {}: {:#}", url, e));
                    continue;
                }
            };

            let digest = sha256_bytes(&bytes);
            if digest != source.sha256 {
                attempts.push(format!(
                    "  {}: checksum mismatch (expected {}, got {})",
                    url, source.sha256, digest
                ));
                continue;
            }

            self.publish(&bytes, &dest)?;
            return Ok(dest);
        }

        Err(FetchError::Exhausted {
            filename: source.filename().to_string(),
            attempts,
        })
    }

    /// Write verified bytes next to the destination, then rename into
    /// place. A concurrent writer racing on the same key produces the
    /// same verified content, so last-rename-wins is harmless.
    fn publish(&self, bytes: &[u8], dest: &Path) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.cache_dir)
            .context("failed to create temporary cache file")?;
        tmp.write_all(bytes)
            .context("failed to write cache file")?;
        tmp.persist(dest)
            .with_context(|| format!("failed to publish cache entry: {}", dest.display()))?;
        Ok(())
    }
}

/// Extract an archive into `dest` and return the source root.
///
/// When the archive unpacks to a single top-level directory (the usual
/// tarball shape), that directory is the root; otherwise `dest` itself is.
pub fn extract(archive: &Path, dest: &Path) -> Result<PathBuf> {
    crate::util::fs::ensure_dir(dest)?;

    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = File::open(archive)
        .with_context(|| format!("failed to open archive: {}", archive.display()))?;

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        tar::Archive::new(GzDecoder::new(file)).unpack(dest)
    } else if name.ends_with(".tar") {
        tar::Archive::new(file).unpack(dest)
    } else {
        bail!("unsupported archive format: {}", name);
    }
    .with_context(|| format!("failed to extract: {}", archive.display()))?;

    let mut entries: Vec<PathBuf> = std::fs::read_dir(dest)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    if entries.len() == 1 && entries[0].is_dir() {
        Ok(entries.remove(0))
    } else {
        Ok(dest.to_path_buf())
    }
}
