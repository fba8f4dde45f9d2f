use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use md5::{Digest, Md5};
use thiserror::Error;
use tracing::{debug, warn};

use crate::logging::CACHE;
use crate::normalize::Document;

const MAGIC: &[u8; 4] = b"PDFC";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = MAGIC.len() + 2;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io: {0}")]
    Io(#[from] io::Error),
    #[error("bad cache magic")]
    BadMagic,
    #[error("unsupported cache version {0}")]
    UnsupportedVersion(u16),
    #[error("cache payload corrupt: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Content-keyed persistence of normalised word records, one file per
/// document. Strictly an optimisation: n-gram fingerprints are never
/// persisted, and every failure path degrades to a re-parse.
#[derive(Debug, Clone)]
pub struct CachePersister {
    dir: PathBuf,
}

impl CachePersister {
    pub fn new(dir: PathBuf) -> Self {
        CachePersister { dir }
    }

    /// `$HOME/.pdfcompare/index_cache`, when a home directory exists.
    pub fn default_dir() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| {
            PathBuf::from(home)
                .join(".pdfcompare")
                .join("index_cache")
        })
    }

    /// `md5(absolute_path || '\0' || mtime_ns || '\0' || size)`, hex-encoded.
    /// Identifies one version of one file; any touch or rewrite misses.
    pub fn content_key(path: &Path) -> io::Result<String> {
        let abs = fs::canonicalize(path)?;
        let meta = fs::metadata(&abs)?;
        let mtime_ns = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let mut hasher = Md5::new();
        hasher.update(abs.as_os_str().as_encoded_bytes());
        hasher.update([0u8]);
        hasher.update(mtime_ns.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(meta.len().to_string().as_bytes());
        Ok(hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.dat"))
    }

    /// `Ok(None)` on a miss; `Err` on a present-but-unusable entry, which the
    /// caller should delete via [`CachePersister::remove`] before re-parsing.
    pub fn load(&self, path: &Path) -> Result<Option<Document>, CacheError> {
        let key = Self::content_key(path)?;
        let entry = self.entry_path(&key);
        let bytes = match fs::read(&entry) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(CacheError::BadMagic);
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(CacheError::UnsupportedVersion(version));
        }

        let (doc, _) = decode_from_slice::<Document, _>(&bytes[HEADER_LEN..], standard())?;
        debug!(target: CACHE, path = %path.display(), key = %key, "cache hit");
        Ok(Some(doc))
    }

    /// Best-effort write with temp-file + atomic-rename so a concurrent
    /// instance never observes a torn entry. Failures are logged, not raised.
    pub fn store(&self, path: &Path, doc: &Document) {
        if let Err(e) = self.try_store(path, doc) {
            warn!(target: CACHE, path = %path.display(), error = %e, "cache write failed");
        }
    }

    fn try_store(&self, path: &Path, doc: &Document) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let key = Self::content_key(path)?;
        let payload = encode_to_vec(doc, standard()).map_err(|e| {
            CacheError::Io(io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(MAGIC)?;
        tmp.write_all(&FORMAT_VERSION.to_le_bytes())?;
        tmp.write_all(&payload)?;
        tmp.persist(self.entry_path(&key))
            .map_err(|e| CacheError::Io(e.error))?;
        Ok(())
    }

    /// Drop the entry for this file version, if any.
    pub fn remove(&self, path: &Path) {
        if let Ok(key) = Self::content_key(path) {
            let _ = fs::remove_file(self.entry_path(&key));
        }
    }
}
