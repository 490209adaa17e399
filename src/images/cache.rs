//! ImageCache - persistent disk cache for hosted image generations.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const CACHE_EXTENSION: &str = "png";

/// Persistent disk cache keyed by (backend, prompt, size).
pub struct ImageCache {
    cache_dir: PathBuf,
    max_size_mb: u64,
}

impl ImageCache {
    /// Create a cache rooted at `cache_dir`. The directory is created lazily.
    pub fn new(cache_dir: PathBuf, max_size_mb: u64) -> Self {
        Self { cache_dir, max_size_mb }
    }

    /// Default: `<user cache dir>/storyforge/images/`.
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("storyforge")
            .join("images")
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Deterministic key: first 16 bytes of SHA-256, hex encoded.
    pub fn key(backend: &str, prompt: &str, width: u32, height: u32) -> String {
        let mut hasher = Sha256::new();
        hasher.update(backend.as_bytes());
        hasher.update([0u8]);
        hasher.update(prompt.as_bytes());
        hasher.update([0u8]);
        hasher.update(format!("{}x{}", width, height).as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.{}", key, CACHE_EXTENSION))
    }

    /// Cached image for `key`, if present.
    pub fn get(&self, key: &str) -> Option<PathBuf> {
        let path = self.entry_path(key);
        path.is_file().then_some(path)
    }

    /// Copy `image` into the cache under `key`, then evict if over budget.
    pub fn store(&self, key: &str, image: &Path) -> Result<PathBuf, std::io::Error> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let cached_path = self.entry_path(key);
        std::fs::copy(image, &cached_path)?;
        self.cleanup_if_needed()?;
        Ok(cached_path)
    }

    /// Remove the oldest entries (by modification time) until the cache is
    /// under its size budget.
    pub fn cleanup_if_needed(&self) -> Result<(), std::io::Error> {
        let max_size_bytes = self.max_size_mb * 1024 * 1024;

        let mut files: Vec<(PathBuf, std::fs::Metadata)> = Vec::new();
        let mut total_size: u64 = 0;

        if !self.cache_dir.exists() {
            return Ok(());
        }

        for entry in std::fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|e| e.to_str()) == Some(CACHE_EXTENSION) {
                if let Ok(metadata) = entry.metadata() {
                    if metadata.is_file() {
                        total_size += metadata.len();
                        files.push((path, metadata));
                    }
                }
            }
        }

        if total_size <= max_size_bytes {
            return Ok(());
        }

        files.sort_by_key(|(_, metadata)| metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH));

        for (path, metadata) in files {
            if total_size <= max_size_bytes {
                break;
            }
            if std::fs::remove_file(&path).is_ok() {
                log::debug!("Evicted cached image {}", path.display());
                total_size = total_size.saturating_sub(metadata.len());
            }
        }

        Ok(())
    }

    /// Total size of cached images in bytes.
    pub fn total_size_bytes(&self) -> Result<u64, std::io::Error> {
        if !self.cache_dir.exists() {
            return Ok(0);
        }

        let mut total: u64 = 0;
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some(CACHE_EXTENSION) {
                let metadata = entry.metadata()?;
                if metadata.is_file() {
                    total += metadata.len();
                }
            }
        }
        Ok(total)
    }
}
