//! File-based persistent block storage.
//!
//! Stores one file per block with a 2-level fan-out directory structure:
//! `{base_dir}/{hex[0..2]}/{hex[2..4]}/{hex}`.
//!
//! On-disk format of each file:
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload]
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, error};
use weft_types::ContentId;

use crate::error::{StoreError, StoreResult};
use crate::traits::Storage;

const HEADER_LEN: usize = 8;

/// Persistent block store rooted at a directory.
///
/// Writes are atomic: data is written to a temporary file first, then
/// renamed into place, so a crash never leaves a half-written block. Reads
/// check the CRC and report [`StoreError::Corrupt`] on mismatch.
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    /// Open (or create) a file store rooted at `base_dir`.
    pub fn open(base_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Root directory of the store.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn block_path(&self, id: &ContentId) -> PathBuf {
        let hex = id.to_hex();
        self.base_dir.join(&hex[0..2]).join(&hex[2..4]).join(&hex)
    }

    fn frame(data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + data.len());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        buf.extend_from_slice(data);
        buf
    }

    fn unframe(id: &ContentId, raw: Vec<u8>) -> StoreResult<Bytes> {
        if raw.len() < HEADER_LEN {
            return Err(StoreError::Corrupt {
                id: *id,
                reason: format!("file too short ({} bytes)", raw.len()),
            });
        }
        let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        let expected_crc = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        if raw.len() - HEADER_LEN != len {
            return Err(StoreError::Corrupt {
                id: *id,
                reason: format!("length {len} does not match payload {}", raw.len() - HEADER_LEN),
            });
        }
        let mut raw = Bytes::from(raw);
        let payload = raw.split_off(HEADER_LEN);
        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            return Err(StoreError::Corrupt {
                id: *id,
                reason: format!("crc mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"),
            });
        }
        Ok(payload)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn put(&self, id: &ContentId, data: Bytes) -> StoreResult<()> {
        let path = self.block_path(id);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, Self::frame(&data)).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(id = %id.short_hex(), size = data.len(), "stored block to file");
        Ok(())
    }

    async fn get(&self, id: &ContentId) -> StoreResult<Option<Bytes>> {
        match tokio::fs::read(self.block_path(id)).await {
            Ok(raw) => match Self::unframe(id, raw) {
                Ok(payload) => Ok(Some(payload)),
                Err(e) => {
                    error!(id = %id.short_hex(), error = %e, "block corruption detected on read");
                    Err(e)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn contains(&self, id: &ContentId) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.block_path(id)).await?)
    }

    async fn delete(&self, id: &ContentId) -> StoreResult<()> {
        match tokio::fs::remove_file(self.block_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn clear(&self) -> StoreResult<()> {
        match tokio::fs::remove_dir_all(&self.base_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Io(e)),
        }
        tokio::fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("base_dir", &self.base_dir)
            .finish()
    }
}
