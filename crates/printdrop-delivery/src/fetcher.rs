// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Artifact download into per-job scratch space.
//
// Each job gets its own directory under the temp dir, and the artifact keeps
// the basename of its object key (so the print subsystem shows a sensible
// job title).  The directory is removed when the `JobRecord` is dropped,
// whichever way processing ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use printdrop_core::error::{PrintdropError, Result};
use printdrop_core::types::{
    METADATA_PRINT_OPTIONS, METADATA_PRINTER, METADATA_SHA256, ObjectLocator,
};

use crate::storage::ObjectStore;

/// Copy buffer size for streaming object bodies to disk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Scratch directory removed on drop.
#[derive(Debug)]
struct ScratchDir {
    path: PathBuf,
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "job scratch removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove job scratch"),
        }
    }
}

/// A downloaded artifact plus its delivery metadata.
#[derive(Debug)]
pub struct JobRecord {
    pub locator: ObjectLocator,
    /// Raw destination identifier from the object's `printer` metadata.
    pub destination: Option<String>,
    /// Opaque options string from the object's `print-options` metadata.
    pub options: String,
    local_path: PathBuf,
    /// Dropped last; removes `local_path` with it.
    _scratch: ScratchDir,
}

impl JobRecord {
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }
}

/// Downloads artifacts from object storage.
pub struct JobFetcher {
    store: Arc<dyn ObjectStore>,
    temp_dir: PathBuf,
}

impl JobFetcher {
    pub fn new(store: Arc<dyn ObjectStore>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            temp_dir: temp_dir.into(),
        }
    }

    /// Download `locator` and return once the local copy is flushed to disk.
    ///
    /// Every failure is reported as `PrintdropError::Transfer`.
    #[instrument(skip(self), fields(object = %locator))]
    pub async fn fetch(&self, locator: &ObjectLocator) -> Result<JobRecord> {
        let basename = locator.basename();
        if basename.is_empty() || basename == "." || basename == ".." {
            return Err(PrintdropError::Transfer(format!(
                "object key {} has no file name",
                locator.key
            )));
        }

        let scratch_path = self.temp_dir.join(uuid::Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&scratch_path)
            .await
            .map_err(|e| transfer("create scratch dir", e))?;
        let scratch = ScratchDir { path: scratch_path };
        let local_path = scratch.path.join(basename);

        let mut object = self
            .store
            .get(&locator.container, &locator.key)
            .await
            .map_err(|e| PrintdropError::Transfer(format!("get {locator}: {e}")))?;

        let mut file = tokio::fs::File::create(&local_path)
            .await
            .map_err(|e| transfer("create local file", e))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = object
                .body
                .read(&mut buf)
                .await
                .map_err(|e| transfer("read object body", e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n])
                .await
                .map_err(|e| transfer("write local file", e))?;
            written += n as u64;
        }
        file.flush().await.map_err(|e| transfer("flush local file", e))?;
        file.sync_all().await.map_err(|e| transfer("sync local file", e))?;
        drop(file);

        let digest = hex::encode(hasher.finalize());
        if let Some(expected) = object.metadata.get(METADATA_SHA256) {
            if !expected.eq_ignore_ascii_case(&digest) {
                return Err(PrintdropError::Transfer(format!(
                    "integrity check failed for {locator}: expected {expected}, got {digest}"
                )));
            }
        }

        let destination = object
            .metadata
            .get(METADATA_PRINTER)
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty());
        let options = object
            .metadata
            .get(METADATA_PRINT_OPTIONS)
            .cloned()
            .unwrap_or_default();

        info!(
            bytes = written,
            sha256 = %digest,
            printer = destination.as_deref().unwrap_or("<unset>"),
            "artifact downloaded"
        );

        Ok(JobRecord {
            locator: locator.clone(),
            destination,
            options,
            local_path,
            _scratch: scratch,
        })
    }
}

fn transfer(context: &str, e: std::io::Error) -> PrintdropError {
    PrintdropError::Transfer(format!("{context}: {e}"))
}
