// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Object storage capability and the local-directory backend.
//
// `LocalBucket` lays containers out as directories under a root:
//
//   <root>/<container>/<key>              object body
//   <root>/<container>/<key>.meta.json    metadata map (JSON object)
//
// Keys may contain `/`, which become nested directories.  Keys with empty,
// `.` or `..` segments are rejected so nothing escapes the root.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::{debug, instrument};

use printdrop_core::error::{PrintdropError, Result};
use printdrop_core::types::ObjectMetadata;

/// Suffix of the metadata sidecar written next to every object.
const METADATA_SUFFIX: &str = ".meta.json";

/// Streamed object body.
pub type ObjectBody = Box<dyn AsyncRead + Send + Unpin>;

/// An object as returned by a single retrieval.
pub struct StoredObject {
    pub body: ObjectBody,
    pub metadata: ObjectMetadata,
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// The two object storage operations Printdrop relies on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Retrieve body and metadata in one call.
    async fn get(&self, container: &str, key: &str) -> Result<StoredObject>;

    /// Store `bytes` under `key` with `metadata` attached.
    async fn put(
        &self,
        container: &str,
        key: &str,
        bytes: Vec<u8>,
        metadata: ObjectMetadata,
    ) -> Result<()>;
}

/// Object storage over a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalBucket {
    root: PathBuf,
}

impl LocalBucket {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for part in [container].into_iter().chain(key.split('/')) {
            let mut components = Path::new(part).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(segment)), None) => path.push(segment),
                _ => {
                    return Err(PrintdropError::Storage(format!(
                        "invalid object location {container}/{key}"
                    )));
                }
            }
        }
        Ok(path)
    }
}

fn metadata_path(object: &Path) -> PathBuf {
    let mut name = object.as_os_str().to_owned();
    name.push(METADATA_SUFFIX);
    PathBuf::from(name)
}

#[async_trait]
impl ObjectStore for LocalBucket {
    #[instrument(skip(self))]
    async fn get(&self, container: &str, key: &str) -> Result<StoredObject> {
        let path = self.object_path(container, key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| PrintdropError::Storage(format!("open {}: {e}", path.display())))?;

        let metadata = match tokio::fs::read(metadata_path(&path)).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ObjectMetadata::new(),
            Err(e) => {
                return Err(PrintdropError::Storage(format!(
                    "read metadata for {container}/{key}: {e}"
                )));
            }
        };

        debug!(fields = metadata.len(), "object opened");
        Ok(StoredObject {
            body: Box::new(file),
            metadata,
        })
    }

    #[instrument(skip(self, bytes, metadata), fields(len = bytes.len()))]
    async fn put(
        &self,
        container: &str,
        key: &str,
        bytes: Vec<u8>,
        metadata: ObjectMetadata,
    ) -> Result<()> {
        let path = self.object_path(container, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Metadata first: a reader that sees the body also sees its metadata.
        let meta_json = serde_json::to_vec_pretty(&metadata)?;
        tokio::fs::write(metadata_path(&path), meta_json).await?;
        tokio::fs::write(&path, &bytes).await?;

        debug!(path = %path.display(), "object stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn put_then_get_returns_body_and_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bucket = LocalBucket::new(dir.path());

        let mut metadata = ObjectMetadata::new();
        metadata.insert("printer".into(), "10.0.0.7/socket".into());
        bucket
            .put("print-drop", "clients/acme/a.pdf", b"%PDF-1.7".to_vec(), metadata)
            .await
            .expect("put");

        let mut object = bucket.get("print-drop", "clients/acme/a.pdf").await.expect("get");
        let mut body = Vec::new();
        object.body.read_to_end(&mut body).await.expect("read");
        assert_eq!(body, b"%PDF-1.7");
        assert_eq!(object.metadata["printer"], "10.0.0.7/socket");
    }

    #[tokio::test]
    async fn missing_sidecar_means_empty_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("b").join("x.txt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"hi").unwrap();

        let object = LocalBucket::new(dir.path()).get("b", "x.txt").await.expect("get");
        assert!(object.metadata.is_empty());
    }

    #[tokio::test]
    async fn missing_object_is_storage_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = LocalBucket::new(dir.path())
            .get("b", "clients/acme/none.pdf")
            .await
            .expect_err("missing");
        assert!(matches!(err, PrintdropError::Storage(_)));
    }

    #[test]
    fn traversal_is_rejected() {
        let bucket = LocalBucket::new("/srv/bucket");
        assert_eq!(bucket.root(), Path::new("/srv/bucket"));
        assert!(bucket.object_path("b", "clients/../../etc/passwd").is_err());
        assert!(bucket.object_path("b", "/etc/passwd").is_err());
        assert!(bucket.object_path("..", "x").is_err());
        assert_eq!(
            bucket.object_path("b", "clients/acme/a.pdf").unwrap(),
            PathBuf::from("/srv/bucket/b/clients/acme/a.pdf")
        );
    }
}
