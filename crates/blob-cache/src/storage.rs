//! Object storage backends for cached blobs.

use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};

use crate::error::Result;

/// Prefix under which blob data is stored
const DATA_PREFIX: &str = "data";

/// Where cached blobs live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreConfig {
    /// Local directory
    Local { path: PathBuf },
    /// Process memory, lost on drop
    Memory,
}

/// Thin wrapper over an [`ObjectStore`] addressing blobs by key
#[derive(Clone)]
pub struct Storage {
    inner: Arc<dyn ObjectStore>,
    config: ObjectStoreConfig,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("config", &self.config)
            .finish()
    }
}

impl Storage {
    pub async fn new(config: ObjectStoreConfig) -> Result<Self> {
        let inner: Arc<dyn ObjectStore> = match &config {
            ObjectStoreConfig::Local { path } => {
                tokio::fs::create_dir_all(path).await?;
                Arc::new(LocalFileSystem::new_with_prefix(path)?)
            }
            ObjectStoreConfig::Memory => Arc::new(InMemory::new()),
        };
        Ok(Self { inner, config })
    }

    pub fn config(&self) -> &ObjectStoreConfig {
        &self.config
    }

    fn data_path(key: &str) -> ObjectPath {
        ObjectPath::from(format!("{}/{}", DATA_PREFIX, key))
    }

    pub async fn put_data(&self, key: &str, data: Bytes) -> Result<()> {
        self.inner
            .put(&Self::data_path(key), PutPayload::from(data))
            .await?;
        Ok(())
    }

    /// Size of a stored blob, `None` if absent
    pub async fn data_size(&self, key: &str) -> Result<Option<usize>> {
        match self.inner.head(&Self::data_path(key)).await {
            Ok(meta) => Ok(Some(meta.size)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_data(&self, key: &str) -> Result<Option<Bytes>> {
        match self.inner.get(&Self::data_path(key)).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a byte range; the range must lie within the blob
    pub async fn get_data_range(&self, key: &str, range: Range<usize>) -> Result<Option<Bytes>> {
        if range.is_empty() {
            return Ok(Some(Bytes::new()));
        }
        match self.inner.get_range(&Self::data_path(key), range).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_data(&self, key: &str) -> Result<()> {
        match self.inner.delete(&Self::data_path(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List stored keys with their sizes
    pub async fn list_data(&self) -> Result<Vec<(String, usize)>> {
        let prefix = ObjectPath::from(DATA_PREFIX);
        let metas: Vec<_> = self.inner.list(Some(&prefix)).try_collect().await?;

        Ok(metas
            .into_iter()
            .filter_map(|meta| {
                let key = meta
                    .location
                    .as_ref()
                    .strip_prefix(DATA_PREFIX)?
                    .trim_start_matches('/')
                    .to_string();
                Some((key, meta.size))
            })
            .collect())
    }
}
