mod error;
mod key;
mod traits;

pub mod filesystem;
pub mod memory;
#[cfg(feature = "object-storage")]
pub mod s3;

use std::sync::Arc;

pub use error::StorageError;
pub use key::StorageKey;
pub use traits::{BlobStore, BoxReader};

use crate::config::{StorageBackendConfig, StorageConfig};

/// Build the blob store selected by configuration.
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    let max_size = config.max_upload_size;
    let store: Arc<dyn BlobStore> = match &config.backend {
        StorageBackendConfig::Filesystem { path } => {
            Arc::new(filesystem::FilesystemBlobStore::new(path.clone(), max_size).await?)
        }
        StorageBackendConfig::Memory => Arc::new(memory::MemoryBlobStore::new(max_size)),
        #[cfg(feature = "object-storage")]
        StorageBackendConfig::S3 { .. } => Arc::new(s3::S3BlobStore::from_config(
            &config.backend,
            max_size,
        )?),
        #[cfg(not(feature = "object-storage"))]
        StorageBackendConfig::S3 { .. } => {
            return Err(StorageError::Backend(
                "S3 backend requires the `object-storage` feature".into(),
            ));
        }
    };

    tracing::info!(backend = store.backend_name(), "Blob store ready");
    Ok(store)
}
