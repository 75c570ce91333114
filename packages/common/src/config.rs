use std::path::PathBuf;

use serde::Deserialize;

/// Which blob backend to use, selected once at startup.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageBackendConfig {
    /// Blobs live under a local directory and are streamed by the server.
    Filesystem {
        #[serde(default = "default_storage_path")]
        path: PathBuf,
    },
    /// S3-compatible object storage. Downloads are served through pre-signed URLs.
    S3 {
        bucket: String,
        #[serde(default = "default_s3_region")]
        region: String,
        /// Custom endpoint (MinIO, R2, Supabase S3 gateway). `None` uses AWS.
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        access_key: Option<String>,
        #[serde(default)]
        secret_key: Option<String>,
        #[serde(default)]
        path_style: bool,
    },
    /// Process-local, non-persistent. Useful for development and tests.
    Memory,
}

/// App-level blob storage configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(flatten)]
    pub backend: StorageBackendConfig,
    /// Maximum accepted upload size in bytes. Default: 10 MiB.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Lower-case file extensions accepted on upload. Empty accepts everything.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    /// Lifetime of pre-signed download URLs, for backends that issue them. Default: 300.
    #[serde(default = "default_signed_url_ttl_secs")]
    pub signed_url_ttl_secs: u64,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/blobs")
}
fn default_s3_region() -> String {
    "us-east-1".into()
}
fn default_max_upload_size() -> u64 {
    10 * 1024 * 1024
}
fn default_signed_url_ttl_secs() -> u64 {
    300
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem {
                path: default_storage_path(),
            },
            max_upload_size: default_max_upload_size(),
            allowed_extensions: Vec::new(),
            signed_url_ttl_secs: default_signed_url_ttl_secs(),
        }
    }
}
