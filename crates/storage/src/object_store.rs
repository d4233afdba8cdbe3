//! Object storage interface for raster assets and catalog records.
//!
//! Blobs are addressed by container plus object name. Each container maps to
//! one `object_store` client (an Azure container, an S3 bucket or a directory
//! under the local root), created on first use.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::{
    aws::AmazonS3Builder, azure::MicrosoftAzureBuilder, local::LocalFileSystem, path::Path,
    ObjectStore,
};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use stac_common::{StacError, StacResult};

/// Access to blobs in named containers.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Check if an object exists.
    async fn exists(&self, container: &str, name: &str) -> StacResult<bool>;

    /// Download an object into `dest_dir`, keeping its base name.
    ///
    /// Returns `None` when the object does not exist.
    async fn download(
        &self,
        container: &str,
        name: &str,
        dest_dir: &FsPath,
    ) -> StacResult<Option<PathBuf>>;

    /// Upload a local file, overwriting any existing object.
    async fn upload(&self, container: &str, local_path: &FsPath, name: &str) -> StacResult<()>;

    /// Read a whole object into memory.
    async fn get(&self, container: &str, name: &str) -> StacResult<Bytes>;

    /// Write bytes to an object, overwriting any existing object.
    async fn put(&self, container: &str, name: &str, data: Bytes) -> StacResult<()>;

    /// Public URL of an object, used for catalog hrefs.
    fn url(&self, container: &str, name: &str) -> String;
}

/// Which service backs the store.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// Azure Blob Storage
    Azure {
        account: String,
        access_key: Option<String>,
        use_emulator: bool,
    },
    /// S3 compatible (AWS, MinIO)
    S3 {
        endpoint: String,
        access_key_id: String,
        secret_access_key: String,
        region: String,
        allow_http: bool,
    },
    /// Directory tree, one sub-directory per container
    Local { root: PathBuf },
}

/// Configuration for object storage connection.
#[derive(Debug, Clone)]
pub struct ObjectStorageConfig {
    pub backend: StoreBackend,
    /// Upper bound on every store call
    pub timeout: Duration,
}

impl ObjectStorageConfig {
    /// Azure backend from a storage account connection string.
    ///
    /// `account_name` overrides the `AccountName` entry of the string.
    pub fn azure(
        connection_string: &str,
        account_name: Option<&str>,
        timeout: Duration,
    ) -> StacResult<Self> {
        let parsed = AzureConnectionString::parse(connection_string)?;
        let account = account_name
            .map(str::to_string)
            .or(parsed.account_name)
            .ok_or_else(|| {
                StacError::Config("storage connection string has no AccountName".to_string())
            })?;

        if parsed.account_key.is_none() && !parsed.use_emulator {
            return Err(StacError::Config(
                "storage connection string has no AccountKey".to_string(),
            ));
        }

        Ok(Self {
            backend: StoreBackend::Azure {
                account,
                access_key: parsed.account_key,
                use_emulator: parsed.use_emulator,
            },
            timeout,
        })
    }

    pub fn local(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            backend: StoreBackend::Local { root: root.into() },
            timeout,
        }
    }
}

/// Fields of an Azure storage connection string.
#[derive(Debug, Default, PartialEq)]
pub struct AzureConnectionString {
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub use_emulator: bool,
}

impl AzureConnectionString {
    /// Parse `Key=Value;Key=Value` pairs. Unknown keys are ignored.
    pub fn parse(s: &str) -> StacResult<Self> {
        let mut out = AzureConnectionString::default();
        for pair in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Account keys are base64 and may themselves end in '='
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                StacError::Config(format!("invalid connection string segment: {}", pair))
            })?;
            match key {
                "AccountName" => out.account_name = Some(value.to_string()),
                "AccountKey" => out.account_key = Some(value.to_string()),
                "UseDevelopmentStorage" => out.use_emulator = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Object storage client.
pub struct ObjectStorage {
    config: ObjectStorageConfig,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl ObjectStorage {
    /// Create a new object storage client from config.
    ///
    /// Container clients are built lazily; configuration problems surface on
    /// first access to a container.
    pub fn new(config: ObjectStorageConfig) -> StacResult<Self> {
        if let StoreBackend::Local { root } = &config.backend {
            std::fs::create_dir_all(root).map_err(|e| {
                StacError::Config(format!(
                    "Failed to create storage root {}: {}",
                    root.display(),
                    e
                ))
            })?;
        }

        Ok(Self {
            config,
            stores: Mutex::new(HashMap::new()),
        })
    }

    fn store(&self, container: &str) -> StacResult<Arc<dyn ObjectStore>> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| StacError::StoreUnavailable("store registry poisoned".to_string()))?;

        if let Some(store) = stores.get(container) {
            return Ok(store.clone());
        }

        let store = self.build_store(container)?;
        stores.insert(container.to_string(), store.clone());
        Ok(store)
    }

    fn build_store(&self, container: &str) -> StacResult<Arc<dyn ObjectStore>> {
        let store: Arc<dyn ObjectStore> = match &self.config.backend {
            StoreBackend::Azure {
                account,
                access_key,
                use_emulator,
            } => {
                let mut builder = MicrosoftAzureBuilder::new()
                    .with_account(account)
                    .with_container_name(container)
                    .with_use_emulator(*use_emulator);
                if let Some(key) = access_key {
                    builder = builder.with_access_key(key);
                }
                Arc::new(builder.build().map_err(|e| {
                    StacError::Config(format!("Failed to create Azure client: {}", e))
                })?)
            }
            StoreBackend::S3 {
                endpoint,
                access_key_id,
                secret_access_key,
                region,
                allow_http,
            } => {
                let mut builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_bucket_name(container)
                    .with_access_key_id(access_key_id)
                    .with_secret_access_key(secret_access_key)
                    .with_region(region);

                if *allow_http {
                    builder = builder.with_allow_http(true);
                }

                Arc::new(builder.build().map_err(|e| {
                    StacError::Config(format!("Failed to create S3 client: {}", e))
                })?)
            }
            StoreBackend::Local { root } => {
                let dir = root.join(container);
                std::fs::create_dir_all(&dir)?;
                Arc::new(LocalFileSystem::new_with_prefix(&dir).map_err(|e| {
                    StacError::Config(format!("Failed to open {}: {}", dir.display(), e))
                })?)
            }
        };
        Ok(store)
    }

    /// Run a store call under the configured timeout.
    async fn bounded<T, F>(&self, what: &str, fut: F) -> StacResult<T>
    where
        F: Future<Output = Result<T, object_store::Error>>,
    {
        match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_store_error(what, e)),
            Err(_) => Err(StacError::StoreUnavailable(format!(
                "{} timed out after {:?}",
                what, self.config.timeout
            ))),
        }
    }
}

fn map_store_error(what: &str, err: object_store::Error) -> StacError {
    match err {
        object_store::Error::NotFound { path, .. } => StacError::NotFound(path),
        e => StacError::StoreUnavailable(format!("{} failed: {}", what, e)),
    }
}

/// Last path segment of an object name.
pub fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[async_trait]
impl AssetStore for ObjectStorage {
    #[instrument(skip(self))]
    async fn exists(&self, container: &str, name: &str) -> StacResult<bool> {
        let store = self.store(container)?;
        let location = Path::from(name);

        match self.bounded("head", store.head(&location)).await {
            Ok(_) => Ok(true),
            Err(StacError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, dest_dir))]
    async fn download(
        &self,
        container: &str,
        name: &str,
        dest_dir: &FsPath,
    ) -> StacResult<Option<PathBuf>> {
        let store = self.store(container)?;
        let location = Path::from(name);

        let result = match self.bounded("get", store.get(&location)).await {
            Ok(result) => result,
            Err(StacError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let target = dest_dir.join(basename(name));
        let mut file = tokio::fs::File::create(&target).await?;
        let mut stream = result.into_stream();
        let mut size = 0usize;

        let copy = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                size += chunk.len();
                file.write_all(&chunk)
                    .await
                    .map_err(|e| object_store::Error::Generic {
                        store: "local",
                        source: Box::new(e),
                    })?;
            }
            file.flush().await.map_err(|e| object_store::Error::Generic {
                store: "local",
                source: Box::new(e),
            })
        };
        self.bounded("download", copy).await?;

        debug!(size, path = %target.display(), "Downloaded object");
        Ok(Some(target))
    }

    #[instrument(skip(self, local_path))]
    async fn upload(&self, container: &str, local_path: &FsPath, name: &str) -> StacResult<()> {
        let data = tokio::fs::read(local_path).await?;
        self.put(container, name, Bytes::from(data)).await
    }

    #[instrument(skip(self))]
    async fn get(&self, container: &str, name: &str) -> StacResult<Bytes> {
        let store = self.store(container)?;
        let location = Path::from(name);

        let bytes = self
            .bounded("get", async { store.get(&location).await?.bytes().await })
            .await?;

        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    #[instrument(skip(self, data))]
    async fn put(&self, container: &str, name: &str, data: Bytes) -> StacResult<()> {
        let store = self.store(container)?;
        let location = Path::from(name);
        debug!(size = data.len(), "Writing object");

        self.bounded("put", store.put(&location, data.into())).await?;
        Ok(())
    }

    fn url(&self, container: &str, name: &str) -> String {
        match &self.config.backend {
            StoreBackend::Azure { account, .. } => {
                format!("https://{}.blob.core.windows.net/{}/{}", account, container, name)
            }
            StoreBackend::S3 { endpoint, .. } => {
                format!("{}/{}/{}", endpoint.trim_end_matches('/'), container, name)
            }
            StoreBackend::Local { root } => {
                format!("file://{}/{}/{}", root.display(), container, name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_storage(dir: &FsPath) -> ObjectStorage {
        ObjectStorage::new(ObjectStorageConfig::local(dir, Duration::from_secs(5))).unwrap()
    }

    #[test]
    fn test_parse_connection_string() {
        let parsed = AzureConnectionString::parse(
            "DefaultEndpointsProtocol=https;AccountName=naipeuwest;AccountKey=abc+/def==;EndpointSuffix=core.windows.net",
        )
        .unwrap();
        assert_eq!(parsed.account_name.as_deref(), Some("naipeuwest"));
        assert_eq!(parsed.account_key.as_deref(), Some("abc+/def=="));
        assert!(!parsed.use_emulator);

        assert!(AzureConnectionString::parse("AccountName").is_err());
    }

    #[test]
    fn test_azure_config_requires_key() {
        let err = ObjectStorageConfig::azure("AccountName=x", None, Duration::from_secs(1));
        assert!(matches!(err, Err(StacError::Config(_))));

        let config = ObjectStorageConfig::azure(
            "AccountName=x;AccountKey=k",
            Some("override"),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(matches!(config.backend, StoreBackend::Azure { ref account, .. } if account == "override"));
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("v002/wa/2015/a.tif"), "a.tif");
        assert_eq!(basename("a.tif"), "a.tif");
    }

    #[tokio::test]
    async fn test_local_put_get_exists() {
        let dir = tempfile::tempdir().unwrap();
        let storage = local_storage(dir.path());

        assert!(!storage.exists("pgstac", "a/b.json").await.unwrap());
        storage
            .put("pgstac", "a/b.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert!(storage.exists("pgstac", "a/b.json").await.unwrap());
        assert_eq!(storage.get("pgstac", "a/b.json").await.unwrap(), Bytes::from_static(b"{}"));
        assert!(dir.path().join("pgstac/a/b.json").exists());
    }

    #[tokio::test]
    async fn test_download_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let storage = local_storage(dir.path());

        let got = storage.download("stacify", "missing.tif", work.path()).await.unwrap();
        assert!(got.is_none());

        let err = storage.get("stacify", "missing.tif").await.unwrap_err();
        assert!(matches!(err, StacError::NotFound(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let storage = local_storage(dir.path());

        let src = work.path().join("item.json");
        std::fs::write(&src, b"{\"id\":\"x\"}").unwrap();
        storage.upload("pgstac", &src, "deep/item.json").await.unwrap();

        let out = tempfile::tempdir().unwrap();
        let path = storage
            .download("pgstac", "deep/item.json", out.path())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path, out.path().join("item.json"));
        assert_eq!(std::fs::read(path).unwrap(), b"{\"id\":\"x\"}");
    }
}
