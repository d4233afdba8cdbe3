//! Processor configuration.
//!
//! Built once from the environment at startup, validated, then shared
//! read-only by every worker.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use stac_common::Provider;
use storage::{DatabaseConfig, LoadMode, ObjectStorageConfig, StoreBackend};

use crate::error::{Result, StacError};

/// Message feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Redis URL
    pub connection_string: String,
    pub topic: String,
    pub subscription: String,
    /// Deliveries allowed before a failing message is dead-lettered
    pub max_delivery_count: u32,
    pub lock_duration: Duration,
    /// Dead-letter non-retryable failures on their first delivery
    pub fail_fast_non_retryable: bool,
}

/// Container names used by the processors.
#[derive(Debug, Clone)]
pub struct Containers {
    /// Normalized item records
    pub pgstac: String,
    /// Raw rasters, side-metadata and previews
    pub stacify: String,
    /// Collection documents
    pub staccollection: String,
}

/// Settings of the NAIP extraction kind.
#[derive(Debug, Clone)]
pub struct NaipSettings {
    pub metadata_type: String,
    pub jpg_extension: String,
    pub collection_id: String,
    pub additional_providers: Vec<Provider>,
}

/// Complete processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub feed: FeedSettings,
    pub storage: ObjectStorageConfig,
    pub containers: Containers,
    /// Absent when neither `DATABASE_URL` nor `PGHOST` is set
    pub database: Option<DatabaseConfig>,
    pub naip: NaipSettings,
    /// Load mode for item records
    pub load_mode: LoadMode,
    /// Root of per-message scratch directories
    pub working_dir: PathBuf,
    pub metrics_addr: Option<SocketAddr>,
}

impl ProcessorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let feed = FeedSettings {
            connection_string: vars.required("FEED_CONNECTION_STRING")?,
            topic: vars.required("TOPIC_NAME")?,
            subscription: vars.required("SUBSCRIPTION_NAME")?,
            max_delivery_count: vars.parse_or("MAX_DELIVERY_COUNT", 2)?,
            lock_duration: Duration::from_secs(vars.parse_or("LOCK_DURATION_SECS", 60)?),
            fail_fast_non_retryable: vars.flag("FAIL_FAST_NON_RETRYABLE", false)?,
        };
        if feed.max_delivery_count == 0 {
            return Err(StacError::Config(
                "MAX_DELIVERY_COUNT must be at least 1".to_string(),
            ));
        }
        if feed.lock_duration < Duration::from_secs(2) {
            return Err(StacError::Config(
                "LOCK_DURATION_SECS must be at least 2".to_string(),
            ));
        }

        let timeout = Duration::from_secs(vars.parse_or("STORE_TIMEOUT_SECS", 300)?);
        let storage = match vars.or("STORAGE_BACKEND", "azure").to_lowercase().as_str() {
            "azure" => ObjectStorageConfig::azure(
                &vars.required("DATA_STORAGE_ACCOUNT_CONNECTION_STRING")?,
                vars.get("DATA_STORAGE_ACCOUNT_NAME").as_deref(),
                timeout,
            )?,
            "s3" => ObjectStorageConfig {
                backend: StoreBackend::S3 {
                    endpoint: vars.or("S3_ENDPOINT", "http://minio:9000"),
                    access_key_id: vars.or("S3_ACCESS_KEY", "minioadmin"),
                    secret_access_key: vars.or("S3_SECRET_KEY", "minioadmin"),
                    region: vars.or("S3_REGION", "us-east-1"),
                    allow_http: vars.flag("S3_ALLOW_HTTP", true)?,
                },
                timeout,
            },
            "local" => ObjectStorageConfig::local(vars.or("LOCAL_STORAGE_ROOT", "./data"), timeout),
            other => {
                return Err(StacError::Config(format!(
                    "Unknown STORAGE_BACKEND '{}', expected azure, s3 or local",
                    other
                )))
            }
        };

        let containers = Containers {
            pgstac: vars.or("DATA_STORAGE_PGSTAC_CONTAINER_NAME", "pgstac"),
            stacify: vars.or("STACIFY_STORAGE_CONTAINER_NAME", "stacify"),
            staccollection: vars.or("STACCOLLECTION_STORAGE_CONTAINER_NAME", "staccollection"),
        };

        // sqlx reads the remaining PG* variables itself.
        let database = match (vars.get("DATABASE_URL"), vars.get("PGHOST")) {
            (Some(url), _) => Some(DatabaseConfig { url: Some(url) }),
            (None, Some(_)) => Some(DatabaseConfig { url: None }),
            (None, None) => None,
        };

        let additional_providers = match vars.get("ADDITIONAL_PROVIDERS_FILE") {
            Some(path) => load_providers(Path::new(&path))?,
            None => Vec::new(),
        };
        let naip = NaipSettings {
            metadata_type: vars.or("STAC_METADATA_TYPE_NAME", "fgdc"),
            jpg_extension: vars.or("JPG_EXTENSION", "jpg"),
            collection_id: vars.or("COLLECTION_ID", "naip"),
            additional_providers,
        };

        let load_mode = match vars.get("LOAD_METHOD") {
            Some(raw) => raw.parse()?,
            None => LoadMode::default(),
        };

        let working_dir = vars
            .get("WORKING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("stac-processor"));

        let metrics_addr = vars
            .get("METRICS_ADDR")
            .map(|raw| {
                raw.parse::<SocketAddr>().map_err(|e| {
                    StacError::Config(format!("Invalid METRICS_ADDR '{}': {}", raw, e))
                })
            })
            .transpose()?;

        Ok(Self {
            feed,
            storage,
            containers,
            database,
            naip,
            load_mode,
            working_dir,
            metrics_addr,
        })
    }

    /// Catalog settings, required by the kinds that load records.
    pub fn require_database(&self) -> Result<DatabaseConfig> {
        self.database.clone().ok_or_else(|| {
            StacError::Config("DATABASE_URL or PGHOST must be set for this processor".to_string())
        })
    }
}

/// Read a JSON array of providers.
fn load_providers(path: &Path) -> Result<Vec<Provider>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        StacError::Config(format!(
            "Cannot read ADDITIONAL_PROVIDERS_FILE {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        StacError::Config(format!(
            "Invalid providers in {}: {}",
            path.display(),
            e
        ))
    })
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Value of a variable; empty values count as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| StacError::Config(format!("{} must be set", key)))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| StacError::Config(format!("Invalid {} '{}': {}", key, raw, e))),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key).map(|v| v.trim().to_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => Ok(true),
            Some(v) if matches!(v.as_str(), "false" | "0" | "no") => Ok(false),
            Some(v) => Err(StacError::Config(format!("Invalid {} '{}'", key, v))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("FEED_CONNECTION_STRING", "redis://localhost:6379"),
        ("TOPIC_NAME", "naip-tiles"),
        ("SUBSCRIPTION_NAME", "extract"),
        ("STORAGE_BACKEND", "local"),
    ];

    #[test]
    fn test_defaults() {
        let config = ProcessorConfig::from_lookup(lookup(BASE)).unwrap();
        assert_eq!(config.feed.max_delivery_count, 2);
        assert_eq!(config.feed.lock_duration, Duration::from_secs(60));
        assert!(!config.feed.fail_fast_non_retryable);
        assert_eq!(config.containers.pgstac, "pgstac");
        assert_eq!(config.containers.stacify, "stacify");
        assert_eq!(config.containers.staccollection, "staccollection");
        assert_eq!(config.naip.metadata_type, "fgdc");
        assert_eq!(config.naip.jpg_extension, "jpg");
        assert_eq!(config.naip.collection_id, "naip");
        assert_eq!(config.load_mode, LoadMode::Upsert);
        assert_eq!(config.storage.timeout, Duration::from_secs(300));
        assert!(config.database.is_none());
        assert!(config.metrics_addr.is_none());
        assert!(config.require_database().is_err());
    }

    #[test]
    fn test_missing_topic_is_config_error() {
        let err = ProcessorConfig::from_lookup(lookup(&[
            ("FEED_CONNECTION_STRING", "redis://localhost"),
            ("SUBSCRIPTION_NAME", "extract"),
        ]))
        .unwrap_err();
        assert!(matches!(err, StacError::Config(ref m) if m.contains("TOPIC_NAME")));
    }

    #[test]
    fn test_azure_requires_connection_string() {
        let mut pairs = BASE.to_vec();
        pairs.retain(|(k, _)| *k != "STORAGE_BACKEND");
        let err = ProcessorConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, StacError::Config(_)));

        pairs.push((
            "DATA_STORAGE_ACCOUNT_CONNECTION_STRING",
            "DefaultEndpointsProtocol=https;AccountName=naipeuwest;AccountKey=a2V5;EndpointSuffix=core.windows.net",
        ));
        let config = ProcessorConfig::from_lookup(lookup(&pairs)).unwrap();
        assert!(matches!(
            config.storage.backend,
            StoreBackend::Azure { ref account, .. } if account == "naipeuwest"
        ));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = BASE.to_vec();
        pairs.extend_from_slice(&[
            ("MAX_DELIVERY_COUNT", "5"),
            ("LOCK_DURATION_SECS", "30"),
            ("FAIL_FAST_NON_RETRYABLE", "true"),
            ("LOAD_METHOD", "insert"),
            ("DATABASE_URL", "postgres://u:p@db:5432/postgis"),
            ("METRICS_ADDR", "0.0.0.0:9100"),
            ("WORKING_DIR", "/scratch"),
        ]);
        let config = ProcessorConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.feed.max_delivery_count, 5);
        assert_eq!(config.feed.lock_duration, Duration::from_secs(30));
        assert!(config.feed.fail_fast_non_retryable);
        assert_eq!(config.load_mode, LoadMode::Insert);
        assert!(config.database.is_some());
        assert_eq!(config.metrics_addr, Some("0.0.0.0:9100".parse().unwrap()));
        assert_eq!(config.working_dir, PathBuf::from("/scratch"));
    }

    #[test]
    fn test_pghost_enables_database() {
        let mut pairs = BASE.to_vec();
        pairs.push(("PGHOST", "db"));
        let config = ProcessorConfig::from_lookup(lookup(&pairs)).unwrap();
        assert!(config.database.unwrap().url.is_none());
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("MAX_DELIVERY_COUNT", "two"),
            ("MAX_DELIVERY_COUNT", "0"),
            ("LOCK_DURATION_SECS", "1"),
            ("FAIL_FAST_NON_RETRYABLE", "maybe"),
            ("LOAD_METHOD", "merge"),
            ("STORAGE_BACKEND", "ftp"),
            ("METRICS_ADDR", "not-an-addr"),
        ] {
            let mut pairs = BASE.to_vec();
            pairs.retain(|(k, _)| *k != key);
            pairs.push((key, value));
            assert!(
                matches!(
                    ProcessorConfig::from_lookup(lookup(&pairs)),
                    Err(StacError::Config(_))
                ),
                "{}={} should be rejected",
                key,
                value
            );
        }
    }

    #[test]
    fn test_additional_providers_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.json");
        std::fs::write(
            &path,
            r#"[{"name": "Microsoft", "roles": ["host"], "url": "https://planetarycomputer.microsoft.com"}]"#,
        )
        .unwrap();

        let mut pairs = BASE.to_vec();
        let path_str = path.to_string_lossy().to_string();
        pairs.push(("ADDITIONAL_PROVIDERS_FILE", &path_str));
        let config = ProcessorConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.naip.additional_providers.len(), 1);
        assert_eq!(config.naip.additional_providers[0].name, "Microsoft");
    }
}
