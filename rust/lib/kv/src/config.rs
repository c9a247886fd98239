use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::cached::{CachedKV, DEFAULT_CACHE_CAPACITY, new_cache};
use crate::error::KVError;
use crate::redb::RedbStore;
use crate::remote::TableStore;
use crate::table::TableClient;
use crate::traits::KVStore;

/// Which backend holds the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// A redb file on local disk.
    #[default]
    Local,
    /// A remote keyed table reached through a `TableClient`.
    Remote,
}

impl FromStr for Backend {
    type Err = KVError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "redb" => Ok(Backend::Local),
            "remote" | "table" => Ok(Backend::Remote),
            other => Err(KVError::Config(format!("unknown backend: {:?}", other))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Local => f.write_str("local"),
            Backend::Remote => f.write_str("remote"),
        }
    }
}

/// Store selection and construction parameters.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: Backend,

    /// Directory holding the local store file.
    pub data_dir: PathBuf,

    /// Derives the local file name: `{data_dir}/{namespace}_kvstore.redb`.
    pub namespace: String,

    /// Remote table name.
    pub table_name: String,

    pub key_column: String,
    pub value_column: String,

    /// Wrap the backend in `CachedKV`.
    pub cached: bool,

    /// Maximum cache entries when `cached` is set.
    pub cache_capacity: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Local,
            data_dir: PathBuf::from("."),
            namespace: "default".to_string(),
            table_name: "kvstore".to_string(),
            key_column: "key".to_string(),
            value_column: "value".to_string(),
            cached: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl StoreConfig {
    /// Parse configuration from command-line arguments.
    ///
    /// Supported flags:
    /// - `--backend=local|remote`
    /// - `--data-dir=PATH`
    /// - `--namespace=NAME`
    /// - `--table=NAME`
    /// - `--key-column=NAME`
    /// - `--value-column=NAME`
    /// - `--cached`
    /// - `--cache-capacity=N`
    ///
    /// Unknown flags are ignored.
    pub fn from_args(args: &[String]) -> Result<Self, KVError> {
        let mut config = StoreConfig::default();

        for arg in args {
            if let Some(val) = arg.strip_prefix("--backend=") {
                config.backend = val.parse()?;
            } else if let Some(val) = arg.strip_prefix("--data-dir=") {
                config.data_dir = PathBuf::from(val);
            } else if let Some(val) = arg.strip_prefix("--namespace=") {
                config.namespace = val.to_string();
            } else if let Some(val) = arg.strip_prefix("--table=") {
                config.table_name = val.to_string();
            } else if let Some(val) = arg.strip_prefix("--key-column=") {
                config.key_column = val.to_string();
            } else if let Some(val) = arg.strip_prefix("--value-column=") {
                config.value_column = val.to_string();
            } else if arg == "--cached" {
                config.cached = true;
            } else if let Some(val) = arg.strip_prefix("--cache-capacity=") {
                config.cache_capacity = parse_capacity(val)?;
            }
        }

        Ok(config)
    }

    /// Parse configuration from `KVSTORE_*` variables. Other variables are ignored.
    pub fn from_vars<I>(vars: I) -> Result<Self, KVError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = StoreConfig::default();

        for (name, val) in vars {
            match name.as_str() {
                "KVSTORE_BACKEND" => config.backend = val.parse()?,
                "KVSTORE_DATA_DIR" => config.data_dir = PathBuf::from(val),
                "KVSTORE_NAMESPACE" => config.namespace = val,
                "KVSTORE_TABLE" => config.table_name = val,
                "KVSTORE_KEY_COLUMN" => config.key_column = val,
                "KVSTORE_VALUE_COLUMN" => config.value_column = val,
                "KVSTORE_CACHED" => config.cached = parse_flag(&val)?,
                "KVSTORE_CACHE_CAPACITY" => config.cache_capacity = parse_capacity(&val)?,
                _ => {}
            }
        }

        Ok(config)
    }

    /// Parse configuration from the process environment.
    pub fn from_env() -> Result<Self, KVError> {
        Self::from_vars(std::env::vars())
    }
}

fn parse_capacity(val: &str) -> Result<u64, KVError> {
    val.parse()
        .map_err(|_| KVError::Config(format!("invalid cache capacity: {:?}", val)))
}

fn parse_flag(val: &str) -> Result<bool, KVError> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(KVError::Config(format!("invalid boolean: {:?}", other))),
    }
}

/// Build the store selected by `config`.
///
/// `client` is required for `Backend::Remote` and ignored otherwise.
pub fn open_store(
    config: &StoreConfig,
    client: Option<Arc<dyn TableClient>>,
) -> Result<Arc<dyn KVStore>, KVError> {
    let store: Arc<dyn KVStore> = match config.backend {
        Backend::Local => Arc::new(RedbStore::open(
            &config.data_dir,
            &config.namespace,
            &config.key_column,
            &config.value_column,
        )?),
        Backend::Remote => {
            let client = client.ok_or_else(|| {
                KVError::Config("remote backend selected but no table client given".to_string())
            })?;
            Arc::new(TableStore::new(
                client,
                &config.table_name,
                &config.key_column,
                &config.value_column,
            ))
        }
    };

    debug!(
        "open_store: backend={} cached={}",
        config.backend, config.cached
    );

    if config.cached {
        Ok(Arc::new(CachedKV::with_cache(
            store,
            new_cache(config.cache_capacity),
        )))
    } else {
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::MemoryTable;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, Backend::Local);
        assert_eq!(config.namespace, "default");
        assert!(!config.cached);
    }

    #[test]
    fn test_from_args() {
        let config = StoreConfig::from_args(&args(&[
            "--backend=remote",
            "--table=tenants",
            "--key-column=tenant",
            "--value-column=config",
            "--cached",
            "--cache-capacity=50",
            "--unrelated=1",
        ]))
        .unwrap();
        assert_eq!(config.backend, Backend::Remote);
        assert_eq!(config.table_name, "tenants");
        assert_eq!(config.key_column, "tenant");
        assert_eq!(config.value_column, "config");
        assert!(config.cached);
        assert_eq!(config.cache_capacity, 50);
    }

    #[test]
    fn test_from_args_rejects_bad_backend() {
        let err = StoreConfig::from_args(&args(&["--backend=cassandra"])).unwrap_err();
        assert!(matches!(err, KVError::Config(_)));
    }

    #[test]
    fn test_from_vars() {
        let vars = vec![
            ("KVSTORE_BACKEND".to_string(), "redb".to_string()),
            ("KVSTORE_DATA_DIR".to_string(), "/var/lib/kv".to_string()),
            ("KVSTORE_NAMESPACE".to_string(), "tenants".to_string()),
            ("KVSTORE_CACHED".to_string(), "true".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];
        let config = StoreConfig::from_vars(vars).unwrap();
        assert_eq!(config.backend, Backend::Local);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/kv"));
        assert_eq!(config.namespace, "tenants");
        assert!(config.cached);
    }

    #[test]
    fn test_from_vars_rejects_bad_values() {
        let bad_flag = vec![("KVSTORE_CACHED".to_string(), "maybe".to_string())];
        assert!(StoreConfig::from_vars(bad_flag).is_err());
        let bad_capacity = vec![("KVSTORE_CACHE_CAPACITY".to_string(), "-3".to_string())];
        assert!(StoreConfig::from_vars(bad_capacity).is_err());
    }

    #[test]
    fn test_open_local() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig {
            data_dir: tmp.path().to_path_buf(),
            ..Default::default()
        };
        let store = open_store(&config, None).unwrap();
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert!(tmp.path().join("default_kvstore.redb").is_file());
    }

    #[test]
    fn test_open_remote_cached() {
        let config = StoreConfig {
            backend: Backend::Remote,
            cached: true,
            ..Default::default()
        };
        let client: Arc<dyn TableClient> = Arc::new(MemoryTable::new());
        let store = open_store(&config, Some(client)).unwrap();
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.names().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_open_remote_requires_client() {
        let config = StoreConfig {
            backend: Backend::Remote,
            ..Default::default()
        };
        assert!(matches!(open_store(&config, None), Err(KVError::Config(_))));
    }
}
