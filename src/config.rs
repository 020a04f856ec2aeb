use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::query::validate_identifier;

fn default_order_column() -> String {
    "Id".to_string()
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the database file
    pub directory: PathBuf,
    /// Database file name inside `directory`
    pub file_name: String,
    /// Template database copied into place when the store file does not exist yet.
    /// Accepts a plain path or a `file://` URI.
    #[serde(default)]
    pub base_resource_uri: Option<String>,
    /// Column used to order full-table reads
    #[serde(default = "default_order_column")]
    pub order_column: String,
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
}

impl StoreConfig {
    /// Create a new store config from a directory and file name
    pub fn new(directory: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            file_name: file_name.into(),
            base_resource_uri: None,
            order_column: default_order_column(),
            busy_timeout_ms: None,
        }
    }

    pub fn with_base_resource_uri(mut self, uri: impl Into<String>) -> Self {
        self.base_resource_uri = Some(uri.into());
        self
    }

    pub fn with_order_column(mut self, column: impl Into<String>) -> Self {
        self.order_column = column.into();
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn busy_timeout(&self) -> Option<Duration> {
        self.busy_timeout_ms.map(Duration::from_millis)
    }

    /// Full path of the database file.
    pub fn store_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    /// Resolve `base_resource_uri` to a local path, if one is configured.
    pub fn base_resource_path(&self) -> Option<PathBuf> {
        self.base_resource_uri.as_deref().map(|uri| {
            let path = uri.strip_prefix("file://").unwrap_or(uri);
            Path::new(path).to_path_buf()
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(Error::configuration("store directory must not be empty"));
        }
        if self.file_name.trim().is_empty() {
            return Err(Error::configuration("store file name must not be empty"));
        }
        if Path::new(&self.file_name).components().count() != 1 {
            return Err(Error::configuration(format!(
                "store file name must be a bare file name, got {:?}",
                self.file_name
            )));
        }
        if matches!(self.base_resource_uri.as_deref(), Some(uri) if uri.trim().is_empty()) {
            return Err(Error::configuration("base resource URI must not be blank"));
        }
        validate_identifier("order column", &self.order_column)
            .map_err(|e| Error::configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn rejects_empty_arguments() {
        for config in [
            StoreConfig::new("", "app.db3"),
            StoreConfig::new("/tmp", ""),
            StoreConfig::new("/tmp", "   "),
            StoreConfig::new("/tmp", "nested/app.db3"),
            StoreConfig::new("/tmp", "app.db3").with_base_resource_uri(""),
            StoreConfig::new("/tmp", "app.db3").with_order_column("Id; --"),
        ] {
            let err = config.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "{config:?}");
        }
    }

    #[test]
    fn resolves_paths() {
        let config = StoreConfig::new("/data", "app.db3")
            .with_base_resource_uri("file:///bundle/seed.db3");
        assert_eq!(config.store_path(), PathBuf::from("/data/app.db3"));
        assert_eq!(
            config.base_resource_path(),
            Some(PathBuf::from("/bundle/seed.db3"))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn busy_timeout_saturates() {
        let config = StoreConfig::new("/data", "app.db3").with_busy_timeout(Duration::MAX);
        assert_eq!(config.busy_timeout_ms, Some(u64::MAX));
        let config =
            StoreConfig::new("/data", "app.db3").with_busy_timeout(Duration::from_millis(1500));
        assert_eq!(config.busy_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"directory":"/data","file_name":"app.db3"}"#).unwrap();
        assert_eq!(config, StoreConfig::new("/data", "app.db3"));
        assert_eq!(config.order_column, "Id");
        assert_eq!(config.busy_timeout(), None);
    }
}
