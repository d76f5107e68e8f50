//! Node configuration
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Storage {
    /// Deleted when the database is dropped.
    #[default]
    Temporary,
    Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub legal_name: String,
    pub storage: Storage,
    pub cache_capacity: u64,
    /// Whether this node hosts the bust party fact table and answers attestation requests.
    pub hosts_oracle: bool,
}

impl NodeConfig {
    pub fn new(legal_name: impl Into<String>) -> Self {
        Self {
            legal_name: legal_name.into(),
            storage: Storage::Temporary,
            cache_capacity: 64 * 1024 * 1024,
            hosts_oracle: false,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage = Storage::Path(path.into());
        self
    }

    pub fn temporary(mut self) -> Self {
        self.storage = Storage::Temporary;
        self
    }

    pub fn as_oracle(mut self) -> Self {
        self.hosts_oracle = true;
        self
    }

    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    pub fn open_db(&self) -> sled::Result<Arc<sled::Db>> {
        let config = sled::Config::new().cache_capacity(self.cache_capacity);
        let config = match &self.storage {
            Storage::Temporary => config.temporary(true),
            Storage::Path(path) => config.path(path),
        };

        tracing::debug!(node = %self.legal_name, storage = ?self.storage, "opening node database");
        Ok(Arc::new(config.open()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn opens_database_at_path() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let config =
            NodeConfig::new("O=PartyA,L=London,C=GB").with_path(temp_dir.path().join("a.db"));

        let db = config.open_db()?;
        db.insert(b"k", b"v".to_vec())?;

        assert_eq!(config.storage, Storage::Path(temp_dir.path().join("a.db")));
        assert_eq!(db.get(b"k")?.as_deref(), Some(&b"v"[..]));
        Ok(())
    }

    #[test]
    fn builder_setters() -> anyhow::Result<()> {
        let config = NodeConfig::new("O=Oracle,L=Paris,C=FR")
            .as_oracle()
            .with_cache_capacity(1024 * 1024)
            .temporary();

        assert!(config.hosts_oracle);
        assert_eq!(config.cache_capacity, 1024 * 1024);
        assert_eq!(config.storage, Storage::Temporary);

        let db = config.open_db()?;
        assert!(db.is_empty());
        Ok(())
    }
}
