//! Engine-name to constructor mapping.

use super::{FileStore, KeyValueStore, MemoryStore, StoreClient};
use crate::config::DatabaseInfo;
use crate::errors::StoreError;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a store client from its configuration.
pub type StoreConstructor = fn(&DatabaseInfo) -> Result<Arc<dyn StoreClient>, StoreError>;

/// Registry of store engines, keyed by lowercase engine name.
///
/// The default registry knows `memory`, `keyvalue` and `file`. Adding an
/// engine is a [`StoreRegistry::register`] call; callers of
/// [`StoreRegistry::create`] are unaffected.
#[derive(Clone)]
pub struct StoreRegistry {
    constructors: HashMap<String, StoreConstructor>,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("engines", &self.engines())
            .finish()
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::empty()
            .with_engine("memory", memory)
            .with_engine("keyvalue", keyvalue)
            .with_engine("file", file)
    }
}

impl StoreRegistry {
    /// Creates a registry with the built-in engines.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with no engines.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Adds an engine, replacing any with the same name.
    #[must_use]
    pub fn with_engine(mut self, name: &str, constructor: StoreConstructor) -> Self {
        self.register(name, constructor);
        self
    }

    /// Adds an engine, replacing any with the same name.
    pub fn register(&mut self, name: &str, constructor: StoreConstructor) {
        self.constructors.insert(name.to_ascii_lowercase(), constructor);
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered engine names, sorted.
    #[must_use]
    pub fn engines(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Constructs the engine named by `info.engine`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnsupportedDatabase`] for an unknown name, or
    /// whatever the engine's constructor reports.
    pub fn create(&self, info: &DatabaseInfo) -> Result<Arc<dyn StoreClient>, StoreError> {
        let constructor = self
            .constructors
            .get(&info.engine.to_ascii_lowercase())
            .ok_or_else(|| StoreError::UnsupportedDatabase {
                engine: info.engine.clone(),
            })?;
        let client = constructor(info)?;
        tracing::info!(engine = %info.engine, "Retry store created");
        Ok(client)
    }
}

/// Constructs a store client from the built-in engines.
pub fn new_store_client(info: &DatabaseInfo) -> Result<Arc<dyn StoreClient>, StoreError> {
    StoreRegistry::default().create(info)
}

#[allow(clippy::unnecessary_wraps)]
fn memory(_info: &DatabaseInfo) -> Result<Arc<dyn StoreClient>, StoreError> {
    Ok(Arc::new(MemoryStore::new()))
}

#[allow(clippy::unnecessary_wraps)]
fn keyvalue(info: &DatabaseInfo) -> Result<Arc<dyn StoreClient>, StoreError> {
    let store = if info.host.is_empty() {
        KeyValueStore::new()
    } else {
        KeyValueStore::new().with_namespace(format!("{}:{}/", info.host, info.port))
    };
    Ok(Arc::new(store))
}

fn file(info: &DatabaseInfo) -> Result<Arc<dyn StoreClient>, StoreError> {
    if info.path.trim().is_empty() {
        return Err(StoreError::Backend(
            "the file engine requires a path".to_string(),
        ));
    }
    Ok(Arc::new(FileStore::open(&info.path)?))
}
