//! Process-wide registry mapping URL schemes to database driver
//! factories.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;

use crate::core::url::scheme_from_url;
use crate::core::{Error, Result};
use crate::database::stub::StubDatabaseFactory;
use crate::database::{DatabaseDriver, DatabaseFactory};

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn DatabaseFactory>>>> = Lazy::new(|| {
    let mut factories: HashMap<String, Arc<dyn DatabaseFactory>> = HashMap::new();
    factories.insert("stub".to_string(), Arc::new(StubDatabaseFactory));
    RwLock::new(factories)
});

/// Register a database driver factory under a URL scheme.
///
/// Call once at process start; a later registration for the same scheme
/// replaces the earlier one.
pub fn register(scheme: &str, factory: Arc<dyn DatabaseFactory>) {
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(scheme.to_string(), factory);
}

/// Open a database driver by URL, selecting the factory registered for
/// the URL's scheme. The scheme is matched case-sensitively.
pub async fn open(url: &str) -> Result<Arc<dyn DatabaseDriver>> {
    let scheme = scheme_from_url(url)?;
    let factory = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&scheme)
        .cloned()
        .ok_or(Error::UnknownDriver(scheme))?;
    factory.open(url).await
}
