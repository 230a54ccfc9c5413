//! Process-wide registry mapping URL schemes to source driver factories.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;

use crate::core::url::scheme_from_url;
use crate::core::{Error, Result};
use crate::source::memory::MemorySourceFactory;
use crate::source::{SourceDriver, SourceFactory};

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn SourceFactory>>>> = Lazy::new(|| {
    let mut factories: HashMap<String, Arc<dyn SourceFactory>> = HashMap::new();
    factories.insert("memory".to_string(), Arc::new(MemorySourceFactory));
    RwLock::new(factories)
});

/// Register a source driver factory under a URL scheme.
///
/// Call once at process start; a later registration for the same scheme
/// replaces the earlier one.
pub fn register(scheme: &str, factory: Arc<dyn SourceFactory>) {
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(scheme.to_string(), factory);
}

/// Open a source driver by URL, selecting the factory registered for the
/// URL's scheme. The scheme is matched case-sensitively.
pub async fn open(url: &str) -> Result<Arc<dyn SourceDriver>> {
    let scheme = scheme_from_url(url)?;
    let factory = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&scheme)
        .cloned()
        .ok_or(Error::UnknownDriver(scheme))?;
    factory.open(url).await
}
