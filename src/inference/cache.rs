//! Build-once holder for the process-wide prediction service.
//!
//! Readers share the built instance through a read lock. The first callers
//! serialize on a separate build lock; one of them builds and the rest receive
//! the same `Arc`. A failed build leaves the slot empty so the next call retries.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::error::ServeResult;

type Builder<T> = Box<dyn Fn() -> ServeResult<T> + Send + Sync>;

pub struct ServingCache<T> {
    slot: RwLock<Option<Arc<T>>>,
    building: Mutex<()>,
    build: Builder<T>,
}

impl<T> ServingCache<T> {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn() -> ServeResult<T> + Send + Sync + 'static,
    {
        Self {
            slot: RwLock::new(None),
            building: Mutex::new(()),
            build: Box::new(build),
        }
    }

    fn cached(&self) -> Option<Arc<T>> {
        self.slot.read().as_ref().map(Arc::clone)
    }

    /// Shared instance, building it on first use.
    pub fn get(&self) -> ServeResult<Arc<T>> {
        if let Some(instance) = self.cached() {
            return Ok(instance);
        }

        let _building = self.building.lock();
        if let Some(instance) = self.cached() {
            return Ok(instance);
        }
        let instance = Arc::new((self.build)().map_err(|err| {
            tracing::error!(error = %err, "serving instance build failed");
            err
        })?);
        *self.slot.write() = Some(Arc::clone(&instance));
        tracing::info!("serving instance built");
        Ok(instance)
    }

    /// Build eagerly so startup fails on a bad configuration.
    pub fn warm(&self) -> ServeResult<()> {
        self.get().map(|_| ())
    }

    pub fn is_warm(&self) -> bool {
        self.slot.read().is_some()
    }
}
