use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    lib::errors::InitializationError,
    server::config::{EnvKey, EnvironmentConfig},
};

/// A handle created once at startup and shared by every tool invocation.
///
/// Implementations must be safe for concurrent use; a resource that needs
/// serialized access enforces it internally.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Release the underlying handle. Called at most once per resource.
    async fn release(&self) -> anyhow::Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Builds one named resource from the environment snapshot.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Environment keys validated before any provider runs.
    fn env_keys(&self) -> &'static [EnvKey] {
        &[]
    }

    async fn acquire(&self, env: &EnvironmentConfig) -> anyhow::Result<Arc<dyn Resource>>;
}

struct Slot {
    name: &'static str,
    resource: Arc<dyn Resource>,
}

/// Outcome of releasing a context.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReleaseReport {
    pub released: Vec<&'static str>,
    pub failures: Vec<ReleaseFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseFailure {
    pub resource: &'static str,
    pub message: String,
}

/// Resources acquired at startup, in acquisition order.
pub struct SharedContext {
    slots: Vec<Slot>,
    released: AtomicBool,
}

impl SharedContext {
    pub fn empty() -> Self {
        Self {
            slots: Vec::new(),
            released: AtomicBool::new(false),
        }
    }

    /// Acquire every provider's resource in order. On the first failure the
    /// resources acquired so far are released before the error is returned.
    pub async fn acquire(
        providers: &[Arc<dyn ResourceProvider>],
        env: &EnvironmentConfig,
    ) -> Result<Self, InitializationError> {
        let mut context = Self::empty();
        for provider in providers {
            let name = provider.name();
            let acquired = if context.contains(name) {
                Err(anyhow!("a resource named `{name}` was already acquired"))
            } else {
                provider.acquire(env).await
            };

            match acquired {
                Ok(resource) => {
                    info!(
                        target: "sheets_mcp::lifecycle",
                        resource = name,
                        "Acquired shared resource"
                    );
                    context.slots.push(Slot { name, resource });
                }
                Err(source) => {
                    error!(
                        target: "sheets_mcp::lifecycle",
                        resource = name,
                        reason = %source,
                        acquired = context.slots.len(),
                        "Failed to acquire shared resource; releasing partial context"
                    );
                    context.release_all().await;
                    return Err(InitializationError {
                        resource: name,
                        source,
                    });
                }
            }
        }
        Ok(context)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.iter().any(|slot| slot.name == name)
    }

    /// Typed lookup of a resource by name.
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.slots
            .iter()
            .find(|slot| slot.name == name)
            .and_then(|slot| slot.resource.as_any().downcast_ref::<T>())
    }

    pub fn require<T: Any>(&self, name: &str) -> anyhow::Result<&T> {
        self.get(name)
            .ok_or_else(|| anyhow!("shared resource `{name}` is not available"))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.iter().map(|slot| slot.name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Release every resource in reverse acquisition order. Only the first
    /// call does any work; later calls return an empty report.
    pub async fn release_all(&self) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        if self.released.swap(true, Ordering::AcqRel) {
            return report;
        }

        for slot in self.slots.iter().rev() {
            match slot.resource.release().await {
                Ok(()) => {
                    info!(
                        target: "sheets_mcp::lifecycle",
                        resource = slot.name,
                        "Released shared resource"
                    );
                    report.released.push(slot.name);
                }
                Err(err) => {
                    warn!(
                        target: "sheets_mcp::lifecycle",
                        resource = slot.name,
                        reason = %err,
                        "Failed to release shared resource"
                    );
                    report.failures.push(ReleaseFailure {
                        resource: slot.name,
                        message: format!("{err:#}"),
                    });
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContext")
            .field("resources", &self.names().collect::<Vec<_>>())
            .field("released", &self.is_released())
            .finish()
    }
}
