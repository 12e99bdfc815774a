use crate::NodeError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Something a node acquired that must be released when the run ends
/// (browser sessions, file handles, temp dirs...).
#[async_trait]
pub trait ScopedResource: Send {
    fn name(&self) -> &str;

    async fn release(self: Box<Self>) -> Result<(), NodeError>;
}

/// Run-scoped list of resources registered by nodes.
///
/// Cloned into every node context of a run; drained once by cleanup.
#[derive(Clone, Default)]
pub struct ResourceScope {
    inner: Arc<Mutex<Vec<Box<dyn ScopedResource>>>>,
}

impl ResourceScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, resource: Box<dyn ScopedResource>) {
        tracing::debug!("Registered scoped resource: {}", resource.name());
        self.inner.lock().await.push(resource);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Take every resource, most recently registered first
    pub async fn drain(&self) -> Vec<Box<dyn ScopedResource>> {
        let mut guard = self.inner.lock().await;
        let mut taken: Vec<_> = guard.drain(..).collect();
        taken.reverse();
        taken
    }
}
