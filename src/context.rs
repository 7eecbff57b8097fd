use std::{future::Future, sync::Arc};

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{
    cli::{Cli, Executor},
    ensure_deleted,
    resource::Resource,
    Result,
};

struct ContextInner<E> {
    cli: Cli<E>,
    created: Vec<Resource<E>>,
}

/// Tracks the objects a test creates, so they can be removed afterwards.
pub struct Context<E> {
    inner: Arc<RwLock<ContextInner<E>>>,
}

impl<E> Clone for Context<E> {
    fn clone(&self) -> Self {
        Context {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Executor> Context<E> {
    pub fn new(cli: Cli<E>) -> Self {
        Context {
            inner: Arc::new(RwLock::new(ContextInner {
                cli,
                created: vec![],
            })),
        }
    }

    pub async fn cli(&self) -> Cli<E> {
        self.inner.read().await.cli.clone()
    }

    /// Create a fresh namespace, replacing any left over from earlier runs.
    pub async fn namespace(&self, name: &str) -> Result<Resource<E>> {
        let cli = self.cli().await;

        // Try deleting it, in case it already exists.
        ensure_deleted(&Resource::new(cli, "namespace", name)).await?;

        self.create(&json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name },
        }))
        .await
    }

    pub async fn create(&self, manifest: &Value) -> Result<Resource<E>> {
        let resource = Resource::create(self.cli().await, manifest).await?;
        self.track(resource.clone()).await;
        Ok(resource)
    }

    /// Take ownership of an object created elsewhere.
    pub async fn track(&self, resource: Resource<E>) {
        self.inner.write().await.created.push(resource);
    }

    /// Delete everything tracked, newest first.
    pub async fn clean(&self) {
        let mut inner = self.inner.write().await;

        while let Some(resource) = inner.created.pop() {
            match ensure_deleted(&resource).await {
                Ok(effect) => debug!("cleaned {}: {effect:?}", resource.reference()),
                Err(err) => warn!("failed to clean {}: {err}", resource.reference()),
            }
        }
    }
}

/// Runs `func` with a fresh context and cleans up after it, even if it
/// panicked. The panic is then resumed.
pub async fn run<E, F, Fut>(cli: Cli<E>, func: F)
where
    E: Executor,
    F: FnOnce(Context<E>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let context = Context::new(cli);

    let context_clone = context.clone();
    let outcome = tokio::spawn(async move { func(context_clone).await }).await;

    context.clean().await;

    if let Err(err) = outcome {
        if err.is_panic() {
            std::panic::resume_unwind(err.into_panic());
        }
        warn!("test body was cancelled: {err}");
    }
}
