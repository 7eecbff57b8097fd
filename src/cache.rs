use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::{
    cli::{Cli, Executor},
    resource::ResourceList,
    Error, Result,
};

pub const MCO_NAMESPACE: &str = "openshift-machine-config-operator";
pub const CONTROLLER_SELECTOR: &str = "k8s-app=machine-config-controller";

/// Remembers the name of a running pod matching a selector, so repeated
/// log reads don't list pods every time.
#[derive(Debug)]
pub struct PodNameCache<E> {
    pods: ResourceList<E>,
    namespace: String,
    name: Option<String>,
}

impl<E: Executor> PodNameCache<E> {
    pub fn new(cli: Cli<E>, namespace: &str, selector: &str) -> Self {
        let mut pods = ResourceList::namespaced(cli, namespace, "pod");
        pods.by_label(selector);

        PodNameCache {
            pods,
            namespace: namespace.to_string(),
            name: None,
        }
    }

    /// The machine config controller.
    pub fn machine_config_controller(cli: Cli<E>) -> Self {
        PodNameCache::new(cli, MCO_NAMESPACE, CONTROLLER_SELECTOR)
    }

    pub fn cached(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub async fn get(&mut self) -> Result<String> {
        if let Some(name) = &self.name {
            return Ok(name.clone());
        }

        self.refresh().await
    }

    pub fn invalidate(&mut self) {
        if let Some(name) = self.name.take() {
            debug!("forgetting pod {name} in {}", self.namespace);
        }
    }

    /// Look the running pod up again, replacing any cached name.
    pub async fn refresh(&mut self) -> Result<String> {
        self.name = None;

        let pods: Vec<Pod> = self.pods.items().await?;
        let name = pods
            .iter()
            .find(|pod| {
                pod.status
                    .as_ref()
                    .and_then(|status| status.phase.as_deref())
                    == Some("Running")
            })
            .map(ResourceExt::name_any)
            .ok_or_else(|| Error::NotFound {
                resource: format!("running pod in {}", self.namespace),
                stderr: String::new(),
            })?;

        info!("using pod {name} in {}", self.namespace);
        self.name = Some(name.clone());
        Ok(name)
    }

    /// Logs of the cached pod, optionally limited with `--since` (e.g. `5m`).
    /// A pod that vanished since it was cached is looked up again once.
    pub async fn logs(&mut self, since: Option<&str>) -> Result<String> {
        let name = self.get().await?;

        match self.read_logs(&name, since).await {
            Err(err) if err.is_not_found() => {
                debug!("pod {name} is gone: {err}");
                let name = self.refresh().await?;
                self.read_logs(&name, since).await
            }
            result => result,
        }
    }

    async fn read_logs(&self, name: &str, since: Option<&str>) -> Result<String> {
        let mut command = self
            .pods
            .cli()
            .run("logs")
            .args(["-n", self.namespace.as_str(), name]);

        if let Some(since) = since {
            command = command.arg(format!("--since={since}"));
        }

        command.output().await
    }
}
