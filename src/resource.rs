use std::fmt::{self, Display};

use futures::future::BoxFuture;
use kube::{core::DynamicObject, ResourceExt};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    check::{self, Check},
    cli::{Cli, CommandBuilder, Executor},
    poll::PollSpec,
    Error, Result,
};

pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// Identifies zero, one or many cluster objects. Without a name it denotes
/// the collection of objects of `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: &str) -> Self {
        ResourceRef {
            kind: kind.to_string(),
            namespace: None,
            name: None,
        }
    }

    pub fn namespaced(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn is_collection(&self) -> bool {
        self.name.as_deref().map_or(true, str::is_empty)
    }

    /// `kind [name] [-n namespace]`, as passed to the CLI.
    fn target_args(&self) -> Vec<String> {
        let mut args = vec![self.kind.clone()];

        if let Some(name) = self.name.as_ref().filter(|name| !name.is_empty()) {
            args.push(name.clone());
        }

        if let Some(namespace) = &self.namespace {
            args.push("-n".to_string());
            args.push(namespace.clone());
        }

        args
    }
}

impl Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.namespace) {
            (Some(name), Some(namespace)) => write!(f, "{}/{name} in {namespace}", self.kind),
            (Some(name), None) => write!(f, "{}/{name}", self.kind),
            (None, Some(namespace)) => write!(f, "{} in {namespace}", self.kind),
            (None, None) => write!(f, "{}", self.kind),
        }
    }
}

/// A partial update, sent with `--type merge|json|strategic`.
#[derive(Debug, Clone)]
pub enum Patch {
    Merge(Value),
    Json(json_patch::Patch),
    Strategic(Value),
}

impl Patch {
    pub fn type_name(&self) -> &'static str {
        match self {
            Patch::Merge(_) => "merge",
            Patch::Json(_) => "json",
            Patch::Strategic(_) => "strategic",
        }
    }

    pub fn body(&self) -> Result<String> {
        Ok(match self {
            Patch::Merge(body) | Patch::Strategic(body) => serde_json::to_string(body)?,
            Patch::Json(patch) => serde_json::to_string(patch)?,
        })
    }
}

/// A single named cluster object.
#[derive(Debug)]
pub struct Resource<E> {
    cli: Cli<E>,
    reference: ResourceRef,
}

impl<E> Clone for Resource<E> {
    fn clone(&self) -> Self {
        Resource {
            cli: self.cli.clone(),
            reference: self.reference.clone(),
        }
    }
}

impl<E: Executor> Resource<E> {
    pub fn new(cli: Cli<E>, kind: &str, name: &str) -> Self {
        Resource {
            cli,
            reference: ResourceRef::new(kind).named(name),
        }
    }

    pub fn namespaced(cli: Cli<E>, namespace: &str, kind: &str, name: &str) -> Self {
        Resource {
            cli,
            reference: ResourceRef::new(kind).namespaced(namespace).named(name),
        }
    }

    pub fn from_ref(cli: Cli<E>, reference: ResourceRef) -> Self {
        Resource { cli, reference }
    }

    pub fn reference(&self) -> &ResourceRef {
        &self.reference
    }

    pub fn kind(&self) -> &str {
        &self.reference.kind
    }

    pub fn name(&self) -> &str {
        self.reference.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.reference.namespace.as_deref()
    }

    pub fn cli(&self) -> &Cli<E> {
        &self.cli
    }

    fn command(&self, verb: &str) -> CommandBuilder<'_, E> {
        self.cli.run(verb).args(self.reference.target_args())
    }

    /// Create the object described by `manifest` and return a handle to it.
    /// Nothing is run unless the manifest names its `kind` and `metadata.name`.
    pub async fn create(cli: Cli<E>, manifest: &Value) -> Result<Self> {
        let field = |pointer: &str| {
            manifest
                .pointer(pointer)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| Error::InvalidManifest(format!("missing {pointer}")))
        };
        let kind = field("/kind")?.to_lowercase();
        let name = field("/metadata/name")?;

        let mut reference = ResourceRef::new(&kind);
        reference.name = Some(name.to_string());
        reference.namespace = manifest
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(String::from);

        cli.run("create")
            .args(["-f", "-"])
            .stdin(serde_json::to_string(manifest)?)
            .execute()
            .await?;

        info!("created {reference}");
        Ok(Resource { cli, reference })
    }

    /// Evaluate a JSONPath `query` (e.g. `{.status.machineCount}`) against
    /// the live object.
    pub async fn get(&self, query: &str) -> Result<String> {
        self.command("get")
            .arg("-o")
            .arg(format!("jsonpath={query}"))
            .arg("--allow-missing-template-keys=false")
            .output()
            .await
    }

    /// Like [`Resource::get`], falling back to `default` on any failure.
    pub async fn get_safe(&self, query: &str, default: &str) -> String {
        match self.get(query).await {
            Ok(value) => value,
            Err(err) => {
                debug!("{query} of {} unavailable, using {default:?}: {err}", self.reference);
                default.to_string()
            }
        }
    }

    /// Like [`Resource::get`], failing the current test on any error.
    #[track_caller]
    pub fn get_or_fail(&self, query: &str) -> impl std::future::Future<Output = String> + '_ {
        let caller = std::panic::Location::caller();
        let query = query.to_string();

        async move {
            match self.get(&query).await {
                Ok(value) => value,
                Err(err) => panic!("{caller}: failed to get {query} of {}: {err}", self.reference),
            }
        }
    }

    pub async fn exists(&self) -> bool {
        self.get("{.}").await.is_ok()
    }

    /// Read the whole object, deserialized as `T`.
    pub async fn object<T: DeserializeOwned>(&self) -> Result<T> {
        let output = self.command("get").args(["-o", "json"]).output().await?;
        Ok(serde_json::from_str(&output)?)
    }

    pub async fn json(&self) -> Result<Value> {
        self.object().await
    }

    pub async fn patch(&self, patch: &Patch) -> Result<()> {
        let result = self
            .command("patch")
            .args(["--type", patch.type_name()])
            .arg("-p")
            .arg(patch.body()?)
            .execute()
            .await;

        match result {
            Ok(()) => {
                info!("patched {} ({})", self.reference, patch.type_name());
                Ok(())
            }
            Err(Error::Cli { stderr, .. }) => {
                warn!("patch of {} rejected: {stderr}", self.reference);
                Err(Error::PatchRejected {
                    resource: self.reference.to_string(),
                    stderr,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Delete the object. A missing object is reported as
    /// [`Error::NotFound`]; callers decide whether that counts as success.
    pub async fn delete(&self) -> Result<()> {
        self.command("delete").execute().await?;
        info!("deleted {}", self.reference);
        Ok(())
    }

    /// A value producer for `query`, for sampling with
    /// [`PollSpec::until_value`]. Failed queries sample as an empty string.
    pub fn poll(&self, query: &str) -> impl FnMut() -> BoxFuture<'static, String> {
        let resource = self.clone();
        let query = query.to_string();

        move || {
            let resource = resource.clone();
            let query = query.clone();
            Box::pin(async move { resource.get(&query).await.unwrap_or_default() })
        }
    }

    /// Wait until `query` evaluates to `expected`.
    pub async fn wait_until_equals(
        &self,
        spec: &PollSpec,
        query: &str,
        expected: &str,
    ) -> Result<String> {
        spec.until_value(
            &format!("{query} of {} to be {expected:?}", self.reference),
            self.poll(query),
            |value| value == expected,
        )
        .await
    }

    pub async fn wait_until_exists(&self, spec: &PollSpec) -> Result<()> {
        spec.until(&format!("{} to exist", self.reference), move || async move {
            Ok(self.exists().await)
        })
        .await
    }

    pub async fn wait_until_gone(&self, spec: &PollSpec) -> Result<()> {
        spec.until(&format!("{} to be gone", self.reference), move || async move {
            Ok(!self.exists().await)
        })
        .await
    }

    /// Wait until every check passes against the same read of the object,
    /// returning that read.
    pub async fn wait_for(&self, spec: &PollSpec, checks: &[Check<Value>]) -> Result<Value> {
        spec.until_ok(
            &format!("{}: {}", self.reference, check::names(checks)),
            move || async move {
                let object = self.json().await.map_err(|err| err.to_string())?;
                check::perform_all(checks, &object)?;
                Ok(object)
            },
        )
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    CreationTimestamp,
    Zone,
}

#[derive(Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// A collection of objects of one kind, narrowed by label selectors and
/// ordered by sort keys. Modifiers accumulate until [`ResourceList::clear`].
#[derive(Debug)]
pub struct ResourceList<E> {
    cli: Cli<E>,
    kind: String,
    namespace: Option<String>,
    selectors: Vec<String>,
    sort: Vec<SortKey>,
}

impl<E: Executor> ResourceList<E> {
    pub fn new(cli: Cli<E>, kind: &str) -> Self {
        ResourceList {
            cli,
            kind: kind.to_string(),
            namespace: None,
            selectors: vec![],
            sort: vec![],
        }
    }

    pub fn namespaced(cli: Cli<E>, namespace: &str, kind: &str) -> Self {
        ResourceList {
            namespace: Some(namespace.to_string()),
            ..ResourceList::new(cli, kind)
        }
    }

    pub fn cli(&self) -> &Cli<E> {
        &self.cli
    }

    pub fn by_label(&mut self, selector: &str) -> &mut Self {
        self.selectors.push(selector.to_string());
        self
    }

    /// Order by creation time, oldest first.
    pub fn sort_by_timestamp(&mut self) -> &mut Self {
        self.sort.push(SortKey::CreationTimestamp);
        self
    }

    /// Order by `topology.kubernetes.io/zone`, unzoned objects first.
    pub fn sort_by_zone(&mut self) -> &mut Self {
        self.sort.push(SortKey::Zone);
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.selectors.clear();
        self.sort.clear();
        self
    }

    /// The listed objects, in modifier order. Sort keys apply in the order
    /// they were added; ties keep the order the CLI returned.
    pub async fn items<T>(&self) -> Result<Vec<T>>
    where
        T: kube::Resource + DeserializeOwned,
    {
        let mut command = self.cli.run("get").arg(&self.kind);

        if let Some(namespace) = &self.namespace {
            command = command.args(["-n", namespace.as_str()]);
        }

        if !self.selectors.is_empty() {
            command = command.arg("-l").arg(self.selectors.join(","));
        }

        let output = command.args(["-o", "json"]).output().await?;
        let mut items = serde_json::from_str::<List<T>>(&output)?.items;

        items.sort_by(|a, b| {
            self.sort
                .iter()
                .map(|key| match key {
                    SortKey::CreationTimestamp => creation_time(a).cmp(&creation_time(b)),
                    SortKey::Zone => a.labels().get(ZONE_LABEL).cmp(&b.labels().get(ZONE_LABEL)),
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(items)
    }

    pub async fn objects(&self) -> Result<Vec<DynamicObject>> {
        self.items().await
    }

    pub async fn names(&self) -> Result<Vec<String>> {
        Ok(self
            .objects()
            .await?
            .iter()
            .map(ResourceExt::name_any)
            .collect())
    }

    /// One handle per matching object. No match is an empty list, not an error.
    pub async fn get_all(&self) -> Result<Vec<Resource<E>>> {
        Ok(self
            .objects()
            .await?
            .iter()
            .map(|object| {
                let mut reference = ResourceRef::new(&self.kind).named(&object.name_any());
                reference.namespace = object.namespace().or_else(|| self.namespace.clone());
                Resource::from_ref(self.cli.clone(), reference)
            })
            .collect())
    }
}

fn creation_time<T: kube::Resource>(object: &T) -> Option<impl Ord> {
    object.meta().creation_timestamp.as_ref().map(|time| time.0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn references() {
        let pool = ResourceRef::new("mcp").named("worker");
        assert!(!pool.is_collection());
        assert_eq!(pool.to_string(), "mcp/worker");
        assert_eq!(pool.target_args(), ["mcp", "worker"]);

        let pods = ResourceRef::new("pod").namespaced("openshift-dns");
        assert!(pods.is_collection());
        assert_eq!(pods.target_args(), ["pod", "-n", "openshift-dns"]);
        assert!(ResourceRef::new("node").named("").is_collection());
    }

    #[test]
    fn patch_bodies() {
        let merge = Patch::Merge(json!({"spec": {"paused": true}}));
        assert_eq!(merge.type_name(), "merge");
        assert_eq!(merge.body().unwrap(), r#"{"spec":{"paused":true}}"#);

        let patch: json_patch::Patch =
            serde_json::from_value(json!([{"op": "remove", "path": "/spec/paused"}])).unwrap();
        let json = Patch::Json(patch);
        assert_eq!(json.type_name(), "json");
        assert_eq!(
            serde_json::from_str::<Value>(&json.body().unwrap()).unwrap(),
            json!([{"op": "remove", "path": "/spec/paused"}])
        );
    }
}
