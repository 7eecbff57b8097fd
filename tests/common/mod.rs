#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use clusterwait::{
    cli::{Executor, Invocation},
    Cli, Error, Result,
};
use serde_json::{json, Value};

/// (kind, namespace, name). Cluster scoped objects have an empty namespace.
type Key = (String, String, String);

/// A sequence of states an object goes through, one per read. The last
/// state sticks. `None` means the object does not exist.
#[derive(Debug, Default)]
struct Scripted {
    states: Vec<Option<Value>>,
    cursor: usize,
    reads: usize,
}

impl Scripted {
    fn current(&self) -> Option<&Value> {
        self.states.get(self.cursor).and_then(Option::as_ref)
    }

    fn read(&mut self) -> Option<Value> {
        let state = self.current().cloned();
        self.reads += 1;

        if self.cursor + 1 < self.states.len() {
            self.cursor += 1;
        }

        state
    }

    /// Writes replace whatever was scripted after the current state.
    fn write(&mut self, state: Option<Value>) {
        self.states = vec![state];
        self.cursor = 0;
    }
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, Scripted>,
    logs: HashMap<(String, String), String>,
    invocations: Vec<Invocation>,
}

/// An in-memory stand-in for the cluster CLI.
///
/// Understands the subset of `get`, `patch`, `delete`, `create` and `logs`
/// the library uses, and lets tests script how objects change between
/// reads.
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

/// Flags followed by a value, rather than `--flag=value`.
const VALUE_FLAGS: &[&str] = &["-n", "-o", "-l", "-p", "-f", "--type"];

struct Parsed<'a> {
    positional: Vec<&'a str>,
    flags: HashMap<&'a str, &'a str>,
}

fn parse(args: &[String]) -> Parsed<'_> {
    let mut parsed = Parsed {
        positional: vec![],
        flags: HashMap::new(),
    };

    let mut args = args.iter().skip(1);
    while let Some(arg) = args.next() {
        if let Some((flag, value)) = arg.split_once('=').filter(|_| arg.starts_with("--")) {
            parsed.flags.insert(flag, value);
        } else if VALUE_FLAGS.contains(&arg.as_str()) {
            let value = args.next().map(String::as_str).unwrap_or_default();
            parsed.flags.insert(arg.as_str(), value);
        } else {
            parsed.positional.push(arg.as_str());
        }
    }

    parsed
}

fn key(kind: &str, namespace: Option<&str>, name: &str) -> Key {
    (
        kind.to_string(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

fn not_found(kind: &str, name: &str) -> Error {
    Error::NotFound {
        resource: format!("{kind}/{name}"),
        stderr: format!(r#"Error from server (NotFound): {kind} "{name}" not found"#),
    }
}

fn failed(invocation: &Invocation, stderr: String) -> Error {
    Error::Cli {
        command: invocation.to_string(),
        stderr,
        code: Some(1),
    }
}

fn matches_selector(object: &Value, selector: &str) -> bool {
    let labels = &object["metadata"]["labels"];

    selector.split(',').all(|term| match term.split_once('=') {
        Some((label, value)) => labels[label].as_str() == Some(value),
        None => labels.get(term).is_some(),
    })
}

/// Evaluates the simple `{.a.b.c}` JSONPath queries used in tests.
fn jsonpath(object: &Value, query: &str) -> Option<String> {
    let path = query.strip_prefix("{.")?.strip_suffix('}')?;

    let value = path
        .split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(object, |value, segment| value.get(segment))?;

    Some(match value {
        Value::String(value) => value.clone(),
        value => value.to_string(),
    })
}

impl FakeCluster {
    pub fn new() -> Self {
        FakeCluster::default()
    }

    /// Add an object that stays as it is until changed through the CLI.
    pub fn insert(&self, kind: &str, object: Value) {
        let namespace = object["metadata"]["namespace"].as_str().map(String::from);
        let name = object["metadata"]["name"].as_str().unwrap_or_default().to_string();
        self.script(kind, namespace.as_deref(), &name, vec![Some(object)]);
    }

    /// Script the states an object is read in, one per read.
    pub fn script(&self, kind: &str, namespace: Option<&str>, name: &str, states: Vec<Option<Value>>) {
        self.state.lock().unwrap().objects.insert(
            key(kind, namespace, name),
            Scripted {
                states,
                ..Default::default()
            },
        );
    }

    /// The object as the next read would see it, without reading it.
    pub fn current(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&key(kind, namespace, name))
            .and_then(|object| object.current().cloned())
    }

    pub fn reads(&self, kind: &str, namespace: Option<&str>, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&key(kind, namespace, name))
            .map_or(0, |object| object.reads)
    }

    pub fn set_logs(&self, namespace: &str, pod: &str, logs: &str) {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert((namespace.to_string(), pod.to_string()), logs.to_string());
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().unwrap().invocations.clone()
    }

    pub fn invocations_of(&self, verb: &str) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|invocation| invocation.verb() == Some(verb))
            .collect()
    }

    fn handle(&self, invocation: &Invocation) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.invocations.push(invocation.clone());

        let parsed = parse(&invocation.args);
        let namespace = parsed.flags.get("-n").copied();

        match (invocation.verb(), parsed.positional.as_slice()) {
            (Some("get"), [kind, name]) => {
                let object = state
                    .objects
                    .get_mut(&key(kind, namespace, name))
                    .and_then(Scripted::read)
                    .ok_or_else(|| not_found(kind, name))?;

                match parsed.flags.get("-o").copied() {
                    Some("json") => Ok(object.to_string()),
                    Some(output) => {
                        let query = output.strip_prefix("jsonpath=").unwrap_or(output);
                        jsonpath(&object, query).ok_or_else(|| Error::NotFound {
                            resource: format!("{kind}/{name}"),
                            stderr: format!("error executing jsonpath {query:?}: {query} is not found"),
                        })
                    }
                    None => Ok(name.to_string()),
                }
            }

            (Some("get"), [kind]) => {
                let selector = parsed.flags.get("-l").copied();
                let items: Vec<Value> = state
                    .objects
                    .iter_mut()
                    .filter(|((k, ns, _), _)| k == kind && namespace.map_or(true, |n| n == ns))
                    .filter_map(|(_, object)| object.read())
                    .filter(|object| selector.map_or(true, |s| matches_selector(object, s)))
                    .collect();

                Ok(json!({ "apiVersion": "v1", "kind": "List", "items": items }).to_string())
            }

            (Some("patch"), [kind, name]) => {
                let object = state
                    .objects
                    .get_mut(&key(kind, namespace, name))
                    .filter(|object| object.current().is_some())
                    .ok_or_else(|| not_found(kind, name))?;

                let mut document = object.current().cloned().unwrap_or_default();
                let body: Value = serde_json::from_str(parsed.flags.get("-p").copied().unwrap_or("{}"))?;

                match parsed.flags.get("--type").copied() {
                    Some("json") => {
                        let patch: json_patch::Patch = serde_json::from_value(body)?;
                        json_patch::patch(&mut document, &patch.0)
                            .map_err(|err| failed(invocation, format!("The request is invalid: {err}")))?;
                    }
                    _ => json_patch::merge(&mut document, &body),
                }

                object.write(Some(document));
                Ok(format!("{kind}/{name} patched"))
            }

            (Some("delete"), [kind, name]) => {
                let object = state
                    .objects
                    .get_mut(&key(kind, namespace, name))
                    .filter(|object| object.current().is_some())
                    .ok_or_else(|| not_found(kind, name))?;

                object.write(None);
                Ok(format!("{kind} \"{name}\" deleted"))
            }

            (Some("create"), []) => {
                let manifest: Value = serde_yaml::from_str(invocation.stdin.as_deref().unwrap_or_default())
                    .map_err(|err| failed(invocation, err.to_string()))?;

                let kind = manifest["kind"].as_str().unwrap_or_default().to_lowercase();
                let name = manifest["metadata"]["name"].as_str().unwrap_or_default();
                let key = key(&kind, manifest["metadata"]["namespace"].as_str(), name);

                if state.objects.get(&key).is_some_and(|object| object.current().is_some()) {
                    return Err(failed(
                        invocation,
                        format!(r#"Error from server (AlreadyExists): {kind} "{name}" already exists"#),
                    ));
                }

                let output = format!("{kind}/{name} created");
                state.objects.entry(key).or_default().write(Some(manifest));
                Ok(output)
            }

            (Some("logs"), [pod]) => {
                let namespace = namespace.unwrap_or_default();
                let exists = state
                    .objects
                    .get(&key("pod", Some(namespace), pod))
                    .is_some_and(|object| object.current().is_some());

                if !exists {
                    return Err(not_found("pod", pod));
                }

                Ok(state
                    .logs
                    .get(&(namespace.to_string(), pod.to_string()))
                    .cloned()
                    .unwrap_or_default())
            }

            _ => Err(failed(invocation, format!("unsupported command: {invocation}"))),
        }
    }
}

impl Executor for FakeCluster {
    async fn execute(&self, invocation: &Invocation) -> Result<String> {
        self.handle(invocation)
    }
}

pub fn cli(cluster: FakeCluster) -> Cli<FakeCluster> {
    Cli::new(cluster)
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init()
        .ok();
}

/// Status conditions as the machine config operator reports them.
fn pool_conditions(updated: bool) -> Value {
    let (updated, updating) = if updated {
        ("True", "False")
    } else {
        ("False", "True")
    };

    json!([
        { "type": "Updated", "status": updated },
        { "type": "Updating", "status": updating },
        { "type": "Degraded", "status": "False" },
    ])
}

pub fn pool(name: &str, machines: u32, updated_machines: u32, degraded: u32) -> Value {
    json!({
        "apiVersion": "machineconfiguration.openshift.io/v1",
        "kind": "MachineConfigPool",
        "metadata": { "name": name },
        "spec": { "paused": false },
        "status": {
            "machineCount": machines,
            "updatedMachineCount": updated_machines,
            "readyMachineCount": updated_machines,
            "degradedMachineCount": degraded,
            "conditions": pool_conditions(updated_machines == machines && degraded == 0),
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Updating,
    Done,
}

/// A worker node in `zone`, created at `created` (RFC 3339).
pub fn node(name: &str, zone: &str, created: &str, phase: Phase) -> Value {
    let (state, current, desired) = match phase {
        Phase::Idle => ("Done", "rendered-old", "rendered-old"),
        Phase::Updating => ("Working", "rendered-old", "rendered-new"),
        Phase::Done => ("Done", "rendered-new", "rendered-new"),
    };

    json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {
            "name": name,
            "creationTimestamp": created,
            "labels": {
                "node-role.kubernetes.io/worker": "",
                "topology.kubernetes.io/zone": zone,
            },
            "annotations": {
                "machineconfiguration.openshift.io/state": state,
                "machineconfiguration.openshift.io/currentConfig": current,
                "machineconfiguration.openshift.io/desiredConfig": desired,
            }
        },
        "status": {
            "conditions": [{ "type": "Ready", "status": "True" }]
        }
    })
}

pub fn pod(namespace: &str, name: &str, app: &str, phase: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { "k8s-app": app },
        },
        "status": { "phase": phase }
    })
}
