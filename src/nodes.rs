use std::collections::{HashMap, HashSet};

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, info};

pub const STATE_ANNOTATION: &str = "machineconfiguration.openshift.io/state";
pub const CURRENT_CONFIG_ANNOTATION: &str = "machineconfiguration.openshift.io/currentConfig";
pub const DESIRED_CONFIG_ANNOTATION: &str = "machineconfiguration.openshift.io/desiredConfig";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Done,
    Working,
    Degraded,
    Unreconcilable,
    Unknown,
}

impl NodeState {
    pub fn of(node: &Node) -> NodeState {
        match node.annotations().get(STATE_ANNOTATION).map(String::as_str) {
            Some("Done") => NodeState::Done,
            Some("Working") => NodeState::Working,
            Some("Degraded") => NodeState::Degraded,
            Some("Unreconcilable") => NodeState::Unreconcilable,
            _ => NodeState::Unknown,
        }
    }
}

/// The node is applying a configuration, or has been told to.
pub fn is_updating(node: &Node) -> bool {
    let annotations = node.annotations();

    NodeState::of(node) == NodeState::Working
        || matches!(
            (
                annotations.get(CURRENT_CONFIG_ANNOTATION),
                annotations.get(DESIRED_CONFIG_ANNOTATION),
            ),
            (Some(current), Some(desired)) if current != desired
        )
}

pub fn is_ready(node: &Node) -> bool {
    node.status
        .iter()
        .flat_map(|status| status.conditions.iter().flatten())
        .any(|condition| condition.type_ == "Ready" && condition.status == "True")
}

/// Records the order in which nodes start updating, from repeated snapshots
/// of a pool's nodes.
#[derive(Debug, Default, Clone)]
pub struct UpdateOrderRecorder {
    observed: Vec<String>,
    seen: HashSet<String>,
    /// Position of each node in the expected order.
    rank: HashMap<String, usize>,
    updating: usize,
    peak: usize,
}

impl UpdateOrderRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes that start within the same snapshot are recorded in their
    /// `expected` order, since their actual order can't be told apart.
    pub fn with_expected_order(expected: &[String]) -> Self {
        UpdateOrderRecorder {
            rank: expected
                .iter()
                .enumerate()
                .map(|(index, name)| (name.clone(), index))
                .collect(),
            ..Self::default()
        }
    }

    /// Take a snapshot, returning how many nodes are updating in it.
    ///
    /// Nodes seen updating for the first time are appended to the observed
    /// order. Several starting within one snapshot are appended in expected
    /// order, then by name.
    pub fn observe<'a>(&mut self, nodes: impl IntoIterator<Item = &'a Node>) -> usize {
        let mut updating: Vec<String> = nodes
            .into_iter()
            .filter(|node| is_updating(node))
            .map(ResourceExt::name_any)
            .collect();
        updating.sort_by(|a, b| {
            let rank = |name: &String| self.rank.get(name).copied().unwrap_or(usize::MAX);
            rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
        });

        for name in &updating {
            if self.seen.insert(name.clone()) {
                info!(
                    "node {name} started updating at {}",
                    time::OffsetDateTime::now_utc()
                );
                self.observed.push(name.clone());
            }
        }

        debug!("{} node(s) updating: {updating:?}", updating.len());

        self.updating = updating.len();
        self.peak = self.peak.max(self.updating);
        self.updating
    }

    pub fn observed(&self) -> &[String] {
        &self.observed
    }

    pub fn updating(&self) -> usize {
        self.updating
    }

    /// Most nodes seen updating in a single snapshot.
    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn into_observed(self) -> Vec<String> {
        self.observed
    }
}
