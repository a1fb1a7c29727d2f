//! Denormalization of a single cluster's flat team-status payload into the
//! nested presentation tree.
//!
//! The upstream reports several independent maps keyed by resource-type
//! name, one per (resource, kind) pair, plus per-user, per-node and per-pod
//! arrays. The tree groups them the way the frontend renders them:
//! team -> type -> resource -> kind, and worker -> pod -> resource. This is
//! a pure transformation; it never touches the network.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Flat team-status payload as one cluster reports it. Every section is
/// optional; missing maps simply contribute nothing to the tree.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TeamStatusPayload {
    #[serde(default)]
    pub cpu_capacity: HashMap<String, f64>,
    #[serde(default)]
    pub cpu_unschedulable: HashMap<String, f64>,
    #[serde(default)]
    pub cpu_used: HashMap<String, f64>,
    #[serde(default)]
    pub cpu_preemptable_used: HashMap<String, f64>,
    #[serde(default)]
    pub cpu_available: HashMap<String, f64>,

    #[serde(default)]
    pub gpu_capacity: HashMap<String, f64>,
    #[serde(default)]
    pub gpu_unschedulable: HashMap<String, f64>,
    #[serde(default)]
    pub gpu_used: HashMap<String, f64>,
    #[serde(default)]
    pub gpu_preemptable_used: HashMap<String, f64>,
    #[serde(default)]
    pub gpu_available: HashMap<String, f64>,

    #[serde(default)]
    pub memory_capacity: HashMap<String, f64>,
    #[serde(default)]
    pub memory_unschedulable: HashMap<String, f64>,
    #[serde(default)]
    pub memory_used: HashMap<String, f64>,
    #[serde(default)]
    pub memory_preemptable_used: HashMap<String, f64>,
    #[serde(default)]
    pub memory_available: HashMap<String, f64>,

    #[serde(default)]
    pub user_status: Vec<UserUsage>,
    #[serde(default)]
    pub user_status_preemptable: Vec<UserUsage>,
    /// Per-user booked-versus-idle GPU report.
    #[serde(default)]
    pub gpu_idle: HashMap<String, GpuIdleReport>,
    #[serde(default)]
    pub node_status: Vec<NodeStatus>,
    #[serde(default)]
    pub pod_status: Vec<PodStatus>,
    // Upstream's spelling.
    #[serde(default, rename = "AvaliableJobNum")]
    pub running_jobs: Option<Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GpuIdleReport {
    #[serde(default)]
    pub booked: Option<f64>,
    #[serde(default)]
    pub idle: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserUsage {
    #[serde(default, rename = "userName")]
    pub user_name: String,
    #[serde(default, rename = "userCPU")]
    pub cpu: HashMap<String, f64>,
    #[serde(default, rename = "userGPU")]
    pub gpu: HashMap<String, f64>,
    #[serde(default, rename = "userMemory")]
    pub memory: HashMap<String, f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, Value>,
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default, rename = "InternalIP")]
    pub internal_ip: Option<String>,

    #[serde(default)]
    pub cpu_capacity: HashMap<String, f64>,
    #[serde(default)]
    pub cpu_used: HashMap<String, f64>,
    #[serde(default)]
    pub cpu_preemptable_used: HashMap<String, f64>,
    #[serde(default)]
    pub cpu_allocatable: HashMap<String, f64>,

    #[serde(default)]
    pub gpu_capacity: HashMap<String, f64>,
    #[serde(default)]
    pub gpu_used: HashMap<String, f64>,
    #[serde(default)]
    pub gpu_preemptable_used: HashMap<String, f64>,
    #[serde(default)]
    pub gpu_allocatable: HashMap<String, f64>,

    #[serde(default)]
    pub memory_capacity: HashMap<String, f64>,
    #[serde(default)]
    pub memory_used: HashMap<String, f64>,
    #[serde(default)]
    pub memory_preemptable_used: HashMap<String, f64>,
    #[serde(default)]
    pub memory_allocatable: HashMap<String, f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PodStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub vc_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub cpu: HashMap<String, f64>,
    #[serde(default)]
    pub gpu: HashMap<String, f64>,
    #[serde(default)]
    pub memory: HashMap<String, f64>,
}

/// Nested resource-usage tree built fresh per request.
#[derive(Debug, Default, Serialize, PartialEq)]
pub struct StatusTree {
    /// Cluster display settings, filled in by the HTTP layer.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, Value>,
    #[serde(rename = "runningJobs", skip_serializing_if = "Option::is_none")]
    pub running_jobs: Option<Value>,
    pub types: BTreeMap<String, ResourceTriple>,
    pub users: BTreeMap<String, UserEntry>,
    pub workers: BTreeMap<String, WorkerEntry>,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct ResourceAmounts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unschedulable: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preemptable: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<f64>,
}

impl ResourceAmounts {
    pub fn is_empty(&self) -> bool {
        self == &ResourceAmounts::default()
    }
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct ResourceTriple {
    #[serde(skip_serializing_if = "ResourceAmounts::is_empty")]
    pub cpu: ResourceAmounts,
    #[serde(skip_serializing_if = "ResourceAmounts::is_empty")]
    pub gpu: ResourceAmounts,
    #[serde(skip_serializing_if = "ResourceAmounts::is_empty")]
    pub memory: ResourceAmounts,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct UserEntry {
    pub types: BTreeMap<String, ResourceTriple>,
    #[serde(skip_serializing_if = "GpuIdle::is_empty")]
    pub gpu: GpuIdle,
}

/// A user's booked and idle GPU counts.
#[derive(Debug, Default, Serialize, PartialEq)]
pub struct GpuIdle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booked: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle: Option<f64>,
}

impl GpuIdle {
    pub fn is_empty(&self) -> bool {
        self == &GpuIdle::default()
    }
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct WorkerAmounts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preemptable: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocatable: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unschedulable: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<f64>,
}

impl WorkerAmounts {
    pub fn is_empty(&self) -> bool {
        self == &WorkerAmounts::default()
    }

    // The upstream does not report these directly for nodes.
    fn derive(&mut self) {
        if let (Some(total), Some(allocatable)) = (self.total, self.allocatable) {
            self.unschedulable = Some(total - allocatable);
        }
        if let (Some(allocatable), Some(used)) = (self.allocatable, self.used) {
            self.available = Some(allocatable - used);
        }
    }
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct WorkerResources {
    #[serde(skip_serializing_if = "WorkerAmounts::is_empty")]
    pub cpu: WorkerAmounts,
    #[serde(skip_serializing_if = "WorkerAmounts::is_empty")]
    pub gpu: WorkerAmounts,
    #[serde(skip_serializing_if = "WorkerAmounts::is_empty")]
    pub memory: WorkerAmounts,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct WorkerEntry {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// The node's hardware type, taken from its capacity map key.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    pub status: WorkerResources,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub pods: BTreeMap<String, PodEntry>,
}

#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodEntry {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
}

#[derive(Clone, Copy)]
enum Resource {
    Cpu,
    Gpu,
    Memory,
}

#[derive(Clone, Copy)]
enum Kind {
    Total,
    Unschedulable,
    Used,
    Preemptable,
    Available,
}

fn amounts(triple: &mut ResourceTriple, resource: Resource) -> &mut ResourceAmounts {
    match resource {
        Resource::Cpu => &mut triple.cpu,
        Resource::Gpu => &mut triple.gpu,
        Resource::Memory => &mut triple.memory,
    }
}

fn slot(amounts: &mut ResourceAmounts, kind: Kind) -> &mut Option<f64> {
    match kind {
        Kind::Total => &mut amounts.total,
        Kind::Unschedulable => &mut amounts.unschedulable,
        Kind::Used => &mut amounts.used,
        Kind::Preemptable => &mut amounts.preemptable,
        Kind::Available => &mut amounts.available,
    }
}

fn is_active_worker(node: &NodeStatus) -> bool {
    node.labels
        .get("worker")
        .and_then(Value::as_str)
        .is_some_and(|v| v == "active")
}

/// Reshape a cluster's flat team-status payload into a [`StatusTree`].
pub fn denormalize(payload: &TeamStatusPayload) -> StatusTree {
    let mut tree = StatusTree {
        running_jobs: payload.running_jobs.clone(),
        ..StatusTree::default()
    };

    let team_maps: [(&HashMap<String, f64>, Resource, Kind); 15] = [
        (&payload.cpu_capacity, Resource::Cpu, Kind::Total),
        (&payload.cpu_unschedulable, Resource::Cpu, Kind::Unschedulable),
        (&payload.cpu_used, Resource::Cpu, Kind::Used),
        (&payload.cpu_preemptable_used, Resource::Cpu, Kind::Preemptable),
        (&payload.cpu_available, Resource::Cpu, Kind::Available),
        (&payload.gpu_capacity, Resource::Gpu, Kind::Total),
        (&payload.gpu_unschedulable, Resource::Gpu, Kind::Unschedulable),
        (&payload.gpu_used, Resource::Gpu, Kind::Used),
        (&payload.gpu_preemptable_used, Resource::Gpu, Kind::Preemptable),
        (&payload.gpu_available, Resource::Gpu, Kind::Available),
        (&payload.memory_capacity, Resource::Memory, Kind::Total),
        (&payload.memory_unschedulable, Resource::Memory, Kind::Unschedulable),
        (&payload.memory_used, Resource::Memory, Kind::Used),
        (&payload.memory_preemptable_used, Resource::Memory, Kind::Preemptable),
        (&payload.memory_available, Resource::Memory, Kind::Available),
    ];
    for (map, resource, kind) in team_maps {
        for (type_name, value) in map {
            let triple = tree.types.entry(type_name.clone()).or_default();
            *slot(amounts(triple, resource), kind) = Some(*value);
        }
    }

    for (users, kind) in [
        (&payload.user_status, Kind::Used),
        (&payload.user_status_preemptable, Kind::Preemptable),
    ] {
        for user in users.iter().filter(|u| !u.user_name.is_empty()) {
            let entry = tree.users.entry(user.user_name.clone()).or_default();
            for (map, resource) in [
                (&user.cpu, Resource::Cpu),
                (&user.gpu, Resource::Gpu),
                (&user.memory, Resource::Memory),
            ] {
                for (type_name, value) in map {
                    let triple = entry.types.entry(type_name.clone()).or_default();
                    *slot(amounts(triple, resource), kind) = Some(*value);
                }
            }
        }
    }

    for (user_name, report) in &payload.gpu_idle {
        let entry = tree.users.entry(user_name.clone()).or_default();
        entry.gpu.booked = report.booked;
        entry.gpu.idle = report.idle;
    }

    for node in payload.node_status.iter().filter(|n| is_active_worker(n)) {
        let worker = tree.workers.entry(node.name.clone()).or_default();
        worker.healthy = !node.unschedulable;
        worker.ip = node.internal_ip.clone();

        // Node maps are single-valued, keyed by the node's hardware type.
        for (type_name, value) in &node.cpu_capacity {
            worker.node_type = Some(type_name.clone());
            worker.status.cpu.total = Some(*value);
        }
        for value in node.cpu_used.values() {
            worker.status.cpu.used = Some(*value);
        }
        for value in node.cpu_preemptable_used.values() {
            worker.status.cpu.preemptable = Some(*value);
        }
        for value in node.cpu_allocatable.values() {
            worker.status.cpu.allocatable = Some(*value);
        }

        for value in node.gpu_capacity.values() {
            worker.status.gpu.total = Some(*value);
        }
        for value in node.gpu_used.values() {
            worker.status.gpu.used = Some(*value);
        }
        for value in node.gpu_preemptable_used.values() {
            worker.status.gpu.preemptable = Some(*value);
        }
        for value in node.gpu_allocatable.values() {
            worker.status.gpu.allocatable = Some(*value);
        }

        for value in node.memory_capacity.values() {
            worker.status.memory.total = Some(*value);
        }
        for value in node.memory_used.values() {
            worker.status.memory.used = Some(*value);
        }
        for value in node.memory_preemptable_used.values() {
            worker.status.memory.preemptable = Some(*value);
        }
        for value in node.memory_allocatable.values() {
            worker.status.memory.allocatable = Some(*value);
        }

        worker.status.cpu.derive();
        worker.status.gpu.derive();
        worker.status.memory.derive();
    }

    for pod in &payload.pod_status {
        let worker = tree.workers.entry(pod.node_name.clone()).or_default();
        let entry = worker.pods.entry(pod.name.clone()).or_default();
        entry.job_id = pod.job_id.clone();
        entry.team = pod.vc_name.clone();
        entry.user = pod.username.clone();
        entry.cpu = pod.cpu.values().next().copied();
        entry.gpu = pod.gpu.values().next().copied();
        entry.memory = pod.memory.values().next().copied();
    }

    tree
}
