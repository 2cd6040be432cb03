//! Operation ordering
//!
//! An [`OrderingStrategy`] turns a list of planned operations into a partial
//! order: for each operation, the operations it has to wait for. The
//! reconciler rejects orders containing a cycle before issuing anything.
//!
//! [`DefaultOrdering`]:
//! 1. creates, then updates, then deletes (each phase waits for the previous ones)
//! 2. within creates and updates, lower [`ResourceCategory`] first, and
//!    resources named in `rudder.io/depends-on` before their dependents
//! 3. deletes run the same order backwards: dependents before dependencies

use rudder_core::ResourceKey;
use std::collections::{BTreeSet, HashMap};

use super::plan::{OperationKind, PlannedOp};

/// Computes the partial order of a plan
pub trait OrderingStrategy: Send + Sync {
    /// For each operation (by index), the indices of the operations it waits for
    fn dependencies(&self, ops: &[PlannedOp]) -> Vec<Vec<usize>>;
}

/// Resource category for ordering
///
/// Resources are created in ascending order and deleted in descending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceCategory {
    /// CustomResourceDefinition - installed first
    Crd = 0,
    /// Namespace - created before namespace-scoped resources
    Namespace = 1,
    /// ResourceQuota, LimitRange, PodSecurityPolicy
    NamespaceConfig = 2,
    /// ClusterRole, ClusterRoleBinding
    ClusterRbac = 10,
    /// Role, RoleBinding, ServiceAccount
    NamespacedRbac = 11,
    /// ConfigMap, Secret
    Config = 20,
    /// PersistentVolume, PersistentVolumeClaim, StorageClass
    Storage = 21,
    /// NetworkPolicy, Service, Endpoints, Ingress
    Network = 30,
    /// Deployment, StatefulSet, DaemonSet, ReplicaSet, Pod
    Workload = 40,
    /// Job, CronJob
    Batch = 50,
    /// HorizontalPodAutoscaler, VerticalPodAutoscaler, PodDisruptionBudget
    Autoscaling = 60,
    /// Instances of custom resource definitions
    CustomResource = 70,
    Other = 100,
}

/// API groups served by Kubernetes itself
const CORE_GROUPS: &[&str] = &[
    "",
    "apps",
    "batch",
    "autoscaling",
    "policy",
    "networking.k8s.io",
    "rbac.authorization.k8s.io",
    "storage.k8s.io",
    "admissionregistration.k8s.io",
    "apiextensions.k8s.io",
    "certificates.k8s.io",
    "coordination.k8s.io",
    "discovery.k8s.io",
    "events.k8s.io",
    "flowcontrol.apiserver.k8s.io",
    "node.k8s.io",
    "scheduling.k8s.io",
];

impl ResourceCategory {
    /// Categorize a resource by its kind and apiVersion
    pub fn from_resource(kind: &str, api_version: &str) -> Self {
        match kind {
            "CustomResourceDefinition" => Self::Crd,
            "Namespace" => Self::Namespace,
            "ResourceQuota" | "LimitRange" | "PodSecurityPolicy" => Self::NamespaceConfig,
            "ClusterRole" | "ClusterRoleBinding" => Self::ClusterRbac,
            "Role" | "RoleBinding" | "ServiceAccount" => Self::NamespacedRbac,
            "ConfigMap" | "Secret" => Self::Config,
            "PersistentVolume" | "PersistentVolumeClaim" | "StorageClass" => Self::Storage,
            "NetworkPolicy" | "Service" | "Endpoints" | "Ingress" | "IngressClass" => Self::Network,
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Pod" => Self::Workload,
            "Job" | "CronJob" => Self::Batch,
            "HorizontalPodAutoscaler" | "VerticalPodAutoscaler" | "PodDisruptionBudget" => {
                Self::Autoscaling
            }
            _ if Self::is_custom_api_version(api_version) => Self::CustomResource,
            _ => Self::Other,
        }
    }

    /// Whether an apiVersion belongs to a non-core API group
    ///
    /// `v1` and `apps/v1` are core, `cert-manager.io/v1` is not.
    pub fn is_custom_api_version(api_version: &str) -> bool {
        let group = api_version.rsplit_once('/').map(|(g, _)| g).unwrap_or("");
        !CORE_GROUPS.contains(&group)
    }

    pub fn of(op: &PlannedOp) -> Self {
        Self::from_resource(&op.manifest.kind, op.manifest.api_version().unwrap_or("v1"))
    }

    pub fn rank(self) -> u32 {
        self as u32
    }
}

/// Phase barrier plus category and `depends-on` ordering
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOrdering;

/// Category ranks are spread out so a chain of depends-on within one
/// category never overtakes the next category
const CATEGORY_SPREAD: u32 = 1000;

fn phase(kind: OperationKind) -> u8 {
    match kind {
        OperationKind::Create => 0,
        OperationKind::Update => 1,
        OperationKind::Delete => 2,
    }
}

impl OrderingStrategy for DefaultOrdering {
    fn dependencies(&self, ops: &[PlannedOp]) -> Vec<Vec<usize>> {
        let index: HashMap<&ResourceKey, usize> =
            ops.iter().enumerate().map(|(i, op)| (&op.key, i)).collect();

        // depends-on edges restricted to the same phase
        let declared: Vec<Vec<usize>> = ops
            .iter()
            .map(|op| {
                op.manifest
                    .dependencies()
                    .iter()
                    .filter_map(|key| index.get(key).copied())
                    .filter(|&j| phase(ops[j].kind) == phase(op.kind))
                    .collect()
            })
            .collect();

        let ranks = effective_ranks(ops, &declared);

        let mut waits: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); ops.len()];
        for (i, op) in ops.iter().enumerate() {
            let deleting = op.kind == OperationKind::Delete;

            for (j, other) in ops.iter().enumerate() {
                if i == j {
                    continue;
                }
                let before = match phase(other.kind).cmp(&phase(op.kind)) {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Greater => false,
                    std::cmp::Ordering::Equal if deleting => ranks[j] > ranks[i],
                    std::cmp::Ordering::Equal => ranks[j] < ranks[i],
                };
                if before {
                    waits[i].insert(j);
                }
            }

            for &target in &declared[i] {
                if deleting {
                    waits[target].insert(i);
                } else {
                    waits[i].insert(target);
                }
            }
        }

        waits.into_iter().map(|w| w.into_iter().collect()).collect()
    }
}

/// Rank of every operation: its category rank, raised above every declared
/// dependency. Cyclic declarations are left for the cycle check to report.
fn effective_ranks(ops: &[PlannedOp], declared: &[Vec<usize>]) -> Vec<u32> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Visiting,
        Done,
    }

    fn visit(
        i: usize,
        ops: &[PlannedOp],
        declared: &[Vec<usize>],
        marks: &mut [Mark],
        ranks: &mut [u32],
    ) -> u32 {
        if marks[i] == Mark::Done {
            return ranks[i];
        }
        marks[i] = Mark::Visiting;

        let mut rank = ResourceCategory::of(&ops[i]).rank() * CATEGORY_SPREAD;
        for &dep in &declared[i] {
            if marks[dep] == Mark::Visiting {
                continue;
            }
            rank = rank.max(visit(dep, ops, declared, marks, ranks) + 1);
        }

        marks[i] = Mark::Done;
        ranks[i] = rank;
        rank
    }

    let mut marks = vec![Mark::New; ops.len()];
    let mut ranks = vec![0; ops.len()];
    for i in 0..ops.len() {
        visit(i, ops, declared, &mut marks, &mut ranks);
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_core::{Manifest, ManifestSet};

    use crate::reconcile::plan::plan;

    fn manifest(api_version: &str, kind: &str, name: &str, depends_on: Option<&str>) -> Manifest {
        let annotations = depends_on
            .map(|d| format!("\n  annotations:\n    rudder.io/depends-on: \"{}\"", d))
            .unwrap_or_default();
        Manifest::from_yaml(&format!(
            "apiVersion: {}\nkind: {}\nmetadata:\n  name: {}{}\n",
            api_version, kind, name, annotations
        ))
        .unwrap()
    }

    fn creates(manifests: Vec<Manifest>) -> Vec<PlannedOp> {
        let mut set = ManifestSet::new();
        for m in manifests {
            set.insert(m).unwrap();
        }
        plan(&set, &ManifestSet::new()).ops
    }

    fn names(ops: &[PlannedOp], deps: &[usize]) -> Vec<String> {
        deps.iter().map(|&i| ops[i].key.to_string()).collect()
    }

    #[test]
    fn test_resource_category() {
        assert_eq!(
            ResourceCategory::from_resource("CustomResourceDefinition", "apiextensions.k8s.io/v1"),
            ResourceCategory::Crd
        );
        assert_eq!(
            ResourceCategory::from_resource("ServiceAccount", "v1"),
            ResourceCategory::NamespacedRbac
        );
        assert_eq!(
            ResourceCategory::from_resource("Deployment", "apps/v1"),
            ResourceCategory::Workload
        );
        assert_eq!(
            ResourceCategory::from_resource("Certificate", "cert-manager.io/v1"),
            ResourceCategory::CustomResource
        );
        assert_eq!(
            ResourceCategory::from_resource("Binding", "v1"),
            ResourceCategory::Other
        );
        assert!(ResourceCategory::Crd < ResourceCategory::Namespace);
        assert!(ResourceCategory::Config < ResourceCategory::Workload);
        assert!(ResourceCategory::CustomResource < ResourceCategory::Other);
    }

    #[test]
    fn test_category_order_for_creates() {
        let ops = creates(vec![
            manifest("apps/v1", "Deployment", "web", None),
            manifest("v1", "ConfigMap", "cfg", None),
            manifest("v1", "Namespace", "ns", None),
        ]);
        let deps = DefaultOrdering.dependencies(&ops);

        assert_eq!(names(&ops, &deps[0]), vec!["ConfigMap/cfg", "Namespace/ns"]);
        assert_eq!(names(&ops, &deps[1]), vec!["Namespace/ns"]);
        assert!(deps[2].is_empty());
    }

    #[test]
    fn test_same_category_runs_unordered() {
        let ops = creates(vec![
            manifest("v1", "ConfigMap", "a", None),
            manifest("v1", "Secret", "b", None),
        ]);
        let deps = DefaultOrdering.dependencies(&ops);
        assert!(deps.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_depends_on_overrides_category() {
        // the Service waits for the Job even though Network sorts before Batch
        let ops = creates(vec![
            manifest("v1", "Service", "svc", Some("Job/migrate")),
            manifest("batch/v1", "Job", "migrate", None),
            manifest("apps/v1", "Deployment", "web", None),
        ]);
        let deps = DefaultOrdering.dependencies(&ops);

        assert_eq!(names(&ops, &deps[0]), vec!["Job/migrate", "Deployment/web"]);
        assert_eq!(names(&ops, &deps[1]), vec!["Deployment/web"]);
        // the Deployment no longer waits for the raised Service
        assert!(deps[2].is_empty());
    }

    #[test]
    fn test_depends_on_unknown_target_ignored() {
        let ops = creates(vec![manifest("v1", "ConfigMap", "a", Some("Secret/elsewhere"))]);
        assert_eq!(DefaultOrdering.dependencies(&ops), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn test_phases_and_reverse_deletes() {
        let previous = {
            let mut set = ManifestSet::new();
            set.insert(manifest("v1", "ConfigMap", "old-cfg", None)).unwrap();
            set.insert(manifest("apps/v1", "Deployment", "old-web", None)).unwrap();
            set.insert(manifest("v1", "Service", "kept", None)).unwrap();
            set
        };
        let desired = {
            let mut set = ManifestSet::new();
            set.insert(manifest("v1", "Service", "kept", Some("ConfigMap/new")))
                .unwrap();
            set.insert(manifest("v1", "ConfigMap", "new", None)).unwrap();
            set
        };

        let ops = plan(&desired, &previous).ops;
        let kinds: Vec<String> = ops.iter().map(|o| format!("{} {}", o.kind, o.key)).collect();
        assert_eq!(
            kinds,
            vec![
                "update Service/kept",
                "create ConfigMap/new",
                "delete ConfigMap/old-cfg",
                "delete Deployment/old-web",
            ]
        );

        let deps = DefaultOrdering.dependencies(&ops);
        // update waits for the create phase, the cross-phase annotation adds nothing
        assert_eq!(names(&ops, &deps[0]), vec!["ConfigMap/new"]);
        assert!(deps[1].is_empty());
        // deletes wait for everything before them, workloads go before their config
        assert_eq!(
            names(&ops, &deps[2]),
            vec!["Service/kept", "ConfigMap/new", "Deployment/old-web"]
        );
        assert_eq!(names(&ops, &deps[3]), vec!["Service/kept", "ConfigMap/new"]);
    }

    #[test]
    fn test_delete_reverses_depends_on() {
        let previous = {
            let mut set = ManifestSet::new();
            set.insert(manifest("v1", "ConfigMap", "app", Some("ConfigMap/base")))
                .unwrap();
            set.insert(manifest("v1", "ConfigMap", "base", None)).unwrap();
            set
        };

        let ops = plan(&ManifestSet::new(), &previous).ops;
        let deps = DefaultOrdering.dependencies(&ops);

        // base is deleted after app
        assert!(deps[0].is_empty());
        assert_eq!(names(&ops, &deps[1]), vec!["ConfigMap/app"]);
    }

    #[test]
    fn test_cyclic_declarations_produce_cyclic_edges() {
        let ops = creates(vec![
            manifest("v1", "ConfigMap", "a", Some("ConfigMap/b")),
            manifest("v1", "ConfigMap", "b", Some("ConfigMap/a")),
        ]);
        let deps = DefaultOrdering.dependencies(&ops);

        assert!(deps[0].contains(&1));
        assert!(deps[1].contains(&0));
    }
}
