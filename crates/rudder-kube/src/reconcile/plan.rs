//! Planning: compare desired and previous manifest sets

use rudder_core::{Manifest, ManifestSet, ResourceKey};
use serde::{Deserialize, Serialize};

/// Kind of cluster operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// One operation to issue
///
/// For deletes `manifest` is the previously applied manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedOp {
    pub kind: OperationKind,
    pub key: ResourceKey,
    pub manifest: Manifest,
}

/// Operations needed to move the cluster from `previous` to `desired`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub ops: Vec<PlannedOp>,

    /// Resources identical in both sets
    pub unchanged: Vec<ResourceKey>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn count(&self, kind: OperationKind) -> usize {
        self.ops.iter().filter(|op| op.kind == kind).count()
    }
}

/// Diff two manifest sets by resource key
///
/// Creates and updates follow `desired` order, deletes follow `previous` order.
pub fn plan(desired: &ManifestSet, previous: &ManifestSet) -> Plan {
    let mut result = Plan::default();

    for manifest in desired {
        let key = manifest.key();
        match previous.get(&key) {
            None => result.ops.push(PlannedOp {
                kind: OperationKind::Create,
                key,
                manifest: manifest.clone(),
            }),
            Some(old) if old.body != manifest.body => result.ops.push(PlannedOp {
                kind: OperationKind::Update,
                key,
                manifest: manifest.clone(),
            }),
            Some(_) => result.unchanged.push(key),
        }
    }

    for manifest in previous {
        let key = manifest.key();
        if !desired.contains(&key) {
            result.ops.push(PlannedOp {
                kind: OperationKind::Delete,
                key,
                manifest: manifest.clone(),
            });
        }
    }

    result
}
