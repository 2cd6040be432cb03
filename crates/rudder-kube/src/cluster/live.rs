//! [`ClusterApi`] over a real cluster through the `kube` dynamic API
//!
//! - create: POST, adopting the object through Server-Side Apply when it already exists
//! - update: Server-Side Apply with the `rudder` field manager
//! - delete: background propagation, a missing object counts as deleted
//! - get: `get_opt`

use async_trait::async_trait;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams, PropagationPolicy},
    core::{GroupVersionKind, TypeMeta},
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use rudder_core::{Manifest, ManifestSet, ResourceKey};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use super::{ClusterApi, ClusterError};
use crate::error::Result;

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "rudder";

#[derive(Clone)]
struct Resolved {
    api_resource: ApiResource,
    capabilities: ApiCapabilities,
}

/// Cluster adapter backed by a `kube::Client`
pub struct KubeCluster {
    client: Client,
    discovery: Discovery,
    namespace: String,

    /// Kinds and namespaces learned from manifests, so delete/get by key
    /// target the right API and namespace
    kinds: RwLock<HashMap<String, Resolved>>,
    namespaces: RwLock<HashMap<ResourceKey, String>>,
}

impl KubeCluster {
    /// Connect with the ambient kubeconfig / in-cluster configuration
    pub async fn connect(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default().await?;
        Self::new(client, namespace).await
    }

    pub async fn new(client: Client, namespace: impl Into<String>) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self {
            client,
            discovery,
            namespace: namespace.into(),
            kinds: RwLock::new(HashMap::new()),
            namespaces: RwLock::new(HashMap::new()),
        })
    }

    /// Record where the manifests of a release live before deleting or reading them
    pub fn register(&self, manifests: &ManifestSet) {
        for manifest in manifests {
            if let Ok((_, resolved)) = self.resolve_manifest(manifest) {
                self.remember(manifest, &resolved);
            }
        }
    }

    fn remember(&self, manifest: &Manifest, resolved: &Resolved) {
        if let Ok(mut kinds) = self.kinds.write() {
            kinds.insert(manifest.kind.clone(), resolved.clone());
        }
        if let Some(ns) = manifest.namespace() {
            if let Ok(mut namespaces) = self.namespaces.write() {
                namespaces.insert(manifest.key(), ns.to_string());
            }
        }
    }

    fn resolve_manifest(&self, manifest: &Manifest) -> std::result::Result<(DynamicObject, Resolved), ClusterError> {
        let mut obj: DynamicObject = serde_json::from_value(manifest.body.clone())
            .map_err(|e| ClusterError::Permanent(format!("{}: {}", manifest.key(), e)))?;

        let type_meta = obj.types.as_ref().ok_or_else(|| {
            ClusterError::Permanent(format!("{} is missing apiVersion", manifest.key()))
        })?;
        let gvk = gvk_from_type_meta(type_meta);

        let (api_resource, capabilities) = self.discovery.resolve_gvk(&gvk).ok_or_else(|| {
            ClusterError::Permanent(format!(
                "unknown resource type {}/{}",
                type_meta.api_version, type_meta.kind
            ))
        })?;

        if capabilities.scope == Scope::Namespaced && obj.metadata.namespace.is_none() {
            obj.metadata.namespace = Some(self.namespace.clone());
        }

        Ok((
            obj,
            Resolved {
                api_resource,
                capabilities,
            },
        ))
    }

    /// Resolve a bare kind: learned kinds first, then the preferred version from discovery
    fn resolve_kind(&self, kind: &str) -> std::result::Result<Resolved, ClusterError> {
        if let Some(resolved) = self.kinds.read().ok().and_then(|k| k.get(kind).cloned()) {
            return Ok(resolved);
        }

        self.discovery
            .groups()
            .flat_map(|group| group.recommended_resources())
            .find(|(ar, _)| ar.kind == kind)
            .map(|(api_resource, capabilities)| Resolved {
                api_resource,
                capabilities,
            })
            .ok_or_else(|| ClusterError::Permanent(format!("unknown resource kind {}", kind)))
    }

    fn api(&self, resolved: &Resolved, namespace: Option<&str>) -> Api<DynamicObject> {
        if resolved.capabilities.scope == Scope::Namespaced {
            let ns = namespace.unwrap_or(&self.namespace);
            Api::namespaced_with(self.client.clone(), ns, &resolved.api_resource)
        } else {
            Api::all_with(self.client.clone(), &resolved.api_resource)
        }
    }

    fn api_for_key(&self, key: &ResourceKey) -> std::result::Result<Api<DynamicObject>, ClusterError> {
        let resolved = self.resolve_kind(&key.kind)?;
        let namespace = self
            .namespaces
            .read()
            .ok()
            .and_then(|n| n.get(key).cloned());
        Ok(self.api(&resolved, namespace.as_deref()))
    }

    async fn server_side_apply(
        &self,
        api: &Api<DynamicObject>,
        name: &str,
        obj: &DynamicObject,
    ) -> std::result::Result<(), ClusterError> {
        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;
        api.patch(name, &params, &Patch::Apply(obj))
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_resource(&self, manifest: &Manifest) -> std::result::Result<(), ClusterError> {
        let (obj, resolved) = self.resolve_manifest(manifest)?;
        self.remember(manifest, &resolved);
        let api = self.api(&resolved, obj.metadata.namespace.as_deref());

        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        match api.create(&params, &obj).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                debug!(resource = %manifest.key(), "already exists, adopting");
                self.server_side_apply(&api, &manifest.name, &obj).await
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn update_resource(&self, manifest: &Manifest) -> std::result::Result<(), ClusterError> {
        let (obj, resolved) = self.resolve_manifest(manifest)?;
        self.remember(manifest, &resolved);
        let api = self.api(&resolved, obj.metadata.namespace.as_deref());
        self.server_side_apply(&api, &manifest.name, &obj).await
    }

    async fn delete_resource(&self, key: &ResourceKey) -> std::result::Result<(), ClusterError> {
        let api = self.api_for_key(key)?;
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };

        match api.delete(&key.name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(classify(e)),
        }
    }

    async fn get_resource(&self, key: &ResourceKey) -> std::result::Result<Option<Manifest>, ClusterError> {
        let api = self.api_for_key(key)?;
        let Some(obj) = api.get_opt(&key.name).await.map_err(classify)? else {
            return Ok(None);
        };

        let body = serde_json::to_value(&obj)
            .map_err(|e| ClusterError::Permanent(format!("{}: {}", key, e)))?;
        Manifest::from_value(body)
            .map(Some)
            .map_err(|e| ClusterError::Permanent(e.to_string()))
    }
}

/// Conflicts, throttling, server errors and transport failures are worth retrying
fn classify(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) if is_transient_status(resp.code) => {
            ClusterError::Transient(format!("{} ({})", resp.message, resp.code))
        }
        kube::Error::Api(resp) => ClusterError::Permanent(format!("{} ({})", resp.message, resp.code)),
        kube::Error::HyperError(e) => ClusterError::Transient(e.to_string()),
        kube::Error::Service(e) => ClusterError::Transient(e.to_string()),
        other => ClusterError::Permanent(other.to_string()),
    }
}

fn is_transient_status(code: u16) -> bool {
    code == 409 || code == 429 || code >= 500
}

/// Convert TypeMeta to GroupVersionKind
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}
