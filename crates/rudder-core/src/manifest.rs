//! Rendered Kubernetes manifests and ordered manifest sets

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Annotation declaring resources that must be applied first
/// Format: "Kind/name" or "Kind/name,Kind/name"
pub const DEPENDS_ON_ANNOTATION: &str = "rudder.io/depends-on";

/// Identity of a resource within a release
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Parse "Kind/name"
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, name) = s.trim().split_once('/')?;
        let (kind, name) = (kind.trim(), name.trim());
        if kind.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(kind, name))
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A single resource document
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub kind: String,
    pub name: String,

    /// Full document (apiVersion, metadata, spec...)
    pub body: JsonValue,
}

impl Manifest {
    /// Build a manifest from a parsed document, reading `kind` and `metadata.name`
    pub fn from_value(body: JsonValue) -> Result<Self> {
        let kind = body
            .get("kind")
            .and_then(|k| k.as_str())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CoreError::InvalidManifest {
                message: "document has no 'kind'".to_string(),
            })?
            .to_string();

        let name = body
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| CoreError::InvalidManifest {
                message: format!("{} document has no 'metadata.name'", kind),
            })?
            .to_string();

        Ok(Self { kind, name, body })
    }

    /// Parse a single YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let body: JsonValue = serde_yaml::from_str(yaml)?;
        Self::from_value(body)
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.kind, &self.name)
    }

    pub fn api_version(&self) -> Option<&str> {
        self.body.get("apiVersion").and_then(|v| v.as_str())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.body
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(|n| n.as_str())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.body
            .get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key))
            .and_then(|v| v.as_str())
    }

    /// Resources declared through the depends-on annotation
    pub fn dependencies(&self) -> Vec<ResourceKey> {
        self.annotation(DEPENDS_ON_ANNOTATION)
            .map(|s| s.split(',').filter_map(ResourceKey::parse).collect())
            .unwrap_or_default()
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.body)?)
    }
}

/// Split a YAML stream into its non-empty documents
pub fn parse_documents(content: &str) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();

    for document in serde_yaml::Deserializer::from_str(content) {
        let body = JsonValue::deserialize(document)?;
        if body.is_null() {
            continue;
        }
        manifests.push(Manifest::from_value(body)?);
    }

    Ok(manifests)
}

/// Manifests of a release keyed by (kind, name), in render order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<JsonValue>", into = "Vec<JsonValue>")]
pub struct ManifestSet {
    entries: IndexMap<ResourceKey, Manifest>,
}

impl ManifestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a manifest; a second manifest with the same key is rejected
    pub fn insert(&mut self, manifest: Manifest) -> Result<()> {
        let key = manifest.key();
        if self.entries.contains_key(&key) {
            return Err(CoreError::DuplicateResource {
                key: key.to_string(),
            });
        }
        self.entries.insert(key, manifest);
        Ok(())
    }

    /// Parse a multi-document YAML stream
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut set = Self::new();
        for manifest in parse_documents(content)? {
            set.insert(manifest)?;
        }
        Ok(set)
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Manifest> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Manifest> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as a YAML stream, one document per resource
    pub fn to_yaml(&self) -> Result<String> {
        let mut out = String::new();
        for manifest in self.iter() {
            out.push_str("---\n");
            out.push_str(&manifest.to_yaml()?);
        }
        Ok(out)
    }

    /// SHA-256 of the YAML stream
    pub fn digest(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.to_yaml()?.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

impl<'a> IntoIterator for &'a ManifestSet {
    type Item = &'a Manifest;
    type IntoIter = indexmap::map::Values<'a, ResourceKey, Manifest>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.values()
    }
}

impl TryFrom<Vec<JsonValue>> for ManifestSet {
    type Error = CoreError;

    fn try_from(bodies: Vec<JsonValue>) -> Result<Self> {
        let mut set = Self::new();
        for body in bodies {
            set.insert(Manifest::from_value(body)?)?;
        }
        Ok(set)
    }
}

impl From<ManifestSet> for Vec<JsonValue> {
    fn from(set: ManifestSet) -> Self {
        set.entries.into_values().map(|m| m.body).collect()
    }
}
