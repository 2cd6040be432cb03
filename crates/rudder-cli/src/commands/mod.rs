//! CLI commands

pub mod create;
pub mod template;

// Release lifecycle
pub mod install;
pub mod upgrade;
pub mod rollback;
pub mod uninstall;

// Ledger inspection
pub mod list;
pub mod history;
pub mod status;
pub mod diff;

use console::style;
use rudder_core::Overlay;
use rudder_engine::Renderer;
use rudder_kube::{
    CancelToken, FileStore, KubeCluster, Orchestrator, ReleaseLedger, RudderConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;

/// Configuration and locations shared by every command
pub struct Session {
    pub config: RudderConfig,
    pub store_dir: PathBuf,
}

impl Session {
    /// Load the configuration; `--store` and `--namespace` win over the file
    pub fn load(
        config_path: Option<&Path>,
        store: Option<PathBuf>,
        namespace: Option<String>,
    ) -> Result<Self> {
        let mut config = RudderConfig::load(config_path)?;
        if let Some(namespace) = namespace {
            config.namespace = namespace;
            config.validate()?;
        }
        let store_dir = store.unwrap_or_else(|| config.storage_path());
        debug!(store = %store_dir.display(), namespace = %config.namespace, "session");
        Ok(Self { config, store_dir })
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn renderer(&self) -> Renderer {
        Renderer::new().with_namespace(self.namespace())
    }

    pub fn store(&self) -> Result<FileStore> {
        Ok(FileStore::new(&self.store_dir, self.config.storage.compression)?)
    }

    /// Ledger access without a cluster connection
    pub fn ledger(&self) -> Result<ReleaseLedger<FileStore>> {
        Ok(ReleaseLedger::new(self.store()?))
    }

    /// Connect to the cluster and build an orchestrator over the ledger
    pub async fn connect(&self) -> Result<Connected> {
        let cluster = Arc::new(KubeCluster::connect(self.namespace()).await?);
        let reconciler = self.config.reconciler(cluster.clone());
        let orchestrator =
            Orchestrator::new(self.store()?, reconciler).with_renderer(self.renderer());
        Ok(Connected {
            orchestrator,
            cluster,
        })
    }
}

/// Orchestrator bound to a live cluster
pub struct Connected {
    pub orchestrator: Orchestrator<FileStore>,
    cluster: Arc<KubeCluster>,
}

impl Connected {
    /// Teach the cluster adapter where the recorded resources of `name` live,
    /// so deletes and reads by key reach the right API and namespace
    pub async fn register(&self, name: &str) -> Result<()> {
        let ledger = self.orchestrator.ledger();
        if let Some(release) = ledger.latest_deployed(name).await? {
            self.cluster.register(&release.manifests);
        }
        if let Some(release) = ledger.latest(name).await? {
            self.cluster.register(&release.manifests);
        }
        Ok(())
    }
}

/// Overlays in precedence order: values files, then `--set` assignments
pub fn overlays(values_files: &[PathBuf], set: &[String]) -> Vec<Overlay> {
    let mut overlays: Vec<Overlay> = values_files.iter().cloned().map(Overlay::file).collect();
    if !set.is_empty() {
        overlays.push(Overlay::set(set.iter().cloned()));
    }
    overlays
}

/// Token cancelled on Ctrl-C; operations already in flight finish, nothing new starts
pub fn interrupt_token() -> CancelToken {
    let token = CancelToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{} Interrupted, waiting for in-flight operations",
                style("⚠").yellow()
            );
            on_signal.cancel();
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlays_order() {
        let overlays = overlays(
            &[PathBuf::from("base.yaml"), PathBuf::from("prod.yaml")],
            &["replicaCount=3".to_string()],
        );
        let names: Vec<String> = overlays.iter().map(Overlay::source_name).collect();
        assert_eq!(names.len(), 3);
        assert!(names[0].contains("base.yaml"));
        assert!(names[1].contains("prod.yaml"));
        assert!(names[2].contains("--set"));
    }

    #[test]
    fn test_no_overlays() {
        assert!(overlays(&[], &[]).is_empty());
    }

    #[test]
    fn test_session_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.yaml");
        std::fs::write(&config, "namespace: staging\n").unwrap();

        let session = Session::load(
            Some(&config),
            Some(dir.path().join("ledger")),
            Some("apps".to_string()),
        )
        .unwrap();
        assert_eq!(session.namespace(), "apps");
        assert_eq!(session.store_dir, dir.path().join("ledger"));

        let session = Session::load(Some(&config), None, None).unwrap();
        assert_eq!(session.namespace(), "staging");
    }
}
