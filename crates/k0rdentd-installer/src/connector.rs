//! Cluster client construction once k0s is up

use crate::error::Result;
use async_trait::async_trait;
use k0rdentd_cloud::{ClusterApi, KubeCluster};
use k0rdentd_runtime::RuntimeLifecycle;
use std::sync::Arc;

#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, runtime: &dyn RuntimeLifecycle) -> Result<Arc<dyn ClusterApi>>;
}

/// Connects with the admin kubeconfig k0s hands out
#[derive(Debug, Default, Clone, Copy)]
pub struct KubeConnector;

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, runtime: &dyn RuntimeLifecycle) -> Result<Arc<dyn ClusterApi>> {
        let kubeconfig = runtime.admin_kubeconfig().await?;
        let cluster = KubeCluster::from_kubeconfig(&kubeconfig).await?;
        tracing::debug!("Kubernetes client initialized");
        Ok(Arc::new(cluster))
    }
}
