//! In-memory [`ClusterApi`] for tests

use crate::cluster::{ClusterApi, ClusterObject, HelmReleaseStatus, ObjectKind, ObjectRef};
use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct State {
    namespaces: BTreeSet<String>,
    /// (namespace, name) -> (ready, desired)
    deployments: BTreeMap<(String, String), (i32, Option<i32>)>,
    objects: BTreeSet<ObjectRef>,
    created: Vec<ClusterObject>,
    releases: HashMap<(String, String), HelmReleaseStatus>,
    failing_kinds: BTreeSet<ObjectKind>,
    unreachable: bool,
}

/// A fake cluster that records every create call
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
    create_calls: AtomicUsize,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.state().namespaces.insert(namespace.to_string());
    }

    pub fn set_deployment(&self, namespace: &str, name: &str, ready: i32, desired: Option<i32>) {
        self.state()
            .deployments
            .insert((namespace.to_string(), name.to_string()), (ready, desired));
    }

    /// Mark every listed deployment fully scaled (1/1)
    pub fn set_deployments_ready(&self, namespace: &str, names: &[&str]) {
        for name in names {
            self.set_deployment(namespace, name, 1, Some(1));
        }
    }

    pub fn set_release(&self, namespace: &str, release: &str, status: HelmReleaseStatus) {
        self.state()
            .releases
            .insert((namespace.to_string(), release.to_string()), status);
    }

    pub fn insert(&self, target: ObjectRef) {
        self.state().objects.insert(target);
    }

    /// Make every create of `kind` fail with an API error
    pub fn fail_creates_of(&self, kind: ObjectKind) {
        self.state().failing_kinds.insert(kind);
    }

    /// Make every call fail as if the API server were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    pub fn contains(&self, target: &ObjectRef) -> bool {
        self.state().objects.contains(target)
    }

    pub fn created(&self) -> Vec<ClusterObject> {
        self.state().created.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.state().unreachable {
            Err(ClusterError::Api("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        self.check_reachable()?;
        Ok(self.state().namespaces.contains(namespace))
    }

    async fn deployment_ready(&self, namespace: &str, name: &str) -> Result<bool> {
        self.check_reachable()?;
        let state = self.state();
        Ok(
            match state
                .deployments
                .get(&(namespace.to_string(), name.to_string()))
            {
                Some((ready, Some(desired))) => ready == desired,
                _ => false,
            },
        )
    }

    async fn object_exists(&self, target: &ObjectRef) -> Result<bool> {
        self.check_reachable()?;
        Ok(self.state().objects.contains(target))
    }

    async fn create_object(&self, object: &ClusterObject) -> Result<()> {
        self.check_reachable()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state();
        if state.failing_kinds.contains(&object.target.kind) {
            return Err(ClusterError::Api(format!(
                "admission webhook denied {}",
                object.target
            )));
        }
        if !state.objects.insert(object.target.clone()) {
            return Err(ClusterError::AlreadyExists(object.target.to_string()));
        }
        state.created.push(object.clone());
        Ok(())
    }

    async fn helm_release_status(
        &self,
        namespace: &str,
        release: &str,
    ) -> Result<HelmReleaseStatus> {
        self.check_reachable()?;
        Ok(self
            .state()
            .releases
            .get(&(namespace.to_string(), release.to_string()))
            .cloned()
            .unwrap_or(HelmReleaseStatus::Unknown))
    }
}
