use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{HiveError, Result};
use crate::keys;
use crate::scheduler::job::{
    Assignment, ContainerConfig, ContainerJob, ImageJob, JobKind, Placement,
};
use crate::scheduler::Scheduler;
use crate::store::KeyValueStore;

/// Scheduler that writes jobs and placements straight through to the shared store.
#[derive(Clone)]
pub struct StoreScheduler {
    store: Arc<dyn KeyValueStore>,
}

/// Keys of a job as they were before a write.
struct Snapshot {
    body: Option<Vec<u8>>,
    placement: Option<Vec<u8>>,
    instances: BTreeMap<String, u32>,
}

impl StoreScheduler {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn job_key(kind: JobKind, name: &str) -> String {
        match kind {
            JobKind::Containers => keys::container_job_key(name),
            JobKind::Images => keys::image_job_key(name),
        }
    }

    /// Writes the job body, its placement record and the per-node index.
    ///
    /// If any write fails, the keys are restored to what they held before the
    /// call. Index entries for nodes dropped from an earlier placement are only
    /// removed once the new placement is fully written.
    async fn persist(
        &self,
        kind: JobKind,
        name: &str,
        body: &[u8],
        placement: &Placement,
    ) -> Result<()> {
        let placement_bytes = serde_json::to_vec(placement)?;
        let previous = self.snapshot(kind, name).await?;

        let mut touched = Vec::new();
        let result = self
            .write_all(kind, name, body, &placement_bytes, placement, &mut touched)
            .await;
        if let Err(e) = result {
            tracing::warn!(kind = %kind, job = name, error = %e, "Job write failed, rolling back");
            self.rollback(kind, name, &previous, &touched).await;
            return Err(e);
        }

        let current = placement.instances_per_node();
        for node in previous.instances.keys() {
            if current.contains_key(node.as_str()) {
                continue;
            }
            let key = keys::node_job_key(node, kind.as_str(), name);
            if let Err(e) = self.store.delete(&key).await {
                // assignments_for skips entries the placement no longer lists
                tracing::warn!(key = %key, error = %e, "Failed to remove stale assignment");
            }
        }
        Ok(())
    }

    async fn snapshot(&self, kind: JobKind, name: &str) -> Result<Snapshot> {
        let body = self.store.get(&Self::job_key(kind, name)).await?;
        let placement = self
            .store
            .get(&keys::placement_key(kind.as_str(), name))
            .await?;
        let instances = match placement.as_deref().map(serde_json::from_slice::<Placement>) {
            Some(Ok(previous)) => previous
                .instances_per_node()
                .into_iter()
                .map(|(node, count)| (node.to_string(), count))
                .collect(),
            Some(Err(e)) => {
                tracing::warn!(
                    kind = %kind,
                    job = name,
                    error = %e,
                    "Ignoring unreadable placement"
                );
                BTreeMap::new()
            }
            None => BTreeMap::new(),
        };
        Ok(Snapshot {
            body,
            placement,
            instances,
        })
    }

    async fn write_all(
        &self,
        kind: JobKind,
        name: &str,
        body: &[u8],
        placement_bytes: &[u8],
        placement: &Placement,
        touched: &mut Vec<String>,
    ) -> Result<()> {
        self.store.set(&Self::job_key(kind, name), body).await?;
        self.store
            .set(&keys::placement_key(kind.as_str(), name), placement_bytes)
            .await?;
        for (node, instances) in placement.instances_per_node() {
            // Recorded before the write: a timed-out SET may still have landed
            touched.push(node.to_string());
            self.store
                .set(
                    &keys::node_job_key(node, kind.as_str(), name),
                    instances.to_string().as_bytes(),
                )
                .await?;
        }
        Ok(())
    }

    async fn rollback(&self, kind: JobKind, name: &str, previous: &Snapshot, touched: &[String]) {
        let job_key = Self::job_key(kind, name);
        if let Err(e) = self.restore(&job_key, previous.body.as_deref()).await {
            tracing::warn!(key = %job_key, error = %e, "Rollback of job key failed");
        }

        let placement_key = keys::placement_key(kind.as_str(), name);
        if let Err(e) = self
            .restore(&placement_key, previous.placement.as_deref())
            .await
        {
            tracing::warn!(key = %placement_key, error = %e, "Rollback of placement failed");
        }

        for node in touched {
            let key = keys::node_job_key(node, kind.as_str(), name);
            let count = previous.instances.get(node).map(|c| c.to_string());
            if let Err(e) = self.restore(&key, count.as_deref().map(str::as_bytes)).await {
                tracing::warn!(key = %key, error = %e, "Rollback of assignment failed");
            }
        }
    }

    /// Puts `key` back to `value`, deleting it when there was none.
    async fn restore(&self, key: &str, value: Option<&[u8]>) -> Result<()> {
        match value {
            Some(value) => self.store.set(key, value).await,
            None => self.store.delete(key).await.map(|_| ()),
        }
    }

    async fn clear_index(&self, placement: &Placement) -> Result<()> {
        for node in placement.instances_per_node().keys() {
            self.store
                .delete(&keys::node_job_key(node, placement.kind.as_str(), &placement.name))
                .await?;
        }
        Ok(())
    }

    async fn remove(&self, kind: JobKind, name: &str) -> Result<bool> {
        if let Some(placement) = self.get_placement(kind, name).await? {
            self.clear_index(&placement).await?;
        }
        self.store
            .delete(&keys::placement_key(kind.as_str(), name))
            .await?;
        let existed = self.store.delete(&Self::job_key(kind, name)).await?;
        if existed {
            tracing::info!(kind = %kind, job = name, "Removed job");
        }
        Ok(existed)
    }
}

fn validate_container_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(HiveError::InvalidJob("container name is required".to_string()));
    }
    if name.contains(':') || name.contains('/') {
        return Err(HiveError::InvalidJob(format!(
            "container name {name:?} must not contain ':' or '/'"
        )));
    }
    Ok(())
}

fn validate_image(image: &str) -> Result<()> {
    if image.trim().is_empty() {
        return Err(HiveError::InvalidJob("image reference is required".to_string()));
    }
    Ok(())
}

#[async_trait]
impl Scheduler for StoreScheduler {
    async fn add_container_job(&self, job: &ContainerJob, nodes: &[String]) -> Result<String> {
        let name = job.name();
        validate_container_name(name)?;

        let body = serde_json::to_vec(&job.config)?;
        let placement = Placement::new(JobKind::Containers, name, &job.zone, nodes.to_vec());
        self.persist(JobKind::Containers, name, &body, &placement).await?;

        tracing::info!(job = name, zone = %job.zone, nodes = ?nodes, "Added container job");
        Ok(name.to_string())
    }

    async fn remove_container_job(&self, id: &str) -> Result<bool> {
        self.remove(JobKind::Containers, id).await
    }

    async fn add_image_job(&self, job: &ImageJob, nodes: &[String]) -> Result<bool> {
        validate_image(&job.image)?;

        let body = serde_json::to_vec(job)?;
        let placement = Placement::new(JobKind::Images, &job.image, &job.zone, nodes.to_vec());
        self.persist(JobKind::Images, &job.image, &body, &placement).await?;

        tracing::info!(image = %job.image, zone = %job.zone, nodes = ?nodes, "Added image job");
        Ok(true)
    }

    async fn remove_image_job(&self, id: &str) -> Result<bool> {
        self.remove(JobKind::Images, id).await
    }

    async fn get_container_job(&self, name: &str) -> Result<Option<ContainerConfig>> {
        match self.store.get(&keys::container_job_key(name)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_image_job(&self, image: &str) -> Result<Option<ImageJob>> {
        match self.store.get(&keys::image_job_key(image)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_container_jobs(&self) -> Result<Vec<String>> {
        let prefix = format!("{}:", keys::CONTAINER_JOB_KEY);
        let mut names: Vec<String> = self
            .store
            .keys_with_prefix(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn get_placement(&self, kind: JobKind, name: &str) -> Result<Option<Placement>> {
        match self
            .store
            .get(&keys::placement_key(kind.as_str(), name))
            .await?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn assignments_for(&self, node: &str) -> Result<Vec<Assignment>> {
        let prefix = keys::node_jobs_prefix(node);
        let mut assignments = Vec::new();

        for key in self.store.keys_with_prefix(&prefix).await? {
            let Some((kind, name)) = key
                .strip_prefix(&prefix)
                .and_then(|rest| rest.split_once(':'))
            else {
                continue;
            };
            let Some(kind) = JobKind::parse(kind) else {
                continue;
            };
            // The index is a lookup aid; the placement record decides
            let Some(placement) = self.get_placement(kind, name).await? else {
                tracing::debug!(key = %key, "Skipping assignment without placement");
                continue;
            };
            let Some(&instances) = placement.instances_per_node().get(node) else {
                tracing::debug!(key = %key, "Skipping stale assignment");
                continue;
            };
            assignments.push(Assignment {
                kind,
                name: name.to_string(),
                instances,
            });
        }

        assignments.sort();
        Ok(assignments)
    }
}
