pub mod job;
pub mod store;

use async_trait::async_trait;

use crate::error::Result;

pub use job::{Assignment, ContainerConfig, ContainerJob, ImageJob, JobKind, Placement};
pub use store::StoreScheduler;

/// Job persistence. Every call writes through to the shared store before returning.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Persists the container config under `jobs:containers:{name}` together
    /// with the nodes selected for it. Returns the job name.
    async fn add_container_job(&self, job: &ContainerJob, nodes: &[String]) -> Result<String>;

    /// Deletes a container job and its placement. Returns false if no such job existed.
    async fn remove_container_job(&self, id: &str) -> Result<bool>;

    async fn add_image_job(&self, job: &ImageJob, nodes: &[String]) -> Result<bool>;

    async fn remove_image_job(&self, id: &str) -> Result<bool>;

    async fn get_container_job(&self, name: &str) -> Result<Option<ContainerConfig>>;

    async fn get_image_job(&self, image: &str) -> Result<Option<ImageJob>>;

    async fn list_container_jobs(&self) -> Result<Vec<String>>;

    async fn get_placement(&self, kind: JobKind, name: &str) -> Result<Option<Placement>>;

    /// Jobs placed on `node`, read from its assignment index.
    async fn assignments_for(&self, node: &str) -> Result<Vec<Assignment>>;
}
