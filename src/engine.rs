use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api;
use crate::config::NodeConfig;
use crate::election::{LeaderElection, LeaderStatus, Role};
use crate::error::{HiveError, Result};
use crate::policy::{build_policy, RunPolicy};
use crate::proxy::{DockerForwarder, Forwarder};
use crate::registry::{NodeEntry, NodeRegistry};
use crate::scheduler::{
    Assignment, ContainerConfig, ContainerJob, ImageJob, Scheduler, StoreScheduler,
};
use crate::store::KeyValueStore;

#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub node: String,
    pub zone: String,
    pub address: String,
    pub role: Role,
    pub leader: Option<String>,
    pub term: u64,
    pub run_policy: &'static str,
    pub nodes: Vec<NodeEntry>,
}

/// Accepted container job and the nodes chosen for it, one entry per instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub id: String,
    pub nodes: Vec<String>,
}

/// Per-node coordinator: drives heartbeats and elections and places jobs.
///
/// The engine keeps no authoritative cluster state; every tick re-derives
/// liveness and leadership from the shared store.
pub struct Engine {
    config: NodeConfig,
    registry: NodeRegistry,
    election: LeaderElection,
    policy: Arc<dyn RunPolicy>,
    scheduler: Arc<dyn Scheduler>,
    forwarder: Arc<dyn Forwarder>,
}

impl Engine {
    pub fn new(config: NodeConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        config.validate()?;

        let registry = NodeRegistry::new(store.clone(), config.node_ttl());
        let election =
            LeaderElection::new(store.clone(), config.name.clone(), config.master_ttl());
        let policy = build_policy(config.run_policy, registry.clone());
        let scheduler: Arc<dyn Scheduler> = Arc::new(StoreScheduler::new(store));
        let forwarder: Arc<dyn Forwarder> =
            Arc::new(DockerForwarder::new(config.docker_socket.clone()));

        Ok(Self {
            config,
            registry,
            election,
            policy,
            scheduler,
            forwarder,
        })
    }

    pub fn with_policy(mut self, policy: Arc<dyn RunPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_forwarder(mut self, forwarder: Arc<dyn Forwarder>) -> Self {
        self.forwarder = forwarder;
        self
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn forwarder(&self) -> &Arc<dyn Forwarder> {
        &self.forwarder
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn is_leader(&self) -> bool {
        self.election.is_leader()
    }

    pub fn leader_status(&self) -> LeaderStatus {
        self.election.status()
    }

    pub fn subscribe_leadership(&self) -> watch::Receiver<LeaderStatus> {
        self.election.subscribe()
    }

    /// Publishes this node's address with a fresh TTL.
    pub async fn heartbeat_once(&self) -> Result<()> {
        self.registry
            .heartbeat(&self.config.name, &self.config.zone, &self.config.advertise_addr())
            .await
    }

    /// Runs a single election round.
    pub async fn elect_once(&self) -> Result<LeaderStatus> {
        self.election.tick().await
    }

    /// Starts the HTTP API and the control loop; returns after `shutdown` fires
    /// and the server has drained.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            node = %self.config.name,
            zone = %self.config.zone,
            run_policy = self.policy.name(),
            address = %self.config.connection_string(),
            "Starting engine"
        );

        let listener = tokio::net::TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| {
                HiveError::Internal(format!("failed to bind {}: {e}", self.config.listen_addr))
            })?;

        let server = tokio::spawn(api::serve(listener, Arc::clone(&self), shutdown.clone()));

        self.run_loop(shutdown).await;

        server
            .await
            .map_err(|e| HiveError::Internal(format!("api server task failed: {e}")))?
    }

    /// Control loop. Each timer tick spawns its operation and moves on, so a
    /// slow store delays only that tick's task, never the loop.
    pub async fn run_loop(self: &Arc<Self>, shutdown: CancellationToken) {
        let mut heartbeat_tick = tokio::time::interval(self.config.heartbeat_interval());
        let mut election_tick = tokio::time::interval(self.config.election_interval());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(node = %self.config.name, "Stopping engine");
                    break;
                }

                _ = election_tick.tick() => {
                    let engine = Arc::clone(self);
                    tokio::spawn(async move {
                        if let Err(e) = engine.elect_once().await {
                            tracing::warn!(
                                node = %engine.config.name,
                                error = %e,
                                "Master election failed"
                            );
                        }
                    });
                }

                _ = heartbeat_tick.tick() => {
                    let engine = Arc::clone(self);
                    tokio::spawn(async move {
                        if let Err(e) = engine.heartbeat_once().await {
                            tracing::warn!(
                                node = %engine.config.name,
                                error = %e,
                                "Node heartbeat failed"
                            );
                        }
                    });
                }
            }
        }
    }

    fn resolve_zone(&self, zone: &str) -> String {
        if zone.is_empty() {
            self.config.zone.clone()
        } else {
            zone.to_string()
        }
    }

    /// Selects `desired_count` nodes with the run policy and persists the job
    /// and its placement. Nothing is written when selection fails.
    pub async fn submit_container_job(
        &self,
        config: ContainerConfig,
        zone: &str,
        desired_count: usize,
    ) -> Result<Submission> {
        if desired_count == 0 {
            return Err(HiveError::InvalidJob(
                "desired instance count must be at least 1".to_string(),
            ));
        }
        if desired_count > self.config.max_instances {
            return Err(HiveError::InvalidJob(format!(
                "desired instance count {desired_count} exceeds the limit of {}",
                self.config.max_instances
            )));
        }
        let zone = self.resolve_zone(zone);
        let nodes = self.policy.get_nodes(desired_count, &zone).await?;

        tracing::debug!(
            job = %config.name,
            zone = %zone,
            policy = self.policy.name(),
            nodes = ?nodes,
            "Selected nodes"
        );

        let job = ContainerJob::new(config, zone);
        let id = self.scheduler.add_container_job(&job, &nodes).await?;
        Ok(Submission { id, nodes })
    }

    /// Image pulls go to every live node of the zone.
    pub async fn submit_image_job(&self, image: &str, zone: &str) -> Result<bool> {
        let zone = self.resolve_zone(zone);
        let nodes = self.registry.list_nodes(&zone).await?;
        if nodes.is_empty() {
            return Err(HiveError::NoCandidateNodes { zone });
        }
        let job = ImageJob::new(image, zone);
        self.scheduler.add_image_job(&job, &nodes).await
    }

    pub async fn remove_container_job(&self, id: &str) -> Result<bool> {
        self.scheduler.remove_container_job(id).await
    }

    pub async fn remove_image_job(&self, id: &str) -> Result<bool> {
        self.scheduler.remove_image_job(id).await
    }

    /// Jobs placed on this node.
    pub async fn assignments(&self) -> Result<Vec<Assignment>> {
        self.scheduler.assignments_for(&self.config.name).await
    }

    pub async fn cluster_status(&self) -> Result<ClusterStatus> {
        let status = self.election.status();
        let nodes = self.registry.list_all_nodes().await?;
        Ok(ClusterStatus {
            node: self.config.name.clone(),
            zone: self.config.zone.clone(),
            address: self.config.connection_string(),
            role: status.role,
            leader: status.leader,
            term: status.term,
            run_policy: self.policy.name(),
            nodes,
        })
    }
}
