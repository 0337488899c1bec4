//! Run policies: which nodes receive the instances of a job.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::index;
use rand::Rng;

use crate::config::RunPolicyKind;
use crate::error::{HiveError, Result};
use crate::registry::NodeRegistry;

#[async_trait]
pub trait RunPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Selects `count` node names from the live nodes of `zone`.
    async fn get_nodes(&self, count: usize, zone: &str) -> Result<Vec<String>>;
}

pub fn build_policy(kind: RunPolicyKind, registry: NodeRegistry) -> Arc<dyn RunPolicy> {
    match kind {
        RunPolicyKind::Random => Arc::new(RandomPolicy::new(registry)),
        RunPolicyKind::Unique => Arc::new(UniquePolicy::new(registry)),
    }
}

async fn live_nodes(registry: &NodeRegistry, zone: &str) -> Result<Vec<String>> {
    let nodes = registry.list_nodes(zone).await?;
    if nodes.is_empty() {
        return Err(HiveError::NoCandidateNodes {
            zone: zone.to_string(),
        });
    }
    Ok(nodes)
}

/// Uniform draws with replacement: a node may appear more than once.
pub struct RandomPolicy {
    registry: NodeRegistry,
}

impl RandomPolicy {
    pub fn new(registry: NodeRegistry) -> Self {
        Self { registry }
    }
}

fn draw_with_replacement(nodes: &[String], count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| nodes[rng.gen_range(0..nodes.len())].clone())
        .collect()
}

#[async_trait]
impl RunPolicy for RandomPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    async fn get_nodes(&self, count: usize, zone: &str) -> Result<Vec<String>> {
        let nodes = live_nodes(&self.registry, zone).await?;
        Ok(draw_with_replacement(&nodes, count))
    }
}

/// Distinct nodes, sampled uniformly without replacement.
pub struct UniquePolicy {
    registry: NodeRegistry,
}

impl UniquePolicy {
    pub fn new(registry: NodeRegistry) -> Self {
        Self { registry }
    }
}

fn sample_distinct(nodes: &[String], count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    index::sample(&mut rng, nodes.len(), count)
        .into_iter()
        .map(|i| nodes[i].clone())
        .collect()
}

#[async_trait]
impl RunPolicy for UniquePolicy {
    fn name(&self) -> &'static str {
        "unique"
    }

    async fn get_nodes(&self, count: usize, zone: &str) -> Result<Vec<String>> {
        let nodes = live_nodes(&self.registry, zone).await?;
        if nodes.len() < count {
            return Err(HiveError::InsufficientNodes {
                zone: zone.to_string(),
                requested: count,
                available: nodes.len(),
            });
        }
        Ok(sample_distinct(&nodes, count))
    }
}
