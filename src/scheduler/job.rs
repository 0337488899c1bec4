use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serializes as `{}`; used for the daemon's set-like maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Container specification, field-compatible with the daemon's create API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerConfig {
    pub name: String,
    pub hostname: String,
    pub domainname: String,
    pub user: String,
    pub memory: i64,
    pub memory_swap: i64,
    pub cpu_shares: i64,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub port_specs: Vec<String>,
    pub exposed_ports: BTreeMap<String, Empty>,
    pub tty: bool,
    pub open_stdin: bool,
    pub stdin_once: bool,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub image: String,
    pub volumes: BTreeMap<String, Empty>,
    pub volumes_from: String,
    pub working_dir: String,
    pub network_disabled: bool,
    pub on_build: Vec<String>,
    /// Target zone; empty means the submitting node's zone.
    pub zone: String,
    pub number_of_instances: u32,
}

impl ContainerConfig {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerJob {
    pub config: ContainerConfig,
    pub zone: String,
}

impl ContainerJob {
    pub fn new(config: ContainerConfig, zone: impl Into<String>) -> Self {
        Self {
            config,
            zone: zone.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageJob {
    pub image: String,
    #[serde(default)]
    pub zone: String,
}

impl ImageJob {
    pub fn new(image: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            zone: zone.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Containers,
    Images,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Containers => "containers",
            JobKind::Images => "images",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "containers" => Some(JobKind::Containers),
            "images" => Some(JobKind::Images),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nodes chosen for a job at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub kind: JobKind,
    pub name: String,
    pub zone: String,
    /// One entry per instance; a node may appear more than once.
    pub nodes: Vec<String>,
    pub assigned_at: DateTime<Utc>,
}

impl Placement {
    pub fn new(
        kind: JobKind,
        name: impl Into<String>,
        zone: impl Into<String>,
        nodes: Vec<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            zone: zone.into(),
            nodes,
            assigned_at: Utc::now(),
        }
    }

    /// Instance count per node.
    pub fn instances_per_node(&self) -> BTreeMap<&str, u32> {
        let mut counts = BTreeMap::new();
        for node in &self.nodes {
            *counts.entry(node.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

/// An entry in a node's assignment index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Assignment {
    pub kind: JobKind,
    pub name: String,
    pub instances: u32,
}
