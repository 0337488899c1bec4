//! Key layout of the shared store.
//!
//! ```text
//! master                              leader pointer (TTL)
//! master:term                         fencing term, bumped on each fresh claim
//! nodes:{zone}:{name}                 node address (TTL)
//! jobs:containers:{name}              serialized container config
//! jobs:images:{image}                 serialized image job
//! jobs:placements:{kind}:{name}       placement record
//! nodes:jobs:{node}:{kind}:{name}     per-node assignment index
//! ```

pub const MASTER_KEY: &str = "master";
pub const MASTER_TERM_KEY: &str = "master:term";
pub const NODE_KEY: &str = "nodes";
pub const CONTAINER_JOB_KEY: &str = "jobs:containers";
pub const IMAGE_JOB_KEY: &str = "jobs:images";
pub const PLACEMENT_KEY: &str = "jobs:placements";
pub const NODE_JOB_KEY: &str = "nodes:jobs";

pub fn node_key(zone: &str, name: &str) -> String {
    format!("{NODE_KEY}:{zone}:{name}")
}

pub fn zone_prefix(zone: &str) -> String {
    format!("{NODE_KEY}:{zone}:")
}

pub fn all_nodes_prefix() -> String {
    format!("{NODE_KEY}:")
}

/// Splits `nodes:{zone}:{name}` into `(zone, name)`.
///
/// Keys from the assignment index (`nodes:jobs:...`) are not node entries.
pub fn parse_node_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix(NODE_KEY)?.strip_prefix(':')?;
    let (zone, name) = rest.split_once(':')?;
    if zone == "jobs" || zone.is_empty() || name.is_empty() || name.contains(':') {
        return None;
    }
    Some((zone, name))
}

pub fn container_job_key(name: &str) -> String {
    format!("{CONTAINER_JOB_KEY}:{name}")
}

pub fn image_job_key(image: &str) -> String {
    format!("{IMAGE_JOB_KEY}:{image}")
}

pub fn placement_key(kind: &str, name: &str) -> String {
    format!("{PLACEMENT_KEY}:{kind}:{name}")
}

pub fn node_jobs_prefix(node: &str) -> String {
    format!("{NODE_JOB_KEY}:{node}:")
}

pub fn node_job_key(node: &str, kind: &str, name: &str) -> String {
    format!("{NODE_JOB_KEY}:{node}:{kind}:{name}")
}
