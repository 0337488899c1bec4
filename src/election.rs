//! Master election over the shared store.
//!
//! Each tick runs one atomic claim-or-renew on the `master` key:
//!
//! - key absent: this node claims it and the term is bumped
//! - key holds this node's name: its TTL is refreshed
//! - key holds another name: this node is a follower
//!
//! TTL expiry is the only failure detector. A leader that stops renewing
//! loses the key once the TTL lapses and the next ticking node takes over.
//! Readers observe the local role through a `watch` channel snapshot.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::Result;
use crate::keys::{MASTER_KEY, MASTER_TERM_KEY};
use crate::store::KeyValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Follower,
    Leader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// Snapshot of this node's view of leadership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderStatus {
    pub role: Role,
    /// Name stored under the master key at the last successful tick.
    pub leader: Option<String>,
    /// Fencing term observed at the last successful tick.
    pub term: u64,
}

impl Default for LeaderStatus {
    fn default() -> Self {
        Self {
            role: Role::Follower,
            leader: None,
            term: 0,
        }
    }
}

pub struct LeaderElection {
    store: Arc<dyn KeyValueStore>,
    node_name: String,
    ttl: Duration,
    status_tx: watch::Sender<LeaderStatus>,
}

impl LeaderElection {
    pub fn new(store: Arc<dyn KeyValueStore>, node_name: impl Into<String>, ttl: Duration) -> Self {
        let (status_tx, _) = watch::channel(LeaderStatus::default());
        Self {
            store,
            node_name: node_name.into(),
            ttl,
            status_tx,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Runs one election round and publishes the resulting status.
    ///
    /// A store failure demotes this node to follower: without a successful
    /// renewal it cannot know whether it still holds the key.
    pub async fn tick(&self) -> Result<LeaderStatus> {
        let result = self
            .store
            .claim_or_renew(MASTER_KEY, MASTER_TERM_KEY, &self.node_name, self.ttl)
            .await;

        match result {
            Ok(claim) => {
                let role = if claim.holder == self.node_name {
                    Role::Leader
                } else {
                    Role::Follower
                };
                if claim.acquired {
                    tracing::info!(
                        node = %self.node_name,
                        term = claim.term,
                        "Assuming master role"
                    );
                }
                let status = LeaderStatus {
                    role,
                    leader: Some(claim.holder),
                    term: claim.term,
                };
                self.publish(status.clone());
                Ok(status)
            }
            Err(e) => {
                let term = self.status_tx.borrow().term;
                self.publish(LeaderStatus {
                    role: Role::Follower,
                    leader: None,
                    term,
                });
                Err(e)
            }
        }
    }

    fn publish(&self, next: LeaderStatus) {
        let previous = self.status_tx.send_replace(next.clone());
        if previous.role == next.role {
            return;
        }
        match next.role {
            Role::Leader => {
                tracing::info!(node = %self.node_name, term = next.term, "Became master");
            }
            Role::Follower => {
                tracing::info!(
                    node = %self.node_name,
                    leader = ?next.leader,
                    "Stepped down to follower"
                );
            }
        }
    }

    pub fn is_leader(&self) -> bool {
        self.status_tx.borrow().role == Role::Leader
    }

    pub fn status(&self) -> LeaderStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LeaderStatus> {
        self.status_tx.subscribe()
    }

    /// Reads the master key directly, bypassing the local snapshot.
    pub async fn current_leader(&self) -> Result<Option<String>> {
        self.store.get_string(MASTER_KEY).await
    }
}
