pub mod term;

pub use term::{LeaderTerm, TermState, TermTracker};

use crate::config::ElectionConfig;
use crate::crypto::{sortition_key, KeyedSigner, Signer};
use crate::graph::ChannelGraph;
use log::{debug, info};

/// Signed leader announcement, broadcast after a successful election so that
/// every node can verify and adopt the new coordinator.
#[derive(Debug, Clone)]
pub struct Announcement {
    pub leader_id: String,
    pub timestamp: f64,
    pub sortition_key: u64,
    pub signature: String,
}

/// Sortition-based leader election over the set of requesting nodes.
///
/// Candidates are ordered by a verifiable hash of `(node_id, timestamp)`;
/// the first one in ascending key order that passes the funding and
/// channel-health checks becomes coordinator. Deterministic given the same
/// candidate set and timestamp, and unpredictable ahead of the timestamp.
pub struct LeaderElection {
    /// Minimum total outgoing balance κ.
    kappa: f64,
    /// Minimum balance ratio θ each of the leader's channels must hold.
    theta: f64,
    signer: KeyedSigner,
}

impl LeaderElection {
    pub fn new(config: &ElectionConfig) -> Self {
        Self {
            kappa: config.kappa,
            theta: config.theta,
            signer: KeyedSigner::new(config.signing_key.as_bytes().to_vec()),
        }
    }

    /// A coordinator must be able to fund transfers (total outgoing ≥ κ) and
    /// must not itself be the bottleneck (every channel's balance ratio ≥ θ).
    pub fn is_eligible(&self, node_id: &str, graph: &ChannelGraph) -> bool {
        let Some(node) = graph.node(node_id) else {
            return false;
        };
        if !node.can_lead {
            return false;
        }
        if graph.total_local_balance(node_id) < self.kappa {
            return false;
        }
        node.channels
            .iter()
            .filter_map(|cid| graph.channel(cid))
            .all(|ch| ch.balance_ratio() >= self.theta)
    }

    /// Run one sortition round. Returns `None` when no candidate is eligible;
    /// the caller defers to the next trigger rather than forcing a leader.
    pub fn elect(
        &self,
        candidates: &[String],
        timestamp: f64,
        graph: &ChannelGraph,
    ) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }

        let mut keyed: Vec<(u64, &String)> = candidates
            .iter()
            .filter(|id| graph.node(id).is_some())
            .map(|id| (sortition_key(id, timestamp), id))
            .collect();
        // Ascending by key; id as tie-break keeps the ordering total.
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        for (key, id) in keyed {
            if self.is_eligible(id, graph) {
                debug!("election: {} wins sortition (key={:016x})", id, key);
                return Some(id.clone());
            }
            debug!("election: {} drawn but ineligible, trying next", id);
        }
        info!("election: no eligible leader among {} candidates", candidates.len());
        None
    }

    fn payload(leader_id: &str, timestamp: f64, key: u64) -> Vec<u8> {
        let mut p = leader_id.as_bytes().to_vec();
        p.push(b':');
        p.extend_from_slice(&timestamp.to_bits().to_be_bytes());
        p.push(b':');
        p.extend_from_slice(&key.to_be_bytes());
        p
    }

    /// Build the signed announcement the new leader broadcasts.
    pub fn announce(&self, leader_id: &str, timestamp: f64) -> Announcement {
        let key = sortition_key(leader_id, timestamp);
        let signature = self.signer.sign(&Self::payload(leader_id, timestamp, key));
        Announcement {
            leader_id: leader_id.to_string(),
            timestamp,
            sortition_key: key,
            signature,
        }
    }

    /// Verify an announcement before adopting its leader: the sortition key
    /// must recompute, the signature must check out, and the claimed leader
    /// must still be eligible.
    pub fn verify(&self, ann: &Announcement, graph: &ChannelGraph) -> bool {
        if sortition_key(&ann.leader_id, ann.timestamp) != ann.sortition_key {
            return false;
        }
        let payload = Self::payload(&ann.leader_id, ann.timestamp, ann.sortition_key);
        if !self.signer.verify(&payload, &ann.signature) {
            return false;
        }
        self.is_eligible(&ann.leader_id, graph)
    }
}
