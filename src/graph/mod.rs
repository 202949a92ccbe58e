pub mod channel;

pub use channel::Channel;

use anyhow::{bail, Context};
use std::collections::BTreeMap;

/// A node in the payment channel network.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub channels: Vec<String>,
    /// Estimated outgoing transaction rate (funds/hour), fed by traffic.
    pub outgoing_rate: f64,
    /// Estimated incoming transaction rate (funds/hour).
    pub incoming_rate: f64,
    /// Operator opt-out from coordinating rebalancing.
    pub can_lead: bool,
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channels: Vec::new(),
            outgoing_rate: 0.0,
            incoming_rate: 0.0,
            can_lead: true,
        }
    }
}

/// The authoritative network state: nodes, channels, balances.
///
/// All mutation goes through checked operations; every successful mutation
/// bumps `version`. BTreeMaps keep iteration order deterministic, which the
/// election and path search rely on for reproducible runs.
#[derive(Debug, Clone, Default)]
pub struct ChannelGraph {
    nodes: BTreeMap<String, Node>,
    channels: BTreeMap<String, Channel>,
    version: u64,
}

/// Exact copy of every channel balance at a point in time.
///
/// `restore` is bit-for-bit: rollback after a failed rebalancing attempt
/// must reproduce the pre-attempt state exactly.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    version: u64,
    balances: Vec<(String, f64)>,
}

impl ChannelGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn add_node(&mut self, node: Node) {
        self.version += 1;
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn add_channel(
        &mut self,
        id: impl Into<String>,
        u: &str,
        v: &str,
        capacity: f64,
        local_u: f64,
        fee_rate: f64,
    ) -> anyhow::Result<()> {
        let id = id.into();
        if !self.nodes.contains_key(u) {
            bail!("channel {} references unknown node {}", id, u);
        }
        if !self.nodes.contains_key(v) {
            bail!("channel {} references unknown node {}", id, v);
        }
        if self.channels.contains_key(&id) {
            bail!("duplicate channel id {}", id);
        }
        let channel = Channel::new(id.clone(), u, v, capacity, local_u, fee_rate)?;
        self.channels.insert(id.clone(), channel);
        for endpoint in [u, v] {
            if let Some(node) = self.nodes.get_mut(endpoint) {
                node.channels.push(id.clone());
            }
        }
        self.version += 1;
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        if self.nodes.contains_key(id) {
            self.version += 1;
        }
        self.nodes.get_mut(id)
    }

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Incident `(peer, channel_id)` pairs for a node.
    pub fn neighbors(&self, node: &str) -> Vec<(String, String)> {
        let Some(n) = self.nodes.get(node) else {
            return Vec::new();
        };
        n.channels
            .iter()
            .filter_map(|cid| {
                let ch = self.channels.get(cid)?;
                let peer = ch.peer_of(node)?;
                Some((peer.to_string(), cid.clone()))
            })
            .collect()
    }

    /// Channel connecting two nodes, if any.
    pub fn channel_between(&self, u: &str, v: &str) -> Option<&Channel> {
        let n = self.nodes.get(u)?;
        n.channels
            .iter()
            .filter_map(|cid| self.channels.get(cid))
            .find(|ch| ch.peer_of(u) == Some(v))
    }

    /// Sum of `node`'s side over all incident channels.
    pub fn total_local_balance(&self, node: &str) -> f64 {
        let Some(n) = self.nodes.get(node) else {
            return 0.0;
        };
        n.channels
            .iter()
            .filter_map(|cid| self.channels.get(cid))
            .map(|ch| ch.local(node))
            .sum()
    }

    /// Move `amount` from `from`'s side of channel `id` to the peer's side.
    pub fn transfer(&mut self, id: &str, from: &str, amount: f64) -> anyhow::Result<()> {
        let channel = self
            .channels
            .get_mut(id)
            .with_context(|| format!("unknown channel {}", id))?;
        channel.apply(from, amount)?;
        self.version += 1;
        Ok(())
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            version: self.version,
            balances: self
                .channels
                .iter()
                .map(|(id, ch)| (id.clone(), ch.stored_balance()))
                .collect(),
        }
    }

    pub fn restore(&mut self, snapshot: &GraphSnapshot) {
        for (id, balance) in &snapshot.balances {
            if let Some(ch) = self.channels.get_mut(id) {
                ch.set_stored_balance(*balance);
            }
        }
        self.version += 1;
    }

    /// Largest skew across all channels; the engine's convergence metric.
    pub fn max_skew(&self) -> f64 {
        self.channels
            .values()
            .map(|ch| ch.skew())
            .fold(0.0, f64::max)
    }

    /// Defensive invariant sweep. A failure here is a programming-logic
    /// fault, not a recoverable protocol outcome.
    pub fn check_invariants(&self) -> anyhow::Result<()> {
        for ch in self.channels.values() {
            ch.check_invariants()?;
        }
        Ok(())
    }
}

impl GraphSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }
}
