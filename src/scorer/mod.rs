pub mod policy;

pub use policy::{BalanceAwarePolicy, EdgeFeatures, NodeFeatures, NodeRepr, ScoringPolicy};

use crate::config::ScorerConfig;
use crate::graph::ChannelGraph;
use log::debug;
use std::collections::{BTreeMap, HashSet};

/// A directed circular route through the channel graph.
///
/// `nodes[i]` sends to `nodes[i + 1]` over `channels[i]`; the final channel
/// closes the cycle back to `nodes[0]`. Recomputed every engine cycle.
#[derive(Debug, Clone)]
pub struct CandidatePath {
    pub nodes: Vec<String>,
    pub channels: Vec<String>,
    pub score: f64,
    /// Constraint weight σ per channel, aligned with `channels`.
    pub edge_weights: Vec<f64>,
}

impl CandidatePath {
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Directed hops as `(from, to, channel_id)`.
    pub fn hops(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        let n = self.nodes.len();
        (0..n).map(move |i| {
            (
                self.nodes[i].as_str(),
                self.nodes[(i + 1) % n].as_str(),
                self.channels[i].as_str(),
            )
        })
    }

    pub fn total_fee(&self, graph: &ChannelGraph) -> f64 {
        self.channels
            .iter()
            .filter_map(|cid| graph.channel(cid))
            .map(|ch| ch.fee_rate)
            .sum()
    }
}

/// Ranks circular candidate routes by rebalancing suitability.
pub struct PathScorer {
    max_path_len: usize,
    policy: Box<dyn ScoringPolicy>,
}

impl PathScorer {
    pub fn new(config: &ScorerConfig) -> Self {
        Self::with_policy(config, Box::new(BalanceAwarePolicy))
    }

    pub fn with_policy(config: &ScorerConfig, policy: Box<dyn ScoringPolicy>) -> Self {
        Self {
            max_path_len: config.max_path_len,
            policy,
        }
    }

    /// Enumerate and score circular paths, best first.
    ///
    /// Ties break towards fewer hops, then lower total fee, so that near-equal
    /// candidates prefer the cheaper, shorter route.
    pub fn rank_paths(&self, graph: &ChannelGraph) -> Vec<CandidatePath> {
        let edge_weights = self.edge_constraint_weights(graph);
        let reprs = self.node_reprs(graph, &edge_weights);

        let mut paths: Vec<CandidatePath> = self
            .enumerate_cycles(graph)
            .into_iter()
            .map(|(nodes, channels)| self.score_path(nodes, channels, &edge_weights, &reprs))
            .collect();

        paths.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.len().cmp(&b.len()))
                .then_with(|| {
                    a.total_fee(graph)
                        .partial_cmp(&b.total_fee(graph))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        debug!("scorer: ranked {} candidate cycles", paths.len());
        paths
    }

    /// σ per channel from the pluggable policy.
    fn edge_constraint_weights(&self, graph: &ChannelGraph) -> BTreeMap<String, f64> {
        graph
            .channels()
            .map(|ch| {
                let features = EdgeFeatures {
                    capacity: ch.capacity(),
                    balance_ratio: ch.balance_ratio(),
                    fee_rate: ch.fee_rate,
                };
                (ch.id.clone(), self.policy.constraint_weight(&features))
            })
            .collect()
    }

    /// Node representations modulated by the mean incident σ.
    fn node_reprs(
        &self,
        graph: &ChannelGraph,
        edge_weights: &BTreeMap<String, f64>,
    ) -> BTreeMap<String, NodeRepr> {
        graph
            .nodes()
            .filter_map(|node| {
                let features = node_features(graph, &node.id)?;
                let mut weight_sum = 0.0;
                for cid in &node.channels {
                    weight_sum += edge_weights.get(cid).copied().unwrap_or(0.0);
                }
                let modulation = weight_sum / node.channels.len().max(1) as f64;
                let repr = NodeRepr {
                    value: features.mean_local_ratio * modulation,
                };
                Some((node.id.clone(), repr))
            })
            .collect()
    }

    fn score_path(
        &self,
        nodes: Vec<String>,
        channels: Vec<String>,
        edge_weights: &BTreeMap<String, f64>,
        reprs: &BTreeMap<String, NodeRepr>,
    ) -> CandidatePath {
        let n = nodes.len();
        let mut score = 0.0;
        let mut weights = Vec::with_capacity(n);
        for i in 0..n {
            let from = &nodes[i];
            let to = &nodes[(i + 1) % n];
            let sigma = edge_weights.get(&channels[i]).copied().unwrap_or(0.0);
            let compat = match (reprs.get(from), reprs.get(to)) {
                (Some(f), Some(t)) => self.policy.compatibility(f, t),
                _ => 0.0,
            };
            score += sigma * compat;
            weights.push(sigma);
        }
        CandidatePath {
            nodes,
            channels,
            score,
            edge_weights: weights,
        }
    }

    /// Directed simple cycles of 3..=K channels.
    ///
    /// Each cycle is anchored at its lexicographically smallest node so it is
    /// enumerated exactly once per direction; both directions are kept since
    /// transfer feasibility depends on the direction of travel.
    fn enumerate_cycles(&self, graph: &ChannelGraph) -> Vec<(Vec<String>, Vec<String>)> {
        let mut cycles = Vec::new();
        for anchor in graph.node_ids() {
            let mut visited: HashSet<String> = HashSet::new();
            visited.insert(anchor.clone());
            let mut node_stack = vec![anchor.clone()];
            let mut channel_stack = Vec::new();
            self.dfs_cycles(
                graph,
                anchor,
                &mut node_stack,
                &mut channel_stack,
                &mut visited,
                &mut cycles,
            );
        }
        cycles
    }

    fn dfs_cycles(
        &self,
        graph: &ChannelGraph,
        anchor: &str,
        node_stack: &mut Vec<String>,
        channel_stack: &mut Vec<String>,
        visited: &mut HashSet<String>,
        cycles: &mut Vec<(Vec<String>, Vec<String>)>,
    ) {
        let Some(current) = node_stack.last().cloned() else {
            return;
        };
        for (peer, channel_id) in graph.neighbors(&current) {
            if peer == anchor {
                if node_stack.len() >= 3 {
                    let mut channels = channel_stack.clone();
                    channels.push(channel_id);
                    cycles.push((node_stack.clone(), channels));
                }
                continue;
            }
            // Anchoring at the smallest node de-duplicates rotations.
            if peer.as_str() <= anchor || visited.contains(&peer) {
                continue;
            }
            if node_stack.len() >= self.max_path_len {
                continue;
            }
            visited.insert(peer.clone());
            node_stack.push(peer.clone());
            channel_stack.push(channel_id);
            self.dfs_cycles(graph, anchor, node_stack, channel_stack, visited, cycles);
            channel_stack.pop();
            if let Some(popped) = node_stack.pop() {
                visited.remove(&popped);
            }
        }
    }
}

/// Node feature extraction shared with external policies.
pub fn node_features(graph: &ChannelGraph, node_id: &str) -> Option<NodeFeatures> {
    let node = graph.node(node_id)?;
    let mut local_sum = 0.0;
    let mut remote_sum = 0.0;
    let mut count: f64 = 0.0;
    for cid in &node.channels {
        if let Some(ch) = graph.channel(cid) {
            local_sum += ch.local(node_id) / ch.capacity();
            remote_sum += ch.remote(node_id) / ch.capacity();
            count += 1.0;
        }
    }
    let denom = count.max(1.0);
    Some(NodeFeatures {
        total_local: graph.total_local_balance(node_id),
        net_flow: node.outgoing_rate - node.incoming_rate,
        mean_local_ratio: local_sum / denom,
        mean_remote_ratio: remote_sum / denom,
    })
}
