use crate::config::MonitorConfig;
use crate::graph::ChannelGraph;
use log::debug;

/// What a node sees about its own liquidity when deciding whether to ask
/// for rebalancing.
#[derive(Debug, Clone)]
pub struct LiquidityObservation {
    /// Sum of local balances over incident channels.
    pub total_local: f64,
    /// Outgoing minus incoming rate estimate (funds/hour), pre-guard.
    pub net_flow: f64,
    /// `min(l, r) / C` per incident channel.
    pub channel_ratios: Vec<f64>,
}

/// Decision seam: maps an observation to request-or-not.
///
/// The protocol only fixes the contract (state in, bool out); the default is
/// the rule-based threshold policy below, and a learned policy can be slotted
/// in without touching the monitor or the scheduler.
pub trait DecisionPolicy: Send + Sync {
    fn should_request(&self, obs: &LiquidityObservation) -> bool;
}

/// Rule-based policy: balance-ratio violation first, then time-to-depletion.
pub struct ThresholdPolicy {
    /// Minimum balance ratio θ.
    pub theta: f64,
    /// TTD threshold τ in hours.
    pub tau_hours: f64,
    /// Division guard ε.
    pub epsilon: f64,
}

impl DecisionPolicy for ThresholdPolicy {
    fn should_request(&self, obs: &LiquidityObservation) -> bool {
        // A channel near depletion on either side trumps the flow estimate.
        if obs.channel_ratios.iter().any(|&r| r < self.theta) {
            return true;
        }
        let flow = obs.net_flow.max(self.epsilon);
        let ttd_hours = obs.total_local / flow;
        ttd_hours < self.tau_hours
    }
}

/// Per-node liquidity assessment over a read-only graph snapshot.
pub struct LiquidityMonitor {
    policy: Box<dyn DecisionPolicy>,
}

impl LiquidityMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            policy: Box::new(ThresholdPolicy {
                theta: config.theta,
                tau_hours: config.tau_hours,
                epsilon: config.epsilon,
            }),
        }
    }

    pub fn with_policy(policy: Box<dyn DecisionPolicy>) -> Self {
        Self { policy }
    }

    pub fn observe(&self, node_id: &str, graph: &ChannelGraph) -> Option<LiquidityObservation> {
        let node = graph.node(node_id)?;
        let channel_ratios = node
            .channels
            .iter()
            .filter_map(|cid| graph.channel(cid))
            .map(|ch| ch.balance_ratio())
            .collect();
        Some(LiquidityObservation {
            total_local: graph.total_local_balance(node_id),
            net_flow: node.outgoing_rate - node.incoming_rate,
            channel_ratios,
        })
    }

    /// Should `node_id` request rebalancing? Pure with respect to the graph;
    /// the scheduler records the request when this returns true.
    pub fn assess(&self, node_id: &str, graph: &ChannelGraph) -> bool {
        let Some(obs) = self.observe(node_id, graph) else {
            return false;
        };
        if obs.channel_ratios.is_empty() {
            return false;
        }
        let request = self.policy.should_request(&obs);
        if request {
            debug!(
                "monitor: {} requests rebalancing (total_local={:.1}, net_flow={:.3})",
                node_id, obs.total_local, obs.net_flow
            );
        }
        request
    }
}
