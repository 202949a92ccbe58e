use crate::config::TrafficConfig;
use crate::graph::ChannelGraph;
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// Random transaction settlement feed.
///
/// Stands in for live payment traffic: each tick settles a handful of
/// transfers between adjacent nodes through the same checked balance update
/// the rebalancer uses, and refreshes the per-node rate estimates the
/// liquidity monitor consumes. Seeded, so a run is reproducible.
pub struct TrafficGenerator {
    rng: StdRng,
    events_per_tick: u32,
    min_amount: f64,
    max_amount: f64,
    rate_alpha: f64,
}

impl TrafficGenerator {
    pub fn new(config: &TrafficConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            events_per_tick: config.events_per_tick,
            min_amount: config.min_amount,
            max_amount: config.max_amount,
            rate_alpha: config.rate_alpha,
        }
    }

    /// Settle one tick's worth of traffic; `tick_hours` scales the rate
    /// estimates. Returns the number of successful settlements (a transfer
    /// that would overdraw its channel simply fails, as a payment would).
    pub fn tick(&mut self, graph: &mut ChannelGraph, tick_hours: f64) -> u32 {
        let node_ids: Vec<String> = graph.node_ids().cloned().collect();
        if node_ids.is_empty() {
            return 0;
        }

        let mut sent: BTreeMap<String, f64> = BTreeMap::new();
        let mut received: BTreeMap<String, f64> = BTreeMap::new();
        let mut settled = 0;

        for _ in 0..self.events_per_tick {
            let sender = &node_ids[self.rng.gen_range(0..node_ids.len())];
            let neighbors = graph.neighbors(sender);
            if neighbors.is_empty() {
                continue;
            }
            let (receiver, channel_id) = &neighbors[self.rng.gen_range(0..neighbors.len())];
            let amount = self.rng.gen_range(self.min_amount..=self.max_amount);

            match graph.transfer(channel_id, sender, amount) {
                Ok(()) => {
                    *sent.entry(sender.clone()).or_default() += amount;
                    *received.entry(receiver.clone()).or_default() += amount;
                    settled += 1;
                    trace!(
                        "traffic: {} -> {} settled {:.2} over {}",
                        sender,
                        receiver,
                        amount,
                        channel_id
                    );
                }
                Err(_) => {
                    trace!(
                        "traffic: {} -> {} failed ({:.2} over {})",
                        sender,
                        receiver,
                        amount,
                        channel_id
                    );
                }
            }
        }

        // EWMA over per-tick volume keeps the estimates smooth under bursty
        // arrivals.
        let hours = tick_hours.max(f64::EPSILON);
        for id in &node_ids {
            let out_rate = sent.get(id).copied().unwrap_or(0.0) / hours;
            let in_rate = received.get(id).copied().unwrap_or(0.0) / hours;
            if let Some(node) = graph.node_mut(id) {
                node.outgoing_rate =
                    (1.0 - self.rate_alpha) * node.outgoing_rate + self.rate_alpha * out_rate;
                node.incoming_rate =
                    (1.0 - self.rate_alpha) * node.incoming_rate + self.rate_alpha * in_rate;
            }
        }

        debug!("traffic: {}/{} settlements", settled, self.events_per_tick);
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ChannelGraph, Node};

    fn config(seed: u64) -> TrafficConfig {
        TrafficConfig {
            enabled: true,
            events_per_tick: 10,
            min_amount: 10.0,
            max_amount: 50.0,
            seed,
            rate_alpha: 0.2,
        }
    }

    fn triangle() -> ChannelGraph {
        let mut g = ChannelGraph::new();
        for id in ["node_a", "node_b", "node_c"] {
            g.add_node(Node::new(id));
        }
        g.add_channel("ab", "node_a", "node_b", 1000.0, 500.0, 0.001).unwrap();
        g.add_channel("bc", "node_b", "node_c", 1000.0, 500.0, 0.001).unwrap();
        g.add_channel("ca", "node_c", "node_a", 1000.0, 500.0, 0.001).unwrap();
        g
    }

    #[test]
    fn test_tick_settles_and_preserves_invariants() {
        let mut g = triangle();
        let mut traffic = TrafficGenerator::new(&config(7));
        let settled = traffic.tick(&mut g, 1.0 / 60.0);
        assert!(settled > 0);
        g.check_invariants().unwrap();
        for ch in g.channels() {
            let (u, v) = ch.endpoints();
            assert!((ch.local(u) + ch.local(v) - ch.capacity()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let mut g1 = triangle();
        let mut g2 = triangle();
        let mut t1 = TrafficGenerator::new(&config(42));
        let mut t2 = TrafficGenerator::new(&config(42));
        for _ in 0..5 {
            t1.tick(&mut g1, 1.0 / 60.0);
            t2.tick(&mut g2, 1.0 / 60.0);
        }
        for (a, b) in g1.channels().zip(g2.channels()) {
            assert_eq!(a.local(a.endpoints().0), b.local(b.endpoints().0));
        }
    }

    #[test]
    fn test_rates_are_updated() {
        let mut g = triangle();
        let mut traffic = TrafficGenerator::new(&config(7));
        traffic.tick(&mut g, 1.0 / 60.0);
        let any_rate = g
            .nodes()
            .any(|n| n.outgoing_rate > 0.0 || n.incoming_rate > 0.0);
        assert!(any_rate);
    }

    #[test]
    fn test_overdraw_fails_without_corruption() {
        // Amounts far beyond the channel capacity: every settlement fails
        // and balances stay exactly where they were.
        let mut g = triangle();
        let mut cfg = config(7);
        cfg.min_amount = 5000.0;
        cfg.max_amount = 6000.0;
        let mut traffic = TrafficGenerator::new(&cfg);
        let settled = traffic.tick(&mut g, 1.0 / 60.0);
        assert_eq!(settled, 0);
        for ch in g.channels() {
            assert_eq!(ch.local(ch.endpoints().0), 500.0);
        }
    }

    #[test]
    fn test_empty_graph_is_a_noop() {
        let mut g = ChannelGraph::new();
        let mut traffic = TrafficGenerator::new(&config(7));
        assert_eq!(traffic.tick(&mut g, 1.0 / 60.0), 0);
    }
}
