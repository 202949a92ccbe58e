use crate::config::EngineConfig;
use crate::graph::ChannelGraph;
use crate::scorer::{CandidatePath, PathScorer};
use log::{debug, info, warn};

/// What happened in one engine cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A transfer was committed along a validated path.
    Applied,
    /// At least one tentative transfer was rolled back and no path committed.
    RolledBack,
    /// No path could even be attempted.
    Skipped,
}

/// Audit record for one rebalancing cycle.
#[derive(Debug, Clone)]
pub struct CycleRecord {
    pub index: u32,
    pub amount: f64,
    pub path: Vec<String>,
    pub outcome: CycleOutcome,
    pub sim_time: f64,
}

/// Result of a full engine run.
#[derive(Debug)]
pub struct RunReport {
    pub records: Vec<CycleRecord>,
    pub converged: bool,
    /// Attempt amount left after all reductions; exposed for verification.
    pub final_amount: f64,
}

impl RunReport {
    pub fn committed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome == CycleOutcome::Applied)
            .count()
    }
}

/// Multi-cycle rebalancing executor.
///
/// Per cycle: rank paths, walk them best-first, tentatively apply the
/// transfer around the whole cycle, validate skew and balance-ratio bounds
/// on every touched channel, and either commit or restore the pre-attempt
/// snapshot exactly. Bounded by `max_cycles`; a cycle with nothing to commit
/// is unproductive, never fatal.
pub struct RebalancingEngine {
    max_cycles: u32,
    initial_amount: f64,
    reduction_factor: f64,
    sigma: f64,
    theta: f64,
    epsilon: f64,
}

impl RebalancingEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_cycles: config.max_cycles,
            initial_amount: config.initial_amount,
            reduction_factor: config.reduction_factor,
            sigma: config.sigma,
            theta: config.theta,
            epsilon: config.epsilon,
        }
    }

    /// Largest amount every directed hop can carry: the minimum sender-side
    /// balance along the cycle (which equals the receiver-side headroom).
    fn max_transferable(&self, graph: &ChannelGraph, path: &CandidatePath) -> f64 {
        path.hops()
            .filter_map(|(from, _, cid)| graph.channel(cid).map(|ch| ch.local(from)))
            .fold(f64::INFINITY, f64::min)
    }

    /// Capacity feasibility for a concrete amount, checked before touching
    /// any balance.
    fn is_feasible(&self, graph: &ChannelGraph, path: &CandidatePath, amount: f64) -> bool {
        path.hops().all(|(from, _, cid)| match graph.channel(cid) {
            Some(ch) => {
                let new_local = ch.local(from) - amount;
                new_local >= 0.0 && new_local <= ch.capacity()
            }
            None => false,
        })
    }

    /// Apply `amount` around the cycle. Any hop failure aborts; the caller
    /// restores the snapshot, making the whole application atomic.
    fn apply_path(
        &self,
        graph: &mut ChannelGraph,
        path: &CandidatePath,
        amount: f64,
    ) -> anyhow::Result<()> {
        let hops: Vec<(String, String)> = path
            .hops()
            .map(|(from, _, cid)| (from.to_string(), cid.to_string()))
            .collect();
        for (from, cid) in hops {
            graph.transfer(&cid, &from, amount)?;
        }
        Ok(())
    }

    /// Post-transfer validation over every touched channel.
    fn violates_constraints(&self, graph: &ChannelGraph, path: &CandidatePath) -> bool {
        path.channels.iter().any(|cid| match graph.channel(cid) {
            Some(ch) => ch.skew() > self.sigma || ch.balance_ratio() < self.theta,
            None => true,
        })
    }

    /// Run up to `max_cycles` rebalancing cycles over `graph`.
    ///
    /// Returns the cycle records; the graph is left in whatever state the
    /// committed transfers produced (possibly unchanged). The only hard
    /// error is a broken channel invariant after a commit, in which case the
    /// pre-attempt snapshot is restored before propagating.
    pub fn run(
        &self,
        graph: &mut ChannelGraph,
        scorer: &PathScorer,
        sim_time: f64,
    ) -> anyhow::Result<RunReport> {
        let mut amount = self.initial_amount;
        let mut records = Vec::new();
        let mut converged = false;

        'cycles: for index in 1..=self.max_cycles {
            let paths = scorer.rank_paths(graph);
            if paths.is_empty() {
                debug!("engine: cycle {}: no candidate paths", index);
                records.push(CycleRecord {
                    index,
                    amount,
                    path: Vec::new(),
                    outcome: CycleOutcome::Skipped,
                    sim_time,
                });
                continue;
            }

            let mut rolled_back = false;
            let mut committed = false;

            for path in &paths {
                let transferable = self.max_transferable(graph, path);
                if transferable <= 0.0 {
                    continue;
                }
                let attempt = transferable.min(amount);
                if !self.is_feasible(graph, path, attempt) {
                    continue;
                }

                let skew_before = graph.max_skew();
                let snapshot = graph.snapshot();

                if self.apply_path(graph, path, attempt).is_err() {
                    // A hop raced out of feasibility; undo and move on.
                    graph.restore(&snapshot);
                    continue;
                }

                if self.violates_constraints(graph, path) {
                    graph.restore(&snapshot);
                    amount *= self.reduction_factor;
                    rolled_back = true;
                    debug!(
                        "engine: cycle {}: rolled back {:.2} on {:?}, next attempt {:.2}",
                        index, attempt, path.nodes, amount
                    );
                    continue;
                }

                // Committed. A failure here is a programming-logic fault:
                // restore the last consistent state and abort the run.
                if let Err(e) = graph.check_invariants() {
                    warn!("engine: invariant breach after commit, restoring snapshot");
                    graph.restore(&snapshot);
                    return Err(e);
                }

                info!(
                    "engine: cycle {}: committed {:.2} along {:?}",
                    index, attempt, path.nodes
                );
                records.push(CycleRecord {
                    index,
                    amount: attempt,
                    path: path.nodes.clone(),
                    outcome: CycleOutcome::Applied,
                    sim_time,
                });
                committed = true;

                let improvement = skew_before - graph.max_skew();
                if improvement > self.epsilon {
                    debug!(
                        "engine: converged after cycle {} (max skew down {:.4})",
                        index, improvement
                    );
                    converged = true;
                    break 'cycles;
                }
                break;
            }

            if !committed {
                records.push(CycleRecord {
                    index,
                    amount,
                    path: Vec::new(),
                    outcome: if rolled_back {
                        CycleOutcome::RolledBack
                    } else {
                        CycleOutcome::Skipped
                    },
                    sim_time,
                });
            }
        }

        Ok(RunReport {
            records,
            converged,
            final_amount: amount,
        })
    }
}
