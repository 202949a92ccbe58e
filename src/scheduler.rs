use crate::config::Config;
use crate::db::Database;
use crate::election::{LeaderElection, LeaderTerm, TermState, TermTracker};
use crate::engine::RebalancingEngine;
use crate::graph::ChannelGraph;
use crate::monitor::LiquidityMonitor;
use crate::scorer::PathScorer;
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Top-level protocol driver.
///
/// Collects per-node rebalancing requests, decides when an election is due,
/// moves the leader-term state machine, and invokes the engine under the
/// elected coordinator's authority. Election failures defer silently; only
/// invariant breakage propagates as an error.
pub struct RebalancingScheduler {
    monitor: LiquidityMonitor,
    election: LeaderElection,
    scorer: PathScorer,
    engine: RebalancingEngine,
    terms: TermTracker,
    /// Pending requests: node id -> request timestamp.
    pending: BTreeMap<String, f64>,
    delta_t: f64,
    last_election: Option<f64>,
    dry_run: bool,
}

impl RebalancingScheduler {
    pub fn new(config: &Config) -> Self {
        Self {
            monitor: LiquidityMonitor::new(&config.monitor),
            election: LeaderElection::new(&config.election),
            scorer: PathScorer::new(&config.scorer),
            engine: RebalancingEngine::new(&config.engine),
            terms: TermTracker::new(),
            pending: BTreeMap::new(),
            delta_t: config.election.delta_t_secs,
            last_election: None,
            dry_run: config.general.dry_run,
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn current_leader(&self) -> Option<&LeaderTerm> {
        self.terms.current()
    }

    /// One protocol step at simulated time `now`.
    pub fn step(
        &mut self,
        graph: &mut ChannelGraph,
        db: &Database,
        now: f64,
    ) -> anyhow::Result<()> {
        self.collect_requests(graph, now);

        if self.should_trigger_election(graph, now) {
            self.run_election(graph, db, now)?;
        }

        // A pending handover completes at this cycle boundary: no engine
        // work is ever in flight between steps.
        if matches!(self.terms.state(), TermState::Handover { .. }) {
            let outgoing = self.terms.complete_handover()?;
            if let Some(id) = outgoing.db_id {
                db.record_term_end(id, now, "superseded")?;
            }
            info!(
                "scheduler: handover complete, {} relinquished",
                outgoing.leader
            );
        }

        if !self.pending.is_empty() {
            if let Some(term) = self.terms.current().cloned() {
                self.run_engine(graph, db, &term, now)?;
            } else {
                debug!(
                    "scheduler: {} request(s) pending, no leader; deferred",
                    self.pending.len()
                );
            }
        }

        Ok(())
    }

    /// Ask every node's monitor whether it wants rebalancing.
    fn collect_requests(&mut self, graph: &ChannelGraph, now: f64) {
        let ids: Vec<String> = graph.node_ids().cloned().collect();
        for id in ids {
            if self.monitor.assess(&id, graph) {
                self.pending.entry(id).or_insert(now);
            }
        }
    }

    fn should_trigger_election(&self, graph: &ChannelGraph, now: f64) -> bool {
        match self.terms.current() {
            // Request-driven: elect as soon as anyone asks.
            None => !self.pending.is_empty(),
            Some(term) => {
                if !self.election.is_eligible(&term.leader, graph) {
                    debug!("scheduler: leader {} lost eligibility", term.leader);
                    return true;
                }
                now - self.last_election.unwrap_or(term.elected_at) >= self.delta_t
            }
        }
    }

    fn run_election(
        &mut self,
        graph: &ChannelGraph,
        db: &Database,
        now: f64,
    ) -> anyhow::Result<()> {
        let candidates: Vec<String> = self.pending.keys().cloned().collect();
        self.terms.begin_election()?;
        self.last_election = Some(now);

        let winner = self.election.elect(&candidates, now, graph);

        let Some(leader) = winner else {
            // Keep a still-fit sitting leader rather than forcing a gap.
            let sitting_is_fit = matches!(
                self.terms.state(),
                TermState::ElectionPending { previous: Some(p) }
                    if self.election.is_eligible(&p.leader, graph)
            );
            if sitting_is_fit {
                self.terms.retain()?;
                debug!("scheduler: no successor, sitting leader retained");
            } else if let Some(prev) = self.terms.on_deferred()? {
                if let Some(id) = prev.db_id {
                    db.record_term_end(id, now, "no_eligible_successor")?;
                }
                info!("scheduler: term of {} ended, election deferred", prev.leader);
            } else {
                debug!("scheduler: election deferred (no eligible candidate)");
            }
            return Ok(());
        };

        // Broadcast-and-verify round trip before anyone adopts the leader.
        let announcement = self.election.announce(&leader, now);
        if !self.election.verify(&announcement, graph) {
            warn!("scheduler: announcement for {} failed verification", leader);
            self.terms.on_deferred()?;
            return Ok(());
        }

        let mut term = LeaderTerm::new(leader.clone(), now);
        term.db_id = Some(db.record_term_start(&leader, now)?);
        self.terms.on_elected(term)?;

        // The election consumes the candidate set.
        self.pending.clear();

        match self.terms.state() {
            TermState::Handover { outgoing, .. } => {
                info!(
                    "scheduler: elected {} (handover from {})",
                    leader, outgoing.leader
                );
            }
            _ => info!("scheduler: elected {}", leader),
        }
        Ok(())
    }

    fn run_engine(
        &mut self,
        graph: &mut ChannelGraph,
        db: &Database,
        term: &LeaderTerm,
        now: f64,
    ) -> anyhow::Result<()> {
        if self.dry_run {
            let mut shadow = graph.clone();
            let report = self.engine.run(&mut shadow, &self.scorer, now)?;
            info!(
                "scheduler: dry-run under {}: {} cycle(s), {} committed (not executed)",
                term.leader,
                report.records.len(),
                report.committed()
            );
            return Ok(());
        }

        let report = self.engine.run(graph, &self.scorer, now)?;
        for record in &report.records {
            db.record_cycle(&term.leader, record)?;
        }
        info!(
            "scheduler: run under {}: {} committed, converged={}",
            term.leader,
            report.committed(),
            report.converged
        );

        // A served request is spent; nodes still at risk re-request on the
        // next step.
        self.pending.clear();
        Ok(())
    }
}
