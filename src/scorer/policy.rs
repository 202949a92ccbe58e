/// Features describing a node's liquidity position.
#[derive(Debug, Clone)]
pub struct NodeFeatures {
    pub total_local: f64,
    pub net_flow: f64,
    /// Mean of `local / C` over incident channels.
    pub mean_local_ratio: f64,
    /// Mean of `remote / C` over incident channels.
    pub mean_remote_ratio: f64,
}

/// Features describing a single channel.
#[derive(Debug, Clone)]
pub struct EdgeFeatures {
    pub capacity: f64,
    /// `min(l, r) / C`.
    pub balance_ratio: f64,
    pub fee_rate: f64,
}

/// Node representation after modulation by the mean incident constraint
/// weight: a node surrounded by depleted channels is dampened towards zero.
#[derive(Debug, Clone, Copy)]
pub struct NodeRepr {
    pub value: f64,
}

/// Scoring seam for path ranking.
///
/// Implementations map edge features to a constraint weight σ in [0, 1]
/// (near 0 when the channel approaches depletion) and score the
/// compatibility of two modulated endpoint representations. The ranking in
/// [`super::PathScorer`] only requires monotonicity: lowering an edge's σ
/// must never raise the score of a path containing it. A learned model
/// satisfies the same contract as the heuristic below.
pub trait ScoringPolicy: Send + Sync {
    fn constraint_weight(&self, edge: &EdgeFeatures) -> f64;
    fn compatibility(&self, from: &NodeRepr, to: &NodeRepr) -> f64;
}

/// Deterministic balance-aware heuristic.
///
/// σ grows linearly from 0 (one side empty) to 1 (perfectly balanced, ratio
/// 0.5); compatibility is highest for endpoints with matching modulated
/// liquidity positions.
pub struct BalanceAwarePolicy;

impl ScoringPolicy for BalanceAwarePolicy {
    fn constraint_weight(&self, edge: &EdgeFeatures) -> f64 {
        (edge.balance_ratio / 0.5).clamp(0.0, 1.0)
    }

    fn compatibility(&self, from: &NodeRepr, to: &NodeRepr) -> f64 {
        (1.0 - (from.value - to.value).abs()).clamp(0.0, 1.0)
    }
}
