use anyhow::bail;

/// A bidirectional payment channel between two nodes.
///
/// Only one side's balance is stored; the other side is derived from the
/// fixed capacity, so `local + remote == capacity` holds by construction and
/// can never drift through arithmetic. Balances move exclusively through
/// [`Channel::apply`], which validates the capacity bounds before mutating --
/// the serialized check-then-update that both settlement and rebalancing
/// must go through.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    /// Endpoint with the lexicographically smaller id.
    a: String,
    b: String,
    capacity: f64,
    local_a: f64,
    pub fee_rate: f64,
}

impl Channel {
    pub fn new(
        id: impl Into<String>,
        u: impl Into<String>,
        v: impl Into<String>,
        capacity: f64,
        local_u: f64,
        fee_rate: f64,
    ) -> anyhow::Result<Self> {
        let (u, v) = (u.into(), v.into());
        if u == v {
            bail!("channel endpoints must differ: {}", u);
        }
        if capacity <= 0.0 {
            bail!("channel capacity must be positive, got {}", capacity);
        }
        if !(0.0..=capacity).contains(&local_u) {
            bail!(
                "initial balance {} outside [0, {}] for channel {}",
                local_u,
                capacity,
                u
            );
        }
        // Store the balance of the smaller endpoint.
        let (a, b, local_a) = if u < v {
            (u, v, local_u)
        } else {
            (v, u, capacity - local_u)
        };
        Ok(Self {
            id: id.into(),
            a,
            b,
            capacity,
            local_a,
            fee_rate,
        })
    }

    pub fn endpoints(&self) -> (&str, &str) {
        (&self.a, &self.b)
    }

    pub fn peer_of(&self, node: &str) -> Option<&str> {
        if node == self.a {
            Some(&self.b)
        } else if node == self.b {
            Some(&self.a)
        } else {
            None
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Balance on `node`'s side of the channel.
    pub fn local(&self, node: &str) -> f64 {
        if node == self.a {
            self.local_a
        } else {
            self.capacity - self.local_a
        }
    }

    pub fn remote(&self, node: &str) -> f64 {
        self.capacity - self.local(node)
    }

    /// `min(l, r) / C` -- the quantity liquidity-risk decisions are based on.
    pub fn balance_ratio(&self) -> f64 {
        self.local_a.min(self.capacity - self.local_a) / self.capacity
    }

    /// `|l - r| / C` in [0, 1]; 0 means perfectly balanced.
    pub fn skew(&self) -> f64 {
        (self.local_a - (self.capacity - self.local_a)).abs() / self.capacity
    }

    /// Move `amount` from `from`'s side to the other side.
    ///
    /// Rejects the update without mutating if either resulting balance would
    /// leave [0, capacity].
    pub fn apply(&mut self, from: &str, amount: f64) -> anyhow::Result<()> {
        if self.peer_of(from).is_none() {
            bail!("node {} is not an endpoint of channel {}", from, self.id);
        }
        let new_local = self.local(from) - amount;
        if new_local < 0.0 || new_local > self.capacity {
            bail!(
                "transfer of {} on channel {} would leave {}'s balance at {}",
                amount,
                self.id,
                from,
                new_local
            );
        }
        self.local_a = if from == self.a {
            new_local
        } else {
            self.capacity - new_local
        };
        Ok(())
    }

    /// Raw stored balance, used by snapshots.
    pub(super) fn stored_balance(&self) -> f64 {
        self.local_a
    }

    pub(super) fn set_stored_balance(&mut self, local_a: f64) {
        self.local_a = local_a;
    }

    /// Bounds check; conservation holds structurally but a programming error
    /// writing a raw balance could still break it.
    pub fn check_invariants(&self) -> anyhow::Result<()> {
        if !(0.0..=self.capacity).contains(&self.local_a) || !self.local_a.is_finite() {
            bail!(
                "channel {} balance {} outside [0, {}]",
                self.id,
                self.local_a,
                self.capacity
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> Channel {
        Channel::new("ch1", "alice", "bob", 1000.0, 600.0, 0.001).unwrap()
    }

    #[test]
    fn test_conservation_by_construction() {
        let ch = channel();
        assert_eq!(ch.local("alice") + ch.local("bob"), ch.capacity());
        assert_eq!(ch.local("alice"), 600.0);
        assert_eq!(ch.remote("alice"), 400.0);
    }

    #[test]
    fn test_endpoint_order_does_not_matter() {
        // Same channel declared from bob's perspective.
        let ch = Channel::new("ch1", "bob", "alice", 1000.0, 400.0, 0.001).unwrap();
        assert_eq!(ch.local("alice"), 600.0);
        assert_eq!(ch.local("bob"), 400.0);
    }

    #[test]
    fn test_apply_moves_balance() {
        let mut ch = channel();
        ch.apply("alice", 100.0).unwrap();
        assert_eq!(ch.local("alice"), 500.0);
        assert_eq!(ch.local("bob"), 500.0);
        assert_eq!(ch.local("alice") + ch.local("bob"), 1000.0);
    }

    #[test]
    fn test_apply_rejects_overdraft() {
        let mut ch = channel();
        assert!(ch.apply("bob", 500.0).is_err());
        // Balances untouched after rejection.
        assert_eq!(ch.local("bob"), 400.0);
    }

    #[test]
    fn test_apply_rejects_non_endpoint() {
        let mut ch = channel();
        assert!(ch.apply("carol", 10.0).is_err());
    }

    #[test]
    fn test_negative_amount_moves_the_other_way() {
        let mut ch = channel();
        ch.apply("alice", -100.0).unwrap();
        assert_eq!(ch.local("alice"), 700.0);
    }

    #[test]
    fn test_ratio_and_skew() {
        let ch = channel();
        assert!((ch.balance_ratio() - 0.4).abs() < 1e-12);
        assert!((ch.skew() - 0.2).abs() < 1e-12);

        let balanced = Channel::new("ch2", "a", "b", 1000.0, 500.0, 0.0).unwrap();
        assert_eq!(balanced.balance_ratio(), 0.5);
        assert_eq!(balanced.skew(), 0.0);
    }

    #[test]
    fn test_new_rejects_bad_inputs() {
        assert!(Channel::new("ch", "a", "a", 1000.0, 500.0, 0.0).is_err());
        assert!(Channel::new("ch", "a", "b", 0.0, 0.0, 0.0).is_err());
        assert!(Channel::new("ch", "a", "b", 1000.0, 1500.0, 0.0).is_err());
    }
}
