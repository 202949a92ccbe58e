use anyhow::bail;

/// One coordinator's term of authority.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderTerm {
    pub leader: String,
    pub elected_at: f64,
    /// Row id in the audit db, set once the term is persisted.
    pub db_id: Option<i64>,
}

impl LeaderTerm {
    pub fn new(leader: impl Into<String>, elected_at: f64) -> Self {
        Self {
            leader: leader.into(),
            elected_at,
            db_id: None,
        }
    }
}

/// Leadership lifecycle.
///
/// At most one term is authoritative at any instant. During `Handover` the
/// outgoing leader remains authoritative until the in-flight rebalancing
/// cycle reaches a commit/rollback boundary; only then does the incoming
/// term take over.
#[derive(Debug, Clone)]
pub enum TermState {
    NoLeader,
    ElectionPending { previous: Option<LeaderTerm> },
    Leading(LeaderTerm),
    Handover {
        outgoing: LeaderTerm,
        incoming: LeaderTerm,
    },
}

/// Enforces legal transitions between term states.
#[derive(Debug)]
pub struct TermTracker {
    state: TermState,
}

impl Default for TermTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TermTracker {
    pub fn new() -> Self {
        Self {
            state: TermState::NoLeader,
        }
    }

    pub fn state(&self) -> &TermState {
        &self.state
    }

    /// The term currently holding rebalancing authority, if any.
    pub fn current(&self) -> Option<&LeaderTerm> {
        match &self.state {
            TermState::Leading(term) => Some(term),
            TermState::Handover { outgoing, .. } => Some(outgoing),
            _ => None,
        }
    }

    pub fn is_leading(&self, node_id: &str) -> bool {
        self.current().map(|t| t.leader == node_id).unwrap_or(false)
    }

    /// Enter the election phase. Legal from `NoLeader` (first election) and
    /// `Leading` (periodic re-election or eligibility loss); the sitting
    /// leader stays recorded so the result can be classified as a retention
    /// or a handover.
    pub fn begin_election(&mut self) -> anyhow::Result<()> {
        self.state = match std::mem::replace(&mut self.state, TermState::NoLeader) {
            TermState::NoLeader => TermState::ElectionPending { previous: None },
            TermState::Leading(term) => TermState::ElectionPending {
                previous: Some(term),
            },
            other => {
                self.state = other;
                bail!("begin_election is illegal mid-election or mid-handover");
            }
        };
        Ok(())
    }

    /// Record the election outcome. A new leader different from the previous
    /// one moves through `Handover`; the same leader (or a first leader) goes
    /// straight to `Leading`.
    pub fn on_elected(&mut self, term: LeaderTerm) -> anyhow::Result<()> {
        self.state = match std::mem::replace(&mut self.state, TermState::NoLeader) {
            TermState::ElectionPending { previous } => match previous {
                Some(prev) if prev.leader != term.leader => TermState::Handover {
                    outgoing: prev,
                    incoming: term,
                },
                _ => TermState::Leading(term),
            },
            other => {
                self.state = other;
                bail!("on_elected outside of a pending election");
            }
        };
        Ok(())
    }

    /// Election deferred but the sitting leader remains fit: the existing
    /// term continues unchanged.
    pub fn retain(&mut self) -> anyhow::Result<()> {
        self.state = match std::mem::replace(&mut self.state, TermState::NoLeader) {
            TermState::ElectionPending {
                previous: Some(prev),
            } => TermState::Leading(prev),
            other => {
                self.state = other;
                bail!("retain requires a pending election with a sitting leader");
            }
        };
        Ok(())
    }

    /// No eligible leader: defer until the next trigger.
    pub fn on_deferred(&mut self) -> anyhow::Result<Option<LeaderTerm>> {
        match std::mem::replace(&mut self.state, TermState::NoLeader) {
            TermState::ElectionPending { previous } => Ok(previous),
            other => {
                self.state = other;
                bail!("on_deferred outside of a pending election");
            }
        }
    }

    /// The in-flight cycle reached its boundary; the incoming leader takes
    /// over. Returns the closed outgoing term.
    pub fn complete_handover(&mut self) -> anyhow::Result<LeaderTerm> {
        match std::mem::replace(&mut self.state, TermState::NoLeader) {
            TermState::Handover { outgoing, incoming } => {
                self.state = TermState::Leading(incoming);
                Ok(outgoing)
            }
            other => {
                self.state = other;
                bail!("complete_handover without a handover in progress");
            }
        }
    }
}
