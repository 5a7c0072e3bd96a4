use std::collections::BTreeSet;

use serde::Serialize;

use super::ids::WorkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Execute,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    AwaitingSetupComplete,
    AwaitingExecuteComplete,
    AwaitingTeardownComplete,
    Done,
}

impl PhaseState {
    const fn awaited(self) -> Option<Phase> {
        match self {
            PhaseState::AwaitingSetupComplete => Some(Phase::Setup),
            PhaseState::AwaitingExecuteComplete => Some(Phase::Execute),
            PhaseState::AwaitingTeardownComplete => Some(Phase::Teardown),
            PhaseState::Done => None,
        }
    }
}

/// What the caller has to do after feeding the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransition {
    None,
    BeginExecute { targets: Vec<WorkerId> },
    BeginTeardown { targets: Vec<WorkerId> },
    Done,
}

/// Tracks which participants still owe a completion report for the current
/// phase.
///
/// `pending` is taken the moment it empties, so every phase boundary yields
/// its transition exactly once no matter how reports and disconnects
/// interleave.
#[derive(Debug, Clone)]
pub struct PhaseStateMachine {
    state: PhaseState,
    participants: BTreeSet<WorkerId>,
    pending: Option<BTreeSet<WorkerId>>,
}

impl PhaseStateMachine {
    pub fn new<I>(participants: I) -> Self
    where
        I: IntoIterator<Item = WorkerId>,
    {
        let participants: BTreeSet<WorkerId> = participants.into_iter().collect();
        if participants.is_empty() {
            return Self {
                state: PhaseState::Done,
                participants,
                pending: None,
            };
        }
        Self {
            state: PhaseState::AwaitingSetupComplete,
            pending: Some(participants.clone()),
            participants,
        }
    }

    #[must_use]
    pub const fn state(&self) -> PhaseState {
        self.state
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.state, PhaseState::Done)
    }

    #[must_use]
    pub fn is_participant(&self, worker_id: &WorkerId) -> bool {
        self.participants.contains(worker_id)
    }

    #[must_use]
    pub fn participants(&self) -> Vec<WorkerId> {
        self.participants.iter().copied().collect()
    }

    #[must_use]
    pub fn pending(&self) -> Vec<WorkerId> {
        self.pending
            .as_ref()
            .map(|pending| pending.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether `worker_id` still owes a report for `phase`.
    #[must_use]
    pub fn awaits(&self, worker_id: &WorkerId, phase: Phase) -> bool {
        self.state.awaited() == Some(phase)
            && self
                .pending
                .as_ref()
                .is_some_and(|pending| pending.contains(worker_id))
    }

    /// Records that `worker_id` finished `phase`. Reports for any other
    /// phase, or from workers no longer pending, change nothing.
    pub fn report_phase_complete(&mut self, worker_id: &WorkerId, phase: Phase) -> PhaseTransition {
        if self.state.awaited() != Some(phase) {
            return PhaseTransition::None;
        }
        let removed = self
            .pending
            .as_mut()
            .is_some_and(|pending| pending.remove(worker_id));
        if !removed {
            return PhaseTransition::None;
        }
        self.advance_if_drained()
    }

    /// Drops a disconnected worker from the run.
    pub fn remove_worker(&mut self, worker_id: &WorkerId) -> PhaseTransition {
        if self.is_done() || !self.participants.remove(worker_id) {
            return PhaseTransition::None;
        }
        if let Some(pending) = self.pending.as_mut() {
            pending.remove(worker_id);
        }
        if self.participants.is_empty() {
            return self.force_complete();
        }
        self.advance_if_drained()
    }

    /// Skips whatever is left of setup/execute and waits for teardown from
    /// every remaining participant.
    pub fn cancel(&mut self) -> PhaseTransition {
        match self.state {
            PhaseState::AwaitingSetupComplete | PhaseState::AwaitingExecuteComplete => {
                self.enter(PhaseState::AwaitingTeardownComplete);
                PhaseTransition::BeginTeardown {
                    targets: self.participants(),
                }
            }
            PhaseState::AwaitingTeardownComplete | PhaseState::Done => PhaseTransition::None,
        }
    }

    /// Jumps straight to `Done`; yields `Done` only the first time.
    pub fn force_complete(&mut self) -> PhaseTransition {
        if self.is_done() {
            return PhaseTransition::None;
        }
        self.state = PhaseState::Done;
        self.pending = None;
        PhaseTransition::Done
    }

    fn advance_if_drained(&mut self) -> PhaseTransition {
        let drained = self.pending.as_ref().is_some_and(BTreeSet::is_empty);
        if !drained {
            return PhaseTransition::None;
        }
        self.pending = None;
        match self.state {
            PhaseState::AwaitingSetupComplete => {
                self.enter(PhaseState::AwaitingExecuteComplete);
                PhaseTransition::BeginExecute {
                    targets: self.participants(),
                }
            }
            PhaseState::AwaitingExecuteComplete => {
                self.enter(PhaseState::AwaitingTeardownComplete);
                PhaseTransition::BeginTeardown {
                    targets: self.participants(),
                }
            }
            PhaseState::AwaitingTeardownComplete => {
                self.state = PhaseState::Done;
                PhaseTransition::Done
            }
            PhaseState::Done => PhaseTransition::None,
        }
    }

    fn enter(&mut self, state: PhaseState) {
        self.state = state;
        self.pending = Some(self.participants.clone());
    }
}
