//! Transition policy for ledger entities.
//!
//! One static table per entity kind maps a current state to the states it may
//! legally move to. A state with no outgoing moves is terminal. Every guarded
//! update consults this module; nothing else decides what counts as progress.

use crate::models::{EntityKind, RunState};

type TransitionTable = &'static [(RunState, &'static [RunState])];

const STEP_TRANSITIONS: TransitionTable = &[
    (RunState::Active, &[RunState::Completed, RunState::Error]),
    (RunState::Completed, &[]),
    (RunState::Error, &[]),
];

const CHECKPOINT_TRANSITIONS: TransitionTable = &[
    (RunState::Active, &[RunState::Completed, RunState::Error]),
    (RunState::Completed, &[]),
    (RunState::Error, &[]),
];

fn table(kind: EntityKind) -> TransitionTable {
    match kind {
        // Validations progress exactly like the steps they evaluate.
        EntityKind::Step | EntityKind::Validation => STEP_TRANSITIONS,
        EntityKind::Checkpoint => CHECKPOINT_TRANSITIONS,
    }
}

/// States reachable from `from` in one move.
pub fn allowed_from(kind: EntityKind, from: RunState) -> &'static [RunState] {
    match table(kind).iter().find(|(state, _)| *state == from) {
        Some((_, next)) => *next,
        None => &[],
    }
}

/// Returns true if `kind` may move from `from` to `to`.
pub fn is_legal(kind: EntityKind, from: RunState, to: RunState) -> bool {
    allowed_from(kind, from).contains(&to)
}

/// Returns true if `state` has no outgoing moves for `kind`.
pub fn is_terminal(kind: EntityKind, state: RunState) -> bool {
    allowed_from(kind, state).is_empty()
}
