//! Pending actions ("resolubles") collected for a single turn

use serde::{Deserialize, Serialize};

use super::grid::{EntityId, Vector};

/// Kind discriminant, used for priorities and exclusivity grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionKind {
    Face,
    Move,
    Attack,
    Death,
}

impl ActionKind {
    /// Lower resolves first
    pub fn priority(self) -> i8 {
        match self {
            ActionKind::Face => -2,
            ActionKind::Move => -1,
            ActionKind::Death => 0,
            ActionKind::Attack => 1,
        }
    }

    /// Kinds where only one action per actor may survive a turn
    pub const EXCLUSIVE: [ActionKind; 2] = [ActionKind::Face, ActionKind::Move];
}

/// Action payload, one variant per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    Face { facing: Vector },
    Move,
    Attack,
    Death,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Face { .. } => ActionKind::Face,
            Action::Move => ActionKind::Move,
            Action::Attack => ActionKind::Attack,
            Action::Death => ActionKind::Death,
        }
    }
}

/// One actor's intent for the current turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resoluble {
    pub actor: EntityId,
    pub action: Action,
    /// Submission time in unix millis
    pub timestamp: u64,
    /// Receipt order within the turn, the secondary key for every tie-break
    pub sequence: u64,
    /// Assigned during resolution, never taken from the client
    pub priority: i8,
    pub active: bool,
}

impl Resoluble {
    pub fn new(actor: EntityId, action: Action, timestamp: u64, sequence: u64) -> Self {
        Self {
            actor,
            action,
            timestamp,
            sequence,
            priority: 0,
            active: true,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }

    pub fn invalidate(&mut self) {
        self.active = false;
    }

    /// Total order used for "latest wins": timestamp, then receipt order
    pub fn recency(&self) -> (u64, u64) {
        (self.timestamp, self.sequence)
    }
}

/// Client-submittable subset, decoded once at the channel boundary.
/// Attack and Death are synthesized by the server and never accepted from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SubmittedAction {
    Face {
        source: EntityId,
        facing: Vector,
        #[serde(default)]
        timestamp: Option<u64>,
    },
    Move {
        source: EntityId,
        #[serde(default)]
        timestamp: Option<u64>,
    },
}

impl SubmittedAction {
    pub fn source(&self) -> EntityId {
        match self {
            SubmittedAction::Face { source, .. } | SubmittedAction::Move { source, .. } => *source,
        }
    }

    /// Structural check independent of stage state
    pub fn is_well_formed(&self) -> bool {
        match self {
            SubmittedAction::Face { facing, .. } => facing.is_unit_step(),
            SubmittedAction::Move { .. } => true,
        }
    }

    /// Turn into a pending action, stamping receipt time when the client sent none
    pub fn into_resoluble(self, received_at: u64, sequence: u64) -> Resoluble {
        match self {
            SubmittedAction::Face {
                source,
                facing,
                timestamp,
            } => Resoluble::new(
                source,
                Action::Face { facing },
                timestamp.unwrap_or(received_at),
                sequence,
            ),
            SubmittedAction::Move { source, timestamp } => Resoluble::new(
                source,
                Action::Move,
                timestamp.unwrap_or(received_at),
                sequence,
            ),
        }
    }
}
