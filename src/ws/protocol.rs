//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::grid::{Team, Vector};
use crate::game::resoluble::SubmittedAction;

/// Participant-declared configuration sent with a matchmaking request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSettings {
    /// Display name shown to the opponent
    #[serde(default)]
    pub name: String,
    /// Unit types the participant may deploy (empty = unrestricted)
    #[serde(default)]
    pub units: Vec<String>,
}

/// One `(unit_type, position)` pair of a deployment payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPlacement(pub String, pub Vector);

impl UnitPlacement {
    pub fn unit_type(&self) -> &str {
        &self.0
    }

    pub fn position(&self) -> Vector {
        self.1
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMsg {
    /// Queue for a match against another participant
    Matchmake {
        #[serde(default)]
        settings: PlayerSettings,
    },

    /// Queue for a match against scripted opponents
    #[serde(rename = "matchmake_training")]
    MatchmakeTraining {
        #[serde(default)]
        settings: PlayerSettings,
    },

    /// Ready to receive a deployment zone
    DeploymentReady,

    /// Final deployment
    BattleReady {
        #[serde(default)]
        entities: Vec<UnitPlacement>,
    },

    /// One in-battle action
    Resoluble { resoluble: SubmittedAction },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMsg {
    /// Paired into a match
    Matched {
        team: Team,
        stage: Value,
        opponent: String,
        training: bool,
    },

    /// Deployment zone and capacity
    DeploymentStarted {
        players_max: usize,
        deployment_max: usize,
        deployment_tiles: Vec<Vector>,
    },

    /// Number of participants that submitted their deployment
    PlayerReadied { players_ready: usize },

    /// Simulation begins
    BattleStarted { stage: Value, interval: f32 },

    /// Resolved turn outcome
    PostTick { turn: Value, interval: f32 },

    /// Match conclusion (-1 = no winner)
    BattleCompleted { winning_team: i8 },

    /// Match torn down abnormally
    RoomClosed,
}
