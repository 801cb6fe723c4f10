//! Participant connection and its state machine

use tracing::{debug, info};
use uuid::Uuid;

use crate::game::grid::{Team, Vector};
use crate::game::r#match::MatchId;
use crate::game::resoluble::SubmittedAction;
use crate::util::time::unix_millis;
use crate::ws::channel::EventChannel;
use crate::ws::protocol::{ClientMsg, PlayerSettings, ServerMsg, UnitPlacement};

pub type ConnectionId = Uuid;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Channel open, not yet accepting requests
    Created,
    /// Accepting matchmaking requests
    Initialized,
    /// Waiting for an opponent
    Queued,
    /// Waiting for a training match
    QueuedTraining,
    /// Assigned to a match, not yet deploying
    MatchedWaiting,
    /// Placing units
    Deploying,
    /// Deployment submitted, fighting
    InBattle,
    /// Channel closed
    Dead,
}

/// An action received from the client, stamped with its arrival time
#[derive(Debug, Clone, Copy)]
pub struct ReceivedAction {
    pub action: SubmittedAction,
    pub received_at: u64,
}

/// One participant's session
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    channel: EventChannel,
    pub settings: PlayerSettings,
    pub team: Option<Team>,
    pub match_id: Option<MatchId>,
    /// Submitted deployment, in submission order
    pub units: Vec<UnitPlacement>,
    /// Tiles this participant may deploy into
    pub tiles: Vec<Vector>,
    pending_actions: Vec<ReceivedAction>,
}

impl Connection {
    pub fn new(channel: EventChannel) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: ConnectionState::Created,
            channel,
            settings: PlayerSettings::default(),
            team: None,
            match_id: None,
            units: Vec::new(),
            tiles: Vec::new(),
            pending_actions: Vec::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.channel.is_connected() && self.state != ConnectionState::Dead
    }

    /// Handshake complete, start accepting requests
    pub fn initialize(&mut self) {
        if self.state == ConnectionState::Created {
            self.state = ConnectionState::Initialized;
        }
    }

    /// Apply everything the client sent since the last tick
    pub fn poll(&mut self) {
        for msg in self.channel.drain() {
            self.handle(msg);
        }

        if !self.channel.is_connected() {
            self.state = ConnectionState::Dead;
        }
    }

    /// Messages arriving in the wrong state are dropped without comment
    fn handle(&mut self, msg: ClientMsg) {
        match (self.state, msg) {
            (ConnectionState::Initialized, ClientMsg::Matchmake { settings }) => {
                info!(connection_id = %self.id, name = %settings.name, "Connection began matchmaking");
                self.settings = settings;
                self.state = ConnectionState::Queued;
            }
            (ConnectionState::Initialized, ClientMsg::MatchmakeTraining { settings }) => {
                info!(connection_id = %self.id, name = %settings.name, "Connection began matchmaking for training");
                self.settings = settings;
                self.state = ConnectionState::QueuedTraining;
            }
            (ConnectionState::MatchedWaiting, ClientMsg::DeploymentReady) => {
                self.state = ConnectionState::Deploying;
            }
            (ConnectionState::Deploying, ClientMsg::BattleReady { entities }) => {
                self.units = entities;
                self.state = ConnectionState::InBattle;
            }
            (ConnectionState::InBattle, ClientMsg::Resoluble { resoluble }) => {
                self.pending_actions.push(ReceivedAction {
                    action: resoluble,
                    received_at: unix_millis(),
                });
            }
            (state, msg) => {
                debug!(connection_id = %self.id, ?state, ?msg, "Ignoring out-of-state message");
            }
        }
    }

    /// Hand this connection to a match
    pub fn assign_match(&mut self, match_id: MatchId, team: Team) {
        self.match_id = Some(match_id);
        self.team = Some(team);
        self.state = ConnectionState::MatchedWaiting;
    }

    /// Deployment time ran out; fight with whatever was submitted
    pub fn force_battle(&mut self) {
        if matches!(
            self.state,
            ConnectionState::MatchedWaiting | ConnectionState::Deploying
        ) {
            self.state = ConnectionState::InBattle;
        }
    }

    /// Actions accumulated since the previous turn
    pub fn take_actions(&mut self) -> Vec<ReceivedAction> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Release match-scoped data; a live channel goes back to `Created` to requeue
    pub fn detach(&mut self) {
        self.match_id = None;
        self.team = None;
        self.units.clear();
        self.tiles.clear();
        self.pending_actions.clear();

        if self.is_alive() {
            self.state = ConnectionState::Created;
        }
    }

    pub fn send(&mut self, msg: ServerMsg) {
        if let Err(e) = self.channel.send(msg) {
            debug!(connection_id = %self.id, error = %e, "Dropping outbound message");
        }
    }

    /// Server-side disconnect
    pub fn close(&mut self) {
        self.channel.close();
        self.state = ConnectionState::Dead;
    }
}

/// Connections in arrival order
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Vec<Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, connection: Connection) -> ConnectionId {
        let id = connection.id();
        self.connections.push(connection);
        id
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| &c.id == id)
    }

    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| &c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.iter_mut()
    }

    /// Ids of connections currently in `state`, in arrival order
    pub fn in_state(&self, state: ConnectionState) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|c| c.state == state)
            .map(|c| c.id)
            .collect()
    }

    /// Drop every connection that is no longer alive
    pub fn retain_alive(&mut self) {
        self.connections.retain(|c| {
            if !c.is_alive() {
                info!(connection_id = %c.id, "Connection removed");
            }
            c.is_alive()
        });
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::channel::ChannelRemote;

    fn connected() -> (Connection, ChannelRemote) {
        let (channel, remote) = EventChannel::pair();
        (Connection::new(channel), remote)
    }

    fn settings(name: &str) -> PlayerSettings {
        PlayerSettings {
            name: name.to_string(),
            units: vec![],
        }
    }

    #[test]
    fn walks_the_happy_path() {
        let (mut conn, remote) = connected();
        assert_eq!(conn.state(), ConnectionState::Created);

        conn.initialize();
        remote.submit(ClientMsg::Matchmake {
            settings: settings("ayla"),
        });
        conn.poll();
        assert_eq!(conn.state(), ConnectionState::Queued);
        assert_eq!(conn.settings.name, "ayla");

        conn.assign_match(Uuid::new_v4(), 1);
        assert_eq!(conn.state(), ConnectionState::MatchedWaiting);

        remote.submit(ClientMsg::DeploymentReady);
        remote.submit(ClientMsg::BattleReady {
            entities: vec![UnitPlacement("sword_unit".into(), Vector::flat(5, 1))],
        });
        conn.poll();
        assert_eq!(conn.state(), ConnectionState::InBattle);
        assert_eq!(conn.units.len(), 1);
    }

    #[test]
    fn matchmake_before_initialization_is_ignored() {
        let (mut conn, remote) = connected();
        remote.submit(ClientMsg::Matchmake {
            settings: settings("early"),
        });
        conn.poll();

        assert_eq!(conn.state(), ConnectionState::Created);
        assert_eq!(conn.settings, PlayerSettings::default());
    }

    #[test]
    fn battle_ready_while_queued_is_a_no_op() {
        let (mut conn, remote) = connected();
        conn.initialize();
        remote.submit(ClientMsg::Matchmake {
            settings: settings("ayla"),
        });
        remote.submit(ClientMsg::BattleReady {
            entities: vec![UnitPlacement("sword_unit".into(), Vector::flat(0, 0))],
        });
        conn.poll();

        assert_eq!(conn.state(), ConnectionState::Queued);
        assert!(conn.units.is_empty());
    }

    #[test]
    fn duplicate_requests_do_not_move_state_twice() {
        let (mut conn, remote) = connected();
        conn.initialize();
        remote.submit(ClientMsg::MatchmakeTraining {
            settings: settings("first"),
        });
        remote.submit(ClientMsg::Matchmake {
            settings: settings("second"),
        });
        conn.poll();

        assert_eq!(conn.state(), ConnectionState::QueuedTraining);
        assert_eq!(conn.settings.name, "first");
    }

    #[test]
    fn resolubles_only_accepted_in_battle() {
        let (mut conn, remote) = connected();
        conn.initialize();
        conn.assign_match(Uuid::new_v4(), 0);
        let step = SubmittedAction::Move {
            source: crate::game::grid::EntityId(0),
            timestamp: Some(1),
        };

        remote.submit(ClientMsg::Resoluble { resoluble: step });
        conn.poll();
        assert!(conn.take_actions().is_empty());

        conn.force_battle();
        remote.submit(ClientMsg::Resoluble { resoluble: step });
        conn.poll();
        let taken = conn.take_actions();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].action, step);
        assert!(conn.take_actions().is_empty());
    }

    #[test]
    fn disconnect_is_dead() {
        let (mut conn, remote) = connected();
        conn.initialize();
        drop(remote);
        conn.poll();

        assert_eq!(conn.state(), ConnectionState::Dead);
        assert!(!conn.is_alive());
    }

    #[test]
    fn detach_resets_live_connection_for_requeue() {
        let (mut conn, _remote) = connected();
        conn.initialize();
        conn.assign_match(Uuid::new_v4(), 0);
        conn.tiles = vec![Vector::flat(0, 0)];

        conn.detach();

        assert_eq!(conn.state(), ConnectionState::Created);
        assert!(conn.match_id.is_none());
        assert!(conn.team.is_none());
        assert!(conn.tiles.is_empty());
    }

    #[test]
    fn registry_keeps_arrival_order_and_reclaims_dead() {
        let mut registry = ConnectionRegistry::new();
        let (first, _first_remote) = connected();
        let (second, second_remote) = connected();
        let first_id = registry.insert(first);
        let second_id = registry.insert(second);

        for conn in registry.iter_mut() {
            conn.initialize();
        }
        assert_eq!(
            registry.in_state(ConnectionState::Initialized),
            vec![first_id, second_id]
        );

        drop(second_remote);
        for conn in registry.iter_mut() {
            conn.poll();
        }
        registry.retain_alive();

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&first_id).is_some());
        assert!(registry.get(&second_id).is_none());
    }
}
