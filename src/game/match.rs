//! Match state machine: deployment, battle and teardown for one pairing

use std::fmt;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{Config, TimeoutPolicy};
use crate::server::connection::{ConnectionId, ConnectionRegistry, ConnectionState};
use crate::ws::protocol::ServerMsg;

use super::grid::{Team, Vector};
use super::resoluble::{Action, Resoluble};
use super::resolver::ConflictResolver;
use super::stage::Simulation;

pub type MatchId = Uuid;

/// Teams that can win a battle
const TEAMS: [Team; 2] = [0, 1];

/// Display name of the scripted side
pub const TRAINING_OPPONENT: &str = "Training Bot";

/// Match variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Two participants
    Versus,
    /// One participant against scripted opponents
    Training,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Versus => write!(f, "versus"),
            MatchMode::Training => write!(f, "training"),
        }
    }
}

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    /// Waiting for every participant to be ready to deploy
    Created,
    /// Deployment zones assigned, waiting for placements
    Deploying,
    /// Simulation running
    InBattle,
    /// Torn down, reclaimed on the next tick
    Dead,
}

/// Turn interval as a function of live entities
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalRule {
    pub base: f32,
    pub per_entity: f32,
    pub floor: f32,
}

impl IntervalRule {
    pub fn for_living(&self, living: usize) -> f32 {
        (self.base + self.per_entity * living as f32).max(self.floor)
    }
}

/// Tunables shared by every match
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRules {
    pub stage_width: i32,
    pub stage_height: i32,
    /// Columns per deployment zone
    pub deployment_depth: i32,
    /// Units per participant
    pub deployment_max: usize,
    /// Seconds
    pub deployment_timeout: f32,
    pub timeout_policy: TimeoutPolicy,
    pub interval: IntervalRule,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            stage_width: 7,
            stage_height: 7,
            deployment_depth: 2,
            deployment_max: 4,
            deployment_timeout: 60.0,
            timeout_policy: TimeoutPolicy::Close,
            interval: IntervalRule {
                base: 1.4,
                per_entity: 0.2,
                floor: 0.5,
            },
        }
    }
}

impl MatchRules {
    pub fn from_config(config: &Config) -> Self {
        Self {
            stage_width: config.stage_width,
            stage_height: config.stage_height,
            deployment_depth: config.deployment_depth,
            deployment_max: config.deployment_max,
            deployment_timeout: config.deployment_timeout_secs,
            timeout_policy: config.deployment_timeout_policy,
            interval: IntervalRule {
                base: config.turn_interval_base,
                per_entity: config.turn_interval_per_entity,
                floor: config.turn_interval_floor,
            },
        }
    }

    /// Strip of columns nearest the team's edge, every row
    pub fn deployment_tiles(&self, team: Team) -> Vec<Vector> {
        let columns = if team == 0 {
            0..self.deployment_depth
        } else {
            (self.stage_width - self.deployment_depth)..self.stage_width
        };

        let mut tiles = Vec::new();
        for y in 0..self.stage_height {
            for x in columns.clone() {
                tiles.push(Vector::flat(x, y));
            }
        }
        tiles
    }

    /// Units face the opposing edge
    pub fn facing(team: Team) -> Vector {
        if team == 0 {
            Vector::flat(1, 0)
        } else {
            Vector::flat(-1, 0)
        }
    }
}

/// Accumulates elapsed time and releases one turn per interval
#[derive(Debug, Clone, Copy)]
pub struct TurnClock {
    interval: f32,
    elapsed: f32,
}

impl TurnClock {
    pub fn new(interval: f32) -> Self {
        Self {
            interval,
            elapsed: 0.0,
        }
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }

    pub fn set_interval(&mut self, interval: f32) {
        self.interval = interval;
    }

    /// True when a turn is due. At most one turn per call.
    pub fn advance(&mut self, dt: f32) -> bool {
        self.elapsed += dt;
        if self.elapsed >= self.interval {
            self.elapsed -= self.interval;
            true
        } else {
            false
        }
    }
}

/// Winner is the side not among the defeated; none when both or neither fell
pub fn winning_team(defeated: &[Team]) -> Option<Team> {
    let lost = |team: Team| defeated.contains(&team);
    match (lost(0), lost(1)) {
        (true, false) => Some(1),
        (false, true) => Some(0),
        _ => None,
    }
}

/// One match and its simulation
pub struct Match {
    id: MatchId,
    mode: MatchMode,
    state: MatchState,
    /// Indexed by team
    participants: Vec<ConnectionId>,
    stage: Box<dyn Simulation>,
    rules: MatchRules,
    deployment_remaining: f32,
    players_ready: usize,
    clock: TurnClock,
    sequence: u64,
}

impl Match {
    /// Take over the participants and tell them they were paired.
    /// Team indices follow the order of `participants`.
    pub fn new(
        mode: MatchMode,
        participants: Vec<ConnectionId>,
        stage: Box<dyn Simulation>,
        rules: MatchRules,
        connections: &mut ConnectionRegistry,
    ) -> Self {
        let id = Uuid::new_v4();
        let snapshot = stage.snapshot();

        let names: Vec<String> = participants
            .iter()
            .map(|cid| {
                connections
                    .get(cid)
                    .map(|c| c.settings.name.clone())
                    .unwrap_or_default()
            })
            .collect();

        for (team, cid) in participants.iter().enumerate() {
            let opponent = match mode {
                MatchMode::Training => TRAINING_OPPONENT.to_string(),
                MatchMode::Versus => names
                    .iter()
                    .enumerate()
                    .find(|(other, _)| *other != team)
                    .map(|(_, name)| name.clone())
                    .unwrap_or_default(),
            };

            if let Some(conn) = connections.get_mut(cid) {
                conn.assign_match(id, team as Team);
                conn.send(ServerMsg::Matched {
                    team: team as Team,
                    stage: snapshot.clone(),
                    opponent,
                    training: mode == MatchMode::Training,
                });
            }
        }

        let clock = TurnClock::new(rules.interval.for_living(0));

        Self {
            id,
            mode,
            state: MatchState::Created,
            participants,
            stage,
            deployment_remaining: rules.deployment_timeout,
            rules,
            players_ready: 0,
            clock,
            sequence: 0,
        }
    }

    pub fn id(&self) -> MatchId {
        self.id
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn is_alive(&self) -> bool {
        self.state != MatchState::Dead
    }

    /// Advance by `dt` seconds
    pub fn update(&mut self, dt: f32, connections: &mut ConnectionRegistry) {
        match self.state {
            MatchState::Created => {
                if self.all_participants_in(connections, |s| {
                    matches!(s, ConnectionState::Deploying | ConnectionState::InBattle)
                }) {
                    self.begin_deployment(connections);
                }
            }
            MatchState::Deploying => self.update_deployment(dt, connections),
            MatchState::InBattle => self.update_battle(dt, connections),
            MatchState::Dead => {}
        }
    }

    fn all_participants_in(
        &self,
        connections: &ConnectionRegistry,
        accept: impl Fn(ConnectionState) -> bool,
    ) -> bool {
        self.participants.iter().all(|cid| {
            connections
                .get(cid)
                .map_or(false, |conn| accept(conn.state()))
        })
    }

    fn begin_deployment(&mut self, connections: &mut ConnectionRegistry) {
        self.state = MatchState::Deploying;

        for (team, cid) in self.participants.iter().enumerate() {
            let tiles = self.rules.deployment_tiles(team as Team);
            if let Some(conn) = connections.get_mut(cid) {
                conn.tiles = tiles.clone();
                conn.send(ServerMsg::DeploymentStarted {
                    players_max: self.participants.len(),
                    deployment_max: self.rules.deployment_max,
                    deployment_tiles: tiles,
                });
            }
        }

        info!(match_id = %self.id, mode = %self.mode, "Deployment started");
    }

    fn update_deployment(&mut self, dt: f32, connections: &mut ConnectionRegistry) {
        self.deployment_remaining -= dt;

        let ready = self
            .participants
            .iter()
            .filter(|cid| {
                connections
                    .get(cid)
                    .map_or(false, |c| c.state() == ConnectionState::InBattle)
            })
            .count();

        if ready > self.players_ready {
            self.players_ready = ready;
            self.broadcast(
                connections,
                ServerMsg::PlayerReadied {
                    players_ready: ready,
                },
            );
        }

        if ready == self.participants.len() {
            self.start_battle(connections);
            return;
        }

        if self.deployment_remaining > 0.0 {
            return;
        }

        match self.rules.timeout_policy {
            TimeoutPolicy::Wait => {}
            TimeoutPolicy::ForceStart => {
                info!(match_id = %self.id, ready, "Deployment timed out, starting with submitted units");
                for cid in &self.participants {
                    if let Some(conn) = connections.get_mut(cid) {
                        conn.force_battle();
                    }
                }
                self.start_battle(connections);
            }
            TimeoutPolicy::Close => {
                info!(match_id = %self.id, ready, "Deployment timed out, closing match");
                self.broadcast(connections, ServerMsg::RoomClosed);
                self.close_soft(connections);
            }
        }
    }

    /// Instantiate in-zone placements up to capacity, then start the simulation
    fn start_battle(&mut self, connections: &mut ConnectionRegistry) {
        for (team, cid) in self.participants.iter().enumerate() {
            let Some(conn) = connections.get(cid) else {
                continue;
            };
            let team = team as Team;
            let roster = &conn.settings.units;
            let mut deployed = 0;

            for placement in &conn.units {
                let position = placement.position();
                if !conn.tiles.contains(&position) {
                    debug!(match_id = %self.id, team, %position, "Dropping placement outside deployment zone");
                    continue;
                }
                if !roster.is_empty() && !roster.iter().any(|u| u == placement.unit_type()) {
                    debug!(match_id = %self.id, team, unit = placement.unit_type(), "Dropping placement outside roster");
                    continue;
                }
                if deployed >= self.rules.deployment_max {
                    debug!(match_id = %self.id, team, "Dropping placement over capacity");
                    continue;
                }
                if self.stage.occupant(position).is_some() {
                    debug!(match_id = %self.id, team, %position, "Dropping placement on occupied tile");
                    continue;
                }

                self.stage.spawn(
                    placement.unit_type(),
                    team,
                    position,
                    MatchRules::facing(team),
                );
                deployed += 1;
            }
        }

        if self.mode == MatchMode::Training {
            self.populate_npcs();
        }

        self.state = MatchState::InBattle;
        self.clock = TurnClock::new(self.rules.interval.for_living(self.stage.living().len()));

        let snapshot = self.stage.snapshot();
        self.broadcast(
            connections,
            ServerMsg::BattleStarted {
                stage: snapshot,
                interval: self.clock.interval(),
            },
        );

        info!(
            match_id = %self.id,
            mode = %self.mode,
            entities = self.stage.living().len(),
            "Battle started"
        );
    }

    /// Scripted side: a column of three units near the far edge
    fn populate_npcs(&mut self) {
        let column = self.rules.stage_width - 2;
        let rows = [0, self.rules.stage_height / 2, self.rules.stage_height - 1];
        let classes = ["bow_unit", "sword_unit", "spear_unit"];
        let facing = MatchRules::facing(1);

        for (class_key, row) in classes.iter().zip(rows) {
            let position = Vector::flat(column, row);
            // short stages fold rows together
            if self.stage.occupant(position).is_some() {
                continue;
            }
            self.stage.spawn(class_key, 1, position, facing);
        }
    }

    fn update_battle(&mut self, dt: f32, connections: &mut ConnectionRegistry) {
        if self.clock.advance(dt) {
            self.run_turn(connections);
        }

        self.clock
            .set_interval(self.rules.interval.for_living(self.stage.living().len()));

        let defeated = self.stage.teams_defeated(&TEAMS);
        if !defeated.is_empty() {
            self.complete(winning_team(&defeated), connections);
        }
    }

    /// Gather, resolve, apply and broadcast one turn
    fn run_turn(&mut self, connections: &mut ConnectionRegistry) {
        let mut batch = self.gather_actions(connections);
        let fatal = ConflictResolver::resolve(&mut batch, self.stage.as_ref());
        let turn = self.stage.step(&batch);

        self.clock
            .set_interval(self.rules.interval.for_living(self.stage.living().len()));

        debug!(
            match_id = %self.id,
            actions = batch.len(),
            collisions = fatal.len(),
            "Turn resolved"
        );

        self.broadcast(
            connections,
            ServerMsg::PostTick {
                turn,
                interval: self.clock.interval(),
            },
        );
    }

    /// One synthesized attack per living entity plus every accepted client action
    fn gather_actions(&mut self, connections: &mut ConnectionRegistry) -> Vec<Resoluble> {
        let mut batch = Vec::new();

        for entity in self.stage.living() {
            self.sequence += 1;
            batch.push(Resoluble::new(entity, Action::Attack, 0, self.sequence));
        }

        for cid in &self.participants {
            let Some(conn) = connections.get_mut(cid) else {
                continue;
            };
            let team = conn.team;
            for received in conn.take_actions() {
                let action = received.action;
                let owned = team.is_some() && self.stage.team_of(action.source()) == team;
                if !owned || !action.is_well_formed() {
                    debug!(match_id = %self.id, ?team, ?action, "Rejecting submitted action");
                    continue;
                }
                self.sequence += 1;
                batch.push(action.into_resoluble(received.received_at, self.sequence));
            }
        }

        batch
    }

    fn complete(&mut self, winner: Option<Team>, connections: &mut ConnectionRegistry) {
        let winning_team = winner.map_or(-1, |team| team as i8);
        self.broadcast(connections, ServerMsg::BattleCompleted { winning_team });

        info!(match_id = %self.id, mode = %self.mode, winning_team, "Match ended successfully");
        self.close_soft(connections);
    }

    /// Release every participant; live channels stay open and may requeue
    pub fn close_soft(&mut self, connections: &mut ConnectionRegistry) {
        for cid in &self.participants {
            if let Some(conn) = connections.get_mut(cid) {
                conn.detach();
            }
        }
        self.state = MatchState::Dead;
    }

    /// Abnormal termination: surviving participants are notified and disconnected
    pub fn close_hard(&mut self, connections: &mut ConnectionRegistry) {
        self.close_soft(connections);

        for cid in &self.participants {
            if let Some(conn) = connections.get_mut(cid) {
                if conn.is_alive() {
                    conn.send(ServerMsg::RoomClosed);
                    conn.close();
                }
            }
        }

        info!(match_id = %self.id, mode = %self.mode, "Match closed");
    }

    fn broadcast(&self, connections: &mut ConnectionRegistry, msg: ServerMsg) {
        for cid in &self.participants {
            if let Some(conn) = connections.get_mut(cid) {
                conn.send(msg.clone());
            }
        }
    }
}

#[cfg(test)]
impl Match {
    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn participants(&self) -> &[ConnectionId] {
        &self.participants
    }

    pub fn interval(&self) -> f32 {
        self.clock.interval()
    }

    pub fn stage(&self) -> &dyn Simulation {
        self.stage.as_ref()
    }
}
