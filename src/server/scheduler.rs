//! Fixed-rate update loop that owns every connection and match

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::game::r#match::{Match, MatchMode, MatchRules};
use crate::game::stage::GridStage;
use crate::matchmaking::MatchmakingQueue;
use crate::util::time::tick_period;
use crate::ws::channel::EventChannel;

use super::connection::{Connection, ConnectionId, ConnectionRegistry, ConnectionState};

/// Counters published after every tick for the health endpoint
#[derive(Debug, Default)]
pub struct ServerStats {
    connections: AtomicUsize,
    queued: AtomicUsize,
    matches: AtomicUsize,
}

impl ServerStats {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn matches(&self) -> usize {
        self.matches.load(Ordering::Relaxed)
    }
}

/// Owns the connection and match registries and advances both once per tick
pub struct Scheduler {
    rules: MatchRules,
    connections: ConnectionRegistry,
    matches: Vec<Match>,
    queue: MatchmakingQueue,
    intake: mpsc::UnboundedReceiver<EventChannel>,
    stats: Arc<ServerStats>,
}

impl Scheduler {
    pub fn new(
        rules: MatchRules,
        intake: mpsc::UnboundedReceiver<EventChannel>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            rules,
            connections: ConnectionRegistry::new(),
            matches: Vec::new(),
            queue: MatchmakingQueue::new(),
            intake,
            stats,
        }
    }

    /// Run the update loop until the intake closes and every connection is gone
    pub async fn run(mut self, update_rate: u32) {
        let mut interval = tokio::time::interval(tick_period(update_rate));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Instant::now();

        info!(update_rate, "Scheduler started");

        loop {
            interval.tick().await;

            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f32();
            last = now;

            if !self.tick(dt) {
                break;
            }
        }

        info!("Scheduler stopped");
    }

    /// One scheduler step. Returns false once no more work can arrive.
    pub fn tick(&mut self, dt: f32) -> bool {
        let open = self.accept();
        self.initialize();
        self.poll();
        self.cleanup();
        self.matchmake();

        for game in &mut self.matches {
            game.update(dt, &mut self.connections);
        }

        self.publish();
        open || !self.connections.is_empty()
    }

    /// Register channels handed over by the transport since the last tick
    fn accept(&mut self) -> bool {
        loop {
            match self.intake.try_recv() {
                Ok(channel) => {
                    let id = self.connections.insert(Connection::new(channel));
                    info!(connection_id = %id, "Connection added");
                }
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// New and released connections start accepting matchmaking requests
    fn initialize(&mut self) {
        for conn in self.connections.iter_mut() {
            if conn.state() == ConnectionState::Created && conn.is_alive() {
                conn.initialize();
            }
        }
    }

    fn poll(&mut self) {
        for conn in self.connections.iter_mut() {
            conn.poll();
        }
    }

    /// Tear down matches that lost a participant, then reclaim dead entries
    fn cleanup(&mut self) {
        let orphaned: Vec<_> = self
            .connections
            .iter()
            .filter(|c| !c.is_alive())
            .filter_map(|c| c.match_id)
            .collect();

        for match_id in orphaned {
            if let Some(game) = self
                .matches
                .iter_mut()
                .find(|m| m.id() == match_id && m.is_alive())
            {
                info!(match_id = %match_id, "Participant disconnected, closing match");
                game.close_hard(&mut self.connections);
            }
        }

        self.connections.retain_alive();
        self.matches.retain(|m| {
            if !m.is_alive() {
                debug!(match_id = %m.id(), "Match removed");
            }
            m.is_alive()
        });
    }

    /// At most one versus pair and one training match per tick
    fn matchmake(&mut self) {
        self.queue.refresh(&self.connections);
        if self.queue.is_empty() {
            return;
        }

        if let Some(pair) = self.queue.next_pair() {
            let game = self.create_match(MatchMode::Versus, pair.to_vec());
            info!(
                match_id = %game.id(),
                mode = %game.mode(),
                team_0 = %pair[0],
                team_1 = %pair[1],
                "Created versus match"
            );
            self.matches.push(game);
        }

        if let Some(trainee) = self.queue.next_training() {
            let game = self.create_match(MatchMode::Training, vec![trainee]);
            info!(
                match_id = %game.id(),
                mode = %game.mode(),
                team_0 = %trainee,
                "Created training match"
            );
            self.matches.push(game);
        }
    }

    fn create_match(&mut self, mode: MatchMode, participants: Vec<ConnectionId>) -> Match {
        let stage = GridStage::new(self.rules.stage_width, self.rules.stage_height);
        Match::new(
            mode,
            participants,
            Box::new(stage),
            self.rules.clone(),
            &mut self.connections,
        )
    }

    fn publish(&self) {
        self.stats
            .connections
            .store(self.connections.len(), Ordering::Relaxed);
        self.stats.queued.store(self.queue.len(), Ordering::Relaxed);
        self.stats
            .matches
            .store(self.matches.len(), Ordering::Relaxed);
    }
}

#[cfg(test)]
impl Scheduler {
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::grid::Vector;
    use crate::game::r#match::MatchState;
    use crate::ws::channel::{ChannelRemote, Outbound};
    use crate::ws::protocol::{ClientMsg, PlayerSettings, ServerMsg, UnitPlacement};

    const DT: f32 = 1.0 / 60.0;

    struct World {
        scheduler: Scheduler,
        intake: mpsc::UnboundedSender<EventChannel>,
        stats: Arc<ServerStats>,
    }

    impl World {
        fn new() -> Self {
            let (intake, rx) = mpsc::unbounded_channel();
            let stats = Arc::new(ServerStats::default());
            Self {
                scheduler: Scheduler::new(MatchRules::default(), rx, stats.clone()),
                intake,
                stats,
            }
        }

        fn connect(&mut self) -> ChannelRemote {
            let (channel, remote) = EventChannel::pair();
            self.intake.send(channel).unwrap();
            self.scheduler.tick(DT);
            remote
        }

        fn tick(&mut self) {
            self.scheduler.tick(DT);
        }
    }

    fn matchmake(name: &str) -> ClientMsg {
        ClientMsg::Matchmake {
            settings: PlayerSettings {
                name: name.to_string(),
                units: vec![],
            },
        }
    }

    fn place(x: i32, y: i32) -> UnitPlacement {
        UnitPlacement("sword_unit".to_string(), Vector::flat(x, y))
    }

    #[test]
    fn two_matchmake_requests_form_one_match_in_arrival_order() {
        let mut world = World::new();
        let mut first = world.connect();
        let mut second = world.connect();

        first.submit(matchmake("ayla"));
        second.submit(matchmake("brann"));
        world.tick();

        assert_eq!(world.scheduler.matches().len(), 1);
        let first_msgs = first.messages();
        let second_msgs = second.messages();
        assert!(matches!(
            &first_msgs[..],
            [ServerMsg::Matched { team: 0, opponent, .. }] if opponent == "brann"
        ));
        assert!(matches!(
            &second_msgs[..],
            [ServerMsg::Matched { team: 1, opponent, .. }] if opponent == "ayla"
        ));
        assert_eq!(world.stats.matches(), 1);
        assert_eq!(world.stats.queued(), 0);
        assert_eq!(world.stats.connections(), 2);
    }

    #[test]
    fn odd_player_stays_queued() {
        let mut world = World::new();
        let remotes: Vec<ChannelRemote> = (0..3).map(|_| world.connect()).collect();
        for (i, remote) in remotes.iter().enumerate() {
            remote.submit(matchmake(&format!("p{i}")));
        }
        world.tick();

        assert_eq!(world.scheduler.matches().len(), 1);
        assert_eq!(world.stats.queued(), 1);
    }

    #[test]
    fn deployment_zones_are_disjoint_through_the_scheduler() {
        let mut world = World::new();
        let mut first = world.connect();
        let mut second = world.connect();
        first.submit(matchmake("ayla"));
        second.submit(matchmake("brann"));
        world.tick();

        first.submit(ClientMsg::DeploymentReady);
        second.submit(ClientMsg::DeploymentReady);
        world.tick();

        let zone = |msgs: Vec<ServerMsg>| {
            msgs.into_iter()
                .find_map(|m| match m {
                    ServerMsg::DeploymentStarted {
                        deployment_tiles, ..
                    } => Some(deployment_tiles),
                    _ => None,
                })
                .unwrap()
        };
        let left = zone(first.messages());
        let right = zone(second.messages());

        let mut left_columns: Vec<i32> = left.iter().map(|t| t.x).collect();
        left_columns.sort();
        left_columns.dedup();
        let mut right_columns: Vec<i32> = right.iter().map(|t| t.x).collect();
        right_columns.sort();
        right_columns.dedup();

        assert_eq!(left_columns, vec![0, 1]);
        assert_eq!(right_columns, vec![5, 6]);
        assert!(left.iter().all(|t| !right.contains(t)));
    }

    #[test]
    fn disconnect_mid_battle_closes_room_within_one_tick() {
        let mut world = World::new();
        let mut first = world.connect();
        let second = world.connect();
        first.submit(matchmake("ayla"));
        second.submit(matchmake("brann"));
        world.tick();
        first.submit(ClientMsg::DeploymentReady);
        second.submit(ClientMsg::DeploymentReady);
        world.tick();
        first.submit(ClientMsg::BattleReady {
            entities: vec![place(0, 0)],
        });
        second.submit(ClientMsg::BattleReady {
            entities: vec![place(6, 6)],
        });
        world.tick();
        assert_eq!(world.scheduler.matches()[0].state(), MatchState::InBattle);
        first.received();

        drop(second);
        world.tick();

        assert!(world.scheduler.matches().is_empty());
        assert!(world.scheduler.connections().is_empty());
        assert_eq!(
            first.received(),
            vec![Outbound::Msg(ServerMsg::RoomClosed), Outbound::Close]
        );
    }

    #[test]
    fn training_without_units_completes_for_the_bot() {
        let mut world = World::new();
        let mut trainee = world.connect();
        trainee.submit(ClientMsg::MatchmakeTraining {
            settings: PlayerSettings::default(),
        });
        world.tick();
        trainee.submit(ClientMsg::DeploymentReady);
        world.tick();
        trainee.submit(ClientMsg::BattleReady { entities: vec![] });
        world.tick();
        world.tick();

        let msgs = trainee.messages();
        assert!(msgs.contains(&ServerMsg::BattleCompleted { winning_team: 1 }));

        // released, back to accepting requests on the next tick
        world.tick();
        assert!(world.scheduler.matches().is_empty());
        let conn = world.scheduler.connections().iter().next().unwrap();
        assert_eq!(conn.state(), ConnectionState::Initialized);
    }

    #[test]
    fn released_participant_can_requeue() {
        let mut world = World::new();
        let mut trainee = world.connect();
        trainee.submit(ClientMsg::MatchmakeTraining {
            settings: PlayerSettings::default(),
        });
        world.tick();
        trainee.submit(ClientMsg::DeploymentReady);
        world.tick();
        trainee.submit(ClientMsg::BattleReady { entities: vec![] });
        world.tick();
        world.tick();
        trainee.messages();

        trainee.submit(ClientMsg::MatchmakeTraining {
            settings: PlayerSettings::default(),
        });
        world.tick();

        assert!(matches!(
            &trainee.messages()[..],
            [ServerMsg::Matched { training: true, .. }]
        ));
    }

    #[test]
    fn stops_once_intake_closes_and_everyone_left() {
        let mut world = World::new();
        let remote = world.connect();
        drop(world.intake);

        assert!(world.scheduler.tick(DT));
        drop(remote);
        assert!(!world.scheduler.tick(DT));
    }
}
