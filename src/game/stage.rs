//! Simulation stage: the battle state a match drives turn by turn

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::grid::{Bounds, EntityId, Team, Vector};
use super::resoluble::{Action, Resoluble};
use super::resolver::Terrain;

/// The simulation service a match drives. Movement validation only needs the
/// [`Terrain`] view; everything else about combat stays behind this trait.
pub trait Simulation: Terrain + Send {
    fn spawn(&mut self, class_key: &str, team: Team, position: Vector, facing: Vector) -> EntityId;

    /// Living entities in id order
    fn living(&self) -> Vec<EntityId>;

    /// Owning team of a living entity
    fn team_of(&self, id: EntityId) -> Option<Team>;

    /// Apply one resolved turn and return its serialized delta
    fn step(&mut self, resolubles: &[Resoluble]) -> Value;

    /// Teams among `teams` with no living entity left
    fn teams_defeated(&self, teams: &[Team]) -> Vec<Team>;

    /// Serialized form of the whole stage
    fn snapshot(&self) -> Value;
}

/// Per-class combat stats
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitStats {
    pub health: i32,
    pub damage: i32,
    pub range: i32,
}

impl UnitStats {
    pub fn for_class(class_key: &str) -> Self {
        match class_key {
            "bow_unit" => Self {
                health: 1,
                damage: 1,
                range: 2,
            },
            _ => Self {
                health: 1,
                damage: 1,
                range: 1,
            },
        }
    }
}

/// A unit on the stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub class_key: String,
    pub team: Team,
    pub position: Vector,
    pub facing: Vector,
    pub health: i32,
    pub alive: bool,
}

/// What happened during one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnEvent {
    Faced {
        entity: EntityId,
        facing: Vector,
    },
    Moved {
        entity: EntityId,
        from: Vector,
        to: Vector,
    },
    Attacked {
        entity: EntityId,
        target: EntityId,
        damage: i32,
    },
    Died {
        entity: EntityId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDelta {
    pub turn: u64,
    pub events: Vec<TurnEvent>,
}

/// Flat grid battle stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridStage {
    pub width: i32,
    pub height: i32,
    pub depth: i32,
    pub turn: u64,
    entities: Vec<Entity>,
    next_id: u32,
}

impl GridStage {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            depth: 1,
            turn: 0,
            entities: Vec::new(),
            next_id: 0,
        }
    }

    #[cfg(test)]
    pub fn from_snapshot(snapshot: Value) -> serde_json::Result<Self> {
        serde_json::from_value(snapshot)
    }

    fn living_entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| e.id == id && e.alive)
    }

    fn kill(&mut self, id: EntityId, events: &mut Vec<TurnEvent>) {
        if let Some(entity) = self.living_entity_mut(id) {
            entity.alive = false;
            entity.health = 0;
            events.push(TurnEvent::Died { entity: id });
        }
    }

    /// First living enemy along the attacker's facing, within range
    fn target_of(&self, attacker: &Entity) -> Option<EntityId> {
        let range = UnitStats::for_class(&attacker.class_key).range;
        let mut tile = attacker.position;
        for _ in 0..range {
            tile = tile + attacker.facing;
            if let Some(occupant) = self
                .entities
                .iter()
                .find(|e| e.alive && e.position == tile)
            {
                return (occupant.team != attacker.team).then_some(occupant.id);
            }
        }
        None
    }

    /// All attacks strike at once: targets are chosen before any damage lands
    fn resolve_attacks(&mut self, attackers: &[EntityId], events: &mut Vec<TurnEvent>) {
        let strikes: Vec<(EntityId, EntityId, i32)> = attackers
            .iter()
            .filter_map(|id| self.entities.iter().find(|e| e.id == *id && e.alive))
            .filter_map(|attacker| {
                self.target_of(attacker).map(|target| {
                    let damage = UnitStats::for_class(&attacker.class_key).damage;
                    (attacker.id, target, damage)
                })
            })
            .collect();

        for (attacker, target, damage) in &strikes {
            events.push(TurnEvent::Attacked {
                entity: *attacker,
                target: *target,
                damage: *damage,
            });
            if let Some(entity) = self.living_entity_mut(*target) {
                entity.health -= damage;
            }
        }

        let fallen: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|e| e.alive && e.health <= 0)
            .map(|e| e.id)
            .collect();
        for id in fallen {
            self.kill(id, events);
        }
    }
}

impl Terrain for GridStage {
    fn bounds(&self) -> Bounds {
        Bounds::new(self.width, self.height)
    }

    fn position_of(&self, actor: EntityId) -> Option<Vector> {
        self.entities
            .iter()
            .find(|e| e.id == actor && e.alive)
            .map(|e| e.position)
    }

    fn facing_of(&self, actor: EntityId) -> Option<Vector> {
        self.entities
            .iter()
            .find(|e| e.id == actor && e.alive)
            .map(|e| e.facing)
    }

    fn occupant(&self, position: Vector) -> Option<EntityId> {
        self.entities
            .iter()
            .find(|e| e.alive && e.position == position)
            .map(|e| e.id)
    }
}

impl Simulation for GridStage {
    fn spawn(&mut self, class_key: &str, team: Team, position: Vector, facing: Vector) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.entities.push(Entity {
            id,
            class_key: class_key.to_string(),
            team,
            position,
            facing,
            health: UnitStats::for_class(class_key).health,
            alive: true,
        });
        id
    }

    fn living(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|e| e.alive)
            .map(|e| e.id)
            .collect();
        ids.sort();
        ids
    }

    fn team_of(&self, id: EntityId) -> Option<Team> {
        self.entities
            .iter()
            .find(|e| e.id == id && e.alive)
            .map(|e| e.team)
    }

    fn step(&mut self, resolubles: &[Resoluble]) -> Value {
        self.turn += 1;
        let mut events = Vec::new();
        let mut attackers = Vec::new();

        for resoluble in resolubles.iter().filter(|r| r.active) {
            match resoluble.action {
                Action::Face { facing } => {
                    if let Some(entity) = self.living_entity_mut(resoluble.actor) {
                        entity.facing = facing;
                        events.push(TurnEvent::Faced {
                            entity: resoluble.actor,
                            facing,
                        });
                    }
                }
                Action::Move => {
                    if let Some(entity) = self.living_entity_mut(resoluble.actor) {
                        let from = entity.position;
                        entity.position = from + entity.facing;
                        events.push(TurnEvent::Moved {
                            entity: resoluble.actor,
                            from,
                            to: entity.position,
                        });
                    }
                }
                Action::Death => self.kill(resoluble.actor, &mut events),
                Action::Attack => attackers.push(resoluble.actor),
            }
        }

        self.resolve_attacks(&attackers, &mut events);

        let delta = TurnDelta {
            turn: self.turn,
            events,
        };
        serde_json::to_value(delta).unwrap_or(Value::Null)
    }

    fn teams_defeated(&self, teams: &[Team]) -> Vec<Team> {
        teams
            .iter()
            .copied()
            .filter(|team| !self.entities.iter().any(|e| e.alive && e.team == *team))
            .collect()
    }

    fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
