//! Conflict resolution for simultaneous turn actions
//!
//! Both participants submit actions independently and in any order. Before a turn
//! is applied, the batch is reduced to one consistent outcome:
//!
//! 1. Priorities are assigned by kind (Face, Move, Death, Attack).
//! 2. The batch is sorted by `(priority, timestamp, sequence, actor)`, a total order,
//!    so the result never depends on arrival order.
//! 3. For Face and Move only the latest action per actor stays active. Latest means
//!    highest `(timestamp, sequence)`; a timestamp tie goes to the later receipt.
//! 4. Moves leaving the stage are invalidated.
//! 5. Moves into an occupied tile survive only if the occupant is itself moving away.
//!    This is repeated until nothing changes, so blocked chains unwind completely.
//! 6. Actors whose surviving moves end on the same tile all die; a Death action is
//!    appended for each of them.

use std::collections::BTreeMap;

use tracing::debug;

use super::grid::{Bounds, EntityId, Vector};
use super::resoluble::{Action, ActionKind, Resoluble};

/// Read-only view of the stage needed to validate movement
pub trait Terrain {
    fn bounds(&self) -> Bounds;
    fn position_of(&self, actor: EntityId) -> Option<Vector>;
    fn facing_of(&self, actor: EntityId) -> Option<Vector>;
    /// Living entity standing on the tile, if any
    fn occupant(&self, position: Vector) -> Option<EntityId>;
}

/// A surviving move and where it ends
#[derive(Debug, Clone, Copy)]
struct PlannedMove {
    index: usize,
    destination: Vector,
}

/// Stateless resolver for a single turn's batch
pub struct ConflictResolver;

impl ConflictResolver {
    /// Resolve a batch in place. Returns the actors killed by colliding moves.
    pub fn resolve<T: Terrain + ?Sized>(resolubles: &mut Vec<Resoluble>, terrain: &T) -> Vec<EntityId> {
        Self::assign_priorities(resolubles);
        Self::sort(resolubles);

        for kind in ActionKind::EXCLUSIVE {
            Self::keep_latest(resolubles, kind);
        }

        let mut planned = Self::plan_moves(resolubles, terrain);
        Self::validate_occupancy(resolubles, &planned, terrain);
        planned.retain(|_, plan| resolubles[plan.index].active);

        let fatal = Self::detect_collisions(&planned);
        if !fatal.is_empty() {
            let mut sequence = resolubles.iter().map(|r| r.sequence).max().unwrap_or(0);
            for actor in &fatal {
                sequence += 1;
                let timestamp = planned
                    .get(actor)
                    .map(|plan| resolubles[plan.index].timestamp)
                    .unwrap_or(0);
                let mut death = Resoluble::new(*actor, Action::Death, timestamp, sequence);
                death.priority = ActionKind::Death.priority();
                resolubles.push(death);
            }
            Self::sort(resolubles);
            debug!(fatal = ?fatal, "Colliding moves resolved as deaths");
        }

        fatal
    }

    fn assign_priorities(resolubles: &mut [Resoluble]) {
        for resoluble in resolubles.iter_mut() {
            resoluble.priority = resoluble.kind().priority();
        }
    }

    fn sort(resolubles: &mut [Resoluble]) {
        resolubles.sort_by(|lhs, rhs| {
            lhs.priority
                .cmp(&rhs.priority)
                .then_with(|| lhs.recency().cmp(&rhs.recency()))
                .then_with(|| lhs.actor.cmp(&rhs.actor))
        });
    }

    /// Invalidate every same-kind action of an actor except the most recent one
    fn keep_latest(resolubles: &mut [Resoluble], kind: ActionKind) {
        let mut latest: BTreeMap<EntityId, usize> = BTreeMap::new();

        for (index, resoluble) in resolubles.iter().enumerate() {
            if resoluble.kind() != kind {
                continue;
            }
            latest
                .entry(resoluble.actor)
                .and_modify(|current| {
                    if resolubles[*current].recency() < resoluble.recency() {
                        *current = index;
                    }
                })
                .or_insert(index);
        }

        for (index, resoluble) in resolubles.iter_mut().enumerate() {
            if resoluble.kind() == kind && latest.get(&resoluble.actor) != Some(&index) {
                resoluble.invalidate();
            }
        }
    }

    /// Compute destinations of active moves, dropping those that leave the stage
    fn plan_moves<T: Terrain + ?Sized>(
        resolubles: &mut [Resoluble],
        terrain: &T,
    ) -> BTreeMap<EntityId, PlannedMove> {
        let facings: BTreeMap<EntityId, Vector> = resolubles
            .iter()
            .filter(|r| r.active)
            .filter_map(|r| match r.action {
                Action::Face { facing } => Some((r.actor, facing)),
                _ => None,
            })
            .collect();

        let bounds = terrain.bounds();
        let mut planned = BTreeMap::new();

        for (index, resoluble) in resolubles.iter_mut().enumerate() {
            if !resoluble.active || resoluble.kind() != ActionKind::Move {
                continue;
            }

            let actor = resoluble.actor;
            let facing = facings
                .get(&actor)
                .copied()
                .or_else(|| terrain.facing_of(actor));
            let destination = match (terrain.position_of(actor), facing) {
                (Some(position), Some(facing)) => position + facing,
                _ => {
                    resoluble.invalidate();
                    continue;
                }
            };

            if !bounds.contains(destination) {
                resoluble.invalidate();
                continue;
            }

            planned.insert(actor, PlannedMove { index, destination });
        }

        planned
    }

    /// A move onto an occupied tile stands only while the occupant vacates it
    fn validate_occupancy<T: Terrain + ?Sized>(
        resolubles: &mut [Resoluble],
        planned: &BTreeMap<EntityId, PlannedMove>,
        terrain: &T,
    ) {
        let contested: Vec<(usize, EntityId)> = planned
            .iter()
            .filter_map(|(mover, plan)| {
                terrain
                    .occupant(plan.destination)
                    .filter(|occupant| occupant != mover)
                    .map(|occupant| (plan.index, occupant))
            })
            .collect();

        loop {
            let mut changed = false;

            for &(index, occupant) in &contested {
                if !resolubles[index].active {
                    continue;
                }
                let vacating = planned
                    .get(&occupant)
                    .map_or(false, |plan| resolubles[plan.index].active);
                if !vacating {
                    resolubles[index].invalidate();
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }
    }

    /// Actors sharing a final destination, in id order
    fn detect_collisions(planned: &BTreeMap<EntityId, PlannedMove>) -> Vec<EntityId> {
        let mut arrivals: BTreeMap<Vector, Vec<EntityId>> = BTreeMap::new();
        for (actor, plan) in planned {
            arrivals.entry(plan.destination).or_default().push(*actor);
        }

        let mut fatal: Vec<EntityId> = arrivals
            .into_values()
            .filter(|actors| actors.len() > 1)
            .flatten()
            .collect();
        fatal.sort();
        fatal
    }
}
