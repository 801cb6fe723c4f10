//! Matchmaking queue implementation

use std::collections::VecDeque;

use crate::server::connection::{ConnectionId, ConnectionRegistry, ConnectionState};

/// FIFO queues of connections waiting for a match
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    versus: VecDeque<ConnectionId>,
    training: VecDeque<ConnectionId>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sync with connection states: drop anyone who left the queued state,
    /// append newcomers behind those already waiting
    pub fn refresh(&mut self, connections: &ConnectionRegistry) {
        Self::sync(&mut self.versus, connections, ConnectionState::Queued);
        Self::sync(&mut self.training, connections, ConnectionState::QueuedTraining);
    }

    fn sync(
        queue: &mut VecDeque<ConnectionId>,
        connections: &ConnectionRegistry,
        state: ConnectionState,
    ) {
        queue.retain(|id| {
            connections
                .get(id)
                .map_or(false, |c| c.is_alive() && c.state() == state)
        });

        for id in connections.in_state(state) {
            if !queue.contains(&id) {
                queue.push_back(id);
            }
        }
    }

    /// The two longest-waiting versus entries, in arrival order
    pub fn next_pair(&mut self) -> Option<[ConnectionId; 2]> {
        if self.versus.len() < 2 {
            return None;
        }
        let first = self.versus.pop_front()?;
        let second = self.versus.pop_front()?;
        Some([first, second])
    }

    /// The longest-waiting training entry
    pub fn next_training(&mut self) -> Option<ConnectionId> {
        self.training.pop_front()
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.versus.len() + self.training.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.versus.is_empty() && self.training.is_empty()
    }
}
