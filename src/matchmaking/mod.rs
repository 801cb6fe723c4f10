//! Matchmaking: FIFO pairing of queued connections

pub mod queue;

pub use queue::MatchmakingQueue;
