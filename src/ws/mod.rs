//! WebSocket transport and the event channel it feeds

pub mod channel;
pub mod handler;
pub mod protocol;
