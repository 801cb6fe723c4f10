//! Match simulation and turn resolution

pub mod grid;
pub mod r#match;
pub mod resoluble;
pub mod resolver;
pub mod stage;
