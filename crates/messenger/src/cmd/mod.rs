//! Peer commands.

pub mod get;
pub mod send;
pub mod start;
