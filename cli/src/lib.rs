//! Depot CLI - talks to one or more depot daemons.

pub mod client;
pub mod commands;
pub mod config;
