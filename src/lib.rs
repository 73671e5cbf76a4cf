//! Arena server - authoritative real-time match simulation, skill
//! matchmaking, and the spectator/replay fabric.

pub mod app;
pub mod config;
pub mod error;
pub mod game;
pub mod http;
pub mod matchmaking;
pub mod util;
pub mod ws;
