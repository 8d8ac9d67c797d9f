//! Live board hub: spectator WebSocket channels, presence, timed voting and
//! the project gallery.

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod live;
pub mod presence;
pub mod voting;
