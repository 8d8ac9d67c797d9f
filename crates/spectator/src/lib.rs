//! Live board spectator: reconnecting channel client, view model and REST client.

pub mod api;
pub mod cli;
pub mod connection;
pub mod controller;
pub mod session;
pub mod view;
