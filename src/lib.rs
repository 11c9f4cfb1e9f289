//! In-memory key-value store speaking a RESP-style wire protocol, with one
//! master fanning writes out to any number of replicas.
//!
//! - [`resp`] decodes request frames and encodes replies.
//! - [`db`] holds the keyspace with lazy per-key expiry.
//! - [`commands`] maps command names to handlers.
//! - [`handler`] runs one client connection.
//! - [`propagator`] and [`replication`] are the master and replica halves
//!   of replication.
//! - [`server`] ties them together behind an explicit [`server::Context`].

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod handler;
pub mod propagator;
pub mod rdb;
pub mod replication;
pub mod resp;
pub mod server;
pub mod state;
