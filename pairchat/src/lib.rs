//! `Pairchat` — client-side synchronization engine for one-to-one chat.
//!
//! This crate keeps a local message timeline consistent with the server
//! through three coordinated surfaces: a bulk-history bootstrap over HTTP,
//! a live `WebSocket` channel for incremental events, and an outbound
//! intent path for sends, edits, and deletes. The [`session`] module ties
//! them together behind a command/event channel pair; the remaining
//! modules are independently testable pieces.

pub mod config;
pub mod connection;
pub mod history;
pub mod intent;
pub mod logging;
pub mod session;
pub mod store;
