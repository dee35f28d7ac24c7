//! `Pairchat` — wire protocol library for the one-to-one chat sync engine.

pub mod codec;
pub mod event;
pub mod message;
