//! Realtime game-state synchronization core for a live team quiz show,
//! exposing modules for binaries and integration tests.
//!
//! Three client roles (control board, team devices, TV screen) only ever
//! talk through a shared backend row store; this crate keeps their views
//! consistent: change-stream subscriptions with retry and mass reconnect,
//! first-buzz race resolution, snapshot-based resync, and transient purging
//! between questions.

pub mod config;
pub mod error;
pub mod model;
pub mod services;
pub mod store;
pub mod sync;
