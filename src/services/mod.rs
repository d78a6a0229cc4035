//! Imperative operations invoked by the presentation layer and the
//! simulation harness, expressed as free functions over the shared core.

pub mod answer_service;
pub mod buzz_service;
pub mod purge_service;
pub mod question_service;
pub mod session_service;
pub mod snapshot_service;
pub mod transfer;
