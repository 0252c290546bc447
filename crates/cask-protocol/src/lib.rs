//! Shared launch protocol for the cask prefix manager: ids, event
//! unions, the error taxonomy, and the runner/store collaborator seams.

pub mod error;
pub mod event;
pub mod ids;
pub mod runner;
pub mod session;
pub mod store;
