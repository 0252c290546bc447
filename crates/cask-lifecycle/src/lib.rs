//! Launch session admission, state tracking and stop control.

pub mod controller;
pub mod registry;
pub mod state;

pub use controller::{LaunchController, SessionRunner};
pub use registry::{SessionRecord, SessionRegistry};
pub use state::SessionState;
