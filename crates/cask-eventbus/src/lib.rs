//! Launch event publish/fanout APIs.

pub mod bus;
pub mod envelope;

pub use bus::{
    LaunchContextSubscription, LaunchEventBus, LaunchEventBusConfig, LaunchGlobalSubscription,
    DEFAULT_CONTEXT_BUFFER_CAPACITY, DEFAULT_GLOBAL_BUFFER_CAPACITY,
};
pub use envelope::LaunchEventEnvelope;
