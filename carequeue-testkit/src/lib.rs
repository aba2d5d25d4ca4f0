//! Test support for carequeue: a seeded care fixture and recording doubles
//! for the notifier, queue store and worker lease.

pub mod fixtures;
pub mod lease;
pub mod notifier;
pub mod recording;

pub use fixtures::*;
pub use lease::*;
pub use notifier::*;
pub use recording::*;
