/// Builder for wiring the notifier worker.
pub mod builder;
/// Unclaimed-case notifier worker loop.
pub mod notifier;
/// Cooperative shutdown signalling.
pub mod shutdown;

pub use builder::NotifierBuilder;
pub use notifier::{CycleReport, NotifierState, UnclaimedCaseNotifier};
pub use shutdown::ShutdownToken;
