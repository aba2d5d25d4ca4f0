/// In-memory backend implementing every store trait.
///
/// Used for single-node deployments, tests and benches.
pub mod memory;

pub use memory::InMemoryCareStore;
