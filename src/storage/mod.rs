pub mod memory;
pub mod traits;

pub use memory::InMemoryTierStore;
pub use traits::{Tier, TierStore};
