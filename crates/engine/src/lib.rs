pub mod chunk;
pub mod engine;
pub mod error;
pub mod governance;
pub mod incentive;
pub mod registry;

pub use chunk::ChunkPlan;
pub use engine::{Collaborators, LeverageEngine};
pub use error::EngineError;
pub use governance::{Authority, GovernanceAction, MutualConfirmation};
pub use incentive::RewardVault;
pub use registry::ExchangeRegistry;
