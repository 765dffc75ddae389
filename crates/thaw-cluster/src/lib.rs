pub mod contract;
pub mod memory;
pub mod types;

pub use memory::{FailureScript, ScriptedCluster};
pub use types::*;
