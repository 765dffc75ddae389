pub mod backoff;
pub mod engine;
pub mod errors;
pub mod gates;
pub mod ids;
pub mod model;
pub mod naming;
pub mod outcomes;
pub mod types;

pub use backoff::*;
pub use engine::*;
pub use errors::*;
pub use gates::*;
pub use ids::*;
pub use model::*;
pub use naming::*;
pub use outcomes::*;
pub use types::*;
