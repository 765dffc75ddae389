pub mod admission;
pub mod comparator;
pub mod config;
pub mod doctor;
pub mod executor;
pub mod history;
pub mod planner;
pub mod retention;
pub mod runner;
pub mod util;

pub use admission::*;
pub use comparator::*;
pub use config::*;
pub use doctor::*;
pub use executor::*;
pub use history::*;
pub use planner::*;
pub use retention::*;
pub use runner::*;
pub use util::*;
