pub mod ai;
pub mod market;
pub mod portfolio;
pub mod task;
pub mod transaction;

pub use ai::*;
pub use market::*;
pub use portfolio::*;
pub use task::*;
pub use transaction::*;
