//! API request handlers

mod approvals;
mod definitions;
mod health;
mod instances;

pub use approvals::*;
pub use definitions::*;
pub use health::*;
pub use instances::*;
