//! Background work that keeps requests moving without an API call

mod deadlines;

pub use deadlines::{Scheduler, TickReport};
