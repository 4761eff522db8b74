pub mod executor;
mod task;

pub use executor::*;
