//! Streamport store: the match dependency index, the wait list of elements
//! whose match metadata has not arrived yet, and the consumption loop that
//! ties source, transformation and persistence together.

#![forbid(unsafe_code)]

pub mod dependency;
pub mod importer;

pub use dependency::{DependencyIndex, WaitList};
pub use importer::{run_consumption_loop, spawn_importer, ImportStats, Importer};
