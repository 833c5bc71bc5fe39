//! Background maintenance workers.
//!
//! Each job has a worker function that loops on its configured interval and
//! a run function that performs a single pass.

mod window_sweeper;

pub use window_sweeper::{SweepRunResult, start_window_sweep_worker, sweep_once};
