//! Monitoring of iterative fits: per-iteration callbacks and convergence traces.

pub mod callbacks;
pub mod monitor;

pub use callbacks::{CallbackAction, IterationCallback, run_callbacks};
pub use monitor::{
    Clock, ConvergenceMonitor, ConvergenceTrace, ManualClock, Scorer, SystemClock,
    TrainingObservation,
};
