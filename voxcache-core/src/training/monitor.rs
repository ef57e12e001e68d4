//! Convergence monitoring for iterative fits.
//!
//! [`ConvergenceMonitor`] scores the model on held-out data after every
//! iteration and records how long the fit has been running. Time spent
//! scoring is tracked separately and subtracted, so recorded times reflect
//! fitting work only.

use crate::error::VoxcacheError;
use crate::persistence::{atomic_write_json, load_json};
use crate::training::callbacks::{CallbackAction, IterationCallback};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// A model that can be scored on held-out data of type `D`.
pub trait Scorer<D: ?Sized> {
    type Error;

    fn score(&self, data: &D) -> Result<f64, Self::Error>;

    /// Number of iterations completed so far.
    fn n_iter(&self) -> usize;
}

/// Monotonic time source, measured from an arbitrary origin.
pub trait Clock {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.lock().map(|now| *now).unwrap_or_default()
    }
}

/// One recorded iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingObservation {
    pub iteration: usize,
    /// Seconds since the monitor was created, excluding scoring time.
    pub elapsed_secs: f64,
    pub score: f64,
}

/// Saved record of a monitored run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceTrace {
    pub run_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    /// Total seconds spent scoring.
    pub eval_secs: f64,
    pub observations: Vec<TrainingObservation>,
}

impl ConvergenceTrace {
    pub fn save(&self, path: &Path) -> Result<(), VoxcacheError> {
        atomic_write_json(path, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, VoxcacheError> {
        load_json(path)?.ok_or_else(|| {
            VoxcacheError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no convergence trace at {}", path.display()),
            ))
        })
    }

    /// Observation with the lowest score.
    pub fn best(&self) -> Option<&TrainingObservation> {
        self.observations
            .iter()
            .min_by(|a, b| a.score.total_cmp(&b.score))
    }
}

/// Records held-out score and net fitting time after each iteration.
#[derive(Debug)]
pub struct ConvergenceMonitor<D, C: Clock = SystemClock> {
    held_out: D,
    clock: C,
    start: Duration,
    eval_time: Duration,
    run_id: Uuid,
    observations: Vec<TrainingObservation>,
}

impl<D> ConvergenceMonitor<D, SystemClock> {
    /// Start monitoring now, scoring against `held_out`.
    pub fn new(held_out: D) -> Self {
        Self::with_clock(held_out, SystemClock::default())
    }
}

impl<D, C: Clock> ConvergenceMonitor<D, C> {
    pub fn with_clock(held_out: D, clock: C) -> Self {
        let start = clock.now();
        Self {
            held_out,
            clock,
            start,
            eval_time: Duration::ZERO,
            run_id: Uuid::new_v4(),
            observations: Vec::new(),
        }
    }

    /// Score `trainer` on the held-out data and record the result.
    ///
    /// A scoring error is returned unchanged and nothing is recorded.
    pub fn observe<S: Scorer<D>>(&mut self, trainer: &S) -> Result<(), S::Error> {
        let before = self.clock.now();
        let score = trainer.score(&self.held_out)?;
        let after = self.clock.now();
        self.eval_time += after.saturating_sub(before);

        let elapsed = after
            .saturating_sub(self.start)
            .saturating_sub(self.eval_time);
        let observation = TrainingObservation {
            iteration: trainer.n_iter(),
            elapsed_secs: elapsed.as_secs_f64(),
            score,
        };
        debug!(
            iteration = observation.iteration,
            elapsed_secs = observation.elapsed_secs,
            score,
            "Recorded convergence point"
        );
        self.observations.push(observation);
        Ok(())
    }

    pub fn held_out(&self) -> &D {
        &self.held_out
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn observations(&self) -> &[TrainingObservation] {
        &self.observations
    }

    pub fn times(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.elapsed_secs).collect()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.score).collect()
    }

    pub fn iterations(&self) -> Vec<usize> {
        self.observations.iter().map(|o| o.iteration).collect()
    }

    /// Cumulative time spent scoring.
    pub fn eval_overhead(&self) -> Duration {
        self.eval_time
    }

    pub fn best(&self) -> Option<&TrainingObservation> {
        self.observations
            .iter()
            .min_by(|a, b| a.score.total_cmp(&b.score))
    }

    pub fn trace(&self) -> ConvergenceTrace {
        ConvergenceTrace {
            run_id: self.run_id,
            recorded_at: Utc::now(),
            eval_secs: self.eval_time.as_secs_f64(),
            observations: self.observations.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), VoxcacheError> {
        self.trace().save(path)
    }
}

impl<D, C: Clock, S: Scorer<D>> IterationCallback<S> for ConvergenceMonitor<D, C> {
    type Error = S::Error;

    fn on_iteration(&mut self, trainer: &S) -> Result<CallbackAction, S::Error> {
        self.observe(trainer)?;
        Ok(CallbackAction::Continue)
    }
}
