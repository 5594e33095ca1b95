//! Simulation runner
//!
//! Scenarios, not frames, are the unit of parallelism. The scenario list is
//! split into contiguous ranges, one per worker, and each worker runs its
//! range strictly in order on a rayon pool. A scenario that fails (error or
//! panic) is logged with its worker and scenario ids and skipped; the worker
//! moves on to the next one.

use crate::error::{SimError, SimResult};
use crate::factory::{derive_seed, Catalogs};
use crate::output::{DatasetWriter, WrittenScenario};
use crate::scenario::{ScenarioConfig, ScenarioEngine};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Outcome of one successful scenario
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub scenario_id: String,
    pub worker: usize,
    pub frames: usize,
    pub failed_segments: usize,
    pub written: Option<WrittenScenario>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFailure {
    pub scenario_id: String,
    pub worker: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub completed: Vec<ScenarioReport>,
    pub failed: Vec<ScenarioFailure>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len()
    }
}

/// Split `count` items into at most `workers` contiguous, near-equal ranges
pub fn partition(count: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1).min(count.max(1));
    let base = count / workers;
    let extra = count % workers;
    let mut start = 0;
    (0..workers)
        .map(|w| {
            let len = base + usize::from(w < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .filter(|r| !r.is_empty())
        .collect()
}

#[derive(Debug, Clone)]
pub struct SimulationRunner {
    catalogs: Catalogs,
    num_workers: usize,
    base_seed: Option<u64>,
    writer: Option<DatasetWriter>,
}

impl SimulationRunner {
    pub fn new(catalogs: Catalogs) -> Self {
        Self {
            catalogs,
            num_workers: 0,
            base_seed: None,
            writer: None,
        }
    }

    /// Worker count; 0 uses every available core
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Replace every scenario seed with one derived from `seed` and the scenario id
    pub fn with_base_seed(mut self, seed: u64) -> Self {
        self.base_seed = Some(seed);
        self
    }

    pub fn with_writer(mut self, writer: DatasetWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    fn workers(&self) -> usize {
        if self.num_workers > 0 {
            self.num_workers
        } else {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        }
    }

    pub fn run(&self, scenarios: &[ScenarioConfig]) -> SimResult<RunSummary> {
        let start = Instant::now();
        let ranges = partition(scenarios.len(), self.workers());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(ranges.len().max(1))
            .build()
            .map_err(|e| SimError::Runner(format!("cannot start worker pool: {}", e)))?;

        tracing::info!(scenarios = scenarios.len(), workers = ranges.len(), "simulation started");
        let results: Vec<(Vec<ScenarioReport>, Vec<ScenarioFailure>)> = pool.install(|| {
            ranges
                .par_iter()
                .enumerate()
                .map(|(worker, range)| self.run_worker(worker, &scenarios[range.clone()]))
                .collect()
        });

        let mut summary = RunSummary::default();
        for (completed, failed) in results {
            summary.completed.extend(completed);
            summary.failed.extend(failed);
        }
        summary.elapsed = start.elapsed();
        tracing::info!(
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "simulation finished"
        );
        Ok(summary)
    }

    fn run_worker(&self, worker: usize, scenarios: &[ScenarioConfig]) -> (Vec<ScenarioReport>, Vec<ScenarioFailure>) {
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        for config in scenarios {
            let outcome = catch_unwind(AssertUnwindSafe(|| self.run_scenario(worker, config)));
            let reason = match outcome {
                Ok(Ok(report)) => {
                    completed.push(report);
                    continue;
                }
                Ok(Err(err)) => err.to_string(),
                Err(panic) => panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string()),
            };
            tracing::error!(worker, scenario = %config.id, error = %reason, "scenario failed");
            failed.push(ScenarioFailure {
                scenario_id: config.id.clone(),
                worker,
                reason,
            });
        }
        (completed, failed)
    }

    fn run_scenario(&self, worker: usize, config: &ScenarioConfig) -> SimResult<ScenarioReport> {
        let mut config = config.clone();
        if let Some(base) = self.base_seed {
            config.seed = derive_seed(base, &["scenario", &config.id]);
        }
        tracing::info!(worker, scenario = %config.id, seed = config.seed, "scenario started");
        let output = ScenarioEngine::new(config, &self.catalogs)?.run()?;
        let written = self.writer.as_ref().map(|w| w.write(&output)).transpose()?;
        Ok(ScenarioReport {
            scenario_id: output.scenario_id.clone(),
            worker,
            frames: output.frames.len(),
            failed_segments: output.failed_segments(),
            written,
        })
    }
}
