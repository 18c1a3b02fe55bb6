//! Lazy-evaluation scheduler and the execution context
//!
//! Primitives never compute when called; they record a stage here. The
//! scheduler keeps a small set of pending pipelines, runs data-dependence
//! analysis on every new stage, and fuses the stage into an existing
//! pipeline when legal. Execution happens when a later call conflicts, a
//! scalar output is produced, a container queries or destroys itself, or
//! the user flushes explicitly.
//!
//! The scheduler is not a process-wide singleton: a [`Context`] owns one and
//! is injected into every container constructor, so containers are bound to
//! exactly one scheduler for their lifetime.

use std::sync::{Arc, Mutex};

use log::trace;

use crate::config::Config;
use crate::error::{keep_first, Error, Result};
use crate::pipeline::Pipeline;
use crate::stage::{ContainerId, LambdaSpec, Opcode, StageSpec};

/// The worker pool tiles execute on
///
/// With the `parallel` feature this wraps a dedicated rayon pool sized by
/// the config; without it, tiles run sequentially in tile order, which the
/// fusion semantics must (and do) tolerate.
pub(crate) struct WorkerPool {
    #[cfg(feature = "parallel")]
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl WorkerPool {
    pub(crate) fn new(max_threads: usize) -> Self {
        #[cfg(feature = "parallel")]
        {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(max_threads)
                .build()
                .ok()
                .map(Arc::new);
            WorkerPool { pool }
        }
        #[cfg(not(feature = "parallel"))]
        {
            let _ = max_threads;
            WorkerPool {}
        }
    }

    /// Run `f` over every tile id, dynamically scheduled, and return the
    /// first non-success result in tile order.
    pub(crate) fn run_tiles<F>(&self, num_tiles: usize, threads: usize, f: F) -> Result
    where
        F: Fn(usize) -> Result + Send + Sync,
    {
        #[cfg(feature = "parallel")]
        if threads > 1 && num_tiles > 1 {
            use rayon::prelude::*;
            let body = || {
                (0..num_tiles)
                    .into_par_iter()
                    .map(|t| f(t))
                    .collect::<Vec<Result>>()
            };
            let results = match &self.pool {
                Some(pool) => pool.install(body),
                None => body(),
            };
            return results.into_iter().fold(Ok(()), keep_first);
        }

        #[cfg(not(feature = "parallel"))]
        let _ = threads;

        let mut rc = Ok(());
        for t in 0..num_tiles {
            rc = keep_first(rc, f(t));
        }
        rc
    }
}

/// Pending pipelines plus the resources to run them
pub(crate) struct Scheduler {
    cfg: Config,
    workers: WorkerPool,
    pipelines: Vec<Pipeline>,
}

impl Scheduler {
    fn new(cfg: Config) -> Self {
        let workers = WorkerPool::new(cfg.max_threads);
        let mut pipelines = Vec::with_capacity(cfg.max_pipelines);
        for _ in 0..cfg.max_pipelines {
            pipelines.push(Pipeline::new());
        }
        Self {
            cfg,
            workers,
            pipelines,
        }
    }

    fn empty_slot(&mut self) -> usize {
        if let Some(i) = self.pipelines.iter().position(|p| p.is_empty()) {
            i
        } else {
            self.pipelines.push(Pipeline::new());
            self.pipelines.len() - 1
        }
    }

    /// Dependence analysis for a new stage.
    ///
    /// Element-wise stages of equal governing length may fuse across
    /// read-after-write and write-after-read: within a tile, stages run in
    /// recording order and touch the same indices. Two situations force
    /// execution of a pending pipeline instead: the new stage overwrites an
    /// SpMV input (gathered non-locally), or an SpMV stage reads a vector
    /// some pending stage writes (the gather needs materialised input).
    fn add_stage(&mut self, spec: StageSpec) -> Result {
        let scalar_out = spec.scalar_output();
        let mut ret = Ok(());
        let mut shared: Vec<usize> = Vec::new();

        {
            let Scheduler {
                cfg,
                workers,
                pipelines,
            } = self;
            for (idx, p) in pipelines.iter_mut().enumerate() {
                if p.is_empty() {
                    continue;
                }
                let mut shared_found = false;
                let mut executed = false;

                for out in spec.outputs.iter().flatten() {
                    if executed {
                        break;
                    }
                    if p.accesses_input(out.id) {
                        if p.overwrites_vxm_inputs(out.id) {
                            ret = keep_first(ret, p.execute(cfg, workers));
                            executed = true;
                        } else {
                            shared_found = true;
                        }
                    } else if p.accesses_output(out.id) {
                        shared_found = true;
                    }
                }

                if !executed {
                    if spec.opcode == Opcode::VxmGeneric {
                        for inp in spec.inputs.iter().flatten() {
                            if executed {
                                break;
                            }
                            if p.accesses_output(inp.id) {
                                ret = keep_first(ret, p.execute(cfg, workers));
                                executed = true;
                            } else if !shared_found && p.accesses_input(inp.id) {
                                shared_found = true;
                            }
                        }
                    } else if !shared_found {
                        shared_found = spec
                            .inputs
                            .iter()
                            .flatten()
                            .any(|inp| p.accesses_vector(inp.id));
                    }
                }

                // a shared-data pipeline of different governing length, or
                // one at the fusion cap, is flushed rather than joined
                if !executed
                    && shared_found
                    && (p.containers_len() != spec.n || p.num_stages() >= cfg.fusion_cap)
                {
                    ret = keep_first(ret, p.execute(cfg, workers));
                    executed = true;
                    shared_found = false;
                }

                if !executed && shared_found {
                    shared.push(idx);
                }
            }
        }

        trace!(
            "stage {:?} (n={}) shares data with {} pipeline(s)",
            spec.opcode,
            spec.n,
            shared.len()
        );

        let target = match shared.len() {
            0 => {
                let idx = self.empty_slot();
                self.pipelines[idx].add_stage(spec);
                idx
            }
            1 => {
                self.pipelines[shared[0]].add_stage(spec);
                shared[0]
            }
            _ => {
                // every shared-data pipeline merges under the first
                let idx = shared[0];
                for &j in &shared[1..] {
                    let other = std::mem::take(&mut self.pipelines[j]);
                    self.pipelines[idx].merge(other);
                }
                self.pipelines[idx].add_stage(spec);
                idx
            }
        };

        // a stage producing a scalar is always executed right away
        if scalar_out {
            let Scheduler {
                cfg,
                workers,
                pipelines,
            } = self;
            ret = keep_first(ret, pipelines[target].execute(cfg, workers));
        }

        ret
    }

    fn add_lambda_stage(&mut self, spec: LambdaSpec) -> Result {
        let mut ret = Ok(());
        let mut shared: Vec<usize> = Vec::new();

        {
            let Scheduler {
                cfg,
                workers,
                pipelines,
            } = self;
            for (idx, p) in pipelines.iter_mut().enumerate() {
                if p.is_empty() {
                    continue;
                }
                let mut shared_found = false;
                let mut executed = false;

                // every vector a lambda touches counts as written
                for v in &spec.vectors {
                    if executed {
                        break;
                    }
                    if p.accesses_input(v.id) {
                        if p.overwrites_vxm_inputs(v.id) {
                            ret = keep_first(ret, p.execute(cfg, workers));
                            executed = true;
                        } else {
                            shared_found = true;
                        }
                    } else if p.accesses_output(v.id) {
                        shared_found = true;
                    }
                }

                if !executed
                    && shared_found
                    && (p.containers_len() != spec.n || p.num_stages() >= cfg.fusion_cap)
                {
                    ret = keep_first(ret, p.execute(cfg, workers));
                    executed = true;
                    shared_found = false;
                }

                if !executed && shared_found {
                    shared.push(idx);
                }
            }
        }

        match shared.len() {
            0 => {
                let idx = self.empty_slot();
                self.pipelines[idx].add_lambda_stage(spec);
            }
            1 => self.pipelines[shared[0]].add_lambda_stage(spec),
            _ => {
                let idx = shared[0];
                for &j in &shared[1..] {
                    let other = std::mem::take(&mut self.pipelines[j]);
                    self.pipelines[idx].merge(other);
                }
                self.pipelines[idx].add_lambda_stage(spec);
            }
        }

        ret
    }

    /// Execute the pipeline referencing `container`, if any.
    ///
    /// Fusion keeps every container in at most one pending pipeline, so one
    /// execution suffices.
    fn flush_container(&mut self, container: ContainerId) -> Result {
        let Scheduler {
            cfg,
            workers,
            pipelines,
        } = self;
        for p in pipelines.iter_mut() {
            if p.is_empty() {
                continue;
            }
            if p.accesses_vector(container) || p.accesses_matrix(container) {
                return p.execute(cfg, workers);
            }
        }
        Ok(())
    }

    fn flush_all(&mut self) -> Result {
        let Scheduler {
            cfg,
            workers,
            pipelines,
        } = self;
        for p in pipelines.iter_mut() {
            if p.is_empty() {
                continue;
            }
            p.execute(cfg, workers)?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn pending_pipelines(&self) -> usize {
        self.pipelines.iter().filter(|p| !p.is_empty()).count()
    }
}

/// Handle to one scheduler instance, injected into container constructors
#[derive(Clone)]
pub struct Context {
    cfg: Arc<Config>,
    sched: Arc<Mutex<Scheduler>>,
}

impl Context {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(cfg: Config) -> Self {
        let sched = Scheduler::new(cfg.clone());
        Self {
            cfg: Arc::new(cfg),
            sched: Arc::new(Mutex::new(sched)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Execute every pending pipeline
    pub fn execute_all(&self) -> Result {
        self.lock()?.flush_all()
    }

    /// Whether two contexts share one scheduler
    pub fn same_scheduler(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.sched, &other.sched)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Scheduler>> {
        self.sched.lock().map_err(|_| Error::Panic)
    }

    pub(crate) fn add_stage(&self, spec: StageSpec) -> Result {
        self.lock()?.add_stage(spec)
    }

    pub(crate) fn add_lambda_stage(&self, spec: LambdaSpec) -> Result {
        self.lock()?.add_lambda_stage(spec)
    }

    pub(crate) fn flush(&self, container: ContainerId) -> Result {
        self.lock()?.flush_container(container)
    }

    #[cfg(test)]
    pub(crate) fn pending_pipelines(&self) -> usize {
        self.sched.lock().expect("scheduler lock").pending_pipelines()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("cfg", &self.cfg).finish()
    }
}
