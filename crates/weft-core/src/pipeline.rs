//! A pipeline: fused stages executing together over shared tile ranges
//!
//! A pipeline is an ordered sequence of stages with one governing container
//! length. Execution partitions `[0, n)` into tiles by the analytic model
//! and, per tile, invokes every stage closure in recording order; within a
//! tile later stages observe earlier stages' effects per index. Coordinate
//! growth is committed after a barrier: prefix sum over per-tile new-nonzero
//! counts, then a parallel join writing disjoint global-stack ranges.

use std::collections::HashSet;

use log::debug;

use crate::config::Config;
use crate::engine::WorkerPool;
use crate::error::{keep_first, Error, Result};
use crate::model::AnalyticModel;
use crate::stage::{CoordsHandle, ContainerId, LambdaSpec, Opcode, StageFn, StageSpec};

fn push_unique(list: &mut Vec<CoordsHandle>, handle: CoordsHandle) {
    if !list.iter().any(|h| h.addr() == handle.addr()) {
        list.push(handle);
    }
}

#[derive(Default)]
pub(crate) struct Pipeline {
    containers_len: usize,
    data_bytes: usize,

    stages: Vec<StageFn>,
    opcodes: Vec<Opcode>,

    /// Coordinates needing tile-local maintenance during execution
    accessed_coords: Vec<CoordsHandle>,
    /// Coordinates promised dense by descriptor, re-verified after execution
    dense_verify_coords: Vec<CoordsHandle>,

    input_vectors: HashSet<u64>,
    output_vectors: HashSet<u64>,
    /// SpMV inputs: gathered non-locally, so no later stage may overwrite them
    vxm_input_vectors: HashSet<u64>,
    input_matrices: HashSet<u64>,

    /// Outputs of out-of-place stages: their dense status may not survive
    out_of_place_coords: HashSet<usize>,
    contains_out_of_place: bool,

    /// Vectors known dense at execution start; a pure performance hint
    already_dense: HashSet<usize>,
    all_already_dense: bool,

    /// Model adopted for the in-flight execution
    model: AnalyticModel,
}

impl Pipeline {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub(crate) fn num_stages(&self) -> usize {
        self.stages.len()
    }

    pub(crate) fn containers_len(&self) -> usize {
        self.containers_len
    }

    /// The analytic model of the in-flight execution; stage closures use it
    /// to map their lower bound to a tile id
    pub(crate) fn model(&self) -> AnalyticModel {
        self.model
    }

    pub(crate) fn all_already_dense(&self) -> bool {
        self.all_already_dense
    }

    pub(crate) fn is_already_dense_addr(&self, addr: usize) -> bool {
        self.already_dense.contains(&addr)
    }

    pub(crate) fn accesses_input(&self, id: ContainerId) -> bool {
        self.input_vectors.contains(&id.raw())
    }

    pub(crate) fn accesses_output(&self, id: ContainerId) -> bool {
        self.output_vectors.contains(&id.raw())
    }

    pub(crate) fn accesses_vector(&self, id: ContainerId) -> bool {
        self.accesses_input(id) || self.accesses_output(id)
    }

    pub(crate) fn accesses_matrix(&self, id: ContainerId) -> bool {
        self.input_matrices.contains(&id.raw())
    }

    pub(crate) fn overwrites_vxm_inputs(&self, id: ContainerId) -> bool {
        self.vxm_input_vectors.contains(&id.raw())
    }

    /// Record one stage. The caller has already decided this pipeline is the
    /// right home (fusion analysis lives in the scheduler).
    pub(crate) fn add_stage(&mut self, spec: StageSpec) {
        debug_assert!(!self.stages.is_empty() || self.containers_len == 0);
        if self.stages.is_empty() {
            self.containers_len = spec.n;
        }
        debug_assert_eq!(self.containers_len, spec.n);

        // pipelines may mix element types; the model uses the largest
        if spec.data_bytes > self.data_bytes {
            self.data_bytes = spec.data_bytes;
        }

        for out in spec.outputs.iter().flatten() {
            self.output_vectors.insert(out.id.raw());
        }
        for inp in spec.inputs.iter().flatten() {
            self.input_vectors.insert(inp.id.raw());
            if spec.opcode == Opcode::VxmGeneric {
                self.vxm_input_vectors.insert(inp.id.raw());
            }
        }
        if let Some(m) = spec.matrix {
            self.input_matrices.insert(m.raw());
        }

        for inp in spec.inputs.iter().flatten() {
            if spec.dense_descr {
                push_unique(&mut self.dense_verify_coords, inp.coords);
            } else {
                push_unique(&mut self.accessed_coords, inp.coords);
            }
        }

        if spec.opcode.out_of_place() {
            // the output of an out-of-place primitive cannot be absent
            let out = spec.outputs[0].expect("out-of-place stage without output");
            if spec.dense_descr {
                push_unique(&mut self.dense_verify_coords, out.coords);
            }
            // without the dense promise (or with a possibly sparse mask)
            // an already dense output may become sparse
            if !spec.dense_descr || (!spec.dense_mask && spec.opcode.masked()) {
                self.contains_out_of_place = true;
                self.out_of_place_coords.insert(out.coords.addr());
                push_unique(&mut self.accessed_coords, out.coords);
            }
        } else {
            for out in spec.outputs.iter().flatten() {
                if spec.dense_descr {
                    push_unique(&mut self.dense_verify_coords, out.coords);
                } else {
                    push_unique(&mut self.accessed_coords, out.coords);
                }
            }
        }

        self.stages.push(spec.func);
        self.opcodes.push(spec.opcode);
    }

    /// Record an eWiseLambda stage: every touched vector counts as written
    pub(crate) fn add_lambda_stage(&mut self, spec: LambdaSpec) {
        if self.stages.is_empty() {
            self.containers_len = spec.n;
        }
        debug_assert_eq!(self.containers_len, spec.n);
        if spec.data_bytes > self.data_bytes {
            self.data_bytes = spec.data_bytes;
        }

        for v in &spec.vectors {
            self.output_vectors.insert(v.id.raw());
        }
        if let Some(g) = spec.governing {
            if spec.dense_descr {
                push_unique(&mut self.dense_verify_coords, g.coords);
            } else {
                push_unique(&mut self.accessed_coords, g.coords);
            }
        }

        self.stages.push(spec.func);
        self.opcodes.push(spec.opcode);
    }

    /// Absorb another pipeline, keeping relative stage order
    pub(crate) fn merge(&mut self, mut other: Pipeline) {
        if other.contains_out_of_place {
            self.contains_out_of_place = true;
        }
        if other.data_bytes > self.data_bytes {
            self.data_bytes = other.data_bytes;
        }
        debug_assert_eq!(self.containers_len, other.containers_len);

        self.stages.append(&mut other.stages);
        self.opcodes.append(&mut other.opcodes);

        for h in other.accessed_coords.drain(..) {
            push_unique(&mut self.accessed_coords, h);
        }
        for h in other.dense_verify_coords.drain(..) {
            push_unique(&mut self.dense_verify_coords, h);
        }
        self.input_vectors.extend(other.input_vectors.drain());
        self.output_vectors.extend(other.output_vectors.drain());
        self.vxm_input_vectors.extend(other.vxm_input_vectors.drain());
        self.input_matrices.extend(other.input_matrices.drain());
        self.out_of_place_coords
            .extend(other.out_of_place_coords.drain());
    }

    /// Drop all recorded state, releasing every captured reference
    pub(crate) fn clear(&mut self) {
        self.containers_len = 0;
        self.data_bytes = 0;
        self.contains_out_of_place = false;
        self.all_already_dense = false;
        self.stages.clear();
        self.opcodes.clear();
        self.accessed_coords.clear();
        self.dense_verify_coords.clear();
        self.input_vectors.clear();
        self.output_vectors.clear();
        self.vxm_input_vectors.clear();
        self.input_matrices.clear();
        self.out_of_place_coords.clear();
        self.already_dense.clear();
    }

    /// Execute all recorded stages and clear the pipeline.
    ///
    /// Tiles keep running after a stage reports an error so that the
    /// coordinate structures stay consistent; the first non-success code
    /// observed becomes the pipeline result.
    pub(crate) fn execute(&mut self, cfg: &Config, workers: &WorkerPool) -> Result {
        if self.stages.is_empty() {
            return Ok(());
        }
        if self.containers_len == 0 {
            self.clear();
            return Ok(());
        }

        let n = self.containers_len;
        let accessed = self
            .input_vectors
            .union(&self.output_vectors)
            .count()
            .max(1);
        let model = AnalyticModel::new(cfg, self.data_bytes.max(1), n, accessed);
        self.model = model;
        let num_tiles = model.num_tiles();
        let threads = model.num_threads();

        debug!(
            "pipeline execution: stages={} n={} accessed={} threads={} tile_size={} tiles={}",
            self.stages.len(),
            n,
            accessed,
            threads,
            model.tile_size(),
            num_tiles
        );

        // vectors dense right now may skip local coordinates entirely,
        // unless an out-of-place stage may make them sparse again
        self.already_dense.clear();
        let mut all_dense = true;
        for h in self
            .dense_verify_coords
            .iter()
            .chain(self.accessed_coords.iter())
        {
            let dense = unsafe { h.get() }.is_dense();
            if dense && !self.out_of_place_coords.contains(&h.addr()) {
                self.already_dense.insert(h.addr());
            }
            if !dense {
                all_dense = false;
            }
        }
        self.all_already_dense = all_dense;

        let managed: Vec<CoordsHandle> = if self.all_already_dense && !self.contains_out_of_place
        {
            Vec::new()
        } else {
            self.accessed_coords
                .iter()
                .copied()
                .filter(|h| {
                    let c = unsafe { h.get() };
                    c.size() == n
                        && !(c.is_dense()
                            && !(self.contains_out_of_place
                                && self.out_of_place_coords.contains(&h.addr())))
                })
                .collect()
        };

        for h in &managed {
            let c = unsafe { h.get_mut() };
            c.local_init(model);
            if c.wants_bucketisation() {
                c.bucketise();
            }
        }

        if !managed.is_empty() {
            let _ = workers.run_tiles(num_tiles, threads, |t| {
                let (lo, hi) = model.tile_bounds(t, n);
                for h in &managed {
                    unsafe { h.get() }.async_subset_init(lo, hi);
                }
                Ok(())
            });
        }

        let mut status = {
            let this: &Pipeline = &*self;
            workers.run_tiles(num_tiles, threads, |t| {
                let (lo, hi) = model.tile_bounds(t, n);
                let mut rc = Ok(());
                for func in &this.stages {
                    if rc.is_ok() {
                        rc = func(this, lo, hi);
                    }
                }
                rc
            })
        };

        if !managed.is_empty() {
            let grown: Vec<CoordsHandle> = managed
                .iter()
                .copied()
                .filter(|h| unsafe { h.get() }.new_nonzeroes())
                .collect();
            for h in &grown {
                unsafe { h.get_mut() }.prefix_sum();
            }
            if !grown.is_empty() {
                let _ = workers.run_tiles(num_tiles, threads, |t| {
                    let (lo, hi) = model.tile_bounds(t, n);
                    for h in &grown {
                        unsafe { h.get() }.join_subset(lo, hi);
                    }
                    Ok(())
                });
            }
        }

        // a primitive carrying the dense promise never updates local
        // coordinates, so the promise can only be checked after the fact
        let verified = self
            .dense_verify_coords
            .iter()
            .all(|h| unsafe { h.get() }.is_dense());
        if !verified {
            status = keep_first(status, Err(Error::Illegal));
        }

        self.clear();
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Coordinates;
    use crate::stage::VecOperand;

    fn leak_coords(cfg: &Config, n: usize) -> CoordsHandle {
        CoordsHandle::new(Box::into_raw(Box::new(Coordinates::new(cfg, n))))
    }

    unsafe fn free_coords(h: CoordsHandle) {
        drop(Box::from_raw(h.const_ptr() as *mut Coordinates));
    }

    fn noop_stage(n: usize, out: VecOperand) -> StageSpec {
        StageSpec {
            func: Box::new(|_, _, _| Ok(())),
            opcode: Opcode::FoldScalarToVector,
            n,
            data_bytes: 8,
            dense_descr: false,
            dense_mask: true,
            outputs: [Some(out), None],
            inputs: [None, None, None, None],
            matrix: None,
        }
    }

    #[test]
    fn test_bookkeeping_and_clear() {
        let cfg = Config::default();
        let h = leak_coords(&cfg, 16);
        let id = ContainerId::fresh();
        let mut p = Pipeline::new();
        p.add_stage(noop_stage(
            16,
            VecOperand {
                id,
                coords: h,
                len: 16,
            },
        ));
        assert!(!p.is_empty());
        assert_eq!(p.containers_len(), 16);
        assert!(p.accesses_output(id));
        assert!(!p.accesses_input(id));
        assert!(p.accesses_vector(id));

        let workers = WorkerPool::new(1);
        assert_eq!(p.execute(&cfg, &workers), Ok(()));
        assert!(p.is_empty());
        unsafe { free_coords(h) };
    }

    #[test]
    fn test_error_propagates_but_pipeline_clears() {
        let cfg = Config::default();
        let h = leak_coords(&cfg, 8);
        let id = ContainerId::fresh();
        let mut p = Pipeline::new();
        let mut spec = noop_stage(
            8,
            VecOperand {
                id,
                coords: h,
                len: 8,
            },
        );
        spec.func = Box::new(|_, _, _| Err(Error::Failed));
        p.add_stage(spec);

        let workers = WorkerPool::new(1);
        assert_eq!(p.execute(&cfg, &workers), Err(Error::Failed));
        assert!(p.is_empty());
        unsafe { free_coords(h) };
    }

    #[test]
    fn test_dense_descriptor_verification_fails() {
        let cfg = Config::default();
        let h = leak_coords(&cfg, 8);
        // only 7 of 8 positions assigned: the dense promise is broken
        unsafe {
            let c = h.get_mut();
            for i in 0..7 {
                c.assign(i);
            }
        }
        let id = ContainerId::fresh();
        let mut p = Pipeline::new();
        let mut spec = noop_stage(
            8,
            VecOperand {
                id,
                coords: h,
                len: 8,
            },
        );
        spec.dense_descr = true;
        p.add_stage(spec);

        let workers = WorkerPool::new(1);
        assert_eq!(p.execute(&cfg, &workers), Err(Error::Illegal));
        unsafe { free_coords(h) };
    }

    #[test]
    fn test_merge_combines_sets() {
        let cfg = Config::default();
        let h1 = leak_coords(&cfg, 4);
        let h2 = leak_coords(&cfg, 4);
        let id1 = ContainerId::fresh();
        let id2 = ContainerId::fresh();

        let mut a = Pipeline::new();
        a.add_stage(noop_stage(
            4,
            VecOperand {
                id: id1,
                coords: h1,
                len: 4,
            },
        ));
        let mut b = Pipeline::new();
        b.add_stage(noop_stage(
            4,
            VecOperand {
                id: id2,
                coords: h2,
                len: 4,
            },
        ));

        a.merge(b);
        assert_eq!(a.num_stages(), 2);
        assert!(a.accesses_output(id1));
        assert!(a.accesses_output(id2));

        let workers = WorkerPool::new(1);
        assert_eq!(a.execute(&cfg, &workers), Ok(()));
        unsafe {
            free_coords(h1);
            free_coords(h2);
        }
    }
}
