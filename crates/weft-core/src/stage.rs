//! Stage representation: opcodes, closures, and operand metadata
//!
//! A stage is one recorded primitive call: a closure that computes a tile
//! `[lo, hi)` plus the metadata the scheduler needs for dependence analysis
//! and the analytic model. Closures capture raw pointers into container
//! internals; the containers box their internals so the pointers survive
//! moves, and container destructors flush any pipeline referencing them
//! before the memory goes away.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::coords::Coordinates;
use crate::error::Result;
use crate::pipeline::Pipeline;

/// Stable identity of a vector or matrix, used for dependence checks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContainerId(u64);

impl ContainerId {
    pub(crate) fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ContainerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn raw(self) -> u64 {
        self.0
    }
}

/// Primitive family of a recorded stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Opcode {
    SetScalar,
    SetMaskedScalar,
    SetVector,
    SetMaskedVector,

    FoldVectorToScalar,
    FoldScalarToVector,
    FoldMaskedScalarToVector,
    FoldVectorToVector,
    FoldMaskedVectorToVector,
    EWiseApply,
    MaskedEWiseApply,
    EWiseMulAddDispatch,
    DotGeneric,
    EWiseLambda,
    EWiseMap,
    Zip,
    Unzip,

    VxmGeneric,
}

impl Opcode {
    /// Out-of-place primitives may clear their output and so can break an
    /// already-dense guarantee.
    pub(crate) fn out_of_place(self) -> bool {
        matches!(
            self,
            Opcode::EWiseApply
                | Opcode::MaskedEWiseApply
                | Opcode::SetMaskedScalar
                | Opcode::SetVector
                | Opcode::SetMaskedVector
        )
    }

    pub(crate) fn masked(self) -> bool {
        matches!(
            self,
            Opcode::MaskedEWiseApply | Opcode::SetMaskedScalar | Opcode::SetMaskedVector
        )
    }
}

/// `*const` capture that may cross into worker threads.
///
/// Tile execution is range-partitioned; readers may touch any index.
#[derive(Debug)]
pub(crate) struct SharedPtr<T>(*const T);

impl<T> Clone for SharedPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SharedPtr<T> {}

unsafe impl<T: Sync> Send for SharedPtr<T> {}
unsafe impl<T: Sync> Sync for SharedPtr<T> {}

impl<T: Copy> SharedPtr<T> {
    pub(crate) fn new(ptr: *const T) -> Self {
        Self(ptr)
    }

    /// # Safety
    /// `i` must be in bounds of the captured allocation, which must outlive
    /// the pipeline (guaranteed by destructor-triggered flushes).
    pub(crate) unsafe fn read(&self, i: usize) -> T {
        *self.0.add(i)
    }
}

/// `*mut` capture for stage outputs; writers stay inside their tile range.
#[derive(Debug)]
pub(crate) struct SharedMutPtr<T>(*mut T);

impl<T> Clone for SharedMutPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SharedMutPtr<T> {}

unsafe impl<T: Send> Send for SharedMutPtr<T> {}
unsafe impl<T: Send> Sync for SharedMutPtr<T> {}

impl<T: Copy> SharedMutPtr<T> {
    pub(crate) fn new(ptr: *mut T) -> Self {
        Self(ptr)
    }

    /// # Safety
    /// See [`SharedPtr::read`].
    pub(crate) unsafe fn read(&self, i: usize) -> T {
        *self.0.add(i)
    }

    /// # Safety
    /// `i` must lie inside the calling tile's `[lo, hi)` range.
    pub(crate) unsafe fn write(&self, i: usize, value: T) {
        *self.0.add(i) = value;
    }

    /// # Safety
    /// See [`SharedMutPtr::write`].
    pub(crate) unsafe fn at(&self, i: usize) -> *mut T {
        self.0.add(i)
    }
}

/// Pointer to a container's coordinates, shared with recorded stages
#[derive(Clone, Copy, Debug)]
pub(crate) struct CoordsHandle(*mut Coordinates);

unsafe impl Send for CoordsHandle {}
unsafe impl Sync for CoordsHandle {}

impl CoordsHandle {
    pub(crate) fn new(ptr: *mut Coordinates) -> Self {
        Self(ptr)
    }

    pub(crate) fn addr(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn const_ptr(self) -> *const Coordinates {
        self.0
    }

    /// # Safety
    /// The container must still be alive and no `&mut` may be active.
    pub(crate) unsafe fn get<'a>(self) -> &'a Coordinates {
        &*self.0
    }

    /// # Safety
    /// Additionally requires that no other reference is active; only the
    /// serial phases of pipeline execution qualify.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn get_mut<'a>(self) -> &'a mut Coordinates {
        &mut *self.0
    }
}

/// The closure a stage contributes: compute one tile of one primitive
pub(crate) type StageFn = Box<dyn Fn(&Pipeline, usize, usize) -> Result + Send + Sync>;

/// A vector operand of a stage, as seen by the scheduler
#[derive(Clone, Copy, Debug)]
pub(crate) struct VecOperand {
    pub id: ContainerId,
    pub coords: CoordsHandle,
    pub len: usize,
}

/// Everything `add_stage` needs to record one primitive
pub(crate) struct StageSpec {
    pub func: StageFn,
    pub opcode: Opcode,
    /// Governing length of the stage (the output vector length)
    pub n: usize,
    /// Element byte size, input to the analytic model
    pub data_bytes: usize,
    /// The caller promised dense semantics via the descriptor
    pub dense_descr: bool,
    /// The mask operand, if any, is known dense
    pub dense_mask: bool,
    /// Up to two outputs (two only for unzip)
    pub outputs: [Option<VecOperand>; 2],
    /// Up to four inputs, masks included
    pub inputs: [Option<VecOperand>; 4],
    /// Matrix operand of an SpMV stage
    pub matrix: Option<ContainerId>,
}

impl StageSpec {
    /// Stages with no vector output produce a scalar and force execution
    pub(crate) fn scalar_output(&self) -> bool {
        self.outputs.iter().all(|o| o.is_none())
    }
}

/// An eWiseLambda stage: an opaque list of touched vectors plus the
/// coordinates governing the iteration pattern
pub(crate) struct LambdaSpec {
    pub func: StageFn,
    pub opcode: Opcode,
    pub n: usize,
    /// Largest element byte size across the accessed vectors
    pub data_bytes: usize,
    pub dense_descr: bool,
    pub vectors: Vec<VecOperand>,
    pub governing: Option<VecOperand>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_ids_are_unique() {
        let a = ContainerId::fresh();
        let b = ContainerId::fresh();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn test_opcode_classification() {
        assert!(Opcode::EWiseApply.out_of_place());
        assert!(Opcode::SetVector.out_of_place());
        assert!(!Opcode::SetScalar.out_of_place());
        assert!(!Opcode::FoldVectorToVector.out_of_place());
        assert!(Opcode::SetMaskedScalar.masked());
        assert!(!Opcode::EWiseApply.masked());
    }

    #[test]
    fn test_shared_ptr_roundtrip() {
        let data = vec![1.5f64, 2.5, 3.5];
        let p = SharedPtr::new(data.as_ptr());
        assert_eq!(unsafe { p.read(1) }, 2.5);

        let mut out = vec![0i32; 4];
        let m = SharedMutPtr::new(out.as_mut_ptr());
        unsafe { m.write(2, 7) };
        assert_eq!(out[2], 7);
    }
}
