//! Public primitives (stage builders)
//!
//! Every primitive here validates sizes up front (`Mismatch` without
//! recording anything), short-circuits the `Resize` phase, builds a closure
//! computing one tile, and submits it to the scheduler. Nothing computes at
//! call time; execution is triggered lazily.
//!
//! Conventions shared by all builders:
//! - masks of size zero mean "no mask";
//! - `foldl` keeps the accumulator on the left of the operator, `foldr` on
//!   the right;
//! - every container of a call must belong to the same [`Context`], else
//!   `Illegal`;
//! - primitives producing a scalar (`dot`, the fold-to-scalar family)
//!   execute their pipeline before returning, so the scalar is final.

mod dot;
mod ewise;
mod fold;
mod map;
mod muladd;
mod set;
mod vxm;
mod zip;

pub use dot::{dot, dot_with};
pub use ewise::{
    e_wise_apply_monoid, e_wise_apply_monoid_masked, e_wise_apply_op, e_wise_apply_op_masked,
};
pub use fold::{
    foldl_into_scalar, foldl_into_scalar_masked, foldl_scalar, foldl_scalar_masked,
    foldl_scalar_op, foldl_vectors, foldl_vectors_masked, foldl_vectors_op, foldr_into_scalar,
    foldr_into_scalar_masked, foldr_scalar, foldr_scalar_masked, foldr_vectors,
    foldr_vectors_masked,
};
pub use map::{e_wise_lambda, e_wise_lambda_binary, e_wise_map};
pub use muladd::{
    e_wise_add, e_wise_add_masked, e_wise_mul, e_wise_mul_add, e_wise_mul_add_masked,
    e_wise_mul_masked,
};
pub use set::{set_scalar, set_scalar_masked, set_vector, set_vector_masked};
pub use vxm::{mxv, mxv_masked, vxm, vxm_generic, vxm_masked};
pub use zip::{unzip, zip};

use crate::engine::Context;
use crate::error::{Error, Result};
use crate::vector::Vector;
use weft_algebra::Numeric;

/// A primitive operand that is either a scalar or a vector
pub enum Operand<'a, T: Numeric> {
    Scalar(T),
    Vector(&'a Vector<T>),
}

impl<'a, T: Numeric> Operand<'a, T> {
    /// Validate length and scheduler affinity against the output
    pub(crate) fn check(&self, n: usize, ctx: &Context) -> Result {
        match self {
            Operand::Scalar(_) => Ok(()),
            Operand::Vector(v) => {
                if v.size() != n {
                    return Err(Error::Mismatch);
                }
                if !v.context().same_scheduler(ctx) {
                    return Err(Error::Illegal);
                }
                Ok(())
            }
        }
    }
}

/// Validate an optional mask: size zero disables it, any other size must
/// match the governing length
pub(crate) fn check_mask<M: Numeric>(
    mask: Option<&Vector<M>>,
    n: usize,
    ctx: &Context,
) -> Result<bool> {
    match mask {
        None => Ok(false),
        Some(m) => {
            if m.size() == 0 {
                return Ok(false);
            }
            if m.size() != n {
                return Err(Error::Mismatch);
            }
            if !m.context().same_scheduler(ctx) {
                return Err(Error::Illegal);
            }
            Ok(true)
        }
    }
}

/// Validate a mandatory vector input
pub(crate) fn check_vector<T: Numeric>(v: &Vector<T>, n: usize, ctx: &Context) -> Result {
    if v.size() != n {
        return Err(Error::Mismatch);
    }
    if !v.context().same_scheduler(ctx) {
        return Err(Error::Illegal);
    }
    Ok(())
}
