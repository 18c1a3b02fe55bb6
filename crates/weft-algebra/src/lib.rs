//! Algebraic structures for nonblocking sparse computation
//!
//! This crate provides the type foundation the weft engine computes over:
//!
//! 1. **Numeric elements** - plain-old-data element types with zero/one and
//!    f64 conversions, usable inside zero-initialised raw buffers
//! 2. **Binary operators** - stateless combine operations
//! 3. **Monoids** - operators with an identity, admitting identity elision
//! 4. **Semirings** - an additive monoid paired with a multiplicative
//!    operator, driving multiply-add and sparse matrix-vector products
//!
//! Kernels in `weft-core` use only the `identity`, `apply`, and `one`
//! entry points of these structures and never inspect their internals, so
//! user-supplied algebras plug in by implementing the same traits.

pub mod numeric;
pub mod ops;
pub mod semiring;

pub use numeric::{Numeric, Pair};
pub use ops::{
    BinaryOperator, First, LogicalAnd, LogicalOr, Max, Min, Minus, Monoid, Plus, Second, Times,
};
pub use semiring::{MaxPlus, MinPlus, OrAnd, PlusTimes, Semiring};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::numeric::{Numeric, Pair};
    pub use crate::ops::{BinaryOperator, Monoid};
    pub use crate::semiring::Semiring;
}
