//! Nonblocking execution engine for sparse vector/matrix primitives
//!
//! Primitives do not execute when called: each call records a *stage* into
//! a lazy-evaluation scheduler. Compatible stages fuse into *pipelines*
//! over shared vector ranges; a pipeline partitions its index space into
//! contiguous *tiles* and executes them on a worker pool, with each tile
//! running every stage in recording order. Execution triggers lazily: on a
//! conflicting later call, when a scalar output is produced, when a
//! container is queried or destroyed, or on an explicit flush.
//!
//! # Architecture Overview
//!
//! The engine is organized in layers:
//!
//! 1. **Containers** - [`Vector`]/[`Matrix`] owning raw value buffers and
//!    [`coords::Coordinates`] (bitmask + stack sparsity patterns with
//!    tile-local concurrent update support)
//! 2. **Kernels** - stateless per-tile loops specialised by density and
//!    selected by a small dispatcher at kernel entry
//! 3. **Stage builders** - the public primitives in [`ops`], each capturing
//!    a tile closure and submitting it to the scheduler
//! 4. **Scheduler** - [`Context`] and its pipelines: dependence analysis,
//!    fusion, the analytic model, and tiled parallel execution
//!
//! # Example
//!
//! ```rust
//! use weft_core::{Context, Vector, ops, Descriptor, Phase};
//! use weft_algebra::PlusTimes;
//!
//! let ctx = Context::new();
//! let x = Vector::from_slice(&ctx, &[1.0, 2.0, 3.0]);
//! let y = Vector::from_slice(&ctx, &[4.0, 5.0, 6.0]);
//! let mut z = Vector::new(&ctx, 3);
//!
//! // queued, not executed
//! ops::e_wise_add(&mut z, ops::Operand::Vector(&x), ops::Operand::Vector(&y),
//!     PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
//!
//! // reading a scalar triggers execution of the fused pipeline
//! let mut s = 0.0;
//! ops::dot(&mut s, &z, &z, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
//! assert_eq!(s, 25.0 + 49.0 + 81.0);
//! ```

pub mod buffer;
pub mod config;
pub mod coords;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod matrix;
pub mod model;
pub mod ops;
pub mod vector;

mod kernels;
mod pipeline;
mod stage;
mod wrapper;

// Re-export core types
pub use config::Config;
pub use descriptor::{Descriptor, Phase};
pub use engine::Context;
pub use error::{Error, Result};
pub use matrix::Matrix;
pub use model::AnalyticModel;
pub use vector::Vector;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::descriptor::{Descriptor, Phase};
    pub use crate::engine::Context;
    pub use crate::error::{Error, Result};
    pub use crate::matrix::Matrix;
    pub use crate::ops::{self, Operand};
    pub use crate::vector::Vector;
}
