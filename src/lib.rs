//! weft: a nonblocking execution engine for sparse linear algebra
//!
//! This is the umbrella crate re-exporting the workspace members:
//!
//! - [`weft_algebra`] - numeric elements, operators, monoids, semirings
//! - [`weft_core`] - containers, the lazy scheduler, and the primitives
//!
//! ```rust
//! use weft::prelude::*;
//! use weft::algebra::PlusTimes;
//!
//! let ctx = Context::new();
//! let x = Vector::from_slice(&ctx, &[1.0, 2.0, 3.0]);
//! let y = Vector::from_slice(&ctx, &[3.0, 2.0, 1.0]);
//! let mut s = 0.0;
//! ops::dot(&mut s, &x, &y, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
//! assert_eq!(s, 10.0);
//! ```

pub use weft_algebra as algebra;
pub use weft_core as core;

pub use weft_core::{ops, Config, Context, Descriptor, Error, Matrix, Phase, Result, Vector};

/// Prelude module for convenient imports
pub mod prelude {
    pub use weft_algebra::prelude::*;
    pub use weft_core::prelude::*;
}
