//! Sparse matrix container in doubly compressed form
//!
//! A matrix stores its nonzeroes in both row-major (CRS) and column-major
//! (CCS) compressed layouts so that SpMV stages can gather either rows or
//! columns depending on the transpose descriptor. Matrices are read-only
//! inside any pipeline that references them; an SpMV stage records the
//! matrix id only so that destruction triggers pipeline execution.
//!
//! Assembly uses the matrix's SPA scratch (bitmask, stack, value buffer)
//! per row: duplicates collapse to the last value given, and column indices
//! come out sorted within each row.

use crate::coords::IndexType;
use crate::engine::Context;
use crate::error::{Error, Result};
use crate::stage::{ContainerId, SharedPtr};
use weft_algebra::Numeric;

/// One compressed layout: offsets per major index, minor indices, values
pub(crate) struct CompressedStorage<T> {
    pub offsets: Vec<usize>,
    pub indices: Vec<IndexType>,
    pub values: Vec<T>,
}

impl<T: Numeric> CompressedStorage<T> {
    fn with_majors(majors: usize) -> Self {
        Self {
            offsets: vec![0; majors + 1],
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    pub(crate) fn view(&self) -> CompressedView<T> {
        CompressedView {
            offsets: SharedPtr::new(self.offsets.as_ptr()),
            indices: SharedPtr::new(self.indices.as_ptr()),
            values: SharedPtr::new(self.values.as_ptr()),
        }
    }
}

/// Raw-pointer view of a compressed layout, captured by SpMV closures
#[derive(Clone, Copy)]
pub(crate) struct CompressedView<T> {
    offsets: SharedPtr<usize>,
    indices: SharedPtr<IndexType>,
    values: SharedPtr<T>,
}

impl<T: Numeric> CompressedView<T> {
    /// Nonzero range of one major index
    ///
    /// # Safety
    /// `major` must be below the matrix's major dimension and the matrix
    /// must be alive.
    pub(crate) unsafe fn range(&self, major: usize) -> (usize, usize) {
        (self.offsets.read(major), self.offsets.read(major + 1))
    }

    /// # Safety
    /// `k` must come from a `range` of this view.
    pub(crate) unsafe fn minor(&self, k: usize) -> usize {
        self.indices.read(k) as usize
    }

    /// # Safety
    /// `k` must come from a `range` of this view.
    pub(crate) unsafe fn value(&self, k: usize) -> T {
        self.values.read(k)
    }
}

pub(crate) struct MatrixInner<T> {
    nrows: usize,
    ncols: usize,
    crs: CompressedStorage<T>,
    ccs: CompressedStorage<T>,
    id: ContainerId,
}

/// Sparse `m x n` matrix over `T`
pub struct Matrix<T: Numeric> {
    inner: Box<MatrixInner<T>>,
    ctx: Context,
}

impl<T: Numeric> Matrix<T> {
    /// Build from (row, col, value) triples.
    ///
    /// Out-of-bounds coordinates return `Mismatch`. Duplicate coordinates
    /// collapse to the last value supplied.
    pub fn from_entries(
        ctx: &Context,
        nrows: usize,
        ncols: usize,
        entries: &[(usize, usize, T)],
    ) -> Result<Self> {
        for &(r, c, _) in entries {
            if r >= nrows || c >= ncols {
                return Err(Error::Mismatch);
            }
        }
        if ncols > IndexType::MAX as usize || nrows > IndexType::MAX as usize {
            return Err(Error::Failed);
        }

        // bucket the triples by row
        let mut row_counts = vec![0usize; nrows + 1];
        for &(r, _, _) in entries {
            row_counts[r + 1] += 1;
        }
        for r in 0..nrows {
            let acc = row_counts[r];
            row_counts[r + 1] += acc;
        }
        let mut by_row: Vec<(usize, T)> = vec![(0, T::zero()); entries.len()];
        let mut cursor = row_counts.clone();
        for &(r, c, v) in entries {
            by_row[cursor[r]] = (c, v);
            cursor[r] += 1;
        }

        // per-row SPA assembly into CRS
        let mut crs = CompressedStorage::with_majors(nrows);
        let mut spa_mask = vec![false; ncols];
        let mut spa_values = vec![T::zero(); ncols];
        let mut spa_stack: Vec<IndexType> = Vec::with_capacity(ncols.min(entries.len()));
        for r in 0..nrows {
            spa_stack.clear();
            for &(c, v) in &by_row[row_counts[r]..row_counts[r + 1]] {
                if !spa_mask[c] {
                    spa_mask[c] = true;
                    spa_stack.push(c as IndexType);
                }
                spa_values[c] = v;
            }
            spa_stack.sort_unstable();
            for &c in &spa_stack {
                crs.indices.push(c);
                crs.values.push(spa_values[c as usize]);
                spa_mask[c as usize] = false;
            }
            crs.offsets[r + 1] = crs.indices.len();
        }

        // transpose CRS into CCS
        let nnz = crs.indices.len();
        let mut ccs = CompressedStorage::with_majors(ncols);
        for &c in &crs.indices {
            ccs.offsets[c as usize + 1] += 1;
        }
        for c in 0..ncols {
            let acc = ccs.offsets[c];
            ccs.offsets[c + 1] += acc;
        }
        ccs.indices = vec![0; nnz];
        ccs.values = vec![T::zero(); nnz];
        let mut col_cursor = ccs.offsets.clone();
        for r in 0..nrows {
            for k in crs.offsets[r]..crs.offsets[r + 1] {
                let c = crs.indices[k] as usize;
                ccs.indices[col_cursor[c]] = r as IndexType;
                ccs.values[col_cursor[c]] = crs.values[k];
                col_cursor[c] += 1;
            }
        }

        Ok(Self {
            inner: Box::new(MatrixInner {
                nrows,
                ncols,
                crs,
                ccs,
                id: ContainerId::fresh(),
            }),
            ctx: ctx.clone(),
        })
    }

    pub fn nrows(&self) -> usize {
        self.inner.nrows
    }

    pub fn ncols(&self) -> usize {
        self.inner.ncols
    }

    pub fn nnz(&self) -> usize {
        self.inner.crs.indices.len()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub(crate) fn id(&self) -> ContainerId {
        self.inner.id
    }

    pub(crate) fn crs_view(&self) -> CompressedView<T> {
        self.inner.crs.view()
    }

    pub(crate) fn ccs_view(&self) -> CompressedView<T> {
        self.inner.ccs.view()
    }

    /// The value at (row, col), if present. Reads the CRS side.
    pub fn get(&self, row: usize, col: usize) -> Result<Option<T>> {
        if row >= self.inner.nrows || col >= self.inner.ncols {
            return Err(Error::Mismatch);
        }
        let crs = &self.inner.crs;
        for k in crs.offsets[row]..crs.offsets[row + 1] {
            if crs.indices[k] as usize == col {
                return Ok(Some(crs.values[k]));
            }
        }
        Ok(None)
    }
}

impl<T: Numeric> Drop for Matrix<T> {
    fn drop(&mut self) {
        let _ = self.ctx.flush(self.inner.id);
    }
}

impl<T: Numeric> std::fmt::Debug for Matrix<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matrix")
            .field("nrows", &self.inner.nrows)
            .field("ncols", &self.inner.ncols)
            .field("nnz", &self.nnz())
            .finish()
    }
}
