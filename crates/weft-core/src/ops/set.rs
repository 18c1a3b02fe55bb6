//! The `set` family: scalar fill, masked fill, vector copy, masked copy
//!
//! The unmasked scalar fill only ever grows the pattern (it assigns the
//! not-yet-assigned positions). The other three are out-of-place: the old
//! output content is discarded, which is implemented by the tile covering
//! index zero resetting the global nonzero count while every tile rebuilds
//! its own range.

use crate::descriptor::{Descriptor, Phase};
use crate::error::Result;
use crate::kernels::{join_local, local_view, LocalView};
use crate::stage::{Opcode, StageFn, StageSpec};
use crate::vector::Vector;
use crate::wrapper::value_or_index_raw;
use weft_algebra::Numeric;

use super::check_mask;

fn index_value<T: Numeric>(descr: Descriptor, value: T, i: usize) -> T {
    if descr.use_index() {
        T::from_f64(i as f64)
    } else {
        value
    }
}

/// `x[i] <- value` for every position; the pattern becomes dense
pub fn set_scalar<T: Numeric>(
    x: &mut Vector<T>,
    value: T,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    if phase.is_resize() {
        return Ok(());
    }
    let n = x.size();
    if n == 0 {
        return Ok(());
    }

    let x_vals = x.values_mut_ptr();
    let x_coords = x.coords_handle();
    let dense_descr = descr.dense();

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = dense_descr || pipe.all_already_dense();
        if !dense_all && !pipe.is_already_dense_addr(x_coords.addr()) {
            let mut lx = local_view(pipe, false, x_coords.const_ptr(), lo, hi);
            lx.assign_all_unassigned();
            join_local(x_coords.const_ptr(), &lx, lo, hi);
        }
        for i in lo..hi {
            unsafe { x_vals.write(i, index_value(descr, value, i)) };
        }
        Ok(())
    });

    x.context().clone().add_stage(StageSpec {
        func,
        opcode: Opcode::SetScalar,
        n,
        data_bytes: std::mem::size_of::<T>(),
        dense_descr,
        dense_mask: true,
        outputs: [Some(x.operand()), None],
        inputs: [None, None, None, None],
        matrix: None,
    })
}

/// `x <- value` at mask-selected positions only; the old content of `x` is
/// discarded
pub fn set_scalar_masked<T: Numeric, M: Numeric>(
    x: &mut Vector<T>,
    mask: &Vector<M>,
    value: T,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    let n = x.size();
    if !check_mask(Some(mask), n, x.context())? {
        return set_scalar(x, value, descr, phase);
    }
    if phase.is_resize() {
        return Ok(());
    }
    if n == 0 {
        return Ok(());
    }

    let x_vals = x.values_mut_ptr();
    let x_coords = x.coords_handle();
    let m_vals = mask.values_ptr();
    let m_coords = mask.coords_handle();
    let dense_mask = mask.coords().is_dense();
    let dense_descr = descr.dense();

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = dense_descr || pipe.all_already_dense();
        let mut lx = local_view(pipe, dense_all, x_coords.const_ptr(), lo, hi);
        let lm = local_view(pipe, dense_all, m_coords.const_ptr(), lo, hi);

        if !dense_all {
            if lo == 0 {
                unsafe { x_coords.get() }.reset_nnz();
            }
            lx.clear_all();
        }

        let n_local = hi - lo;
        // walk the mask stack only when that is clearly the shorter loop
        let by_stack = !descr.invert_mask() && !lm.is_dense() && 2 * lm.nonzeroes() < n_local;
        let mut visit = |i: usize| {
            if !lm.mask(descr, i, unsafe { m_vals.read(lo + i) }) {
                return;
            }
            lx.assign(i);
            unsafe { x_vals.write(lo + i, index_value(descr, value, lo + i)) };
        };
        if by_stack {
            for k in 0..lm.nonzeroes() {
                visit(lm.index(k));
            }
        } else {
            for i in 0..n_local {
                visit(i);
            }
        }

        if !dense_all {
            join_local(x_coords.const_ptr(), &lx, lo, hi);
        }
        Ok(())
    });

    x.context().clone().add_stage(StageSpec {
        func,
        opcode: Opcode::SetMaskedScalar,
        n,
        data_bytes: std::mem::size_of::<T>(),
        dense_descr,
        dense_mask,
        outputs: [Some(x.operand()), None],
        inputs: [Some(mask.operand()), None, None, None],
        matrix: None,
    })
}

/// `x <- y`, pattern included; the old content of `x` is discarded
pub fn set_vector<T: Numeric>(
    x: &mut Vector<T>,
    y: &Vector<T>,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    let n = x.size();
    super::check_vector(y, n, x.context())?;
    if phase.is_resize() {
        return Ok(());
    }
    if n == 0 {
        return Ok(());
    }

    let x_vals = x.values_mut_ptr();
    let x_coords = x.coords_handle();
    let y_vals = y.values_ptr();
    let y_coords = y.coords_handle();
    let dense_descr = descr.dense();

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = dense_descr || pipe.all_already_dense();
        let mut lx = local_view(pipe, dense_all, x_coords.const_ptr(), lo, hi);
        let ly = local_view(pipe, dense_all, y_coords.const_ptr(), lo, hi);

        if !dense_all {
            if lo == 0 {
                unsafe { x_coords.get() }.reset_nnz();
            }
        }

        if ly.is_dense() {
            if !dense_all {
                lx.assign_all();
            }
            for i in lo..hi {
                unsafe { x_vals.write(i, value_or_index_raw(descr, &y_vals, i)) };
            }
        } else {
            if !dense_all {
                lx.clear_all();
            }
            for k in 0..ly.nonzeroes() {
                let i = ly.index(k);
                lx.assign(i);
                unsafe { x_vals.write(lo + i, value_or_index_raw(descr, &y_vals, lo + i)) };
            }
        }

        if !dense_all {
            join_local(x_coords.const_ptr(), &lx, lo, hi);
        }
        Ok(())
    });

    x.context().clone().add_stage(StageSpec {
        func,
        opcode: Opcode::SetVector,
        n,
        data_bytes: std::mem::size_of::<T>(),
        dense_descr,
        dense_mask: true,
        outputs: [Some(x.operand()), None],
        inputs: [Some(y.operand()), None, None, None],
        matrix: None,
    })
}

/// `x <- y` at mask-selected positions where `y` is assigned; the old
/// content of `x` is discarded
pub fn set_vector_masked<T: Numeric, M: Numeric>(
    x: &mut Vector<T>,
    mask: &Vector<M>,
    y: &Vector<T>,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    let n = x.size();
    super::check_vector(y, n, x.context())?;
    if !check_mask(Some(mask), n, x.context())? {
        return set_vector(x, y, descr, phase);
    }
    if phase.is_resize() {
        return Ok(());
    }
    if n == 0 {
        return Ok(());
    }

    let x_vals = x.values_mut_ptr();
    let x_coords = x.coords_handle();
    let y_vals = y.values_ptr();
    let y_coords = y.coords_handle();
    let m_vals = mask.values_ptr();
    let m_coords = mask.coords_handle();
    let dense_mask = mask.coords().is_dense();
    let dense_descr = descr.dense();

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = dense_descr || pipe.all_already_dense();
        let mut lx = local_view(pipe, dense_all, x_coords.const_ptr(), lo, hi);
        let ly = local_view(pipe, dense_all, y_coords.const_ptr(), lo, hi);
        let lm = local_view(pipe, dense_all, m_coords.const_ptr(), lo, hi);

        if !dense_all {
            if lo == 0 {
                unsafe { x_coords.get() }.reset_nnz();
            }
            lx.clear_all();
        }

        let n_local = hi - lo;
        let by_stack = !descr.invert_mask() && !lm.is_dense() && 2 * lm.nonzeroes() < n_local;
        let mut visit = |i: usize| {
            if !lm.mask(descr, i, unsafe { m_vals.read(lo + i) }) {
                return;
            }
            if !ly.assigned(i) {
                return;
            }
            lx.assign(i);
            unsafe { x_vals.write(lo + i, value_or_index_raw(descr, &y_vals, lo + i)) };
        };
        if by_stack {
            for k in 0..lm.nonzeroes() {
                visit(lm.index(k));
            }
        } else {
            for i in 0..n_local {
                visit(i);
            }
        }

        if !dense_all {
            join_local(x_coords.const_ptr(), &lx, lo, hi);
        }
        Ok(())
    });

    x.context().clone().add_stage(StageSpec {
        func,
        opcode: Opcode::SetMaskedVector,
        n,
        data_bytes: std::mem::size_of::<T>(),
        dense_descr,
        dense_mask,
        outputs: [Some(x.operand()), None],
        inputs: [Some(y.operand()), Some(mask.operand()), None, None],
        matrix: None,
    })
}
