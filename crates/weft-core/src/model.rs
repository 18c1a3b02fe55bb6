//! Analytic model choosing thread count and tile size
//!
//! The model is recomputed per pipeline execution, because the byte cost
//! per loop iteration differs between pipelines: it is the maximum element
//! size of any stage times the number of distinct containers the pipeline
//! touches.

use crate::config::{Config, L1_CACHE_USAGE};

/// The `(threads, tile_size, num_tiles)` triple for one pipeline execution
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnalyticModel {
    threads: usize,
    tile_size: usize,
    num_tiles: usize,
}

impl AnalyticModel {
    /// Estimate threads and tile size for a pipeline over containers of
    /// length `n`, where one loop iteration moves `data_bytes` bytes per
    /// accessed container and `accessed` containers are live.
    pub fn new(cfg: &Config, data_bytes: usize, n: usize, accessed: usize) -> Self {
        if n == 0 {
            return Self {
                threads: 1,
                tile_size: 1,
                num_tiles: 1,
            };
        }

        let t_max = cfg.max_threads.max(1);
        let bytes_per_iteration = data_bytes.saturating_mul(accessed.max(1));

        let tile_size = match cfg.manual_tile_size {
            Some(manual) => manual.clamp(1, n),
            None => {
                let mut tile_size = cfg.min_tile_size.max(n / t_max).max(1);
                // grow the tile while its working set still fits the
                // per-thread cache budget
                let budget = (cfg.l1_cache_bytes as f64 * L1_CACHE_USAGE) as usize;
                if bytes_per_iteration > 0 {
                    let cache_fit = budget / bytes_per_iteration;
                    if cache_fit > tile_size {
                        tile_size = cache_fit;
                    }
                }
                tile_size.min(n)
            }
        };

        let num_tiles = n.div_ceil(tile_size).max(1);
        let threads = t_max.min(num_tiles);

        Self {
            threads,
            tile_size,
            num_tiles,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.threads
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    pub fn num_tiles(&self) -> usize {
        self.num_tiles
    }

    /// The `[lo, hi)` range of tile `tile_id` for containers of length `n`
    pub fn tile_bounds(&self, tile_id: usize, n: usize) -> (usize, usize) {
        let lo = tile_id * self.tile_size;
        let hi = ((tile_id + 1) * self.tile_size).min(n);
        (lo, hi)
    }

    /// The tile owning the range starting at `lower_bound`
    pub fn tile_of(&self, lower_bound: usize) -> usize {
        debug_assert!(self.tile_size > 0);
        lower_bound / self.tile_size
    }
}
