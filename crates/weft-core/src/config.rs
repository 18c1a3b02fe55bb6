//! Configuration for the scheduler and the analytic model
//!
//! A `Config` is fixed at [`crate::engine::Context`] construction and shared
//! by every container created from that context. Coordinate buffers are
//! sized from the config at container construction, so the per-vector tile
//! capacity never changes over a container's lifetime.

/// The minimum tile size the analytic model may select on its own.
///
/// A manually configured tile size may be smaller.
pub const MIN_TILE_SIZE: usize = 512;

/// Fraction of the L1 budget the model may fill. Slightly below one to
/// leave room for data the model does not account for, e.g. matrix rows.
pub const L1_CACHE_USAGE: f64 = 0.98;

/// Per-thread L1 data cache budget assumed by default, in bytes.
pub const DEFAULT_L1_CACHE_BYTES: usize = 32 * 1024;

/// Cache line size used for padding per-tile reduction slots.
pub const CACHE_LINE_BYTES: usize = 64;

/// Scheduler and analytic-model parameters
#[derive(Clone, Debug)]
pub struct Config {
    /// Upper bound on worker threads for any pipeline execution
    pub max_threads: usize,

    /// Per-thread cache budget used by the analytic model
    pub l1_cache_bytes: usize,

    /// Smallest tile the analytic model may choose
    pub min_tile_size: usize,

    /// Fixed tile size overriding the analytic model, may be smaller than
    /// `min_tile_size`
    pub manual_tile_size: Option<usize>,

    /// A pipeline reaching this many stages is executed before accepting
    /// more work
    pub fusion_cap: usize,

    /// Initial number of pipeline slots reserved by the scheduler
    pub max_pipelines: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_threads: num_cpus::get().max(1),
            l1_cache_bytes: DEFAULT_L1_CACHE_BYTES,
            min_tile_size: MIN_TILE_SIZE,
            manual_tile_size: None,
            fusion_cap: 16,
            max_pipelines: 4,
        }
    }
}

impl Config {
    /// Smallest tile size any execution of this config can produce.
    ///
    /// Buffer sizing uses this, so a manual tile size below
    /// `min_tile_size` still gets enough per-tile slots.
    pub fn effective_min_tile(&self) -> usize {
        match self.manual_tile_size {
            Some(t) => t.min(self.min_tile_size).max(1),
            None => self.min_tile_size.max(1),
        }
    }

    /// Upper bound on the number of tiles a vector of length `n` can ever
    /// be split into under this config.
    pub fn max_tiles(&self, n: usize) -> usize {
        if n == 0 {
            return 1;
        }
        n.div_ceil(self.effective_min_tile()).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert!(cfg.max_threads >= 1);
        assert_eq!(cfg.min_tile_size, MIN_TILE_SIZE);
        assert_eq!(cfg.fusion_cap, 16);
        assert!(cfg.manual_tile_size.is_none());
    }

    #[test]
    fn test_max_tiles() {
        let cfg = Config::default();
        assert_eq!(cfg.max_tiles(0), 1);
        assert_eq!(cfg.max_tiles(1), 1);
        assert_eq!(cfg.max_tiles(MIN_TILE_SIZE), 1);
        assert_eq!(cfg.max_tiles(MIN_TILE_SIZE + 1), 2);
        assert_eq!(cfg.max_tiles(10 * MIN_TILE_SIZE), 10);
    }

    #[test]
    fn test_manual_tile_bounds_buffers() {
        let cfg = Config {
            manual_tile_size: Some(4),
            ..Config::default()
        };
        assert_eq!(cfg.effective_min_tile(), 4);
        assert_eq!(cfg.max_tiles(100), 25);
    }
}
