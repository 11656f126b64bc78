//! Per-operation spill policy.
//!
//! A governor is created for one top-level operation call with an explicit
//! ceiling. It holds no global state; the only mutable part is the peak
//! tracker used for diagnostics.

use chunkflow_core::error::{Error, Result};

use crate::tracking::PeakTracker;

const MB: u64 = 1024 * 1024;

#[derive(Debug)]
pub struct MemoryGovernor {
    ceiling_bytes: u64,
    peak: PeakTracker,
}

impl MemoryGovernor {
    /// Ceiling in megabytes; zero is a configuration error.
    pub fn new(ceiling_mb: u64) -> Result<Self> {
        if ceiling_mb == 0 {
            return Err(Error::Config("memory ceiling must be > 0 MB".into()));
        }
        Ok(Self::with_ceiling_bytes(ceiling_mb.saturating_mul(MB)))
    }

    /// Byte-granular ceiling, mainly for tests that need to force spills.
    pub fn with_ceiling_bytes(ceiling_bytes: u64) -> Self {
        Self {
            ceiling_bytes,
            peak: PeakTracker::new(),
        }
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    /// True when the accumulated estimate strictly exceeds the ceiling.
    pub fn should_spill(&self, accumulated_bytes: u64) -> bool {
        accumulated_bytes > self.ceiling_bytes
    }

    pub fn fits(&self, bytes: u64) -> bool {
        bytes <= self.ceiling_bytes
    }

    /// Record the current estimate and return whether it must be spilled.
    pub fn observe(&self, accumulated_bytes: u64) -> bool {
        self.peak.record_used(accumulated_bytes);
        self.should_spill(accumulated_bytes)
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak.peak()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ceiling_is_config_error() {
        assert!(matches!(MemoryGovernor::new(0), Err(Error::Config(_))));
    }

    #[test]
    fn spill_only_above_ceiling() {
        let g = MemoryGovernor::new(1).unwrap();
        assert_eq!(g.ceiling_bytes(), MB);
        assert!(!g.should_spill(MB));
        assert!(g.should_spill(MB + 1));
        assert!(g.fits(MB));
    }

    #[test]
    fn observe_tracks_peak() {
        let g = MemoryGovernor::with_ceiling_bytes(100);
        assert!(!g.observe(60));
        assert!(g.observe(160));
        assert!(!g.observe(0));
        assert_eq!(g.peak_bytes(), 160);
    }
}
