use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{ensure_valid_rate, MediaElement};
use bss_types::Result;

/// Snapshot of both element clocks, recomputed on every master time update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncClock {
    pub master_time: f64,
    pub slave_time: f64,
    pub tolerance_epsilon: f64,
}

impl SyncClock {
    pub fn drift(&self) -> f64 {
        (self.slave_time - self.master_time).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncTick {
    pub clock: SyncClock,
    pub corrected: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMetrics {
    pub corrections: u64,
    pub slave_failures: u64,
    pub last_drift: f64,
}

/// Couples two media elements: RGB is the master, thermal follows it.
///
/// Control calls go to the master first; the slave mirror is best-effort, so a
/// slave failure is logged and counted but never rolls back the master.
pub struct DualMediaSynchronizer<M: MediaElement> {
    master: M,
    slave: M,
    epsilon: f64,
    metrics: SyncMetrics,
}

impl<M: MediaElement> DualMediaSynchronizer<M> {
    pub fn new(master: M, slave: M, epsilon: f64) -> Self {
        Self {
            master,
            slave,
            epsilon,
            metrics: SyncMetrics::default(),
        }
    }

    pub fn master(&self) -> &M {
        &self.master
    }

    pub fn slave(&self) -> &M {
        &self.slave
    }

    pub fn master_mut(&mut self) -> &mut M {
        &mut self.master
    }

    pub fn slave_mut(&mut self) -> &mut M {
        &mut self.slave
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.metrics
    }

    pub fn load(&mut self, rgb_source: &str, thermal_source: &str) -> Result<()> {
        self.master.load(rgb_source)?;
        self.slave.load(thermal_source)?;
        Ok(())
    }

    /// Back to position 0, paused, on both elements.
    pub fn reset(&mut self) -> Result<()> {
        self.master.pause()?;
        self.master.seek(0.0)?;
        self.mirror("pause", |slave| slave.pause());
        self.mirror("seek", |slave| slave.seek(0.0));
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        self.master.play()?;
        self.mirror("play", |slave| slave.play());
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.master.pause()?;
        self.mirror("pause", |slave| slave.pause());
        Ok(())
    }

    pub fn seek(&mut self, time: f64) -> Result<()> {
        self.master.seek(time)?;
        let target = self.master.current_time();
        self.mirror("seek", |slave| slave.seek(target));
        Ok(())
    }

    pub fn set_rate(&mut self, rate: f64) -> Result<()> {
        ensure_valid_rate(rate)?;
        self.master.set_rate(rate)?;
        self.mirror("set_rate", |slave| slave.set_rate(rate));
        Ok(())
    }

    /// Duration is taken from the master and assumed to match the slave.
    pub fn duration(&self) -> f64 {
        self.master.duration()
    }

    pub fn current_time(&self) -> f64 {
        self.master.current_time()
    }

    pub fn is_playing(&self) -> bool {
        !self.master.is_paused()
    }

    pub fn rate(&self) -> f64 {
        self.master.rate()
    }

    pub fn clock(&self) -> SyncClock {
        SyncClock {
            master_time: self.master.current_time(),
            slave_time: self.slave.current_time(),
            tolerance_epsilon: self.epsilon,
        }
    }

    pub fn advance(&mut self, elapsed: Duration) {
        self.master.advance(elapsed);
        self.slave.advance(elapsed);
    }

    /// Master `timeupdate`: hard-seek the slave when drift exceeds epsilon.
    /// Smaller drift is left alone to avoid visible jitter.
    pub fn on_timeupdate(&mut self) -> SyncTick {
        let clock = self.clock();
        let drift = clock.drift();
        self.metrics.last_drift = drift;
        if drift <= self.epsilon {
            return SyncTick {
                clock,
                corrected: false,
            };
        }

        debug!(
            master = clock.master_time,
            slave = clock.slave_time,
            drift,
            "correcting thermal drift"
        );
        let corrected = match self.slave.seek(clock.master_time) {
            Ok(()) => {
                self.metrics.corrections += 1;
                true
            }
            Err(err) => {
                warn!(%err, "thermal drift correction failed");
                self.metrics.slave_failures += 1;
                false
            }
        };
        SyncTick { clock, corrected }
    }

    fn mirror<F>(&mut self, op: &str, apply: F)
    where
        F: FnOnce(&mut M) -> Result<()>,
    {
        if let Err(err) = apply(&mut self.slave) {
            warn!(%err, op, "thermal element did not follow master");
            self.metrics.slave_failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedMedia;

    fn synchronizer(epsilon: f64) -> DualMediaSynchronizer<SimulatedMedia> {
        let mut sync = DualMediaSynchronizer::new(
            SimulatedMedia::new("rgb", 120.0),
            SimulatedMedia::new("tir", 120.0),
            epsilon,
        );
        sync.load("scene_rgb.mp4", "scene_tir.mp4").unwrap();
        sync
    }

    #[test]
    fn drift_above_epsilon_seeks_slave_to_master() {
        let mut sync = synchronizer(0.5);
        sync.master_mut().seek(10.6).unwrap();
        sync.slave_mut().seek(10.0).unwrap();

        let tick = sync.on_timeupdate();
        assert!(tick.corrected);
        assert!((sync.slave().current_time() - 10.6).abs() < 1e-9);
        assert_eq!(sync.metrics().corrections, 1);
    }

    #[test]
    fn drift_within_epsilon_is_left_alone() {
        let mut sync = synchronizer(0.5);
        sync.master_mut().seek(10.2).unwrap();
        sync.slave_mut().seek(10.0).unwrap();

        let tick = sync.on_timeupdate();
        assert!(!tick.corrected);
        assert!((sync.slave().current_time() - 10.0).abs() < 1e-9);
        assert_eq!(sync.metrics().corrections, 0);
    }

    #[test]
    fn play_pause_and_rate_are_mirrored() {
        let mut sync = synchronizer(0.3);
        sync.set_rate(1.5).unwrap();
        sync.play().unwrap();
        assert!(!sync.slave().is_paused());
        assert_eq!(sync.slave().rate(), 1.5);

        sync.advance(Duration::from_secs(2));
        assert!((sync.current_time() - 3.0).abs() < 1e-9);
        assert!((sync.slave().current_time() - 3.0).abs() < 1e-9);

        sync.pause().unwrap();
        assert!(sync.slave().is_paused());
        assert!(!sync.is_playing());
    }

    #[test]
    fn slave_failure_does_not_roll_back_master() {
        let mut sync = synchronizer(0.5);
        sync.slave_mut().fail_with("decoder error");
        sync.play().unwrap();
        assert!(sync.is_playing());
        assert!(sync.slave().is_paused());
        assert_eq!(sync.metrics().slave_failures, 1);
    }

    #[test]
    fn master_failure_is_reported_and_slave_untouched() {
        let mut sync = synchronizer(0.5);
        sync.master_mut().fail_with("gone");
        assert!(sync.play().is_err());
        assert!(sync.slave().is_paused());
    }

    #[test]
    fn seek_drives_both_and_reset_rewinds() {
        let mut sync = synchronizer(0.5);
        sync.seek(42.0).unwrap();
        assert_eq!(sync.slave().current_time(), 42.0);

        sync.play().unwrap();
        sync.reset().unwrap();
        assert_eq!(sync.current_time(), 0.0);
        assert_eq!(sync.slave().current_time(), 0.0);
        assert!(sync.master().is_paused() && sync.slave().is_paused());
        assert_eq!(sync.duration(), 120.0);
    }
}
