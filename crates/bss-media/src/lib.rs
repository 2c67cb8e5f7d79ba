//! Local playback of test footage: media element abstraction and the RGB/thermal
//! master/slave synchronizer.

mod simulated;
mod sync;

pub use simulated::SimulatedMedia;
pub use sync::{DualMediaSynchronizer, SyncClock, SyncMetrics, SyncTick};

use std::time::Duration;

use bss_types::{BssError, Result};

/// A locally loaded, seekable media resource.
pub trait MediaElement: Send {
    fn load(&mut self, source: &str) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn seek(&mut self, time: f64) -> Result<()>;
    fn set_rate(&mut self, rate: f64) -> Result<()>;
    fn current_time(&self) -> f64;
    fn duration(&self) -> f64;
    fn is_paused(&self) -> bool;
    fn rate(&self) -> f64;
    fn source(&self) -> Option<&str>;

    /// Drive the element's clock. Real players advance on their own.
    fn advance(&mut self, _elapsed: Duration) {}
}

pub fn media_error(message: impl Into<String>) -> BssError {
    BssError::Media(message.into())
}

/// Rates must be finite and positive; zero is expressed as pause.
pub fn ensure_valid_rate(rate: f64) -> Result<()> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(media_error(format!("invalid playback rate {rate}")))
    }
}
