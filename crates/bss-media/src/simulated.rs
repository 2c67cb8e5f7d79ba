use std::time::Duration;

use tracing::debug;

use crate::{ensure_valid_rate, media_error, MediaElement};
use bss_types::Result;

/// Clock-driven media element: position advances only through [`MediaElement::advance`].
#[derive(Debug, Clone)]
pub struct SimulatedMedia {
    label: String,
    source: Option<String>,
    position: f64,
    duration: f64,
    rate: f64,
    paused: bool,
    failure: Option<String>,
}

impl SimulatedMedia {
    pub fn new(label: impl Into<String>, duration: f64) -> Self {
        Self {
            label: label.into(),
            source: None,
            position: 0.0,
            duration: duration.max(0.0),
            rate: 1.0,
            paused: true,
            failure: None,
        }
    }

    /// Make every subsequent control call fail, e.g. a decoder error on the element.
    pub fn fail_with(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }

    pub fn recover(&mut self) {
        self.failure = None;
    }

    fn check(&self, op: &str) -> Result<()> {
        match &self.failure {
            Some(reason) => Err(media_error(format!("{} {op} failed: {reason}", self.label))),
            None => Ok(()),
        }
    }

    fn clamp(&self, time: f64) -> f64 {
        if self.duration > 0.0 {
            time.clamp(0.0, self.duration)
        } else {
            time.max(0.0)
        }
    }
}

impl MediaElement for SimulatedMedia {
    fn load(&mut self, source: &str) -> Result<()> {
        self.check("load")?;
        if source.trim().is_empty() {
            return Err(media_error(format!("{} load failed: empty source", self.label)));
        }
        debug!(element = %self.label, source, "loading media");
        self.source = Some(source.to_string());
        self.position = 0.0;
        self.paused = true;
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.check("play")?;
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.check("pause")?;
        self.paused = true;
        Ok(())
    }

    fn seek(&mut self, time: f64) -> Result<()> {
        self.check("seek")?;
        if !time.is_finite() {
            return Err(media_error(format!("{} seek to non-finite time", self.label)));
        }
        self.position = self.clamp(time);
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        self.check("set_rate")?;
        ensure_valid_rate(rate)?;
        self.rate = rate;
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.position
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn rate(&self) -> f64 {
        self.rate
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn advance(&mut self, elapsed: Duration) {
        if self.paused {
            return;
        }
        self.position = self.clamp(self.position + elapsed.as_secs_f64() * self.rate);
        if self.duration > 0.0 && self.position >= self.duration {
            self.paused = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_only_while_playing() {
        let mut media = SimulatedMedia::new("rgb", 30.0);
        media.load("clip.mp4").unwrap();
        media.advance(Duration::from_secs(1));
        assert_eq!(media.current_time(), 0.0);

        media.set_rate(2.0).unwrap();
        media.play().unwrap();
        media.advance(Duration::from_millis(500));
        assert!((media.current_time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn stops_at_end_of_media() {
        let mut media = SimulatedMedia::new("rgb", 2.0);
        media.play().unwrap();
        media.advance(Duration::from_secs(5));
        assert_eq!(media.current_time(), 2.0);
        assert!(media.is_paused());
    }

    #[test]
    fn injected_failure_rejects_controls() {
        let mut media = SimulatedMedia::new("tir", 10.0);
        media.fail_with("decoder stalled");
        assert!(media.play().is_err());
        media.recover();
        assert!(media.play().is_ok());
        assert!(media.set_rate(0.0).is_err());
    }
}
