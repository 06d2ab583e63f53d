//! Wake-word detection seam
//!
//! Detectors consume fixed-length mono frames at their own sample rate and
//! report whether the wake word ended in that frame.

use crate::error::Result;

pub trait WakeDetector: Send {
    /// Samples per frame passed to [`WakeDetector::process`]
    fn frame_length(&self) -> usize;

    fn sample_rate(&self) -> u32;

    /// True if the wake word was detected in `frame`
    fn process(&mut self, frame: &[i16]) -> bool;
}

/// Creates one detector per listener session
pub trait DetectorFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn WakeDetector>>;
}

impl<F> DetectorFactory for F
where
    F: Fn() -> Result<Box<dyn WakeDetector>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn WakeDetector>> {
        self()
    }
}

/// Fires when a frame's mean absolute amplitude crosses a threshold
///
/// A stand-in for an engine-backed detector; treats any loud frame as the
/// wake word.
#[derive(Debug, Clone)]
pub struct EnergyDetector {
    frame_length: usize,
    sample_rate: u32,
    threshold: i16,
}

impl EnergyDetector {
    pub fn new(frame_length: usize, sample_rate: u32, threshold: i16) -> Self {
        Self {
            frame_length: frame_length.max(1),
            sample_rate,
            threshold,
        }
    }
}

impl WakeDetector for EnergyDetector {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn process(&mut self, frame: &[i16]) -> bool {
        if frame.is_empty() {
            return false;
        }
        let total: u64 = frame.iter().map(|s| s.unsigned_abs() as u64).sum();
        total / frame.len() as u64 >= self.threshold.unsigned_abs() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_detector_threshold() {
        let mut detector = EnergyDetector::new(4, 16_000, 1000);
        assert!(!detector.process(&[0, 10, -10, 5]));
        assert!(detector.process(&[2000, -2000, 1500, -1500]));
        assert!(!detector.process(&[]));
    }

    #[test]
    fn test_closure_factory() {
        let factory = || -> Result<Box<dyn WakeDetector>> {
            Ok(Box::new(EnergyDetector::new(512, 16_000, 500)))
        };
        let detector = factory.create().unwrap();
        assert_eq!(detector.frame_length(), 512);
        assert_eq!(detector.sample_rate(), 16_000);
    }
}
