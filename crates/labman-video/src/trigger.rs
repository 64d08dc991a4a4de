//! External trigger generator support: a function generator (or similar
//! device) that synchronizes every camera to the same exposure instant,
//! armed only once every camera involved has finished its own setup.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;

/// How often `run_trigger_starter` polls the initialising-cameras set
/// while waiting for every camera to finish arming.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A function-generator-like trigger source: configurable for either a
/// free-running square wave or a fixed-length burst, and fired once by a
/// single software command.
pub trait TriggerSource: Send {
    /// Configure a continuous square wave at `freq` Hz.
    fn configure_square(&mut self, freq: f64) -> Result<()>;
    /// Configure a fixed burst of `pulses` pulses at `freq` Hz.
    fn configure_burst(&mut self, freq: f64, pulses: u64) -> Result<()>;
    /// Issue the software command that starts the configured waveform.
    fn trigger(&mut self) -> Result<()>;
}

/// How the trigger should be configured for a run.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub framerate: f64,
    /// Total frame count to capture, if bounded. `None` means free-running
    /// (a continuous square wave rather than a counted burst).
    pub nframes: Option<u64>,
    /// Configure a counted burst (`nframes` pulses) instead of a
    /// free-running square wave, even when `nframes` is bounded.
    pub burst_mode: bool,
    /// Extra pulses appended to a burst beyond `nframes`, covering frames
    /// already in flight through the camera's own internal buffering.
    pub additional_trig: u64,
}

/// Configure `trigger` for this run, wait until every name in
/// `initialising_cams` has been removed (every camera armed and waiting),
/// then fire it.
pub async fn run_trigger_starter<T: TriggerSource>(
    mut trigger: T,
    config: TriggerConfig,
    initialising_cams: Arc<Mutex<HashSet<String>>>,
) -> Result<()> {
    if config.burst_mode {
        let pulses = config.nframes.unwrap_or(0) + config.additional_trig;
        trigger.configure_burst(config.framerate, pulses)?;
    } else {
        trigger.configure_square(config.framerate)?;
    }

    while !initialising_cams.lock().is_empty() {
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    trigger.trigger()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TriggerState {
        square_freq: Option<f64>,
        burst: Option<(f64, u64)>,
        fired: bool,
    }

    struct RecordingTrigger {
        state: Arc<Mutex<TriggerState>>,
    }

    impl TriggerSource for RecordingTrigger {
        fn configure_square(&mut self, freq: f64) -> Result<()> {
            self.state.lock().square_freq = Some(freq);
            Ok(())
        }
        fn configure_burst(&mut self, freq: f64, pulses: u64) -> Result<()> {
            self.state.lock().burst = Some((freq, pulses));
            Ok(())
        }
        fn trigger(&mut self) -> Result<()> {
            self.state.lock().fired = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn waits_for_initialising_cams_to_empty_before_firing() {
        let initialising = Arc::new(Mutex::new(HashSet::from(["cam0".to_string()])));
        let state = Arc::new(Mutex::new(TriggerState::default()));
        let trigger = RecordingTrigger { state: state.clone() };
        let config = TriggerConfig {
            framerate: 30.0,
            nframes: None,
            burst_mode: false,
            additional_trig: 0,
        };

        let waiters = initialising.clone();
        let handle = tokio::spawn(async move { run_trigger_starter(trigger, config, waiters).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!state.lock().fired, "must not fire before every camera is armed");
        initialising.lock().remove("cam0");
        handle.await.unwrap().unwrap();
        assert!(state.lock().fired);
        assert_eq!(state.lock().square_freq, Some(30.0));
    }

    #[tokio::test]
    async fn burst_mode_configures_nframes_plus_additional_pulses() {
        let initialising = Arc::new(Mutex::new(HashSet::new()));
        let state = Arc::new(Mutex::new(TriggerState::default()));
        let trigger = RecordingTrigger { state: state.clone() };
        let config = TriggerConfig {
            framerate: 100.0,
            nframes: Some(500),
            burst_mode: true,
            additional_trig: 5,
        };
        run_trigger_starter(trigger, config, initialising).await.unwrap();
        assert_eq!(state.lock().burst, Some((100.0, 505)));
        assert!(state.lock().fired);
    }
}
