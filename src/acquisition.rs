//! The acquisition boundary: sample sources and the read loop.
//!
//! An [`AcquisitionSource`] yields one decoded sample per call; reads are
//! strictly sequential, one completing before the next begins.
//! [`run_acquisition`] drives the loop and feeds the supervisor: decode
//! failures are logged and skipped without touching the persistence
//! pipeline, and flipping the stop channel cancels the pending read so the
//! caller can proceed straight to `shutdown()` without losing the drain
//! step.
//!
//! The real peripheral transport lives outside this crate; [`MockLoadcell`]
//! stands in for it by synthesizing raw characteristic payloads and pushing
//! them through the same decode path a hardware source would use.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::sample::Sample;
use crate::supervisor::PersistenceSupervisor;

/// Counters reported by the acquisition loop.
#[derive(Clone, Debug, Default)]
pub struct AcquisitionStats {
    /// Samples accepted by `ingest`.
    pub accepted: u64,
    /// Payloads that failed to decode and were skipped.
    pub decode_errors: u64,
}

/// A producer of decoded samples. Reads never overlap.
#[async_trait]
pub trait AcquisitionSource: Send {
    /// Block until the next sample is available or fails to decode.
    async fn next_sample(&mut self) -> AppResult<Sample>;
}

/// Simulated loadcell: a slow sine on the load channel with noise, a steady
/// battery and a monotonic device clock, emitted as raw payloads and run
/// through the real decoder.
pub struct MockLoadcell {
    period: Duration,
    clock: u64,
}

impl MockLoadcell {
    pub fn new(period: Duration) -> Self {
        Self { period, clock: 0 }
    }
}

#[async_trait]
impl AcquisitionSource for MockLoadcell {
    async fn next_sample(&mut self) -> AppResult<Sample> {
        tokio::time::sleep(self.period).await;
        self.clock += 1;
        let (load_raw, adc_raw) = {
            let mut rng = rand::thread_rng();
            let phase = self.clock as f64 / 50.0;
            // Raw load in milli-kilogram-force, like the firmware reports.
            let load_raw = (2000.0 + 500.0 * phase.sin() + rng.gen_range(-20.0..20.0)) as i32;
            // Raw ADC in millivolt counts, ~3.7 V after conversion.
            let adc_raw: i32 = 758_000 + rng.gen_range(-2000..2000);
            (load_raw, adc_raw)
        };
        Sample::from_raw(
            Utc::now(),
            &load_raw.to_le_bytes(),
            &adc_raw.to_le_bytes(),
            &self.clock.to_le_bytes(),
        )
    }
}

/// Read samples from `source` into `supervisor` until the stop channel
/// flips, `max_samples` is reached, or a fatal error occurs.
///
/// A stop request cancels the in-flight read; it is a normal termination,
/// not a failure, and the caller is expected to invoke
/// [`PersistenceSupervisor::shutdown`] exactly once afterwards.
pub async fn run_acquisition<S: AcquisitionSource>(
    source: &mut S,
    supervisor: &PersistenceSupervisor,
    mut stop: watch::Receiver<bool>,
    max_samples: Option<u64>,
) -> AppResult<AcquisitionStats> {
    let mut stats = AcquisitionStats::default();
    loop {
        if max_samples.is_some_and(|limit| stats.accepted >= limit) {
            info!(accepted = stats.accepted, "sample budget reached");
            break;
        }
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    info!(accepted = stats.accepted, "acquisition interrupted");
                    break;
                }
            }
            result = source.next_sample() => match result {
                Ok(sample) => {
                    debug!(
                        load = sample.load,
                        battery = sample.battery,
                        clock = sample.device_clock,
                        "sample accepted"
                    );
                    supervisor.ingest(sample).await?;
                    stats.accepted += 1;
                }
                Err(e) if e.is_recoverable() => {
                    stats.decode_errors += 1;
                    warn!(error = %e, "skipping undecodable sample");
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogError;
    use crate::supervisor::PersistenceOptions;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Plays back a fixed script of read outcomes, then pends forever.
    struct ScriptedSource {
        script: VecDeque<AppResult<Sample>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<AppResult<Sample>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    #[async_trait]
    impl AcquisitionSource for ScriptedSource {
        async fn next_sample(&mut self) -> AppResult<Sample> {
            match self.script.pop_front() {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }

    fn ok_sample(clock: u64) -> AppResult<Sample> {
        Ok(Sample {
            captured_at: Utc::now(),
            device_clock: clock,
            load: clock as f64,
            battery: 3.3,
        })
    }

    fn start_supervisor(dir: &TempDir) -> PersistenceSupervisor {
        PersistenceSupervisor::start(dir.path(), PersistenceOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn mock_loadcell_produces_plausible_samples() {
        let mut source = MockLoadcell::new(Duration::from_millis(1));
        let first = source.next_sample().await.unwrap();
        let second = source.next_sample().await.unwrap();
        assert_eq!(first.device_clock + 1, second.device_clock);
        assert!(first.load > 0.0);
        assert!(first.battery > 3.0 && first.battery < 4.0);
    }

    #[tokio::test]
    async fn decode_errors_are_skipped_and_counted() {
        let dir = TempDir::new().unwrap();
        let sup = start_supervisor(&dir);
        let mut source = ScriptedSource::new(vec![
            ok_sample(1),
            Err(LogError::Decode("bad payload".into())),
            ok_sample(2),
        ]);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let stats = run_acquisition(&mut source, &sup, stop_rx, Some(2))
            .await
            .unwrap();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.decode_errors, 1);
        let report = sup.shutdown().await.unwrap();
        assert_eq!(report.state.total_rows_written, 2);
    }

    #[tokio::test]
    async fn stop_cancels_pending_read() {
        let dir = TempDir::new().unwrap();
        let sup = start_supervisor(&dir);
        let mut source = ScriptedSource::new(vec![ok_sample(1)]);
        let (stop_tx, stop_rx) = watch::channel(false);
        let driver = async {
            // Let the first read complete, then interrupt the second.
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop_tx.send(true).ok();
        };
        let (stats, ()) = tokio::join!(
            async { run_acquisition(&mut source, &sup, stop_rx, None).await.unwrap() },
            driver
        );
        assert_eq!(stats.accepted, 1);
        let report = sup.shutdown().await.unwrap();
        assert_eq!(report.state.total_rows_written, 1);
    }

    #[tokio::test]
    async fn fatal_errors_propagate() {
        let dir = TempDir::new().unwrap();
        let sup = start_supervisor(&dir);
        let mut source =
            ScriptedSource::new(vec![Err(LogError::Persistence("link lost".into()))]);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let err = run_acquisition(&mut source, &sup, stop_rx, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LogError::Persistence(_)));
        sup.shutdown().await.unwrap();
    }
}
