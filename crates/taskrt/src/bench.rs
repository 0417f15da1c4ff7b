//! Benchmark-driven candidate selection.

use std::time::{Duration, Instant};

use crate::config::BenchConfig;
use crate::device::Device;
use crate::error::{TaskError, TaskResult};
use crate::module::{Candidate, CandidateHandle};

/// Picks the candidate to use for a dispatch key that has no recorded decision.
///
/// Implementations run candidates for real: `outputs` are the buffers the caller will
/// eventually return.
pub trait CandidateSelector<D: Device>: Send + Sync {
    fn select_best(
        &self,
        device: &D,
        candidates: &[CandidateHandle<D::Tensor>],
        inputs: &[D::Tensor],
        outputs: &mut [D::Tensor],
    ) -> TaskResult<usize>;
}

/// Wall-clock benchmarker bracketing every timed round with device barriers.
#[derive(Debug, Clone)]
pub struct Benchmarker {
    config: BenchConfig,
}

impl Benchmarker {
    pub fn new(config: BenchConfig) -> TaskResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> BenchConfig {
        self.config
    }

    /// Mean per-launch latency of one candidate over `repeat` rounds.
    pub fn measure<D: Device>(
        &self,
        device: &D,
        candidate: &dyn Candidate<D::Tensor>,
        inputs: &[D::Tensor],
        outputs: &mut [D::Tensor],
    ) -> TaskResult<Duration> {
        let BenchConfig {
            warmup,
            number,
            repeat,
        } = self.config;

        for _ in 0..warmup {
            candidate.launch(inputs, outputs)?;
        }

        let mut total = Duration::ZERO;
        for _ in 0..repeat {
            device.synchronize()?;
            let start = Instant::now();
            for _ in 0..number {
                candidate.launch(inputs, outputs)?;
            }
            device.synchronize()?;
            total += start.elapsed().div_f64(number as f64);
        }
        Ok(total.div_f64(repeat as f64))
    }
}

impl<D: Device> CandidateSelector<D> for Benchmarker {
    fn select_best(
        &self,
        device: &D,
        candidates: &[CandidateHandle<D::Tensor>],
        inputs: &[D::Tensor],
        outputs: &mut [D::Tensor],
    ) -> TaskResult<usize> {
        let mut latencies = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.iter().enumerate() {
            let latency = self.measure(device, candidate.as_ref(), inputs, outputs)?;
            tracing::debug!(
                candidate = index,
                latency_us = latency.as_secs_f64() * 1e6,
                "measured candidate"
            );
            latencies.push(latency);
        }
        fastest(&latencies).ok_or_else(|| TaskError::execution("no candidates to benchmark"))
    }
}

/// Index of the smallest latency; ties go to the lowest index.
pub fn fastest(latencies: &[Duration]) -> Option<usize> {
    let mut best: Option<(usize, Duration)> = None;
    for (index, &latency) in latencies.iter().enumerate() {
        if best.is_none_or(|(_, best_latency)| latency < best_latency) {
            best = Some((index, latency));
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::device::{HostDevice, HostTensor};

    #[test]
    fn ties_resolve_to_lowest_index() {
        let same = Duration::from_micros(7);
        assert_eq!(fastest(&[same, same, same]), Some(0));
        assert_eq!(
            fastest(&[Duration::from_micros(9), same, same]),
            Some(1)
        );
        assert_eq!(fastest(&[]), None);
    }

    #[test]
    fn launch_count_follows_protocol() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let candidate: CandidateHandle<HostTensor> =
            Arc::new(move |_: &[HostTensor], _: &mut [HostTensor]| -> TaskResult<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        let bench = Benchmarker::new(BenchConfig::new(2, 3, 4).unwrap()).unwrap();
        let mut outputs: Vec<HostTensor> = Vec::new();
        let index = bench
            .select_best(&HostDevice, &[Arc::clone(&candidate), candidate], &[], &mut outputs)
            .unwrap();
        assert!(index < 2);
        // (warmup + repeat * number) launches per candidate.
        assert_eq!(calls.load(Ordering::SeqCst), 2 * (2 + 4 * 3));
    }

    #[test]
    fn launch_errors_abort_selection() {
        let failing: CandidateHandle<HostTensor> =
            Arc::new(|_: &[HostTensor], _: &mut [HostTensor]| -> TaskResult<()> {
                Err(TaskError::execution("boom"))
            });
        let bench = Benchmarker::new(BenchConfig::default()).unwrap();
        let err = bench
            .select_best(&HostDevice, &[failing], &[], &mut [])
            .unwrap_err();
        assert!(matches!(err, TaskError::Execution { .. }));
    }
}
