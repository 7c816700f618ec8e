use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::llm::Oracle;
use crate::pipeline::component::Directive;
use crate::pipeline::output::OutputWriter;

/// Cooperative cancellation shared between the driver, the dispatcher and
/// the Ctrl-C handler.
#[derive(Clone, Default)]
pub struct CancellationFlag {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before re-checking the flag so a concurrent cancel()
        // cannot slip between the check and the wait.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// One generation call, carrying enough metadata to reconcile its artifact
/// with the plan entry it came from.
#[derive(Debug)]
pub struct GenerationJob {
    pub entry_index: usize,
    pub directive: Directive,
    pub subject: String,
    pub outfit: String,
    pub style: String,
    pub variation: usize,
}

#[derive(Debug)]
pub struct GenerationOutcome {
    pub entry_index: usize,
    pub subject: String,
    pub outfit: String,
    pub style: String,
    pub variation: usize,
    pub result: Result<PathBuf>,
}

/// Executes generation jobs against the oracle with bounded concurrency.
/// Submission follows the plan order; completion order is unconstrained.
pub struct Dispatcher {
    oracle: Arc<dyn Oracle>,
    max_in_flight: usize,
    pacing: Duration,
    cancel: CancellationFlag,
}

impl Dispatcher {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        max_in_flight: usize,
        pacing: Duration,
        cancel: CancellationFlag,
    ) -> Self {
        Dispatcher {
            oracle,
            max_in_flight: max_in_flight.max(1),
            pacing,
            cancel,
        }
    }

    /// Run all jobs, writing each successful artifact as soon as it lands so
    /// cancellation mid-run leaves completed work on disk. Returns one
    /// outcome per started job, ordered by plan index.
    pub async fn run(
        &self,
        jobs: Vec<GenerationJob>,
        writer: Arc<OutputWriter>,
    ) -> Vec<GenerationOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut join_set: JoinSet<GenerationOutcome> = JoinSet::new();

        for job in jobs {
            if self.cancel.is_cancelled() {
                debug!("Cancellation observed, not submitting entry {}", job.entry_index);
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.cancel.cancelled() => break,
            };

            let oracle = self.oracle.clone();
            let writer = writer.clone();
            let cancel = self.cancel.clone();
            let pacing = self.pacing;

            join_set.spawn(async move {
                let _permit = permit;

                let generated = tokio::select! {
                    result = oracle.generate(&job.directive) => result,
                    _ = cancel.cancelled() => {
                        Err(AppError::Generation("generation cancelled".to_string()))
                    }
                };

                let result = match generated {
                    Ok(blob) => {
                        let written =
                            writer.write_artifact(&job.outfit, &job.style, &job.subject, &blob);
                        if written.is_ok() && !cancel.is_cancelled() && !pacing.is_zero() {
                            // Pace the provider between successful generations.
                            tokio::time::sleep(pacing).await;
                        }
                        written
                    }
                    Err(err) => {
                        warn!(
                            "Generation failed for {} / {} / {} (variation {}): {err}",
                            job.subject, job.outfit, job.style, job.variation
                        );
                        Err(err)
                    }
                };

                GenerationOutcome {
                    entry_index: job.entry_index,
                    subject: job.subject,
                    outfit: job.outfit,
                    style: job.style,
                    variation: job.variation,
                    result,
                }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => warn!("Generation task panicked: {err}"),
            }
        }
        outcomes.sort_by_key(|outcome| outcome.entry_index);
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockOracle;
    use crate::pipeline::component::{GenerationKnobs, ImageBlob};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn job(index: usize) -> GenerationJob {
        GenerationJob {
            entry_index: index,
            directive: Directive {
                subject: ImageBlob {
                    bytes: b"subject".to_vec(),
                    mime: "image/png".to_string(),
                },
                companions: Vec::new(),
                prose: "prose".to_string(),
                knobs: GenerationKnobs::GENERATION,
            },
            subject: "jaimee".to_string(),
            outfit: format!("outfit-{index}"),
            style: "default".to_string(),
            variation: 1,
        }
    }

    #[tokio::test]
    async fn all_jobs_complete_with_unique_artifacts() {
        let tmp = TempDir::new().unwrap();
        let oracle = Arc::new(MockOracle::new());
        let writer = Arc::new(OutputWriter::create(tmp.path()).unwrap());
        let dispatcher = Dispatcher::new(
            oracle.clone(),
            2,
            Duration::ZERO,
            CancellationFlag::new(),
        );

        let outcomes = dispatcher
            .run((0..5).map(job).collect(), writer)
            .await;

        assert_eq!(outcomes.len(), 5);
        let mut paths = std::collections::HashSet::new();
        for outcome in &outcomes {
            let path = outcome.result.as_ref().unwrap();
            assert!(paths.insert(path.clone()), "duplicate artifact {path:?}");
        }
        // Outcomes are reconciled into plan order regardless of completion order.
        let indices: Vec<usize> = outcomes.iter().map(|o| o.entry_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(oracle.generate_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn cancellation_stops_new_submissions() {
        let tmp = TempDir::new().unwrap();
        let oracle = Arc::new(MockOracle::new());
        let writer = Arc::new(OutputWriter::create(tmp.path()).unwrap());
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let dispatcher = Dispatcher::new(oracle.clone(), 2, Duration::ZERO, cancel);

        let outcomes = dispatcher.run((0..5).map(job).collect(), writer).await;

        assert!(outcomes.is_empty());
        assert_eq!(oracle.generate_calls.load(Ordering::SeqCst), 0);
    }

    struct SlowOracle {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl crate::llm::Oracle for SlowOracle {
        async fn analyze(
            &self,
            _image: &ImageBlob,
            _prompt: &str,
            _knobs: &GenerationKnobs,
        ) -> crate::error::Result<String> {
            Ok("{}".to_string())
        }

        async fn generate(&self, _directive: &Directive) -> crate::error::Result<ImageBlob> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(ImageBlob {
                bytes: b"img".to_vec(),
                mime: "image/png".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_calls_are_bounded() {
        let tmp = TempDir::new().unwrap();
        let oracle = Arc::new(SlowOracle {
            delay: Duration::from_secs(1),
            calls: AtomicUsize::new(0),
        });
        let writer = Arc::new(OutputWriter::create(tmp.path()).unwrap());
        let dispatcher = Dispatcher::new(
            oracle.clone(),
            2,
            Duration::ZERO,
            CancellationFlag::new(),
        );

        let start = tokio::time::Instant::now();
        let outcomes = dispatcher.run((0..4).map(job).collect(), writer).await;
        let elapsed = start.elapsed();

        assert_eq!(outcomes.len(), 4);
        // Two workers over four one-second calls: two full rounds.
        assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn cancellation_flag_wakes_waiters() {
        let cancel = CancellationFlag::new();
        let waiter = cancel.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
