use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

/// Tracks one sweep from start to final summary on the timing log.
#[derive(Debug)]
pub struct SweepTimer {
    command: String,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    completed: bool,
}

impl SweepTimer {
    pub fn start(command: &str) -> Self {
        let timer = SweepTimer {
            command: command.to_string(),
            started_at: Utc::now(),
            started_perf: Instant::now(),
            completed: false,
        };
        info!(
            target: "imgcli.timing",
            "event=sweep_started command={} started_at={}",
            timer.command,
            timer.started_at.to_rfc3339()
        );
        timer
    }

    pub fn complete(&mut self, status: &str, generated: usize, failed: usize) {
        if self.completed {
            return;
        }
        self.completed = true;
        let completed_at = Utc::now();
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: "imgcli.timing",
            "event=sweep_completed command={} started_at={} completed_at={} duration_s={:.3} status={} generated={} failed={}",
            self.command,
            self.started_at.to_rfc3339(),
            completed_at.to_rfc3339(),
            duration,
            status,
            generated,
            failed
        );
    }
}

pub async fn log_oracle_timing<T, F, Fut>(
    model: &str,
    operation: &str,
    call: F,
) -> crate::error::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<T>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    info!(
        target: "imgcli.timing",
        "event=oracle_request model={} operation={} started_at={}",
        model,
        operation,
        started_at.to_rfc3339()
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: "imgcli.timing",
        "event=oracle_response model={} operation={} completed_at={} duration_s={:.3} status={}",
        model,
        operation,
        completed_at.to_rfc3339(),
        duration,
        status
    );

    result
}
