//! Fan-out/fan-in command dispatch.
//!
//! A group of `n` boxes gets a queue of capacity `n` and exactly `n`
//! workers sharing its receiver. The dispatcher enqueues every box, closes
//! the queue, and waits for all workers to drain it and exit. A closed
//! queue is the end-of-work signal. Workers report each outcome on a
//! results channel as soon as it is known.

use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore, mpsc};

use crate::exec::{ExecError, ExecOutput, RemoteExecutor, SshCredentials, SshTarget};
use crate::provider::CloudBox;

use super::report::BatchReport;
use super::resolve::Target;

pub type DispatchReport = BatchReport<ExecOutput, ExecError>;

type WorkQueue = Arc<Mutex<mpsc::Receiver<CloudBox>>>;
type Outcome = (CloudBox, Result<ExecOutput, ExecError>);

pub struct Dispatcher {
    executor: Arc<dyn RemoteExecutor>,
    /// Admission gate shared by every dispatch through this instance.
    gate: Option<Arc<Semaphore>>,
}

impl Dispatcher {
    /// `max_concurrency` of `None` or `Some(0)` leaves sessions unbounded.
    pub fn new(executor: Arc<dyn RemoteExecutor>, max_concurrency: Option<usize>) -> Self {
        let gate = max_concurrency
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));
        Self { executor, gate }
    }

    /// Run `command` on every box in `target` and wait for all of them.
    pub async fn dispatch(
        &self,
        target: Target,
        command: &str,
        creds: &SshCredentials,
    ) -> DispatchReport {
        match target {
            Target::Single(cloud_box) => {
                let mut report = DispatchReport::default();
                let result = run_gated(
                    self.executor.as_ref(),
                    self.gate.as_deref(),
                    command,
                    &cloud_box,
                    creds,
                )
                .await;
                report.push(cloud_box, result);
                report
            }
            Target::Group(boxes) => self.fan_out(boxes, command, creds).await,
        }
    }

    async fn fan_out(
        &self,
        boxes: Vec<CloudBox>,
        command: &str,
        creds: &SshCredentials,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let n = boxes.len();
        if n == 0 {
            return report;
        }

        let (tx, rx) = mpsc::channel::<CloudBox>(n);
        let (results_tx, mut results_rx) = mpsc::unbounded_channel::<Outcome>();
        let queue: WorkQueue = Arc::new(Mutex::new(rx));
        let command: Arc<str> = Arc::from(command);
        let creds = Arc::new(creds.clone());

        tracing::info!(workers = n, command = %command, "dispatching to fleet");

        let workers: Vec<_> = (0..n)
            .map(|worker_id| {
                tokio::spawn(worker(
                    worker_id,
                    Arc::clone(&queue),
                    results_tx.clone(),
                    Arc::clone(&self.executor),
                    self.gate.clone(),
                    Arc::clone(&command),
                    Arc::clone(&creds),
                ))
            })
            .collect();
        drop(results_tx);

        for cloud_box in &boxes {
            // Capacity equals n, so this never waits.
            if tx.send(cloud_box.clone()).await.is_err() {
                break;
            }
        }
        drop(tx);

        for joined in futures::future::join_all(workers).await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "dispatch worker panicked");
            }
        }

        // Every sender is gone once the workers have exited.
        while let Some((cloud_box, result)) = results_rx.recv().await {
            report.push(cloud_box, result);
        }

        // A box taken by a worker that panicked mid-command has no outcome.
        if report.len() < n {
            for cloud_box in boxes {
                let seen = report.outcomes.iter().any(|o| o.target.id == cloud_box.id);
                if !seen {
                    report.push(cloud_box, Err(ExecError::Aborted("worker panicked".into())));
                }
            }
        }

        tracing::info!(summary = %report, "dispatch complete");
        report
    }
}

async fn worker(
    worker_id: usize,
    queue: WorkQueue,
    results: mpsc::UnboundedSender<Outcome>,
    executor: Arc<dyn RemoteExecutor>,
    gate: Option<Arc<Semaphore>>,
    command: Arc<str>,
    creds: Arc<SshCredentials>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(cloud_box) = next else {
            break;
        };
        tracing::debug!(
            worker_id,
            box_label = %cloud_box.label,
            ip = %cloud_box.ip,
            "worker picked box"
        );
        let result =
            run_gated(executor.as_ref(), gate.as_deref(), &command, &cloud_box, &creds).await;
        if results.send((cloud_box, result)).is_err() {
            break;
        }
    }
}

async fn run_gated(
    executor: &dyn RemoteExecutor,
    gate: Option<&Semaphore>,
    command: &str,
    cloud_box: &CloudBox,
    creds: &SshCredentials,
) -> Result<ExecOutput, ExecError> {
    let _permit = match gate {
        Some(sem) => Some(
            sem.acquire()
                .await
                .map_err(|_| ExecError::Aborted("admission gate closed".into()))?,
        ),
        None => None,
    };

    let target = SshTarget::new(cloud_box.ip.clone(), creds);
    let result = executor.run_command(command, &target).await;
    match &result {
        Ok(output) => tracing::debug!(
            box_label = %cloud_box.label,
            exit_code = ?output.exit_code,
            duration_ms = output.duration_ms(),
            "remote command finished"
        ),
        Err(e) => tracing::warn!(
            box_label = %cloud_box.label,
            ip = %cloud_box.ip,
            error = %e,
            "remote command failed"
        ),
    }
    result
}
