//! The generation run: list generators, submit the prompt, poll until the
//! panorama is ready, then publish it.
//!
//! One [`GenerationController`] observes the store's change feed. Every new
//! accepted submission starts a run with a fresh [`RunId`]; a run that is
//! still in flight when the next submission lands is aborted, and any write
//! it races in afterwards is dropped by the store.

use std::{sync::Arc, time::Duration};

use shared::{
    domain::{status, RunId, SessionAction, SubmissionSeq},
    protocol::SessionSnapshot,
};
use skybox_client::{GenerationError, GenerationService};
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{error::WorkflowError, store::SessionStore};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_READY_CLEAR_DELAY: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 120;

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub poll_interval: Duration,
    pub ready_clear_delay: Duration,
    /// `None` polls until the service answers or fails.
    pub max_poll_attempts: Option<u32>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            ready_clear_delay: DEFAULT_READY_CLEAR_DELAY,
            max_poll_attempts: Some(DEFAULT_MAX_POLL_ATTEMPTS),
        }
    }
}

#[derive(Clone)]
pub struct GenerationController {
    store: SessionStore,
    service: Arc<dyn GenerationService>,
    config: WorkflowConfig,
}

impl GenerationController {
    pub fn new(
        store: SessionStore,
        service: Arc<dyn GenerationService>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            service,
            config,
        }
    }

    /// Starts observing submissions. Submissions accepted after this call
    /// returns are guaranteed to be seen.
    pub fn spawn(self) -> JoinHandle<()> {
        let mut rx = self.store.subscribe();
        let seen = rx.borrow_and_update().submission_seq;
        tokio::spawn(self.observe(rx, seen))
    }

    async fn observe(self, mut rx: watch::Receiver<SessionSnapshot>, mut seen: SubmissionSeq) {
        let mut in_flight: Option<JoinHandle<()>> = None;
        while rx.changed().await.is_ok() {
            let (seq, prompt) = {
                let snapshot = rx.borrow_and_update();
                (snapshot.submission_seq, snapshot.state.submission.clone())
            };
            if seq == seen {
                continue;
            }
            seen = seq;
            let Some(prompt) = prompt else {
                continue;
            };

            let run = self.store.begin_run();
            if let Some(previous) = in_flight.take() {
                if !previous.is_finished() {
                    info!(run = run.0, "new submission preempts in-flight skybox run");
                    previous.abort();
                }
            }
            in_flight = Some(tokio::spawn(self.clone().run(run, prompt)));
        }
        debug!("session store closed; generation controller stopping");
    }

    /// Drives one run to its terminal status.
    pub async fn run(self, run: RunId, prompt: String) {
        info!(run = run.0, prompt = %prompt, "starting skybox run");
        match self.execute(run, &prompt).await {
            Ok(file_url) => {
                info!(run = run.0, %file_url, "skybox ready");
                self.schedule_ready_clear(run);
            }
            Err(WorkflowError::Superseded(_)) => {
                debug!(run = run.0, "run superseded; leaving state to newer run");
            }
            Err(err) => {
                warn!(
                    run = run.0,
                    endpoint = err.endpoint().unwrap_or("none"),
                    error = %err,
                    "skybox run failed"
                );
                if let Some(message) = err.status_message() {
                    if let Err(err) = self.publish(run, message) {
                        debug!(run = run.0, error = %err, "failure status not published");
                    }
                }
            }
        }
    }

    async fn execute(&self, run: RunId, prompt: &str) -> Result<String, WorkflowError> {
        self.publish(run, status::GETTING_GENERATOR)?;
        let generator = self
            .service
            .list_generators()
            .await
            .map_err(WorkflowError::GeneratorListing)?
            .into_iter()
            .next()
            .ok_or(WorkflowError::GeneratorListing(GenerationError::NoGenerators))?;
        debug!(run = run.0, generator = %generator.generator, "selected generator");

        self.publish(run, status::GENERATING_SKYBOX)?;
        let mut job = self
            .service
            .create_job(&generator.generator, prompt)
            .await
            .map_err(WorkflowError::JobSubmission)?;
        info!(run = run.0, job_id = %job.id, "imagine request created");

        self.publish(run, status::WAITING_FOR_SKYBOX)?;
        let mut attempts = 0u32;
        let file_url = loop {
            if let Some(url) = job.file_url() {
                break url.to_string();
            }
            if let Some(max) = self.config.max_poll_attempts {
                if attempts >= max {
                    return Err(WorkflowError::TimedOut { attempts });
                }
            }
            sleep(self.config.poll_interval).await;
            attempts += 1;
            debug!(run = run.0, job_id = %job.id, attempts, "polling imagine request");
            job = self
                .service
                .fetch_job(&job.id)
                .await
                .map_err(WorkflowError::Polling)?;
        };

        self.apply(run, SessionAction::SetSkybox(file_url.clone()))?;
        self.publish(run, status::SKYBOX_READY)?;
        Ok(file_url)
    }

    fn schedule_ready_clear(&self, run: RunId) {
        let store = self.store.clone();
        let delay = self.config.ready_clear_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            let action = SessionAction::ClearStatus {
                expected: status::SKYBOX_READY.to_string(),
            };
            match store.dispatch_for_run(run, action) {
                Ok(Some(_)) => debug!(run = run.0, "ready status cleared"),
                Ok(None) => debug!(run = run.0, "ready status already superseded"),
                Err(err) => warn!(run = run.0, error = %err, "failed to clear ready status"),
            }
        });
    }

    fn publish(&self, run: RunId, message: &str) -> Result<(), WorkflowError> {
        self.apply(run, SessionAction::SetStatus(Some(message.to_string())))
    }

    fn apply(&self, run: RunId, action: SessionAction) -> Result<(), WorkflowError> {
        match self.store.dispatch_for_run(run, action)? {
            Some(_) => Ok(()),
            None => Err(WorkflowError::Superseded(run)),
        }
    }
}

#[cfg(test)]
#[path = "tests/workflow_tests.rs"]
mod tests;
