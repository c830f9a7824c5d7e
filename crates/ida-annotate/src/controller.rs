use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AnnotateError, AnnotateResult};

/// The reconcile function a controller runs. It receives the controller's
/// cancellation token.
pub type ControllerFn =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, AnnotateResult<()>> + Send + Sync>;

/// Backoff between failed runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 100,
            max_delay_ms: 60_000,
            factor: 2.0,
        }
    }
}

impl RetryConfig {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_factor(self.factor)
            .without_max_times()
    }
}

#[derive(Clone)]
pub struct ControllerParams {
    pub do_fn: ControllerFn,
    pub retry: RetryConfig,
}

impl ControllerParams {
    pub fn new<F>(do_fn: F) -> Self
    where
        F: Fn(CancellationToken) -> BoxFuture<'static, AnnotateResult<()>> + Send + Sync + 'static,
    {
        Self {
            do_fn: Arc::new(do_fn),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl fmt::Debug for ControllerParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerParams")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Observable progress of one controller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControllerStatus {
    pub success_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

impl ControllerStatus {
    pub fn succeeded(&self) -> bool {
        self.success_count > 0
    }
}

struct Controller {
    token: CancellationToken,
    status: Arc<Mutex<ControllerStatus>>,
    handle: JoinHandle<()>,
}

/// Named background reconcilers.
///
/// Each controller runs its function until it succeeds, backing off
/// exponentially between failures and never giving up. Updating a
/// controller stops the one running under the same name first.
#[derive(Default)]
pub struct ControllerManager {
    controllers: Mutex<HashMap<String, Controller>>,
}

impl ControllerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `params` under `name`, replacing any controller with that name.
    pub fn update_controller(&self, name: &str, params: ControllerParams) {
        let token = CancellationToken::new();
        let status = Arc::new(Mutex::new(ControllerStatus::default()));
        let handle = tokio::spawn(run_controller(
            name.to_string(),
            params,
            token.clone(),
            status.clone(),
        ));

        let previous = self.controllers.lock().expect("lock poisoned").insert(
            name.to_string(),
            Controller {
                token,
                status,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
            debug!(controller = name, "replaced running controller");
        }
    }

    pub fn status(&self, name: &str) -> Option<ControllerStatus> {
        self.controllers
            .lock()
            .expect("lock poisoned")
            .get(name)
            .map(|c| c.status.lock().expect("lock poisoned").clone())
    }

    /// Sorted controller names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .controllers
            .lock()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.controllers.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop and forget the controller called `name`, waiting for it to exit.
    pub async fn remove_controller(&self, name: &str) -> AnnotateResult<()> {
        let controller = self
            .controllers
            .lock()
            .expect("lock poisoned")
            .remove(name)
            .ok_or_else(|| AnnotateError::ControllerNotFound {
                name: name.to_string(),
            })?;
        stop(name, controller).await;
        Ok(())
    }

    /// Stop every controller and wait for them to exit.
    pub async fn remove_all(&self) {
        let drained: Vec<(String, Controller)> = self
            .controllers
            .lock()
            .expect("lock poisoned")
            .drain()
            .collect();
        for (name, controller) in drained {
            stop(&name, controller).await;
        }
    }
}

impl fmt::Debug for ControllerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerManager")
            .field("controllers", &self.names())
            .finish()
    }
}

async fn stop(name: &str, controller: Controller) {
    controller.token.cancel();
    if let Err(err) = controller.handle.await {
        warn!(controller = name, error = %err, "controller task failed");
    }
}

async fn run_controller(
    name: String,
    params: ControllerParams,
    token: CancellationToken,
    status: Arc<Mutex<ControllerStatus>>,
) {
    let do_fn = params.do_fn;
    let attempt = || {
        let do_fn = do_fn.clone();
        let token = token.clone();
        async move { do_fn(token).await }
    };

    let retried = attempt
        .retry(params.retry.backoff())
        .sleep(tokio::time::sleep)
        .notify(|err: &AnnotateError, dur: Duration| {
            let mut status = status.lock().expect("lock poisoned");
            status.failure_count += 1;
            status.last_error = Some(err.to_string());
            warn!(
                controller = %name,
                failures = status.failure_count,
                backoff_ms = dur.as_millis() as u64,
                error = %err,
                "controller run failed, retrying"
            );
        });

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!(controller = %name, "controller stopped");
            return;
        }
        result = retried => result,
    };

    let mut status = status.lock().expect("lock poisoned");
    match result {
        Ok(()) => {
            status.success_count += 1;
            status.last_error = None;
            status.last_success = Some(Utc::now());
            info!(controller = %name, failures = status.failure_count, "controller succeeded");
        }
        Err(err) => {
            status.failure_count += 1;
            status.last_error = Some(err.to_string());
            warn!(controller = %name, error = %err, "controller gave up");
        }
    }
}
