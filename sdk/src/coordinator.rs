//! Centralized polling for integrations whose entities share one upstream data source.
//!
//! A [`DataUpdateCoordinator`] owns a single [`UpdateMethod`] and calls it on a fixed interval.
//! Every result is published through a [`watch`] channel so any number of entities can observe
//! the latest snapshot without triggering extra upstream requests.
//!
//! Failures are split in two:
//!
//!  - [`UpdateError::UpdateFailed`] marks the data stale. The previous snapshot is kept, entities
//!    report themselves unavailable, and the next attempt is scheduled with exponential backoff
//!    (never later than the regular interval).
//!  - [`UpdateError::AuthFailed`] means the stored credentials are no longer accepted. Polling is
//!    suspended until the entry is reloaded or a refresh is requested explicitly, and
//!    [`CoordinatorState::needs_reauth`] turns true so the host can start re-authentication.

use backon::{BackoffBuilder, ExponentialBuilder};
use jiff::Timestamp;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Default upper bound for a single call to [`UpdateMethod::update`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateError {
    /// The upstream rejected our credentials; the user has to re-authenticate.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// The update did not produce usable data this time around.
    #[error("update failed: {0}")]
    UpdateFailed(String),
}

/// Fetches one snapshot of data from upstream.
pub trait UpdateMethod: Send + Sync + 'static {
    type Data: Send + Sync + 'static;

    fn update(&self) -> impl Future<Output = Result<Self::Data, UpdateError>> + Send;
}

/// What entities observe of a coordinator.
#[derive(Debug)]
pub struct CoordinatorState<T> {
    /// The last successfully fetched snapshot, if any.
    pub data: Option<Arc<T>>,
    pub last_update_success: bool,
    pub last_error: Option<UpdateError>,
    /// When `data` was fetched.
    pub last_update: Option<Timestamp>,
}

impl<T> Default for CoordinatorState<T> {
    fn default() -> Self {
        Self {
            data: None,
            last_update_success: false,
            last_error: None,
            last_update: None,
        }
    }
}

// manual impl so that `T` need not be `Clone`
impl<T> Clone for CoordinatorState<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            last_update_success: self.last_update_success,
            last_error: self.last_error.clone(),
            last_update: self.last_update,
        }
    }
}

impl<T> CoordinatorState<T> {
    pub fn needs_reauth(&self) -> bool {
        matches!(self.last_error, Some(UpdateError::AuthFailed(_)))
    }
}

#[derive(Debug)]
enum Command {
    Refresh,
    SetInterval(Duration),
    Shutdown,
}

pub struct DataUpdateCoordinator<M: UpdateMethod> {
    name: String,
    method: M,
    interval: Duration,
    request_timeout: Duration,
    backoff: ExponentialBuilder,
    state: watch::Sender<CoordinatorState<M::Data>>,
}

impl<M: UpdateMethod> DataUpdateCoordinator<M> {
    pub fn new(name: impl Into<String>, method: M, interval: Duration) -> Self {
        Self {
            name: name.into(),
            method,
            interval,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(30))
                .with_max_delay(Duration::from_secs(15 * 60))
                .with_max_times(usize::MAX),
            state: watch::Sender::new(CoordinatorState::default()),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry schedule used after failed updates.
    pub fn with_retry_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn method(&self) -> &M {
        &self.method
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState<M::Data>> {
        self.state.subscribe()
    }

    pub fn state(&self) -> CoordinatorState<M::Data> {
        self.state.borrow().clone()
    }

    /// Runs one update right away and publishes the outcome.
    ///
    /// On failure the previous snapshot is left in place, only the status fields change.
    #[tracing::instrument(skip(self), fields(coordinator = %self.name))]
    pub async fn refresh(&self) -> Result<(), UpdateError> {
        let result = match tokio::time::timeout(self.request_timeout, self.method.update()).await {
            Ok(result) => result,
            Err(_) => Err(UpdateError::UpdateFailed(format!(
                "timed out after {:?}",
                self.request_timeout
            ))),
        };

        match result {
            Ok(data) => {
                let recovered = !self.state.borrow().last_update_success;
                self.state.send_modify(|state| {
                    state.data = Some(Arc::new(data));
                    state.last_update_success = true;
                    state.last_error = None;
                    state.last_update = Some(Timestamp::now());
                });
                if recovered {
                    tracing::info!("fetching data recovered");
                } else {
                    tracing::debug!("fetched data");
                }
                Ok(())
            }
            Err(e) => {
                let was_ok = self.state.borrow().last_update_success;
                self.state.send_modify(|state| {
                    state.last_update_success = false;
                    state.last_error = Some(e.clone());
                });
                if was_ok {
                    tracing::warn!(error = %e, "error fetching data");
                } else {
                    tracing::debug!(error = %e, "still failing to fetch data");
                }
                Err(e)
            }
        }
    }

    /// The initial fetch done during setup, before any entity exists.
    pub async fn first_refresh(&self) -> Result<(), UpdateError> {
        tracing::debug!(coordinator = %self.name, "performing first refresh");
        self.refresh().await
    }

    /// Moves the coordinator onto its own task, polling until shut down.
    pub fn spawn(self) -> CoordinatorHandle<M::Data> {
        let (commands, rx) = mpsc::unbounded_channel();
        let name = self.name.clone();
        let state = self.state.subscribe();
        let task = tokio::spawn(self.run(rx));
        CoordinatorHandle {
            name,
            commands,
            state,
            task: Some(task),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut retries = self.backoff.build();
        let mut delay = self.interval;
        loop {
            let paused = self.state.borrow().needs_reauth();
            let next_poll = async {
                if paused {
                    std::future::pending::<()>().await
                } else {
                    tokio::time::sleep(delay).await
                }
            };

            tokio::select! {
                () = next_poll => {}
                command = commands.recv() => match command {
                    Some(Command::Refresh) => {
                        tracing::debug!(coordinator = %self.name, "manual refresh requested");
                    }
                    Some(Command::SetInterval(interval)) => {
                        tracing::info!(
                            coordinator = %self.name,
                            interval = ?interval,
                            "update interval changed"
                        );
                        self.interval = interval;
                    }
                    Some(Command::Shutdown) | None => break,
                },
            }

            delay = match self.refresh().await {
                Ok(()) => {
                    retries = self.backoff.build();
                    self.interval
                }
                Err(UpdateError::AuthFailed(_)) => {
                    tracing::warn!(
                        coordinator = %self.name,
                        "credentials rejected, polling suspended until re-authentication"
                    );
                    self.interval
                }
                Err(UpdateError::UpdateFailed(_)) => retries
                    .next()
                    .unwrap_or(self.interval)
                    .min(self.interval),
            };
        }
        tracing::debug!(coordinator = %self.name, "coordinator stopped");
    }
}

/// Control surface for a spawned coordinator.
///
/// Dropping the handle stops the polling task.
#[derive(Debug)]
pub struct CoordinatorHandle<T> {
    name: String,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<CoordinatorState<T>>,
    task: Option<JoinHandle<()>>,
}

impl<T> CoordinatorHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState<T>> {
        self.state.clone()
    }

    pub fn state(&self) -> CoordinatorState<T> {
        self.state.borrow().clone()
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.state.borrow().data.clone()
    }

    /// Asks for an update as soon as possible, outside the regular schedule.
    pub fn request_refresh(&self) {
        if self.commands.send(Command::Refresh).is_err() {
            tracing::debug!(coordinator = %self.name, "refresh requested after shutdown");
        }
    }

    /// Applies a new polling interval and polls immediately.
    pub fn reload(&self, interval: Duration) {
        if self.commands.send(Command::SetInterval(interval)).is_err() {
            tracing::debug!(coordinator = %self.name, "reload requested after shutdown");
        }
    }

    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && e.is_panic()
        {
            tracing::error!(coordinator = %self.name, "coordinator task panicked");
        }
    }
}

impl<T> Drop for CoordinatorHandle<T> {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// The view one entity has of its coordinator.
#[derive(Debug)]
pub struct CoordinatorEntity<T> {
    state: watch::Receiver<CoordinatorState<T>>,
}

impl<T> Clone for CoordinatorEntity<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> CoordinatorEntity<T> {
    pub fn new(state: watch::Receiver<CoordinatorState<T>>) -> Self {
        Self { state }
    }

    /// True while the most recent update succeeded.
    pub fn available(&self) -> bool {
        self.state.borrow().last_update_success
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.state.borrow().data.clone()
    }

    pub fn last_update(&self) -> Option<Timestamp> {
        self.state.borrow().last_update
    }

    /// Waits for the coordinator to publish again. Returns `false` once it is gone.
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }
}
