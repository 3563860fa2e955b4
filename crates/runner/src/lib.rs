//! Runs the gateway's long-lived processes side by side and tears them down
//! on the first failure or on SIGINT/SIGTERM.
//!
//! Draining processes and running closers are each bounded by a single
//! timeout. Exceeding it is reported as a forced termination and the
//! process exits non-zero.
//!
//! ```no_run
//! use gateway_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_named_process("ticker", |ctx| async move {
//!             ctx.cancelled().await;
//!             Ok(())
//!         })
//!         .with_closer(|| async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type BoxedResultFuture = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;

/// Long-lived process. Receives the shared cancellation token and should
/// return once it is cancelled.
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedResultFuture + Send>;

/// Cleanup step run after every process has stopped.
pub type Closer = Box<dyn FnOnce() -> BoxedResultFuture + Send>;

/// Bound applied to draining processes and to running closers.
pub const DEFAULT_CLOSER_TIMEOUT: Duration = Duration::from_secs(5);

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every process stopped and every closer finished within the bound.
    Clean,
    /// A process failed; closers still ran.
    Failed(anyhow::Error),
    /// Processes or closers did not finish within the bound.
    ForcedTermination,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Clean => 0,
            RunOutcome::Failed(_) | RunOutcome::ForcedTermination => 1,
        }
    }
}

/// Runs app processes concurrently with coordinated shutdown.
///
/// - Processes run until one fails, one panics, or the token is cancelled
/// - Cancellation is shared, so every process sees it at the same time
/// - Closers run afterward regardless of how the processes stopped
/// - SIGINT and SIGTERM cancel the token when started through [`Runner::run`]
pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a new Runner with default configuration.
    ///
    /// Default settings:
    /// - Closer timeout: 5 seconds
    /// - No app processes or closers
    /// - A fresh cancellation token
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: DEFAULT_CLOSER_TIMEOUT,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Adds an app process named after its position, e.g. `process-0`.
    ///
    /// If any process returns an error, all processes are cancelled and
    /// closers are executed.
    ///
    /// # Arguments
    ///
    /// * `process` - A function that takes a CancellationToken and returns a Future
    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let name = format!("process-{}", self.app_processes.len());
        self.with_named_process(name, process)
    }

    /// Adds a process whose name appears in lifecycle logs.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in start, stop and error logs
    /// * `process` - A function that takes a CancellationToken and returns a Future
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.app_processes
            .push((name.into(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// Adds a closer to the runner.
    ///
    /// Closers run concurrently once all app processes have stopped, whether
    /// they stopped through an error or through cancellation. A failing closer
    /// is logged and does not stop the others.
    ///
    /// # Arguments
    ///
    /// * `closer` - A function that returns a Future for cleanup
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    /// Sets the bound for draining processes and for running closers.
    ///
    /// Default is 5 seconds. Each phase gets the full bound.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Duration to wait for each phase to complete
    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Shares cancellation with code outside the runner.
    ///
    /// # Arguments
    ///
    /// * `token` - The cancellation token handed to every process
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Runs to completion and exits the process with the outcome's code.
    ///
    /// This method:
    /// 1. Installs SIGINT/SIGTERM handlers that cancel the token
    /// 2. Runs everything through [`Runner::run_until_stopped`]
    /// 3. Logs the outcome and exits with 0 when clean, 1 otherwise
    pub async fn run(self) {
        install_signal_handlers(self.cancellation_token.clone());

        let outcome = self.run_until_stopped().await;
        match &outcome {
            RunOutcome::Clean => tracing::info!("Application exiting normally"),
            RunOutcome::Failed(err) => {
                tracing::error!("Application exiting with error: {:#}", err)
            }
            RunOutcome::ForcedTermination => {
                tracing::error!("Application forced to terminate")
            }
        }
        std::process::exit(outcome.exit_code());
    }

    /// Runs processes until one fails or the token is cancelled, then closers.
    pub async fn run_until_stopped(self) -> RunOutcome {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for (name, process) in self.app_processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                tracing::debug!(process = %name, "starting app process");
                (name, process(process_token).await)
            });
        }

        let mut first_error = None;
        loop {
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = join_set.join_next() => match result {
                    Some(result) => result,
                    None => break,
                },
            };

            match result {
                Ok((name, Ok(()))) => {
                    tracing::debug!(process = %name, "app process completed");
                }
                Ok((name, Err(err))) => {
                    if !token.is_cancelled() {
                        tracing::error!(process = %name, "app process error: {:#}", err);
                        first_error = Some(err);
                        token.cancel();
                    } else {
                        tracing::error!(process = %name, "app process error during shutdown: {:#}", err);
                        first_error.get_or_insert(err);
                    }
                }
                Err(err) => {
                    tracing::error!("app process panicked: {}", err);
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!("app process panicked: {}", err));
                    }
                    token.cancel();
                }
            }
        }

        // Processes observe the token and drain; give them the same bound as closers.
        let processes_stopped =
            match tokio::time::timeout(self.closer_timeout, drain(&mut join_set)).await {
                Ok(drain_error) => {
                    if let Some(err) = drain_error {
                        first_error.get_or_insert(err);
                    }
                    true
                }
                Err(_) => {
                    tracing::error!("app processes did not stop within {:?}", self.closer_timeout);
                    join_set.abort_all();
                    false
                }
            };

        let closers_finished = run_closers(self.closers, self.closer_timeout).await;

        match (first_error, processes_stopped && closers_finished) {
            (Some(err), _) => RunOutcome::Failed(err),
            (None, false) => RunOutcome::ForcedTermination,
            (None, true) => RunOutcome::Clean,
        }
    }
}

/// Waits for the remaining processes and returns the first error among them.
async fn drain(
    join_set: &mut JoinSet<(String, Result<(), anyhow::Error>)>,
) -> Option<anyhow::Error> {
    let mut first_error = None;
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok((_, Ok(()))) => {}
            Ok((name, Err(err))) => {
                tracing::error!(process = %name, "app process error during shutdown: {:#}", err);
                first_error.get_or_insert(err);
            }
            Err(err) => {
                tracing::error!("app process panicked: {}", err);
                first_error.get_or_insert_with(|| anyhow::anyhow!("app process panicked: {}", err));
            }
        }
    }
    first_error
}

/// Returns false when the closers exceeded `timeout`.
async fn run_closers(closers: Vec<Closer>, timeout: Duration) -> bool {
    if closers.is_empty() {
        return true;
    }

    tracing::info!("Running closers with timeout of {:?}", timeout);

    let mut closer_set = JoinSet::new();
    for closer in closers {
        closer_set.spawn(closer());
    }

    let all_done = async {
        while let Some(result) = closer_set.join_next().await {
            match result {
                Ok(Ok(())) => tracing::debug!("Closer completed successfully"),
                Ok(Err(err)) => tracing::error!("Closer error: {:#}", err),
                Err(err) => tracing::error!("Closer panicked: {}", err),
            }
        }
    };

    match tokio::time::timeout(timeout, all_done).await {
        Ok(()) => {
            tracing::info!("All closers completed");
            true
        }
        Err(_) => {
            tracing::error!("Closers timed out after {:?}", timeout);
            false
        }
    }
}

fn install_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
                ctrl_c_token.cancel();
            }
            Err(err) => tracing::error!("Error setting up signal handler: {}", err),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
                token.cancel();
            }
            Err(err) => tracing::error!("Error setting up SIGTERM handler: {}", err),
        }
    });
}
