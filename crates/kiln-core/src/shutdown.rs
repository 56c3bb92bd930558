//! Graceful Shutdown Manager
//!
//! Coordinates shutdown of the dispatcher and the running build drivers.
//!
//! Two tokens are handed out:
//! - [`ShutdownController::token`] is cancelled as soon as shutdown starts;
//!   the dispatcher stops and queued builds are dropped at pickup
//! - [`ShutdownController::terminate_token`] is cancelled only when draining
//!   times out; builder commands still running at that point are killed
//!
//! ## Usage
//!
//! ```ignore
//! let shutdown = ShutdownController::new();
//! let (engine, receiver) = BuildEngine::new(store, bus, builder, &queue, shutdown.clone());
//! engine.spawn_workers(receiver);
//!
//! // later
//! shutdown.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default shutdown timeout in seconds
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Shutdown phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Graceful shutdown initiated - stop admitting and dispatching builds
    Stopping,
    /// Waiting for running builds to reach a terminal state
    Draining,
    /// Drain timed out - kill remaining builder commands
    Terminating,
    /// Shutdown complete
    Terminated,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Draining => write!(f, "Draining"),
            Self::Terminating => write!(f, "Terminating"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Shutdown controller for coordinating graceful shutdown
pub struct ShutdownController {
    /// Cancelled when shutdown starts
    cancel_token: CancellationToken,
    /// Cancelled when draining gives up
    terminate_token: CancellationToken,
    /// Current shutdown phase
    phase: AtomicU32,
    /// Whether shutdown has been initiated
    shutdown_initiated: AtomicBool,
    /// Active task count
    active_tasks: AtomicU32,
    /// Drain timeout
    timeout: Duration,
}

impl ShutdownController {
    /// Create a new shutdown controller with default timeout
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS))
    }

    /// Create a new shutdown controller with custom drain timeout
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
            terminate_token: CancellationToken::new(),
            phase: AtomicU32::new(ShutdownPhase::Running as u32),
            shutdown_initiated: AtomicBool::new(false),
            active_tasks: AtomicU32::new(0),
            timeout,
        })
    }

    /// Token cancelled when shutdown starts
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Token cancelled when draining times out
    #[must_use]
    pub fn terminate_token(&self) -> CancellationToken {
        self.terminate_token.child_token()
    }

    /// Get current shutdown phase
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        match self.phase.load(Ordering::SeqCst) {
            0 => ShutdownPhase::Running,
            1 => ShutdownPhase::Stopping,
            2 => ShutdownPhase::Draining,
            3 => ShutdownPhase::Terminating,
            _ => ShutdownPhase::Terminated,
        }
    }

    /// Check if still accepting new builds
    #[must_use]
    pub fn is_accepting_work(&self) -> bool {
        self.phase() == ShutdownPhase::Running
    }

    /// Register a running build driver
    pub fn register_task(self: &Arc<Self>) -> TaskGuard {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            controller: Arc::clone(self),
            completed: false,
        }
    }

    /// Get the count of active tasks
    #[must_use]
    pub fn active_task_count(&self) -> u32 {
        self.active_tasks.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.store(phase as u32, Ordering::SeqCst);
        info!(phase = %phase, "Shutdown phase changed");
    }

    /// Initiate graceful shutdown
    ///
    /// 1. Stop dispatching; queued builds are dropped
    /// 2. Wait for running builds to finish (with timeout)
    /// 3. Kill whatever is still running once the timeout is exceeded
    pub async fn shutdown(self: &Arc<Self>) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already initiated");
            return;
        }

        info!("Initiating graceful shutdown...");

        self.set_phase(ShutdownPhase::Stopping);
        self.cancel_token.cancel();

        self.set_phase(ShutdownPhase::Draining);
        let drain_start = tokio::time::Instant::now();
        let check_interval = Duration::from_millis(100);

        loop {
            let active = self.active_task_count();
            if active == 0 {
                info!("All builds completed gracefully");
                break;
            }

            let elapsed = drain_start.elapsed();
            if elapsed >= self.timeout {
                warn!(
                    active_tasks = active,
                    timeout_secs = self.timeout.as_secs(),
                    "Shutdown timeout exceeded, terminating running builds"
                );
                self.set_phase(ShutdownPhase::Terminating);
                self.terminate_token.cancel();
                break;
            }

            debug!(
                active_tasks = active,
                elapsed_secs = elapsed.as_secs(),
                "Waiting for builds to complete..."
            );

            tokio::time::sleep(check_interval).await;
        }

        self.set_phase(ShutdownPhase::Terminated);
        info!("Graceful shutdown complete");
    }
}

/// Guard for tracking a running build driver
///
/// Automatically decrements the active task count when dropped.
pub struct TaskGuard {
    controller: Arc<ShutdownController>,
    completed: bool,
}

impl TaskGuard {
    /// Mark the task as completed (prevents double decrement)
    pub fn complete(mut self) {
        self.completed = true;
        self.controller.active_tasks.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.controller.active_tasks.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

/// Wait for a shutdown signal, then run a graceful shutdown
pub async fn shutdown_signal_with_controller(controller: Arc<ShutdownController>) {
    wait_for_shutdown_signal().await;
    controller.shutdown().await;
}
