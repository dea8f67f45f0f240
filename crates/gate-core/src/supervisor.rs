//! Worker process supervision.
//!
//! The supervisor owns the [`Authority`] and keeps `workers` child processes alive. Each
//! child gets piped stdin/stdout for the IPC protocol and inherits stderr for logging.
//! A child that exits is logged and respawned with the same fork id after a delay.

use crate::{authority::Authority, ipc::serve_worker_channel};
use std::{
    path::PathBuf,
    process::Stdio,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    process::{Child, Command},
    sync::broadcast,
    task::JoinHandle,
};

/// Delay before a dead worker is replaced.
pub const RESPAWN_DELAY: Duration = Duration::from_secs(2);

/// Environment variable carrying the fork id into the child.
pub const FORK_ID_ENV: &str = "GATE_FORK_ID";

/// How to start one worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    fn build(&self, fork_id: usize) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(FORK_ID_ENV, fork_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

/// Spawns, relays for and respawns worker processes.
pub struct WorkerSupervisor {
    authority: Arc<Authority>,
    command: WorkerCommand,
    workers: usize,
    respawn_delay: Duration,
    spawned: AtomicUsize,
}

impl WorkerSupervisor {
    #[must_use]
    pub fn new(authority: Arc<Authority>, command: WorkerCommand, workers: usize) -> Self {
        Self { authority, command, workers, respawn_delay: RESPAWN_DELAY, spawned: AtomicUsize::new(0) }
    }

    #[must_use]
    pub fn with_respawn_delay(mut self, respawn_delay: Duration) -> Self {
        self.respawn_delay = respawn_delay;
        self
    }

    /// Total processes started so far, respawns included.
    #[must_use]
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Starts one supervision loop per worker slot.
    ///
    /// On shutdown every child is killed and the returned handles complete.
    pub fn start_with_shutdown(self: &Arc<Self>, shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|fork_id| {
                let supervisor = Arc::clone(self);
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(async move { supervisor.run_slot(fork_id, shutdown_rx).await })
            })
            .collect()
    }

    async fn run_slot(&self, fork_id: usize, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            match self.command.build(fork_id).spawn() {
                Ok(child) => {
                    self.spawned.fetch_add(1, Ordering::Relaxed);
                    if self.supervise(fork_id, child, &mut shutdown_rx).await.is_break() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(fork_id, error = %e, "failed to spawn worker");
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.respawn_delay) => {}
                _ = shutdown_rx.recv() => return,
            }
            tracing::info!(fork_id, "respawning worker");
        }
    }

    /// Relays IPC for `child` until it exits or shutdown is requested.
    async fn supervise(
        &self,
        fork_id: usize,
        mut child: Child,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> std::ops::ControlFlow<()> {
        let pid = child.id();
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            tracing::error!(fork_id, "worker started without pipes");
            let _ = child.kill().await;
            return std::ops::ControlFlow::Continue(());
        };

        tracing::info!(fork_id, pid, "worker started");
        let relay = tokio::spawn(serve_worker_channel(stdout, stdin, Arc::clone(&self.authority)));

        let flow = tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) => tracing::warn!(fork_id, pid, %status, "worker exited"),
                    Err(e) => tracing::error!(fork_id, pid, error = %e, "failed to wait on worker"),
                }
                std::ops::ControlFlow::Continue(())
            }
            _ = shutdown_rx.recv() => {
                let _ = child.kill().await;
                tracing::info!(fork_id, pid, "worker stopped");
                std::ops::ControlFlow::Break(())
            }
        };

        relay.abort();
        flow
    }
}
