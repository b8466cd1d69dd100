//! Runtime Controller (C9): the bounded Session worker pool. Pulls
//! `TaskSpec`s from an intake channel, runs each through a `SessionRunner`
//! under a permit, persists the resulting trajectory, and recycles the
//! worker. On shutdown it stops accepting new tasks, lets in-flight
//! Sessions finish for a grace period, then forcibly cancels stragglers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use taskwright_core::catalog::Catalog;
use taskwright_core::config::OrchestratorConfig;
use taskwright_core::types::TaskSpec;
use taskwright_engine::{Executor, SessionRunner};
use taskwright_llm::LlmProvider;
use taskwright_mcp::McpClientPool;
use taskwright_trajectory::TrajectoryWriter;

/// Everything one Session needs, bundled once at startup and shared
/// read-mostly across every task the controller dispatches.
pub struct RuntimeController {
    config: OrchestratorConfig,
    catalog: Arc<Catalog>,
    executor: Arc<Executor>,
    llm: Arc<dyn LlmProvider>,
    mcp_pool: Arc<McpClientPool>,
    writer: TrajectoryWriter,
    model: String,
    semaphore: Arc<Semaphore>,
    /// Stops `run`'s intake loop from accepting further tasks.
    shutdown: CancellationToken,
    /// Fired only once the shutdown grace period elapses; Sessions treat
    /// this as their own cancellation signal.
    force_cancel: CancellationToken,
    active: Mutex<JoinSet<()>>,
}

impl RuntimeController {
    pub fn new(
        config: OrchestratorConfig,
        catalog: Arc<Catalog>,
        llm: Arc<dyn LlmProvider>,
        model: String,
        mcp_pool: Arc<McpClientPool>,
    ) -> Arc<Self> {
        let executor = Arc::new(Executor::new(mcp_pool.clone(), config.mcp.clone()));
        let writer = TrajectoryWriter::new(&config.trajectory);
        let semaphore = Arc::new(Semaphore::new(config.session.max_concurrent_sessions.max(1)));

        Arc::new(Self {
            config,
            catalog,
            executor,
            llm,
            mcp_pool,
            writer,
            model,
            semaphore,
            shutdown: CancellationToken::new(),
            force_cancel: CancellationToken::new(),
            active: Mutex::new(JoinSet::new()),
        })
    }

    /// A token external callers (e.g. the CLI's Ctrl-C handler) can cancel
    /// to begin graceful shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Drive tasks from `intake` until the channel closes (EOF) or
    /// `shutdown_token()` is cancelled, then drain in-flight Sessions.
    pub async fn run(self: Arc<Self>, mut intake: mpsc::Receiver<TaskSpec>) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested; no longer accepting new tasks");
                    break;
                }
                maybe_task = intake.recv() => {
                    match maybe_task {
                        Some(task) => self.clone().dispatch(task).await,
                        None => {
                            info!("intake closed; draining in-flight sessions");
                            break;
                        }
                    }
                }
            }
        }
        self.drain(Duration::from_secs(self.config.session.shutdown_grace_s)).await;
    }

    async fn dispatch(self: Arc<Self>, task: TaskSpec) {
        let controller = self.clone();
        let semaphore = self.semaphore.clone();
        let cancel = self.force_cancel.child_token();
        let mut active = self.active.lock().await;
        active.spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            controller.run_one(task, cancel).await;
            drop(permit);
        });
    }

    async fn run_one(&self, task: TaskSpec, cancel: CancellationToken) {
        let task_id = task.task_id.clone();
        let description = task.description.clone();

        let runner = SessionRunner::new(
            task,
            self.catalog.clone(),
            self.executor.clone(),
            self.llm.clone(),
            self.model.clone(),
            self.config.budgets.clone(),
        );

        let outcome = runner.run(cancel).await;

        if let Err(e) = self
            .writer
            .record(&description, &outcome.raw_transcript, &outcome.result)
            .await
        {
            error!(task_id, error = %e, "failed to persist trajectory");
        }
    }

    /// Wait up to `grace` for in-flight Sessions to finish on their own;
    /// past that, fire `force_cancel`, abort any stragglers, and forcibly
    /// cancel outstanding MCP calls.
    async fn drain(&self, grace: Duration) {
        let mut active = self.active.lock().await;
        if active.is_empty() {
            return;
        }

        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                next = active.join_next() => {
                    match next {
                        Some(Ok(())) => continue,
                        Some(Err(e)) => {
                            warn!(error = %e, "session task panicked during drain");
                            continue;
                        }
                        None => {
                            info!("all sessions finished cleanly");
                            return;
                        }
                    }
                }
                _ = &mut deadline => break,
            }
        }

        warn!("shutdown grace period elapsed; cancelling remaining sessions");
        self.force_cancel.cancel();
        self.mcp_pool.cancel_all().await;

        let abort_deadline = tokio::time::sleep(Duration::from_secs(5));
        tokio::pin!(abort_deadline);
        loop {
            tokio::select! {
                biased;
                next = active.join_next() => {
                    if next.is_none() {
                        return;
                    }
                }
                _ = &mut abort_deadline => {
                    active.abort_all();
                    while active.join_next().await.is_some() {}
                    return;
                }
            }
        }
    }
}
