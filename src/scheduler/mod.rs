//! Indexer scheduler
//!
//! Tasks queue up FIFO and a single background worker runs them one at a time. The
//! engine is synchronous, so each run happens on the blocking pool while the worker
//! awaits it. A running task can take over a compatible urgent task that is not heavier
//! than its own remaining work; otherwise the urgent task goes to the front of the queue.

pub mod events;
pub mod latch;

pub use events::SchedulerEvent;
pub use latch::{IdleLatch, LatchError};

use crate::indexer::{
    IndexerContext, IndexerError, IndexerProgress, IndexerTask, IndexerTaskOptions, ProgressHandle,
    TaskId, UrgentInbox,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Buffer of each listener channel; events beyond it are dropped for that listener
const EVENT_CHANNEL_BUFFER_SIZE: usize = 1_000;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler is shut down")]
    ShutDown,

    #[error(transparent)]
    Latch(#[from] LatchError),

    #[error("Worker failed: {0}")]
    Worker(String),
}

/// What the scheduler knows about the task on the worker
struct RunningTask {
    id: TaskId,
    options: IndexerTaskOptions,
    progress: ProgressHandle,
    inbox: UrgentInbox,
    cancel: CancellationToken,
}

impl RunningTask {
    fn new(task: &IndexerTask, cancel: CancellationToken) -> Self {
        Self {
            id: task.id(),
            options: *task.options(),
            progress: task.progress(),
            inbox: task.inbox(),
            cancel,
        }
    }

    fn can_absorb(&self, urgent: &IndexerTask) -> bool {
        self.options == *urgent.options()
            && urgent.file_count() <= self.progress.snapshot().remaining
    }
}

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<IndexerTask>,
    running: Option<RunningTask>,
    stopped: bool,
}

struct Shared {
    ctx: IndexerContext,
    queue: Mutex<QueueState>,
    wakeup: Notify,
    shutdown: CancellationToken,
    listeners: parking_lot::Mutex<Vec<mpsc::Sender<SchedulerEvent>>>,
    latch: IdleLatch,
}

impl Shared {
    fn emit(&self, event: SchedulerEvent) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|listener| !listener.is_closed());
        for listener in listeners.iter() {
            if let Err(e) = listener.try_send(event.clone()) {
                warn!("IndexerScheduler: dropping event for slow listener: {}", e);
            }
        }
    }
}

pub struct IndexerScheduler {
    shared: Arc<Shared>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl IndexerScheduler {
    /// Start the worker on the current tokio runtime
    pub fn start(ctx: IndexerContext) -> Self {
        let shared = Arc::new(Shared {
            ctx,
            queue: Mutex::new(QueueState::default()),
            wakeup: Notify::new(),
            shutdown: CancellationToken::new(),
            listeners: parking_lot::Mutex::new(Vec::new()),
            latch: IdleLatch::new(),
        });
        let worker = tokio::spawn(worker_loop(shared.clone()));
        info!("IndexerScheduler: started");
        Self {
            shared,
            worker: parking_lot::Mutex::new(Some(worker)),
        }
    }

    pub fn context(&self) -> &IndexerContext {
        &self.shared.ctx
    }

    /// Options for a task that follows the configured policy
    pub fn default_options(&self) -> IndexerTaskOptions {
        IndexerTaskOptions::from_config(&self.shared.ctx.config)
    }

    pub fn subscribe(&self) -> mpsc::Receiver<SchedulerEvent> {
        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);
        self.shared.listeners.lock().push(sender);
        receiver
    }

    pub async fn enqueue(&self, task: IndexerTask) -> Result<TaskId, SchedulerError> {
        let id = task.id();
        let files = task.file_count();
        let mut queue = self.shared.queue.lock().await;
        if queue.stopped {
            return Err(SchedulerError::ShutDown);
        }
        self.shared.latch.reset().await;
        queue.tasks.push_back(task);
        let position = queue.tasks.len() - 1;
        debug!("IndexerScheduler: queued task {} ({} files) at {}", id, files, position);
        self.shared.emit(SchedulerEvent::TaskQueued { task: id, files, position });
        drop(queue);
        self.shared.wakeup.notify_one();
        Ok(id)
    }

    /// Run `task` as soon as possible, inside the running task if that one can take it
    pub async fn enqueue_urgent(&self, task: IndexerTask) -> Result<TaskId, SchedulerError> {
        let id = task.id();
        let files = task.file_count();
        let mut queue = self.shared.queue.lock().await;
        if queue.stopped {
            return Err(SchedulerError::ShutDown);
        }
        self.shared.latch.reset().await;

        let task = match &queue.running {
            Some(running) if running.can_absorb(&task) => match running.inbox.offer(task) {
                Ok(()) => {
                    let into = running.id;
                    info!("IndexerScheduler: urgent task {} absorbed by {}", id, into);
                    self.shared.emit(SchedulerEvent::TaskAbsorbed { task: id, into });
                    return Ok(id);
                }
                Err(task) => task,
            },
            _ => task,
        };
        queue.tasks.push_front(task);
        debug!("IndexerScheduler: urgent task {} ({} files) queued first", id, files);
        self.shared.emit(SchedulerEvent::TaskQueued {
            task: id,
            files,
            position: 0,
        });
        drop(queue);
        self.shared.wakeup.notify_one();
        Ok(id)
    }

    /// Cancel the running task, if any. Queued tasks still run.
    pub async fn cancel_current(&self) -> Option<TaskId> {
        let queue = self.shared.queue.lock().await;
        let running = queue.running.as_ref()?;
        info!("IndexerScheduler: cancelling task {}", running.id);
        running.cancel.cancel();
        Some(running.id)
    }

    pub async fn current_task(&self) -> Option<(TaskId, IndexerProgress)> {
        let queue = self.shared.queue.lock().await;
        queue
            .running
            .as_ref()
            .map(|running| (running.id, running.progress.snapshot()))
    }

    pub async fn queued(&self) -> usize {
        self.shared.queue.lock().await.tasks.len()
    }

    pub async fn wait_idle(&self, timeout: Duration) -> Result<(), SchedulerError> {
        Ok(self.shared.latch.wait(timeout).await?)
    }

    /// Stop accepting work, cancel the running task and wait for the worker to exit.
    /// Queued tasks are dropped.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let dropped = {
            let mut queue = self.shared.queue.lock().await;
            queue.stopped = true;
            if let Some(running) = &queue.running {
                running.cancel.cancel();
            }
            std::mem::take(&mut queue.tasks).len()
        };
        info!("IndexerScheduler: shutting down, {} queued tasks dropped", dropped);
        self.shared.shutdown.cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker
                .await
                .map_err(|e| SchedulerError::Worker(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for IndexerScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn worker_loop(shared: Arc<Shared>) {
    let mut last_error: Option<String> = None;
    let mut busy = false;
    loop {
        let next = {
            let mut queue = shared.queue.lock().await;
            if queue.stopped || shared.shutdown.is_cancelled() {
                break;
            }
            match queue.tasks.pop_front() {
                Some(task) => {
                    queue.running = Some(RunningTask::new(&task, shared.shutdown.child_token()));
                    Some(task)
                }
                None => {
                    if busy {
                        match last_error.take() {
                            Some(error) => shared.latch.trigger_failure(error).await,
                            None => shared.latch.trigger_idle().await,
                        }
                    }
                    None
                }
            }
        };

        let Some(task) = next else {
            if busy {
                busy = false;
                info!("IndexerScheduler: idle");
                shared.emit(SchedulerEvent::Idle);
            }
            tokio::select! {
                _ = shared.wakeup.notified() => continue,
                _ = shared.shutdown.cancelled() => break,
            }
        };
        busy = true;
        last_error = run_task(&shared, task).await;
    }
    debug!("IndexerScheduler: worker stopped");
}

/// Run one task on the blocking pool; returns its failure, if it failed
async fn run_task(shared: &Arc<Shared>, task: IndexerTask) -> Option<String> {
    let id = task.id();
    let inbox = task.inbox();
    let cancel = {
        let queue = shared.queue.lock().await;
        queue
            .running
            .as_ref()
            .map(|running| running.cancel.clone())
            .unwrap_or_default()
    };
    shared.emit(SchedulerEvent::TaskStarted {
        task: id,
        files: task.file_count(),
    });

    let ctx = shared.ctx.clone();
    let mut task = task;
    let joined = tokio::task::spawn_blocking(move || task.run(&ctx, &cancel)).await;

    let failure = match joined {
        Ok(Ok(progress)) => {
            shared.emit(SchedulerEvent::TaskCompleted { task: id, progress });
            None
        }
        Ok(Err(IndexerError::Cancelled)) => {
            info!("IndexerScheduler: task {} cancelled", id);
            shared.emit(SchedulerEvent::TaskCancelled { task: id });
            None
        }
        Ok(Err(e)) => {
            error!("IndexerScheduler: task {} failed: {}", id, e);
            shared.emit(SchedulerEvent::TaskFailed {
                task: id,
                error: e.to_string(),
            });
            Some(e.to_string())
        }
        Err(e) => {
            error!("IndexerScheduler: task {} panicked: {}", id, e);
            shared.emit(SchedulerEvent::TaskFailed {
                task: id,
                error: e.to_string(),
            });
            Some(e.to_string())
        }
    };

    let mut queue = shared.queue.lock().await;
    queue.running = None;
    // urgent tasks the run never got to go first
    for leftover in inbox.close().into_iter().rev() {
        debug!("IndexerScheduler: requeueing urgent task {}", leftover.id());
        queue.tasks.push_front(leftover);
    }
    failure
}
