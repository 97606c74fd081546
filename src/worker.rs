use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
        mpsc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crate::{
    analyzer::{AnalysisOutcome, AnalysisRequester},
    config::AnalysisConfig,
    provider::InferenceProvider,
    upload::{BatchIdentity, UploadBatch},
};

/// Whether the worker thread is currently inside an analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for the next job.
    Idle,
    /// Running `analyze` for a job, retries and their delays included.
    Processing,
}

impl WorkerState {
    /// Lowercase name of the state, as reported by the server.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Processing => "processing",
        }
    }
}

struct Job {
    id: u64,
    batch: UploadBatch,
}

/// A finished analysis with its timing.
#[derive(Clone, Debug)]
pub struct CompletedAnalysis {
    /// Id returned by [`AnalysisWorker::submit`].
    pub id: u64,
    /// Names and sizes of the analysed images.
    pub identity: BatchIdentity,
    /// When the worker picked the job up.
    pub start_time: Instant,
    /// Time spent in `analyze`.
    pub duration: Duration,
    pub outcome: AnalysisOutcome,
}

/// Result of polling the worker.
#[derive(Debug)]
pub enum WorkerPoll {
    /// The oldest finished job not yet polled.
    Finished(CompletedAnalysis),
    /// Nothing finished yet, with the worker's current state.
    Empty(WorkerState),
    /// The worker thread is gone and nothing is left to collect.
    Error(String),
}

/// Runs an [`AnalysisRequester`] on a dedicated thread.
///
/// The analysis itself stays blocking; this only keeps it off the caller's
/// thread, e.g. an async web handler. Jobs run one after another in
/// submission order.
pub struct AnalysisWorker {
    state: Arc<Mutex<WorkerState>>,
    job_tx: Option<mpsc::Sender<Job>>,
    done_rx: Mutex<mpsc::Receiver<CompletedAnalysis>>,
    handle: Option<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl AnalysisWorker {
    /// Moves the configuration and provider onto a new thread.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration the requester on the thread borrows.
    /// * `provider` - The provider to call. It is also dropped on that thread.
    ///
    /// # Returns
    ///
    /// A worker in the [`WorkerState::Idle`] state.
    pub fn spawn<P>(config: AnalysisConfig, provider: P) -> Self
    where
        P: InferenceProvider + Send + 'static,
    {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (done_tx, done_rx) = mpsc::channel::<CompletedAnalysis>();
        let state = Arc::new(Mutex::new(WorkerState::Idle));

        let handle = std::thread::spawn({
            let state = state.clone();
            move || {
                let mut requester = AnalysisRequester::new(&config, provider);
                while let Ok(job) = job_rx.recv() {
                    log::debug!("Starting analysis job {}", job.id);
                    set_state(&state, WorkerState::Processing);
                    let start_time = Instant::now();

                    let outcome = requester.analyze(&job.batch);

                    log::debug!("Analysis job {} finished in {:?}", job.id, start_time.elapsed());
                    let completed = CompletedAnalysis {
                        id: job.id,
                        identity: job.batch.identity(),
                        start_time,
                        duration: start_time.elapsed(),
                        outcome,
                    };
                    set_state(&state, WorkerState::Idle);
                    if done_tx.send(completed).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            state,
            job_tx: Some(job_tx),
            done_rx: Mutex::new(done_rx),
            handle: Some(handle),
            next_id: AtomicU64::new(0),
        }
    }

    /// Current state of the worker thread.
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a batch and returns its job id, or `None` once stopped.
    pub fn submit(&self, batch: UploadBatch) -> Option<u64> {
        let tx = self.job_tx.as_ref()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match tx.send(Job { id, batch }) {
            Ok(()) => Some(id),
            Err(_) => {
                log::error!("Analysis worker is gone, dropping job {id}");
                None
            }
        }
    }

    /// Returns a finished analysis without blocking.
    ///
    /// # Returns
    ///
    /// Finished jobs in completion order, then [`WorkerPoll::Empty`] while the
    /// thread is alive, or [`WorkerPoll::Error`] once it has exited.
    pub fn try_poll(&self) -> WorkerPoll {
        let rx = self.done_rx.lock().unwrap_or_else(PoisonError::into_inner);
        match rx.try_recv() {
            Ok(completed) => WorkerPoll::Finished(completed),
            Err(mpsc::TryRecvError::Empty) => WorkerPoll::Empty(self.state()),
            Err(mpsc::TryRecvError::Disconnected) => {
                log::error!("Analysis worker channel disconnected");
                WorkerPoll::Error("analysis worker stopped".to_string())
            }
        }
    }

    /// Closes the queue and joins the thread.
    ///
    /// Jobs submitted before the call still run to completion, retries and
    /// delays included, and their results stay available to [`try_poll`].
    /// Later submissions return `None`.
    ///
    /// [`try_poll`]: Self::try_poll
    pub fn stop(&mut self) {
        self.job_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Analysis worker thread panicked");
            }
        }
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn set_state(state: &Mutex<WorkerState>, value: WorkerState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = value;
}
