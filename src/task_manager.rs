use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::PathBuf,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

use serde_json::{Value, json};

use crate::{
    checkpoint::CheckpointRegistry,
    collection_config::CollectionConfig,
    collection_pool::CollectionPool,
    config_db::ConfigDb,
    data_dir::DataDir,
    error::{Error, Result},
    queue::{Queue, QueueGroup, QueueState},
    result::{ResultHandle, TaskOutcome},
    settings::ServerSettings,
    tasks::{IndexingTask, Job, ProcessingTask, ReadonlyCategory, ReadonlyTask},
    validation::validate_collection_name,
    worker,
};

pub(crate) type IndexingQueue = Queue<Job<IndexingTask>>;

/// A processing job tagged with its per-collection submission number.
pub(crate) struct ProcessingJob {
    pub seq: u64,
    pub job: Job<ProcessingTask>,
}

/// Tracks outstanding processing submissions of one collection, and the
/// indexing jobs parked until those finish.
#[derive(Default)]
struct ProcessingTracker {
    next_seq: u64,
    outstanding: BTreeSet<u64>,
    /// Jobs waiting for every processing task numbered below the barrier.
    parked: Vec<(u64, Job<IndexingTask>)>,
}

impl ProcessingTracker {
    fn barrier_clear(&self, barrier: u64) -> bool {
        self.outstanding.first().is_none_or(|&oldest| oldest >= barrier)
    }
}

struct IndexingLane {
    queue: Arc<IndexingQueue>,
    started: bool,
}

/// Routes tasks to queues and owns the workers that drain them.
///
/// Readonly tasks run on a shared pool over three category queues.
/// Processing tasks run on a shared pool over one queue per collection.
/// Each collection's indexing tasks run in order on a dedicated thread,
/// which is the collection's only writer.
pub struct TaskManager {
    settings: ServerSettings,
    pool: CollectionPool,
    config_db: Arc<ConfigDb>,
    checkpoints: CheckpointRegistry,
    readonly: QueueGroup<Job<ReadonlyTask>>,
    processing: QueueGroup<ProcessingJob>,
    indexing: Mutex<BTreeMap<String, IndexingLane>>,
    trackers: Mutex<HashMap<String, ProcessingTracker>>,
    config_edits: Mutex<()>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopping: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl TaskManager {
    pub fn new(
        collections_root: PathBuf,
        config_db: Arc<ConfigDb>,
        settings: ServerSettings,
    ) -> Arc<Self> {
        let readonly = QueueGroup::new(settings.search_queue);
        readonly.set_limits(ReadonlyCategory::Search.queue_name(), settings.search_queue);
        readonly.set_limits(ReadonlyCategory::Info.queue_name(), settings.info_queue);
        readonly.set_limits(ReadonlyCategory::Status.queue_name(), settings.status_queue);

        Arc::new(Self {
            pool: CollectionPool::with_max_cached_readers(
                collections_root,
                settings.max_cached_readers,
            ),
            config_db,
            checkpoints: CheckpointRegistry::new(),
            readonly,
            processing: QueueGroup::new(settings.processing_queue),
            indexing: Mutex::new(BTreeMap::new()),
            trackers: Mutex::new(HashMap::new()),
            config_edits: Mutex::new(()),
            threads: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            settings,
        })
    }

    /// Open the config database in `data_dir` and build a manager from the
    /// stored settings.
    pub fn open(data_dir: &DataDir) -> Result<Arc<Self>> {
        let config_db = Arc::new(ConfigDb::open(&data_dir.config_db())?);
        let settings = ServerSettings::load(&config_db)?;
        Ok(Self::new(data_dir.collections_dir()?, config_db, settings))
    }

    pub fn pool(&self) -> &CollectionPool {
        &self.pool
    }

    pub fn checkpoints(&self) -> &CheckpointRegistry {
        &self.checkpoints
    }

    pub fn config_db(&self) -> &ConfigDb {
        &self.config_db
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub(crate) fn lock_config_edits(&self) -> MutexGuard<'_, ()> {
        lock(&self.config_edits)
    }

    /// Configuration as seen by the processing stage: the config store, then
    /// the last committed configuration, then an empty one.
    pub fn processing_config(&self, collection: &str) -> Result<CollectionConfig> {
        if let Some(config) = self.config_db.get_collection_config(collection)? {
            return Ok(config);
        }
        if !self.pool.exists(collection) {
            return Ok(CollectionConfig::default());
        }
        let handle = match self.pool.get_readonly(collection) {
            Ok(handle) => handle,
            Err(Error::NotFound { .. }) => return Ok(CollectionConfig::default()),
            Err(e) => return Err(e),
        };
        let config = handle.config().cloned();
        self.pool.release(handle);
        let config = config?;
        self.config_db.set_collection_config(collection, &config)?;
        Ok(config)
    }

    fn spawn(self: &Arc<Self>, name: String, f: impl FnOnce(Arc<Self>) + Send + 'static) {
        let manager = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || f(manager));
        match spawned {
            Ok(handle) => lock(&self.threads).push(handle),
            Err(e) => tracing::error!(thread = %name, "failed to spawn worker: {e}"),
        }
    }

    /// Start the worker pools, plus indexing threads for any collection that
    /// already has queued indexing work.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        for i in 0..self.settings.readonly_workers {
            self.spawn(format!("readonly-{i}"), worker::readonly_loop);
        }
        for i in 0..self.settings.processing_workers {
            self.spawn(format!("processing-{i}"), worker::processing_loop);
        }

        let mut lanes = lock(&self.indexing);
        for (name, lane) in lanes.iter_mut() {
            self.start_lane(name, lane);
        }
        drop(lanes);

        tracing::info!(
            readonly_workers = self.settings.readonly_workers,
            processing_workers = self.settings.processing_workers,
            "task manager started"
        );
    }

    fn start_lane(self: &Arc<Self>, collection: &str, lane: &mut IndexingLane) {
        if lane.started {
            return;
        }
        lane.started = true;
        let queue = Arc::clone(&lane.queue);
        let name = collection.to_string();
        self.spawn(format!("indexing-{collection}"), move |manager| {
            worker::indexing_loop(manager, name, queue)
        });
    }

    /// The collection's indexing queue, created on first use. `None` once
    /// stopping.
    fn indexing_queue(self: &Arc<Self>, collection: &str) -> Option<Arc<IndexingQueue>> {
        // Checked under the lanes lock: `stop` sets the flag while holding it,
        // so no lane can appear after `stop` has closed the existing ones.
        let mut lanes = lock(&self.indexing);
        if self.is_stopping() {
            return None;
        }
        let lane = lanes
            .entry(collection.to_string())
            .or_insert_with(|| IndexingLane {
                queue: Arc::new(Queue::new(self.settings.indexing_queue)),
                started: false,
            });
        if self.started.load(Ordering::SeqCst) {
            self.start_lane(collection, lane);
        }
        Some(Arc::clone(&lane.queue))
    }

    /// Submit a readonly task. Never blocks.
    pub fn queue_readonly(
        &self,
        category: ReadonlyCategory,
        task: ReadonlyTask,
        result: Option<ResultHandle>,
    ) -> QueueState {
        let state = self
            .readonly
            .push(category.queue_name(), Job::new(task, result), false);
        if !state.is_ok() {
            tracing::debug!(queue = category.queue_name(), ?state, "readonly task rejected");
        }
        state
    }

    /// Submit a processing task for a collection. Never blocks.
    pub fn queue_processing(
        &self,
        collection: &str,
        task: ProcessingTask,
        allow_throttle: bool,
        result: Option<ResultHandle>,
    ) -> Result<QueueState> {
        validate_collection_name(collection)?;
        let mut trackers = lock(&self.trackers);
        let tracker = trackers.entry(collection.to_string()).or_default();
        let seq = tracker.next_seq;
        let state = self.processing.push(
            collection,
            ProcessingJob {
                seq,
                job: Job::new(task, result),
            },
            allow_throttle,
        );
        if state.is_ok() {
            tracker.next_seq += 1;
            tracker.outstanding.insert(seq);
        }
        Ok(state)
    }

    /// Forward the output of a processing task. Skips admission: the work
    /// was admitted when the processing task was queued. Fails with
    /// `ShuttingDown` if the task was dropped because the manager is stopping.
    pub fn queue_indexing_from_processing(
        self: &Arc<Self>,
        collection: &str,
        task: IndexingTask,
        result: Option<ResultHandle>,
    ) -> Result<()> {
        let job = Job::new(task, result);
        let pushed = match self.indexing_queue(collection) {
            Some(queue) => queue.push_unchecked(job),
            None => Err(job),
        };
        match pushed {
            Ok(()) => Ok(()),
            Err(job) => {
                fail_job(job);
                Err(Error::ShuttingDown)
            }
        }
    }

    /// Submit an indexing task directly. If processing tasks submitted
    /// earlier for the collection are still running, the task waits for
    /// them before entering the indexing queue.
    pub fn queue_indexing(
        self: &Arc<Self>,
        collection: &str,
        task: IndexingTask,
        allow_throttle: bool,
        result: Option<ResultHandle>,
    ) -> Result<QueueState> {
        validate_collection_name(collection)?;
        Ok(self.enqueue_after_processing(collection, Job::new(task, result), allow_throttle))
    }

    /// Create a checkpoint and queue it behind everything submitted so far.
    pub fn create_checkpoint(
        self: &Arc<Self>,
        collection: &str,
        commit: bool,
        allow_throttle: bool,
    ) -> Result<(String, QueueState)> {
        validate_collection_name(collection)?;
        let Some(id) = self.checkpoints.create(collection, commit) else {
            tracing::warn!(collection, "too many pending checkpoints");
            return Ok((String::new(), QueueState::Full));
        };
        let job = Job::new(
            IndexingTask::Checkpoint {
                id: id.clone(),
                commit,
            },
            None,
        );
        let state = self.enqueue_after_processing(collection, job, allow_throttle);
        if !state.is_ok() {
            self.checkpoints.forget(collection, &id);
        }
        Ok((id, state))
    }

    fn enqueue_after_processing(
        self: &Arc<Self>,
        collection: &str,
        job: Job<IndexingTask>,
        allow_throttle: bool,
    ) -> QueueState {
        let mut trackers = lock(&self.trackers);
        let Some(queue) = self.indexing_queue(collection) else {
            return QueueState::Closed;
        };
        let tracker = trackers.entry(collection.to_string()).or_default();

        if tracker.barrier_clear(tracker.next_seq) {
            return queue.push(job, allow_throttle);
        }
        let state = queue.admission_with_pending(tracker.parked.len(), allow_throttle);
        if state.is_ok() {
            tracing::debug!(collection, "indexing task parked behind processing");
            tracker.parked.push((tracker.next_seq, job));
        }
        state
    }

    /// Record that a processing task finished and release any indexing jobs
    /// that were waiting for it.
    pub(crate) fn finish_processing(self: &Arc<Self>, collection: &str, seq: u64) {
        let mut trackers = lock(&self.trackers);
        let Some(tracker) = trackers.get_mut(collection) else {
            return;
        };
        tracker.outstanding.remove(&seq);

        let ready = tracker
            .parked
            .iter()
            .take_while(|(barrier, _)| tracker.barrier_clear(*barrier))
            .count();
        if ready == 0 {
            return;
        }
        let released: Vec<_> = tracker.parked.drain(..ready).collect();
        let queue = self.indexing_queue(collection);
        for (_, job) in released {
            let pushed = match &queue {
                Some(queue) => queue.push_unchecked(job),
                None => Err(job),
            };
            if let Err(job) = pushed {
                fail_job(job);
            }
        }
    }

    pub(crate) fn next_readonly(&self) -> Option<(String, Job<ReadonlyTask>)> {
        self.readonly.pop()
    }

    pub(crate) fn next_processing(&self) -> Option<(String, ProcessingJob)> {
        self.processing.pop()
    }

    /// Queue depths, worker counts and run state.
    pub fn status(&self) -> Value {
        let indexing: BTreeMap<String, usize> = lock(&self.indexing)
            .iter()
            .map(|(name, lane)| (name.clone(), lane.queue.len()))
            .collect();
        let parked: usize = lock(&self.trackers).values().map(|t| t.parked.len()).sum();
        json!({
            "tasks": {
                "readonly": self.readonly.depths(),
                "processing": self.processing.depths(),
                "indexing": indexing,
                "parked": parked,
            },
            "workers": {
                "readonly": self.settings.readonly_workers,
                "processing": self.settings.processing_workers,
                "indexing": indexing.len(),
            },
            "started": self.started.load(Ordering::SeqCst),
            "stopping": self.is_stopping(),
        })
    }

    /// Stop accepting work, fail everything still queued with a shutdown
    /// error, and wake every worker so it exits. Tasks already running
    /// finish normally.
    pub fn stop(&self) {
        let lanes: Vec<_> = {
            let lanes = lock(&self.indexing);
            if self.stopping.swap(true, Ordering::SeqCst) {
                return;
            }
            lanes.values().map(|lane| Arc::clone(&lane.queue)).collect()
        };
        tracing::info!("task manager stopping");

        for (_, job) in self.readonly.close() {
            fail_job(job);
        }
        for (_, pjob) in self.processing.close() {
            fail_job(pjob.job);
        }
        let parked: Vec<_> = lock(&self.trackers)
            .values_mut()
            .flat_map(|t| t.parked.drain(..).map(|(_, job)| job).collect::<Vec<_>>())
            .collect();
        for job in parked {
            fail_job(job);
        }
        for queue in lanes {
            for job in queue.close() {
                fail_job(job);
            }
        }
    }

    /// Wait for every worker thread to exit.
    pub fn join(&self) {
        loop {
            let threads = std::mem::take(&mut *lock(&self.threads));
            if threads.is_empty() {
                break;
            }
            for handle in threads {
                if handle.join().is_err() {
                    tracing::error!("worker thread panicked");
                }
            }
        }
    }
}

pub(crate) fn fail_job<T>(job: Job<T>) {
    if let Some(result) = job.result {
        result.set(TaskOutcome::error(&Error::ShuttingDown));
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.stop();
    }
}
