//! Job orchestration: submission, background execution and status polling.
//!
//! Each submitted job runs its pipeline (download, reduce, build, route) as
//! one task on a dedicated worker pool. Tasks never touch the job store
//! directly; they send [`Transition`]s over a channel to a recorder thread
//! which applies them under the store's lock, so pollers always see a
//! consistent snapshot. A fault inside any stage is caught at the stage
//! boundary and fails only that job.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::TrailCache;
use crate::error::{JobError, OrchestratorError, PipelineError, ProviderError};
use crate::graph::{self, GraphOptions};
use crate::jobs::{Job, JobFailure, JobId, JobStore, RouteRequest, Transition};
use crate::overpass::OverpassClient;
use crate::reducer::{reduce_segments, ReducerOptions};
use crate::route::{find_routes, RouteResult};
use crate::settings::Settings;
use crate::traits::{PoiStore, TrailProvider};

/// Progress recorded once trail data is available.
pub const PROGRESS_DOWNLOADED: f64 = 0.2;
/// Progress recorded once points are reduced.
pub const PROGRESS_REDUCED: f64 = 0.4;
/// Progress recorded once the graph is built.
pub const PROGRESS_BUILT: f64 = 0.6;

/// Longest job retention honoured; larger settings are clamped to it.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// 0 lets the pool pick one thread per core.
    pub worker_threads: usize,
    /// Age after which [`Orchestrator::cleanup_expired`] removes a job.
    pub job_retention_days: i64,
    pub reducer: ReducerOptions,
    pub graph: GraphOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            job_retention_days: 7,
            reducer: ReducerOptions::default(),
            graph: GraphOptions::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn job_retention(&self) -> Duration {
        Duration::days(self.job_retention_days.clamp(0, MAX_RETENTION_DAYS))
    }
}

struct JobUpdate {
    id: JobId,
    transition: Transition,
    at: DateTime<Utc>,
}

/// Bumped after every recorded update so waiters can block instead of spin.
#[derive(Default)]
struct UpdateSignal {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl UpdateSignal {
    fn lock(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        *self.lock() += 1;
        self.changed.notify_all();
    }
}

/// Everything one pipeline run reads. Shared read-only across jobs except
/// for the cache, which synchronizes itself.
struct PipelineContext {
    cache: Arc<TrailCache>,
    pois: Arc<dyn PoiStore>,
    config: OrchestratorConfig,
}

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    context: Arc<PipelineContext>,
    pool: rayon::ThreadPool,
    updates: Sender<JobUpdate>,
    recorder: Option<JoinHandle<()>>,
    signal: Arc<UpdateSignal>,
}

impl Orchestrator {
    /// Start an orchestrator over `store`.
    ///
    /// Jobs the store still lists as pending or running belonged to a
    /// previous process; they are marked failed as interrupted.
    pub fn new(
        config: OrchestratorConfig,
        cache: Arc<TrailCache>,
        pois: Arc<dyn PoiStore>,
        store: Arc<dyn JobStore>,
    ) -> Result<Self, OrchestratorError> {
        let reconciled = store.reconcile_orphans(Utc::now());
        if reconciled > 0 {
            tracing::warn!(reconciled, "failed jobs orphaned by a previous run");
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("route-worker-{}", i))
            .build()?;

        let signal = Arc::new(UpdateSignal::default());
        let (tx, rx) = mpsc::channel();
        let recorder = {
            let store = Arc::clone(&store);
            let signal = Arc::clone(&signal);
            std::thread::Builder::new()
                .name("job-recorder".to_string())
                .spawn(move || record_updates(rx, store.as_ref(), &signal))?
        };

        tracing::info!(
            workers = pool.current_num_threads(),
            reducer_cap = config.reducer.cap,
            "orchestrator started"
        );

        Ok(Self {
            store,
            context: Arc::new(PipelineContext { cache, pois, config }),
            pool,
            updates: tx,
            recorder: Some(recorder),
            signal,
        })
    }

    /// Wire an orchestrator with the Overpass provider and a trail cache
    /// configured from `settings`.
    pub fn from_settings(
        settings: &Settings,
        pois: Arc<dyn PoiStore>,
        store: Arc<dyn JobStore>,
    ) -> Result<Self, OrchestratorError> {
        let client = OverpassClient::new(settings.overpass.clone()).map_err(ProviderError::from)?;
        let provider: Arc<dyn TrailProvider> = Arc::new(client);
        let cache = Arc::new(TrailCache::new(provider, settings.cache.clone()));
        Self::new(settings.orchestrator_config(), cache, pois, store)
    }

    pub fn cache(&self) -> &TrailCache {
        &self.context.cache
    }

    /// Record a pending job and schedule its pipeline. Returns immediately.
    pub fn submit(&self, request: RouteRequest) -> Result<JobId, JobError> {
        let id = JobId::new_v4();
        self.store.insert(Job::new(id.clone(), request.clone(), Utc::now()))?;
        tracing::info!(job_id = %id, poi_kind = %request.poi_kind, "job submitted");

        let tx = self.updates.clone();
        let context = Arc::clone(&self.context);
        let job_id = id.clone();
        self.pool.spawn(move || {
            let report = |transition: Transition| {
                let update = JobUpdate {
                    id: job_id.clone(),
                    transition,
                    at: Utc::now(),
                };
                if tx.send(update).is_err() {
                    tracing::error!(job_id = %job_id, "job recorder is gone, dropping update");
                }
            };

            report(Transition::Start);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run_pipeline(&context, &request, &report)
            }))
            .unwrap_or_else(|payload| Err(PipelineError::Internal(panic_message(payload.as_ref()))));

            match outcome {
                Ok(result) => {
                    tracing::info!(job_id = %job_id, reachable = result.reachable, "job completed");
                    report(Transition::Complete(result));
                }
                Err(err) => {
                    tracing::warn!(job_id = %job_id, error = %err, "job failed");
                    report(Transition::Fail(JobFailure::from(err)));
                }
            }
        });

        Ok(id)
    }

    /// Current snapshot of a job.
    pub fn status(&self, id: &JobId) -> Result<Job, JobError> {
        self.store.get(id).ok_or_else(|| JobError::NotFound(id.clone()))
    }

    /// Block until the job is terminal or `timeout` elapses, then return its
    /// latest snapshot.
    pub fn wait(&self, id: &JobId, timeout: StdDuration) -> Result<Job, JobError> {
        let deadline = Instant::now() + timeout;
        let mut seen = *self.signal.lock();
        loop {
            let job = self.status(id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(job);
            }
            let guard = self.signal.lock();
            let (guard, _) = self
                .signal
                .changed
                .wait_timeout_while(guard, deadline - now, |generation| *generation == seen)
                .unwrap_or_else(PoisonError::into_inner);
            seen = *guard;
        }
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.store.list()
    }

    /// Remove jobs created more than `retention` ago.
    pub fn cleanup(&self, retention: Duration) -> usize {
        self.store.cleanup_older_than(retention, Utc::now())
    }

    /// Remove jobs older than the configured retention.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup(self.context.config.job_retention())
    }

    /// Stop accepting work, let running jobs finish and flush their updates.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // The recorder exits once every sender is gone, i.e. after the last
        // running job has reported. Swapping in a disconnected sender drops
        // ours while the struct stays whole for `Drop`.
        let (disconnected, _) = mpsc::channel();
        drop(std::mem::replace(&mut self.updates, disconnected));
        if let Some(recorder) = self.recorder.take() {
            if recorder.join().is_err() {
                tracing::error!("job recorder panicked");
            }
            tracing::info!("orchestrator stopped");
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn record_updates(rx: Receiver<JobUpdate>, store: &dyn JobStore, signal: &UpdateSignal) {
    for update in rx {
        let JobUpdate { id, transition, at } = update;
        let mut transition = Some(transition);
        let applied = store.update(&id, &mut |job: &mut Job| {
            if let Some(transition) = transition.take() {
                if let Err(err) = job.apply(transition, at) {
                    tracing::warn!(job_id = %job.id, error = %err, "rejected job transition");
                }
            }
        });
        if let Err(err) = applied {
            tracing::warn!(job_id = %id, error = %err, "update for unknown job");
        }
        signal.bump();
    }
}

fn run_pipeline(
    context: &PipelineContext,
    request: &RouteRequest,
    report: &dyn Fn(Transition),
) -> Result<RouteResult, PipelineError> {
    let segments = stage("download", || {
        context
            .cache
            .get_or_fetch(&request.search_box)
            .map_err(PipelineError::from)
    })?;
    report(Transition::Progress(PROGRESS_DOWNLOADED));

    let network = stage("reduce", || Ok(reduce_segments(&segments, &context.config.reducer)))?;
    report(Transition::Progress(PROGRESS_REDUCED));

    let built = stage("build", || {
        let pois = context
            .pois
            .query_near(&request.search_box, &request.poi_kind)
            .map_err(|err| PipelineError::DataUnavailable(err.to_string()))?;
        Ok(graph::build(&network.points, &network.adjacency, &pois, &context.config.graph)?)
    })?;
    report(Transition::Progress(PROGRESS_BUILT));

    stage("route", || Ok(find_routes(&built, request.start)))
}

/// Run one stage, turning a panic into an internal error.
fn stage<T>(
    name: &str,
    f: impl FnOnce() -> Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    tracing::debug!(stage = name, "pipeline stage started");
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(stage = name, panic = %message, "pipeline stage panicked");
            Err(PipelineError::Internal(format!("{} stage failed: {}", name, message)))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
