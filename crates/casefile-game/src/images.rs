//! Detached image generation
//!
//! Image jobs run on a background worker fed by a bounded channel, fully
//! decoupled from the request that created them. `submit` never blocks and
//! never fails the caller; every failure (including a full queue) goes to the
//! `FailureSink`, which logs it and keeps the most recent ones for
//! diagnostics.

use casefile_core::{Clock, DocumentStore, Error, Invocation, Result, ServiceKind, ServiceModels, Update};
use casefile_usage::TrackedInvoker;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[cfg(feature = "metrics")]
use casefile_observability::Metrics;

use crate::models::{CASES_COLLECTION, DetectiveCase, VisualScene, new_id};
use crate::prompts::{self, CaseContext};

/// Usage operation for image prompt writing and image generation
pub const VISUAL_OPERATION: &str = "visual_generation";

/// Longest scene description stored before truncation
const SCENE_DESCRIPTION_CHARS: usize = 200;

/// What to draw
#[derive(Debug, Clone, PartialEq)]
pub enum ImageJobKind {
    /// Main crime scene image, stored as `crime_scene_image_url`
    CrimeScene,
    /// Additional scene appended to `visual_scenes`
    Scene {
        context: String,
        generated_from: String,
        character: Option<String>,
    },
}

impl ImageJobKind {
    pub fn label(&self) -> &'static str {
        match self {
            ImageJobKind::CrimeScene => "crime_scene",
            ImageJobKind::Scene { .. } => "scene",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageJob {
    pub case_id: String,
    pub session_id: String,
    pub kind: ImageJobKind,
}

/// A failed image job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageFailure {
    pub case_id: String,
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Log of image job failures, keeping the most recent `capacity` entries
#[derive(Debug)]
pub struct FailureSink {
    recent: Mutex<VecDeque<ImageFailure>>,
    capacity: usize,
}

impl FailureSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record(&self, failure: ImageFailure) {
        tracing::error!(
            case_id = %failure.case_id,
            kind = %failure.kind,
            "Image generation failed: {}",
            failure.message
        );
        if self.capacity == 0 {
            return;
        }
        let mut recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(failure);
    }

    /// Oldest first
    pub fn recent(&self) -> Vec<ImageFailure> {
        self.recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

/// Image queue configuration
#[derive(Debug, Clone, Copy)]
pub struct ImageQueueConfig {
    /// Jobs buffered before `submit` starts dropping
    pub channel_buffer_size: usize,
    /// Failures kept for diagnostics
    pub failure_history: usize,
}

impl Default for ImageQueueConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 64,
            failure_history: 50,
        }
    }
}

/// Produces images and attaches them to cases
pub struct ImageWorker {
    invoker: TrackedInvoker,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    models: ServiceModels,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl ImageWorker {
    pub fn new(
        invoker: TrackedInvoker,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        models: ServiceModels,
    ) -> Self {
        Self {
            invoker,
            store,
            clock,
            models,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Attach a metrics collector
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run one job to completion, returning the scene appended by `Scene` jobs
    pub async fn process(&self, job: &ImageJob) -> Result<Option<VisualScene>> {
        let case: DetectiveCase = self
            .store
            .find_by_id_as(CASES_COLLECTION, &job.case_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Case {}", job.case_id)))?;
        let context = CaseContext::from(&case);

        let (request, style) = match &job.kind {
            ImageJobKind::CrimeScene => (prompts::crime_scene_image_request(context), prompts::CRIME_SCENE_STYLE),
            ImageJobKind::Scene { context: scene, .. } => {
                (prompts::scene_image_request(context, scene), prompts::SCENE_STYLE)
            }
        };

        let description = self
            .invoker
            .invoke(
                &job.session_id,
                Some(&job.case_id),
                VISUAL_OPERATION,
                &Invocation::new(
                    ServiceKind::Storyteller,
                    self.models.model_for(ServiceKind::Storyteller),
                    prompts::system_prompt(ServiceKind::Storyteller),
                    request,
                ),
            )
            .await?;

        let image_url = self
            .invoker
            .invoke(
                &job.session_id,
                Some(&job.case_id),
                VISUAL_OPERATION,
                &Invocation::new(
                    ServiceKind::Image,
                    self.models.model_for(ServiceKind::Image),
                    "",
                    prompts::image_prompt(style, &description),
                ),
            )
            .await?;

        let (update, scene) = match &job.kind {
            ImageJobKind::CrimeScene => (Update::new().set("crime_scene_image_url", image_url.as_str()), None),
            ImageJobKind::Scene {
                context,
                generated_from,
                character,
            } => {
                let scene = VisualScene {
                    id: new_id(),
                    title: format!("Scene: {}", title_case(generated_from)),
                    description: truncate_description(context),
                    image_url: image_url.clone(),
                    generated_from: generated_from.clone(),
                    context: context.clone(),
                    character_involved: character.clone(),
                    timestamp: self.clock.now(),
                };
                (Update::new().push("visual_scenes", serde_json::to_value(&scene)?), Some(scene))
            }
        };

        if !self.store.update(CASES_COLLECTION, &job.case_id, &update).await? {
            return Err(Error::NotFound(format!("Case {} disappeared", job.case_id)));
        }

        tracing::info!(
            case_id = %job.case_id,
            kind = job.kind.label(),
            "Image generated: {}",
            image_url
        );
        Ok(scene)
    }

    #[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
    fn record_outcome(&self, job: &ImageJob, success: bool) {
        #[cfg(feature = "metrics")]
        if let Some(ref metrics) = self.metrics {
            metrics.record_image_job(job.kind.label(), success);
        }
    }
}

/// Handle to the background image worker
pub struct ImageJobQueue {
    tx: Mutex<Option<mpsc::Sender<ImageJob>>>,
    worker: Arc<ImageWorker>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    failures: Arc<FailureSink>,
    clock: Arc<dyn Clock>,
}

impl ImageJobQueue {
    /// Spawn the worker on the current runtime
    pub fn spawn(worker: ImageWorker, config: ImageQueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer_size.max(1));
        let failures = Arc::new(FailureSink::new(config.failure_history));
        let clock = worker.clock.clone();
        let worker = Arc::new(worker);

        let sink = failures.clone();
        let background = worker.clone();
        let worker_handle = tokio::spawn(async move {
            Self::worker_loop(rx, background, sink).await;
        });

        Self {
            tx: Mutex::new(Some(tx)),
            worker,
            worker_handle: Mutex::new(Some(worker_handle)),
            failures,
            clock,
        }
    }

    /// Queue a job. Returns false if it was dropped (recorded as a failure).
    pub fn submit(&self, job: ImageJob) -> bool {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let rejected = match tx {
            None => Some((job, "image queue is shut down")),
            Some(tx) => match tx.try_send(job) {
                Ok(()) => None,
                Err(mpsc::error::TrySendError::Full(job)) => Some((job, "image queue is full")),
                Err(mpsc::error::TrySendError::Closed(job)) => Some((job, "image worker has stopped")),
            },
        };

        match rejected {
            None => true,
            Some((job, reason)) => {
                self.failures.record(ImageFailure {
                    case_id: job.case_id,
                    kind: job.kind.label().to_string(),
                    message: reason.to_string(),
                    at: self.clock.now(),
                });
                false
            }
        }
    }

    /// Run a job on the caller's task instead of the queue.
    ///
    /// Errors go back to the caller rather than to the failure sink.
    pub async fn run_now(&self, job: ImageJob) -> Result<Option<VisualScene>> {
        let outcome = self.worker.process(&job).await;
        self.worker.record_outcome(&job, outcome.is_ok());
        outcome
    }

    /// Recent failures, oldest first
    pub fn failures(&self) -> Vec<ImageFailure> {
        self.failures.recent()
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn shutdown(&self) {
        drop(self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take());
        let handle = self
            .worker_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle
            && handle.await.is_err()
        {
            tracing::error!("Image worker task panicked");
        }
    }

    async fn worker_loop(mut rx: mpsc::Receiver<ImageJob>, worker: Arc<ImageWorker>, failures: Arc<FailureSink>) {
        while let Some(job) = rx.recv().await {
            match worker.process(&job).await {
                Ok(_) => worker.record_outcome(&job, true),
                Err(err) => {
                    worker.record_outcome(&job, false);
                    failures.record(ImageFailure {
                        case_id: job.case_id.clone(),
                        kind: job.kind.label().to_string(),
                        message: err.to_string(),
                        at: worker.clock.now(),
                    });
                }
            }
        }
        tracing::debug!("Image worker loop exited");
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn truncate_description(context: &str) -> String {
    if context.chars().count() > SCENE_DESCRIPTION_CHARS {
        let head: String = context.chars().take(SCENE_DESCRIPTION_CHARS).collect();
        format!("{}...", head)
    } else {
        context.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casefile_core::invoker::scripted::ScriptedInvoker;
    use casefile_core::{ManualClock, MemoryDocumentStore};
    use casefile_usage::{CostModel, USAGE_COLLECTION, UsageLedger};

    struct Harness {
        store: Arc<dyn DocumentStore>,
        ledger: Arc<UsageLedger>,
        queue: ImageJobQueue,
    }

    async fn harness(invoker: ScriptedInvoker) -> (Harness, DetectiveCase) {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let ledger = Arc::new(UsageLedger::new(store.clone(), clock.clone(), CostModel::new()));
        let tracked = TrackedInvoker::new(Arc::new(invoker), ledger.clone());
        let worker = ImageWorker::new(tracked, store.clone(), clock, ServiceModels::default());
        let queue = ImageJobQueue::spawn(worker, ImageQueueConfig::default());

        let case = DetectiveCase::fallback(Utc::now());
        store.insert_as(CASES_COLLECTION, &case).await.unwrap();
        (Harness { store, ledger, queue }, case)
    }

    #[tokio::test]
    async fn test_crime_scene_image_is_set() {
        let invoker = ScriptedInvoker::new()
            .respond(ServiceKind::Storyteller, "A locked study, rain on the window")
            .respond(ServiceKind::Image, "https://img.example/scene.png");
        let (h, case) = harness(invoker).await;

        assert!(h.queue.submit(ImageJob {
            case_id: case.id.clone(),
            session_id: "s1".to_string(),
            kind: ImageJobKind::CrimeScene,
        }));
        h.queue.shutdown().await;

        let stored: DetectiveCase = h.store.find_by_id_as(CASES_COLLECTION, &case.id).await.unwrap().unwrap();
        assert_eq!(stored.crime_scene_image_url.as_deref(), Some("https://img.example/scene.png"));
        assert!(h.queue.failures().is_empty());

        let summary = h.ledger.session_summary("s1").await.unwrap();
        assert_eq!(summary.operation_count, 2);
        assert!(summary.service_breakdown.contains_key("image-service"));
    }

    #[tokio::test]
    async fn test_scene_is_pushed() {
        let invoker = ScriptedInvoker::new()
            .respond(ServiceKind::Storyteller, "The gardener by the greenhouse at dusk")
            .respond(ServiceKind::Image, "https://img.example/testimony.png");
        let (h, case) = harness(invoker).await;

        h.queue.submit(ImageJob {
            case_id: case.id.clone(),
            session_id: "s1".to_string(),
            kind: ImageJobKind::Scene {
                context: "Dr. Harrison testified: I saw the gardener near the greenhouse.".to_string(),
                generated_from: "testimony".to_string(),
                character: Some("Dr. Harrison".to_string()),
            },
        });
        h.queue.shutdown().await;

        let stored: DetectiveCase = h.store.find_by_id_as(CASES_COLLECTION, &case.id).await.unwrap().unwrap();
        assert_eq!(stored.visual_scenes.len(), 1);
        let scene = &stored.visual_scenes[0];
        assert_eq!(scene.title, "Scene: Testimony");
        assert_eq!(scene.image_url, "https://img.example/testimony.png");
        assert_eq!(scene.character_involved.as_deref(), Some("Dr. Harrison"));
    }

    #[tokio::test]
    async fn test_failures_go_to_sink() {
        let invoker = ScriptedInvoker::new()
            .respond(ServiceKind::Storyteller, "A dark hallway")
            .fail(ServiceKind::Image, "quota exhausted");
        let (h, case) = harness(invoker).await;

        h.queue.submit(ImageJob {
            case_id: case.id.clone(),
            session_id: "s1".to_string(),
            kind: ImageJobKind::CrimeScene,
        });
        h.queue.submit(ImageJob {
            case_id: "no-such-case".to_string(),
            session_id: "s1".to_string(),
            kind: ImageJobKind::CrimeScene,
        });
        h.queue.shutdown().await;

        let failures = h.queue.failures();
        assert_eq!(failures.len(), 2);
        assert!(failures[0].message.contains("quota exhausted"));
        assert!(failures[1].message.contains("no-such-case"));

        // The failed image call is still in the ledger
        let failed = h
            .store
            .count(
                USAGE_COLLECTION,
                &casefile_core::Filter::new().eq("service", "image-service"),
            )
            .await
            .unwrap();
        assert_eq!(failed, 1);

        let stored: DetectiveCase = h.store.find_by_id_as(CASES_COLLECTION, &case.id).await.unwrap().unwrap();
        assert!(stored.crime_scene_image_url.is_none());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_recorded() {
        let (h, case) = harness(ScriptedInvoker::new()).await;
        h.queue.shutdown().await;

        let queued = h.queue.submit(ImageJob {
            case_id: case.id.clone(),
            session_id: "s1".to_string(),
            kind: ImageJobKind::CrimeScene,
        });
        assert!(!queued);
        assert_eq!(h.queue.failures()[0].message, "image queue is shut down");
    }

    #[tokio::test]
    async fn test_run_now_returns_scene_and_errors() {
        let invoker = ScriptedInvoker::new()
            .respond(ServiceKind::Storyteller, "Candlelight in the east wing")
            .respond(ServiceKind::Image, "https://img.example/wing.png");
        let (h, case) = harness(invoker).await;

        let scene = h
            .queue
            .run_now(ImageJob {
                case_id: case.id.clone(),
                session_id: "s1".to_string(),
                kind: ImageJobKind::Scene {
                    context: "The east wing after midnight".to_string(),
                    generated_from: "manual".to_string(),
                    character: None,
                },
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scene.title, "Scene: Manual");
        assert_eq!(scene.image_url, "https://img.example/wing.png");

        let stored: DetectiveCase = h.store.find_by_id_as(CASES_COLLECTION, &case.id).await.unwrap().unwrap();
        assert_eq!(stored.visual_scenes, vec![scene]);

        let err = h
            .queue
            .run_now(ImageJob {
                case_id: "no-such-case".to_string(),
                session_id: "s1".to_string(),
                kind: ImageJobKind::CrimeScene,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        // Synchronous failures are returned, not logged to the sink
        assert!(h.queue.failures().is_empty());
    }

    #[test]
    fn test_failure_sink_is_bounded() {
        let sink = FailureSink::new(2);
        for n in 0..3 {
            sink.record(ImageFailure {
                case_id: format!("case-{}", n),
                kind: "crime_scene".to_string(),
                message: "boom".to_string(),
                at: Utc::now(),
            });
        }
        let recent = sink.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].case_id, "case-1");
    }

    #[test]
    fn test_description_truncation() {
        let long = "x".repeat(250);
        let truncated = truncate_description(&long);
        assert_eq!(truncated.chars().count(), 203);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncate_description("short"), "short");
        assert_eq!(title_case("testimony"), "Testimony");
    }
}
