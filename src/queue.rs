use crate::config::Config;
use crate::extraction::{ExtractionPipeline, PipelineError};
use crate::models::ExtractionRecord;

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, error, info, warn};

pub type JobResult = Result<ExtractionRecord, PipelineError>;

#[derive(Debug)]
pub enum QueueItem {
    Process(Job),
    Shutdown,
}

#[derive(Debug)]
pub struct Job {
    pub image_path: PathBuf,
    reply: oneshot::Sender<JobResult>,
}

/// Awaits the outcome of one submitted image.
#[derive(Debug)]
pub struct JobHandle {
    receiver: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    pub async fn wait(self) -> Result<JobResult, QueueError> {
        self.receiver.await.map_err(|_| QueueError::WorkerGone)
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// Bounded queue feeding pipeline runs, at most `max_concurrent` at a time.
#[derive(Clone)]
pub struct ProcessingQueue {
    sender: mpsc::Sender<QueueItem>,
    counters: Arc<Counters>,
    semaphore: Arc<Semaphore>,
}

impl ProcessingQueue {
    pub fn new(pipeline: ExtractionPipeline, queue_size: usize, max_concurrent: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size);
        let counters = Arc::new(Counters::default());
        let semaphore = Arc::new(Semaphore::new(max_concurrent));

        let queue = ProcessingQueue {
            sender,
            counters: counters.clone(),
            semaphore: semaphore.clone(),
        };

        tokio::spawn(async move {
            Self::worker_task(receiver, pipeline, counters, semaphore).await;
        });

        queue
    }

    pub fn from_config(config: &Config, pipeline: ExtractionPipeline) -> Self {
        Self::new(pipeline, config.queue_size, config.max_concurrent_pipelines)
    }

    pub fn submit(&self, image_path: impl Into<PathBuf>) -> Result<JobHandle, QueueError> {
        let (reply, receiver) = oneshot::channel();
        let job = Job {
            image_path: image_path.into(),
            reply,
        };

        self.sender
            .try_send(QueueItem::Process(job))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => QueueError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => QueueError::QueueClosed,
            })?;

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(JobHandle { receiver })
    }

    /// Waits for queue space instead of failing when the queue is full.
    pub async fn submit_wait(&self, image_path: impl Into<PathBuf>) -> Result<JobHandle, QueueError> {
        let (reply, receiver) = oneshot::channel();
        let job = Job {
            image_path: image_path.into(),
            reply,
        };

        self.sender
            .send(QueueItem::Process(job))
            .await
            .map_err(|_| QueueError::QueueClosed)?;

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(JobHandle { receiver })
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.sender.send(QueueItem::Shutdown).await {
            warn!("Failed to send shutdown signal: {}", e);
        }
    }

    async fn worker_task(
        mut receiver: mpsc::Receiver<QueueItem>,
        pipeline: ExtractionPipeline,
        counters: Arc<Counters>,
        semaphore: Arc<Semaphore>,
    ) {
        info!("Processing queue worker started");

        while let Some(item) = receiver.recv().await {
            match item {
                QueueItem::Process(job) => {
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            error!("Pipeline semaphore closed, stopping worker");
                            break;
                        }
                    };

                    let pipeline = pipeline.clone();
                    let counters = counters.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        Self::process_job(job, &pipeline, &counters).await;
                    });
                }
                QueueItem::Shutdown => {
                    info!("Received shutdown signal, stopping worker");
                    break;
                }
            }
        }

        info!("Processing queue worker stopped");
    }

    async fn process_job(job: Job, pipeline: &ExtractionPipeline, counters: &Counters) {
        debug!("Starting pipeline for {}", job.image_path.display());
        counters.running.fetch_add(1, Ordering::Relaxed);

        let result = pipeline.run(&job.image_path).await;

        counters.running.fetch_sub(1, Ordering::Relaxed);
        match &result {
            Ok(record) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                info!("Completed {} as site {}", job.image_path.display(), record.id);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("Processing failed for {}: {}", job.image_path.display(), e);
            }
        }

        if job.reply.send(result).is_err() {
            debug!("Submitter dropped before {} finished", job.image_path.display());
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            running: self.counters.running.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            available_permits: self.semaphore.available_permits(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub submitted: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub available_permits: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Queue is closed")]
    QueueClosed,
    #[error("Worker dropped the job before replying")]
    WorkerGone,
}
