// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory OCR job queue.
//
// Recognition is far slower than scanning, so pages are queued and worked
// through by one background thread while the scanner moves on to the next
// page.  Job metadata (not the page pixels) stays queryable after
// completion; pages are identified by the SHA-256 hash of their pixel data.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use scanwerk_core::error::{Result, ScanwerkError};

/// Something that turns a page image into text.
///
/// The real implementation is the feature-gated OCR engine; tests inject
/// stand-ins.
pub trait Recognizer: Send + 'static {
    fn recognize(&self, page: &DynamicImage) -> Result<String>;
}

/// Lifecycle of one queued page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Metadata of one recognition job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrJob {
    pub id: Uuid,
    /// Caller-supplied page label, e.g. "page-3".
    pub page_name: String,
    /// SHA-256 hex digest of the page's pixel bytes.
    pub page_hash: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Recognized text, present once `Completed`.
    pub text: Option<String>,
    /// Failure detail, present once `Failed`.
    pub error: Option<String>,
}

struct QueueInner {
    /// All jobs ever submitted, in submission order.
    jobs: Mutex<Vec<OcrJob>>,
    /// Pages waiting for the worker.
    backlog: Mutex<VecDeque<(Uuid, DynamicImage)>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
}

impl QueueInner {
    fn update_job(&self, id: Uuid, f: impl FnOnce(&mut OcrJob)) {
        let mut jobs = self.jobs.lock().expect("job list lock poisoned");
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            f(job);
            job.updated_at = Utc::now();
        }
    }
}

/// FIFO queue of pages awaiting recognition, worked by one background
/// thread.
///
/// Dropping the queue finishes the backlog before the worker exits.
pub struct OcrJobQueue {
    inner: Arc<QueueInner>,
    worker: Option<JoinHandle<()>>,
}

impl OcrJobQueue {
    /// Spawn the worker thread around `recognizer`.
    pub fn new(recognizer: impl Recognizer) -> Result<Self> {
        let inner = Arc::new(QueueInner {
            jobs: Mutex::new(Vec::new()),
            backlog: Mutex::new(VecDeque::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("scanwerk-ocr".to_owned())
            .spawn(move || worker_loop(worker_inner, recognizer))
            .map_err(|e| {
                ScanwerkError::Ocr(format!(
                    "failed to spawn OCR worker: {e}"
                ))
            })?;

        Ok(Self {
            inner,
            worker: Some(worker),
        })
    }

    /// Queue a page for recognition and return its job id.
    pub fn submit(&self, page_name: &str, page: DynamicImage) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let job = OcrJob {
            id,
            page_name: page_name.to_owned(),
            page_hash: page_digest(&page),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            text: None,
            error: None,
        };
        debug!(job_id = %id, page = page_name, "OCR job submitted");

        self.inner
            .jobs
            .lock()
            .expect("job list lock poisoned")
            .push(job);
        self.inner
            .backlog
            .lock()
            .expect("backlog lock poisoned")
            .push_back((id, page));
        self.inner.wakeup.notify_one();
        id
    }

    /// Snapshot of one job's metadata.
    pub fn job(&self, id: Uuid) -> Option<OcrJob> {
        self.inner
            .jobs
            .lock()
            .expect("job list lock poisoned")
            .iter()
            .find(|j| j.id == id)
            .cloned()
    }

    /// Snapshot of every job, in submission order.
    pub fn jobs(&self) -> Vec<OcrJob> {
        self.inner
            .jobs
            .lock()
            .expect("job list lock poisoned")
            .clone()
    }

    /// Whether the worker has nothing queued or in progress.
    pub fn is_idle(&self) -> bool {
        let backlog_empty = self
            .inner
            .backlog
            .lock()
            .expect("backlog lock poisoned")
            .is_empty();
        backlog_empty
            && !self
                .jobs()
                .iter()
                .any(|j| j.status == JobStatus::Processing)
    }

    /// Finish the backlog and stop the worker.
    pub fn join(mut self) -> Result<()> {
        self.stop_worker()
    }

    fn stop_worker(&mut self) -> Result<()> {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wakeup.notify_all();
        if let Some(handle) = self.worker.take() {
            handle.join().map_err(|_| {
                ScanwerkError::Ocr("OCR worker panicked".into())
            })?;
        }
        Ok(())
    }
}

impl Drop for OcrJobQueue {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(err) = self.stop_worker() {
                warn!(error = %err, "OCR worker shutdown failed");
            }
        }
    }
}

fn worker_loop(inner: Arc<QueueInner>, recognizer: impl Recognizer) {
    loop {
        let task = {
            let mut backlog = inner.backlog.lock().expect("backlog lock poisoned");
            loop {
                if let Some(task) = backlog.pop_front() {
                    break Some(task);
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                backlog = inner
                    .wakeup
                    .wait(backlog)
                    .expect("backlog lock poisoned");
            }
        };
        let Some((id, page)) = task else {
            debug!("OCR worker stopped");
            return;
        };

        inner.update_job(id, |job| job.status = JobStatus::Processing);
        match recognizer.recognize(&page) {
            Ok(text) => {
                info!(job_id = %id, chars = text.len(), "OCR job completed");
                inner.update_job(id, |job| {
                    job.status = JobStatus::Completed;
                    job.text = Some(text);
                });
            }
            Err(err) => {
                warn!(job_id = %id, error = %err, "OCR job failed");
                inner.update_job(id, |job| {
                    job.status = JobStatus::Failed;
                    job.error = Some(err.to_string());
                });
            }
        }
    }
}

/// SHA-256 hex digest of a page's raw pixel bytes.
fn page_digest(page: &DynamicImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(page.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;
    use std::time::Duration;

    struct SizeRecognizer;

    impl Recognizer for SizeRecognizer {
        fn recognize(&self, page: &DynamicImage) -> Result<String> {
            Ok(format!("{}x{}", page.width(), page.height()))
        }
    }

    struct FailingRecognizer;

    impl Recognizer for FailingRecognizer {
        fn recognize(&self, _page: &DynamicImage) -> Result<String> {
            Err(ScanwerkError::Ocr(
                "model exploded".into(),
            ))
        }
    }

    fn page(w: u32, h: u32, fill: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(w, h, image::Luma([fill])))
    }

    fn wait_for(queue: &OcrJobQueue, id: Uuid, status: JobStatus) -> OcrJob {
        for _ in 0..5000 {
            let job = queue.job(id).expect("job exists");
            if job.status == status {
                return job;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("job never reached {status:?}");
    }

    #[test]
    fn job_completes_with_recognized_text() {
        let queue = OcrJobQueue::new(SizeRecognizer).expect("spawn queue");
        let id = queue.submit("page-1", page(40, 30, 128));

        let job = wait_for(&queue, id, JobStatus::Completed);
        assert_eq!(job.text.as_deref(), Some("40x30"));
        assert!(job.error.is_none());
        assert_eq!(job.page_hash.len(), 64);
        assert!(job.updated_at >= job.created_at);
        queue.join().expect("join");
    }

    #[test]
    fn failure_is_recorded_on_the_job() {
        let queue = OcrJobQueue::new(FailingRecognizer).expect("spawn queue");
        let id = queue.submit("page-1", page(10, 10, 0));

        let job = wait_for(&queue, id, JobStatus::Failed);
        assert!(job.text.is_none());
        assert!(job.error.as_deref().expect("error text").contains("model exploded"));
        queue.join().expect("join");
    }

    #[test]
    fn jobs_keep_submission_order_and_all_complete() {
        let queue = OcrJobQueue::new(SizeRecognizer).expect("spawn queue");
        let ids: Vec<Uuid> = (1..=5)
            .map(|i| queue.submit(&format!("page-{i}"), page(i, i, 7)))
            .collect();

        for &id in &ids {
            wait_for(&queue, id, JobStatus::Completed);
        }
        let jobs = queue.jobs();
        assert_eq!(jobs.len(), 5);
        for (i, job) in jobs.iter().enumerate() {
            assert_eq!(job.id, ids[i]);
            assert_eq!(job.page_name, format!("page-{}", i + 1));
        }
        assert!(queue.is_idle());
        queue.join().expect("join");
    }

    #[test]
    fn join_drains_the_backlog_first() {
        use std::sync::atomic::AtomicUsize;

        struct CountingRecognizer(Arc<AtomicUsize>);

        impl Recognizer for CountingRecognizer {
            fn recognize(&self, _page: &DynamicImage) -> Result<String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(String::new())
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let queue =
            OcrJobQueue::new(CountingRecognizer(Arc::clone(&count))).expect("spawn queue");
        for i in 0..10 {
            queue.submit(&format!("page-{i}"), page(8, 8, i));
        }
        queue.join().expect("join");

        // Every queued page was recognized before the worker stopped.
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn identical_pages_share_a_hash() {
        let a = page_digest(&page(16, 16, 42));
        let b = page_digest(&page(16, 16, 42));
        let c = page_digest(&page(16, 16, 43));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
