//! Fetch-and-pack pipeline that runs off the render thread.
//!
//! The render thread submits [`Job`]s and later polls [`Reply`]s; the two sides
//! share nothing but the channels. Bitmaps move through the reply channel by
//! value, so pixel data is never copied between threads.

use std::cell::Cell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use crate::api::{ApiLayout, BulkImageRequest, ImageMeta, ImageSource, LayoutRequest, StaticAtlas};
use crate::error::{MosaicError, Result};
use crate::texture_atlas::{pack_bitmaps, PackedAtlas};
use crate::timing::measure_time;

/// Correlates a reply with the state that requested it.
pub type Ticket = u64;

#[derive(Debug)]
pub enum Job {
    Metadata {
        ticket: Ticket,
        collection: String,
    },
    StaticAtlas {
        ticket: Ticket,
        collection: String,
    },
    /// Fetch and pack `request`, in slices of `batch_size`.
    BulkAtlas {
        ticket: Ticket,
        collection: String,
        request: Vec<BulkImageRequest>,
        batch_size: usize,
    },
    Layout {
        ticket: Ticket,
        collection: String,
        request: LayoutRequest,
    },
}

#[derive(Debug)]
pub enum Reply {
    Metadata {
        ticket: Ticket,
        result: Result<Vec<ImageMeta>>,
    },
    StaticAtlas {
        ticket: Ticket,
        result: Result<Vec<StaticAtlas>>,
    },
    /// One packed slice of a [`Job::BulkAtlas`].
    Atlas { ticket: Ticket, packed: PackedAtlas },
    /// Every slice of a [`Job::BulkAtlas`] has been answered.
    AtlasFinished { ticket: Ticket },
    Layout {
        ticket: Ticket,
        result: Result<ApiLayout>,
    },
}

enum Mode {
    Thread {
        jobs: Option<Sender<Job>>,
        handle: Option<JoinHandle<()>>,
    },
    /// Runs each job on the caller's thread at submission.
    Inline {
        source: Arc<dyn ImageSource>,
        replies: Sender<Reply>,
    },
}

pub struct AtlasWorker {
    mode: Mode,
    replies: Receiver<Reply>,
    timing_threshold_ms: f64,
    disconnected: Cell<bool>,
}

impl AtlasWorker {
    /// Starts the background worker thread.
    pub fn spawn(source: Arc<dyn ImageSource>, timing_threshold_ms: f64) -> Result<Self> {
        let (job_tx, job_rx) = unbounded::<Job>();
        let (reply_tx, reply_rx) = unbounded::<Reply>();

        let handle = thread::Builder::new()
            .name("mosaic-atlas-worker".into())
            .spawn(move || {
                for job in job_rx.iter() {
                    if !run_job(source.as_ref(), job, &reply_tx, timing_threshold_ms) {
                        break;
                    }
                }
                log::debug!("atlas worker exiting");
            })
            .map_err(|e| MosaicError::Worker(e.to_string()))?;

        Ok(Self {
            mode: Mode::Thread {
                jobs: Some(job_tx),
                handle: Some(handle),
            },
            replies: reply_rx,
            timing_threshold_ms,
            disconnected: Cell::new(false),
        })
    }

    /// A worker that executes jobs synchronously inside [`AtlasWorker::submit`].
    /// Replies are still delivered through [`AtlasWorker::try_recv`].
    pub fn inline(source: Arc<dyn ImageSource>, timing_threshold_ms: f64) -> Self {
        let (reply_tx, reply_rx) = unbounded::<Reply>();
        Self {
            mode: Mode::Inline {
                source,
                replies: reply_tx,
            },
            replies: reply_rx,
            timing_threshold_ms,
            disconnected: Cell::new(false),
        }
    }

    pub fn submit(&self, job: Job) -> Result<()> {
        match &self.mode {
            Mode::Thread { jobs, .. } => jobs
                .as_ref()
                .ok_or_else(|| MosaicError::Worker("worker stopped".into()))?
                .send(job)
                .map_err(|_| MosaicError::Worker("job channel closed".into())),
            Mode::Inline { source, replies } => {
                run_job(source.as_ref(), job, replies, self.timing_threshold_ms);
                Ok(())
            }
        }
    }

    pub fn try_recv(&self) -> Option<Reply> {
        match self.replies.try_recv() {
            Ok(reply) => Some(reply),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if !self.disconnected.replace(true) {
                    log::error!("atlas worker disconnected");
                }
                None
            }
        }
    }

    /// True once [`AtlasWorker::try_recv`] found the worker thread gone.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.get()
    }

    /// Blocks for at most `timeout` waiting for the next reply.
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<Reply> {
        self.replies.recv_timeout(timeout).ok()
    }

    /// Closes the job channel and joins the thread.
    pub fn stop(&mut self) {
        if let Mode::Thread { jobs, handle } = &mut self.mode {
            jobs.take();
            if let Some(handle) = handle.take() {
                if handle.join().is_err() {
                    log::error!("atlas worker panicked");
                }
            }
        }
    }
}

impl Drop for AtlasWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Executes one job. Returns false once the reply side has gone away.
fn run_job(
    source: &dyn ImageSource,
    job: Job,
    replies: &Sender<Reply>,
    timing_threshold_ms: f64,
) -> bool {
    match job {
        Job::Metadata { ticket, collection } => {
            let result = source.fetch_image_metadata(&collection);
            replies.send(Reply::Metadata { ticket, result }).is_ok()
        }
        Job::StaticAtlas { ticket, collection } => {
            let result = measure_time("static atlas", timing_threshold_ms, || {
                source.fetch_static_atlas(&collection)
            });
            replies.send(Reply::StaticAtlas { ticket, result }).is_ok()
        }
        Job::Layout {
            ticket,
            collection,
            request,
        } => {
            let result = source.fetch_layout(&collection, &request);
            replies.send(Reply::Layout { ticket, result }).is_ok()
        }
        Job::BulkAtlas {
            ticket,
            collection,
            request,
            batch_size,
        } => {
            for slice in request.chunks(batch_size.max(1)) {
                let Some(packed) = fetch_and_pack(source, &collection, slice, timing_threshold_ms)
                else {
                    continue;
                };
                if replies.send(Reply::Atlas { ticket, packed }).is_err() {
                    return false;
                }
            }
            replies.send(Reply::AtlasFinished { ticket }).is_ok()
        }
    }
}

fn fetch_and_pack(
    source: &dyn ImageSource,
    collection: &str,
    slice: &[BulkImageRequest],
    timing_threshold_ms: f64,
) -> Option<PackedAtlas> {
    let bitmaps = measure_time("awaiting response", timing_threshold_ms, || {
        source.fetch_bulk_images(collection, slice)
    });
    let bitmaps = match bitmaps {
        Ok(bitmaps) => bitmaps,
        Err(e) => {
            log::warn!("bulk fetch of {} images failed: {e}", slice.len());
            return None;
        }
    };

    let images: Vec<_> = slice
        .iter()
        .zip(bitmaps)
        .filter_map(|(req, bitmap)| bitmap.map(|b| (req.id.clone(), b)))
        .collect();
    let missing = slice.len() - images.len();
    if missing > 0 {
        log::warn!("{missing} of {} requested images unavailable", slice.len());
    }

    let packed = measure_time("atlas gen", timing_threshold_ms, || pack_bitmaps(images));
    (!packed.is_empty()).then_some(packed)
}
