//! Sentence-parallel decoding.
//!
//! Each worker thread owns a private copy of the decoder and duplicates it
//! again for every job, so featurizer caches never cross sentences or
//! threads. Models reachable from the decoder are shared through `Arc`.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use mt_core::decoder::DecoderCore;
use mt_core::error::DecodeError;
use mt_core::nbest::NBestList;
use mt_core::phrase_table::ConcreteOption;
use mt_core::sequence::Sequence;
use tracing::{debug, debug_span, warn};

#[derive(Debug, thiserror::Error)]
pub enum ParallelError {
    #[error("failed to spawn decoding worker: {0}")]
    Spawn(#[from] io::Error),

    #[error("decoding workers are gone")]
    Disconnected,

    #[error("decoding sentence {translation_id}: {source}")]
    Decode {
        translation_id: usize,
        #[source]
        source: DecodeError,
    },

    #[error("sentence {translation_id} was invalidated before decoding")]
    Stale { translation_id: usize },
}

/// Why a submitted job produced no n-best list.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("dropped by invalidate before it started")]
    Stale,
}

struct DecodeWork {
    translation_id: usize,
    source: Sequence,
    options: Vec<ConcreteOption>,
    generation: u64,
}

/// Every submitted job yields exactly one of these.
pub struct DecodeResult {
    pub translation_id: usize,
    pub nbest: Result<NBestList, JobError>,
}

pub struct ParallelDecoder {
    work_tx: Option<mpsc::Sender<DecodeWork>>,
    result_rx: Mutex<mpsc::Receiver<DecodeResult>>,
    generation: Arc<AtomicU64>,
    workers: Vec<JoinHandle<()>>,
}

impl ParallelDecoder {
    /// Spawn `threads` workers (at least one), each with its own duplicate
    /// of `template`.
    pub fn new(template: &DecoderCore, threads: usize) -> Result<Self, ParallelError> {
        let generation = Arc::new(AtomicU64::new(0));
        let (work_tx, work_rx) = mpsc::channel::<DecodeWork>();
        let (result_tx, result_rx) = mpsc::channel::<DecodeResult>();
        let work_rx = Arc::new(Mutex::new(work_rx));

        let mut workers = Vec::new();
        for i in 0..threads.max(1) {
            let core = template.duplicate();
            let rx = Arc::clone(&work_rx);
            let tx = result_tx.clone();
            let gen = Arc::clone(&generation);
            let handle = thread::Builder::new()
                .name(format!("mt-decode-{i}"))
                .spawn(move || decode_worker(rx, tx, gen, core))?;
            workers.push(handle);
        }
        debug!(threads = workers.len(), "parallel decoder started");

        Ok(Self {
            work_tx: Some(work_tx),
            result_rx: Mutex::new(result_rx),
            generation,
            workers,
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    pub fn submit(
        &self,
        translation_id: usize,
        source: Sequence,
        options: Vec<ConcreteOption>,
    ) -> Result<(), ParallelError> {
        let tx = self.work_tx.as_ref().ok_or(ParallelError::Disconnected)?;
        tx.send(DecodeWork {
            translation_id,
            source,
            options,
            generation: self.generation.load(Ordering::SeqCst),
        })
        .map_err(|_| ParallelError::Disconnected)
    }

    /// Jobs submitted before this call and not yet started are skipped and
    /// reported as `JobError::Stale`.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Block until the next result arrives; `None` once every worker has
    /// exited.
    pub fn recv(&self) -> Option<DecodeResult> {
        let rx = self.result_rx.lock().ok()?;
        rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<DecodeResult> {
        let rx = self.result_rx.lock().ok()?;
        rx.try_recv().ok()
    }

    /// Decode every sentence; lists come back in submission order with
    /// translation ids `0..sentences.len()`. All results are collected even
    /// after a failure, so none linger for the next call; the first failure
    /// is returned.
    pub fn decode_all(
        &self,
        sentences: Vec<(Sequence, Vec<ConcreteOption>)>,
    ) -> Result<Vec<NBestList>, ParallelError> {
        let count = sentences.len();
        for (id, (source, options)) in sentences.into_iter().enumerate() {
            self.submit(id, source, options)?;
        }
        let mut lists: Vec<Option<NBestList>> = (0..count).map(|_| None).collect();
        let mut failure = None;
        for _ in 0..count {
            let result = self.recv().ok_or(ParallelError::Disconnected)?;
            let translation_id = result.translation_id;
            match result.nbest {
                Ok(list) => {
                    if let Some(slot) = lists.get_mut(translation_id) {
                        *slot = Some(list);
                    }
                }
                Err(e) => {
                    let e = match e {
                        JobError::Decode(source) => ParallelError::Decode {
                            translation_id,
                            source,
                        },
                        JobError::Stale => ParallelError::Stale { translation_id },
                    };
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        lists
            .into_iter()
            .map(|l| l.ok_or(ParallelError::Disconnected))
            .collect()
    }
}

impl Drop for ParallelDecoder {
    fn drop(&mut self) {
        // closing the work channel ends every worker loop
        self.work_tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("decoding worker panicked");
            }
        }
    }
}

fn decode_worker(
    rx: Arc<Mutex<mpsc::Receiver<DecodeWork>>>,
    tx: mpsc::Sender<DecodeResult>,
    gen: Arc<AtomicU64>,
    template: DecoderCore,
) {
    loop {
        let work = {
            let Ok(rx) = rx.lock() else { return };
            match rx.recv() {
                Ok(work) => work,
                Err(_) => return,
            }
        };

        let nbest = if work.generation != gen.load(Ordering::SeqCst) {
            debug!(translation_id = work.translation_id, "stale job dropped");
            Err(JobError::Stale)
        } else {
            let _span = debug_span!("decode_job", translation_id = work.translation_id).entered();
            let mut core = template.duplicate();
            core.decode(work.translation_id, work.source, work.options)
                .map_err(JobError::from)
        };
        if tx
            .send(DecodeResult {
                translation_id: work.translation_id,
                nbest,
            })
            .is_err()
        {
            return;
        }
    }
}
