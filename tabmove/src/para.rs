use std::{
    io,
    panic::{self, AssertUnwindSafe},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tqdm::Iter;
use tracing::{error, info, warn};

/// A unit of parallel work with per-thread state.
///
/// `init` runs once on every pool thread before it takes inputs, so each
/// thread owns its own state and nothing mutable is shared between them.
pub trait Worker: Sync {
    type In: Send;
    type Out: Send;
    type State;

    fn init(&self) -> io::Result<Self::State>;

    fn proc(&self, state: &Self::State, input: Self::In) -> Option<Self::Out>;
}

/// Runs `worker` on every input over `n_threads` scoped threads and returns
/// the outputs in completion order.
///
/// Inputs whose `proc` returns `None` or panics are dropped; a panic is
/// logged and the thread moves on to its next input.
pub fn para_run<W, I>(worker: &W, in_v: I, n_threads: usize) -> Vec<W::Out>
where
    W: Worker,
    I: Iterator<Item = W::In>,
{
    let n_threads = n_threads.max(1);
    let capacity = n_threads * 100;

    let (sender, r) = bounded::<Option<W::In>>(capacity);
    let (out_sender, out_r) = unbounded();

    std::thread::scope(|s| {
        for _ in 0..n_threads {
            let in_clone = r.clone();
            let out_clone = out_sender.clone();
            s.spawn(move || subf(worker, in_clone, out_clone));
        }
        drop(r);
        drop(out_sender);

        for e in in_v {
            if sender.send(Some(e)).is_err() {
                warn!("no live workers left, remaining inputs dropped");
                break;
            }
        }
        for _ in 0..n_threads {
            let _ = sender.send(None);
        }
    });
    out_r.into_iter().collect()
}

fn subf<W: Worker>(worker: &W, r: Receiver<Option<W::In>>, out: Sender<W::Out>) {
    let state = match worker.init() {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "worker failed to initialize");
            return;
        }
    };
    while let Ok(Some(input)) = r.recv() {
        match panic::catch_unwind(AssertUnwindSafe(|| worker.proc(&state, input))) {
            Ok(Some(o)) => {
                let _ = out.send(o);
            }
            Ok(None) => {}
            Err(_) => error!("worker panicked on an input, continuing"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkReport {
    pub index: usize,
    pub total: usize,
    pub inputs: usize,
    pub outputs: usize,
    pub elapsed: Duration,
}

/// Splits the inputs into a few chunks and runs a fresh pool per chunk.
///
/// Chunks are strictly sequential: every thread of a chunk has returned and
/// dropped its state before the next chunk's threads initialize.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedPool {
    n_threads: usize,
    n_chunks: usize,
    min_chunk: usize,
}

impl ChunkedPool {
    pub fn new(n_threads: usize, n_chunks: usize) -> Self {
        Self {
            n_threads: n_threads.max(1),
            n_chunks: n_chunks.max(1),
            min_chunk: 1,
        }
    }

    pub fn with_min_chunk(mut self, min_chunk: usize) -> Self {
        self.min_chunk = min_chunk.max(1);
        self
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    pub fn chunk_size(&self, n_items: usize) -> usize {
        n_items.div_ceil(self.n_chunks).max(self.min_chunk)
    }

    pub fn run<W, F>(&self, worker: &W, inputs: Vec<W::In>, mut on_chunk: F) -> io::Result<()>
    where
        W: Worker,
        F: FnMut(&ChunkReport, Vec<W::Out>) -> io::Result<()>,
    {
        let size = self.chunk_size(inputs.len());
        let mut chunks: Vec<Vec<W::In>> = Vec::new();
        let mut it = inputs.into_iter().peekable();
        while it.peek().is_some() {
            chunks.push(it.by_ref().take(size).collect());
        }
        let total = chunks.len();
        for (index, chunk) in chunks.into_iter().enumerate().tqdm().desc(Some("chunks")) {
            let start = Instant::now();
            let n_in = chunk.len();
            let outputs = para_run(worker, chunk.into_iter(), self.n_threads);
            let report = ChunkReport {
                index,
                total,
                inputs: n_in,
                outputs: outputs.len(),
                elapsed: start.elapsed(),
            };
            info!(
                chunk = index + 1,
                of = total,
                inputs = n_in,
                outputs = report.outputs,
                secs = report.elapsed.as_secs_f64(),
                "chunk done"
            );
            on_chunk(&report, outputs)?;
        }
        Ok(())
    }
}

/// Pool size that leaves most of the machine free: each thread holds its own
/// copy of the input tables.
pub fn conservative_threads(fraction: f64, max: usize) -> usize {
    let available: usize = std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1);
    ((available as f64 * fraction) as usize).clamp(1, max.max(1))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Squarer {
        inits: AtomicUsize,
    }

    impl Worker for Squarer {
        type In = u32;
        type Out = u32;
        type State = u32;

        fn init(&self) -> io::Result<u32> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }

        fn proc(&self, offset: &u32, input: u32) -> Option<u32> {
            if input == 13 {
                return None;
            }
            if input == 17 {
                panic!("unlucky");
            }
            Some(input * input + offset - 1)
        }
    }

    #[test]
    fn para_collects_all_but_failures() {
        let w = Squarer {
            inits: AtomicUsize::new(0),
        };
        let mut out = para_run(&w, 0..30, 3);
        out.sort();
        assert_eq!(out.len(), 28);
        assert!(!out.contains(&169));
        assert!(!out.contains(&289));
        assert_eq!(w.inits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn chunks_run_sequentially_with_fresh_state() {
        let w = Squarer {
            inits: AtomicUsize::new(0),
        };
        let pool = ChunkedPool::new(2, 4);
        assert_eq!(pool.chunk_size(10), 3);
        let mut seen = Vec::new();
        let mut reports = Vec::new();
        pool.run(&w, (0..10).collect(), |rep, outs| {
            reports.push(rep.clone());
            seen.extend(outs);
            Ok(())
        })
        .unwrap();
        assert_eq!(reports.len(), 4);
        assert_eq!(reports.iter().map(|r| r.inputs).sum::<usize>(), 10);
        assert_eq!(w.inits.load(Ordering::SeqCst), 8);
        seen.sort();
        assert_eq!(seen, (0..10).map(|x| x * x).collect::<Vec<u32>>());
    }

    #[test]
    fn min_chunk_caps_chunk_count() {
        let pool = ChunkedPool::new(1, 20).with_min_chunk(10);
        assert_eq!(pool.chunk_size(25), 10);
        assert_eq!(pool.chunk_size(1000), 50);
    }

    struct Broken;

    impl Worker for Broken {
        type In = u8;
        type Out = u8;
        type State = ();

        fn init(&self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no table"))
        }

        fn proc(&self, _: &(), input: u8) -> Option<u8> {
            Some(input)
        }
    }

    #[test]
    fn failed_init_does_not_hang() {
        let out = para_run(&Broken, 0..250u8, 2);
        assert!(out.is_empty());
    }
}
