use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicUsize, Ordering},
        mpsc::{self, Receiver, Sender},
    },
    thread,
};

use crate::{join_handle::JoinHandle, oneshot};

type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads fed from a shared FIFO queue.
///
/// Worker threads exit once every clone of the pool has been dropped and the queue
/// is drained.
#[derive(Clone)]
pub struct ThreadPool {
    tx: Sender<TaskFn>,
    num_threads: usize,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> Self {
        Self::with_thread_name(num_threads, |_| String::new())
    }

    pub fn with_thread_name(num_threads: usize, thread_name: impl Fn(usize) -> String) -> Self {
        assert_ne!(num_threads, 0);

        let (tx, rx) = mpsc::channel::<TaskFn>();
        let rx = Arc::new(Mutex::new(rx));
        for i in 0..num_threads {
            let rx = rx.clone();
            let mut builder = thread::Builder::new();
            let name = thread_name(i);
            if !name.is_empty() {
                builder = builder.name(name);
            }
            builder
                .spawn(move || Self::thread_fn(rx))
                .expect("spawn thread");
        }

        ThreadPool { tx, num_threads }
    }

    pub fn configure_global_pool_size(pool_size: usize) {
        GLOBAL_POOL_SIZE.store(pool_size.max(1), Ordering::SeqCst);
    }

    pub fn global() -> &'static ThreadPool {
        static POOL: OnceLock<ThreadPool> = OnceLock::new();
        POOL.get_or_init(|| {
            ThreadPool::with_thread_name(Self::get_global_pool_size(), |i| {
                format!("strata-worker-{i}")
            })
        })
    }

    pub fn with_default_threads() -> Self {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8);
        Self::new(num_threads)
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn spawn<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx_result, rx_result) = oneshot::channel::<std::thread::Result<R>>();
        self.spawn_detached(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(f));
            // The receiver may be gone if the caller stopped waiting.
            let _ = tx_result.send(result);
        });
        JoinHandle::new(rx_result)
    }

    pub fn spawn_detached<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Box::new(f))
            .expect("must have listening worker threads");
    }

    fn get_global_pool_size() -> usize {
        let size = GLOBAL_POOL_SIZE.load(Ordering::SeqCst);
        if size == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(8)
        } else {
            size
        }
    }

    fn thread_fn(rx: Arc<Mutex<Receiver<TaskFn>>>) {
        loop {
            let task = {
                let rx = match rx.lock() {
                    Ok(rx) => rx,
                    Err(_) => return,
                };
                rx.recv()
            };
            match task {
                Ok(task) => task(),
                Err(_) => return,
            }
        }
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::with_default_threads()
    }
}

static GLOBAL_POOL_SIZE: AtomicUsize = AtomicUsize::new(0);
