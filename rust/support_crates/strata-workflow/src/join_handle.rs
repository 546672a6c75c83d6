use crate::oneshot::OneshotReceiver;

/// Handle to the result of a task spawned on a [`ThreadPool`](crate::thread_pool::ThreadPool).
pub struct JoinHandle<R>(OneshotReceiver<std::thread::Result<R>>);

impl<R> JoinHandle<R> {
    pub(crate) fn new(rx: OneshotReceiver<std::thread::Result<R>>) -> JoinHandle<R> {
        JoinHandle(rx)
    }

    pub fn is_ready(&self) -> bool {
        !self.0.is_pending()
    }

    /// Waits for the task. A panic inside the task is resumed on the joining thread.
    pub fn join(self) -> R {
        match self.0.recv().expect("worker dropped the task result") {
            Ok(value) => value,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    pub fn join_all(handles: impl IntoIterator<Item = JoinHandle<R>>) -> Vec<R> {
        handles.into_iter().map(|h| h.join()).collect()
    }
}
