//! Single-value rendezvous between a worker thread and the thread waiting on its result.

use std::sync::{Arc, Condvar, Mutex};

pub fn channel<T>() -> (OneshotSender<T>, OneshotReceiver<T>) {
    let cell = Arc::new(OneshotCell {
        state: Mutex::new(State::Pending),
        condvar: Condvar::new(),
    });
    (OneshotSender(Some(cell.clone())), OneshotReceiver(cell))
}

pub struct OneshotSender<T>(Option<Arc<OneshotCell<T>>>);

impl<T> OneshotSender<T> {
    /// Publishes the value. Returns it back if the value was already published.
    pub fn send(mut self, value: T) -> Result<(), T> {
        let cell = self.0.take().expect("sender used once");
        let res = {
            let mut state = cell.state.lock().expect("oneshot lock");
            match *state {
                State::Pending => {
                    *state = State::Ready(value);
                    Ok(())
                }
                _ => Err(value),
            }
        };
        cell.condvar.notify_all();
        res
    }
}

impl<T> Drop for OneshotSender<T> {
    fn drop(&mut self) {
        if let Some(cell) = self.0.take() {
            let mut state = cell.state.lock().expect("oneshot lock");
            if matches!(*state, State::Pending) {
                *state = State::Closed;
            }
            drop(state);
            cell.condvar.notify_all();
        }
    }
}

pub struct OneshotReceiver<T>(Arc<OneshotCell<T>>);

impl<T> OneshotReceiver<T> {
    /// Blocks until the value arrives. `None` if the sender was dropped without sending.
    pub fn recv(self) -> Option<T> {
        let mut state = self.0.state.lock().expect("oneshot lock");
        loop {
            match std::mem::replace(&mut *state, State::Closed) {
                State::Ready(value) => return Some(value),
                State::Closed => return None,
                State::Pending => {
                    *state = State::Pending;
                    state = self.0.condvar.wait(state).expect("oneshot wait");
                }
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            *self.0.state.lock().expect("oneshot lock"),
            State::Pending
        )
    }
}

struct OneshotCell<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
}

enum State<T> {
    Pending,
    Ready(T),
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_then_recv() {
        let (tx, rx) = channel();
        assert!(rx.is_pending());
        tx.send(5).unwrap();
        assert_eq!(rx.recv(), Some(5));
    }

    #[test]
    fn test_recv_across_threads() {
        let (tx, rx) = channel();
        let t = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            tx.send("done").unwrap();
        });
        assert_eq!(rx.recv(), Some("done"));
        t.join().unwrap();
    }

    #[test]
    fn test_dropped_sender_closes() {
        let (tx, rx) = channel::<u32>();
        drop(tx);
        assert_eq!(rx.recv(), None);
    }
}
