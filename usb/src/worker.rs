use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Cooperative stop flag shared between a background loop and its owner.
#[derive(Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let _guard = self.lock.lock();
        self.stopped.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Sleeps for up to `timeout`, waking early when triggered. Returns whether the stop has
    /// been triggered.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut guard = self.lock.lock();
        self.condvar
            .wait_while_for(&mut guard, |_| !self.is_triggered(), timeout);
        self.is_triggered()
    }
}

/// A named OS thread running one long-lived loop.
pub struct Worker {
    stop: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
    done: Receiver<()>,
}

impl Worker {
    pub fn spawn<F>(name: &str, task: F) -> std::io::Result<Self>
    where
        F: FnOnce(Arc<StopSignal>) + Send + 'static,
    {
        let stop = Arc::new(StopSignal::new());
        let (done_sender, done) = mpsc::channel();

        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                task(thread_stop);
                let _ = done_sender.send(());
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
            done,
        })
    }

    pub fn stop(&self) {
        self.stop.trigger();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_triggered()
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    pub fn is_current(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
    }

    /// Waits up to `timeout` for the thread to exit and reports whether it did. A worker
    /// can't wait for itself, so this returns false immediately when called from the
    /// worker's own thread.
    pub fn join(&mut self, timeout: Duration) -> bool {
        if self.is_current() {
            return false;
        }

        match self.done.recv_timeout(timeout) {
            // A disconnected channel means the task panicked or has already been joined.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn stops_and_joins() {
        let passes = Arc::new(AtomicUsize::new(0));
        let counter = passes.clone();
        let mut worker = Worker::spawn("test-worker", move |stop| loop {
            counter.fetch_add(1, Ordering::Relaxed);
            if stop.wait(Duration::from_millis(5)) {
                break;
            }
        })
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        worker.stop();
        assert!(worker.join(Duration::from_secs(5)));
        assert!(worker.is_finished());
        assert!(passes.load(Ordering::Relaxed) > 0);

        // Joining again is harmless.
        assert!(worker.join(Duration::from_millis(1)));
    }

    #[test]
    fn join_times_out_on_a_busy_thread() {
        let release = Arc::new(StopSignal::new());
        let gate = release.clone();
        let mut worker = Worker::spawn("busy-worker", move |_| {
            gate.wait(Duration::from_secs(10));
        })
        .unwrap();

        worker.stop();
        assert!(!worker.join(Duration::from_millis(20)));

        release.trigger();
        assert!(worker.join(Duration::from_secs(5)));
    }

    #[test]
    fn wait_returns_early_when_triggered() {
        let signal = Arc::new(StopSignal::new());
        let trigger = signal.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            trigger.trigger();
        });

        assert!(signal.wait(Duration::from_secs(10)));
        assert!(signal.is_triggered());
    }
}
