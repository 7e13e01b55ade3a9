//! `ThreadedObject`: an owned worker thread running a private,
//! single-threaded event loop. Base substrate for [`crate::heartbeat::Heartbeat`]
//! and [`crate::proxy::Proxy`].
//!
//! Rust has no virtual-method inheritance, so the upstream `thread_start`/
//! `thread_stop` hooks become plain closures supplied at construction, and
//! "subclass" state lives behind the object's own mutex rather than in a
//! private struct only the base class can see.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::oneshot;

/// A worker thread driving its own single-threaded Tokio runtime, with
/// `state: T` guarded by a mutex any "subclass" logic running on that loop
/// (or observing it from outside) can lock.
pub struct ThreadedObject<T> {
    state: Arc<Mutex<T>>,
    runtime_handle: tokio::runtime::Handle,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
    worker_thread_id: ThreadId,
}

impl<T: Send + 'static> ThreadedObject<T> {
    /// Spawn the worker thread, block until its event loop is running, and
    /// return the handle. `thread_start`/`thread_stop` run on the worker
    /// thread itself, at loop entry and loop exit respectively.
    pub fn spawn<Start, Stop>(state: T, thread_start: Start, thread_stop: Stop) -> Self
    where
        Start: FnOnce(tokio::runtime::Handle, Arc<Mutex<T>>) + Send + 'static,
        Stop: FnOnce(Arc<Mutex<T>>) + Send + 'static,
    {
        let state = Arc::new(Mutex::new(state));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let thread_state = state.clone();
        let join_handle = thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build private event loop for ThreadedObject");
            let handle = rt.handle().clone();

            thread_start(handle.clone(), thread_state.clone());
            let _ = ready_tx.send(handle);

            rt.block_on(async {
                let _ = shutdown_rx.await;
            });

            thread_stop(thread_state);
        });

        let runtime_handle = ready_rx
            .recv()
            .expect("worker thread died before signalling ready");

        Self {
            state,
            runtime_handle,
            shutdown_tx: Some(shutdown_tx),
            worker_thread_id: join_handle.thread().id(),
            join_handle: Some(join_handle),
        }
    }

    /// Lock the object's guarded state.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock().unwrap()
    }

    pub fn state_handle(&self) -> Arc<Mutex<T>> {
        self.state.clone()
    }

    /// The private event loop's runtime handle, for spawning further tasks
    /// onto it from outside.
    pub fn runtime_handle(&self) -> &tokio::runtime::Handle {
        &self.runtime_handle
    }
}

impl<T> Drop for ThreadedObject<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if thread::current().id() == self.worker_thread_id {
            // Dropped from within our own worker thread (e.g. a callback
            // tearing down its own ThreadedObject): joining here would
            // deadlock, so just detach.
            return;
        }
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}
