//! Blocking bridge between the synchronous certificate hook and async
//! authenticators.
//!
//! rustls calls the client certificate verifier synchronously, in the middle
//! of `process_new_packets`. Authenticators are async and may talk to the
//! network. [`AuthBridge`] runs every authenticator future on its own
//! multi-thread runtime and parks the handshake thread until the answer is in.
//!
//! # Ceiling
//!
//! At most `max_inflight` futures run at once. Further handshakes keep their
//! thread blocked until a permit frees up or `timeout` elapses. When the
//! handshake runs on a multi-thread tokio worker the wait is wrapped in
//! `block_in_place`, so the worker's other tasks are moved elsewhere while it
//! waits.
//!
//! # Cancellation
//!
//! If the waiting side disappears (connection torn down), the spawned future
//! still runs to completion and its result is dropped.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, mpsc};
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Dedicated runtime plus concurrency limit for authenticator calls.
#[derive(Debug)]
pub struct AuthBridge {
    runtime: Option<Runtime>,
    handle: Handle,
    permits: Arc<Semaphore>,
    max_inflight: usize,
    timeout: Duration,
}

impl AuthBridge {
    /// Start the bridge runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for zero workers / permits and `Error::Io` if
    /// the runtime cannot be started.
    pub fn new(worker_threads: usize, max_inflight: usize, timeout: Duration) -> Result<Self> {
        if worker_threads == 0 {
            return Err(Error::Config("auth worker_threads must be > 0".to_string()));
        }
        if max_inflight == 0 {
            return Err(Error::Config("auth max_inflight must be > 0".to_string()));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("auth-bridge")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        debug!(worker_threads, max_inflight, ?timeout, "Authentication bridge started");

        Ok(Self {
            runtime: Some(runtime),
            handle,
            permits: Arc::new(Semaphore::new(max_inflight)),
            max_inflight,
            timeout,
        })
    }

    /// Upper bound on concurrently running authenticator futures.
    #[must_use]
    pub fn max_inflight(&self) -> usize {
        self.max_inflight
    }

    /// Deadline applied to each call, permit wait included.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of calls currently holding a permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_inflight - self.permits.available_permits()
    }

    /// Run `future` on the bridge runtime and block until it resolves.
    ///
    /// # Errors
    ///
    /// - `Error::AuthenticationTimeout` if the deadline passes
    /// - `Error::Authentication` if the future panicked
    pub fn run<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_within(self.timeout, future)
    }

    /// [`run`](Self::run) with an explicit deadline instead of the bridge's.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub fn run_within<F, T>(&self, timeout: Duration, future: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let permits = Arc::clone(&self.permits);

        self.handle.spawn(async move {
            let guarded = async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Internal("authentication bridge closed".to_string()))?;
                AssertUnwindSafe(future)
                    .catch_unwind()
                    .await
                    .map_err(|_| Error::Authentication("authenticator panicked".to_string()))
            };

            let result = tokio::time::timeout(timeout, guarded)
                .await
                .unwrap_or(Err(Error::AuthenticationTimeout(timeout)));

            // The receiver is gone when the handshake was abandoned.
            if tx.send(result).is_err() {
                debug!("Authentication finished after its handshake went away");
            }
        });

        let wait = move || {
            rx.recv().unwrap_or_else(|_| {
                warn!("Authentication task ended without reporting");
                Err(Error::Internal(
                    "authentication task ended without a result".to_string(),
                ))
            })
        };

        match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(wait)
            }
            _ => wait(),
        }
    }
}

impl Drop for AuthBridge {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which panics inside async contexts.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
