use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::bus::{EventBus, Subscription};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Generic event consumer loop.
///
/// - Subscribes to an event bus
/// - Applies an idempotent handler for each message
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct Worker;

impl Worker {
    /// Spawn a worker thread that processes events from the bus subscription.
    ///
    /// `handler` must be idempotent (at-least-once delivery safe).
    pub fn spawn<M, B, H, E>(name: &'static str, bus: B, mut handler: H) -> WorkerHandle
    where
        M: Send + 'static,
        B: EventBus<M> + Send + Sync + 'static,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, &mut handler))
            .expect("failed to spawn worker thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }

    /// Spawn a worker thread that runs `task` every `interval` until
    /// shutdown. Task failures are logged, not fatal.
    pub fn spawn_interval<F, E>(name: &'static str, interval: Duration, mut task: F) -> WorkerHandle
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            if let Err(err) = task() {
                                warn!(worker = name, error = ?err, "worker task failed");
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn worker thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: &mut H,
) where
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(250);

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = ?err, "worker handler failed");
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::in_memory_bus::InMemoryEventBus;

    #[test]
    fn worker_processes_until_shutdown() {
        let bus: Arc<InMemoryEventBus<u64>> = Arc::new(InMemoryEventBus::new());
        let seen = Arc::new(AtomicU64::new(0));

        let seen_in_worker = seen.clone();
        let handle = Worker::spawn("test-worker", bus.clone(), move |n: u64| {
            seen_in_worker.fetch_add(n, Ordering::SeqCst);
            Ok::<(), ()>(())
        });

        bus.publish(1).unwrap();
        bus.publish(2).unwrap();

        // Give the worker a moment to drain the channel.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while seen.load(Ordering::SeqCst) < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        handle.shutdown();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
