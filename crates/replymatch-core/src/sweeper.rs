use std::sync::{Arc, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{debug, trace};

use crate::registry::MatchRegistry;

/// Background thread that periodically expires overdue entries.
///
/// The thread only holds a weak reference, so it winds down on its own once
/// the registry is dropped. Dropping the `Sweeper` stops it immediately.
pub struct Sweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Start sweeping at the registry's configured interval.
    pub fn spawn<Q, R>(registry: &Arc<MatchRegistry<Q, R>>) -> std::io::Result<Self>
    where
        Q: Send + Sync + 'static,
        R: Send + 'static,
    {
        let interval = registry.config().sweep_interval;
        Self::spawn_with_interval(registry, interval)
    }

    /// The one sweeper for `registry`, started on first call.
    ///
    /// Every caller gets a handle to the same thread, which stops once the
    /// last handle is dropped. A later call starts a fresh one.
    pub fn shared<Q, R>(registry: &Arc<MatchRegistry<Q, R>>) -> std::io::Result<Arc<Self>>
    where
        Q: Send + Sync + 'static,
        R: Send + 'static,
    {
        let mut slot = registry
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(sweeper) = slot.upgrade() {
            return Ok(sweeper);
        }
        let sweeper = Arc::new(Self::spawn(registry)?);
        *slot = Arc::downgrade(&sweeper);
        Ok(sweeper)
    }

    pub fn spawn_with_interval<Q, R>(
        registry: &Arc<MatchRegistry<Q, R>>,
        interval: Duration,
    ) -> std::io::Result<Self>
    where
        Q: Send + Sync + 'static,
        R: Send + 'static,
    {
        let registry = Arc::downgrade(registry);
        let (stop, stopped) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("replymatch-sweeper".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !sweep_once(&registry) {
                            trace!("registry dropped, sweeper exiting");
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        debug!(interval_ms = interval.as_millis() as u64, "expiry sweeper started");
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the channel and wakes the thread.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

/// Returns `false` once the registry is gone.
fn sweep_once<Q, R>(registry: &Weak<MatchRegistry<Q, R>>) -> bool {
    let Some(registry) = registry.upgrade() else {
        return false;
    };
    let expired = registry.expire_due(Instant::now());
    if expired > 0 {
        debug!(expired, "swept expired pending requests");
    }
    true
}

/// Tokio flavour of [`Sweeper`]: expires overdue entries every `interval`
/// until the registry is dropped or the returned task is aborted.
#[cfg(feature = "async")]
pub fn spawn_expiry_task<Q, R>(
    registry: &Arc<MatchRegistry<Q, R>>,
    interval: Duration,
) -> tokio::task::JoinHandle<()>
where
    Q: Send + Sync + 'static,
    R: Send + 'static,
{
    let registry = Arc::downgrade(registry);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if !sweep_once(&registry) {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::completion;
    use crate::error::MatchError;
    use crate::registry::RegistryConfig;
    use crate::session::SessionId;

    fn registry() -> Arc<MatchRegistry<u32, u32>> {
        Arc::new(MatchRegistry::with_config(RegistryConfig {
            sweep_interval: Duration::from_millis(10),
            ..RegistryConfig::default()
        }))
    }

    #[test]
    fn unanswered_request_times_out_and_leaves_no_trace() {
        let registry = registry();
        let _sweeper = Sweeper::spawn(&registry).unwrap();
        let session = SessionId::next();
        let timeout = Duration::from_millis(100);

        let started = Instant::now();
        let (completer, waiting) = completion();
        registry.add(session, 1, timeout, completer).unwrap();

        let outcome = waiting
            .wait_timeout(Duration::from_secs(5))
            .expect("sweeper should expire the entry");
        assert_eq!(outcome, Err(MatchError::Timeout(timeout)));
        assert!(started.elapsed() >= timeout);
        assert_eq!(registry.pending(session), 0);
        assert!(!registry.any_pending(session, |req| *req == 1));
    }

    #[test]
    fn answered_request_is_not_expired_later() {
        let registry = registry();
        let _sweeper = Sweeper::spawn(&registry).unwrap();
        let session = SessionId::next();

        let (completer, waiting) = completion();
        registry
            .add(session, 1, Duration::from_millis(30), completer)
            .unwrap();
        assert!(registry.match_response(session, &10, |_, _| true));

        thread::sleep(Duration::from_millis(80));
        assert_eq!(waiting.wait(), Ok(10));
        assert_eq!(registry.stats().expired.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[test]
    fn stop_joins_thread() {
        let registry = registry();
        let sweeper = Sweeper::spawn_with_interval(&registry, Duration::from_secs(3600)).unwrap();
        let started = Instant::now();
        sweeper.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn thread_exits_after_registry_drop() {
        let registry = registry();
        let sweeper = Sweeper::spawn(&registry).unwrap();
        drop(registry);
        thread::sleep(Duration::from_millis(50));
        assert!(sweeper.handle.as_ref().is_some_and(|h| h.is_finished()));
    }

    #[test]
    fn shared_sweeper_is_one_thread_per_registry() {
        let elsewhere = registry();
        let registry = registry();
        let first = Sweeper::shared(&registry).unwrap();
        let second = Sweeper::shared(&registry).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = Sweeper::shared(&elsewhere).unwrap();
        assert!(!Arc::ptr_eq(&first, &other));

        drop(first);
        drop(second);
        let restarted = Sweeper::shared(&registry).unwrap();
        assert!(restarted.handle.as_ref().is_some_and(|h| !h.is_finished()));

        let session = SessionId::next();
        let (completer, waiting) = completion();
        registry
            .add(session, 1, Duration::from_millis(20), completer)
            .unwrap();
        let outcome = waiting
            .wait_timeout(Duration::from_secs(5))
            .expect("restarted sweeper should expire the entry");
        assert_eq!(outcome, Err(MatchError::Timeout(Duration::from_millis(20))));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn tokio_task_expires_entries() {
        let registry = registry();
        let task = spawn_expiry_task(&registry, Duration::from_millis(10));
        let session = SessionId::next();

        let (completer, waiting) = completion();
        registry
            .add(session, 5, Duration::from_millis(20), completer)
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .expect("entry should expire in time");
        assert_eq!(outcome, Err(MatchError::Timeout(Duration::from_millis(20))));

        drop(registry);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("task should stop once registry is gone")
            .unwrap();
    }
}
