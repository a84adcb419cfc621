//! Response observer fan-out (C9): global + per-stimulation listeners, run
//! in parallel and awaited before descendants are enqueued.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use crate::error::{Error, Result};
use crate::signal::Signal;

/// One hop of a stimulation's trace, handed to every registered observer.
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub stimulation_id: String,
    pub hop_index: usize,
    pub neuron_name: String,
    pub input_collateral_name: String,
    pub input_signal: Signal,
    pub output_signal: Option<Signal>,
    pub queue_length: usize,
    pub duration: Duration,
    pub error: Option<String>,
}

/// A sink for response records. Implemented with `#[async_trait]` so
/// observers may suspend (e.g. to ship a record over a websocket) without
/// the scheduler needing to know the difference between sync and async
/// observers — Rust's `Future` already resolves synchronous bodies without
/// a real suspension, so "purely synchronous observers introduce no
/// microtask turn" (§4.9, P-sync) holds by construction once the observer
/// is written as `async fn on_response(...) { ... }` with no `.await`
/// inside that actually yields.
#[async_trait]
pub trait ResponseObserver: Send + Sync {
    async fn on_response(&self, record: ResponseRecord) -> Result<()>;
}

type ObserverFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

struct FnObserver<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ResponseObserver for FnObserver<F>
where
    F: Fn(ResponseRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn on_response(&self, record: ResponseRecord) -> Result<()> {
        (self.f)(record).await
    }
}

/// Adapt a closure into a [`ResponseObserver`].
pub fn observer<F, Fut>(f: F) -> std::sync::Arc<dyn ResponseObserver>
where
    F: Fn(ResponseRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    std::sync::Arc::new(FnObserver { f })
}

#[allow(dead_code)]
pub(crate) fn boxed_observer_future<Fut>(fut: Fut) -> ObserverFuture
where
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::pin(fut)
}

/// Invoke every observer in `listeners` against `record` concurrently,
/// awaiting all of them (never short-circuiting) before returning. The
/// first error encountered, if any, is what the caller should latch as the
/// stimulation's failure — but every listener still ran (§4.9).
pub(crate) async fn fan_out(
    listeners: &[std::sync::Arc<dyn ResponseObserver>],
    record: ResponseRecord,
) -> Result<()> {
    if listeners.is_empty() {
        return Ok(());
    }
    let futures = listeners.iter().map(|listener| {
        let record = record.clone();
        async move { listener.on_response(record).await }
    });
    let results = join_all(futures).await;
    for result in results {
        if let Err(err) = result {
            return Err(Error::Observer(err.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::{sleep, Duration as TokioDuration};

    fn sample_record() -> ResponseRecord {
        ResponseRecord {
            stimulation_id: "s1".into(),
            hop_index: 0,
            neuron_name: "n1".into(),
            input_collateral_name: "in".into(),
            input_signal: Signal::new("in", serde_json::json!(null)),
            output_signal: None,
            queue_length: 0,
            duration: Duration::from_millis(0),
            error: None,
        }
    }

    #[tokio::test]
    async fn all_observers_run_even_if_one_errors() {
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&count);
        let ok_observer = observer(move |_record| {
            let c = Arc::clone(&c1);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let c2 = Arc::clone(&count);
        let failing_observer = observer(move |_record| {
            let c = Arc::clone(&c2);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("local-fail").into())
            }
        });

        let listeners: Vec<Arc<dyn ResponseObserver>> = vec![ok_observer, failing_observer];
        let result = fan_out(&listeners, sample_record()).await;
        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn observers_run_in_parallel_not_in_series() {
        let delay = TokioDuration::from_millis(30);
        let make = || {
            observer(move |_record| async move {
                sleep(delay).await;
                Ok(())
            })
        };
        let listeners: Vec<Arc<dyn ResponseObserver>> = vec![make(), make(), make()];
        let start = std::time::Instant::now();
        fan_out(&listeners, sample_record()).await.unwrap();
        assert!(start.elapsed() < delay * 3);
    }
}
