//! Paced, cancellable subscription streams.
//!
//! A subscription is a pull-driven producer: the next tick is only awaited
//! when the consumer asks for the next event, so a slow consumer holds the
//! producer back instead of piling events up. Closing the handle (or
//! dropping it, which is what a client disconnect amounts to) cancels the
//! producer and nothing is delivered afterwards.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use async_graphql_value::ConstValue;
use futures::stream::BoxStream;
use futures::{Future, Stream};
use futures_util::StreamExt;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::response::FieldError;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_LIMIT: u64 = 10;

/// Cadence and length of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub interval: Duration,
    /// `None` keeps the stream open until it is cancelled.
    pub limit: Option<u64>,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            limit: Some(DEFAULT_LIMIT),
        }
    }
}

impl Pacing {
    pub fn bounded(interval: Duration, limit: u64) -> Self {
        Self {
            interval,
            limit: Some(limit),
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            limit: None,
        }
    }
}

/// One firing of the pacing timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub seq: u64,
    /// Monotonic time since the subscription was opened.
    pub elapsed: Duration,
    pub at: SystemTime,
}

/// What a producer hands back for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub data: ConstValue,
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub seq: u64,
    pub elapsed: Duration,
    pub data: ConstValue,
    pub errors: Vec<FieldError>,
}

type EventStream = BoxStream<'static, Result<Event, FieldError>>;

/// A live subscription. Yields events in emission order; an `Err` item is
/// terminal.
pub struct SubscriptionHandle {
    stream: Option<EventStream>,
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub fn open<P, Fut>(pacing: Pacing, mut producer: P) -> Self
    where
        P: FnMut(Tick) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Emission, FieldError>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let stream = async_stream::stream! {
            let started = Instant::now();
            let mut timer = tokio::time::interval_at(started + pacing.interval, pacing.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut seq = 0u64;
            while pacing.limit.map_or(true, |limit| seq < limit) {
                let fired = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => false,
                    _ = timer.tick() => true,
                };
                if !fired {
                    break;
                }

                let tick = Tick {
                    seq,
                    elapsed: started.elapsed(),
                    at: SystemTime::now(),
                };
                let produced = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => None,
                    produced = producer(tick) => Some(produced),
                };

                match produced {
                    None => break,
                    Some(Ok(emission)) => {
                        yield Ok(Event {
                            seq,
                            elapsed: tick.elapsed,
                            data: emission.data,
                            errors: emission.errors,
                        });
                    }
                    Some(Err(err)) => {
                        yield Err(err);
                        break;
                    }
                }
                seq += 1;
            }

            tracing::debug!(events = seq, cancelled = cancelled.is_cancelled(), "subscription finished");
        };

        Self {
            stream: Some(stream.boxed()),
            token,
        }
    }

    /// A token that cancels this subscription from elsewhere, e.g. from the
    /// task watching the client connection.
    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stops production and releases the timer right away.
    pub fn close(&mut self) {
        self.token.cancel();
        self.stream = None;
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.stream.is_none()
    }
}

impl Stream for SubscriptionHandle {
    type Item = Result<Event, FieldError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.token.is_cancelled() {
            self.stream = None;
            return Poll::Ready(None);
        }

        let Some(stream) = self.stream.as_mut() else {
            return Poll::Ready(None);
        };

        match stream.poll_next_unpin(cx) {
            Poll::Ready(None) => {
                self.stream = None;
                Poll::Ready(None)
            }
            // checked again: cancellation may have raced with this item
            Poll::Ready(Some(_)) if self.token.is_cancelled() => {
                self.stream = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::response::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(calls: Arc<AtomicUsize>) -> impl FnMut(Tick) -> futures::future::Ready<Result<Emission, FieldError>> {
        move |tick| {
            calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(Emission {
                data: ConstValue::Number(tick.seq.into()),
                errors: vec![],
            }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_subscription_completes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = SubscriptionHandle::open(
            Pacing::bounded(Duration::from_secs(1), 10),
            counting(calls.clone()),
        );

        let events: Vec<Event> = handle.map(|e| e.unwrap()).collect().await;

        assert_eq!(events.len(), 10);
        assert_eq!(
            events.iter().map(|e| e.seq).collect::<Vec<_>>(),
            (0..10).collect::<Vec<_>>()
        );
        assert!(events.windows(2).all(|w| w[0].elapsed < w[1].elapsed));
        assert!(events[0].elapsed >= Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_delivery() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handle = SubscriptionHandle::open(
            Pacing::unbounded(Duration::from_millis(100)),
            counting(calls.clone()),
        );

        for _ in 0..3 {
            assert!(handle.next().await.is_some());
        }
        handle.close();
        assert!(handle.is_closed());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.next().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancellation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handle = SubscriptionHandle::open(
            Pacing::unbounded(Duration::from_millis(100)),
            counting(calls.clone()),
        );
        let token = handle.cancellation();

        assert!(handle.next().await.is_some());
        token.cancel();

        assert!(handle.next().await.is_none());
        assert!(handle.next().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_consumer_is_not_buffered_ahead() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handle = SubscriptionHandle::open(
            Pacing::unbounded(Duration::from_millis(10)),
            counting(calls.clone()),
        );

        assert!(handle.next().await.is_some());
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let next = handle.next().await.unwrap().unwrap();
        assert_eq!(next.seq, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_producer_error_is_terminal() {
        let handle = SubscriptionHandle::open(
            Pacing::unbounded(Duration::from_millis(10)),
            |tick: Tick| async move {
                if tick.seq == 2 {
                    Err(FieldError::new(
                        Path::root().field("greetings"),
                        &Error::validation("boom"),
                    ))
                } else {
                    Ok(Emission {
                        data: ConstValue::Null,
                        errors: vec![],
                    })
                }
            },
        );

        let items: Vec<_> = handle.collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok() && items[1].is_ok());
        assert_eq!(items[2].as_ref().unwrap_err().message, "Invalid input: boom");
    }
}
