//! Emission cadence and early termination of a single outbound stream.
//!
//! [`produce`] paces a primary stream and races every emission against an
//! independently polled stop signal. A `true` on the signal ends the stream
//! normally; callers tell it apart from exhaustion through [`Raced::termination`].

use async_stream::stream;
use futures::stream::{BoxStream, Take};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a raced stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The primary stream ran out.
    Exhausted,
    /// The stop signal fired. Not an error.
    Cancelled,
}

/// Output of [`produce`].
pub struct Raced<T> {
    inner: BoxStream<'static, T>,
    termination: Arc<OnceLock<Termination>>,
}

impl<T> Raced<T> {
    /// How the stream ended, or `None` while it is still running.
    pub fn termination(&self) -> Option<Termination> {
        self.termination.get().copied()
    }
}

impl<T> Stream for Raced<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<T> std::fmt::Debug for Raced<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raced")
            .field("termination", &self.termination())
            .finish()
    }
}

/// Emit `primary` one element per `interval` until `cancel_signal` yields `true`.
///
/// The signal is polled by its own task from the first poll of the returned
/// stream, so a slow primary never delays noticing it. At every tick a stop
/// that has already arrived wins over the next primary element. A signal that
/// ends without ever yielding `true` leaves the primary running to its end.
pub fn produce<T, P, C>(primary: P, cancel_signal: C, interval: Duration) -> Raced<T>
where
    T: Send + 'static,
    P: Stream<Item = T> + Send + 'static,
    C: Stream<Item = bool> + Send + 'static,
{
    let termination = Arc::new(OnceLock::new());
    let record = Arc::clone(&termination);

    let inner = stream! {
        let stop = CancellationToken::new();
        // stops the watcher, and with it the signal, when we are dropped
        let _watcher = stop.clone().drop_guard();
        tokio::spawn(watch_signal(cancel_signal, stop.clone()));

        let mut primary = Box::pin(primary);
        let mut emitted = 0usize;

        let ended = loop {
            let stopped = tokio::select! {
                biased;
                _ = stop.cancelled() => true,
                _ = tokio::time::sleep(interval) => false,
            };
            if stopped {
                break Termination::Cancelled;
            }

            // let a signal that became ready on this same tick land first
            tokio::task::yield_now().await;
            if stop.is_cancelled() {
                break Termination::Cancelled;
            }

            let next = tokio::select! {
                biased;
                _ = stop.cancelled() => None,
                next = primary.next() => Some(next),
            };
            match next {
                None => break Termination::Cancelled,
                Some(None) => break Termination::Exhausted,
                Some(Some(item)) => {
                    emitted += 1;
                    yield item;
                }
            }
        };

        debug!(emitted, termination = ?ended, "Raced stream finished");
        let _ = record.set(ended);
    };

    Raced {
        inner: Box::pin(inner),
        termination,
    }
}

async fn watch_signal<C>(signal: C, stop: CancellationToken)
where
    C: Stream<Item = bool>,
{
    let mut signal = Box::pin(signal);
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            next = signal.next() => next,
        };
        match next {
            Some(true) => {
                stop.cancel();
                return;
            }
            Some(false) => {}
            None => return,
        }
    }
}

/// Truncate `stream` to at most `limit` elements.
pub fn bounded<S: Stream>(stream: S, limit: usize) -> Take<S> {
    stream.take(limit)
}

/// Delay every element of `stream` by `interval`.
pub fn paced<S>(stream: S, interval: Duration) -> impl Stream<Item = S::Item>
where
    S: Stream,
{
    stream! {
        let mut stream = Box::pin(stream);
        loop {
            tokio::time::sleep(interval).await;
            match stream.next().await {
                Some(item) => yield item,
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::time::Instant;

    const TICK: Duration = Duration::from_secs(1);

    /// Emits `false` for every tick before `k`, then `true` a little before tick `k`.
    fn stop_at_tick(k: u32) -> impl Stream<Item = bool> + Send + 'static {
        let lead = Duration::from_millis(10);
        stream::iter(1..=k).then(move |tick| async move {
            if tick == 1 {
                tokio::time::sleep(TICK - lead).await;
            } else {
                tokio::time::sleep(TICK).await;
            }
            tick == k
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_at_tick_k_emits_k_minus_one() {
        for k in [1, 2, 5, 10] {
            let mut raced = produce(stream::iter(1..=20u32), stop_at_tick(k), TICK);
            let mut items = Vec::new();
            while let Some(item) = raced.next().await {
                items.push(item);
            }

            let expected: Vec<u32> = (1..k).collect();
            assert_eq!(items, expected, "stop at tick {k}");
            assert_eq!(raced.termination(), Some(Termination::Cancelled));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_stop_emits_everything() {
        let signal = stream::iter(vec![false; 3]);
        let mut raced = produce(stream::iter(1..=5), signal, TICK);

        let mut items = Vec::new();
        while let Some(item) = raced.next().await {
            items.push(item);
        }
        assert_eq!(items, [1, 2, 3, 4, 5]);
        assert_eq!(raced.termination(), Some(Termination::Exhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_primary_is_exhausted() {
        let mut raced = produce(stream::iter(1..=3), stop_at_tick(8), TICK);

        let items: Vec<u32> = (&mut raced).collect().await;
        assert_eq!(items, [1, 2, 3]);
        assert_eq!(raced.termination(), Some(Termination::Exhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tie_favors_cancellation() {
        // signal and first tick become ready at the same instant
        let signal = stream::once(async {
            tokio::time::sleep(TICK).await;
            true
        });
        let mut raced = produce(stream::iter(1..=3), signal, TICK);

        assert_eq!(raced.next().await, None);
        assert_eq!(raced.termination(), Some(Termination::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emissions_are_spaced_by_interval() {
        let start = Instant::now();
        let mut raced = produce(stream::iter(1..=3), stream::pending(), TICK);

        while let Some(item) = raced.next().await {
            assert!(start.elapsed() >= TICK * item);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_errors_propagate_as_items() {
        let primary = stream::iter(vec![Ok(1), Err("boom"), Ok(2)]);
        let mut raced = produce(primary, stream::pending(), TICK);

        assert_eq!(raced.next().await, Some(Ok(1)));
        assert_eq!(raced.next().await, Some(Err("boom")));
        assert_eq!(raced.termination(), None);
    }

    #[tokio::test]
    async fn test_bounded_truncates_infinite_stream() {
        let items: Vec<u32> = bounded(stream::repeat(7), 4).collect().await;
        assert_eq!(items, [7, 7, 7, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_delays_each_element() {
        let start = Instant::now();
        let items: Vec<u32> = paced(stream::iter(1..=3), TICK).collect().await;

        assert_eq!(items, [1, 2, 3]);
        assert!(start.elapsed() >= TICK * 3);
    }
}
