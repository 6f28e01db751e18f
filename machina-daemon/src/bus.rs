//! The publish bus.
//!
//! One bus per agent process carries [`ChangeEvent`]s from every provider to
//! a single consumer, the store synchronizer. Delivery is a rendezvous: a
//! [`Publisher::publish`] call returns only after the consumer has taken the
//! event, so a slow consumer stalls producers at their next publish point and
//! nothing is ever buffered or dropped.
//!
//! Every publisher is bound to its provider's stop token. A stopped publisher
//! refuses new events and abandons the one it is blocked on, so closing a
//! provider also wakes it out of a stalled publish.

use std::fmt;

use machina_core::{ChangeEvent, Key};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::BusError;

struct Delivery {
    event: ChangeEvent,
    delivered: oneshot::Sender<()>,
}

/// Producer half. Cheap to clone; hand one to each component that publishes.
#[derive(Clone)]
pub struct Bus {
    tx: mpsc::Sender<Delivery>,
}

/// Consumer half. There is exactly one.
pub struct BusReceiver {
    rx: mpsc::Receiver<Delivery>,
}

impl Bus {
    /// Create the bus. Call once at agent start.
    pub fn new() -> (Bus, BusReceiver) {
        let (tx, rx) = mpsc::channel(1);
        (Bus { tx }, BusReceiver { rx })
    }

    /// A publisher that stops when `stop` is cancelled.
    pub fn publisher(&self, stop: CancellationToken) -> Publisher {
        Publisher {
            tx: self.tx.clone(),
            stop,
        }
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus").finish_non_exhaustive()
    }
}

impl BusReceiver {
    /// Take the next event, releasing its publisher.
    ///
    /// Returns `None` once every publisher and bus handle is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            let delivery = self.rx.recv().await?;
            // A publisher that gave up while queued no longer owns this slot.
            if delivery.delivered.send(()).is_ok() {
                return Some(delivery.event);
            }
        }
    }
}

#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<Delivery>,
    stop: CancellationToken,
}

impl Publisher {
    /// Publish `key: value`.
    pub async fn publish(
        &self,
        key: impl Into<Key>,
        value: impl fmt::Display,
    ) -> Result<(), BusError> {
        self.send(ChangeEvent::set(key, value)).await
    }

    /// Publish `delete: key`.
    pub async fn delete(&self, key: impl Into<Key>) -> Result<(), BusError> {
        self.send(ChangeEvent::delete(key)).await
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Send one event and wait until the consumer has received it.
    pub async fn send(&self, event: ChangeEvent) -> Result<(), BusError> {
        if self.stop.is_cancelled() {
            return Err(BusError::Stopped);
        }
        let (delivered_tx, delivered_rx) = oneshot::channel();
        let delivery = Delivery {
            event,
            delivered: delivered_tx,
        };
        let rendezvous = async {
            self.tx
                .send(delivery)
                .await
                .map_err(|_| BusError::Closed)?;
            delivered_rx.await.map_err(|_| BusError::Closed)
        };
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => Err(BusError::Stopped),
            result = rendezvous => result,
        }
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("stopped", &self.stop.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_then_recv_yields_exactly_that_event() {
        let (bus, mut rx) = Bus::new();
        let publisher = bus.publisher(CancellationToken::new());

        let send = tokio::spawn(async move { publisher.publish("machine", "bmc").await });
        let event = rx.recv().await.expect("event");
        assert_eq!(event, ChangeEvent::set("machine", "bmc"));
        send.await.expect("join").expect("publish");
    }

    #[tokio::test]
    async fn sequential_publishes_arrive_in_order() {
        let (bus, mut rx) = Bus::new();
        let publisher = bus.publisher(CancellationToken::new());

        let send = tokio::spawn(async move {
            for i in 0..5 {
                publisher.publish(format!("seq.{i}"), i).await?;
            }
            publisher.delete("seq.0").await
        });

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(rx.recv().await.expect("event").to_string());
        }
        send.await.expect("join").expect("publish");
        assert_eq!(
            seen,
            vec![
                "seq.0: 0",
                "seq.1: 1",
                "seq.2: 2",
                "seq.3: 3",
                "seq.4: 4",
                "delete: seq.0"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn publish_blocks_until_consumer_receives() {
        let (bus, mut rx) = Bus::new();
        let publisher = bus.publisher(CancellationToken::new());

        let mut send = tokio::spawn(async move { publisher.publish("k", "v").await });
        let pending = tokio::time::timeout(Duration::from_secs(1), &mut send).await;
        assert!(pending.is_err(), "publish must wait for the consumer");

        assert!(rx.recv().await.is_some());
        send.await.expect("join").expect("publish");
    }

    #[test]
    fn receiving_wakes_the_pending_publisher() {
        let (bus, mut rx) = Bus::new();
        let publisher = bus.publisher(CancellationToken::new());

        let mut publish = tokio_test::task::spawn(publisher.publish("k", "v"));
        tokio_test::assert_pending!(publish.poll());

        let mut recv = tokio_test::task::spawn(rx.recv());
        let event = tokio_test::assert_ready!(recv.poll());
        assert_eq!(event, Some(ChangeEvent::set("k", "v")));

        assert!(publish.is_woken());
        tokio_test::assert_ready_ok!(publish.poll());
    }

    #[tokio::test]
    async fn stop_wakes_a_blocked_publisher() {
        let (bus, _rx) = Bus::new();
        let stop = CancellationToken::new();
        let publisher = bus.publisher(stop.clone());

        let send = tokio::spawn(async move { publisher.publish("k", "v").await });
        tokio::task::yield_now().await;
        stop.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), send)
            .await
            .expect("publisher woke")
            .expect("join");
        assert_eq!(result, Err(BusError::Stopped));
    }

    #[tokio::test]
    async fn stopped_publisher_refuses_new_events() {
        let (bus, _rx) = Bus::new();
        let stop = CancellationToken::new();
        let publisher = bus.publisher(stop.clone());
        stop.cancel();

        assert!(publisher.is_stopped());
        assert_eq!(publisher.publish("k", "v").await, Err(BusError::Stopped));
    }

    #[tokio::test]
    async fn abandoned_delivery_is_skipped_by_consumer() {
        let (bus, mut rx) = Bus::new();
        let stop = CancellationToken::new();
        let quitter = bus.publisher(stop.clone());
        let steady = bus.publisher(CancellationToken::new());

        let abandoned = tokio::spawn(async move { quitter.publish("gone", 1).await });
        tokio::task::yield_now().await;
        stop.cancel();
        assert_eq!(abandoned.await.expect("join"), Err(BusError::Stopped));

        let kept = tokio::spawn(async move { steady.publish("kept", 2).await });
        let event = rx.recv().await.expect("event");
        assert_eq!(event, ChangeEvent::set("kept", 2));
        kept.await.expect("join").expect("publish");
    }

    #[tokio::test]
    async fn dropped_receiver_closes_the_bus() {
        let (bus, rx) = Bus::new();
        drop(rx);
        let publisher = bus.publisher(CancellationToken::new());
        assert_eq!(publisher.publish("k", "v").await, Err(BusError::Closed));
    }
}
