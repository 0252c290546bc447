use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use cask_protocol::event::LaunchEvent;
use cask_protocol::ids::ContextIndex;
use tokio::sync::broadcast;

use crate::envelope::LaunchEventEnvelope;

pub const DEFAULT_CONTEXT_BUFFER_CAPACITY: usize = 64;
pub const DEFAULT_GLOBAL_BUFFER_CAPACITY: usize = 512;

pub type LaunchContextSubscription = broadcast::Receiver<LaunchEventEnvelope>;
pub type LaunchGlobalSubscription = broadcast::Receiver<LaunchEventEnvelope>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchEventBusConfig {
    pub context_buffer_capacity: usize,
    pub global_buffer_capacity: usize,
}

impl Default for LaunchEventBusConfig {
    fn default() -> Self {
        Self {
            context_buffer_capacity: DEFAULT_CONTEXT_BUFFER_CAPACITY,
            global_buffer_capacity: DEFAULT_GLOBAL_BUFFER_CAPACITY,
        }
    }
}

#[derive(Debug)]
pub struct LaunchEventBus {
    next_sequence: AtomicU64,
    boot_instant: Instant,
    config: LaunchEventBusConfig,
    context_senders: RwLock<HashMap<ContextIndex, broadcast::Sender<LaunchEventEnvelope>>>,
    global_sender: broadcast::Sender<LaunchEventEnvelope>,
}

impl Default for LaunchEventBus {
    fn default() -> Self {
        Self::new(LaunchEventBusConfig::default())
    }
}

impl LaunchEventBus {
    pub fn new(config: LaunchEventBusConfig) -> Self {
        assert!(
            config.context_buffer_capacity > 0,
            "context_buffer_capacity must be greater than 0"
        );
        assert!(
            config.global_buffer_capacity > 0,
            "global_buffer_capacity must be greater than 0"
        );

        let (global_sender, _global_receiver) = broadcast::channel(config.global_buffer_capacity);
        Self {
            next_sequence: AtomicU64::new(0),
            boot_instant: Instant::now(),
            config,
            context_senders: RwLock::new(HashMap::new()),
            global_sender,
        }
    }

    pub fn subscribe_context(&self, context_index: ContextIndex) -> LaunchContextSubscription {
        if let Some(sender) = self.context_sender(context_index) {
            return sender.subscribe();
        }

        let mut context_senders = self
            .context_senders
            .write()
            .expect("launch eventbus context sender lock poisoned");
        let sender = context_senders.entry(context_index).or_insert_with(|| {
            let (sender, _receiver) = broadcast::channel(self.config.context_buffer_capacity);
            sender
        });
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> LaunchGlobalSubscription {
        self.global_sender.subscribe()
    }

    pub fn remove_context(&self, context_index: ContextIndex) -> bool {
        let mut context_senders = self
            .context_senders
            .write()
            .expect("launch eventbus context sender lock poisoned");
        context_senders.remove(&context_index).is_some()
    }

    pub fn publish(&self, context_index: ContextIndex, event: LaunchEvent) -> LaunchEventEnvelope {
        let envelope = LaunchEventEnvelope {
            context_index,
            sequence: self.next_sequence(),
            received_at_monotonic_nanos: self.monotonic_nanos_since_bus_bootstrap(),
            event,
        };

        let context_sender = self.context_sender(context_index);
        let has_context_receivers = context_sender
            .as_ref()
            .is_some_and(|sender| sender.receiver_count() > 0);
        if has_context_receivers {
            let _ = context_sender
                .as_ref()
                .expect("context sender should exist when receiver count is non-zero")
                .send(envelope);
        }
        if self.global_sender.receiver_count() > 0 {
            let _ = self.global_sender.send(envelope);
        }

        envelope
    }

    fn context_sender(
        &self,
        context_index: ContextIndex,
    ) -> Option<broadcast::Sender<LaunchEventEnvelope>> {
        let context_senders = self
            .context_senders
            .read()
            .expect("launch eventbus context sender lock poisoned");
        context_senders.get(&context_index).cloned()
    }

    fn next_sequence(&self) -> u64 {
        let mut current = self.next_sequence.load(Ordering::Relaxed);
        loop {
            let next = current
                .checked_add(1)
                .expect("launch event sequence exhausted");
            match self.next_sequence.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    fn monotonic_nanos_since_bus_bootstrap(&self) -> u64 {
        let nanos = self.boot_instant.elapsed().as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cask_protocol::event::LaunchEvent;
    use cask_protocol::ids::ContextIndex;
    use cask_protocol::session::SessionSlot;
    use tokio::sync::broadcast::error::RecvError;
    use tokio::time::timeout;

    use super::{LaunchEventBus, LaunchEventBusConfig};

    const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    fn exited(slot: SessionSlot) -> LaunchEvent {
        LaunchEvent::Exited { slot, code: 0 }
    }

    #[test]
    #[should_panic(expected = "launch event sequence exhausted")]
    fn publish_panics_when_sequence_space_is_exhausted() {
        let bus = LaunchEventBus::default();
        bus.next_sequence
            .store(u64::MAX, std::sync::atomic::Ordering::Relaxed);

        let _ = bus.publish(ContextIndex::new(0), LaunchEvent::Starting);
    }

    #[test]
    fn publish_allocates_monotonic_sequence_numbers() {
        let bus = LaunchEventBus::default();
        let context = ContextIndex::new(0);

        let first = bus.publish(context, LaunchEvent::Starting);
        let second = bus.publish(context, exited(SessionSlot::OneTime));

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(second.received_at_monotonic_nanos >= first.received_at_monotonic_nanos);
    }

    #[tokio::test]
    async fn publish_fans_out_to_context_and_global_subscribers() {
        let bus = LaunchEventBus::default();
        let context = ContextIndex::new(3);
        let mut context_subscriber = bus.subscribe_context(context);
        let mut global_subscriber = bus.subscribe_all();

        let published = bus.publish(context, LaunchEvent::ProtonStarted);

        let context_envelope = timeout(TEST_TIMEOUT, context_subscriber.recv())
            .await
            .expect("context recv timed out")
            .expect("context recv should succeed");
        let global_envelope = timeout(TEST_TIMEOUT, global_subscriber.recv())
            .await
            .expect("global recv timed out")
            .expect("global recv should succeed");

        assert_eq!(context_envelope, published);
        assert_eq!(global_envelope, published);
    }

    #[tokio::test]
    async fn context_subscriptions_only_receive_matching_context_events() {
        let bus = LaunchEventBus::default();
        let context_a = ContextIndex::new(0);
        let context_b = ContextIndex::new(1);
        let mut subscriber_a = bus.subscribe_context(context_a);
        let mut subscriber_b = bus.subscribe_context(context_b);

        let event_a = bus.publish(context_a, exited(SessionSlot::Shortcut(0)));
        let event_b = bus.publish(context_b, exited(SessionSlot::Shortcut(1)));

        let received_a = timeout(TEST_TIMEOUT, subscriber_a.recv())
            .await
            .expect("context a recv timed out")
            .expect("context a recv should succeed");
        let received_b = timeout(TEST_TIMEOUT, subscriber_b.recv())
            .await
            .expect("context b recv timed out")
            .expect("context b recv should succeed");

        assert_eq!(received_a, event_a);
        assert_eq!(received_b, event_b);
    }

    #[tokio::test]
    async fn bounded_queue_reports_lag_for_slow_global_subscriber() {
        let bus = LaunchEventBus::new(LaunchEventBusConfig {
            context_buffer_capacity: 1,
            global_buffer_capacity: 1,
        });
        let context = ContextIndex::new(0);
        let mut global_subscriber = bus.subscribe_all();

        for _ in 0..8 {
            let _ = bus.publish(context, LaunchEvent::Updated);
        }

        let lagged = timeout(TEST_TIMEOUT, global_subscriber.recv())
            .await
            .expect("global recv timed out")
            .expect_err("expected lagged receiver due bounded buffer");

        match lagged {
            RecvError::Lagged(skipped) => assert!(skipped >= 1),
            RecvError::Closed => panic!("global channel unexpectedly closed"),
        }
    }

    #[tokio::test]
    async fn remove_context_closes_existing_context_subscribers() {
        let bus = LaunchEventBus::default();
        let context = ContextIndex::new(5);
        let mut context_subscriber = bus.subscribe_context(context);

        assert!(bus.remove_context(context));
        assert!(!bus.remove_context(context));

        let closed = timeout(TEST_TIMEOUT, context_subscriber.recv())
            .await
            .expect("context recv timed out")
            .expect_err("context subscription should close after remove_context");
        assert!(matches!(closed, RecvError::Closed));
    }
}
