//! An in-process broker with topic routing, per-message expiry and
//! dead-lettering.
//!
//! It models the parts of an AMQP broker the backbone relies on closely
//! enough to exercise sessions and the controller without a server, and
//! records everything published and every settlement for assertions.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use courier_common::Envelope;
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::{
    sync::Notify,
    time::{Instant, error::Elapsed},
};

use crate::{
    broker::{Acknowledge, Broker, Delivery, DeliveryStream},
    config::TopologyConfig,
    error::BrokerError,
};

/// How a consumer settled a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Rejected { requeue: bool },
}

#[derive(Debug, Clone)]
pub struct Settlement {
    pub queue: String,
    pub envelope: Envelope,
    pub outcome: Outcome,
}

#[derive(Debug)]
struct Queued {
    envelope: Envelope,
    expires_at: Option<Instant>,
    redelivered: bool,
}

#[derive(Debug, Clone)]
struct DeadLetter {
    exchange: String,
    routing_key: String,
}

#[derive(Debug, Default)]
struct Queue {
    messages: VecDeque<Queued>,
    dead_letter: Option<DeadLetter>,
    notify: Arc<Notify>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BindingEntry {
    exchange: String,
    pattern: String,
    queue: String,
}

#[derive(Debug, Default)]
struct State {
    bindings: Vec<BindingEntry>,
    queues: HashMap<String, Queue>,
    published: Vec<Envelope>,
    settlements: Vec<Settlement>,
}

impl State {
    fn declare_queue(&mut self, name: &str, dead_letter: Option<DeadLetter>) {
        let queue = self.queues.entry(name.to_string()).or_default();
        if dead_letter.is_some() {
            queue.dead_letter = dead_letter;
        }
    }

    fn bind(&mut self, exchange: &str, pattern: &str, queue: &str) {
        let entry = BindingEntry {
            exchange: exchange.to_string(),
            pattern: pattern.to_string(),
            queue: queue.to_string(),
        };

        if !self.bindings.contains(&entry) {
            self.bindings.push(entry);
        }
    }

    /// Delivers `envelope` to every queue bound to its exchange with a
    /// matching pattern. Unroutable envelopes are dropped.
    fn route(&mut self, envelope: &Envelope, redelivered: bool) {
        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|binding| {
                binding.exchange == envelope.exchange
                    && topic_matches(&binding.pattern, &envelope.routing_key)
            })
            .map(|binding| binding.queue.clone())
            .collect();

        for target in targets {
            self.enqueue(&target, envelope.clone(), redelivered);
        }
    }

    fn enqueue(&mut self, queue: &str, envelope: Envelope, redelivered: bool) {
        if let Some(queue) = self.queues.get_mut(queue) {
            let expires_at = envelope.expiration.map(|ttl| Instant::now() + ttl);
            queue.messages.push_back(Queued {
                envelope,
                expires_at,
                redelivered,
            });
            queue.notify.notify_one();
        }
    }

    /// Removes expired messages, dead-lettering them where the queue says so.
    fn expire(&mut self, now: Instant) {
        let mut dead = Vec::new();

        for queue in self.queues.values_mut() {
            let (expired, live): (VecDeque<Queued>, VecDeque<Queued>) = queue
                .messages
                .drain(..)
                .partition(|queued| queued.expires_at.is_some_and(|at| at <= now));
            queue.messages = live;

            if let Some(dead_letter) = &queue.dead_letter {
                dead.extend(
                    expired
                        .into_iter()
                        .map(|queued| dead_lettered(queued.envelope, dead_letter)),
                );
            }
        }

        for envelope in dead {
            self.route(&envelope, false);
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.queues
            .values()
            .flat_map(|queue| queue.messages.iter().filter_map(|queued| queued.expires_at))
            .min()
    }
}

fn dead_lettered(mut envelope: Envelope, dead_letter: &DeadLetter) -> Envelope {
    envelope.exchange.clone_from(&dead_letter.exchange);
    envelope.routing_key.clone_from(&dead_letter.routing_key);
    envelope.expiration = None;
    envelope
}

/// Topic matching: words are separated by `.`, `*` matches exactly one word
/// and `#` matches zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.split_first(), key.split_first()) {
            (None, None) => true,
            (Some((&"#", rest)), _) => {
                matches(rest, key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some((&"*", rest)), Some((_, key_rest))) => matches(rest, key_rest),
            (Some((word, rest)), Some((key_word, key_rest))) => {
                word == key_word && matches(rest, key_rest)
            }
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    activity: Arc<Notify>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every envelope published, in order
    pub fn published(&self) -> Vec<Envelope> {
        self.state.lock().published.clone()
    }

    /// Every settled delivery, in order
    pub fn settlements(&self) -> Vec<Settlement> {
        self.state.lock().settlements.clone()
    }

    /// Number of messages waiting (not in flight) in `queue`
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |queue| queue.messages.len())
    }

    pub async fn wait_for_published(
        &self,
        expected: usize,
        timeout: Duration,
    ) -> Result<(), Elapsed> {
        self.wait_until(timeout, |state| state.published.len() >= expected)
            .await
    }

    pub async fn wait_for_settlements(
        &self,
        expected: usize,
        timeout: Duration,
    ) -> Result<(), Elapsed> {
        self.wait_until(timeout, |state| state.settlements.len() >= expected)
            .await
    }

    async fn wait_until<F>(&self, timeout: Duration, condition: F) -> Result<(), Elapsed>
    where
        F: Fn(&State) -> bool,
    {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.activity.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if condition(&self.state.lock()) {
                    return;
                }

                notified.await;
            }
        })
        .await
    }

    async fn next_delivery(&self, queue_name: &str) -> Result<Delivery, BrokerError> {
        loop {
            let (notify, wake_at) = {
                let mut state = self.state.lock();
                state.expire(Instant::now());

                let queue = state
                    .queues
                    .get_mut(queue_name)
                    .ok_or_else(|| BrokerError::UnknownQueue(queue_name.to_string()))?;

                if let Some(queued) = queue.messages.pop_front() {
                    let acker = MemoryAcker {
                        broker: self.clone(),
                        queue: queue_name.to_string(),
                        envelope: queued.envelope.clone(),
                    };
                    return Ok(Delivery::new(queued.envelope, queued.redelivered, acker));
                }

                let notify = Arc::clone(&queue.notify);
                (notify, state.next_expiry())
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        () = notify.notified() => {}
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notify.notified().await,
            }
        }
    }

    fn settle(&self, queue: &str, envelope: &Envelope, outcome: Outcome) {
        {
            let mut state = self.state.lock();

            if let Outcome::Rejected { requeue } = outcome {
                if requeue {
                    if let Some(target) = state.queues.get_mut(queue) {
                        target.messages.push_front(Queued {
                            envelope: envelope.clone(),
                            expires_at: None,
                            redelivered: true,
                        });
                        target.notify.notify_one();
                    }
                } else if let Some(dead_letter) = state
                    .queues
                    .get(queue)
                    .and_then(|target| target.dead_letter.clone())
                {
                    let envelope = dead_lettered(envelope.clone(), &dead_letter);
                    state.route(&envelope, false);
                }
            }

            state.settlements.push(Settlement {
                queue: queue.to_string(),
                envelope: envelope.clone(),
                outcome,
            });
        }

        self.activity.notify_waiters();
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare(&self, topology: &TopologyConfig) -> Result<(), BrokerError> {
        let mut state = self.state.lock();

        if let Some(queue) = &topology.queue {
            state.declare_queue(queue, None);
            for binding in &topology.bindings {
                state.bind(&binding.exchange, &binding.routing_key, queue);
            }
        }

        if let Some(retry) = &topology.retry {
            state.declare_queue(
                &retry.queue,
                Some(DeadLetter {
                    exchange: retry.exchange.clone(),
                    routing_key: retry.dead_letter_routing_key.clone(),
                }),
            );
            state.bind(&retry.exchange, &retry.binding_key, &retry.queue);
        }

        Ok(())
    }

    async fn publish(&self, envelope: &Envelope) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock();
            state.published.push(envelope.clone());
            state.route(envelope, false);
        }

        self.activity.notify_waiters();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        if !self.state.lock().queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }

        let deliveries = stream::unfold(
            (self.clone(), queue.to_string()),
            |(broker, queue)| async move {
                let delivery = broker.next_delivery(&queue).await;
                Some((delivery, (broker, queue)))
            },
        );

        Ok(deliveries.boxed())
    }
}

struct MemoryAcker {
    broker: MemoryBroker,
    queue: String,
    envelope: Envelope,
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.broker.settle(&self.queue, &self.envelope, Outcome::Acked);
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.broker
            .settle(&self.queue, &self.envelope, Outcome::Rejected { requeue });
        Ok(())
    }
}
