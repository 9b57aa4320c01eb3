//! A broker that lives inside the process.
//!
//! Topics are split into a fixed number of partitions, keyed messages go to
//! the partition picked by hashing the key, and consumer groups keep a
//! committed offset per partition. Used by the test suites and for running
//! the sessions without a cluster.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::info;
use tokio::sync::Notify;

use crate::{
    ConnectionError, ConsumerConnection, ConsumerConnector, Delivery, IncomingMessage,
    OutgoingMessage, ProducerConnection, ProducerConnector, PublishError, ReceiveError,
};

#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    partitions: i32,
    state: Mutex<State>,
    appended: Notify,
}

#[derive(Default)]
struct State {
    reachable: bool,
    topics: HashMap<String, Vec<Vec<IncomingMessage>>>,
    committed: HashMap<(String, String, i32), i64>,
    unkeyed: u64,
    connects: usize,
    disconnects: usize,
}

/// Connect and disconnect counts since the broker was created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connects: usize,
    pub disconnects: usize,
}

impl MemoryBroker {
    pub fn new(partitions: i32) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                state: Mutex::new(State {
                    reachable: true,
                    ..State::default()
                }),
                appended: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    pub fn stats(&self) -> ConnectionStats {
        let state = self.state();
        ConnectionStats {
            connects: state.connects,
            disconnects: state.disconnects,
        }
    }

    /// Every message of `topic`, partition by partition in offset order.
    pub fn messages(&self, topic: &str) -> Vec<IncomingMessage> {
        self.state()
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn producer_connector(&self) -> MemoryProducerConnector {
        MemoryProducerConnector {
            broker: self.clone(),
        }
    }

    pub fn consumer_connector(&self, group: &str, from_beginning: bool) -> MemoryConsumerConnector {
        MemoryConsumerConnector {
            broker: self.clone(),
            group: group.to_string(),
            from_beginning,
        }
    }

    fn partition_for(&self, state: &mut State, key: Option<&[u8]>) -> i32 {
        let slot = match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                hasher.finish()
            }
            None => {
                state.unkeyed += 1;
                state.unkeyed
            }
        };
        (slot % self.inner.partitions as u64) as i32
    }

    fn append(&self, message: OutgoingMessage) -> Delivery {
        let delivery = {
            let mut state = self.state();
            let partition = self.partition_for(&mut state, message.key.as_deref());
            let partitions = self.inner.partitions as usize;
            let log = &mut state
                .topics
                .entry(message.topic.clone())
                .or_insert_with(|| vec![Vec::new(); partitions])[partition as usize];
            let offset = log.len() as i64;
            log.push(IncomingMessage {
                topic: message.topic,
                partition,
                offset,
                key: message.key,
                value: Some(message.value),
                headers: message
                    .headers
                    .into_iter()
                    .map(|(key, value)| (key, Some(value.into_bytes())))
                    .collect(),
            });
            Delivery { partition, offset }
        };
        self.inner.appended.notify_waiters();
        delivery
    }

    fn open(&self) -> Result<(), ConnectionError> {
        let mut state = self.state();
        if !state.reachable {
            return Err(ConnectionError::Unreachable("memory broker offline".into()));
        }
        state.connects += 1;
        Ok(())
    }

    fn close(&self) {
        self.state().disconnects += 1;
    }
}

pub struct MemoryProducerConnector {
    broker: MemoryBroker,
}

pub struct MemoryProducerConnection {
    broker: MemoryBroker,
}

#[async_trait]
impl ProducerConnector for MemoryProducerConnector {
    type Connection = MemoryProducerConnection;

    async fn connect(&self) -> Result<MemoryProducerConnection, ConnectionError> {
        info!("Connecting producer...");
        self.broker.open()?;
        info!("Producer connected");
        Ok(MemoryProducerConnection {
            broker: self.broker.clone(),
        })
    }
}

#[async_trait]
impl ProducerConnection for MemoryProducerConnection {
    async fn publish(&mut self, message: OutgoingMessage) -> Result<Delivery, PublishError> {
        if !self.broker.state().reachable {
            return Err(PublishError {
                topic: message.topic,
                reason: "memory broker offline".into(),
            });
        }
        Ok(self.broker.append(message))
    }

    async fn disconnect(self) {
        self.broker.close();
        info!("Producer disconnected");
    }
}

pub struct MemoryConsumerConnector {
    broker: MemoryBroker,
    group: String,
    from_beginning: bool,
}

pub struct MemoryConsumerConnection {
    broker: MemoryBroker,
    group: String,
    from_beginning: bool,
    topic: Option<String>,
    next_partition: i32,
}

#[async_trait]
impl ConsumerConnector for MemoryConsumerConnector {
    type Connection = MemoryConsumerConnection;

    async fn connect(&self) -> Result<MemoryConsumerConnection, ConnectionError> {
        info!("Connecting consumer...");
        self.broker.open()?;
        info!("Consumer connected");
        Ok(MemoryConsumerConnection {
            broker: self.broker.clone(),
            group: self.group.clone(),
            from_beginning: self.from_beginning,
            topic: None,
            next_partition: 0,
        })
    }
}

impl MemoryConsumerConnection {
    // Committed offsets point at the next message to hand out. A group that
    // never committed starts at the log start or at its end.
    fn pin_positions(&self, topic: &str) {
        let mut state = self.broker.state();
        for partition in 0..self.broker.inner.partitions {
            let log_len = state
                .topics
                .get(topic)
                .map_or(0, |logs| logs[partition as usize].len() as i64);
            state
                .committed
                .entry((self.group.clone(), topic.to_string(), partition))
                .or_insert(if self.from_beginning { 0 } else { log_len });
        }
    }

    fn try_next(&mut self, topic: &str) -> Option<IncomingMessage> {
        let partitions = self.broker.inner.partitions;
        let mut state = self.broker.state();
        for step in 0..partitions {
            let partition = (self.next_partition + step) % partitions;
            let log_len = state
                .topics
                .get(topic)
                .map_or(0, |logs| logs[partition as usize].len() as i64);
            let commit_key = (self.group.clone(), topic.to_string(), partition);
            let position = state.committed.get(&commit_key).copied().unwrap_or(0);
            if position < log_len {
                let message = state.topics[topic][partition as usize][position as usize].clone();
                state.committed.insert(commit_key, position + 1);
                self.next_partition = (partition + 1) % partitions;
                return Some(message);
            }
        }
        None
    }
}

#[async_trait]
impl ConsumerConnection for MemoryConsumerConnection {
    async fn subscribe(&mut self, topic: &str) -> Result<(), ConnectionError> {
        {
            let partitions = self.broker.inner.partitions as usize;
            let mut state = self.broker.state();
            if !state.reachable {
                return Err(ConnectionError::Subscribe {
                    topic: topic.to_string(),
                    reason: "memory broker offline".into(),
                });
            }
            state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); partitions]);
        }
        // Messages published after subscribing must not be skipped by a group
        // that starts at the end of the log.
        self.pin_positions(topic);
        self.topic = Some(topic.to_string());
        info!("Subscribed to topic: {topic}");
        Ok(())
    }

    async fn recv(&mut self) -> Result<IncomingMessage, ReceiveError> {
        let topic = self.topic.clone().ok_or(ReceiveError::NotSubscribed)?;
        let inner = self.broker.inner.clone();
        loop {
            let appended = inner.appended.notified();
            if let Some(message) = self.try_next(&topic) {
                return Ok(message);
            }
            appended.await;
        }
    }

    async fn disconnect(self) {
        self.broker.close();
        info!("Consumer disconnected");
    }
}
