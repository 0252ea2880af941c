//! The broker-facing port and its Kafka implementation.
//!
//! The consumption engine only sees the [`BrokerSession`] trait, so tests can
//! drive it with a scripted in-memory session. [`KafkaSession`] is the real
//! thing, backed by librdkafka: a shared `BaseConsumer` answers metadata and
//! watermark queries, every partition reader is its own `StreamConsumer`
//! assigned at the start offset, and group checkpoints commit through a
//! `BaseConsumer` carrying the group id.

use crate::error::{runtime_error, SessionError};
use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{BaseConsumer, CommitMode, Consumer, StreamConsumer},
    topic_partition_list::{Offset, TopicPartitionList},
    Message,
};
use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};
use time::OffsetDateTime;
use tokio::task::spawn_blocking;

/// Timeout for metadata, watermark and committed-offset requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The two offsets the broker can report for a partition.
pub enum Symbolic {
    /// The oldest offset still retained.
    Oldest,
    /// The high watermark, i.e. the offset the next message will get.
    Newest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One message as read from a partition.
pub struct Record {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub timestamp: Option<OffsetDateTime>,
}

#[async_trait]
/// Connection to a broker cluster, scoped to the operations the consumption
/// engine needs.
pub trait BrokerSession: Send + Sync + 'static {
    type Reader: PartitionReader + 'static;
    type Checkpoint: Checkpoint + 'static;

    /// The partition ids of a topic.
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, SessionError>;

    /// The oldest offset or high watermark of a partition.
    async fn get_offset(
        &self,
        topic: &str,
        partition: i32,
        at: Symbolic,
    ) -> Result<i64, SessionError>;

    /// Open a reader streaming one partition from `start` onwards.
    async fn open_reader(
        &self,
        topic: &str,
        partition: i32,
        start: i64,
    ) -> Result<Self::Reader, SessionError>;

    /// Open the consumer-group checkpoint of one partition.
    fn open_checkpoint(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Self::Checkpoint, SessionError>;

    /// Release the session. Called once, after every worker has finished and
    /// all checkpoint handles are closed.
    fn close(&self) -> Result<(), SessionError>;
}

#[async_trait]
/// A stream of messages from a single partition, in offset order.
pub trait PartitionReader: Send {
    async fn next(&mut self) -> Result<Record, SessionError>;
}

#[async_trait]
/// Broker-stored next-to-read offset of a `(group, topic, partition)` triple.
pub trait Checkpoint: Send + Sync {
    async fn next_offset(&self) -> Result<i64, SessionError>;

    /// Record that everything below `next_offset` has been consumed. Queued
    /// for commit; [`Checkpoint::close`] flushes the last mark.
    fn mark(&self, next_offset: i64);

    fn close(&self);
}

/// A [`BrokerSession`] over a Kafka cluster.
pub struct KafkaSession {
    servers: String,
    client_id: String,
    inner: Arc<BaseConsumer>,
}

pub struct KafkaReader {
    inner: StreamConsumer,
}

pub struct KafkaCheckpoint {
    inner: Arc<BaseConsumer>,
    topic: String,
    partition: i32,
    // last marked next-offset, or -1 when nothing has been marked yet
    marked: AtomicI64,
}

impl KafkaSession {
    /// Connect to the given cluster. `servers` is the comma-separated
    /// bootstrap list. Nothing happens on the wire until the first query.
    pub fn connect(servers: &str, client_id: &str) -> Result<Self, SessionError> {
        let inner = base_config(servers, client_id)
            .set("group.id", random_id())
            .create()?;
        Ok(Self {
            servers: servers.to_owned(),
            client_id: client_id.to_owned(),
            inner: Arc::new(inner),
        })
    }

    fn config(&self) -> ClientConfig {
        base_config(&self.servers, &self.client_id)
    }
}

fn base_config(servers: &str, client_id: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", servers)
        .set("client.id", client_id)
        .set("enable.auto.commit", "false");
    config
}

/// librdkafka requires a group id even when no consumer group is joined,
/// so one is made up per client.
fn random_id() -> String {
    format!(
        "{}",
        OffsetDateTime::now_utc().unix_timestamp() * 1000 + fastrand::i64(0..1000),
    )
}

#[async_trait]
impl BrokerSession for KafkaSession {
    type Reader = KafkaReader;
    type Checkpoint = KafkaCheckpoint;

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, SessionError> {
        let inner = self.inner.clone();
        let topic = topic.to_owned();
        spawn_blocking(move || {
            let metadata = inner.fetch_metadata(Some(&topic), REQUEST_TIMEOUT)?;
            Ok(metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .map(|t| t.partitions().iter().map(|p| p.id()).collect())
                .unwrap_or_default())
        })
        .await
        .map_err(runtime_error)?
    }

    async fn get_offset(
        &self,
        topic: &str,
        partition: i32,
        at: Symbolic,
    ) -> Result<i64, SessionError> {
        let inner = self.inner.clone();
        let topic = topic.to_owned();
        spawn_blocking(move || {
            let (oldest, newest) = inner.fetch_watermarks(&topic, partition, REQUEST_TIMEOUT)?;
            Ok(match at {
                Symbolic::Oldest => oldest,
                Symbolic::Newest => newest,
            })
        })
        .await
        .map_err(runtime_error)?
    }

    async fn open_reader(
        &self,
        topic: &str,
        partition: i32,
        start: i64,
    ) -> Result<Self::Reader, SessionError> {
        let consumer: StreamConsumer = self.config().set("group.id", random_id()).create()?;
        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(topic, partition, Offset::Offset(start))?;
        consumer.assign(&assignment)?;
        Ok(KafkaReader { inner: consumer })
    }

    fn open_checkpoint(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Self::Checkpoint, SessionError> {
        let inner = self.config().set("group.id", group).create()?;
        Ok(KafkaCheckpoint {
            inner: Arc::new(inner),
            topic: topic.to_owned(),
            partition,
            marked: AtomicI64::new(-1),
        })
    }

    fn close(&self) -> Result<(), SessionError> {
        // Readers and checkpoints hold their own clients; the shared metadata
        // consumer disconnects when the last handle is dropped.
        self.inner.unsubscribe();
        Ok(())
    }
}

#[async_trait]
impl PartitionReader for KafkaReader {
    async fn next(&mut self) -> Result<Record, SessionError> {
        let message = self.inner.recv().await?;
        Ok(Record {
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            value: message.payload().map(<[u8]>::to_vec),
            timestamp: message.timestamp().to_millis().and_then(|millis| {
                OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000).ok()
            }),
        })
    }
}

impl KafkaCheckpoint {
    fn commit(&self, next_offset: i64, mode: CommitMode) -> Result<(), SessionError> {
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(&self.topic, self.partition, Offset::Offset(next_offset))?;
        self.inner.commit(&offsets, mode)?;
        Ok(())
    }
}

#[async_trait]
impl Checkpoint for KafkaCheckpoint {
    async fn next_offset(&self) -> Result<i64, SessionError> {
        let inner = self.inner.clone();
        let topic = self.topic.clone();
        let partition = self.partition;
        spawn_blocking(move || {
            let mut list = TopicPartitionList::new();
            list.add_partition(&topic, partition);
            let committed = inner.committed_offsets(list, REQUEST_TIMEOUT)?;
            Ok(match committed.elements().first().map(|e| e.offset()) {
                Some(Offset::Offset(next)) => next,
                // Nothing committed for this group yet.
                _ => 0,
            })
        })
        .await
        .map_err(runtime_error)?
    }

    fn mark(&self, next_offset: i64) {
        if let Err(err) = self.commit(next_offset, CommitMode::Async) {
            log::error!(
                "failed to mark offset {next_offset} for partition {}: {err}",
                self.partition,
            );
            return;
        }
        self.marked.store(next_offset, Ordering::Relaxed);
    }

    fn close(&self) {
        // Async marks may still be in flight; a final sync commit settles them.
        let next_offset = self.marked.load(Ordering::Relaxed);
        if next_offset >= 0 {
            if let Err(err) = self.commit(next_offset, CommitMode::Sync) {
                log::error!(
                    "failed to close checkpoint for partition {}: {err}",
                    self.partition,
                );
            }
        }
    }
}

impl std::fmt::Debug for KafkaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSession")
            .field("servers", &self.servers)
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl std::fmt::Debug for KafkaReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaReader").finish()
    }
}

impl std::fmt::Debug for KafkaCheckpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaCheckpoint")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .finish()
    }
}
