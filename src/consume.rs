//! The concurrent consumption engine.
//!
//! One task per selected partition, plus the printer. Workers share nothing
//! but the print queue and the checkpoint store; a failing worker logs to
//! stderr and dies alone, the topic-wide run carries on.

use crate::{
    client::{BrokerSession, Checkpoint, PartitionReader},
    error::{ConsumeError, SessionError},
    offsets::{Interval, OffsetSpec, Position, ALL_PARTITIONS},
    print::{self, ConsumedMessage, Encoding, PrintJob},
    resolve::resolve_offset,
    select::select_partitions,
};
use flume::Sender;
use futures::future::join_all;
use std::{
    collections::HashMap,
    io::Write,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{task::spawn, time::timeout};

#[derive(Debug, Clone)]
/// Everything a consumption run needs to know.
pub struct ConsumeConfig {
    pub topic: String,
    pub spec: OffsetSpec,
    /// Terminate a partition worker after this long without a message.
    pub idle_timeout: Option<Duration>,
    /// Consumer group for the `resume` anchor and checkpoint marking.
    pub group: Option<String>,
    pub encode_key: Encoding,
    pub encode_value: Encoding,
    pub pretty: bool,
}

/// Per-partition checkpoint handles, created on first touch and shared
/// between the resolver and the workers.
pub struct CheckpointStore<C> {
    inner: Mutex<HashMap<i32, Arc<C>>>,
}

impl<C: Checkpoint> CheckpointStore<C> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(
        &self,
        partition: i32,
        create: impl FnOnce() -> Result<C, SessionError>,
    ) -> Result<Arc<C>, SessionError> {
        let mut map = self.inner.lock().expect("Failed to lock checkpoint store");
        if let Some(checkpoint) = map.get(&partition) {
            return Ok(checkpoint.clone());
        }
        let checkpoint = Arc::new(create()?);
        map.insert(partition, checkpoint.clone());
        Ok(checkpoint)
    }

    /// Close every handle exactly once.
    pub fn close_all(&self) {
        let handles: Vec<_> = {
            let mut map = self.inner.lock().expect("Failed to lock checkpoint store");
            map.drain().collect()
        };
        for (_, checkpoint) in handles {
            checkpoint.close();
        }
    }
}

impl<C: Checkpoint> Default for CheckpointStore<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for CheckpointStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore").finish()
    }
}

/// Consume the selected partitions of the configured topic to stdout.
pub async fn run<S: BrokerSession>(
    session: Arc<S>,
    config: ConsumeConfig,
) -> Result<(), ConsumeError> {
    run_with_output(session, config, std::io::stdout()).await
}

/// Same as [`run`], but writing to an arbitrary sink.
pub async fn run_with_output<S: BrokerSession, W: Write + Send + 'static>(
    session: Arc<S>,
    config: ConsumeConfig,
    out: W,
) -> Result<(), ConsumeError> {
    let available = session.partitions(&config.topic).await?;
    let selected = select_partitions(&config.spec, &available);
    if selected.is_empty() {
        return Err(ConsumeError::NoPartitionsMatched {
            topic: config.topic,
        });
    }
    log::debug!(
        "consuming {} partition(s) of {}: {selected:?}",
        selected.len(),
        config.topic,
    );

    let checkpoints = Arc::new(CheckpointStore::new());
    let (jobs, queue) = flume::unbounded();
    let printer = spawn(print::run(queue, config.pretty, out));

    let config = Arc::new(config);
    let workers: Vec<_> = selected
        .into_iter()
        .map(|partition| {
            spawn(consume_partition(
                session.clone(),
                config.clone(),
                partition,
                jobs.clone(),
                checkpoints.clone(),
            ))
        })
        .collect();
    // The workers hold the only remaining senders; the printer stops once
    // they are all gone.
    drop(jobs);

    join_all(workers).await;
    checkpoints.close_all();
    if let Err(err) = session.close() {
        log::error!("failed to close broker session: {err}");
    }
    printer.await.ok();
    Ok(())
}

/// Stream one partition from its resolved start until its stop condition.
async fn consume_partition<S: BrokerSession>(
    session: Arc<S>,
    config: Arc<ConsumeConfig>,
    partition: i32,
    jobs: Sender<PrintJob>,
    checkpoints: Arc<CheckpointStore<S::Checkpoint>>,
) {
    let Some(interval) = partition_interval(&config.spec, partition) else {
        return;
    };
    let group = config.group.as_deref();
    let topic = &config.topic;

    let start = match resolve(&session, &config, partition, &interval.start, &checkpoints).await {
        Ok(offset) => offset,
        Err(err) => {
            log::error!("failed to resolve start offset for partition {partition}: {err}");
            return;
        }
    };
    let end = match resolve(&session, &config, partition, &interval.end, &checkpoints).await {
        Ok(offset) => offset,
        Err(err) => {
            log::error!("failed to resolve end offset for partition {partition}: {err}");
            return;
        }
    };

    let mut reader = match session.open_reader(topic, partition, start).await {
        Ok(reader) => reader,
        Err(err) => {
            log::error!("failed to open reader for partition {partition}: {err}");
            return;
        }
    };
    let checkpoint = match group {
        Some(group) => {
            match checkpoints
                .get_or_create(partition, || session.open_checkpoint(group, topic, partition))
            {
                Ok(checkpoint) => Some(checkpoint),
                Err(err) => {
                    log::error!("failed to open checkpoint for partition {partition}: {err}");
                    return;
                }
            }
        }
        None => None,
    };
    log::debug!("partition {partition}: reading offsets {start}..={end}");

    loop {
        // The idle timer re-arms on every pass; any message resets it.
        let received = match config.idle_timeout {
            Some(idle) => match timeout(idle, reader.next()).await {
                Ok(received) => received,
                Err(_) => {
                    log::warn!(
                        "consuming from partition {partition} timed out after {}",
                        humantime::format_duration(idle),
                    );
                    return;
                }
            },
            None => reader.next().await,
        };
        let record = match received {
            Ok(record) => record,
            Err(err) => {
                log::error!("partition {partition} reader failed: {err}");
                return;
            }
        };

        let message = ConsumedMessage::new(&record, config.encode_key, config.encode_value);
        let (receipt, done) = flume::bounded(1);
        if jobs.send_async(PrintJob { message, receipt }).await.is_err() {
            return;
        }
        // Wait until the record is actually out before advancing; this is
        // what keeps emission in offset order per partition.
        done.recv_async().await.ok();

        if let Some(checkpoint) = &checkpoint {
            checkpoint.mark(record.offset + 1);
        }
        if end > 0 && record.offset >= end {
            return;
        }
    }
}

/// The interval governing a partition: its own entry if present, else the
/// `all` entry.
fn partition_interval(spec: &OffsetSpec, partition: i32) -> Option<Interval> {
    spec.get(&partition)
        .or_else(|| spec.get(&ALL_PARTITIONS))
        .copied()
}

async fn resolve<S: BrokerSession>(
    session: &Arc<S>,
    config: &ConsumeConfig,
    partition: i32,
    position: &Position,
    checkpoints: &CheckpointStore<S::Checkpoint>,
) -> Result<i64, ConsumeError> {
    resolve_offset(
        session.as_ref(),
        &config.topic,
        partition,
        position,
        config.group.as_deref(),
        checkpoints,
    )
    .await
}
