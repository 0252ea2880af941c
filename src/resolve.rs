//! Turning parsed positions into concrete offsets.

use crate::{
    client::{BrokerSession, Checkpoint, Symbolic},
    consume::CheckpointStore,
    error::ConsumeError,
    offsets::{Anchor, Delta, Position},
};

/// Resolve a position against live broker state for one partition.
///
/// Resolution is pure with respect to a broker snapshot: resolving the same
/// position twice, or for different partitions concurrently, does not
/// interact. Time-valued anchors and displacements are accepted by the parser
/// but not resolvable yet.
pub async fn resolve_offset<S: BrokerSession>(
    session: &S,
    topic: &str,
    partition: i32,
    position: &Position,
    group: Option<&str>,
    checkpoints: &CheckpointStore<S::Checkpoint>,
) -> Result<i64, ConsumeError> {
    let delta = match position.delta {
        Delta::Offsets(delta) => delta,
        Delta::Time(_) => return Err(ConsumeError::TimeResolutionUnsupported),
    };
    let anchor = match position.anchor {
        Anchor::Time(_) => return Err(ConsumeError::TimeResolutionUnsupported),
        Anchor::Oldest => session.get_offset(topic, partition, Symbolic::Oldest).await?,
        // The high watermark is the next offset to be produced; step back to
        // the last message that exists.
        Anchor::Newest => session.get_offset(topic, partition, Symbolic::Newest).await? - 1,
        Anchor::Resume => {
            let Some(group) = group else {
                return Err(ConsumeError::ResumeWithoutGroup);
            };
            let checkpoint = checkpoints
                .get_or_create(partition, || session.open_checkpoint(group, topic, partition))?;
            checkpoint.next_offset().await?
        }
        Anchor::Max => i64::MAX,
        Anchor::At(offset) => offset,
    };
    Ok(anchor.saturating_add(delta))
}
