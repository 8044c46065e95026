//! Gossip wire protocol
//!
//! Frames are a 4-byte big-endian length followed by a JSON-encoded
//! `GossipMessage`. Frames above `MAX_FRAME_BYTES` are rejected on both
//! the send and receive side.

use super::delta::ReplicationDelta;
use crate::record::RegionId;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_BYTES: usize = 1024 * 1024;
const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("gossip io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("gossip codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("gossip frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipMessage {
    /// Consecutive writes from `source_region`, numbered from `first_seq`
    /// within `session`. Sequence numbers below `floor` will never be sent.
    DeltaBatch {
        source_region: RegionId,
        session: u64,
        first_seq: u64,
        floor: u64,
        deltas: Vec<ReplicationDelta>,
    },
    /// Sent instead of a batch when nothing is pending for the peer
    Heartbeat {
        source_region: RegionId,
        session: u64,
        next_seq: u64,
    },
}

impl GossipMessage {
    pub fn delta_batch(
        source_region: RegionId,
        session: u64,
        first_seq: u64,
        floor: u64,
        deltas: Vec<ReplicationDelta>,
    ) -> Self {
        debug_assert!(floor <= first_seq, "Precondition: batch starts at or above the floor");
        GossipMessage::DeltaBatch {
            source_region,
            session,
            first_seq,
            floor,
            deltas,
        }
    }

    pub fn heartbeat(source_region: RegionId, session: u64, next_seq: u64) -> Self {
        GossipMessage::Heartbeat {
            source_region,
            session,
            next_seq,
        }
    }

    pub fn source_region(&self) -> &RegionId {
        match self {
            GossipMessage::DeltaBatch { source_region, .. } => source_region,
            GossipMessage::Heartbeat { source_region, .. } => source_region,
        }
    }

    pub fn session(&self) -> u64 {
        match self {
            GossipMessage::DeltaBatch { session, .. } | GossipMessage::Heartbeat { session, .. } => *session,
        }
    }

    /// Length-prefixed frame ready for the socket
    pub fn to_frame(&self) -> Result<Bytes, GossipError> {
        let payload = serde_json::to_vec(self)?;
        if payload.len() > MAX_FRAME_BYTES {
            return Err(GossipError::FrameTooLarge(payload.len()));
        }
        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.put_u32(payload.len() as u32);
        frame.put_slice(&payload);
        Ok(frame.freeze())
    }
}

/// Read one frame. `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<GossipMessage>, GossipError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(GossipError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(serde_json::from_slice(&payload)?))
}

pub async fn write_frame<W>(writer: &mut W, message: &GossipMessage) -> Result<(), GossipError>
where
    W: AsyncWrite + Unpin,
{
    let frame = message.to_frame()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Attributes, Record, RecordKey};

    fn batch() -> GossipMessage {
        let record = Record::first_version(
            RecordKey::parse("school1", "S001").unwrap(),
            Attributes::new(),
            RegionId::new("us-east-1"),
        );
        GossipMessage::delta_batch(
            RegionId::new("us-east-1"),
            3,
            10,
            4,
            vec![
                ReplicationDelta::upsert(record.clone()),
                ReplicationDelta::delete(&record, RegionId::new("us-east-1")),
            ],
        )
    }

    #[tokio::test]
    async fn test_frames_over_duplex_stream() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let heartbeat = GossipMessage::heartbeat(RegionId::new("eu-west-1"), 9, 12);

        write_frame(&mut client, &batch()).await.unwrap();
        write_frame(&mut client, &heartbeat).await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server).await.unwrap(), Some(batch()));
        assert_eq!(read_frame(&mut server).await.unwrap(), Some(heartbeat));
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let _ = client.write_all(&((MAX_FRAME_BYTES as u32) + 1).to_be_bytes()).await;
        });
        assert!(matches!(
            read_frame(&mut server).await,
            Err(GossipError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_wire_shape() {
        let json: serde_json::Value =
            serde_json::from_slice(&batch().to_frame().unwrap()[FRAME_HEADER_LEN..]).unwrap();
        assert_eq!(json["type"], "delta_batch");
        assert_eq!(json["deltas"][0]["kind"], "upsert");
        assert_eq!(json["deltas"][1]["kind"], "delete");
        assert_eq!(json["deltas"][1]["stamp"]["version"], 2);
        assert_eq!(json["first_seq"], 10);
        assert_eq!(json["floor"], 4);
        assert_eq!(batch().session(), 3);
    }
}
