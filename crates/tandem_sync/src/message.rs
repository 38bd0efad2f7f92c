//! Sync wire messages
//!
//! One tag byte followed by a little-endian payload.

use crate::snapshot_ring::Snapshot;
use tandem_core::{ByteReader, ByteWriter, CodecError, InputFrame, Tick, INPUT_FRAME_LEN};
use tandem_net::Channel;

const TAG_INPUT: u8 = 0x01;
const TAG_CHECKSUM: u8 = 0x02;
const TAG_SNAPSHOT_HINT: u8 = 0x03;
const TAG_RESYNC_REQUEST: u8 = 0x04;
const TAG_SNAPSHOT: u8 = 0x05;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Lockstep input for one tick.
    Input(InputFrame),
    /// State checksum after `tick` completed ticks.
    Checksum { tick: Tick, checksum: u32 },
    /// Freshest snapshot a peer holds. Best effort.
    SnapshotHint { tick: Tick, checksum: u32 },
    /// Asks the soft host for an authoritative snapshot.
    ResyncRequest { since: Tick },
    /// Authoritative state for resync or late join.
    Snapshot(Snapshot),
}

impl SyncMessage {
    /// Channel this message travels on.
    pub fn channel(&self) -> Channel {
        match self {
            SyncMessage::SnapshotHint { .. } => Channel::Unreliable,
            _ => Channel::Reliable,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = match self {
            SyncMessage::Snapshot(s) => ByteWriter::with_capacity(13 + s.bytes.len()),
            _ => ByteWriter::with_capacity(1 + INPUT_FRAME_LEN),
        };
        match self {
            SyncMessage::Input(frame) => {
                w.put_u8(TAG_INPUT);
                frame.encode_into(&mut w);
            }
            SyncMessage::Checksum { tick, checksum } => {
                w.put_u8(TAG_CHECKSUM);
                w.put_u32(*tick);
                w.put_u32(*checksum);
            }
            SyncMessage::SnapshotHint { tick, checksum } => {
                w.put_u8(TAG_SNAPSHOT_HINT);
                w.put_u32(*tick);
                w.put_u32(*checksum);
            }
            SyncMessage::ResyncRequest { since } => {
                w.put_u8(TAG_RESYNC_REQUEST);
                w.put_u32(*since);
            }
            SyncMessage::Snapshot(snapshot) => {
                w.put_u8(TAG_SNAPSHOT);
                w.put_u32(snapshot.tick);
                w.put_u32(snapshot.checksum);
                w.put_len_prefixed(&snapshot.bytes);
            }
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(bytes);
        let message = match r.u8()? {
            TAG_INPUT => SyncMessage::Input(InputFrame::decode(&mut r)?),
            TAG_CHECKSUM => SyncMessage::Checksum {
                tick: r.u32()?,
                checksum: r.u32()?,
            },
            TAG_SNAPSHOT_HINT => SyncMessage::SnapshotHint {
                tick: r.u32()?,
                checksum: r.u32()?,
            },
            TAG_RESYNC_REQUEST => SyncMessage::ResyncRequest { since: r.u32()? },
            TAG_SNAPSHOT => {
                let tick = r.u32()?;
                let checksum = r.u32()?;
                let body = r.len_prefixed()?.to_vec();
                SyncMessage::Snapshot(Snapshot::from_parts(tick, checksum, body))
            }
            tag => return Err(CodecError::UnknownTag(tag)),
        };
        r.finish()?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_message_layout() {
        let frame = InputFrame::new(12, 3, [0.25, -1.0], 5);
        let bytes = SyncMessage::Input(frame).encode();
        assert_eq!(bytes.len(), 1 + INPUT_FRAME_LEN);
        assert_eq!(bytes[0], TAG_INPUT);
        assert_eq!(&bytes[1..], &frame.to_bytes()[..]);
        assert_eq!(SyncMessage::decode(&bytes), Ok(SyncMessage::Input(frame)));
    }

    #[test]
    fn snapshot_carries_body() {
        let snapshot = Snapshot::new(40, vec![1, 2, 3, 4, 5]);
        let message = SyncMessage::Snapshot(snapshot.clone());
        let decoded = SyncMessage::decode(&message.encode());
        assert_eq!(decoded, Ok(SyncMessage::Snapshot(snapshot)));
    }

    #[test]
    fn hints_are_unreliable() {
        assert_eq!(
            SyncMessage::SnapshotHint { tick: 1, checksum: 2 }.channel(),
            Channel::Unreliable
        );
        assert_eq!(SyncMessage::ResyncRequest { since: 0 }.channel(), Channel::Reliable);
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(SyncMessage::decode(&[0x7F]), Err(CodecError::UnknownTag(0x7F)));
        assert!(matches!(
            SyncMessage::decode(&[TAG_CHECKSUM, 1, 0]),
            Err(CodecError::Truncated { .. })
        ));
        let mut bytes = SyncMessage::ResyncRequest { since: 3 }.encode();
        bytes.push(0);
        assert_eq!(SyncMessage::decode(&bytes), Err(CodecError::TrailingBytes(1)));
        assert!(SyncMessage::decode(&[]).is_err());
    }
}
