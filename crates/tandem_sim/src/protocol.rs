//! Simulation boundary messages
//!
//! The driver and the simulation share nothing but these messages. Each has a
//! byte encoding (tag byte, little-endian payload) so the boundary can also
//! sit between processes.

use tandem_core::{ByteReader, ByteWriter, CodecError, Tick};
use thiserror::Error;

const TAG_INIT: u8 = 0x10;
const TAG_ADVANCE: u8 = 0x11;
const TAG_SNAPSHOT_REQ: u8 = 0x12;
const TAG_RESTORE: u8 = 0x13;

const TAG_READY: u8 = 0x20;
const TAG_ADVANCED: u8 = 0x21;
const TAG_SNAPSHOT: u8 = 0x22;
const TAG_RESTORED: u8 = 0x23;
const TAG_FAULT: u8 = 0x2F;

/// Driver to simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToSim {
    Init { seed: u32, fixed_hz: u32 },
    /// Encoded `MergedInput` for the next tick.
    Advance { inputs: Vec<u8> },
    SnapshotReq,
    Restore { bin: Vec<u8> },
}

/// Simulation to driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FromSim {
    Ready,
    /// Completed tick count after the advance.
    Advanced { tick: Tick },
    Snapshot { bin: Vec<u8> },
    Restored { tick: Tick },
    Fault { fault: SimFault },
}

/// Protocol violations reported by the simulation side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SimFault {
    #[error("simulation already initialized")]
    DoubleInit,

    #[error("simulation not initialized")]
    NotInitialized,

    #[error("malformed input payload")]
    MalformedInput,

    #[error("malformed snapshot payload")]
    MalformedSnapshot,
}

impl SimFault {
    fn code(self) -> u8 {
        match self {
            SimFault::DoubleInit => 1,
            SimFault::NotInitialized => 2,
            SimFault::MalformedInput => 3,
            SimFault::MalformedSnapshot => 4,
        }
    }

    fn from_code(code: u8) -> Result<Self, CodecError> {
        match code {
            1 => Ok(SimFault::DoubleInit),
            2 => Ok(SimFault::NotInitialized),
            3 => Ok(SimFault::MalformedInput),
            4 => Ok(SimFault::MalformedSnapshot),
            _ => Err(CodecError::Invalid("unknown fault code")),
        }
    }
}

impl ToSim {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        match self {
            ToSim::Init { seed, fixed_hz } => {
                w.put_u8(TAG_INIT);
                w.put_u32(*seed);
                w.put_u32(*fixed_hz);
            }
            ToSim::Advance { inputs } => {
                w.put_u8(TAG_ADVANCE);
                w.put_len_prefixed(inputs);
            }
            ToSim::SnapshotReq => w.put_u8(TAG_SNAPSHOT_REQ),
            ToSim::Restore { bin } => {
                w.put_u8(TAG_RESTORE);
                w.put_len_prefixed(bin);
            }
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(bytes);
        let message = match r.u8()? {
            TAG_INIT => ToSim::Init {
                seed: r.u32()?,
                fixed_hz: r.u32()?,
            },
            TAG_ADVANCE => ToSim::Advance {
                inputs: r.len_prefixed()?.to_vec(),
            },
            TAG_SNAPSHOT_REQ => ToSim::SnapshotReq,
            TAG_RESTORE => ToSim::Restore {
                bin: r.len_prefixed()?.to_vec(),
            },
            tag => return Err(CodecError::UnknownTag(tag)),
        };
        r.finish()?;
        Ok(message)
    }
}

impl FromSim {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        match self {
            FromSim::Ready => w.put_u8(TAG_READY),
            FromSim::Advanced { tick } => {
                w.put_u8(TAG_ADVANCED);
                w.put_u32(*tick);
            }
            FromSim::Snapshot { bin } => {
                w.put_u8(TAG_SNAPSHOT);
                w.put_len_prefixed(bin);
            }
            FromSim::Restored { tick } => {
                w.put_u8(TAG_RESTORED);
                w.put_u32(*tick);
            }
            FromSim::Fault { fault } => {
                w.put_u8(TAG_FAULT);
                w.put_u8(fault.code());
            }
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(bytes);
        let message = match r.u8()? {
            TAG_READY => FromSim::Ready,
            TAG_ADVANCED => FromSim::Advanced { tick: r.u32()? },
            TAG_SNAPSHOT => FromSim::Snapshot {
                bin: r.len_prefixed()?.to_vec(),
            },
            TAG_RESTORED => FromSim::Restored { tick: r.u32()? },
            TAG_FAULT => FromSim::Fault {
                fault: SimFault::from_code(r.u8()?)?,
            },
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
    fn init_layout() {
        let bytes = ToSim::Init {
            seed: 0x1234_5678,
            fixed_hz: 60,
        }
        .encode();
        assert_eq!(bytes, vec![TAG_INIT, 0x78, 0x56, 0x34, 0x12, 60, 0, 0, 0]);
    }

    #[test]
    fn messages_survive_encoding() {
        let to = [
            ToSim::Init { seed: 7, fixed_hz: 30 },
            ToSim::Advance { inputs: vec![0, 0, 0, 0] },
            ToSim::SnapshotReq,
            ToSim::Restore { bin: vec![9; 24] },
        ];
        for message in to {
            assert_eq!(ToSim::decode(&message.encode()), Ok(message));
        }
        let from = [
            FromSim::Ready,
            FromSim::Advanced { tick: 12 },
            FromSim::Snapshot { bin: vec![1, 2] },
            FromSim::Restored { tick: 40 },
            FromSim::Fault { fault: SimFault::NotInitialized },
        ];
        for message in from {
            assert_eq!(FromSim::decode(&message.encode()), Ok(message));
        }
    }

    #[test]
    fn unknown_tags_rejected() {
        assert_eq!(ToSim::decode(&[0x99]), Err(CodecError::UnknownTag(0x99)));
        assert_eq!(FromSim::decode(&[TAG_INIT]), Err(CodecError::UnknownTag(TAG_INIT)));
        assert!(FromSim::decode(&[TAG_FAULT, 42]).is_err());
        assert!(ToSim::decode(&[]).is_err());
    }
}
