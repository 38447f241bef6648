//! Wire frames between initiator and target.
//!
//! Every frame is explicit little-endian fields — no struct transmutes, so
//! the format is stable across platforms:
//!
//! ```text
//! write-grain:  magic u32 | op u8=1 | key u64 | slot u64 |
//!               grain header [48] | payload_len u32 | payload
//! completion:   magic u32 | op u8=2 | slot u64 | index u64
//! ```
//!
//! The grain header mirrors `GrainSnapshot` field for field (48 bytes).

use std::io;

use mxl_core::GrainSnapshot;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAGIC: u32 = 0x4d58_4c46; // "MXLF"
const OP_WRITE_GRAIN: u8 = 1;
const OP_COMPLETION: u8 = 2;

pub(crate) const GRAIN_HEADER_WIRE_SIZE: usize = 48;

/// Upper bound on a single payload; anything larger is a corrupt frame.
const MAX_WIRE_PAYLOAD: u32 = 1 << 30;

/// A decoded frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    WriteGrain {
        key: u64,
        slot: u64,
        header: GrainSnapshot,
        payload: Vec<u8>,
    },
    Completion {
        slot: u64,
        index: u64,
    },
}

pub(crate) fn encode_grain_header(header: &GrainSnapshot) -> [u8; GRAIN_HEADER_WIRE_SIZE] {
    let mut buf = [0u8; GRAIN_HEADER_WIRE_SIZE];
    buf[0..4].copy_from_slice(&header.version.to_le_bytes());
    buf[4..8].copy_from_slice(&header.size.to_le_bytes());
    buf[8..16].copy_from_slice(&header.grain_size.to_le_bytes());
    buf[16..24].copy_from_slice(&header.committed_size.to_le_bytes());
    buf[24..28].copy_from_slice(&header.device_index.to_le_bytes());
    buf[28..32].copy_from_slice(&header.flags.to_le_bytes());
    buf[32..40].copy_from_slice(&header.timestamp.to_le_bytes());
    buf[40..48].copy_from_slice(&header.index.to_le_bytes());
    buf
}

pub(crate) fn decode_grain_header(buf: &[u8; GRAIN_HEADER_WIRE_SIZE]) -> GrainSnapshot {
    GrainSnapshot {
        version: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        size: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        grain_size: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        committed_size: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        device_index: i32::from_le_bytes(buf[24..28].try_into().unwrap()),
        flags: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
        timestamp: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
        index: u64::from_le_bytes(buf[40..48].try_into().unwrap()),
    }
}

pub(crate) async fn write_grain<W: AsyncWrite + Unpin>(
    writer: &mut W,
    key: u64,
    slot: u64,
    header: &GrainSnapshot,
    payload: &[u8],
) -> io::Result<()> {
    let mut head = Vec::with_capacity(4 + 1 + 8 + 8 + GRAIN_HEADER_WIRE_SIZE + 4);
    head.extend_from_slice(&MAGIC.to_le_bytes());
    head.push(OP_WRITE_GRAIN);
    head.extend_from_slice(&key.to_le_bytes());
    head.extend_from_slice(&slot.to_le_bytes());
    head.extend_from_slice(&encode_grain_header(header));
    head.extend_from_slice(&(payload.len() as u32).to_le_bytes());

    writer.write_all(&head).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

pub(crate) async fn write_completion<W: AsyncWrite + Unpin>(
    writer: &mut W,
    slot: u64,
    index: u64,
) -> io::Result<()> {
    let mut buf = Vec::with_capacity(4 + 1 + 8 + 8);
    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.push(OP_COMPLETION);
    buf.extend_from_slice(&slot.to_le_bytes());
    buf.extend_from_slice(&index.to_le_bytes());

    writer.write_all(&buf).await?;
    writer.flush().await
}

pub(crate) async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Frame> {
    let magic = reader.read_u32_le().await?;
    if magic != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad frame magic {magic:#010x}"),
        ));
    }

    match reader.read_u8().await? {
        OP_WRITE_GRAIN => {
            let key = reader.read_u64_le().await?;
            let slot = reader.read_u64_le().await?;

            let mut header_buf = [0u8; GRAIN_HEADER_WIRE_SIZE];
            reader.read_exact(&mut header_buf).await?;
            let header = decode_grain_header(&header_buf);

            let payload_len = reader.read_u32_le().await?;
            if payload_len > MAX_WIRE_PAYLOAD {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("payload length {payload_len} exceeds the frame limit"),
                ));
            }
            let mut payload = vec![0u8; payload_len as usize];
            reader.read_exact(&mut payload).await?;

            Ok(Frame::WriteGrain {
                key,
                slot,
                header,
                payload,
            })
        }
        OP_COMPLETION => {
            let slot = reader.read_u64_le().await?;
            let index = reader.read_u64_le().await?;
            Ok(Frame::Completion { slot, index })
        }
        op => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown frame opcode {op}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> GrainSnapshot {
        GrainSnapshot {
            version: 1,
            size: 48,
            grain_size: 1024,
            committed_size: 1024,
            device_index: -1,
            flags: 0b101,
            timestamp: 1_700_000_000_000_000_000,
            index: 42,
        }
    }

    #[test]
    fn grain_header_codec_round_trips() {
        let header = sample_header();
        let decoded = decode_grain_header(&encode_grain_header(&header));
        assert_eq!(decoded, header);
    }

    #[tokio::test]
    async fn frames_round_trip_through_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1 << 16);

        let header = sample_header();
        let payload = vec![0x5a; 1024];
        write_grain(&mut a, 7, 2, &header, &payload).await.unwrap();
        write_completion(&mut a, 2, 42).await.unwrap();

        match read_frame(&mut b).await.unwrap() {
            Frame::WriteGrain {
                key,
                slot,
                header: h,
                payload: p,
            } => {
                assert_eq!(key, 7);
                assert_eq!(slot, 2);
                assert_eq!(h, header);
                assert_eq!(p, payload);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(
            read_frame(&mut b).await.unwrap(),
            Frame::Completion { slot: 2, index: 42 }
        );
    }

    #[tokio::test]
    async fn corrupt_magic_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut a, &[0u8; 5]).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
