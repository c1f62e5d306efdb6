// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Durable segment file.
//!
//! # File Format
//! ```text
//! [Header: 8 bytes][Frame][Frame][Frame]...
//! ```
//!
//! Header:
//! - magic: b"CLOG"
//! - version: u32 LE (1)
//!
//! Frame:
//! - len: u32 LE (body length)
//! - crc: u64 LE (CRC-64 of body)
//! - body: bincode encoded `LogRecord`
//!
//! A batch of frames is written with a single write + fsync. A torn tail
//! (short frame, or bad checksum on the final frame) is truncated on open.
//! A bad checksum anywhere else, a length above `MAX_FRAME_LEN`, or a short
//! frame followed by an intact one is corruption and refuses to open.

use crate::config::{MAX_FRAME_LEN, SEGMENT_MAGIC, SEGMENT_VERSION};
use crate::error::{LogError, LogResult};
use crate::event::{from_micros, to_micros, Event};
use crate::types::{CaseId, EventId, Sequence, Source, Track};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc64fast::Digest;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const HEADER_LEN: usize = 8;
const FRAME_HEADER_LEN: usize = 4 + 8;

/// On-disk shape of one event. Payload is kept as JSON text since the
/// payload schema belongs to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub sequence: u64,
    pub event_id: [u8; 16],
    pub case_id: [u8; 16],
    pub event_type: String,
    pub client_ts_micros: i64,
    pub server_ts_micros: i64,
    pub track: Track,
    pub source: Source,
    pub payload_version: u32,
    pub payload: String,
}

impl LogRecord {
    pub fn from_event(event: &Event) -> LogResult<Self> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| LogError::Encode(e.to_string()))?;
        Ok(Self {
            sequence: event.sequence.0,
            event_id: event.event_id.as_bytes(),
            case_id: event.case_id.as_bytes(),
            event_type: event.event_type.clone(),
            client_ts_micros: to_micros(event.client_ts),
            server_ts_micros: to_micros(event.server_ts),
            track: event.track,
            source: event.source,
            payload_version: event.payload_version,
            payload,
        })
    }

    pub fn into_event(self) -> LogResult<Event> {
        let sequence = self.sequence;
        let decode_err = |message: &str| LogError::Decode {
            offset: sequence,
            message: message.to_string(),
        };
        let client_ts = from_micros(self.client_ts_micros).ok_or_else(|| decode_err("client_ts out of range"))?;
        let server_ts = from_micros(self.server_ts_micros).ok_or_else(|| decode_err("server_ts out of range"))?;
        let payload = serde_json::from_str(&self.payload).map_err(|e| decode_err(&e.to_string()))?;
        Ok(Event {
            event_id: EventId::from_bytes(self.event_id),
            case_id: CaseId::from_bytes(self.case_id),
            event_type: self.event_type,
            client_ts,
            server_ts,
            track: self.track,
            source: self.source,
            payload_version: self.payload_version,
            payload,
            sequence: Sequence(self.sequence),
        })
    }
}

fn checksum(body: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(body);
    digest.sum64()
}

fn header_bytes() -> LogResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(HEADER_LEN);
    bytes.extend_from_slice(&SEGMENT_MAGIC);
    bytes.write_u32::<LittleEndian>(SEGMENT_VERSION)?;
    Ok(bytes)
}

/// Decode every intact frame. Returns the records and the length of the
/// valid prefix of `buf`.
fn replay(buf: &[u8]) -> LogResult<(Vec<LogRecord>, u64)> {
    if buf.len() < HEADER_LEN || buf[0..4] != SEGMENT_MAGIC {
        return Err(LogError::InvalidHeader);
    }
    let mut version_bytes = &buf[4..HEADER_LEN];
    if version_bytes.read_u32::<LittleEndian>()? != SEGMENT_VERSION {
        return Err(LogError::InvalidHeader);
    }

    let mut records = Vec::new();
    let mut offset = HEADER_LEN;

    while offset < buf.len() {
        let rest = &buf[offset..];
        if rest.len() < FRAME_HEADER_LEN {
            break;
        }
        let (len, crc) = frame_header(rest)?;
        if len > MAX_FRAME_LEN {
            return Err(LogError::Corrupted { offset: offset as u64 });
        }
        let end = FRAME_HEADER_LEN + len;
        if rest.len() < end {
            // A torn write leaves nothing intact behind it
            if holds_intact_frame(&rest[FRAME_HEADER_LEN..]) {
                return Err(LogError::Corrupted { offset: offset as u64 });
            }
            break;
        }

        let body = &rest[FRAME_HEADER_LEN..end];
        if checksum(body) != crc {
            if offset + end == buf.len() {
                break;
            }
            return Err(LogError::Corrupted { offset: offset as u64 });
        }

        records.push(decode_record(body, offset as u64)?);
        offset += end;
    }

    Ok((records, offset as u64))
}

fn frame_header(mut frame: &[u8]) -> LogResult<(usize, u64)> {
    let len = frame.read_u32::<LittleEndian>()? as usize;
    let crc = frame.read_u64::<LittleEndian>()?;
    Ok((len, crc))
}

fn decode_record(body: &[u8], offset: u64) -> LogResult<LogRecord> {
    bincode::serde::decode_from_slice::<LogRecord, _>(body, bincode::config::standard())
        .map(|(record, _)| record)
        .map_err(|e| LogError::Decode {
            offset,
            message: e.to_string(),
        })
}

/// Whether any position in `bytes` starts a complete frame with a matching
/// checksum and a decodable body.
fn holds_intact_frame(bytes: &[u8]) -> bool {
    (0..bytes.len()).any(|start| {
        let rest = &bytes[start..];
        if rest.len() < FRAME_HEADER_LEN {
            return false;
        }
        let Ok((len, crc)) = frame_header(rest) else {
            return false;
        };
        if len == 0 || len > rest.len() - FRAME_HEADER_LEN {
            return false;
        }
        let body = &rest[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len];
        checksum(body) == crc && decode_record(body, 0).is_ok()
    })
}

/// Storage the segment writes through. `File` in production.
pub(crate) trait SegmentFile: Read + Write + Seek + Send {
    fn set_len(&mut self, len: u64) -> io::Result<()>;
    fn sync_data(&mut self) -> io::Result<()>;
}

impl SegmentFile for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn sync_data(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }
}

/// Append-only segment writer.
///
/// Only returns `Ok` after the bytes are fsync'd. On failure the file is cut
/// back to its last durable length so a retry starts from a clean tail.
pub struct SegmentWriter {
    path: PathBuf,
    file: Box<dyn SegmentFile>,
    len: u64,
}

impl SegmentWriter {
    /// Open or create a segment, returning the records already in it.
    pub fn open(path: impl AsRef<Path>) -> LogResult<(Self, Vec<LogRecord>)> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        Self::from_file(path, Box::new(file))
    }

    /// Replay and take over an already open handle positioned at its start.
    pub(crate) fn from_file(path: PathBuf, mut file: Box<dyn SegmentFile>) -> LogResult<(Self, Vec<LogRecord>)> {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let (records, valid_len) = if buf.is_empty() {
            let header = header_bytes()?;
            file.write_all(&header)?;
            file.sync_data()?;
            (Vec::new(), header.len() as u64)
        } else {
            replay(&buf)?
        };

        if valid_len < buf.len() as u64 {
            tracing::warn!(
                "Segment {:?}: truncating torn tail ({} bytes)",
                path,
                buf.len() as u64 - valid_len
            );
            file.set_len(valid_len)?;
            file.sync_data()?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        tracing::info!("Segment {:?} opened with {} records", path, records.len());

        Ok((
            Self {
                path,
                file,
                len: valid_len,
            },
            records,
        ))
    }

    /// Append a batch as one durable unit.
    pub fn append_all(&mut self, records: &[LogRecord]) -> LogResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut frames = Vec::new();
        for record in records {
            let body = bincode::serde::encode_to_vec(record, bincode::config::standard())
                .map_err(|e| LogError::Encode(e.to_string()))?;
            if body.len() > MAX_FRAME_LEN {
                return Err(LogError::Encode(format!("frame of {} bytes exceeds limit", body.len())));
            }
            frames.write_u32::<LittleEndian>(body.len() as u32)?;
            frames.write_u64::<LittleEndian>(checksum(&body))?;
            frames.extend_from_slice(&body);
        }

        if let Err(e) = self.write_durable(&frames) {
            tracing::error!("Segment {:?}: write failed, rolling back: {}", self.path, e);
            if let Err(rollback) = self.rollback() {
                tracing::error!("Segment {:?}: rollback failed: {}", self.path, rollback);
            }
            return Err(e);
        }

        self.len += frames.len() as u64;
        Ok(())
    }

    fn write_durable(&mut self, bytes: &[u8]) -> LogResult<()> {
        self.file.write_all(bytes)?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn rollback(&mut self) -> LogResult<()> {
        self.file.set_len(self.len)?;
        self.file.seek(SeekFrom::Start(self.len))?;
        Ok(())
    }
}
