// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Checkpoint archive files.
//!
//! A checkpoint archive is the on-disk realization of the authoritative
//! record stream: a fixed header followed by length-prefixed, checksummed,
//! bincode-encoded records. Entry order carries no meaning; verification
//! is order-independent.
//!
//! Format:
//! [u8; 4]  magic "ATCK"
//! [u32]    format version (1)
//! [u64]    checkpoint sequence
//! For each entry:
//!   [u32]  payload length
//!   [u64]  crc64 over length + payload
//!   [...]  bincode payload

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::marker::PhantomData;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc64fast::Digest;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SourceError;
use crate::source::CheckpointSource;

pub const FORMAT_V1: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub checkpoint: u64,
}

impl ArchiveHeader {
    pub const SIZE: usize = 4 + 4 + 8; // 16 bytes
    pub const MAGIC: [u8; 4] = *b"ATCK";

    pub fn new(checkpoint: u64) -> Self {
        Self {
            magic: Self::MAGIC,
            version: FORMAT_V1,
            checkpoint,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.checkpoint.to_le_bytes());
        buf
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, SourceError> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf)?;

        let magic: [u8; 4] = buf[0..4].try_into().unwrap();
        if magic != Self::MAGIC {
            return Err(SourceError::InvalidMagic);
        }

        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != FORMAT_V1 {
            return Err(SourceError::UnsupportedVersion(version));
        }

        let checkpoint = u64::from_le_bytes(buf[8..16].try_into().unwrap());

        Ok(Self {
            magic,
            version,
            checkpoint,
        })
    }
}

fn entry_checksum(payload: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(&(payload.len() as u32).to_le_bytes());
    digest.write(payload);
    digest.sum64()
}

/// Appends records to a new archive file.
pub struct ArchiveWriter {
    file: File,
}

impl ArchiveWriter {
    pub fn create(path: impl AsRef<Path>, checkpoint: u64) -> Result<Self, SourceError> {
        let mut file = File::create(path)?;
        file.write_all(&ArchiveHeader::new(checkpoint).to_bytes())?;
        Ok(Self { file })
    }

    pub fn append<R: Serialize>(&mut self, record: &R) -> Result<(), SourceError> {
        let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| SourceError::Other(e.to_string()))?;

        self.file.write_u32::<LittleEndian>(payload.len() as u32)?;
        self.file.write_u64::<LittleEndian>(entry_checksum(&payload))?;
        self.file.write_all(&payload)?;
        Ok(())
    }

    pub fn finish(self) -> Result<(), SourceError> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// Streams records back out of an archive file.
pub struct ArchiveReader<R> {
    reader: BufReader<File>,
    header: ArchiveHeader,
    _record: PhantomData<R>,
}

impl<R> ArchiveReader<R> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let header = ArchiveHeader::read_from(&mut reader)?;
        Ok(Self {
            reader,
            header,
            _record: PhantomData,
        })
    }

    pub fn checkpoint(&self) -> u64 {
        self.header.checkpoint
    }
}

impl<R: DeserializeOwned> CheckpointSource for ArchiveReader<R> {
    type Record = R;

    fn next_record(&mut self) -> Result<Option<R>, SourceError> {
        // Clean EOF at an entry boundary ends the stream; EOF anywhere
        // later means the file was cut mid-entry.
        let payload_len = match self.reader.read_u32::<LittleEndian>() {
            Ok(len) => len as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(SourceError::Io(e)),
        };

        let checksum = match self.reader.read_u64::<LittleEndian>() {
            Ok(sum) => sum,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(SourceError::Truncated)
            }
            Err(e) => return Err(SourceError::Io(e)),
        };

        let mut payload = vec![0u8; payload_len];
        if let Err(e) = self.reader.read_exact(&mut payload) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Err(SourceError::Truncated);
            }
            return Err(SourceError::Io(e));
        }

        let found = entry_checksum(&payload);
        if found != checksum {
            return Err(SourceError::ChecksumMismatch {
                expected: checksum,
                found,
            });
        }

        let (record, _) =
            bincode::serde::decode_from_slice::<R, _>(&payload, bincode::config::standard())?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    fn write_archive(path: &Path, checkpoint: u64, records: &[String]) {
        let mut writer = ArchiveWriter::create(path, checkpoint).unwrap();
        for record in records {
            writer.append(record).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_header_round_trip() {
        let header = ArchiveHeader::new(448);
        let bytes = header.to_bytes();
        let decoded = ArchiveHeader::read_from(&bytes[..]).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = ArchiveHeader::new(1).to_bytes();
        bytes[0..4].copy_from_slice(b"BADM");
        let result = ArchiveHeader::read_from(&bytes[..]);
        assert!(matches!(result, Err(SourceError::InvalidMagic)));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = ArchiveHeader::new(1).to_bytes();
        bytes[4..8].copy_from_slice(&9u32.to_le_bytes());
        let result = ArchiveHeader::read_from(&bytes[..]);
        assert!(matches!(result, Err(SourceError::UnsupportedVersion(9))));
    }

    #[test]
    fn test_write_then_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.atck");
        let records = vec!["alpha".to_string(), "beta".to_string()];
        write_archive(&path, 64, &records);

        let mut reader: ArchiveReader<String> = ArchiveReader::open(&path).unwrap();
        assert_eq!(reader.checkpoint(), 64);
        assert_eq!(reader.next_record().unwrap(), Some("alpha".to_string()));
        assert_eq!(reader.next_record().unwrap(), Some("beta".to_string()));
        assert_eq!(reader.next_record().unwrap(), None);
    }

    #[test]
    fn test_corrupt_payload_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.atck");
        write_archive(&path, 64, &["alpha".to_string()]);

        // Flip one payload byte, past header + entry framing.
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        file.seek(SeekFrom::End(-1)).unwrap();
        let mut last = [0u8; 1];
        file.read_exact(&mut last).unwrap();
        file.seek(SeekFrom::End(-1)).unwrap();
        file.write_all(&[last[0] ^ 0xFF]).unwrap();

        let mut reader: ArchiveReader<String> = ArchiveReader::open(&path).unwrap();
        let result = reader.next_record();
        assert!(matches!(
            result,
            Err(SourceError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_entry_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.atck");
        write_archive(&path, 64, &["alpha".to_string()]);

        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 2).unwrap();

        let mut reader: ArchiveReader<String> = ArchiveReader::open(&path).unwrap();
        let result = reader.next_record();
        assert!(matches!(result, Err(SourceError::Truncated)));
    }
}
