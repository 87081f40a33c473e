//! Telemetry records pushed by the hosts of the fabric.
//!
//! A record is a fixed-size binary structure, there is no length prefix:
//!
//! | offset | length | content                                   |
//! |--------|--------|-------------------------------------------|
//! | 0      | 16     | source address, NUL terminated ASCII text |
//! | 16     | 16     | destination address, same encoding        |
//! | 32     | 8      | number of bytes, little endian            |
//!
//! The stream sockets do not preserve the record boundaries, the
//! [`RecordDecoder`] keeps the partial records between two reads.

use crate::host::{AddressError, HostIndex, resolve_host};
use std::fmt;
use thiserror::Error;

/// maximum length of an IPv4 address text, including the NUL terminator
pub const INET_ADDRSTRLEN: usize = 16;

/// size in bytes of a [`WireRecord`] on the wire
pub const RECORD_SIZE: usize = 2 * INET_ADDRSTRLEN + 8;

/// A record as it was received on the wire, the addresses are
/// not resolved yet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WireRecord {
    src: [u8; INET_ADDRSTRLEN],
    dst: [u8; INET_ADDRSTRLEN],
    size: u64,
}

/// A record with both ends resolved to hosts of the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficRecord {
    pub src: HostIndex,
    pub dst: HostIndex,
    pub size: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Address {address:?} does not fit in {INET_ADDRSTRLEN} bytes")]
    AddressTooLong { address: String },
    #[error("Address field is not valid text")]
    InvalidText,
    #[error(transparent)]
    Address(#[from] AddressError),
}

impl WireRecord {
    /// build a record, mostly useful to the clients pushing the telemetry.
    ///
    /// The address needs to leave room for the NUL terminator.
    pub fn new(src: &str, dst: &str, size: u64) -> Result<Self, RecordError> {
        Ok(Self {
            src: address_field(src)?,
            dst: address_field(dst)?,
            size,
        })
    }

    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut src = [0; INET_ADDRSTRLEN];
        let mut dst = [0; INET_ADDRSTRLEN];
        let mut size = [0; 8];
        src.copy_from_slice(&bytes[..INET_ADDRSTRLEN]);
        dst.copy_from_slice(&bytes[INET_ADDRSTRLEN..2 * INET_ADDRSTRLEN]);
        size.copy_from_slice(&bytes[2 * INET_ADDRSTRLEN..]);

        Self {
            src,
            dst,
            size: u64::from_le_bytes(size),
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0; RECORD_SIZE];
        bytes[..INET_ADDRSTRLEN].copy_from_slice(&self.src);
        bytes[INET_ADDRSTRLEN..2 * INET_ADDRSTRLEN].copy_from_slice(&self.dst);
        bytes[2 * INET_ADDRSTRLEN..].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }

    pub fn src(&self) -> Result<&str, RecordError> {
        address_text(&self.src)
    }

    pub fn dst(&self) -> Result<&str, RecordError> {
        address_text(&self.dst)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// resolve both addresses and check them against the size of the
    /// fabric.
    pub fn resolve(&self, num_hosts: usize) -> Result<TrafficRecord, RecordError> {
        let src = self.src()?;
        let dst = self.dst()?;
        let src = HostIndex::checked(src, resolve_host(src)?, num_hosts)?;
        let dst = HostIndex::checked(dst, resolve_host(dst)?, num_hosts)?;

        Ok(TrafficRecord {
            src,
            dst,
            size: self.size,
        })
    }
}

fn address_field(address: &str) -> Result<[u8; INET_ADDRSTRLEN], RecordError> {
    let bytes = address.as_bytes();
    if bytes.len() >= INET_ADDRSTRLEN || bytes.contains(&0) {
        return Err(RecordError::AddressTooLong {
            address: address.to_owned(),
        });
    }

    let mut field = [0; INET_ADDRSTRLEN];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

fn address_text(field: &[u8; INET_ADDRSTRLEN]) -> Result<&str, RecordError> {
    let end = field.iter().position(|b| *b == 0).unwrap_or(INET_ADDRSTRLEN);
    std::str::from_utf8(&field[..end]).map_err(|_| RecordError::InvalidText)
}

impl fmt::Debug for WireRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireRecord")
            .field("src", &String::from_utf8_lossy(&self.src))
            .field("dst", &String::from_utf8_lossy(&self.dst))
            .field("size", &self.size)
            .finish()
    }
}

/// Reassemble [`WireRecord`]s from a byte stream.
///
/// ```
/// # use tmatrix_core::record::{RecordDecoder, WireRecord};
/// let record = WireRecord::new("10.0.0.11", "10.0.0.12", 1_500).unwrap();
/// let bytes = record.to_bytes();
///
/// let mut decoder = RecordDecoder::new();
/// decoder.extend(&bytes[..7]);
/// assert!(decoder.next_record().is_none());
/// decoder.extend(&bytes[7..]);
/// assert_eq!(decoder.next_record(), Some(record));
/// ```
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: Vec<u8>,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(RECORD_SIZE),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// number of bytes of an incomplete record kept in the decoder
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_record(&mut self) -> Option<WireRecord> {
        let bytes: &[u8; RECORD_SIZE] = self.buffer.get(..RECORD_SIZE)?.try_into().ok()?;
        let record = WireRecord::from_bytes(bytes);
        self.buffer.drain(..RECORD_SIZE);
        Some(record)
    }
}
