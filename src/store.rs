//! Ownership of a whole captured stream, and the index of packets within it.
//!
//! A [`PacketStore`](struct.PacketStore.html) owns the raw bytes and the start offset of each
//! packet.  Packet views are handed out as short-lived borrows, so none can survive a call to
//! [`insert_bytes()`](struct.PacketStore.html#method.insert_bytes), which re-derives the offsets.

use crate::packet::{Packet, PACKET_SIZE};
use log::debug;
use std::num::ParseIntError;
use std::str::FromStr;
use thiserror::Error;

/// Failure to address a packet or byte position within a `PacketStore`.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The packet index is not less than `packet_count()`.
    #[error("packet {index} out of range, stream has {count} packets")]
    IndexOutOfRange {
        /// the requested packet index
        index: usize,
        /// number of packets in the store
        count: usize,
    },
    /// Duplicating `count` bytes at `offset` would read past the end of the buffer.
    #[error("cannot insert {count} bytes at offset {offset:#x} of a {len} byte stream")]
    OffsetOutOfRange {
        /// requested byte offset
        offset: usize,
        /// requested number of bytes to insert
        count: usize,
        /// current buffer length
        len: usize,
    },
}

/// Failure to parse a [`Realignment`](struct.Realignment.html) table.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RealignmentParseError {
    #[error("realignment step {0:?} is not of the form <packet>:<shift>")]
    MissingShift(String),
    #[error("bad number {text:?} in realignment step")]
    InvalidNumber {
        text: String,
        #[source]
        source: ParseIntError,
    },
}

/// A table of packet start corrections for captures where some bytes were dropped part way
/// through, misaligning every following packet.
///
/// Each step says that from `first_packet` onwards, packets start a further `shift` bytes
/// earlier than the nominal `index * 188`.  Steps accumulate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Realignment {
    steps: Vec<(usize, usize)>,
}

impl Realignment {
    /// An empty table, leaving every packet at `index * 188`.
    pub fn new() -> Realignment {
        Realignment::default()
    }

    /// Adds a step: packets from `first_packet` onwards start another `shift` bytes earlier.
    pub fn with_step(mut self, first_packet: usize, shift: usize) -> Realignment {
        self.steps.push((first_packet, shift));
        self
    }

    /// Total correction, in bytes, applying to the given packet.
    pub fn correction(&self, packet: usize) -> usize {
        self.steps
            .iter()
            .filter(|&&(first, _)| first <= packet)
            .map(|&(_, shift)| shift)
            .sum()
    }

    fn packet_offset(&self, packet: usize) -> Option<usize> {
        (packet * PACKET_SIZE).checked_sub(self.correction(packet))
    }
}

fn parse_step_number(text: &str) -> Result<usize, RealignmentParseError> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|source| RealignmentParseError::InvalidNumber {
        text: text.to_string(),
        source,
    })
}

/// Parses comma separated `<packet>:<shift>` steps, e.g. `"2:0x38,4:56"`.  The packet index is
/// decimal; the shift is decimal, or hex with a `0x` prefix.  An empty string gives an empty
/// table.
impl FromStr for Realignment {
    type Err = RealignmentParseError;

    fn from_str(s: &str) -> Result<Realignment, RealignmentParseError> {
        let mut table = Realignment::new();
        for step in s.split(',').filter(|step| !step.is_empty()) {
            let (packet, shift) = step
                .split_once(':')
                .ok_or_else(|| RealignmentParseError::MissingShift(step.to_string()))?;
            let packet = packet.parse().map_err(|source| RealignmentParseError::InvalidNumber {
                text: packet.to_string(),
                source,
            })?;
            table = table.with_step(packet, parse_step_number(shift)?);
        }
        Ok(table)
    }
}

/// The whole stream as one owned buffer, plus the start offset of every packet in it.
pub struct PacketStore {
    data: Vec<u8>,
    offsets: Vec<usize>,
    realignment: Realignment,
}

impl PacketStore {
    /// Takes ownership of the stream bytes.  Packets are laid out every 188 bytes; any trailing
    /// partial packet is not addressable.
    pub fn load(data: Vec<u8>) -> PacketStore {
        PacketStore::load_realigned(data, Realignment::new())
    }

    /// Like `load()`, but packet start positions are adjusted by the given table.
    pub fn load_realigned(data: Vec<u8>, realignment: Realignment) -> PacketStore {
        let mut store = PacketStore {
            data,
            offsets: Vec::new(),
            realignment,
        };
        store.rebuild();
        store
    }

    fn rebuild(&mut self) {
        self.offsets.clear();
        for index in 0.. {
            match self.realignment.packet_offset(index) {
                Some(offset) if offset + PACKET_SIZE <= self.data.len() => {
                    self.offsets.push(offset)
                }
                _ => break,
            }
        }
        debug!(
            "{} packets in {} byte stream",
            self.offsets.len(),
            self.data.len()
        );
    }

    /// Number of addressable packets.
    pub fn packet_count(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn check_index(&self, index: usize) -> Result<usize, StoreError> {
        self.offsets
            .get(index)
            .copied()
            .ok_or(StoreError::IndexOutOfRange {
                index,
                count: self.packet_count(),
            })
    }

    /// Byte offset at which the given packet starts.
    pub fn packet_offset(&self, index: usize) -> Result<usize, StoreError> {
        self.check_index(index)
    }

    /// Read-only view of the given packet.
    pub fn packet(&self, index: usize) -> Result<Packet<&[u8]>, StoreError> {
        let offset = self.check_index(index)?;
        Ok(Packet::new(&self.data[offset..offset + PACKET_SIZE]))
    }

    /// Mutable view of the given packet.
    pub fn packet_mut(&mut self, index: usize) -> Result<Packet<&mut [u8]>, StoreError> {
        let offset = self.check_index(index)?;
        Ok(Packet::new(&mut self.data[offset..offset + PACKET_SIZE]))
    }

    // Indexing for passes which iterate `0..packet_count()` themselves.  Panics out of range.
    pub(crate) fn view(&self, index: usize) -> Packet<&[u8]> {
        let offset = self.offsets[index];
        Packet::new(&self.data[offset..offset + PACKET_SIZE])
    }

    pub(crate) fn view_mut(&mut self, index: usize) -> Packet<&mut [u8]> {
        let offset = self.offsets[index];
        Packet::new(&mut self.data[offset..offset + PACKET_SIZE])
    }

    /// Iterate over read-only views of every packet, in stream order.
    pub fn packets(&self) -> impl Iterator<Item = Packet<&[u8]>> + '_ {
        self.offsets
            .iter()
            .map(move |&offset| Packet::new(&self.data[offset..offset + PACKET_SIZE]))
    }

    /// Grows the stream by duplicating the `count` bytes which start at `offset`, so the result
    /// is `old[..offset + count]` followed by `old[offset..]`.  Packet offsets are re-derived
    /// afterwards, shifting every later packet boundary by `count` bytes.
    pub fn insert_bytes(&mut self, offset: usize, count: usize) -> Result<(), StoreError> {
        let len = self.data.len();
        let end = offset
            .checked_add(count)
            .filter(|&end| end <= len)
            .ok_or(StoreError::OffsetOutOfRange { offset, count, len })?;
        let duplicate = self.data[offset..end].to_vec();
        self.data.splice(end..end, duplicate);
        self.rebuild();
        Ok(())
    }

    /// The whole stream, including any trailing partial packet.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    /// Give back the stream bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
