//! Reconstruction of elementary stream framing from the repaired packet sequence.
//!
//! Each frame on the data PID begins with a packet carrying PUSI and a 7 byte adaptation field
//! (holding the frame's PCR), whose payload opens with a 16 byte frame header.  The header is not
//! part of the frame data, so [`scan()`](fn.scan.html) reports payload offsets and sizes with it
//! excluded.

use crate::packet::{Pid, PCR_BASE_SHIFT};
use crate::repair::FRAME_START_AF_LENGTH;
use crate::store::PacketStore;
use log::{debug, trace};

/// Bytes at the start of a frame-start payload which hold the frame header rather than frame
/// data.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Frequency of the 33-bit PCR base and PTS clocks.
pub const CLOCK_RATE: u64 = 90_000;

// payload byte of a frame-start packet identifying an intra coded frame,
const INTRA_MARKER_OFFSET: usize = 19;
const INTRA_MARKER: u8 = 0xb0;

/// Framing details derived for one data packet.  Only meaningful until the packets are next
/// modified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameMetadata {
    /// PCR base of the most recent frame start, or `0` if that packet carried no PCR
    pub frame_pcr: u64,
    /// payload bytes of the current frame in packets before this one
    pub frame_offset: usize,
    /// offset of this packet's frame data within the packet
    pub payload_offset: usize,
    /// number of frame data bytes this packet carries
    pub payload_size: usize,
}

/// Per-packet result of [`scan()`](fn.scan.html), indexed like the `PacketStore`.  Entries for
/// PAT, PMT and stuffing packets are `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameMap {
    entries: Vec<Option<FrameMetadata>>,
}

impl FrameMap {
    pub fn get(&self, index: usize) -> Option<&FrameMetadata> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&FrameMetadata>> + '_ {
        self.entries.iter().map(Option::as_ref)
    }
}

fn is_table_or_stuffing(pid: Pid) -> bool {
    pid == Pid::PAT || pid == Pid::PMT || pid == Pid::STUFFING
}

/// Walks every packet whose PID is not PAT, PMT or stuffing, working out where it sits within
/// its frame.
///
/// Any such PID is treated as frame data, not just the configured data PID.  The payload-present
/// bit of each of these packets is set as a side effect, since decoders assume a payload is
/// present on data packets regardless.
pub fn scan(store: &mut PacketStore) -> FrameMap {
    let mut entries = Vec::with_capacity(store.packet_count());
    let mut last_pcr = 0;
    let mut frame_offset = 0;
    for i in 0..store.packet_count() {
        let mut pk = store.view_mut(i);
        if is_table_or_stuffing(pk.pid()) {
            entries.push(None);
            continue;
        }
        pk.set_payload_flag();
        let (payload_offset, payload_size) = if pk.payload_unit_start_indicator()
            && pk.has_adaptation_field()
            && pk.adaptation_field_length() == FRAME_START_AF_LENGTH
        {
            last_pcr = pk.pcr().unwrap_or(0);
            frame_offset = 0;
            (
                pk.payload_offset() + FRAME_HEADER_SIZE,
                pk.payload_size().saturating_sub(FRAME_HEADER_SIZE),
            )
        } else {
            (pk.payload_offset(), pk.payload_size())
        };
        entries.push(Some(FrameMetadata {
            frame_pcr: last_pcr >> PCR_BASE_SHIFT,
            frame_offset,
            payload_offset,
            payload_size,
        }));
        frame_offset += payload_size;
    }
    FrameMap { entries }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// intra coded frame
    Intra,
    /// predicted frame
    Predicted,
}

/// Summary of one frame on the data PID, as found by [`frames()`](fn.frames.html).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameReport {
    /// 1-based frame number
    pub number: usize,
    pub kind: FrameKind,
    /// index of the packet starting the frame
    pub start_packet: usize,
    /// index of the last data PID packet before the next frame starts (the start packet itself
    /// if there is none)
    pub end_packet: usize,
    /// PCR base from the start packet, if present
    pub pcr_base: Option<u64>,
    /// the end packet's adaptation field flags, where the field is non-empty and the flags
    /// are not zero as expected
    pub bad_end_flags: Option<u8>,
}

impl FrameReport {
    /// Presentation time of the frame start in seconds, `0.0` without a PCR.
    pub fn seconds(&self) -> f64 {
        self.pcr_base.unwrap_or(0) as f64 / CLOCK_RATE as f64
    }
}

fn is_frame_start(store: &PacketStore, index: usize, data_pid: Pid) -> bool {
    let pk = store.view(index);
    pk.pid() == data_pid && pk.payload_unit_start_indicator()
}

fn frame_end(store: &PacketStore, start: usize, data_pid: Pid) -> usize {
    (start + 1..store.packet_count())
        .take_while(|&i| !is_frame_start(store, i, data_pid))
        .filter(|&i| store.view(i).pid() == data_pid)
        .last()
        .unwrap_or(start)
}

/// Lists the frames on `data_pid`.  Unlike `scan()`, a frame start here is any packet on the data
/// PID with PUSI set.
pub fn frames(store: &PacketStore, data_pid: Pid) -> Vec<FrameReport> {
    let mut result = vec![];
    for start in 0..store.packet_count() {
        if !is_frame_start(store, start, data_pid) {
            continue;
        }
        let end_packet = frame_end(store, start, data_pid);
        let first = store.view(start);
        let kind = match first.payload().and_then(|p| p.get(INTRA_MARKER_OFFSET)) {
            Some(&INTRA_MARKER) => FrameKind::Intra,
            _ => FrameKind::Predicted,
        };
        let bad_end_flags = store
            .view(end_packet)
            .adaptation_field()
            .filter(|af| af[0] > 0)
            .and_then(|af| af.get(1).copied())
            .filter(|&flags| flags != 0);
        let report = FrameReport {
            number: result.len() + 1,
            kind,
            start_packet: start,
            end_packet,
            pcr_base: first.pcr_base(),
            bad_end_flags,
        };
        trace!("{:?}", report);
        result.push(report);
    }
    debug!("{} frames on {:?}", result.len(), data_pid);
    result
}

/// Removes the adaptation field from every packet strictly between the start and end packets
/// of each frame on `data_pid`, since only those two legitimately carry one.  Returns the number
/// of frames processed.
pub fn strip_interior_adaptation_fields(store: &mut PacketStore, data_pid: Pid) -> usize {
    let ranges: Vec<(usize, usize)> = frames(store, data_pid)
        .iter()
        .map(|f| (f.start_packet, f.end_packet))
        .collect();
    for &(start, end) in &ranges {
        for i in start + 1..end {
            store.view_mut(i).remove_adaptation_field();
        }
    }
    ranges.len()
}
