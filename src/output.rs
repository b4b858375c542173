//! The final walk over the repaired stream, deciding which packets are written out.
//!
//! Packets on a PID outside the known set are never written.  On the data PID the continuity
//! counter is checked against the last accepted packet; the first packet breaking the sequence
//! is flagged, and from the first rejected packet onwards the stream is reported as bad.  Later
//! packets are still written.

use crate::frame::FRAME_HEADER_SIZE;
use crate::packet::{ContinuityCounter, Pid};
use crate::repair::RepairConfig;
use crate::store::PacketStore;
use fixedbitset::FixedBitSet;
use log::warn;
use std::io;

/// What the output walk decided for one packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// written to both outputs (the elementary stream only receives data PID payloads)
    Accepted,
    /// not written anywhere
    UnknownPid,
    /// first data PID packet whose continuity counter does not follow the last accepted one;
    /// written to the transport stream only
    Discontinuity,
}

impl Verdict {
    /// `true` if the packet belongs in the repaired transport stream.
    pub fn emits_packet(self) -> bool {
        self != Verdict::UnknownPid
    }
}

#[derive(Clone, Debug, Default)]
pub struct OutputOptions {
    /// number of leading packets left out of the walk altogether
    pub skip: usize,
}

/// Result of [`check()`](fn.check.html).
pub struct StreamCheck {
    data_pid: Pid,
    start: usize,
    verdicts: Vec<Verdict>,
    discontinuities: FixedBitSet,
    bad_from: Option<usize>,
}

impl StreamCheck {
    /// Verdict for the given packet, or `None` if it was skipped or is out of range.
    pub fn verdict(&self, index: usize) -> Option<Verdict> {
        index
            .checked_sub(self.start)
            .and_then(|i| self.verdicts.get(i))
            .copied()
    }

    /// `(packet index, verdict)` for every packet the walk visited.
    pub fn verdicts(&self) -> impl Iterator<Item = (usize, Verdict)> + '_ {
        self.verdicts
            .iter()
            .enumerate()
            .map(move |(i, &v)| (self.start + i, v))
    }

    /// `true` if the given packet was flagged as a continuity discontinuity.
    pub fn is_discontinuity(&self, index: usize) -> bool {
        self.discontinuities.contains(index)
    }

    /// Index of the first rejected packet, from which the stream is considered bad.
    pub fn bad_from(&self) -> Option<usize> {
        self.bad_from
    }

    pub fn data_pid(&self) -> Pid {
        self.data_pid
    }
}

/// Walks the packets of `store`, from `options.skip` onwards, deciding the fate of each.
pub fn check(store: &PacketStore, config: &RepairConfig, options: &OutputOptions) -> StreamCheck {
    let data_pid = config.data_pid();
    let start = options.skip.min(store.packet_count());
    let mut verdicts = Vec::with_capacity(store.packet_count() - start);
    let mut discontinuities = FixedBitSet::with_capacity(store.packet_count());
    let mut bad_from = None;
    let mut last_cc: Option<ContinuityCounter> = None;
    let mut flagged = false;

    for (i, pk) in store.packets().enumerate().skip(start) {
        let pid = pk.pid();
        let verdict = if !config.is_known_pid(pid) {
            Verdict::UnknownPid
        } else if pid != data_pid {
            Verdict::Accepted
        } else {
            let cc = pk.continuity_counter();
            match last_cc {
                Some(last) if !flagged && !cc.follows(last) => {
                    flagged = true;
                    discontinuities.insert(i);
                    Verdict::Discontinuity
                }
                _ => {
                    last_cc = Some(cc);
                    Verdict::Accepted
                }
            }
        };
        if verdict != Verdict::Accepted && bad_from.is_none() {
            warn!("stream is bad from packet {} onwards ({:?})", i, verdict);
            bad_from = Some(i);
        }
        verdicts.push(verdict);
    }

    StreamCheck {
        data_pid,
        start,
        verdicts,
        discontinuities,
        bad_from,
    }
}

/// Writes every packet whose verdict allows it, returning the number of packets written.
pub fn write_transport_stream<W: io::Write>(
    store: &PacketStore,
    check: &StreamCheck,
    mut out: W,
) -> io::Result<usize> {
    let mut written = 0;
    for (i, verdict) in check.verdicts() {
        if verdict.emits_packet() {
            if let Ok(pk) = store.packet(i) {
                out.write_all(pk.buffer())?;
                written += 1;
            }
        }
    }
    out.flush()?;
    Ok(written)
}

/// Writes the payload of each accepted data PID packet, leaving out the frame header of frame
/// start packets.  Returns the number of bytes written.
pub fn write_elementary_stream<W: io::Write>(
    store: &PacketStore,
    check: &StreamCheck,
    mut out: W,
) -> io::Result<usize> {
    let mut written = 0;
    for (i, verdict) in check.verdicts() {
        if verdict != Verdict::Accepted {
            continue;
        }
        let pk = match store.packet(i) {
            Ok(pk) if pk.pid() == check.data_pid() => pk,
            _ => continue,
        };
        let skip = if pk.payload_unit_start_indicator() {
            FRAME_HEADER_SIZE
        } else {
            0
        };
        if let Some(data) = pk.payload().and_then(|p| p.get(skip..)) {
            out.write_all(data)?;
            written += data.len();
        }
    }
    out.flush()?;
    Ok(written)
}
