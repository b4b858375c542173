//! The ordered sequence of heuristic repair passes applied to a damaged capture.
//!
//! The passes assume a stream with a fixed, small layout: a _Program Association Table_ on
//! `Pid::PAT`, a _Program Map Table_ on `Pid::PMT`, stuffing on `Pid::STUFFING`, and a single
//! elementary stream on a configured data PID.  Any other PID value is taken to be corruption.
//!
//! Each pass runs exactly once per [`Repairer::run()`](struct.Repairer.html#method.run) and sees
//! the output of all earlier passes, so the order below is significant:
//!
//!  1. PID bit-flip recovery
//!  2. neighbour validity repair
//!  3. continuity interpolation
//!  4. mark known PIDs valid (then interpolate again)
//!  5. payload order correction (then interpolate again)
//!  6. oversized adaptation field removal
//!  7. implausible PCR removal
//!  8. TEI / priority / scrambling clearing
//!  9. stuffing packet canonicalisation
//! 10. PAT rewrite
//! 11. PMT rewrite
//! 12. stray PUSI clearing on the data PID
//! 13. end-of-frame padding cleanup on the data PID

use crate::packet::{ContinuityCounter, Packet, Pid, MAX_CLOCK_BASE, PACKET_SIZE, STUFFING_BYTE};
use crate::store::PacketStore;
use log::{debug, trace, warn};

/// Known-good _Program Association Table_ section written into every PAT packet.
pub const PAT_TABLE: [u8; 21] = [
    0x00, 0x00, 0xb0, 0x11, 0x00, 0x00, 0xc1, 0x00, 0x00, 0x00, 0x00, 0xe0, 0x10, 0x00, 0x01,
    0xe0, 0x20, 0xd3, 0x6a, 0xf0, 0xac,
];

/// Known-good _Program Map Table_ section written into every PMT packet.
pub const PMT_TABLE: [u8; 35] = [
    0x00, 0x02, 0xb0, 0x1f, 0x00, 0x01, 0xc1, 0x00, 0x00, 0xe3, 0xe8, 0xf0, 0x00, 0x10, 0xe3,
    0xe8, 0xf0, 0x03, 0x1b, 0x01, 0xf5, 0x80, 0xe3, 0xe9, 0xf0, 0x00, 0x81, 0xe3, 0xf3, 0xf0,
    0x00, 0x3f, 0x64, 0xf1, 0x15,
];

/// Length of the adaptation field which marks a data packet as the start of a frame.
pub const FRAME_START_AF_LENGTH: usize = 7;

// an adaptation field can't be longer than the packet minus the 4 byte header,
const MAX_ADAPTATION_FIELD_LENGTH: usize = PACKET_SIZE - 4;

/// Selects the behaviour of the final pass, which cleans the adaptation field of data packets
/// used to pad out the end of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndPadding {
    /// Zero the flags byte and fill the rest of the adaptation field with `0xff`.
    Clean,
    /// Leave end-of-frame padding packets untouched.
    Skip,
}

/// Parameters for a [`Repairer`](struct.Repairer.html).
#[derive(Clone, Debug)]
pub struct RepairConfig {
    data_pid: Pid,
    max_pcr_base: u64,
    end_padding: EndPadding,
}

impl RepairConfig {
    /// Configuration for streams carrying their elementary stream on `data_pid`, with no upper
    /// bound on plausible PCR values and end padding cleanup enabled.
    pub fn new(data_pid: Pid) -> RepairConfig {
        RepairConfig {
            data_pid,
            max_pcr_base: MAX_CLOCK_BASE,
            end_padding: EndPadding::Clean,
        }
    }

    /// PCR base values above this are taken as evidence of a corrupt adaptation field.
    pub fn with_max_pcr_base(mut self, max_pcr_base: u64) -> RepairConfig {
        self.max_pcr_base = max_pcr_base;
        self
    }

    pub fn with_end_padding(mut self, end_padding: EndPadding) -> RepairConfig {
        self.end_padding = end_padding;
        self
    }

    pub fn data_pid(&self) -> Pid {
        self.data_pid
    }

    pub fn max_pcr_base(&self) -> u64 {
        self.max_pcr_base
    }

    pub fn end_padding(&self) -> EndPadding {
        self.end_padding
    }

    /// `true` for the PAT, PMT, stuffing and data PIDs.
    pub fn is_known_pid(&self, pid: Pid) -> bool {
        pid == Pid::PAT || pid == Pid::PMT || pid == self.data_pid || pid == Pid::STUFFING
    }
}

/// Statistics gathered during one run of the repair passes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// packets rewritten by continuity interpolation
    pub auto_interpolated: usize,
    /// continuity counters corrected by the payload order pass
    pub payload_order_fixes: usize,
    /// adaptation fields dropped because of an implausible PCR
    pub bad_pcr: usize,
    /// indices of PAT / PMT packets whose table could not be written
    pub table_errors: Vec<usize>,
}

impl RepairReport {
    /// `true` if the run changed nothing that is counted.
    pub fn is_clean(&self) -> bool {
        self.auto_interpolated == 0
            && self.payload_order_fixes == 0
            && self.bad_pcr == 0
            && self.table_errors.is_empty()
    }
}

/// Runs the repair passes over a `PacketStore`.
pub struct Repairer {
    config: RepairConfig,
}

impl Repairer {
    pub fn new(config: RepairConfig) -> Repairer {
        Repairer { config }
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    /// Apply every pass, in order, to the whole stream.
    ///
    /// A second run normally changes nothing.  The exception is a packet which only gains its
    /// payload flag in the stuffing or table passes: it could not close an interpolation run this
    /// time, but will on the next run.
    pub fn run(&self, store: &mut PacketStore) -> RepairReport {
        let mut report = RepairReport::default();

        self.recover_pids(store);
        self.repair_invalid_neighbours(store);
        self.interpolate_all(store, &mut report);

        self.mark_known_valid(store);
        self.interpolate_all(store, &mut report);

        self.fix_payload_order(store, &mut report);
        self.interpolate_all(store, &mut report);

        self.remove_oversized_adaptation_fields(store);
        self.remove_bad_pcr(store, &mut report);
        self.clear_noise_flags(store);
        self.canonicalise_stuffing(store);
        self.rewrite_table(store, Pid::PAT, &PAT_TABLE, &mut report);
        self.rewrite_table(store, Pid::PMT, &PMT_TABLE, &mut report);
        self.clear_stray_pusi(store);
        self.clean_end_padding(store);

        debug!(
            "repaired {} packets: {} interpolated, {} payload order, {} bad PCR",
            store.packet_count(),
            report.auto_interpolated,
            report.payload_order_fixes,
            report.bad_pcr
        );
        report
    }

    /// Reassigns unknown PIDs lying within 2 bit-flips of the stuffing or data PID.  Distance 1
    /// is tried before distance 2, and at each distance stuffing wins a tie.
    pub fn recover_pids(&self, store: &mut PacketStore) {
        let candidates = [Pid::STUFFING, self.config.data_pid];
        'packets: for i in 0..store.packet_count() {
            let mut pk = store.view_mut(i);
            let pid = pk.pid();
            if self.config.is_known_pid(pid) {
                continue;
            }
            for tolerance in 1..=2 {
                for &candidate in &candidates {
                    if pid.bit_distance(candidate) <= tolerance {
                        trace!("packet {}: {:?} recovered as {:?}", i, pid, candidate);
                        pk.set_pid(candidate);
                        continue 'packets;
                    }
                }
            }
        }
    }

    /// For each adjacent pair sharing a PID, when one is valid with a known PID and the other
    /// has a bad sync-byte, restores the other's sync-byte.
    pub fn repair_invalid_neighbours(&self, store: &mut PacketStore) {
        for i in 0..store.packet_count().saturating_sub(1) {
            let (first, second) = (store.view(i), store.view(i + 1));
            if first.pid() != second.pid() {
                continue;
            }
            let trusted = |pk: &Packet<&[u8]>| pk.is_valid() && self.config.is_known_pid(pk.pid());
            if trusted(&first) && !second.is_valid() {
                store.view_mut(i + 1).set_valid();
            } else if trusted(&second) && !first.is_valid() {
                store.view_mut(i).set_valid();
            }
        }
    }

    fn is_interpolate_good(&self, pk: &Packet<&[u8]>, pid: Pid) -> bool {
        pk.is_valid() && pk.has_payload() && pk.pid() == pid
    }

    fn is_interpolate_bad(&self, pk: &Packet<&[u8]>) -> bool {
        !pk.is_valid() || !self.config.is_known_pid(pk.pid()) || !pk.has_payload()
    }

    // starting from a bad packet at `start`, true if the next good packet of `pid` carries
    // exactly the counter implied by the good packet just before `start`,
    fn can_auto_fix(&self, store: &PacketStore, start: usize, pid: Pid) -> bool {
        let mut expected = store.view(start - 1).continuity_counter();
        for i in start..store.packet_count() {
            expected = expected.next();
            let pk = store.view(i);
            if self.is_interpolate_good(&pk, pid) {
                return pk.continuity_counter() == expected;
            }
        }
        false
    }

    /// Rewrites runs of bad packets (bad sync-byte, unknown PID or no payload) which directly
    /// follow a good packet on `pid`, when the next good packet on `pid` has exactly the
    /// continuity counter that the run's length implies.  Each packet in the run becomes a valid
    /// payload-carrying packet on `pid` with the next counter value; nothing else is touched.
    pub fn interpolate(&self, store: &mut PacketStore, pid: Pid, report: &mut RepairReport) {
        let count = store.packet_count();
        let mut i = 1;
        while i < count {
            if self.is_interpolate_bad(&store.view(i))
                && self.is_interpolate_good(&store.view(i - 1), pid)
                && self.can_auto_fix(store, i, pid)
            {
                let mut cc = store.view(i - 1).continuity_counter();
                while i < count && self.is_interpolate_bad(&store.view(i)) {
                    cc = cc.next();
                    synthesise(&mut store.view_mut(i), pid, cc);
                    trace!("packet {}: interpolated as {:?} cc {}", i, pid, cc.count());
                    report.auto_interpolated += 1;
                    i += 1;
                }
            }
            i += 1;
        }
    }

    fn interpolate_all(&self, store: &mut PacketStore, report: &mut RepairReport) {
        self.interpolate(store, self.config.data_pid, report);
        self.interpolate(store, Pid::STUFFING, report);
    }

    /// Once a PID is trusted a damaged sync-byte carries no further information, so every
    /// packet with a known PID is made valid.
    pub fn mark_known_valid(&self, store: &mut PacketStore) {
        for i in 0..store.packet_count() {
            let mut pk = store.view_mut(i);
            if self.config.is_known_pid(pk.pid()) {
                pk.set_valid();
            }
        }
    }

    /// Looks at every window of 4 valid packets on one known PID.  If the counters of the first
    /// three run on consecutively but the fourth does not follow the third, the fourth's counter
    /// is corrected.
    pub fn fix_payload_order(&self, store: &mut PacketStore, report: &mut RepairReport) {
        for i in 0..store.packet_count().saturating_sub(3) {
            let window = [0, 1, 2, 3].map(|k| {
                let pk = store.view(i + k);
                (pk.is_valid(), pk.pid(), pk.continuity_counter())
            });
            let pid = window[0].1;
            if !self.config.is_known_pid(pid)
                || !window.iter().all(|&(valid, p, _)| valid && p == pid)
            {
                continue;
            }
            let cc = window.map(|(_, _, cc)| cc);
            if cc[1].follows(cc[0]) && cc[2].follows(cc[1]) && !cc[3].follows(cc[2]) {
                trace!(
                    "packet {}: counter {} reordered to {}",
                    i + 3,
                    cc[3].count(),
                    cc[2].next().count()
                );
                store.view_mut(i + 3).set_continuity_counter(cc[2].next());
                report.payload_order_fixes += 1;
            }
        }
    }

    pub fn remove_oversized_adaptation_fields(&self, store: &mut PacketStore) {
        for i in 0..store.packet_count() {
            let mut pk = store.view_mut(i);
            if pk.has_adaptation_field()
                && pk.adaptation_field_length() > MAX_ADAPTATION_FIELD_LENGTH
            {
                pk.remove_adaptation_field();
            }
        }
    }

    /// A PCR beyond the configured maximum means the whole adaptation field is suspect, so the
    /// field is dropped rather than just the PCR.
    pub fn remove_bad_pcr(&self, store: &mut PacketStore, report: &mut RepairReport) {
        for i in 0..store.packet_count() {
            let mut pk = store.view_mut(i);
            if !pk.is_valid() {
                continue;
            }
            if let Some(base) = pk.pcr_base() {
                if base > self.config.max_pcr_base {
                    trace!("packet {}: PCR {} out of range", i, base);
                    pk.remove_adaptation_field();
                    report.bad_pcr += 1;
                }
            }
        }
    }

    pub fn clear_noise_flags(&self, store: &mut PacketStore) {
        for i in 0..store.packet_count() {
            let mut pk = store.view_mut(i);
            pk.clear_transport_error_indicator();
            pk.clear_transport_priority();
            pk.clear_scrambling();
        }
    }

    /// Stuffing packets never start a unit or carry an adaptation field, and their payload is all
    /// `0xff`.
    pub fn canonicalise_stuffing(&self, store: &mut PacketStore) {
        for i in 0..store.packet_count() {
            let mut pk = store.view_mut(i);
            if pk.is_valid() && pk.pid() == Pid::STUFFING {
                pk.clear_payload_unit_start_indicator();
                pk.remove_adaptation_field();
                pk.set_payload_flag();
                pk.write_padding();
            }
        }
    }

    /// Replaces the payload of every valid packet on `pid` with `table` followed by `0xff`
    /// padding, and makes it a unit start with no adaptation field.
    pub fn rewrite_table(
        &self,
        store: &mut PacketStore,
        pid: Pid,
        table: &[u8],
        report: &mut RepairReport,
    ) {
        for i in 0..store.packet_count() {
            let mut pk = store.view_mut(i);
            if !pk.is_valid() || pk.pid() != pid {
                continue;
            }
            pk.set_payload_unit_start_indicator();
            pk.remove_adaptation_field();
            pk.set_payload_flag();
            match pk.payload_mut() {
                Some(payload) if payload.len() >= table.len() => {
                    let (head, tail) = payload.split_at_mut(table.len());
                    head.copy_from_slice(table);
                    tail.fill(STUFFING_BYTE);
                }
                _ => {
                    warn!("packet {}: can't write {:?} table", i, pid);
                    report.table_errors.push(i);
                }
            }
        }
    }

    /// Only packets with the 7 byte, PCR carrying adaptation field start a frame on the data
    /// PID.
    pub fn clear_stray_pusi(&self, store: &mut PacketStore) {
        for i in 0..store.packet_count() {
            let mut pk = store.view_mut(i);
            if pk.is_valid()
                && pk.pid() == self.config.data_pid
                && (!pk.has_adaptation_field()
                    || pk.adaptation_field_length() != FRAME_START_AF_LENGTH)
            {
                pk.clear_payload_unit_start_indicator();
            }
        }
    }

    /// Data packets with an adaptation field but no PUSI pad out the end of a frame.  Their
    /// adaptation field flags are zeroed and bytes `2..length` of the field are filled with
    /// `0xff`.
    pub fn clean_end_padding(&self, store: &mut PacketStore) {
        if self.config.end_padding == EndPadding::Skip {
            return;
        }
        for i in 0..store.packet_count() {
            let mut pk = store.view_mut(i);
            if !pk.is_valid()
                || pk.pid() != self.config.data_pid
                || pk.payload_unit_start_indicator()
            {
                continue;
            }
            let len = pk.adaptation_field_length();
            if let Some(af) = pk.adaptation_field_mut() {
                if len > 0 {
                    af[1] = 0;
                }
                for b in af.iter_mut().take(len).skip(2) {
                    *b = STUFFING_BYTE;
                }
            }
        }
    }
}

fn synthesise(pk: &mut Packet<&mut [u8]>, pid: Pid, cc: ContinuityCounter) {
    pk.set_valid();
    pk.set_pid(pid);
    pk.set_payload_flag();
    pk.set_continuity_counter(cc);
}
