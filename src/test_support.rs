//! Builders for hand-made packet sequences used by the unit tests.

use crate::packet::{ContinuityCounter, Packet, Pid, PACKET_SIZE, SYNC_BYTE};
use crate::store::PacketStore;

pub const DATA_PID: Pid = Pid::new(0x3e8);

/// A valid, payload-only packet whose payload bytes are all `0x00`.
pub fn payload_packet(pid: Pid, cc: u8) -> [u8; PACKET_SIZE] {
    let mut buf = [0u8; PACKET_SIZE];
    buf[0] = SYNC_BYTE;
    let mut pk = Packet::new(&mut buf[..]);
    pk.set_pid(pid);
    pk.set_payload_flag();
    pk.set_continuity_counter(ContinuityCounter::new(cc));
    buf
}

/// A frame-start packet on the given PID: PUSI, a 7 byte adaptation field carrying `pcr_base`,
/// and a payload.
pub fn frame_start_packet(pid: Pid, cc: u8, pcr_base: u64) -> [u8; PACKET_SIZE] {
    let mut buf = payload_packet(pid, cc);
    let mut pk = Packet::new(&mut buf[..]);
    pk.set_payload_unit_start_indicator();
    pk.set_adaptation_field_length(7);
    pk.set_pcr(pcr_base << crate::packet::PCR_BASE_SHIFT);
    buf
}

/// A packet that fails every validity test: bad sync-byte, a PID no repair rule recognises,
/// and no payload.
pub fn garbage_packet() -> [u8; PACKET_SIZE] {
    let mut buf = [0u8; PACKET_SIZE];
    buf[0] = 0x12;
    buf[1] = 0x0a;
    buf[2] = 0xaa;
    buf
}

pub fn store_of(packets: &[[u8; PACKET_SIZE]]) -> PacketStore {
    PacketStore::load(packets.concat())
}

pub fn counters(store: &PacketStore) -> Vec<u8> {
    store
        .packets()
        .map(|pk| pk.continuity_counter().count())
        .collect()
}
