use mpeg2ts_repair::packet::{ContinuityCounter, Packet, Pid, PACKET_SIZE, PCR_BASE_SHIFT, SYNC_BYTE};

pub const DATA_PID: Pid = Pid::new(0x3e8);

fn packet(pid: Pid, cc: &mut ContinuityCounter) -> [u8; PACKET_SIZE] {
    let mut buf = [0x5au8; PACKET_SIZE];
    buf[0] = SYNC_BYTE;
    buf[1] = 0;
    buf[3] = 0;
    let mut pk = Packet::new(&mut buf[..]);
    pk.set_pid(pid);
    pk.set_payload_flag();
    pk.set_continuity_counter(*cc);
    *cc = cc.next();
    buf
}

/// A stream of `frames` frames, 24 packets each, with a sprinkling of the damage seen in real
/// captures: lost sync-bytes, flipped PID bits and wiped packets.
pub fn damaged_stream(frames: usize) -> Vec<u8> {
    let mut data_cc = ContinuityCounter::new(0);
    let mut stuffing_cc = ContinuityCounter::new(0);
    let mut pat_cc = ContinuityCounter::new(0);
    let mut pmt_cc = ContinuityCounter::new(0);
    let mut out = Vec::with_capacity(frames * 24 * PACKET_SIZE);
    for f in 0..frames {
        out.extend_from_slice(&packet(Pid::PAT, &mut pat_cc));
        out.extend_from_slice(&packet(Pid::PMT, &mut pmt_cc));
        let mut start = packet(DATA_PID, &mut data_cc);
        let mut pk = Packet::new(&mut start[..]);
        pk.set_payload_unit_start_indicator();
        pk.set_adaptation_field_length(7);
        pk.set_pcr((f as u64 * 3003) << PCR_BASE_SHIFT);
        out.extend_from_slice(&start);
        for _ in 0..18 {
            out.extend_from_slice(&packet(DATA_PID, &mut data_cc));
        }
        for _ in 0..3 {
            out.extend_from_slice(&packet(Pid::STUFFING, &mut stuffing_cc));
        }
    }
    for (i, pk) in out.chunks_exact_mut(PACKET_SIZE).enumerate() {
        if i % 97 == 50 {
            pk[0] = 0x07;
        } else if i % 131 == 70 {
            pk[2] ^= 0x01;
        } else if i % 211 == 105 {
            pk.fill(0);
        }
    }
    out
}
