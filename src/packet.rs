//! A [`Packet`](./struct.Packet.html) view and associated infrastructure to read and patch the
//! fields of a single MPEG Transport Stream packet in place.
//!
//! Unlike a strict parser, the accessors here never reject a packet.  Damaged captures are the
//! normal input, so every getter answers for any 188 bytes (e.g. a packet with a bad sync-byte
//! still has a `pid()`), and the setters exist so that the repair passes can patch the header
//! without copying the packet.

use std::convert::TryFrom;
use std::fmt;

/// The fixed 188 byte size of a transport stream packet.
pub const PACKET_SIZE: usize = 188;

/// The value `0x47`, which must appear in the first byte of every transport stream packet.
pub const SYNC_BYTE: u8 = 0x47;

/// Byte used to fill unused payload space.
pub const STUFFING_BYTE: u8 = 0xff;

/// Largest value representable by the 33-bit PCR base and PTS fields.
pub const MAX_CLOCK_BASE: u64 = (1 << 33) - 1;

/// Number of low bits of the raw 48-bit PCR field sitting below the 33-bit base (6 reserved
/// bits plus the 9-bit extension).
pub const PCR_BASE_SHIFT: u32 = 15;

const FIXED_HEADER_SIZE: usize = 4;
// when AF present, a 1-byte 'length' field precedes the content,
const ADAPTATION_FIELD_OFFSET: usize = FIXED_HEADER_SIZE + 1;
const PCR_SIZE: usize = 6;
const PCR_FLAG: u8 = 0b0001_0000;
const OPCR_FLAG: u8 = 0b0000_1000;
// the PES header bytes which hold the PTS field,
const PTS_OFFSET: usize = 9;
const PTS_SIZE: usize = 5;

/// A counter value used within a transport stream to detect discontinuities in a sequence of
/// packets.  The continuity counter should increase by one for each packet with a given PID
/// that carries a payload.
///
/// See [`Packet.continuity_counter()`](struct.Packet.html#method.continuity_counter)
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct ContinuityCounter {
    val: u8,
}

impl From<u8> for ContinuityCounter {
    #[inline]
    fn from(count: u8) -> ContinuityCounter {
        ContinuityCounter::new(count)
    }
}

impl ContinuityCounter {
    /// Panics if the given value is greater than 15.
    #[inline]
    pub fn new(count: u8) -> ContinuityCounter {
        assert!(count < 0b10000);
        ContinuityCounter { val: count }
    }

    /// Returns this counter's value, which will be between 0 and 15 inclusive.
    #[inline]
    pub fn count(self) -> u8 {
        self.val
    }

    /// The counter value expected on the next payload-bearing packet, wrapping from 15 to 0.
    #[inline]
    pub fn next(self) -> ContinuityCounter {
        ContinuityCounter {
            val: (self.val + 1) & 0b1111,
        }
    }

    /// true iff the given `ContinuityCounter` value follows this one.  Note that the maximum
    /// counter value is 15, and the counter 'wraps around':
    ///
    /// ```rust
    /// # use mpeg2ts_repair::packet::ContinuityCounter;
    /// let a = ContinuityCounter::new(0);
    /// let b = ContinuityCounter::new(15);
    /// assert!(a.follows(b));  // after 15, counter wraps around to 0
    /// ```
    #[inline]
    pub fn follows(self, other: ContinuityCounter) -> bool {
        other.next() == self
    }
}

/// A Packet Identifier value, between `0x0000` and `0x1fff`.
///
/// PID values identify a particular sub-stream within the overall Transport Stream.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Pid(u16);
impl Pid {
    /// The largest possible PID value, `0x1fff`.
    pub const MAX_VALUE: u16 = 0x1fff;

    /// PID of the _Program Association Table_.
    pub const PAT: Pid = Pid::new(0);
    /// PID on which the streams handled here carry their _Program Map Table_.
    pub const PMT: Pid = Pid::new(0x20);
    /// PID of 'stuffing' packets, which carry no data.
    pub const STUFFING: Pid = Pid::new(0x1fff);

    /// Panics if the given value is greater than `Pid::MAX_VALUE`.
    pub const fn new(pid: u16) -> Pid {
        assert!(pid <= Pid::MAX_VALUE);
        Pid(pid)
    }

    /// Number of bits in which the two PID values differ.
    #[inline]
    pub fn bit_distance(self, other: Pid) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}
impl TryFrom<u16> for Pid {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        if value <= Pid::MAX_VALUE {
            Ok(Pid(value))
        } else {
            Err(())
        }
    }
}
impl From<Pid> for u16 {
    #[inline]
    fn from(pid: Pid) -> Self {
        pid.0
    }
}
impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "Pid({:04x})", self.0)
    }
}

/// A transport stream `Packet` is a wrapper around a 188 byte slice which allows the bytes to be
/// interpreted as a packet structure per _ISO/IEC 13818-1, Section 2.4.3.3_.
///
/// `Packet<&[u8]>` only reads; `Packet<&mut [u8]>` additionally exposes the setters used by
/// the repair passes and fix commands.
pub struct Packet<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> Packet<B> {
    /// Panics if the buffer size is not exactly `PACKET_SIZE` (188) bytes.  The sync-byte is
    /// deliberately not checked, see `is_valid()`.
    #[inline(always)]
    pub fn new(buf: B) -> Packet<B> {
        assert_eq!(buf.as_ref().len(), PACKET_SIZE);
        Packet { buf }
    }

    #[inline(always)]
    fn bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    /// borrow a reference to the underlying buffer of this packet
    pub fn buffer(&self) -> &[u8] {
        self.bytes()
    }

    /// `true` if the packet starts with `SYNC_BYTE`.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.bytes()[0] == SYNC_BYTE
    }

    /// *May* have been set if some previous processing of this TS data detected at least
    /// 1 uncorrectable bit error in this TS packet.
    #[inline]
    pub fn transport_error_indicator(&self) -> bool {
        self.bytes()[1] & 0b1000_0000 != 0
    }

    /// `true` if this packet's payload begins a new PES packet or section.
    #[inline]
    pub fn payload_unit_start_indicator(&self) -> bool {
        self.bytes()[1] & 0b0100_0000 != 0
    }

    /// When `1`, this TS packet has higher priority than other packets of the the same PID.
    pub fn transport_priority(&self) -> bool {
        self.bytes()[1] & 0b0010_0000 != 0
    }

    /// The sub-stream to which a particular packet belongs is indicated by this Packet Identifier
    /// value.
    #[inline]
    pub fn pid(&self) -> Pid {
        Pid(u16::from(self.bytes()[1] & 0b0001_1111) << 8 | u16::from(self.bytes()[2]))
    }

    /// `true` if either _transport_scrambling_control_ bit is set.
    pub fn is_scrambled(&self) -> bool {
        self.bytes()[3] & 0b1100_0000 != 0
    }

    /// `true` if the adaptation-field-present bit is set.
    #[inline]
    pub fn has_adaptation_field(&self) -> bool {
        self.bytes()[3] & 0b0010_0000 != 0
    }

    /// `true` if the payload-present bit is set.
    #[inline]
    pub fn has_payload(&self) -> bool {
        self.bytes()[3] & 0b0001_0000 != 0
    }

    /// Each packet with a given `pid()` value within a transport stream should have a continuity
    /// counter value which increases by 1 from the last counter value seen.
    #[inline]
    pub fn continuity_counter(&self) -> ContinuityCounter {
        ContinuityCounter::new(self.bytes()[3] & 0b0000_1111)
    }

    /// Value of the adaptation field length byte, or `0` if there is no adaptation field.
    #[inline]
    pub fn adaptation_field_length(&self) -> usize {
        if self.has_adaptation_field() {
            self.bytes()[FIXED_HEADER_SIZE] as usize
        } else {
            0
        }
    }

    fn adaptation_field_end(&self) -> usize {
        (ADAPTATION_FIELD_OFFSET + self.adaptation_field_length()).min(PACKET_SIZE)
    }

    /// The adaptation field bytes, starting with the length byte (so that `af[1]` holds the
    /// flags), or `None` if the adaptation-field-present bit is clear.  A length running past the
    /// end of the packet is clamped.
    pub fn adaptation_field(&self) -> Option<&[u8]> {
        if self.has_adaptation_field() {
            Some(&self.bytes()[FIXED_HEADER_SIZE..self.adaptation_field_end()])
        } else {
            None
        }
    }

    fn adaptation_field_flags(&self) -> Option<u8> {
        self.adaptation_field()
            .filter(|af| af.len() > 1)
            .map(|af| af[1])
    }

    /// `true` if the adaptation field is long enough to hold a PCR and flags one as present.
    pub fn has_pcr(&self) -> bool {
        self.adaptation_field_length() > PCR_SIZE
            && self.adaptation_field_flags().map_or(false, |f| f & PCR_FLAG != 0)
    }

    /// `true` if the adaptation field flags an OPCR as present.
    pub fn has_opcr(&self) -> bool {
        self.adaptation_field_flags()
            .map_or(false, |f| f & OPCR_FLAG != 0)
    }

    /// The raw 48-bit PCR field (33-bit base shifted left by `PCR_BASE_SHIFT`, with the reserved
    /// and extension bits below it), or `None` if `has_pcr()` is false.
    pub fn pcr(&self) -> Option<u64> {
        if !self.has_pcr() {
            return None;
        }
        let start = ADAPTATION_FIELD_OFFSET + 1;
        Some(
            self.bytes()[start..start + PCR_SIZE]
                .iter()
                .fold(0u64, |acc, &b| acc << 8 | u64::from(b)),
        )
    }

    /// The 33-bit, 90kHz base of the PCR.
    pub fn pcr_base(&self) -> Option<u64> {
        self.pcr().map(|raw| raw >> PCR_BASE_SHIFT)
    }

    /// Offset of the first payload byte within the packet, or `0` if the payload-present bit is
    /// clear.
    pub fn payload_offset(&self) -> usize {
        if !self.has_payload() {
            0
        } else if self.has_adaptation_field() {
            ADAPTATION_FIELD_OFFSET + self.adaptation_field_length()
        } else {
            FIXED_HEADER_SIZE
        }
    }

    /// Number of payload bytes, or `0` if there is no payload or the adaptation field leaves no
    /// room for one.
    pub fn payload_size(&self) -> usize {
        if !self.has_payload() {
            0
        } else if self.has_adaptation_field() {
            let af_len = self.adaptation_field_length();
            if af_len > PACKET_SIZE - ADAPTATION_FIELD_OFFSET {
                0
            } else {
                PACKET_SIZE - ADAPTATION_FIELD_OFFSET - af_len
            }
        } else {
            PACKET_SIZE - FIXED_HEADER_SIZE
        }
    }

    /// The data contained within the packet following the headers.  `None` if the
    /// payload-present bit is clear, or if the adaptation field consumes the whole packet.
    pub fn payload(&self) -> Option<&[u8]> {
        let offset = self.payload_offset();
        if self.has_payload() && offset < PACKET_SIZE {
            Some(&self.bytes()[offset..])
        } else {
            None
        }
    }

    fn pes_payload(&self) -> Option<&[u8]> {
        self.payload()
            .filter(|p| p.len() >= PTS_OFFSET + PTS_SIZE && p[..3] == [0, 0, 1])
    }

    /// `true` if the payload starts with a PES start code and is long enough to hold a PTS.
    pub fn has_pes_header(&self) -> bool {
        self.pes_payload().is_some()
    }

    /// `true` if the payload starts with a PES header flagging a PTS as present.
    pub fn has_pts(&self) -> bool {
        self.pts().is_some()
    }

    /// The 33-bit _Presentation Time Stamp_ from the PES header at the start of the payload, or
    /// `None` if there is no PES header or it carries no PTS.
    pub fn pts(&self) -> Option<u64> {
        let pay = self.pes_payload()?;
        if pay[7] & 0b1000_0000 == 0 {
            return None;
        }
        let ts = &pay[PTS_OFFSET..PTS_OFFSET + PTS_SIZE];
        Some(
            (u64::from(ts[0] & 0b0000_1110) << 29)
                | u64::from(ts[1]) << 22
                | (u64::from(ts[2] & 0b1111_1110) << 14)
                | u64::from(ts[3]) << 7
                | u64::from(ts[4]) >> 1,
        )
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Packet<B> {
    #[inline(always)]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut()
    }

    /// Writes `SYNC_BYTE`, so that `is_valid()` becomes true.
    pub fn set_valid(&mut self) {
        self.bytes_mut()[0] = SYNC_BYTE;
    }

    /// Replaces the 13 PID bits, leaving the TEI, PUSI and priority bits alone.
    pub fn set_pid(&mut self, pid: Pid) {
        let pid = u16::from(pid);
        let b = self.bytes_mut();
        b[1] = (b[1] & 0b1110_0000) | (pid >> 8) as u8;
        b[2] = (pid & 0xff) as u8;
    }

    pub fn clear_transport_error_indicator(&mut self) {
        self.bytes_mut()[1] &= !0b1000_0000;
    }

    pub fn set_payload_unit_start_indicator(&mut self) {
        self.bytes_mut()[1] |= 0b0100_0000;
    }

    pub fn clear_payload_unit_start_indicator(&mut self) {
        self.bytes_mut()[1] &= !0b0100_0000;
    }

    pub fn clear_transport_priority(&mut self) {
        self.bytes_mut()[1] &= !0b0010_0000;
    }

    pub fn clear_scrambling(&mut self) {
        self.bytes_mut()[3] &= !0b1100_0000;
    }

    pub fn set_payload_flag(&mut self) {
        self.bytes_mut()[3] |= 0b0001_0000;
    }

    /// Clears the adaptation-field-present bit.  The adaptation field bytes themselves are left
    /// in place, and so become the start of the payload.
    pub fn remove_adaptation_field(&mut self) {
        self.bytes_mut()[3] &= !0b0010_0000;
    }

    /// Writes the adaptation field length byte.  This always sets the adaptation-field-present
    /// bit too, so a packet without an adaptation field gains one.
    pub fn set_adaptation_field_length(&mut self, len: u8) {
        let b = self.bytes_mut();
        b[3] |= 0b0010_0000;
        b[FIXED_HEADER_SIZE] = len;
    }

    pub fn set_continuity_counter(&mut self, cc: ContinuityCounter) {
        let b = self.bytes_mut();
        b[3] = (b[3] & 0b1111_0000) | cc.count();
    }

    /// Mutable access to the adaptation field bytes, with the same bounds as
    /// `adaptation_field()`.
    pub fn adaptation_field_mut(&mut self) -> Option<&mut [u8]> {
        if self.has_adaptation_field() {
            let end = self.adaptation_field_end();
            Some(&mut self.bytes_mut()[FIXED_HEADER_SIZE..end])
        } else {
            None
        }
    }

    /// Mutable access to the payload, with the same bounds as `payload()`.
    pub fn payload_mut(&mut self) -> Option<&mut [u8]> {
        let offset = self.payload_offset();
        if self.has_payload() && offset < PACKET_SIZE {
            Some(&mut self.bytes_mut()[offset..])
        } else {
            None
        }
    }

    /// Stores the given raw 48-bit PCR value and sets the PCR flag.  Does nothing if the packet
    /// has no adaptation field.
    pub fn set_pcr(&mut self, raw: u64) {
        if !self.has_adaptation_field() {
            return;
        }
        let b = self.bytes_mut();
        b[ADAPTATION_FIELD_OFFSET] |= PCR_FLAG;
        let start = ADAPTATION_FIELD_OFFSET + 1;
        for (i, byte) in b[start..start + PCR_SIZE].iter_mut().enumerate() {
            *byte = (raw >> (8 * (PCR_SIZE - 1 - i))) as u8;
        }
    }

    /// Clears the PCR flag, if there is an adaptation field.
    pub fn remove_pcr(&mut self) {
        if self.has_adaptation_field() {
            self.bytes_mut()[ADAPTATION_FIELD_OFFSET] &= !PCR_FLAG;
        }
    }

    /// Replaces the 33 value bits of the PTS field in the payload's PES header, keeping the
    /// prefix and marker bits already present.  Does nothing if there is no PES header.
    pub fn set_pts(&mut self, pts: u64) {
        if self.pes_payload().is_none() {
            return;
        }
        if let Some(pay) = self.payload_mut() {
            let ts = &mut pay[PTS_OFFSET..PTS_OFFSET + PTS_SIZE];
            ts[0] = (ts[0] & 0b1111_0001) | ((pts >> 29) & 0b0000_1110) as u8;
            ts[1] = (pts >> 22) as u8;
            ts[2] = (ts[2] & 0b0000_0001) | ((pts >> 14) & 0b1111_1110) as u8;
            ts[3] = (pts >> 7) as u8;
            ts[4] = (ts[4] & 0b0000_0001) | ((pts << 1) & 0b1111_1110) as u8;
        }
    }

    /// Overwrites everything from `payload_offset()` to the end of the packet with
    /// `STUFFING_BYTE`, if the payload-present bit is set.
    pub fn write_padding(&mut self) {
        if let Some(pay) = self.payload_mut() {
            pay.fill(STUFFING_BYTE);
        }
    }
}

impl<B: AsRef<[u8]>> fmt::Debug for Packet<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Packet");
        d.field("valid", &self.is_valid());
        d.field("pid", &self.pid());
        d.field("tei", &self.transport_error_indicator());
        d.field("pusi", &self.payload_unit_start_indicator());
        d.field("priority", &self.transport_priority());
        d.field("scrambled", &self.is_scrambled());
        d.field("continuity_counter", &self.continuity_counter().count());
        if self.has_adaptation_field() {
            d.field("adaptation_field_length", &self.adaptation_field_length());
        }
        if let Some(pcr) = self.pcr_base() {
            d.field("pcr", &pcr);
        }
        if let Some(pts) = self.pts() {
            d.field("pts", &pts);
        }
        d.field("payload_size", &self.payload_size());
        d.finish()
    }
}

#[cfg(test)]
mod test {
    use crate::packet::*;
    use bitstream_io::{BigEndian, BitWrite, BitWriter, BE};
    use std::io;

    fn make_test_data<F>(builder: F) -> Vec<u8>
    where
        F: Fn(&mut BitWriter<Vec<u8>, BE>) -> Result<(), io::Error>,
    {
        let data: Vec<u8> = Vec::new();
        let mut w = BitWriter::endian(data, BigEndian);
        builder(&mut w).unwrap();
        w.into_writer()
    }

    /// `ts` is a 33-bit timestamp value
    fn write_ts(w: &mut BitWriter<Vec<u8>, BE>, ts: u64, prefix: u8) -> Result<(), io::Error> {
        w.write(4, prefix & 0b1111)?;
        w.write(3, (ts & 0b1_1100_0000_0000_0000_0000_0000_0000_0000) >> 30)?;
        w.write(1, 1)?; // marker_bit
        w.write(15, (ts & 0b0_0011_1111_1111_1111_1000_0000_0000_0000) >> 15)?;
        w.write(1, 1)?; // marker_bit
        w.write(15, ts & 0b0_0000_0000_0000_0000_0111_1111_1111_1111)?;
        w.write(1, 1) // marker_bit
    }

    // valid, payload-only packet carrying a PES header with a PTS of zero,
    fn pes_packet() -> [u8; PACKET_SIZE] {
        let mut buf = [0xffu8; PACKET_SIZE];
        buf[..4].copy_from_slice(&[SYNC_BYTE, 0x43, 0xe8, 0x10]);
        buf[4..18].copy_from_slice(&[0, 0, 1, 0xe0, 0, 0, 0x81, 0x80, 0x05, 0x21, 0, 1, 0, 1]);
        buf
    }

    #[test]
    fn pid() {
        assert!(Pid::try_from(0x2000).is_err());
        assert_eq!(Pid::new(0x03e8).bit_distance(Pid::STUFFING), 7);
        assert_eq!(Pid::new(0x1ffe).bit_distance(Pid::STUFFING), 1);
    }

    #[test]
    fn continuity_counter_wraps() {
        assert_eq!(ContinuityCounter::new(15).next(), ContinuityCounter::new(0));
        assert!(ContinuityCounter::new(6).follows(ContinuityCounter::new(5)));
        assert!(!ContinuityCounter::new(5).follows(ContinuityCounter::new(5)));
    }

    #[test]
    #[should_panic]
    fn zero_len() {
        let buf = [0u8; 0];
        Packet::new(&buf[..]);
    }

    #[test]
    fn test_xmas_tree() {
        let mut buf = [0xffu8; PACKET_SIZE];
        buf[0] = SYNC_BYTE;
        buf[4] = 28; // adaptation_field_length
        let pk = Packet::new(&buf[..]);
        assert!(pk.is_valid());
        assert_eq!(u16::from(pk.pid()), 0b1111111111111u16);
        assert!(pk.transport_error_indicator());
        assert!(pk.payload_unit_start_indicator());
        assert!(pk.transport_priority());
        assert!(pk.is_scrambled());
        assert!(pk.has_adaptation_field());
        assert!(pk.has_payload());
        assert_eq!(pk.continuity_counter().count(), 0b1111);
        assert_eq!(pk.adaptation_field_length(), 28);
        assert_eq!(pk.adaptation_field().map(<[u8]>::len), Some(29));
        assert!(pk.has_pcr());
        assert!(pk.has_opcr());
        assert_eq!(pk.pcr_base(), Some(MAX_CLOCK_BASE));
        assert_eq!(pk.payload_offset(), 33);
        assert_eq!(pk.payload_size(), 155);
        assert_eq!(pk.payload().map(<[u8]>::len), Some(155));
        // payload does not start with a PES start code,
        assert!(!pk.has_pts());
        assert!(!format!("{:?}", pk).is_empty())
    }

    #[test]
    fn invalid_sync_still_readable() {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = 0x46;
        buf[1] = 0x03;
        buf[2] = 0xe8;
        buf[3] = 0x17;
        let pk = Packet::new(&buf[..]);
        assert!(!pk.is_valid());
        assert_eq!(pk.pid(), Pid::new(0x3e8));
        assert_eq!(pk.continuity_counter().count(), 7);
        assert_eq!(pk.payload_offset(), 4);
        assert_eq!(pk.payload_size(), 184);
    }

    #[test]
    fn no_payload() {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = SYNC_BYTE;
        buf[3] = 0x20;
        buf[4] = 183;
        let pk = Packet::new(&buf[..]);
        assert_eq!(pk.payload_offset(), 0);
        assert_eq!(pk.payload_size(), 0);
        assert!(pk.payload().is_none());
        assert_eq!(pk.pts(), None);
    }

    #[test]
    fn oversized_adaptation_field() {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = SYNC_BYTE;
        buf[3] = 0x30;
        buf[4] = 184;
        let pk = Packet::new(&buf[..]);
        assert_eq!(pk.payload_size(), 0);
        assert!(pk.payload().is_none());
        // clamped to the end of the packet,
        assert_eq!(pk.adaptation_field().map(<[u8]>::len), Some(184));

        buf[4] = 183;
        let pk = Packet::new(&buf[..]);
        assert_eq!(pk.payload_offset(), PACKET_SIZE);
        assert_eq!(pk.payload_size(), 0);
    }

    #[test]
    fn set_pid_keeps_flags() {
        let mut buf = [0u8; PACKET_SIZE];
        buf[1] = 0b1110_0000;
        let mut pk = Packet::new(&mut buf[..]);
        pk.set_pid(Pid::STUFFING);
        assert_eq!(pk.pid(), Pid::STUFFING);
        pk.set_pid(Pid::new(0x3e8));
        assert_eq!(pk.pid(), Pid::new(0x3e8));
        assert!(pk.transport_error_indicator());
        assert!(pk.payload_unit_start_indicator());
        assert!(pk.transport_priority());
    }

    #[test]
    fn flag_clearers() {
        let mut buf = [0xffu8; PACKET_SIZE];
        let mut pk = Packet::new(&mut buf[..]);
        pk.clear_transport_error_indicator();
        pk.clear_payload_unit_start_indicator();
        pk.clear_transport_priority();
        pk.clear_scrambling();
        pk.remove_adaptation_field();
        assert!(!pk.transport_error_indicator());
        assert!(!pk.payload_unit_start_indicator());
        assert!(!pk.transport_priority());
        assert!(!pk.is_scrambled());
        assert!(pk.adaptation_field().is_none());
        assert_eq!(pk.adaptation_field_length(), 0);
        assert_eq!(pk.pid(), Pid::STUFFING);
        pk.set_continuity_counter(ContinuityCounter::new(3));
        assert_eq!(pk.continuity_counter().count(), 3);
        assert!(pk.has_payload());
    }

    #[test]
    fn set_adaptation_field_length_adds_field() {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = SYNC_BYTE;
        buf[3] = 0x10;
        let mut pk = Packet::new(&mut buf[..]);
        assert!(!pk.has_adaptation_field());
        pk.set_adaptation_field_length(7);
        assert!(pk.has_adaptation_field());
        assert_eq!(pk.adaptation_field_length(), 7);
        assert_eq!(pk.payload_offset(), 12);
        assert_eq!(pk.payload_size(), 176);
    }

    #[test]
    fn pcr_round_trip() {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = SYNC_BYTE;
        let mut pk = Packet::new(&mut buf[..]);
        // no adaptation field, so nothing to write into,
        pk.set_pcr(1234 << PCR_BASE_SHIFT);
        assert_eq!(pk.pcr(), None);
        pk.set_adaptation_field_length(7);
        for base in [0, 1, 0x71_0000, 0x1_5555_5555, MAX_CLOCK_BASE] {
            pk.set_pcr(base << PCR_BASE_SHIFT);
            assert!(pk.has_pcr());
            assert_eq!(pk.pcr_base(), Some(base));
        }
        pk.remove_pcr();
        assert!(!pk.has_pcr());
        assert_eq!(pk.pcr(), None);
    }

    #[test]
    fn pts_matches_reference_encoding() {
        let mut buf = pes_packet();
        let value = 0b1_0101_0101_0101_0101_0101_0101_0101_0101;
        let expected = make_test_data(|w| write_ts(w, value, 0b0010));
        let mut pk = Packet::new(&mut buf[..]);
        assert_eq!(pk.pts(), Some(0));
        pk.set_pts(value);
        assert_eq!(pk.pts(), Some(value));
        assert_eq!(&pk.payload().unwrap()[9..14], &expected[..]);
    }

    #[test]
    fn pts_round_trip_keeps_markers() {
        let mut buf = pes_packet();
        let mut pk = Packet::new(&mut buf[..]);
        for value in [0, 1, 90_000, 0x1_0000_0000, MAX_CLOCK_BASE] {
            pk.set_pts(value);
            assert_eq!(pk.pts(), Some(value));
            let pay = pk.payload().unwrap();
            assert_eq!(pay[9] & 0b1111_0001, 0b0010_0001);
            assert_eq!(pay[11] & 1, 1);
            assert_eq!(pay[13] & 1, 1);
        }
    }

    #[test]
    fn set_pts_ignores_non_pes_payload() {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = SYNC_BYTE;
        buf[3] = 0x10;
        let mut pk = Packet::new(&mut buf[..]);
        pk.set_pts(1234);
        assert!(!pk.has_pes_header());
        assert_eq!(pk.pts(), None);
        assert!(pk.payload().unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn pes_header_without_pts_flag() {
        let mut buf = pes_packet();
        buf[11] = 0;
        let mut pk = Packet::new(&mut buf[..]);
        assert!(pk.has_pes_header());
        assert!(!pk.has_pts());
        pk.set_pts(0x1_0000_0001);
        pk.payload_mut().unwrap()[7] = 0x80;
        assert_eq!(pk.pts(), Some(0x1_0000_0001));
    }

    #[test]
    fn write_padding() {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = SYNC_BYTE;
        buf[3] = 0x30;
        buf[4] = 7;
        let mut pk = Packet::new(&mut buf[..]);
        pk.write_padding();
        assert!(buf[..12].iter().any(|&b| b != STUFFING_BYTE));
        assert!(buf[12..].iter().all(|&b| b == STUFFING_BYTE));

        let mut buf = [0u8; PACKET_SIZE];
        let mut pk = Packet::new(&mut buf[..]);
        pk.write_padding();
        assert!(buf.iter().all(|&b| b == 0));
    }
}
