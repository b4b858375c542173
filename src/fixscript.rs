//! Manual fix commands, applied to individual packets before the automatic repairs run.
//!
//! A fix script is a `/` separated list of commands, each of the form
//! `<index>,<operation>[,<parameter>]`, for example `120,pes/121,pay,3/0x1f4a,insert,56`.
//! The index is a decimal packet number for every operation except `insert`, where it is a
//! hexadecimal byte offset.
//!
//! ```rust
//! # use mpeg2ts_repair::fixscript::{FixCommand, FixScript};
//! let script: FixScript = "12,nopusi/40,pay,3".parse().unwrap();
//! assert_eq!(script.commands()[0], FixCommand::NoPusi { packet: 12 });
//! ```

use crate::packet::{ContinuityCounter, Pid, MAX_CLOCK_BASE, PCR_BASE_SHIFT};
use crate::repair::FRAME_START_AF_LENGTH;
use crate::store::{PacketStore, StoreError};
use log::{debug, warn};
use std::num::ParseIntError;
use std::str::FromStr;
use thiserror::Error;

// minimal PES header for the elementary stream, stream_id 0xe0 with a PTS and 7 header bytes,
const PES_HEADER: [u8; 9] = [0x00, 0x00, 0x01, 0xe0, 0x00, 0x00, 0x81, 0x80, 0x07];
// the two header bytes following the PTS are stuffing,
const PES_STUFFING: std::ops::Range<usize> = 14..16;
const PFRAME_OFFSET: usize = 16;
const PFRAME_START_CODE: [u8; 4] = [0x00, 0x00, 0x01, 0xb6];
// how far the generated PTS lags the frame's PCR, in 90kHz ticks
const PTS_DELAY: u64 = 10_000;

/// Problems with the text of a fix command.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FixParseError {
    #[error("empty fix command")]
    Empty,
    #[error("fix command {0:?} has no operation")]
    MissingOperation(String),
    #[error("unknown fix operation {0:?}")]
    UnknownOperation(String),
    #[error("fix operation {0:?} needs a parameter")]
    MissingParameter(&'static str),
    #[error("invalid number {text:?}")]
    InvalidNumber {
        text: String,
        #[source]
        source: ParseIntError,
    },
    #[error("{value} out of range for fix operation {operation:?}")]
    OutOfRange {
        operation: &'static str,
        value: u64,
    },
}

/// A fix command which could not be carried out.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FixError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("packet {packet}: no payload to write into")]
    NoPayload { packet: usize },
    #[error("packet {packet}: no adaptation field to hold a PCR")]
    NoAdaptationField { packet: usize },
    #[error("packet {packet}: no PCR")]
    NoPcr { packet: usize },
    #[error("packet {packet}: payload has no PES header to hold a PTS")]
    NoPesHeader { packet: usize },
}

/// One parsed fix command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FixCommand {
    /// `af`: write the adaptation field length byte (adding an adaptation field if needed)
    AdaptationFieldLength { packet: usize, length: u8 },
    /// `insert`: duplicate `count` bytes at byte `offset`, see
    /// [`PacketStore::insert_bytes()`](../store/struct.PacketStore.html#method.insert_bytes)
    Insert { offset: usize, count: usize },
    /// `noaf`
    RemoveAdaptationField { packet: usize },
    /// `nopcr`
    RemovePcr { packet: usize },
    /// `nopusi`
    NoPusi { packet: usize },
    /// `pay`: set the payload flag and the continuity counter
    Payload {
        packet: usize,
        counter: ContinuityCounter,
    },
    /// `pcr`: write a PCR with the given 33-bit base
    Pcr { packet: usize, base: u64 },
    /// `pes`: make the packet a frame start on the data PID, with a minimal PES header
    Pes { packet: usize },
    /// `pframe`: write an MPEG-4 VOP start code after the frame header
    PFrame { packet: usize },
    /// `pid`
    Pid { packet: usize, pid: Pid },
    /// `ptsauto`: derive the PES header's PTS from the packet's PCR
    PtsAuto { packet: usize },
    /// `pusi`
    Pusi { packet: usize },
    /// `valid`: restore the sync-byte and clear the transport error indicator
    Valid { packet: usize },
}

fn parse_number(text: &str, radix: u32) -> Result<u64, FixParseError> {
    let digits = if radix == 16 {
        text.trim_start_matches("0x")
    } else {
        text
    };
    u64::from_str_radix(digits, radix).map_err(|source| FixParseError::InvalidNumber {
        text: text.to_string(),
        source,
    })
}

fn in_range(operation: &'static str, value: u64, max: u64) -> Result<u64, FixParseError> {
    if value <= max {
        Ok(value)
    } else {
        Err(FixParseError::OutOfRange { operation, value })
    }
}

impl FromStr for FixCommand {
    type Err = FixParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split(',').map(str::trim);
        let index = match fields.next() {
            Some(index) if !index.is_empty() => index,
            _ => return Err(FixParseError::Empty),
        };
        let op = fields
            .next()
            .filter(|op| !op.is_empty())
            .ok_or_else(|| FixParseError::MissingOperation(s.to_string()))?;
        let param = fields.next().filter(|p| !p.is_empty());

        // the packet index and parameter, parsed only for operations which use them
        let packet = || parse_number(index, 10).map(|v| v as usize);
        let required = |name: &'static str| param.ok_or(FixParseError::MissingParameter(name));

        let cmd = match op {
            "af" => FixCommand::AdaptationFieldLength {
                packet: packet()?,
                length: in_range("af", parse_number(required("af")?, 10)?, 0xff)? as u8,
            },
            "insert" => FixCommand::Insert {
                offset: parse_number(index, 16)? as usize,
                count: parse_number(required("insert")?, 10)? as usize,
            },
            "noaf" => FixCommand::RemoveAdaptationField { packet: packet()? },
            "nopcr" => FixCommand::RemovePcr { packet: packet()? },
            "nopusi" => FixCommand::NoPusi { packet: packet()? },
            "pay" => FixCommand::Payload {
                packet: packet()?,
                counter: ContinuityCounter::new(
                    in_range("pay", parse_number(required("pay")?, 10)?, 0xf)? as u8,
                ),
            },
            "pcr" => FixCommand::Pcr {
                packet: packet()?,
                base: in_range("pcr", parse_number(required("pcr")?, 10)?, MAX_CLOCK_BASE)?,
            },
            "pes" => FixCommand::Pes { packet: packet()? },
            "pframe" => FixCommand::PFrame { packet: packet()? },
            "pid" => FixCommand::Pid {
                packet: packet()?,
                pid: Pid::new(in_range(
                    "pid",
                    parse_number(required("pid")?, 16)?,
                    u64::from(Pid::MAX_VALUE),
                )? as u16),
            },
            "ptsauto" => FixCommand::PtsAuto { packet: packet()? },
            "pusi" => FixCommand::Pusi { packet: packet()? },
            "valid" => FixCommand::Valid { packet: packet()? },
            _ => return Err(FixParseError::UnknownOperation(op.to_string())),
        };
        Ok(cmd)
    }
}

impl FixCommand {
    /// Applies this command.  `data_pid` is the PID given to packets by the `pes` operation.
    pub fn apply(&self, store: &mut PacketStore, data_pid: Pid) -> Result<(), FixError> {
        match *self {
            FixCommand::AdaptationFieldLength { packet, length } => {
                store.packet_mut(packet)?.set_adaptation_field_length(length)
            }
            FixCommand::Insert { offset, count } => store.insert_bytes(offset, count)?,
            FixCommand::RemoveAdaptationField { packet } => {
                store.packet_mut(packet)?.remove_adaptation_field()
            }
            FixCommand::RemovePcr { packet } => store.packet_mut(packet)?.remove_pcr(),
            FixCommand::NoPusi { packet } => {
                store
                    .packet_mut(packet)?
                    .clear_payload_unit_start_indicator()
            }
            FixCommand::Payload { packet, counter } => {
                let mut pk = store.packet_mut(packet)?;
                pk.set_payload_flag();
                pk.set_continuity_counter(counter);
            }
            FixCommand::Pcr { packet, base } => {
                let mut pk = store.packet_mut(packet)?;
                if !pk.has_adaptation_field() {
                    return Err(FixError::NoAdaptationField { packet });
                }
                pk.set_pcr(base << PCR_BASE_SHIFT);
            }
            FixCommand::Pes { packet } => {
                let mut pk = store.packet_mut(packet)?;
                pk.set_adaptation_field_length(FRAME_START_AF_LENGTH as u8);
                pk.set_payload_unit_start_indicator();
                pk.set_pid(data_pid);
                pk.set_payload_flag();
                match pk.payload_mut() {
                    Some(pay) if pay.len() >= PES_STUFFING.end => {
                        pay[..PES_HEADER.len()].copy_from_slice(&PES_HEADER);
                        pay[PES_STUFFING].fill(0xff);
                    }
                    _ => return Err(FixError::NoPayload { packet }),
                }
            }
            FixCommand::PFrame { packet } => {
                let end = PFRAME_OFFSET + PFRAME_START_CODE.len();
                match store.packet_mut(packet)?.payload_mut() {
                    Some(pay) if pay.len() >= end => {
                        pay[PFRAME_OFFSET..end].copy_from_slice(&PFRAME_START_CODE)
                    }
                    _ => return Err(FixError::NoPayload { packet }),
                }
            }
            FixCommand::Pid { packet, pid } => store.packet_mut(packet)?.set_pid(pid),
            FixCommand::PtsAuto { packet } => {
                let mut pk = store.packet_mut(packet)?;
                let base = pk.pcr_base().ok_or(FixError::NoPcr { packet })?;
                if !pk.has_pes_header() {
                    return Err(FixError::NoPesHeader { packet });
                }
                pk.set_pts(base.wrapping_sub(PTS_DELAY) & MAX_CLOCK_BASE);
            }
            FixCommand::Pusi { packet } => {
                store.packet_mut(packet)?.set_payload_unit_start_indicator()
            }
            FixCommand::Valid { packet } => {
                let mut pk = store.packet_mut(packet)?;
                pk.set_valid();
                pk.clear_transport_error_indicator();
            }
        }
        Ok(())
    }
}

/// An ordered list of fix commands.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FixScript {
    commands: Vec<FixCommand>,
}

impl FixScript {
    pub fn commands(&self) -> &[FixCommand] {
        &self.commands[..]
    }

    /// Applies each command in turn.
    ///
    /// A command which can't be carried out on its packet (for example `pframe` on a packet
    /// without a payload) is skipped with a warning, and returned in the list of failures.  A
    /// command addressing a packet or offset that does not exist stops the script with an
    /// error, since any later indices were probably written against a different layout.
    pub fn apply(
        &self,
        store: &mut PacketStore,
        data_pid: Pid,
    ) -> Result<Vec<FixError>, StoreError> {
        let mut failed = vec![];
        for cmd in &self.commands {
            debug!("fix: {:?}", cmd);
            match cmd.apply(store, data_pid) {
                Ok(()) => {}
                Err(FixError::Store(e)) => return Err(e),
                Err(e) => {
                    warn!("{}", e);
                    failed.push(e);
                }
            }
        }
        Ok(failed)
    }
}

impl FromStr for FixScript {
    type Err = FixParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let commands = s
            .split('/')
            .filter(|cmd| !cmd.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FixScript { commands })
    }
}

#[cfg(test)]
mod test {
    use crate::fixscript::*;
    use crate::packet::PACKET_SIZE;
    use crate::test_support::*;
    use assert_matches::assert_matches;
    use hex_literal::*;

    fn parse(s: &str) -> Result<FixCommand, FixParseError> {
        s.parse()
    }

    #[test]
    fn parse_commands() {
        assert_eq!(
            parse("7,af,183"),
            Ok(FixCommand::AdaptationFieldLength {
                packet: 7,
                length: 183
            })
        );
        assert_eq!(
            parse("1f4a,insert,56"),
            Ok(FixCommand::Insert {
                offset: 0x1f4a,
                count: 56
            })
        );
        assert_eq!(
            parse("3,pay,15"),
            Ok(FixCommand::Payload {
                packet: 3,
                counter: ContinuityCounter::new(15)
            })
        );
        assert_eq!(
            parse("3,pid,3e8"),
            Ok(FixCommand::Pid {
                packet: 3,
                pid: DATA_PID
            })
        );
        assert_eq!(
            parse(" 12 , pcr , 90000 "),
            Ok(FixCommand::Pcr {
                packet: 12,
                base: 90000
            })
        );
        assert_eq!(parse("4,valid,ignored"), Ok(FixCommand::Valid { packet: 4 }));
    }

    #[test]
    fn parse_errors() {
        assert_matches!(parse(""), Err(FixParseError::Empty));
        assert_matches!(parse("12"), Err(FixParseError::MissingOperation(_)));
        assert_matches!(parse("12,"), Err(FixParseError::MissingOperation(_)));
        assert_matches!(
            parse("12,frob"),
            Err(FixParseError::UnknownOperation(ref op)) if op == "frob"
        );
        assert_matches!(parse("12,af"), Err(FixParseError::MissingParameter("af")));
        assert_matches!(parse("x,pusi"), Err(FixParseError::InvalidNumber { .. }));
        assert_matches!(parse("12,pay,16"), Err(FixParseError::OutOfRange { operation: "pay", value: 16 }));
        assert_matches!(parse("12,af,256"), Err(FixParseError::OutOfRange { .. }));
        assert_matches!(parse("12,pid,2000"), Err(FixParseError::OutOfRange { .. }));
        assert_matches!(parse("12,pcr,8589934592"), Err(FixParseError::OutOfRange { .. }));
    }

    #[test]
    fn parse_script() {
        let script: FixScript = "1,nopusi//2,noaf/".parse().unwrap();
        assert_eq!(
            script.commands(),
            &[
                FixCommand::NoPusi { packet: 1 },
                FixCommand::RemoveAdaptationField { packet: 2 }
            ]
        );
        assert!("".parse::<FixScript>().unwrap().commands().is_empty());
        assert_matches!(
            "1,nopusi/2,bad".parse::<FixScript>(),
            Err(FixParseError::UnknownOperation(_))
        );
    }

    #[test]
    fn pes_header() {
        let mut store = store_of(&[garbage_packet()]);
        FixCommand::Pes { packet: 0 }
            .apply(&mut store, DATA_PID)
            .unwrap();
        let pk = store.packet(0).unwrap();
        assert_eq!(pk.pid(), DATA_PID);
        assert!(pk.payload_unit_start_indicator());
        assert_eq!(pk.adaptation_field_length(), 7);
        assert_eq!(pk.payload_offset(), 12);
        let pay = pk.payload().unwrap();
        assert_eq!(pay[..9], hex!("000001e0 0000 818007")[..]);
        assert_eq!(pay[14..16], [0xff, 0xff]);
    }

    #[test]
    fn pframe_start_code() {
        let mut store = store_of(&[payload_packet(DATA_PID, 0)]);
        FixCommand::PFrame { packet: 0 }
            .apply(&mut store, DATA_PID)
            .unwrap();
        assert_eq!(
            store.packet(0).unwrap().payload().unwrap()[16..20],
            hex!("000001b6")
        );
    }

    #[test]
    fn pframe_needs_payload() {
        let mut store = store_of(&[garbage_packet()]);
        assert_matches!(
            FixCommand::PFrame { packet: 0 }.apply(&mut store, DATA_PID),
            Err(FixError::NoPayload { packet: 0 })
        );
    }

    #[test]
    fn pts_from_pcr() {
        let mut store = store_of(&[frame_start_packet(DATA_PID, 0, 100_000)]);
        let script: FixScript = "0,pes/0,ptsauto".parse().unwrap();
        assert_eq!(script.apply(&mut store, DATA_PID), Ok(vec![]));
        let pk = store.packet(0).unwrap();
        assert_eq!(pk.pcr_base(), Some(100_000));
        assert_eq!(pk.pts(), Some(90_000));
    }

    #[test]
    fn pts_written_with_flag_clear() {
        let mut store = store_of(&[frame_start_packet(DATA_PID, 0, 100_000)]);
        let ptsauto = FixCommand::PtsAuto { packet: 0 };
        assert_eq!(
            ptsauto.apply(&mut store, DATA_PID),
            Err(FixError::NoPesHeader { packet: 0 })
        );

        FixCommand::Pes { packet: 0 }.apply(&mut store, DATA_PID).unwrap();
        store.packet_mut(0).unwrap().payload_mut().unwrap()[7] = 0;
        assert_eq!(ptsauto.apply(&mut store, DATA_PID), Ok(()));
        assert_eq!(store.packet(0).unwrap().pts(), None);

        store.packet_mut(0).unwrap().payload_mut().unwrap()[7] = 0x80;
        assert_eq!(store.packet(0).unwrap().pts(), Some(90_000));
    }

    #[test]
    fn pts_wraps_below_zero() {
        let mut store = store_of(&[frame_start_packet(DATA_PID, 0, 1)]);
        "0,pes/0,ptsauto"
            .parse::<FixScript>()
            .unwrap()
            .apply(&mut store, DATA_PID)
            .unwrap();
        assert_eq!(
            store.packet(0).unwrap().pts(),
            Some(MAX_CLOCK_BASE + 1 - (PTS_DELAY - 1))
        );
    }

    #[test]
    fn non_fatal_failures_collected() {
        let mut store = store_of(&[garbage_packet(), payload_packet(DATA_PID, 0)]);
        let script: FixScript = "0,ptsauto/1,pcr,5/1,pframe/0,valid".parse().unwrap();
        let failed = script.apply(&mut store, DATA_PID).unwrap();
        assert_eq!(
            failed,
            vec![
                FixError::NoPcr { packet: 0 },
                FixError::NoAdaptationField { packet: 1 }
            ]
        );
        // later commands still ran,
        assert!(store.packet(0).unwrap().is_valid());
        assert_eq!(store.packet(1).unwrap().payload().unwrap()[19], 0xb6);
    }

    #[test]
    fn out_of_range_stops_script() {
        let mut store = store_of(&[garbage_packet()]);
        let script: FixScript = "5,valid/0,valid".parse().unwrap();
        assert_matches!(
            script.apply(&mut store, DATA_PID),
            Err(StoreError::IndexOutOfRange { index: 5, count: 1 })
        );
        assert!(!store.packet(0).unwrap().is_valid());
    }

    #[test]
    fn insert_then_address_shifted_packet() {
        let mut store = store_of(&[payload_packet(Pid::PAT, 0), payload_packet(DATA_PID, 0)]);
        let script: FixScript = "0,insert,188/2,pusi".parse().unwrap();
        script.apply(&mut store, DATA_PID).unwrap();
        assert_eq!(store.packet_count(), 3);
        assert_eq!(store.as_bytes().len(), 3 * PACKET_SIZE);
        assert_eq!(store.packet(1).unwrap().pid(), Pid::PAT);
        assert!(store.packet(2).unwrap().payload_unit_start_indicator());
    }

    #[test]
    fn header_edits() {
        let mut store = store_of(&[frame_start_packet(DATA_PID, 0, 7)]);
        let script: FixScript = "0,nopcr/0,nopusi/0,pid,1fff/0,pay,9/0,noaf".parse().unwrap();
        script.apply(&mut store, DATA_PID).unwrap();
        let pk = store.packet(0).unwrap();
        assert!(!pk.payload_unit_start_indicator());
        assert_eq!(pk.pid(), Pid::STUFFING);
        assert_eq!(pk.continuity_counter().count(), 9);
        assert!(!pk.has_adaptation_field());
        assert!(!pk.has_pcr());
    }
}
