//! Repair of damaged MPEG2 Transport Stream captures, and reconstruction of the elementary stream
//! framing they carry.
//!
//! The input is assumed to follow a fixed, simple layout: a PAT, a PMT on `Pid::PMT`, stuffing
//! packets, and a single elementary stream on a configured data PID, whose frames each begin with
//! a packet carrying PUSI and a PCR.  Captures of such streams received over a noisy link suffer
//! bit flips in packet headers, lost sync-bytes and damaged adaptation fields.  This crate puts
//! them back together.
//!
//! # Processing
//!
//!  * [`store::PacketStore`](store/struct.PacketStore.html) owns the whole capture, and hands
//!    out [`packet::Packet`](packet/struct.Packet.html) views of individual packets.
//!  * [`fixscript`](fixscript/index.html) applies manual corrections, for damage no heuristic
//!    can undo.
//!  * [`repair::Repairer`](repair/struct.Repairer.html) runs the ordered heuristic repair passes.
//!  * [`frame`](frame/index.html) derives per-packet frame offsets and timestamps, and lists the
//!    frames found.
//!  * [`output`](output/index.html) decides which packets make it into the repaired stream and
//!    the elementary stream dump, and writes them.
//!
//! ```rust
//! use mpeg2ts_repair::packet::Pid;
//! use mpeg2ts_repair::repair::{RepairConfig, Repairer};
//! use mpeg2ts_repair::store::PacketStore;
//! use mpeg2ts_repair::{frame, output};
//!
//! # let mut capture = vec![0x47, 0x1f, 0xff, 0x10];
//! # capture.resize(188, 0xff);
//! let config = RepairConfig::new(Pid::new(0x3e8));
//! let mut store = PacketStore::load(capture);
//! let report = Repairer::new(config.clone()).run(&mut store);
//! let frames = frame::scan(&mut store);
//! let check = output::check(&store, &config, &output::OutputOptions::default());
//! let mut repaired: Vec<u8> = vec![];
//! output::write_transport_stream(&store, &check, &mut repaired).unwrap();
//! # assert!(report.is_clean());
//! # assert_eq!(frames.len(), 1);
//! # assert_eq!(repaired.len(), 188);
//! ```

pub mod fixscript;
pub mod frame;
pub mod output;
pub mod packet;
pub mod repair;
pub mod store;

#[cfg(test)]
mod test_support;
