#![no_main]

use libfuzzer_sys::fuzz_target;
use mpeg2ts_repair::fixscript::FixScript;
use mpeg2ts_repair::output::{self, OutputOptions};
use mpeg2ts_repair::packet::Pid;
use mpeg2ts_repair::repair::{RepairConfig, Repairer};
use mpeg2ts_repair::store::PacketStore;
use mpeg2ts_repair::frame;
use std::io;

fuzz_target!(|data: &[u8]| {
    // a leading line, if present, is taken as a fix script,
    let (script, stream) = match data.iter().position(|&b| b == b'\n') {
        Some(n) if n < 64 => (std::str::from_utf8(&data[..n]).ok(), &data[n + 1..]),
        _ => (None, data),
    };
    let config = RepairConfig::new(Pid::new(0x3e8));
    let mut store = PacketStore::load(stream.to_vec());
    if let Some(Ok(script)) = script.map(str::parse::<FixScript>) {
        let _ = script.apply(&mut store, config.data_pid());
    }
    Repairer::new(config.clone()).run(&mut store);
    frame::scan(&mut store);
    frame::strip_interior_adaptation_fields(&mut store, config.data_pid());
    let check = output::check(&store, &config, &OutputOptions::default());
    let _ = output::write_transport_stream(&store, &check, io::sink());
    let _ = output::write_elementary_stream(&store, &check, io::sink());
});
