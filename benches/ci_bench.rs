use iai_callgrind::{library_benchmark, library_benchmark_group, main};
use mpeg2ts_repair::frame;
use mpeg2ts_repair::output::{self, OutputOptions};
use mpeg2ts_repair::repair::{RepairConfig, Repairer};
use mpeg2ts_repair::store::PacketStore;
use std::hint::black_box;

mod common;

#[library_benchmark]
fn repair() {
    let config = RepairConfig::new(common::DATA_PID);
    let mut store = PacketStore::load(common::damaged_stream(500));
    let report = Repairer::new(config.clone()).run(&mut store);
    let frames = frame::scan(&mut store);
    let check = output::check(&store, &config, &OutputOptions::default());
    black_box((report, frames, check.bad_from()));
}

library_benchmark_group!(
    name = ci;
    benchmarks = repair
);

main!(library_benchmark_groups = ci);
