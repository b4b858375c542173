use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use mpeg2ts_repair::frame;
use mpeg2ts_repair::output::{self, OutputOptions};
use mpeg2ts_repair::repair::{RepairConfig, Repairer};
use mpeg2ts_repair::store::PacketStore;

mod common;

fn repair(c: &mut Criterion) {
    let buf = common::damaged_stream(2_000);
    let config = RepairConfig::new(common::DATA_PID);
    let mut group = c.benchmark_group("repair");
    group.throughput(Throughput::Bytes(buf.len() as u64));
    group.bench_function("repair", |b| {
        let repairer = Repairer::new(config.clone());
        b.iter_batched(
            || PacketStore::load(buf.clone()),
            |mut store| repairer.run(&mut store),
            BatchSize::LargeInput,
        );
    });
    group.bench_function("scan+check", |b| {
        let mut store = PacketStore::load(buf.clone());
        Repairer::new(config.clone()).run(&mut store);
        b.iter(|| {
            let frames = frame::scan(&mut store);
            let check = output::check(&store, &config, &OutputOptions::default());
            (frames.len(), check.bad_from())
        });
    });
    group.finish();
}

criterion_group!(benches, repair);
criterion_main!(benches);
