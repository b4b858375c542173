use hex_slice::AsHex;
use mpeg2ts_repair::fixscript::FixScript;
use mpeg2ts_repair::frame::{self, FrameKind};
use mpeg2ts_repair::output::{self, OutputOptions};
use mpeg2ts_repair::packet::Pid;
use mpeg2ts_repair::repair::{EndPadding, RepairConfig, Repairer};
use mpeg2ts_repair::store::{PacketStore, Realignment};
use std::cmp;
use std::env;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::process;

const USAGE: &str = "usage: tsrepair [options] <input.ts> [<output.ts> [<output.es>]]

options:
  -nofix           don't run the automatic repairs
  -frameinfo       print a line for each frame on the data PID
  -fixmp4af        strip adaptation fields from the interior packets of each frame
  -nopackets       don't print a line for each packet
  -noendpad        leave end-of-frame padding packets untouched
  -fix:<script>    apply fix commands before repairing, e.g. -fix:120,pes/121,pay,3
  -skip:<n>        leave the first n packets out of the outputs
  -pid:<hex>       data PID (default 3e8)
  -maxpcr:<n>      largest plausible PCR base
  -realign:<packet>:<shift>,...
                   packets from <packet> onwards start <shift> bytes earlier, e.g. -realign:2:0x38";

struct Options {
    fix: bool,
    frame_info: bool,
    strip_interior_af: bool,
    print_packets: bool,
    script: FixScript,
    output: OutputOptions,
    config: RepairConfig,
    realignment: Realignment,
    input: String,
    output_ts: Option<String>,
    output_es: Option<String>,
}

fn parse_args() -> Result<Options, String> {
    let mut fix = true;
    let mut frame_info = false;
    let mut strip_interior_af = false;
    let mut print_packets = true;
    let mut script = FixScript::default();
    let mut output = OutputOptions::default();
    let mut data_pid = Pid::new(0x3e8);
    let mut max_pcr_base = None;
    let mut end_padding = EndPadding::Clean;
    let mut realignment = Realignment::new();
    let mut files = vec![];

    for arg in env::args().skip(1) {
        if let Some(text) = arg.strip_prefix("-fix:") {
            script = text.parse().map_err(|e| format!("bad fix script: {}", e))?;
        } else if let Some(n) = arg.strip_prefix("-skip:") {
            output.skip = n.parse().map_err(|e| format!("bad skip count {:?}: {}", n, e))?;
        } else if let Some(pid) = arg.strip_prefix("-pid:") {
            let value = u16::from_str_radix(pid.trim_start_matches("0x"), 16)
                .map_err(|e| format!("bad PID {:?}: {}", pid, e))?;
            data_pid = Pid::try_from(value).map_err(|_| format!("PID {:?} out of range", pid))?;
        } else if let Some(n) = arg.strip_prefix("-maxpcr:") {
            max_pcr_base = Some(
                n.parse()
                    .map_err(|e| format!("bad PCR limit {:?}: {}", n, e))?,
            );
        } else if let Some(text) = arg.strip_prefix("-realign:") {
            realignment = text
                .parse()
                .map_err(|e| format!("bad realignment {:?}: {}", text, e))?;
        } else {
            match arg.as_str() {
                "-nofix" => fix = false,
                "-frameinfo" => frame_info = true,
                "-fixmp4af" => strip_interior_af = true,
                "-nopackets" => print_packets = false,
                "-noendpad" => end_padding = EndPadding::Skip,
                _ if arg.starts_with('-') => return Err(format!("unexpected option {:?}", arg)),
                _ => files.push(arg),
            }
        }
    }

    let mut config = RepairConfig::new(data_pid).with_end_padding(end_padding);
    if let Some(max) = max_pcr_base {
        config = config.with_max_pcr_base(max);
    }
    let mut files = files.into_iter();
    let input = files.next().ok_or_else(|| "no input file".to_string())?;
    let output_ts = files.next();
    let output_es = files.next();
    if let Some(extra) = files.next() {
        return Err(format!("unexpected filename {:?}", extra));
    }
    Ok(Options {
        fix,
        frame_info,
        strip_interior_af,
        print_packets,
        script,
        output,
        config,
        realignment,
        input,
        output_ts,
        output_es,
    })
}

fn print_frames(store: &PacketStore, data_pid: Pid) {
    for f in frame::frames(store, data_pid) {
        let kind = match f.kind {
            FrameKind::Intra => 'I',
            FrameKind::Predicted => 'P',
        };
        print!(
            "{}-Frame {} (packets {} - {}): Time {:.6} ",
            kind,
            f.number,
            f.start_packet,
            f.end_packet,
            f.seconds()
        );
        if let Some(flags) = f.bad_end_flags {
            print!("BAD af[1]:{:02x} ", flags);
        }
        if let Ok(end) = store.packet(f.end_packet) {
            if let Some(af) = end.adaptation_field() {
                print!("AF {:02x} ", af.plain_hex(false));
            }
        }
        println!();
    }
}

fn print_packets(store: &PacketStore, frames: &frame::FrameMap, check: &output::StreamCheck) {
    for (i, verdict) in check.verdicts() {
        let pk = match store.packet(i) {
            Ok(pk) => pk,
            Err(_) => continue,
        };
        let offset = store.packet_offset(i).unwrap_or(0);
        print!("Packet {} at {:#010x}: {:?} {:?}", i, offset, verdict, pk);
        if let Some(meta) = frames.get(i) {
            print!(
                " frame@{} bytes {}-{} (@{})",
                meta.frame_pcr,
                meta.frame_offset,
                meta.frame_offset + meta.payload_size,
                meta.payload_offset
            );
        }
        if let Some(payload) = pk.payload() {
            print!(" {:02x}", payload[..cmp::min(payload.len(), 16)].plain_hex(false));
        }
        println!();
    }
}

fn run(opts: Options) -> io::Result<()> {
    let data = fs::read(&opts.input)?;
    let mut store = PacketStore::load_realigned(data, opts.realignment);
    eprintln!("{} packets in {}", store.packet_count(), opts.input);

    let failed = opts
        .script
        .apply(&mut store, opts.config.data_pid())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    for e in &failed {
        eprintln!("Fix skipped: {}", e);
    }

    if opts.fix {
        let report = Repairer::new(opts.config.clone()).run(&mut store);
        eprintln!("Num auto interpolate: {}", report.auto_interpolated);
        eprintln!("   Num payload order: {}", report.payload_order_fixes);
        eprintln!("         Num bad PCR: {}", report.bad_pcr);
        for i in &report.table_errors {
            eprintln!("Error in packet {}: can't rewrite table", i);
        }
    }

    let frames = frame::scan(&mut store);
    if opts.strip_interior_af {
        frame::strip_interior_adaptation_fields(&mut store, opts.config.data_pid());
    }
    if opts.frame_info {
        print_frames(&store, opts.config.data_pid());
    }

    let check = output::check(&store, &opts.config, &opts.output);
    if opts.print_packets {
        print_packets(&store, &frames, &check);
    }
    if let Some(bad) = check.bad_from() {
        eprintln!("Stream is bad from packet {} onwards", bad);
    }

    if let Some(ref name) = opts.output_ts {
        let n = output::write_transport_stream(&store, &check, BufWriter::new(File::create(name)?))?;
        eprintln!("Written {} TS packets to {}", n, name);
    }
    if let Some(ref name) = opts.output_es {
        let n = output::write_elementary_stream(&store, &check, BufWriter::new(File::create(name)?))?;
        eprintln!("Written {} elementary stream bytes to {}", n, name);
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, USAGE);
            process::exit(2);
        }
    };
    if let Err(e) = run(opts) {
        eprintln!("tsrepair: {}", e);
        process::exit(1);
    }
}
