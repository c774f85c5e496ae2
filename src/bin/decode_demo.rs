// Author: Lukas Bower
// Purpose: Feed a symbol table and one hex-encoded frame through the
// log-frame decoder and print the resulting record. Not the instrument
// command CLI the spec excludes — just a thin collaborator over
// `p1150_transport::decoder`, in the spirit of the teacher's `logdemo`.

use anyhow::{Context, Result};
use p1150_transport::decoder::LogDecoder;

fn usage() -> ! {
    eprintln!(
        "usage: p1150-decode-demo <symbols.cbor> <target> <address-hex> <frame-hex>\n\n\
         example: p1150-decode-demo symbols.cbor 0 0x1000 f9ffffff"
    );
    std::process::exit(2);
}

fn parse_hex_u32(s: &str) -> Result<u32> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u32::from_str_radix(s, 16).with_context(|| format!("{s:?} is not a hex u32"))
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [symbols, target, address, frame] = args.as_slice() else {
        usage();
    };

    let decoder = LogDecoder::load(symbols)
        .with_context(|| format!("loading symbol table {symbols:?}"))?;
    let target: u32 = target.parse().context("target must be a small integer")?;
    let address = parse_hex_u32(address)?;
    let frame_bytes = hex::decode(frame).context("frame must be hex-encoded bytes")?;

    let record = decoder.decode(target, address, &frame_bytes);
    println!(
        "#{count} [{ts:.6}] {level} {file}:{line} {text}",
        count = record.count,
        ts = record.timestamp,
        level = record.level,
        file = record.file,
        line = record.line,
        text = record.text,
    );
    Ok(())
}
