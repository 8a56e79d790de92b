//! CLI entry point for the bus-probe binary.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use bus_core::{parse_address, Address, Bus, MemoryMap, RegionKind, RegionSpec, Width};
#[cfg(test)]
use tempfile as _;

const USAGE_TEXT: &str = "\
Usage: bus-probe <command> [options]

Commands:
  dump [regions] --at <addr> [--len <n>] [--width <bytes>]  Read values through the bus
  map  [regions]                                            List the bus bindings

Regions (connected in the order given, earlier regions win on overlap):
  --rom <path>@<base>  ROM sized and filled from an image file
  --ram <size>@<base>  Zero-filled RAM
  --map <file.json>    Regions from a JSON memory map

Options:
  --at <addr>          First address to read (dump only)
  --len <n>            Number of values to read (default: 1)
  --width <bytes>      Access width: 1, 2, 4 or 8 (default: 1)
  -h, --help           Show this help message

Numbers are decimal or 0x-prefixed hexadecimal.

Examples:
  bus-probe dump --rom boot.bin@0xF000 --at 0xFFFC --width 2
  bus-probe dump --ram 0x100@0 --map board.json --at 0 --len 16
  bus-probe map --map board.json
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Dump(DumpArgs),
    Map(MapArgs),
}

#[derive(Debug, PartialEq, Eq)]
enum RegionSource {
    Inline(RegionSpec),
    File(PathBuf),
}

#[derive(Debug, PartialEq, Eq)]
struct DumpArgs {
    regions: Vec<RegionSource>,
    at: Address,
    len: u64,
    width: Width,
}

#[derive(Debug, PartialEq, Eq)]
struct MapArgs {
    regions: Vec<RegionSource>,
}

#[derive(Debug)]
enum ParseResult {
    Command(Command),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    let command_str = first.to_string_lossy().to_string();

    match command_str.as_str() {
        "dump" => parse_dump_args(args)
            .map(Command::Dump)
            .map(ParseResult::Command),
        "map" => parse_map_args(args)
            .map(Command::Map)
            .map(ParseResult::Command),
        other => Err(format!("unknown command: {other}")),
    }
}

fn option_value(
    args: &mut impl Iterator<Item = OsString>,
    name: &str,
) -> Result<String, String> {
    args.next()
        .map(|value| value.to_string_lossy().to_string())
        .ok_or_else(|| format!("missing value for {name}"))
}

fn number_value(args: &mut impl Iterator<Item = OsString>, name: &str) -> Result<u64, String> {
    let text = option_value(args, name)?;
    parse_address(&text).map_err(|e| format!("{name}: {e}"))
}

/// Consumes a region option if `arg` is one. Returns `Ok(false)` for any
/// other argument.
fn parse_region_option(
    arg: &OsStr,
    args: &mut impl Iterator<Item = OsString>,
    regions: &mut Vec<RegionSource>,
) -> Result<bool, String> {
    let kind = if arg == "--rom" {
        RegionKind::Rom
    } else if arg == "--ram" {
        RegionKind::Ram
    } else if arg == "--map" {
        let path = args
            .next()
            .ok_or_else(|| "missing value for --map".to_string())?;
        regions.push(RegionSource::File(PathBuf::from(path)));
        return Ok(true);
    } else {
        return Ok(false);
    };

    let name = format!("--{kind}");
    let text = option_value(args, &name)?;
    let spec = RegionSpec::parse(kind, &text).map_err(|e| format!("{name}: {e}"))?;
    regions.push(RegionSource::Inline(spec));
    Ok(true)
}

#[allow(clippy::while_let_on_iterator)]
fn parse_dump_args(mut args: impl Iterator<Item = OsString>) -> Result<DumpArgs, String> {
    let mut regions = Vec::new();
    let mut at: Option<Address> = None;
    let mut len = 1;
    let mut width = Width::Byte;

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if parse_region_option(&arg, &mut args, &mut regions)? {
            continue;
        }

        if arg == "--at" {
            at = Some(number_value(&mut args, "--at")?);
            continue;
        }

        if arg == "--len" {
            len = number_value(&mut args, "--len")?;
            continue;
        }

        if arg == "--width" {
            let bytes = number_value(&mut args, "--width")?;
            width = u8::try_from(bytes)
                .ok()
                .and_then(Width::from_bytes)
                .ok_or_else(|| format!("invalid width: {bytes} (expected 1, 2, 4 or 8)"))?;
            continue;
        }

        return Err(format!("unknown option: {}", arg.to_string_lossy()));
    }

    let at = at.ok_or_else(|| "missing --at address".to_string())?;
    Ok(DumpArgs {
        regions,
        at,
        len,
        width,
    })
}

#[allow(clippy::while_let_on_iterator)]
fn parse_map_args(mut args: impl Iterator<Item = OsString>) -> Result<MapArgs, String> {
    let mut regions = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if parse_region_option(&arg, &mut args, &mut regions)? {
            continue;
        }

        return Err(format!("unknown option: {}", arg.to_string_lossy()));
    }

    Ok(MapArgs { regions })
}

fn read_map_file(path: &Path) -> Result<MemoryMap, String> {
    let file =
        File::open(path).map_err(|e| format!("failed to open map {}: {e}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| format!("invalid map {}: {e}", path.display()))
}

fn build_bus(regions: Vec<RegionSource>) -> Result<Bus, String> {
    let mut map = MemoryMap::new();
    for source in regions {
        match source {
            RegionSource::Inline(spec) => {
                map.push(spec);
            }
            RegionSource::File(path) => {
                let loaded = read_map_file(&path)?;
                log::debug!(
                    "{} regions from {}",
                    loaded.regions.len(),
                    path.display()
                );
                map.regions.extend(loaded.regions);
            }
        }
    }

    if map.regions.is_empty() {
        log::warn!("no regions given; every access is open bus");
    }

    map.build().map_err(|e| e.to_string())
}

fn format_value(address: Address, width: Width, value: u64) -> String {
    let digits = usize::from(width.bytes()) * 2;
    format!("0x{address:016X}: 0x{value:0digits$X}")
}

fn run_dump(args: DumpArgs) -> Result<(), i32> {
    let mut bus = build_bus(args.regions).map_err(|error| {
        eprintln!("error: {error}");
        1
    })?;

    let step = Address::from(args.width.bytes());
    let mut address = args.at;
    for _ in 0..args.len {
        let value = bus.read(address, args.width);
        println!("{}", format_value(address, args.width, value));
        address = address.wrapping_add(step);
    }

    Ok(())
}

fn run_map(args: MapArgs) -> Result<(), i32> {
    let bus = build_bus(args.regions).map_err(|error| {
        eprintln!("error: {error}");
        1
    })?;

    for info in bus.bindings() {
        println!("[{}] 0x{:016X}..0x{:016X}", info.index, info.start, info.end);
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Command(Command::Dump(args))) => match run_dump(args) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Ok(ParseResult::Command(Command::Map(args))) => match run_map(args) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Err(error) => {
            if error.starts_with("Usage:") {
                println!("{error}");
            } else {
                eprintln!("error: {error}");
                eprintln!("{USAGE_TEXT}");
            }
            1
        }
    };

    std::process::exit(exit_code);
}
