mod commands;

use std::{error::Error, fs, path::Path};

use bmg::patch::{self, PatchCommand, SetOp};
use bmg::{scan, BmgConfig};
use clap::Parser;
use commands::{Cli, Commands};
use log::info;

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    simple_logger::init_with_level(verbosity_to_level(args.verbosity))?;

    match args.subcommand {
        Commands::Decode { file, out, options } => run_decode(&file, out.as_deref(), options),
        Commands::Encode { file, out, options } => run_encode(&file, out.as_deref(), options),
        Commands::Text { file, out } => run_text(&file, out.as_deref()),
        Commands::Patch { dest, source, out, options } => {
            run_patch(&dest, source.as_deref(), out.as_deref(), options)
        }
    }
}

fn verbosity_to_level(v: u8) -> log::Level {
    match v {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        _ => log::Level::Debug,
    }
}

fn run_decode(file: &Path, out: Option<&Path>, options: commands::DecodeOptions) -> Result<(), Box<dyn Error>> {
    let bytes = fs::read(file)?;
    let mut config = BmgConfig::default();
    config.force_encoding = options.force_encoding;

    let (decoded, diagnostics) = scan(&bytes, config)?;
    for d in &diagnostics.0 {
        info!("{}", d.message);
    }

    let rendered = if options.json {
        serde_json::to_string_pretty(decoded.items())?
    } else {
        decoded.to_text()
    };
    write_output(out, &rendered)
}

fn run_encode(file: &Path, out: Option<&Path>, options: commands::EncodeOptions) -> Result<(), Box<dyn Error>> {
    let content = fs::read_to_string(file)?;
    let mut bmg = if options.json {
        let items: Vec<bmg::Item> = serde_json::from_str(&content)?;
        let mut bmg = bmg::Bmg::new_with(BmgConfig::default());
        for item in items {
            let mid = item.mid;
            *bmg.insert(mid) = item;
        }
        bmg
    } else {
        let (bmg, _) = bmg::text::scan_text(&content, BmgConfig::default())?;
        bmg
    };
    bmg.legacy = options.legacy;

    let encoded = bmg.to_binary()?;
    write_output_bytes(out, &encoded)
}

fn run_text(file: &Path, out: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let bytes = fs::read(file)?;
    let (decoded, _) = bmg::store::Bmg::decode_binary(&bytes, BmgConfig::default())?;
    write_output(out, &decoded.to_text())
}

fn run_patch(
    dest_path: &Path,
    source_path: Option<&Path>,
    out: Option<&Path>,
    options: commands::PatchOptions,
) -> Result<(), Box<dyn Error>> {
    let dest_bytes = fs::read(dest_path)?;
    let (mut dest, _) = scan(&dest_bytes, BmgConfig::default())?;

    let source = match source_path {
        Some(path) => {
            let bytes = fs::read(path)?;
            Some(scan(&bytes, BmgConfig::default())?.0)
        }
        None => None,
    };

    let command = parse_command(&options)?;
    let printed = patch::execute(&mut dest, source.as_ref(), &command)?;
    for line in &printed {
        println!("{line}");
    }

    if !matches!(command, PatchCommand::Set(SetOp::Print)) {
        let encoded = dest.to_binary()?;
        write_output_bytes(out, &encoded)?;
    }

    Ok(())
}

fn parse_command(options: &commands::PatchOptions) -> Result<PatchCommand, Box<dyn Error>> {
    let arg = || options.arg.clone().ok_or_else(|| "this command requires --arg".to_string());
    let mid_triple = || -> Result<(bmg::Mid, bmg::Mid, bmg::Mid), Box<dyn Error>> {
        let raw = arg()?;
        let parts: Vec<&str> = raw.split(',').collect();
        if parts.len() != 3 {
            return Err("GENERIC's --arg expects small,medium,large hex MIDs".into());
        }
        let parse = |s: &str| u32::from_str_radix(s.trim_start_matches("0x"), 16);
        Ok((parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    };

    Ok(match options.command.to_ascii_uppercase().as_str() {
        "REPLACE" => PatchCommand::Set(SetOp::Replace),
        "INSERT" => PatchCommand::Set(SetOp::Insert),
        "OVERWRITE" => PatchCommand::Set(SetOp::Overwrite),
        "DELETE" => PatchCommand::Set(SetOp::Delete),
        "MASK" => PatchCommand::Set(SetOp::Mask),
        "EQUAL" => PatchCommand::Set(SetOp::Equal),
        "NOT-EQUAL" => PatchCommand::Set(SetOp::NotEqual),
        "PRINT" => PatchCommand::Set(SetOp::Print),
        "FORMAT" => PatchCommand::Format(arg()?),
        "REGEX" => PatchCommand::Regex(arg()?),
        "RM-REGEX" => PatchCommand::RmRegex(arg()?),
        "GENERIC" => {
            let (small, medium, large) = mid_triple()?;
            PatchCommand::Generic { small, medium, large }
        }
        "ID" => PatchCommand::Id,
        "ID-ALL" => PatchCommand::IdAll,
        "UNICODE" => PatchCommand::Unicode,
        "RM-ESCAPES" => PatchCommand::RmEscapes,
        "X-COPY" => PatchCommand::XCopy,
        "X-FORCE-COPY" => PatchCommand::XForceCopy,
        "CT-COPY" => PatchCommand::CtCopy,
        "CT-FORCE-COPY" => PatchCommand::CtForceCopy,
        "CT-FILL" => PatchCommand::CtFill(options.fill_limit),
        "LE-COPY" => PatchCommand::LeCopy,
        "LE-FORCE-COPY" => PatchCommand::LeForceCopy,
        "LE-FILL" => PatchCommand::LeFill(options.fill_limit),
        "RM-FILLED" => PatchCommand::RmFilled,
        other => return Err(format!("unrecognised patch command {other:?}").into()),
    })
}

fn write_output(out: Option<&Path>, content: &str) -> Result<(), Box<dyn Error>> {
    match out {
        Some(path) => fs::write(path, content)?,
        None => println!("{content}"),
    }
    Ok(())
}

fn write_output_bytes(out: Option<&Path>, content: &[u8]) -> Result<(), Box<dyn Error>> {
    match out {
        Some(path) => fs::write(path, content)?,
        None => {
            use std::io::Write;
            std::io::stdout().write_all(content)?;
        }
    }
    Ok(())
}
