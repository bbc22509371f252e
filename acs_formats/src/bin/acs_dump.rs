use std::path::PathBuf;

use acs_formats::{Decoded, ScriptImage, ScriptInfo};
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

/// Inspect a compiled script image: declared scripts, strings and the
/// reachable bytecode.
#[derive(Parser)]
struct Args {
    /// Path to the compiled script lump
    path: PathBuf,

    /// Emit the listing as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Skip the disassembly listing
    #[arg(long)]
    no_code: bool,
}

#[derive(Serialize)]
struct Listing<'a> {
    bytes: usize,
    scripts: &'a [ScriptInfo],
    strings: &'a [String],
    code: Vec<(usize, &'a Decoded)>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let image = ScriptImage::open(&args.path)?;

    if args.json {
        let listing = Listing {
            bytes: image.byte_len(),
            scripts: image.scripts(),
            strings: image.strings(),
            code: if args.no_code {
                Vec::new()
            } else {
                image.program().iter().collect()
            },
        };
        let json = serde_json::to_string_pretty(&listing).context("serializing image listing")?;
        println!("{json}");
        return Ok(());
    }

    if image.is_empty() {
        println!("{} declares no scripts", args.path.display());
        return Ok(());
    }

    println!(
        "{} scripts, {} strings in {} ({} bytes)",
        image.scripts().len(),
        image.strings().len(),
        args.path.display(),
        image.byte_len()
    );
    for info in image.scripts() {
        println!(
            "script {number:>4}  args {args}  entry @{entry:<6} {open}",
            number = info.number,
            args = info.arg_count,
            entry = info.entry,
            open = if info.open { "OPEN" } else { "" }
        );
    }

    for (index, text) in image.strings().iter().enumerate() {
        println!("str#{index:<4} {text:?}");
    }

    if !args.no_code {
        println!();
        for (pc, decoded) in image.program().iter() {
            let label = image
                .scripts()
                .iter()
                .find(|info| info.entry == pc)
                .map(|info| format!("script {}:", info.number));
            if let Some(label) = label {
                println!("{label}");
            }
            println!("  @{pc:<6} {}", decoded.instruction);
        }
    }

    Ok(())
}
