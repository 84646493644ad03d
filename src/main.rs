//! Bytetree CLI - parse, dump, and rebuild binary files through the
//! built-in definitions.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use memmap2::Mmap;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::filter::EnvFilter;

use bytetree::engine::to_json;
use bytetree::defs::{self, Format};
use bytetree::prelude::*;

/// Bytetree - declarative binary structure tool
#[derive(Parser)]
#[command(name = "bytetree")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in definitions
    Formats,

    /// Parse a file and print its tree
    Dump {
        /// Definition name or file extension
        #[arg(short, long, env = "BYTETREE_FORMAT")]
        format: String,

        /// Input file
        #[arg(short, long, env = "BYTETREE_INPUT")]
        input: PathBuf,

        /// Print JSON instead of an indented tree
        #[arg(long)]
        json: bool,
    },

    /// Parse and reserialize files, reporting which come back identical
    Roundtrip {
        /// Definition name or file extension
        #[arg(short, long, env = "BYTETREE_FORMAT")]
        format: String,

        /// Input files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Parse a file, lay out its pointers again, and write the result
    Rebuild {
        /// Definition name or file extension
        #[arg(short, long, env = "BYTETREE_FORMAT")]
        format: String,

        /// Input file
        #[arg(short, long, env = "BYTETREE_INPUT")]
        input: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Formats => cmd_formats(),
        Commands::Dump { format, input, json } => cmd_dump(&format, &input, json)?,
        Commands::Roundtrip { format, files } => cmd_roundtrip(&format, &files)?,
        Commands::Rebuild { format, input, output } => cmd_rebuild(&format, &input, &output)?,
    }

    Ok(())
}

fn load_format(name: &str) -> Result<(&'static Format, DescRef)> {
    let format = defs::find(name)?;
    let def = (format.definition)().with_context(|| format!("Failed to build the '{}' definition", format.name))?;
    Ok((format, def))
}

fn cmd_formats() {
    for format in defs::registry() {
        println!("{:<10} .{:<6} {}", format.name, format.extension, format.description);
    }
}

fn cmd_dump(format: &str, input: &Path, json: bool) -> Result<()> {
    let (_, def) = load_format(format)?;
    let tag = Tag::from_file(def, input, TagOptions::default())
        .with_context(|| format!("Failed to parse {}", input.display()))?;
    info!(file = %input.display(), parsed = tag.parsed_len(), "parsed");

    if json {
        println!("{:#}", to_json(tag.tree(), tag.root())?);
        return Ok(());
    }

    let tree = tag.tree();
    for (depth, id) in tree.walk(tag.root()) {
        let indent = "  ".repeat(depth);
        let desc = tree.desc(id)?;
        match tree.enum_name(id) {
            Some(option) => println!("{}{} ({}) = {}", indent, desc.name, desc.field_type, option),
            None => println!("{}{} ({})", indent, desc.name, desc.field_type),
        }
        for (index, value) in tree.children(id) {
            if value.is_block() {
                continue;
            }
            let name = tree.attr_desc(id, index).map(|d| d.name.clone()).unwrap_or_else(|_| index.to_string());
            println!("{}  {}: {}", indent, name, value);
        }
    }
    Ok(())
}

/// Outcome of reserializing one file.
enum Outcome {
    Identical,
    Differs { original: usize, rebuilt: usize, first_diff: Option<usize> },
}

fn roundtrip_file(def: &DescRef, path: &Path) -> Result<Outcome> {
    let file = fs::File::open(path)?;
    let data = unsafe { Mmap::map(&file)? };
    let mut tag = Tag::parse(def.clone(), &data, TagOptions::default())?;
    let rebuilt = tag.serialize()?;
    if rebuilt[..] == data[..] {
        return Ok(Outcome::Identical);
    }
    let first_diff = data.iter().zip(rebuilt.iter()).position(|(a, b)| a != b);
    Ok(Outcome::Differs {
        original: data.len(),
        rebuilt: rebuilt.len(),
        first_diff,
    })
}

fn cmd_roundtrip(format: &str, files: &[PathBuf]) -> Result<()> {
    let (format, def) = load_format(format)?;
    println!("Round-tripping {} file(s) as {}", files.len(), format.name);

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let identical = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    let reports: Vec<(PathBuf, Result<Outcome>)> = files
        .par_iter()
        .map(|path| {
            let result = roundtrip_file(&def, path);
            match &result {
                Ok(Outcome::Identical) => {
                    identical.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Outcome::Differs { .. }) => {}
                Err(_) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }
            pb.inc(1);
            (path.clone(), result)
        })
        .collect();
    pb.finish_and_clear();

    for (path, result) in &reports {
        match result {
            Ok(Outcome::Identical) => debug!(file = %path.display(), "identical"),
            Ok(Outcome::Differs { original, rebuilt, first_diff }) => {
                let at = first_diff.map_or_else(|| "length only".to_owned(), |i| format!("offset {:#x}", i));
                println!(
                    "DIFF {} ({} -> {} bytes, first difference at {})",
                    path.display(),
                    original,
                    rebuilt,
                    at
                );
            }
            Err(e) => {
                warn!(file = %path.display(), "round trip failed");
                println!("FAIL {}: {:#}", path.display(), e);
            }
        }
    }

    let identical = identical.load(Ordering::Relaxed);
    let failed = failed.load(Ordering::Relaxed);
    let differing = files.len() - identical - failed;
    println!(
        "{} identical, {} differing, {} failed in {:?}",
        identical,
        differing,
        failed,
        start.elapsed()
    );
    if identical != files.len() {
        bail!("{} of {} file(s) did not round-trip", files.len() - identical, files.len());
    }
    Ok(())
}

fn cmd_rebuild(format: &str, input: &Path, output: &Path) -> Result<()> {
    let (_, def) = load_format(format)?;
    let start = Instant::now();
    let mut tag = Tag::from_file(def, input, TagOptions::default())
        .with_context(|| format!("Failed to parse {}", input.display()))?;
    tag.write_to_file(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Rebuilt {} -> {} in {:?}",
        input.display(),
        output.display(),
        start.elapsed()
    );
    Ok(())
}
