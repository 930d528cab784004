//! Signet CLI
//!
//! Command-line front end for the signature store:
//! - Capturing keyed signature archives from files or stdin (`import`)
//! - Listing and inspecting stored signatures (`list`, `show`)
//! - Placing a signature into a target box (`fit`)
//! - Compacting the store's write-ahead log (`checkpoint`)

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use signet_path::{Alignment, Path as SignaturePath, PathCommand, Point, Rect, Transform};
use signet_storage::{resolve, ResolvedSignature, SignatureRef, SignatureStore, StoreConfig};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "signet")]
#[command(author, version, about = "Signet: capture and store vector signatures")]
struct Cli {
    /// Signature store directory (default: ./signatures)
    #[arg(long, global = true, env = "SIGNET_STORE")]
    store: Option<PathBuf>,

    /// JSON store configuration; `--store` overrides its `root`
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug); `RUST_LOG` takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a keyed signature archive (`-` reads stdin)
    Import {
        /// Archive file
        input: PathBuf,
    },

    /// List stored signature identifiers
    List {
        /// Print a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Show a stored signature (`ID` or `vector:ID`)
    Show {
        reference: SignatureRef,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a signature scaled to fit a box, as JSON
    Fit {
        reference: SignatureRef,
        #[arg(long)]
        width: f32,
        #[arg(long)]
        height: f32,
        /// Placement along the axis that is not filled
        #[arg(long, value_enum, default_value_t = Align::Mid)]
        align: Align,
    },

    /// Fold the write-ahead log into the snapshot
    Checkpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Align {
    Min,
    Mid,
    Max,
}

impl From<Align> for Alignment {
    fn from(align: Align) -> Self {
        match align {
            Align::Min => Alignment::Min,
            Align::Mid => Alignment::Mid,
            Align::Max => Alignment::Max,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.store)?;
    let store = SignatureStore::open(config.clone())
        .with_context(|| format!("failed to open signature store at {}", config.root.display()))?;

    let result = run(&store, cli.command);
    let closed = store.close().context("failed to close signature store");
    result?;
    closed
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(file: Option<&Path>, store: Option<PathBuf>) -> Result<StoreConfig> {
    let mut config = match file {
        Some(file) => {
            let text = fs::read_to_string(file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("invalid store configuration in {}", file.display()))?
        }
        None => StoreConfig::default(),
    };
    if let Some(root) = store {
        config.root = root;
    }
    Ok(config)
}

fn run(store: &SignatureStore, command: Commands) -> Result<()> {
    match command {
        Commands::Import { input } => cmd_import(store, &input),
        Commands::List { json } => cmd_list(store, json),
        Commands::Show { reference, json } => cmd_show(store, &reference, json),
        Commands::Fit {
            reference,
            width,
            height,
            align,
        } => cmd_fit(store, &reference, width, height, align.into()),
        Commands::Checkpoint => {
            store.checkpoint()?;
            eprintln!("{} checkpointed {} signatures", "ok".green().bold(), store.len());
            Ok(())
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

fn read_input(input: &Path) -> Result<Vec<u8>> {
    if input == Path::new("-") {
        let mut bytes = Vec::new();
        io::stdin()
            .read_to_end(&mut bytes)
            .context("failed to read archive from stdin")?;
        return Ok(bytes);
    }
    fs::read(input).with_context(|| format!("failed to read {}", input.display()))
}

fn cmd_import(store: &SignatureStore, input: &Path) -> Result<()> {
    let bytes = read_input(input)?;
    let captured = store
        .capture(&bytes)
        .with_context(|| format!("failed to import {}", input.display()))?;

    eprintln!(
        "{} captured signature created {} ({} commands, bounds {})",
        "ok".green().bold(),
        captured.created_at.to_rfc3339(),
        captured.path.len(),
        format_rect(&captured.path.bounding_box())
    );
    println!("{}", captured.identifier);
    Ok(())
}

fn cmd_list(store: &SignatureStore, json: bool) -> Result<()> {
    let identifiers = store.list_identifiers();
    if json {
        println!("{}", serde_json::to_string_pretty(&identifiers)?);
        return Ok(());
    }
    if identifiers.is_empty() {
        eprintln!("(no signatures stored)");
    }
    for identifier in identifiers {
        println!("{identifier}");
    }
    Ok(())
}

fn lookup(store: &SignatureStore, reference: &SignatureRef) -> Result<ResolvedSignature> {
    resolve(store, reference)?.ok_or_else(|| anyhow!("no stored signature matches `{reference}`"))
}

#[derive(Serialize)]
struct ShowOutput<'a> {
    reference: String,
    bounding_box: Rect,
    subpaths: usize,
    path: &'a SignaturePath,
}

fn cmd_show(store: &SignatureStore, reference: &SignatureRef, json: bool) -> Result<()> {
    let resolved = lookup(store, reference)?;
    let path = &resolved.path;

    if json {
        let output = ShowOutput {
            reference: resolved.reference.to_string(),
            bounding_box: path.bounding_box(),
            subpaths: path.subpath_count(),
            path,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", resolved.reference.to_string().bold());
    println!("  bounds:   {}", format_rect(&path.bounding_box()));
    println!("  subpaths: {}", path.subpath_count());
    println!("  commands: {}", path.len());
    for command in path {
        println!("    {}", format_command(command));
    }
    Ok(())
}

#[derive(Serialize)]
struct FitOutput {
    reference: String,
    bounds: Rect,
    transform: Transform,
    path: SignaturePath,
}

fn cmd_fit(
    store: &SignatureStore,
    reference: &SignatureRef,
    width: f32,
    height: f32,
    alignment: Alignment,
) -> Result<()> {
    let resolved = lookup(store, reference)?;
    let bounds = Rect::new(0.0, 0.0, width, height);
    let transform = Transform::fit(&resolved.path.bounding_box(), &bounds, alignment)
        .ok_or_else(|| anyhow!("signature `{reference}` has no extent to scale"))?;

    let output = FitOutput {
        reference: resolved.reference.to_string(),
        bounds,
        transform,
        path: resolved.path.transformed(&transform),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

// ============================================================================
// Formatting
// ============================================================================

fn format_point(p: Point) -> String {
    format!("({}, {})", p.x, p.y)
}

fn format_rect(r: &Rect) -> String {
    format!(
        "x={} y={} w={} h={}",
        r.min_x(),
        r.min_y(),
        r.width,
        r.height
    )
}

fn format_command(command: &PathCommand) -> String {
    match *command {
        PathCommand::MoveTo(p) => format!("move_to {}", format_point(p)),
        PathCommand::LineTo(p) => format!("line_to {}", format_point(p)),
        PathCommand::QuadCurveTo { point, control } => format!(
            "quad_to {} control {}",
            format_point(point),
            format_point(control)
        ),
        PathCommand::CubicCurveTo {
            point,
            control1,
            control2,
        } => format!(
            "cubic_to {} controls {} {}",
            format_point(point),
            format_point(control1),
            format_point(control2)
        ),
        PathCommand::ClosePath => "close".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fit() {
        let cli = Cli::try_parse_from([
            "signet", "fit", "vector:ABC", "--width", "200", "--height", "50", "--align", "max",
        ])
        .unwrap();
        match cli.command {
            Commands::Fit {
                reference,
                width,
                height,
                align,
            } => {
                assert_eq!(reference.to_string(), "vector:ABC");
                assert_eq!((width, height), (200.0, 50.0));
                assert_eq!(align, Align::Max);
            }
            _ => panic!("expected fit"),
        }
    }

    #[test]
    fn test_store_flag_overrides_config_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("signet.json");
        fs::write(&file, r#"{"root":"from-file","sync_writes":false}"#).unwrap();

        let config = load_config(Some(&file), Some(PathBuf::from("from-flag"))).unwrap();
        assert_eq!(config.root, PathBuf::from("from-flag"));
        assert!(!config.sync_writes);

        let config = load_config(Some(&file), None).unwrap();
        assert_eq!(config.root, PathBuf::from("from-file"));
    }

    #[test]
    fn test_format_command() {
        assert_eq!(
            format_command(&PathCommand::QuadCurveTo {
                point: Point::new(1.0, 2.0),
                control: Point::new(0.5, 0.0),
            }),
            "quad_to (1, 2) control (0.5, 0)"
        );
        assert_eq!(format_command(&PathCommand::ClosePath), "close");
    }
}
