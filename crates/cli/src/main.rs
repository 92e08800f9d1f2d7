// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use strides_core::RoundTripConfig;
use strides_formats::AsdfFile;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// strides – write a column-major array to ASDF, read it back, compare
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the sample array, reopen the file and print both arrays
    Run {
        /// Path to a round-trip YAML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output file (path, file:// or memory:// URI)
        #[arg(short, long)]
        output: Option<String>,

        /// File format (asdf, npz)
        #[arg(long)]
        format: Option<String>,

        /// Memory order of the sample array (C or F)
        #[arg(long)]
        order: Option<String>,

        /// Store array elements inline in the YAML tree instead of binary blocks
        #[arg(long)]
        inline: bool,

        /// Print timing and byte counts after the arrays
        #[arg(long)]
        metrics: bool,
    },
    /// Print the tree and block headers of an ASDF file
    Inspect {
        /// Path to an ASDF file
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if args.verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "strides={0},strides_core={0},strides_formats={0}",
            log_level
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("strides v{} starting", env!("CARGO_PKG_VERSION"));

    match args.command.unwrap_or(Commands::Run {
        config: None,
        output: None,
        format: None,
        order: None,
        inline: false,
        metrics: false,
    }) {
        Commands::Run {
            config,
            output,
            format,
            order,
            inline,
            metrics,
        } => {
            let config = build_config(config.as_deref(), output, format, order, inline)?;
            run(&config, metrics)
        }
        Commands::Inspect { path } => inspect(&path),
    }
}

/// Load the config file (or defaults) and apply command-line overrides.
fn build_config(
    path: Option<&Path>,
    output: Option<String>,
    format: Option<String>,
    order: Option<String>,
    inline: bool,
) -> Result<RoundTripConfig> {
    let mut config = match path {
        Some(p) => {
            info!("Loading round-trip config from: {:?}", p);
            RoundTripConfig::from_yaml_file(p)?
        }
        None => RoundTripConfig::default(),
    };
    if let Some(output) = output {
        config.output = output;
    }
    if let Some(format) = format {
        config.format = format;
    }
    if let Some(order) = order {
        config.array.order = order;
    }
    if inline {
        config.storage = "inline".to_string();
    }
    config.validate().context("Invalid round-trip configuration")?;
    Ok(config)
}

fn run(config: &RoundTripConfig, show_metrics: bool) -> Result<()> {
    let (report, metrics) = strides_core::run_round_trip(config)?;

    println!("Original array:\n {}", report.original);
    println!("Recovered array:\n {}", report.recovered);

    if show_metrics {
        metrics.print_summary();
    }
    if report.logically_equal() && !report.layout_preserved() {
        warn!(
            "Values match but layout changed from {:?} to {:?}",
            report.original.memory_order(),
            report.recovered.memory_order()
        );
    }
    report.ensure_equal()
}

fn inspect(path: &Path) -> Result<()> {
    let file = AsdfFile::open(path)?;

    if let Some(library) = file.library() {
        println!("asdf_library: {}", serde_yaml::to_string(library)?.trim_end());
    }
    for (key, node) in file.tree().iter() {
        match node.as_array() {
            Some(array) => println!(
                "{}: ndarray {} {:?} order={} strides={:?}",
                key,
                array.dtype(),
                array.shape(),
                array
                    .memory_order()
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "strided".to_string()),
                array.byte_strides()
            ),
            None => println!("{}: {:?}", key, node),
        }
    }
    for (i, block) in file.blocks().iter().enumerate() {
        println!(
            "block {}: offset={} allocated={} used={} compression={:?} streamed={}",
            i,
            block.offset,
            block.header.allocated_size,
            block.header.used_size,
            block.header.compression_name(),
            block.header.is_streamed()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let config = build_config(None, Some("memory://x.npz".into()), Some("npz".into()), Some("C".into()), false).unwrap();
        assert_eq!(config.output, "memory://x.npz");
        assert_eq!(config.format, "npz");
        assert_eq!(config.array.order, "C");
        assert_eq!(config.storage, "internal");

        assert!(build_config(None, None, Some("tfrecord".into()), None, false).is_err());
    }

    #[test]
    fn bare_invocation_defaults_to_run() {
        let args = Args::try_parse_from(["strides"]).unwrap();
        assert!(args.command.is_none());
        let args = Args::try_parse_from(["strides", "-v", "run", "--inline"]).unwrap();
        assert!(matches!(args.command, Some(Commands::Run { inline: true, .. })));
    }
}
