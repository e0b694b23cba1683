//! TorrentZip command line tool.
//!
//! `torrentzip validate <files..>` prints one classification per archive.
//! `torrentzip create --output out.zip <inputs..>` writes a TorrentZip or
//! RVZSTD archive from loose files.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use romzip_torrentzip::{TorrentZipMethod, TorrentZipWriter, WriterConfig, validate_path};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "torrentzip",
    about = "Create and validate TorrentZip and RVZSTD archives",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify archives as VALID_TORRENTZIP, VALID_RVZSTD or INVALID
    Validate {
        /// Archives to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Write a new archive from loose files
    Create {
        /// Compression method: deflate (TorrentZip) or zstd (RVZSTD)
        #[arg(long, env = "TORRENTZIP_METHOD", default_value = "deflate")]
        method: TorrentZipMethod,

        /// Archive to create
        #[arg(long, short)]
        output: PathBuf,

        /// Zstd worker threads per entry
        #[arg(long, env = "TORRENTZIP_THREADS")]
        threads: Option<usize>,

        /// Files to add, named by their file name
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Validate { files } => validate_all(&files),
        Command::Create {
            method,
            output,
            threads,
            inputs,
        } => {
            let mut config = WriterConfig::default();
            if let Some(threads) = threads {
                config = config.with_compressor_threads(threads);
            }
            create(method, &output, inputs, config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn validate_all(files: &[PathBuf]) -> Result<ExitCode> {
    let mut all_valid = true;
    for file in files {
        match validate_path(file) {
            Ok(outcome) => {
                all_valid &= outcome.is_valid();
                println!("{}: {}", file.display(), outcome);
            }
            Err(err) => {
                all_valid = false;
                println!("{}: INVALID ({err})", file.display());
            }
        }
    }
    Ok(if all_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn create(
    method: TorrentZipMethod,
    output: &Path,
    inputs: Vec<PathBuf>,
    config: WriterConfig,
) -> Result<()> {
    let mut named = Vec::with_capacity(inputs.len());
    for input in inputs {
        let Some(name) = input.file_name().and_then(|n| n.to_str()) else {
            bail!("{} has no usable file name", input.display());
        };
        named.push((name.to_string(), input));
    }
    named.sort_by_cached_key(|(name, _)| name.to_lowercase());

    let threads = config.compressor_threads;
    let mut writer = TorrentZipWriter::open_with_config(output, method, config)
        .await
        .with_context(|| format!("creating {}", output.display()))?;

    for (name, path) in &named {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let size = file.metadata().await?.len();
        tracing::info!("Adding {} ({} bytes)", name, size);
        writer
            .add_stream(file, name, size, threads)
            .await
            .with_context(|| format!("adding {}", path.display()))?;
    }

    let comment = writer.finalize().await?;
    tracing::info!("Wrote {} with comment {}", output.display(), comment);
    Ok(())
}
