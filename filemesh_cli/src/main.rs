#![warn(clippy::all, clippy::pedantic)]

mod convert;
mod dump;
mod inspect;

use std::{fs, io, path::PathBuf, process};

use convert::{convert, Convert};
use dump::{dump, Dump};
use inspect::{inspect, Inspect};

use clap::Parser;
use filemesh_core::mesh::{self, Mesh, Version, HEADER_LEN};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(version = "0.1.0")]
struct Opts {
    /// Log codec details, overridden by `RUST_LOG`
    #[clap(short, long)]
    verbose: bool,
    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    Inspect(Inspect),
    Convert(Convert),
    Dump(Dump),
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("`{}`: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("`{}`: {source}", path.display())]
    Mesh { path: PathBuf, source: mesh::Error },
}

/// Reads and decodes a mesh file, returning the version it was stored in.
pub fn read_mesh(path: PathBuf) -> Result<(Version, Mesh), CliError> {
    let bytes = fs::read(&path).map_err(|source| CliError::Io {
        path: path.clone(),
        source,
    })?;

    let decoded = Version::from_header(&bytes[..bytes.len().min(HEADER_LEN)])
        .and_then(|version| mesh::decode(&bytes).map(|mesh| (version, mesh)));
    decoded.map_err(|source| CliError::Mesh { path, source })
}

fn main() {
    let opts = Opts::parse();

    let default_level = if opts.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    let result = match opts.subcommand {
        SubCommand::Inspect(opts) => inspect(opts),
        SubCommand::Convert(opts) => convert(opts),
        SubCommand::Dump(opts) => dump(opts),
    };

    if let Err(err) = result {
        eprintln!("error: {}", err);
        process::exit(1);
    }
}
