use std::{fs, path::PathBuf};

use clap::Parser;
use tracing::info;

use filemesh_core::mesh::{self, Version};

use crate::{read_mesh, CliError};

#[derive(Parser)]
pub struct Convert {
    input: PathBuf,
    output: PathBuf,
    /// Format version to write, such as `4.00`
    #[clap(short, long = "target-version", default_value = "4.00")]
    target: Version,
}

pub fn convert(opts: Convert) -> Result<(), CliError> {
    let (source_version, mesh) = read_mesh(opts.input)?;

    let bytes = mesh::encode(&mesh, opts.target).map_err(|source| CliError::Mesh {
        path: opts.output.clone(),
        source,
    })?;

    fs::write(&opts.output, &bytes).map_err(|source| CliError::Io {
        path: opts.output.clone(),
        source,
    })?;

    info!(
        "converted version {} to {}, wrote {} bytes to `{}`",
        source_version,
        opts.target,
        bytes.len(),
        opts.output.display()
    );
    Ok(())
}
