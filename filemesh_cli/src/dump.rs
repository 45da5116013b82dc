use std::path::PathBuf;

use clap::Parser;

use crate::{read_mesh, CliError};

#[derive(Parser)]
pub struct Dump {
    path: PathBuf,
    #[clap(short, long)]
    bones: bool,
    #[clap(short, long)]
    morphs: bool,
    #[clap(short, long)]
    names_only: bool,
}

pub fn dump(opts: Dump) -> Result<(), CliError> {
    let (_, mesh) = read_mesh(opts.path)?;

    if opts.bones {
        for bone in mesh.bones.iter().flatten() {
            if opts.names_only {
                println!("{}", bone.name);
            } else {
                println!("{:#?}", bone);
            }
        }
    }

    if opts.morphs {
        for morph in mesh.morphs.iter().flatten() {
            if opts.names_only {
                println!("{}", morph.label);
            } else {
                println!("{:#?}", morph);
            }
        }
    }

    Ok(())
}
