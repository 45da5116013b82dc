use std::path::PathBuf;

use clap::Parser;

use filemesh_core::mesh::{Mesh, Version};

use crate::{read_mesh, CliError};

#[derive(Parser)]
pub struct Inspect {
    path: PathBuf,
}

pub fn inspect(opts: Inspect) -> Result<(), CliError> {
    let (version, mesh) = read_mesh(opts.path)?;
    print_summary(version, &mesh);
    Ok(())
}

fn print_summary(version: Version, mesh: &Mesh) {
    println!("version: {}", version);
    println!("vertices: {}", mesh.vertices.len());
    println!("faces: {}", mesh.face_count());

    for (i, lod) in mesh.lods.iter().enumerate() {
        println!("  lod {}: {} faces", i, lod.len());
    }

    match &mesh.bones {
        Some(bones) => println!("bones: {}", bones.len()),
        None => println!("bones: none"),
    }
    match &mesh.morphs {
        Some(morphs) => println!("morphs: {}", morphs.len()),
        None => println!("morphs: none"),
    }

    let tangents = mesh.vertices.iter().filter(|v| v.tangent.is_some()).count();
    let colored = mesh.vertices.iter().filter(|v| !v.color.is_white()).count();
    println!("vertices with tangents: {}", tangents);
    println!("vertices with color: {}", colored);
}
