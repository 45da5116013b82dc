#![warn(clippy::all, clippy::pedantic)]
// field widths are fixed by the format
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

mod binary;
mod binary_utils;
mod facs;
mod mesh;
mod text;
mod version;

pub use mesh::{Bone, Color, Face, Mesh, MorphTarget, Tangent, Vertex};
pub use version::{Version, HEADER_LEN};

use std::result;

use filemesh_bits::BitBuffer;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    #[error("not a mesh file: invalid header `{header}`")]
    NotAMeshFile { header: String },
    #[error("unsupported version {version}")]
    UnsupportedVersion { version: String },
    #[error("quantization range overflow: range {range} exceeds the 16-bit code space")]
    QuantizationRangeOverflow { range: f32 },
    #[error("mesh corrupted: {error}")]
    Corrupted { error: &'static str },
    #[error("version {version} can't store {feature}")]
    Unsupported {
        version: Version,
        feature: &'static str,
    },
    #[error("vertex {vertex} has more than 4 bone weights")]
    TooManyInfluences { vertex: usize },
    #[error("weight refers to unknown bone `{name}`")]
    UnknownBone { name: String },
    #[error("{0} count exceeds the format limit")]
    Overflow(&'static str),
}

pub type Result<T> = result::Result<T, Error>;

/// Decodes a mesh file.
///
/// Truncated input is not an error: fields past the end of `bytes` read as
/// zero. Element counts are trusted, so memory use follows the counts the
/// file declares rather than its size.
///
/// # Errors
///
/// Returns `Err` if the version header is missing or unsupported, or if a
/// quantized matrix range exceeds what 16-bit codes can span.
pub fn decode(bytes: &[u8]) -> Result<Mesh> {
    let mut buffer = BitBuffer::from_bytes(bytes);
    let version = Version::from_header(&buffer.read_bytes(HEADER_LEN))?;
    debug!("decoding mesh version {}", version);

    if version.is_text() {
        Ok(text::decode(bytes, version))
    } else {
        binary::decode(&mut buffer, version)
    }
}

/// Encodes a mesh into the given format version.
///
/// Decoding the result gives back the same mesh, with these exceptions:
/// versions before 3 merge all lods, a mesh whose first lod is empty decodes
/// with its lods merged, `Some` empty bones decode as `None`, and the text
/// format keeps neither tangents nor colors.
///
/// # Errors
///
/// Returns `Err` if the version is unsupported, or if the mesh carries data
/// that the version can't represent.
pub fn encode(mesh: &Mesh, version: Version) -> Result<Vec<u8>> {
    version.check()?;
    debug!("encoding mesh version {}", version);

    if version.is_text() {
        Ok(text::encode(mesh, version))
    } else {
        let mut buffer = BitBuffer::new();
        binary::encode(mesh, version, &mut buffer)?;
        Ok(buffer.to_bytes())
    }
}
