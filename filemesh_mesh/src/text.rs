//! The line-oriented format used by versions before 2.

use std::fmt::Write;

use glam::{Vec2, Vec3};
use nom::{
    character::complete::{char, multispace0},
    multi::{many0, separated_list0},
    number::complete::float,
    sequence::{delimited, preceded},
    IResult,
};
use tracing::{debug, warn};

use crate::mesh::{Face, Mesh, Vertex};
use crate::version::Version;

/// Tuples per face: position, normal and uv of three vertices.
const TUPLES_PER_FACE: usize = 9;

/// Versions before this one store positions at twice their size.
const UNIT_FIX: Version = Version::V1_01;

fn separator(input: &str) -> IResult<&str, char> {
    delimited(multispace0, char(','), multispace0)(input)
}

/// A bracketed list of comma separated numbers, such as `[1,-0.5,2e3]`.
fn tuple(input: &str) -> IResult<&str, Vec<f32>> {
    preceded(
        multispace0,
        delimited(
            char('['),
            preceded(multispace0, separated_list0(separator, float)),
            preceded(multispace0, char(']')),
        ),
    )(input)
}

fn component(values: &[f32], i: usize) -> f32 {
    values.get(i).copied().unwrap_or(0.0)
}

fn to_vec3(values: &[f32]) -> Vec3 {
    Vec3::new(component(values, 0), component(values, 1), component(values, 2))
}

fn to_vec2(values: &[f32]) -> Vec2 {
    Vec2::new(component(values, 0), component(values, 1))
}

/// Decodes the text format. Missing tuples and an unreadable face count read
/// as zero, like truncated binary input.
pub(crate) fn decode(bytes: &[u8], version: Version) -> Mesh {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = text.splitn(3, '\n');
    let _header = lines.next();

    let face_count_line = lines.next().map(str::trim).unwrap_or_default();
    let face_count: usize = face_count_line.parse().unwrap_or_else(|_| {
        warn!("face count `{}` is not a number, reading no faces", face_count_line);
        0
    });
    let data = lines.next().unwrap_or_default();

    // `tuple` never succeeds without consuming input, so this can't fail
    let (rest, tuples) = many0(tuple)(data).unwrap_or((data, Vec::new()));
    if !rest.trim().is_empty() {
        warn!("ignoring {} bytes of trailing vertex data", rest.trim().len());
    }

    let needed = face_count.saturating_mul(TUPLES_PER_FACE);
    if tuples.len() < needed {
        warn!(
            "{} faces need {} tuples but only {} exist, reading the rest as zeros",
            face_count,
            needed,
            tuples.len()
        );
    }

    let position_scale = if version < UNIT_FIX { 0.5 } else { 1.0 };
    let values = |i: usize| tuples.get(i).map_or(&[][..], Vec::as_slice);

    let vertices: Vec<Vertex> = (0..face_count.saturating_mul(3))
        .map(|i| Vertex {
            position: to_vec3(values(3 * i)) * position_scale,
            normal: to_vec3(values(3 * i + 1)),
            uv: to_vec2(values(3 * i + 2)),
            ..Vertex::default()
        })
        .collect();

    let faces = (1..=face_count)
        .map(|i| Face::new(3 * i - 2, 3 * i - 1, 3 * i))
        .collect();

    debug!("text mesh: {} faces, {} vertices", face_count, vertices.len());

    Mesh {
        lods: vec![faces],
        vertices,
        bones: None,
        morphs: None,
    }
}

pub(crate) fn encode(mesh: &Mesh, version: Version) -> Vec<u8> {
    if mesh.lods.len() > 1 {
        warn!(
            "version {} has no lods, writing {} lods as one",
            version,
            mesh.lods.len()
        );
    }

    let position_scale = if version < UNIT_FIX { 2.0 } else { 1.0 };
    let missing = Vertex::default();

    let mut out = version.header();
    // writing into a String can't fail
    let _ = writeln!(out, "{}", mesh.face_count());

    for face in mesh.faces() {
        for &index in &face.indices {
            let vertex = match index.checked_sub(1).and_then(|i| mesh.vertices.get(i)) {
                Some(vertex) => vertex,
                None => {
                    warn!("face refers to missing vertex {}", index);
                    &missing
                }
            };

            let p = vertex.position * position_scale;
            let n = vertex.normal;
            let uv = vertex.uv;
            let _ = write!(
                out,
                "[{},{},{}][{},{},{}][{},{},0]",
                p.x, p.y, p.z, n.x, n.y, n.z, uv.x, uv.y
            );
        }
    }

    out.into_bytes()
}
