use std::{collections::BTreeMap, ops::Range};

use filemesh_bits::BitBuffer;
use glam::{Affine3A, Vec3};
use itertools::Itertools;
use rgb::RGB8;
use tracing::{debug, trace, warn};

use crate::binary_utils::{
    capacity_hint, join_names, null_terminated_prefix, ReadExt, WriteExt,
};
use crate::facs;
use crate::mesh::{Bone, Color, Face, Mesh, Tangent, Vertex};
use crate::version::HEADER_LEN;

use super::{Error, Result, Version};

/// Vertex record without color.
const VERTEX_SIZE_PLAIN: u8 = 36;
/// Vertex record with RGBA color, the only size used from version 4 on.
const VERTEX_SIZE_COLORED: u8 = 40;
const FACE_SIZE: u8 = 12;
const LOD_OFFSET_SIZE: u16 = 4;

const BONE_RECORD_BITS: usize = 60 * 8;

const SUBSET_SLOTS: usize = 26;
const UNUSED_SLOT: u16 = 0xffff;
/// Parent id of a root bone, as written by the encoder.
const ROOT_PARENT: u16 = 0;
/// Also read as a root, and written as the lod parent.
const NO_PARENT: u16 = 0xffff;

const FACS_FORMAT_QUANTIZED: u32 = 1;

#[derive(Debug, Clone, Default)]
struct Header {
    vertex_size: u8,
    vertex_count: usize,
    face_count: usize,
    lod_count: usize,
    bone_count: usize,
    bone_names_size: usize,
    subset_count: usize,
    facs_data_type: u32,
    facs_data_size: u32,
}

impl Header {
    fn size(version: Version) -> u16 {
        match version.major {
            2 => 12,
            3 => 16,
            4 => 24,
            _ => 32,
        }
    }

    fn read(buffer: &mut BitBuffer, version: Version) -> Self {
        let _header_size = buffer.read_u16();

        let mut header = Self::default();

        if version >= Version::V4_00 {
            let _lod_type = buffer.read_u16();
            header.vertex_count = buffer.read_u32() as usize;
            header.face_count = buffer.read_u32() as usize;
            header.lod_count = buffer.read_u16().into();
            header.bone_count = buffer.read_u16().into();
            header.bone_names_size = buffer.read_u32() as usize;
            header.subset_count = buffer.read_u16().into();
            let _high_quality_lod_count = buffer.read_u16();

            if version >= Version::V5_00 {
                header.facs_data_type = buffer.read_u32();
                header.facs_data_size = buffer.read_u32();
            }

            header.vertex_size = VERTEX_SIZE_COLORED;
        } else {
            header.vertex_size = buffer.read_u8();
            let _face_size = buffer.read_u8();

            if version >= Version::V3_00 {
                let _lod_offset_size = buffer.read_u16();
                header.lod_count = buffer.read_u16().into();
            }

            header.vertex_count = buffer.read_u32() as usize;
            header.face_count = buffer.read_u32() as usize;
        }

        header
    }

    fn write(&self, buffer: &mut BitBuffer, version: Version) -> Result<()> {
        let u16_field = |value: usize, what| u16::try_from(value).map_err(|_| Error::Overflow(what));
        let u32_field = |value: usize, what| u32::try_from(value).map_err(|_| Error::Overflow(what));

        buffer.write_u16(Self::size(version));

        if version >= Version::V4_00 {
            buffer.write_u16(0);
            buffer.write_u32(u32_field(self.vertex_count, "vertex")?);
            buffer.write_u32(u32_field(self.face_count, "face")?);
            buffer.write_u16(u16_field(self.lod_count, "lod")?);
            buffer.write_u16(u16_field(self.bone_count, "bone")?);
            buffer.write_u32(u32_field(self.bone_names_size, "bone name byte")?);
            buffer.write_u16(u16_field(self.subset_count, "subset")?);
            buffer.write_u16(0);

            if version >= Version::V5_00 {
                buffer.write_u32(self.facs_data_type);
                buffer.write_u32(self.facs_data_size);
            }
        } else {
            buffer.write_u8(self.vertex_size);
            buffer.write_u8(FACE_SIZE);

            if version >= Version::V3_00 {
                buffer.write_u16(LOD_OFFSET_SIZE);
                buffer.write_u16(u16_field(self.lod_count, "lod")?);
            }

            buffer.write_u32(u32_field(self.vertex_count, "vertex")?);
            buffer.write_u32(u32_field(self.face_count, "face")?);
        }

        Ok(())
    }
}

/// Per-vertex bone subset slots and weights, resolved once subsets are read.
#[derive(Debug, Clone, Copy, Default)]
struct Envelope {
    bones: [u8; 4],
    weights: [u8; 4],
}

#[derive(Debug, Clone)]
struct BoneSubset {
    vertices: Range<usize>,
    bones: [u16; SUBSET_SLOTS],
}

fn read_vertex(buffer: &mut BitBuffer, vertex_size: u8) -> Vertex {
    let position = buffer.read_vec3();
    let normal = buffer.read_vec3();
    let uv = buffer.read_vec2();

    let packed_tangent = buffer.read_u32();
    let tangent = (packed_tangent != 0).then(|| Tangent::unpack(packed_tangent));

    let color = if vertex_size > VERTEX_SIZE_PLAIN {
        let r = buffer.read_u8();
        let g = buffer.read_u8();
        let b = buffer.read_u8();
        let a = buffer.read_u8();
        buffer.skip_bytes(usize::from(vertex_size.saturating_sub(VERTEX_SIZE_COLORED)));

        Color {
            tint: RGB8::new(r, g, b),
            alpha: f32::from(a) / 255.0,
        }
    } else {
        Color::WHITE
    };

    Vertex {
        position,
        normal,
        uv,
        tangent,
        color,
        weights: BTreeMap::new(),
    }
}

/// A bone record whose name is still an offset into the name blob.
#[derive(Debug, Clone)]
struct BoneRecord {
    name_index: i32,
    parent_id: u16,
    world_transform: Affine3A,
}

fn read_bone(buffer: &mut BitBuffer) -> BoneRecord {
    let name_index = buffer.read_i32();
    let parent_id = buffer.read_u16();
    let _lod_parent_id = buffer.read_u16();
    let _culling_radius = buffer.read_f32();

    let m1 = buffer.read_vec3();
    let m2 = buffer.read_vec3();
    let m3 = buffer.read_vec3();
    let m0 = buffer.read_vec3();

    BoneRecord {
        name_index,
        parent_id,
        world_transform: Affine3A::from_cols(m1.into(), m2.into(), m3.into(), m0.into()),
    }
}

fn resolve_bone(record: BoneRecord, index: usize, names: &[u8]) -> Bone {
    // parent ids are one-based and bones are stored parents first
    let parent_id = usize::from(record.parent_id);
    let parent = if (1..=index).contains(&parent_id) {
        Some(parent_id - 1)
    } else {
        if record.parent_id != ROOT_PARENT && record.parent_id != NO_PARENT {
            warn!(
                "bone {}: parent {} not read yet, treating as root",
                index, record.parent_id
            );
        }
        None
    };

    let name = match usize::try_from(record.name_index)
        .ok()
        .and_then(|offset| names.get(offset..))
        .and_then(null_terminated_prefix)
    {
        Some(name) => String::from_utf8_lossy(name).into_owned(),
        None => {
            warn!("bone {}: name index {} out of bounds", index, record.name_index);
            String::new()
        }
    };

    Bone {
        name,
        parent,
        world_transform: record.world_transform,
    }
}

fn read_subset(buffer: &mut BitBuffer) -> BoneSubset {
    let _faces_begin = buffer.read_u32();
    let _faces_length = buffer.read_u32();
    let vertices_begin = buffer.read_u32() as usize;
    let vertices_count = buffer.read_u32() as usize;
    let _bone_count = buffer.read_u32();

    let mut bones = [UNUSED_SLOT; SUBSET_SLOTS];
    for slot in &mut bones {
        *slot = buffer.read_u16();
    }

    BoneSubset {
        vertices: vertices_begin..vertices_begin.saturating_add(vertices_count),
        bones,
    }
}

fn apply_subset(
    subset: &BoneSubset,
    envelopes: &[Envelope],
    vertices: &mut [Vertex],
    bones: &[Bone],
) {
    // files without bones carry no envelopes
    let end = subset.vertices.end.min(envelopes.len()).min(vertices.len());

    for i in subset.vertices.start..end {
        let envelope = envelopes[i];

        for (&slot, &weight) in envelope.bones.iter().zip(&envelope.weights) {
            let bone_id = match subset.bones.get(usize::from(slot)) {
                Some(&UNUSED_SLOT) | None => continue,
                Some(&bone_id) => usize::from(bone_id),
            };

            if weight == 0 {
                continue;
            }

            match bones.get(bone_id) {
                Some(bone) => {
                    vertices[i]
                        .weights
                        .insert(bone.name.clone(), f32::from(weight));
                }
                None => warn!(
                    "vertex {}: subset refers to bone {} but only {} exist",
                    i,
                    bone_id,
                    bones.len()
                ),
            }
        }
    }
}

fn group_lods(faces: Vec<Face>, offsets: &[usize]) -> Vec<Vec<Face>> {
    let face_count = faces.len();

    offsets
        .iter()
        .tuple_windows()
        .map(|(&start, &end)| {
            let start = start.min(face_count);
            let end = end.clamp(start, face_count);
            faces[start..end].to_vec()
        })
        .collect()
}

pub(crate) fn decode(buffer: &mut BitBuffer, version: Version) -> Result<Mesh> {
    let header = Header::read(buffer, version);
    debug!(
        "header: {} vertices of {} bytes, {} faces, {} lods, {} bones, {} subsets",
        header.vertex_count,
        header.vertex_size,
        header.face_count,
        header.lod_count,
        header.bone_count,
        header.subset_count
    );

    let vertex_bits = usize::from(header.vertex_size.max(VERTEX_SIZE_PLAIN)) * 8;
    let mut vertices = Vec::with_capacity(capacity_hint(buffer, header.vertex_count, vertex_bits));
    for _ in 0..header.vertex_count {
        vertices.push(read_vertex(buffer, header.vertex_size));
    }

    let mut envelopes = Vec::new();
    if header.bone_count > 0 {
        envelopes.reserve(capacity_hint(buffer, header.vertex_count, 64));
        for _ in 0..header.vertex_count {
            let mut envelope = Envelope::default();
            for bone in &mut envelope.bones {
                *bone = buffer.read_u8();
            }
            for weight in &mut envelope.weights {
                *weight = buffer.read_u8();
            }
            envelopes.push(envelope);
        }
    }

    let mut faces = Vec::with_capacity(capacity_hint(buffer, header.face_count, 96));
    for _ in 0..header.face_count {
        let a = buffer.read_u32() as usize + 1;
        let b = buffer.read_u32() as usize + 1;
        let c = buffer.read_u32() as usize + 1;
        faces.push(Face::new(a, b, c));
    }

    let mut lod_offsets: Vec<usize> = (0..header.lod_count)
        .map(|_| buffer.read_u32() as usize)
        .collect();
    if lod_offsets.len() < 2 || lod_offsets[1] == 0 {
        trace!("no usable lod offsets, using a single lod");
        lod_offsets = vec![0, header.face_count];
    }

    let mut records = Vec::with_capacity(capacity_hint(buffer, header.bone_count, BONE_RECORD_BITS));
    for _ in 0..header.bone_count {
        records.push(read_bone(buffer));
    }

    let bone_names = buffer.read_bytes(header.bone_names_size);
    let bones: Vec<Bone> = records
        .into_iter()
        .enumerate()
        .map(|(i, record)| resolve_bone(record, i, &bone_names))
        .collect();

    for i in 0..header.subset_count {
        let subset = read_subset(buffer);
        trace!("subset {}: vertices {:?}", i, subset.vertices);
        apply_subset(&subset, &envelopes, &mut vertices, &bones);
    }

    let lods = group_lods(faces, &lod_offsets);

    let morphs = if version >= Version::V5_00 && header.facs_data_type == FACS_FORMAT_QUANTIZED {
        Some(facs::read(buffer)?)
    } else {
        None
    };

    Ok(Mesh {
        lods,
        vertices,
        bones: (header.bone_count > 0).then(|| bones),
        morphs,
    })
}

#[derive(Debug, Clone, Default)]
struct SubsetPlan {
    vertices: Range<usize>,
    bones: Vec<u16>,
}

/// Splits vertices into contiguous runs that reference at most
/// `SUBSET_SLOTS` distinct bones, and builds each vertex's envelope.
fn plan_subsets(mesh: &Mesh, bone_count: usize) -> Result<(Vec<SubsetPlan>, Vec<Envelope>)> {
    let mut subsets: Vec<SubsetPlan> = Vec::new();
    let mut envelopes = Vec::with_capacity(mesh.vertices.len());
    let mut current = SubsetPlan::default();

    for (i, vertex) in mesh.vertices.iter().enumerate() {
        if vertex.weights.len() > 4 {
            return Err(Error::TooManyInfluences { vertex: i });
        }

        let mut influences = Vec::with_capacity(4);
        for (name, &weight) in &vertex.weights {
            let bone = mesh
                .bone_index(name)
                .filter(|&bone| bone < bone_count)
                .ok_or_else(|| Error::UnknownBone { name: name.clone() })?;
            let weight = weight.round().clamp(0.0, 255.0) as u8;
            if weight > 0 {
                // bone_count fits in u16, checked by the caller
                influences.push((bone as u16, weight));
            }
        }

        let new_bones = influences
            .iter()
            .filter(|(bone, _)| !current.bones.contains(bone))
            .count();
        if current.bones.len() + new_bones > SUBSET_SLOTS {
            current.vertices.end = i;
            let next = SubsetPlan {
                vertices: i..i,
                bones: Vec::new(),
            };
            subsets.push(std::mem::replace(&mut current, next));
        }

        let mut envelope = Envelope::default();
        for (slot, &(bone, weight)) in influences.iter().enumerate() {
            let index = match current.bones.iter().position(|&b| b == bone) {
                Some(index) => index,
                None => {
                    current.bones.push(bone);
                    current.bones.len() - 1
                }
            };
            envelope.bones[slot] = index as u8;
            envelope.weights[slot] = weight;
        }
        envelopes.push(envelope);
    }

    current.vertices.end = mesh.vertices.len();
    if !current.vertices.is_empty() {
        subsets.push(current);
    }

    Ok((subsets, envelopes))
}

fn culling_radius(mesh: &Mesh, bone: &Bone) -> f32 {
    let origin = Vec3::from(bone.world_transform.translation);
    mesh.vertices
        .iter()
        .filter(|vertex| vertex.weights.contains_key(&bone.name))
        .map(|vertex| vertex.position.distance(origin))
        .fold(0.0, f32::max)
}

fn write_vertex(buffer: &mut BitBuffer, vertex: &Vertex, vertex_size: u8) {
    buffer.write_vec3(vertex.position);
    buffer.write_vec3(vertex.normal);
    buffer.write_vec2(vertex.uv);
    buffer.write_u32(vertex.tangent.map_or(0, |tangent| tangent.pack()));

    if vertex_size > VERTEX_SIZE_PLAIN {
        let tint = vertex.color.tint;
        buffer.write_u8(tint.r);
        buffer.write_u8(tint.g);
        buffer.write_u8(tint.b);
        buffer.write_u8((vertex.color.alpha * 255.0).round().clamp(0.0, 255.0) as u8);
    }
}

fn write_bone(buffer: &mut BitBuffer, mesh: &Mesh, bone: &Bone, name_offset: usize) -> Result<()> {
    let name_offset = i32::try_from(name_offset).map_err(|_| Error::Overflow("bone name byte"))?;
    let parent = match bone.parent {
        Some(parent) => u16::try_from(parent + 1).map_err(|_| Error::Overflow("bone"))?,
        None => ROOT_PARENT,
    };

    buffer.write_i32(name_offset);
    buffer.write_u16(parent);
    buffer.write_u16(NO_PARENT);
    buffer.write_f32(culling_radius(mesh, bone));

    let rotation = bone.world_transform.matrix3;
    buffer.write_vec3(rotation.x_axis.into());
    buffer.write_vec3(rotation.y_axis.into());
    buffer.write_vec3(rotation.z_axis.into());
    buffer.write_vec3(bone.world_transform.translation.into());

    Ok(())
}

pub(crate) fn encode(mesh: &Mesh, version: Version, buffer: &mut BitBuffer) -> Result<()> {
    let bones = mesh.bones.as_deref().unwrap_or_default();

    if version < Version::V4_00 && !bones.is_empty() {
        return Err(Error::Unsupported {
            version,
            feature: "bones",
        });
    }
    if version < Version::V5_00 && mesh.morphs.is_some() {
        return Err(Error::Unsupported {
            version,
            feature: "facs morphs",
        });
    }
    if version < Version::V3_00 && mesh.lods.len() > 1 {
        warn!("version {} has no lod offsets, lods are merged", version);
    } else if mesh.lods.len() > 1 && mesh.lods[0].is_empty() {
        // a zero second offset reads back as a single lod
        warn!("first lod is empty, lods will decode merged");
    }
    if mesh.bones.as_ref().map_or(false, Vec::is_empty) {
        warn!("empty bone list will decode as no bones");
    }
    if bones.len() > usize::from(u16::MAX) {
        return Err(Error::Overflow("bone"));
    }

    let vertex_size = if version >= Version::V4_00
        || mesh.vertices.iter().any(|vertex| !vertex.color.is_white())
    {
        VERTEX_SIZE_COLORED
    } else {
        VERTEX_SIZE_PLAIN
    };

    let (subsets, envelopes) = if bones.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        plan_subsets(mesh, bones.len())?
    };

    let (bone_names, name_offsets) = join_names(bones.iter().map(|bone| bone.name.as_str()));

    let facs = match &mesh.morphs {
        Some(morphs) => {
            let mut facs = BitBuffer::new();
            facs::write(morphs, &mut facs)?;
            Some(facs.to_bytes())
        }
        None => None,
    };

    let mut lod_offsets = vec![0];
    if version >= Version::V3_00 {
        lod_offsets.extend(mesh.lods.iter().scan(0, |end, lod| {
            *end += lod.len();
            Some(*end)
        }));
    }

    let header = Header {
        vertex_size,
        vertex_count: mesh.vertices.len(),
        face_count: mesh.face_count(),
        lod_count: if version >= Version::V3_00 {
            lod_offsets.len()
        } else {
            0
        },
        bone_count: bones.len(),
        bone_names_size: bone_names.len(),
        subset_count: subsets.len(),
        facs_data_type: if facs.is_some() {
            FACS_FORMAT_QUANTIZED
        } else {
            0
        },
        facs_data_size: match &facs {
            Some(facs) => u32::try_from(facs.len()).map_err(|_| Error::Overflow("facs byte"))?,
            None => 0,
        },
    };

    buffer.write_bytes(version.header().as_bytes());
    debug_assert_eq!(buffer.index(), HEADER_LEN * 8);
    header.write(buffer, version)?;

    for vertex in &mesh.vertices {
        write_vertex(buffer, vertex, vertex_size);
    }

    for envelope in &envelopes {
        buffer.write_bytes(&envelope.bones);
        buffer.write_bytes(&envelope.weights);
    }

    for face in mesh.faces() {
        for &index in &face.indices {
            let index = index
                .checked_sub(1)
                .and_then(|index| u32::try_from(index).ok())
                .ok_or(Error::Corrupted {
                    error: "face index out of range",
                })?;
            buffer.write_u32(index);
        }
    }

    if header.lod_count > 0 {
        for &offset in &lod_offsets {
            buffer.write_u32(u32::try_from(offset).map_err(|_| Error::Overflow("face"))?);
        }
    }

    for (bone, &name_offset) in bones.iter().zip(&name_offsets) {
        write_bone(buffer, mesh, bone, name_offset)?;
    }
    buffer.write_bytes(&bone_names);

    let face_count = u32::try_from(header.face_count).map_err(|_| Error::Overflow("face"))?;
    for subset in &subsets {
        buffer.write_u32(0);
        buffer.write_u32(face_count);
        buffer.write_u32(subset.vertices.start as u32);
        buffer.write_u32(subset.vertices.len() as u32);
        buffer.write_u32(subset.bones.len() as u32);
        for slot in 0..SUBSET_SLOTS {
            buffer.write_u16(subset.bones.get(slot).copied().unwrap_or(UNUSED_SLOT));
        }
    }

    if let Some(facs) = &facs {
        buffer.write_bytes(facs);
    }

    Ok(())
}
