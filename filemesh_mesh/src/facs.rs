//! Facial animation data: per face bone pose transforms stored as six
//! quantized matrices (position xyz, rotation xyz in degrees) with one row per
//! face bone and one column per pose.

use std::collections::HashMap;

use filemesh_bits::BitBuffer;
use glam::{Affine3A, EulerRot, Quat, Vec3};
use itertools::Itertools;
use tracing::{debug, warn};

use crate::binary_utils::{join_names, split_names, ReadExt, WriteExt};
use crate::mesh::MorphTarget;

use super::{Error, Result};

const FORMAT_RAW: u16 = 1;
const FORMAT_QUANTIZED: u16 = 2;

/// Largest `max - min` a 16-bit code can span.
const MAX_RANGE: f32 = 65535.0;
/// Ranges at or below this decode every code to `min`.
const FLAT_RANGE: f32 = 1e-4;

const CORRECTIVE_SEPARATOR: &str = " + ";

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct QuantizedMatrix {
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

impl QuantizedMatrix {
    fn read(buffer: &mut BitBuffer) -> Result<Self> {
        let format = buffer.read_u16();
        let rows = buffer.read_u32() as usize;
        let cols = buffer.read_u32() as usize;
        let count = rows.saturating_mul(cols);

        let values = match format {
            FORMAT_RAW => (0..count).map(|_| buffer.read_f32()).collect(),
            FORMAT_QUANTIZED => {
                let min = buffer.read_f32();
                let max = buffer.read_f32();
                let range = max - min;

                if range.abs() > MAX_RANGE {
                    return Err(Error::QuantizationRangeOverflow { range });
                }

                let precision = if range.abs() <= FLAT_RANGE {
                    0.0
                } else {
                    range / MAX_RANGE
                };

                (0..count)
                    .map(|_| min + f32::from(buffer.read_u16()) * precision)
                    .collect()
            }
            _ => {
                warn!(
                    "unknown quantized matrix format {}, skipping {}x{} cells of 4 bytes and reading as zeros",
                    format, rows, cols
                );
                let payload_bits = count.saturating_mul(32).min(buffer.remaining());
                buffer.read_pad(payload_bits);
                Vec::new()
            }
        };

        Ok(Self { rows, cols, values })
    }

    fn write(&self, buffer: &mut BitBuffer) {
        buffer.write_u16(FORMAT_RAW);
        buffer.write_u32(self.rows as u32);
        buffer.write_u32(self.cols as u32);
        for &value in &self.values {
            buffer.write_f32(value);
        }
    }

    /// Value at `row`, `col`; zero outside the stored values.
    fn get(&self, row: usize, col: usize) -> f32 {
        if row >= self.rows || col >= self.cols {
            return 0.0;
        }
        self.values.get(row * self.cols + col).copied().unwrap_or(0.0)
    }
}

/// Builds a pose transform from a position and euler rotation in degrees.
/// The rotation is applied after the translation.
fn pose_transform(position: Vec3, rotation_degrees: Vec3) -> Affine3A {
    let rotation = Quat::from_euler(
        EulerRot::XYZ,
        rotation_degrees.x.to_radians(),
        rotation_degrees.y.to_radians(),
        rotation_degrees.z.to_radians(),
    );
    Affine3A::from_quat(rotation) * Affine3A::from_translation(position)
}

/// Inverse of [`pose_transform`].
fn pose_components(transform: &Affine3A) -> (Vec3, Vec3) {
    let (_, rotation, translation) = transform.to_scale_rotation_translation();
    let position = rotation.inverse() * translation;
    let (x, y, z) = rotation.to_euler(EulerRot::XYZ);
    (
        position,
        Vec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees()),
    )
}

fn corrective_name(controls: &[String], indices: &[u16]) -> String {
    indices
        .iter()
        .map(|&i| match controls.get(usize::from(i)) {
            Some(name) => name.as_str(),
            None => {
                warn!("corrective refers to control {} but only {} exist", i, controls.len());
                ""
            }
        })
        .join(CORRECTIVE_SEPARATOR)
}

pub(crate) fn read(buffer: &mut BitBuffer) -> Result<Vec<MorphTarget>> {
    let face_bone_names_size = buffer.read_u32() as usize;
    let face_control_names_size = buffer.read_u32() as usize;
    let _quantized_transforms_size = buffer.read_u32();
    let _unknown = buffer.read_u32();
    let two_pose_count = buffer.read_u32() as usize / 4;
    let three_pose_count = buffer.read_u32() as usize / 6;

    let face_bones = split_names(&buffer.read_bytes(face_bone_names_size));
    let controls = split_names(&buffer.read_bytes(face_control_names_size));

    let pos_x = QuantizedMatrix::read(buffer)?;
    let pos_y = QuantizedMatrix::read(buffer)?;
    let pos_z = QuantizedMatrix::read(buffer)?;
    let rot_x = QuantizedMatrix::read(buffer)?;
    let rot_y = QuantizedMatrix::read(buffer)?;
    let rot_z = QuantizedMatrix::read(buffer)?;

    let mut poses = controls.clone();
    for _ in 0..two_pose_count {
        let indices = [buffer.read_u16(), buffer.read_u16()];
        poses.push(corrective_name(&controls, &indices));
    }
    for _ in 0..three_pose_count {
        let indices = [buffer.read_u16(), buffer.read_u16(), buffer.read_u16()];
        poses.push(corrective_name(&controls, &indices));
    }

    debug!(
        "facs: {} face bones, {} controls, {} two pose and {} three pose correctives",
        face_bones.len(),
        controls.len(),
        two_pose_count,
        three_pose_count
    );

    Ok(poses
        .into_iter()
        .enumerate()
        .map(|(col, label)| {
            let pose = face_bones
                .iter()
                .enumerate()
                .map(|(row, bone)| {
                    let position = Vec3::new(
                        pos_x.get(row, col),
                        pos_y.get(row, col),
                        pos_z.get(row, col),
                    );
                    let rotation = Vec3::new(
                        rot_x.get(row, col),
                        rot_y.get(row, col),
                        rot_z.get(row, col),
                    );
                    (bone.clone(), pose_transform(position, rotation))
                })
                .collect();

            MorphTarget { label, pose }
        })
        .collect())
}

/// Pose columns in stored order: plain controls, then two and three pose
/// correctives over those controls.
struct PoseLayout<'a> {
    controls: Vec<&'a MorphTarget>,
    two_pose: Vec<(&'a MorphTarget, Vec<u16>)>,
    three_pose: Vec<(&'a MorphTarget, Vec<u16>)>,
}

impl<'a> PoseLayout<'a> {
    fn new(morphs: &'a [MorphTarget]) -> Result<Self> {
        let controls: Vec<&MorphTarget> = morphs
            .iter()
            .filter(|morph| !morph.label.contains(CORRECTIVE_SEPARATOR))
            .collect();

        let mut control_indices = HashMap::new();
        for (i, control) in controls.iter().enumerate() {
            let index = u16::try_from(i).map_err(|_| Error::Overflow("face control"))?;
            control_indices.entry(control.label.as_str()).or_insert(index);
        }

        let mut layout = Self {
            controls,
            two_pose: Vec::new(),
            three_pose: Vec::new(),
        };

        for morph in morphs
            .iter()
            .filter(|morph| morph.label.contains(CORRECTIVE_SEPARATOR))
        {
            let indices: Option<Vec<u16>> = morph
                .label
                .split(CORRECTIVE_SEPARATOR)
                .map(|part| control_indices.get(part).copied())
                .collect();

            match indices {
                Some(indices) if indices.len() == 2 => layout.two_pose.push((morph, indices)),
                Some(indices) if indices.len() == 3 => layout.three_pose.push((morph, indices)),
                _ => {
                    warn!(
                        "pose `{}` is not a corrective over known controls, storing it as a control",
                        morph.label
                    );
                    layout.controls.push(morph);
                }
            }
        }

        Ok(layout)
    }

    fn columns(&self) -> impl Iterator<Item = &'a MorphTarget> + '_ {
        self.controls.iter().copied().chain(
            self.two_pose
                .iter()
                .chain(&self.three_pose)
                .map(|(morph, _)| *morph),
        )
    }
}

pub(crate) fn write(morphs: &[MorphTarget], buffer: &mut BitBuffer) -> Result<()> {
    let layout = PoseLayout::new(morphs)?;

    let face_bones: Vec<&str> = morphs
        .iter()
        .flat_map(|morph| morph.pose.keys().map(String::as_str))
        .unique()
        .collect();

    let columns: Vec<&MorphTarget> = layout.columns().collect();

    let mut matrices = vec![
        QuantizedMatrix {
            rows: face_bones.len(),
            cols: columns.len(),
            values: Vec::with_capacity(face_bones.len() * columns.len()),
        };
        6
    ];

    for bone in &face_bones {
        for morph in &columns {
            let (position, rotation) = morph
                .pose
                .get(*bone)
                .map_or((Vec3::ZERO, Vec3::ZERO), pose_components);

            let components = [
                position.x, position.y, position.z, rotation.x, rotation.y, rotation.z,
            ];
            for (matrix, value) in matrices.iter_mut().zip(components) {
                matrix.values.push(value);
            }
        }
    }

    let mut quantized = BitBuffer::new();
    for matrix in &matrices {
        matrix.write(&mut quantized);
    }
    let quantized = quantized.to_bytes();

    let (face_bone_names, _) = join_names(face_bones.iter().copied());
    let (control_names, _) = join_names(layout.controls.iter().map(|m| m.label.as_str()));

    let size = |len: usize| u32::try_from(len).map_err(|_| Error::Overflow("facs byte"));

    buffer.write_u32(size(face_bone_names.len())?);
    buffer.write_u32(size(control_names.len())?);
    buffer.write_u32(size(quantized.len())?);
    buffer.write_u32(0);
    buffer.write_u32(size(layout.two_pose.len() * 4)?);
    buffer.write_u32(size(layout.three_pose.len() * 6)?);

    buffer.write_bytes(&face_bone_names);
    buffer.write_bytes(&control_names);
    buffer.write_bytes(&quantized);

    for (_, indices) in layout.two_pose.iter().chain(&layout.three_pose) {
        for &index in indices {
            buffer.write_u16(index);
        }
    }

    Ok(())
}
