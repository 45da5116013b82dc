use std::collections::BTreeMap;

use glam::{Affine3A, Vec2, Vec3};
use rgb::RGB8;

/// A triangle. Indices are one-based into [`Mesh::vertices`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Face {
    pub indices: [usize; 3],
}

impl Face {
    #[must_use]
    pub fn new(a: usize, b: usize, c: usize) -> Self {
        Self { indices: [a, b, c] }
    }

    #[must_use]
    pub fn shifted(self, offset: usize) -> Self {
        Self {
            indices: self.indices.map(|i| i + offset),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tangent {
    pub direction: Vec3,
    /// Handedness of the bitangent, -1 or +1.
    pub sign: f32,
}

impl Tangent {
    /// Unpacks four little-endian bytes, each mapped through
    /// `(byte - 127) / 127`.
    #[must_use]
    pub fn unpack(packed: u32) -> Self {
        let [x, y, z, sign] = packed.to_le_bytes().map(|b| (f32::from(b) - 127.0) / 127.0);
        Self {
            direction: Vec3::new(x, y, z),
            sign,
        }
    }

    #[must_use]
    pub fn pack(&self) -> u32 {
        let quantize = |v: f32| (v * 127.0 + 127.0).round().clamp(0.0, 255.0) as u8;
        u32::from_le_bytes([
            quantize(self.direction.x),
            quantize(self.direction.y),
            quantize(self.direction.z),
            quantize(self.sign),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub tint: RGB8,
    pub alpha: f32,
}

impl Color {
    pub const WHITE: Self = Self {
        tint: RGB8 {
            r: 255,
            g: 255,
            b: 255,
        },
        alpha: 1.0,
    };

    #[must_use]
    pub fn is_white(&self) -> bool {
        self.tint == Self::WHITE.tint && approx::relative_eq!(self.alpha, 1.0)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Option<Tangent>,
    pub color: Color,
    /// Bone name to raw weight byte (1..=255).
    pub weights: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub name: String,
    /// Index of the parent in the same bone list.
    pub parent: Option<usize>,
    pub world_transform: Affine3A,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MorphTarget {
    pub label: String,
    /// Face bone name to local transform delta.
    pub pose: BTreeMap<String, Affine3A>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub lods: Vec<Vec<Face>>,
    pub vertices: Vec<Vertex>,
    pub bones: Option<Vec<Bone>>,
    pub morphs: Option<Vec<MorphTarget>>,
}

impl Mesh {
    /// An empty mesh with a single empty lod.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lods: vec![Vec::new()],
            vertices: Vec::new(),
            bones: None,
            morphs: None,
        }
    }

    #[must_use]
    pub fn face_count(&self) -> usize {
        self.lods.iter().map(Vec::len).sum()
    }

    /// All faces of all lods, in order.
    pub fn faces(&self) -> impl Iterator<Item = &Face> + '_ {
        self.lods.iter().flatten()
    }

    #[must_use]
    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones
            .as_ref()?
            .iter()
            .position(|bone| bone.name == name)
    }

    /// Scales every vertex position by `scale`, then applies the rigid
    /// `transform`. Normals and tangents are only rotated.
    pub fn transform(&mut self, transform: &Affine3A, scale: Option<Vec3>) {
        let scale = scale.unwrap_or(Vec3::ONE);

        for vertex in &mut self.vertices {
            vertex.position = transform.transform_point3(vertex.position * scale);
            vertex.normal = transform.transform_vector3(vertex.normal);
            if let Some(tangent) = &mut vertex.tangent {
                tangent.direction = transform.transform_vector3(tangent.direction);
            }
        }
    }

    /// Appends the vertices and faces of `other`. Faces of each lod of
    /// `other` are appended to the lod with the same index.
    ///
    /// Bones are not merged, so weights of appended vertices may name bones
    /// this mesh doesn't have.
    pub fn append(&mut self, other: &Mesh) {
        let offset = self.vertices.len();
        self.vertices.extend(other.vertices.iter().cloned());

        for (i, lod) in other.lods.iter().enumerate() {
            if i >= self.lods.len() {
                self.lods.push(Vec::new());
            }
            self.lods[i].extend(lod.iter().map(|face| face.shifted(offset)));
        }
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use approx::assert_relative_eq;
    use glam::Quat;

    use super::*;

    fn vertex(x: f32, y: f32, z: f32) -> Vertex {
        Vertex {
            position: Vec3::new(x, y, z),
            normal: Vec3::X,
            ..Vertex::default()
        }
    }

    fn triangle(count: usize) -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices = (0..count).map(|i| vertex(i as f32, 0.0, 0.0)).collect();
        mesh.lods[0].push(Face::new(1, 2, count));
        mesh
    }

    #[test]
    fn new_mesh_has_one_empty_lod() {
        let mesh = Mesh::new();
        assert_eq!(mesh.lods, vec![Vec::<Face>::new()]);
        assert!(mesh.vertices.is_empty());
        assert_eq!(mesh.face_count(), 0);
    }

    #[test]
    fn append_shifts_faces() {
        let mut mesh = triangle(3);
        let other = triangle(2);

        mesh.append(&other);

        assert_eq!(mesh.vertices.len(), 5);
        assert_eq!(mesh.lods.len(), 1);
        assert_eq!(mesh.lods[0], vec![Face::new(1, 2, 3), Face::new(4, 5, 5)]);
    }

    #[test]
    fn append_creates_missing_lods() {
        let mut mesh = triangle(3);
        let mut other = triangle(3);
        other.lods.push(vec![Face::new(1, 1, 1)]);

        mesh.append(&other);

        assert_eq!(mesh.lods.len(), 2);
        assert_eq!(mesh.lods[1], vec![Face::new(4, 4, 4)]);
    }

    #[test]
    fn clone_is_deep() {
        let mut mesh = triangle(3);
        mesh.bones = Some(vec![
            Bone {
                name: "Root".to_owned(),
                parent: None,
                world_transform: Affine3A::IDENTITY,
            },
            Bone {
                name: "Head".to_owned(),
                parent: Some(0),
                world_transform: Affine3A::from_translation(Vec3::Y),
            },
        ]);

        let mut copy = mesh.clone();
        copy.vertices[0].position = Vec3::splat(9.0);
        copy.vertices[0].weights.insert("Head".to_owned(), 255.0);

        assert_eq!(mesh.vertices[0].position, Vec3::ZERO);
        assert!(mesh.vertices[0].weights.is_empty());
        assert_eq!(copy.bones.as_ref().unwrap()[1].parent, Some(0));
        assert_eq!(copy.bone_index("Head"), Some(1));
    }

    #[test]
    fn transform_scales_positions_but_only_rotates_normals() {
        let mut mesh = triangle(3);
        mesh.vertices[1].tangent = Some(Tangent {
            direction: Vec3::Y,
            sign: 1.0,
        });

        let transform =
            Affine3A::from_rotation_translation(Quat::from_rotation_z(FRAC_PI_2), Vec3::Z);
        mesh.transform(&transform, Some(Vec3::new(2.0, 1.0, 1.0)));

        assert_relative_eq!(mesh.vertices[1].position, Vec3::new(0.0, 2.0, 1.0), epsilon = 1e-6);
        assert_relative_eq!(mesh.vertices[1].normal, Vec3::Y, epsilon = 1e-6);
        assert_relative_eq!(
            mesh.vertices[1].tangent.unwrap().direction,
            -Vec3::X,
            epsilon = 1e-6
        );
    }

    #[test]
    fn tangent_packing() {
        let tangent = Tangent::unpack(u32::from_le_bytes([254, 127, 0, 254]));
        assert_relative_eq!(tangent.direction, Vec3::new(1.0, 0.0, -1.0));
        assert_relative_eq!(tangent.sign, 1.0);
        assert_eq!(tangent.pack(), u32::from_le_bytes([254, 127, 0, 254]));
    }

    #[test]
    fn default_color_is_opaque_white() {
        assert!(Color::default().is_white());
        assert!(!Color {
            tint: RGB8::new(255, 0, 0),
            alpha: 1.0
        }
        .is_white());
    }
}
