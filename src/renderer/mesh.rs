//! Mesh geometry and node hierarchy
//!
//! A [`MeshData`] is CPU-side geometry from a file or a generator. Uploading it
//! gives a [`Mesh`]: GPU buffers per sub-mesh plus the node tree that places
//! them. Node 0 is the root and every other node's parent comes before it.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use smallvec::SmallVec;

use super::backend::{GeometryHandle, RenderBackend, RenderError};
use super::commands::{CommandList, RenderCommand};
use super::constants::ModelConstants;

/// Vertex with position, normal, and UV coordinates
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }

    /// Get the vertex buffer layout for wgpu
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
            wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }
}

/// Errors from loading or uploading a mesh
#[derive(Debug)]
pub enum MeshError {
    Io(std::io::Error),
    /// Not in any media folder
    NotFound(String),
    Import(String),
    UnsupportedFormat(String),
    /// A node's parent is not an earlier node
    InvalidHierarchy { node: usize, parent: usize },
    /// Nothing to draw
    Empty(String),
    /// A triangle names a vertex the sub-mesh does not have
    IndexOutOfRange {
        sub_mesh: usize,
        index: u32,
        vertex_count: usize,
    },
    /// Vertex attribute streams of different lengths
    AttributeMismatch {
        positions: usize,
        normals: usize,
        uvs: usize,
    },
    Upload(RenderError),
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::NotFound(name) => write!(f, "Mesh not found: {name}"),
            Self::Import(e) => write!(f, "Import error: {e}"),
            Self::UnsupportedFormat(name) => write!(f, "Unsupported mesh format: {name}"),
            Self::InvalidHierarchy { node, parent } => {
                write!(f, "Node {node} has parent {parent}, which is not an earlier node")
            }
            Self::Empty(name) => write!(f, "Mesh '{name}' has no geometry"),
            Self::IndexOutOfRange {
                sub_mesh,
                index,
                vertex_count,
            } => write!(
                f,
                "Sub-mesh {sub_mesh} index {index} is past its {vertex_count} vertices"
            ),
            Self::AttributeMismatch {
                positions,
                normals,
                uvs,
            } => write!(
                f,
                "Attribute counts differ: {positions} positions, {normals} normals, {uvs} uvs"
            ),
            Self::Upload(e) => write!(f, "Upload failed: {e}"),
        }
    }
}

impl std::error::Error for MeshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Upload(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MeshError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<RenderError> for MeshError {
    fn from(e: RenderError) -> Self {
        Self::Upload(e)
    }
}

/// One node of the mesh hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct MeshNode {
    pub name: String,
    /// Transform relative to the parent node
    pub default_matrix: Mat4,
    /// Index of the parent, 0 for the root itself
    pub parent: usize,
    pub children: SmallVec<[usize; 4]>,
    /// Indices into the mesh's sub-meshes drawn at this node
    pub sub_meshes: SmallVec<[usize; 2]>,
}

impl MeshNode {
    #[must_use]
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_matrix: Mat4::IDENTITY,
            parent: 0,
            children: SmallVec::new(),
            sub_meshes: SmallVec::new(),
        }
    }
}

/// Geometry for one sub-mesh before upload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubMeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    /// Base colour texture file named by the source asset
    pub diffuse_texture: Option<String>,
}

/// CPU-side mesh: sub-mesh geometry and node tree
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub name: String,
    pub sub_meshes: Vec<SubMeshData>,
    pub nodes: Vec<MeshNode>,
}

impl MeshData {
    /// Single-node mesh drawing one sub-mesh
    #[must_use]
    pub fn single(name: impl Into<String>, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let mut root = MeshNode::root("root");
        root.sub_meshes.push(0);
        Self {
            name: name.into(),
            sub_meshes: vec![SubMeshData {
                vertices,
                indices,
                diffuse_texture: None,
            }],
            nodes: vec![root],
        }
    }

    /// Check the node tree: node 0 is the root, parents precede children and
    /// every referenced sub-mesh exists.
    pub fn validate(&self) -> Result<(), MeshError> {
        if self.nodes.is_empty() || self.sub_meshes.is_empty() {
            return Err(MeshError::Empty(self.name.clone()));
        }
        for (index, node) in self.nodes.iter().enumerate().skip(1) {
            if node.parent >= index {
                return Err(MeshError::InvalidHierarchy {
                    node: index,
                    parent: node.parent,
                });
            }
        }
        let sub_mesh_count = self.sub_meshes.len();
        if let Some(bad) = self
            .nodes
            .iter()
            .flat_map(|node| node.sub_meshes.iter())
            .find(|&&sub_mesh| sub_mesh >= sub_mesh_count)
        {
            return Err(MeshError::Import(format!(
                "node references missing sub-mesh {bad}"
            )));
        }

        for (sub_mesh, data) in self.sub_meshes.iter().enumerate() {
            let vertex_count = data.vertices.len();
            if let Some(&index) = data.indices.iter().find(|&&i| i as usize >= vertex_count) {
                return Err(MeshError::IndexOutOfRange {
                    sub_mesh,
                    index,
                    vertex_count,
                });
            }
        }
        Ok(())
    }

    /// Unit cube centred on the origin
    #[must_use]
    pub fn cube() -> Self {
        let faces: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, right, up) in faces {
            let base = vertices.len() as u32;
            let centre = normal * 0.5;
            for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
                let position = centre + right * (u - 0.5) + up * (v - 0.5);
                vertices.push(Vertex::new(position.into(), normal.into(), [u, 1.0 - v]));
            }
            push_quad(&mut indices, base, normal, &vertices);
        }

        Self::single("primitive:cube", vertices, indices)
    }

    /// Square on the XZ plane facing +Y
    #[must_use]
    pub fn plane(size: f32) -> Self {
        let half = size / 2.0;
        let vertices = vec![
            Vertex::new([-half, 0.0, half], [0.0, 1.0, 0.0], [0.0, 0.0]),
            Vertex::new([half, 0.0, half], [0.0, 1.0, 0.0], [1.0, 0.0]),
            Vertex::new([half, 0.0, -half], [0.0, 1.0, 0.0], [1.0, 1.0]),
            Vertex::new([-half, 0.0, -half], [0.0, 1.0, 0.0], [0.0, 1.0]),
        ];
        let mut indices = Vec::with_capacity(6);
        push_quad(&mut indices, 0, Vec3::Y, &vertices);

        Self::single("primitive:plane", vertices, indices)
    }

    /// UV sphere
    #[must_use]
    pub fn sphere(radius: f32, segments: u32, rings: u32) -> Self {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();

        for ring in 0..=rings {
            let phi = std::f32::consts::PI * ring as f32 / rings as f32;
            let y = radius * phi.cos();
            let ring_radius = radius * phi.sin();

            for segment in 0..=segments {
                let theta = 2.0 * std::f32::consts::PI * segment as f32 / segments as f32;
                let position = Vec3::new(ring_radius * theta.cos(), y, ring_radius * theta.sin());

                vertices.push(Vertex::new(
                    position.into(),
                    position.normalize_or_zero().into(),
                    [segment as f32 / segments as f32, ring as f32 / rings as f32],
                ));
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;

                indices.extend_from_slice(&[current, current + 1, next]);
                indices.extend_from_slice(&[current + 1, next + 1, next]);
            }
        }

        Self::single("primitive:sphere", vertices, indices)
    }

    /// Procedural mesh for a `primitive:<shape>` name
    #[must_use]
    pub fn primitive(name: &str) -> Option<Self> {
        let shape = name.strip_prefix("primitive:")?;
        let mut data = match shape {
            "cube" => Self::cube(),
            "plane" => Self::plane(200.0),
            "sphere" => Self::sphere(1.0, 24, 16),
            _ => return None,
        };
        data.name = name.to_string();
        Some(data)
    }
}

/// Two triangles for a quad, wound clockwise when seen from the side `normal` points to
fn push_quad(indices: &mut Vec<u32>, base: u32, normal: Vec3, vertices: &[Vertex]) {
    let corner = |i: u32| Vec3::from(vertices[(base + i) as usize].position);
    let winding = (corner(1) - corner(0)).cross(corner(2) - corner(0));
    if winding.dot(normal) >= 0.0 {
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    } else {
        indices.extend_from_slice(&[base, base + 2, base + 1, base + 2, base, base + 3]);
    }
}

/// Uploaded sub-mesh
#[derive(Debug, Clone, PartialEq)]
pub struct SubMesh {
    pub geometry: GeometryHandle,
    pub index_count: u32,
    pub diffuse_texture: Option<String>,
}

/// GPU-resident mesh shared by every model created from it
#[derive(Debug)]
pub struct Mesh {
    name: String,
    sub_meshes: Vec<SubMesh>,
    nodes: Vec<MeshNode>,
    /// Object-space bounds, used for the CPU depth rasteriser and culling
    bounds: (Vec3, Vec3),
}

impl Mesh {
    /// Validate and upload every sub-mesh
    pub fn upload(data: MeshData, backend: &mut dyn RenderBackend) -> Result<Self, MeshError> {
        data.validate()?;

        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        let mut sub_meshes = Vec::with_capacity(data.sub_meshes.len());
        for (index, sub_mesh) in data.sub_meshes.iter().enumerate() {
            for vertex in &sub_mesh.vertices {
                let p = Vec3::from(vertex.position);
                min = min.min(p);
                max = max.max(p);
            }
            let label = format!("{}#{}", data.name, index);
            let geometry = backend.upload_geometry(&label, &sub_mesh.vertices, &sub_mesh.indices)?;
            sub_meshes.push(SubMesh {
                geometry,
                index_count: sub_mesh.indices.len() as u32,
                diffuse_texture: sub_mesh.diffuse_texture.clone(),
            });
        }

        log::debug!(
            "Uploaded mesh '{}' ({} sub-meshes, {} nodes)",
            data.name,
            sub_meshes.len(),
            data.nodes.len()
        );

        Ok(Self {
            name: data.name,
            sub_meshes,
            nodes: data.nodes,
            bounds: (min, max),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn nodes(&self) -> &[MeshNode] {
        &self.nodes
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn sub_meshes(&self) -> &[SubMesh] {
        &self.sub_meshes
    }

    #[must_use]
    pub fn bounds(&self) -> (Vec3, Vec3) {
        self.bounds
    }

    /// Initial per-node matrices for a new model
    #[must_use]
    pub fn default_matrices(&self) -> Vec<Mat4> {
        self.nodes.iter().map(|node| node.default_matrix).collect()
    }

    /// First diffuse texture named by any sub-mesh
    #[must_use]
    pub fn default_diffuse_texture(&self) -> Option<&str> {
        self.sub_meshes
            .iter()
            .find_map(|sub_mesh| sub_mesh.diffuse_texture.as_deref())
    }

    /// Record draws for every node.
    ///
    /// `matrices[0]` is the model's world matrix and replaces the root
    /// transform. Every other entry is that node's matrix relative to its parent.
    /// Each draw uploads `base` placed at its node's world matrix.
    pub fn render(&self, matrices: &[Mat4], base: &ModelConstants, commands: &mut CommandList) {
        let mut absolute: SmallVec<[Mat4; 8]> = SmallVec::with_capacity(self.nodes.len());

        for (index, node) in self.nodes.iter().enumerate() {
            let local = matrices.get(index).copied().unwrap_or(node.default_matrix);
            let world = if index == 0 {
                local
            } else {
                absolute[node.parent] * local
            };
            absolute.push(world);

            for &sub_mesh in &node.sub_meshes {
                commands.push(RenderCommand::UploadModelConstants(Box::new(base.at(world))));
                commands.push(RenderCommand::Draw {
                    geometry: self.sub_meshes[sub_mesh].geometry,
                });
            }
        }
    }

    /// Give the GPU buffers back to the backend
    pub fn release(&self, backend: &mut dyn RenderBackend) {
        for sub_mesh in &self.sub_meshes {
            backend.release_geometry(sub_mesh.geometry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::headless::HeadlessBackend;

    fn assert_outward_winding(data: &MeshData) {
        let sub_mesh = &data.sub_meshes[0];
        for triangle in sub_mesh.indices.chunks(3) {
            let p = |i: usize| Vec3::from(sub_mesh.vertices[triangle[i] as usize].position);
            let n = Vec3::from(sub_mesh.vertices[triangle[0] as usize].normal);
            let face = (p(1) - p(0)).cross(p(2) - p(0));
            if face.length_squared() > 1e-12 {
                assert!(face.dot(n) > 0.0, "triangle {triangle:?} is wound inwards");
            }
        }
    }

    #[test]
    fn test_primitives_wind_outwards() {
        assert_outward_winding(&MeshData::cube());
        assert_outward_winding(&MeshData::plane(10.0));
        assert_outward_winding(&MeshData::sphere(1.0, 12, 8));
    }

    #[test]
    fn test_primitive_names() {
        assert_eq!(MeshData::primitive("primitive:cube").unwrap().name, "primitive:cube");
        assert!(MeshData::primitive("primitive:teapot").is_none());
        assert!(MeshData::primitive("cube.gltf").is_none());
    }

    #[test]
    fn test_parent_must_precede_child() {
        let mut data = MeshData::cube();
        let mut child = MeshNode::root("child");
        child.parent = 1;
        data.nodes.push(child);

        assert!(matches!(
            data.validate(),
            Err(MeshError::InvalidHierarchy { node: 1, parent: 1 })
        ));
    }

    #[test]
    fn test_index_past_vertex_count_is_rejected() {
        let vertices = vec![
            Vertex::new([0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
            Vertex::new([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0]),
            Vertex::new([0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 1.0]),
        ];
        let data = MeshData::single("broken", vertices, vec![0, 1, 7]);

        assert!(matches!(
            data.validate(),
            Err(MeshError::IndexOutOfRange {
                sub_mesh: 0,
                index: 7,
                vertex_count: 3
            })
        ));

        // Nothing reaches the backend
        let mut backend = HeadlessBackend::new(64, 64);
        assert!(Mesh::upload(data, &mut backend).is_err());
        assert_eq!(backend.geometry_count(), 0);
    }

    #[test]
    fn test_render_composes_node_matrices() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut data = MeshData::cube();
        let mut arm = MeshNode::root("arm");
        arm.parent = 0;
        arm.default_matrix = Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0));
        arm.sub_meshes.push(0);
        data.nodes[0].children.push(1);
        data.nodes.push(arm);

        let mesh = Mesh::upload(data, &mut backend).unwrap();
        let mut matrices = mesh.default_matrices();
        matrices[0] = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));

        let mut commands = CommandList::new();
        mesh.render(&matrices, &ModelConstants::default(), &mut commands);

        let worlds: Vec<Vec3> = commands
            .iter()
            .filter_map(|c| match c {
                RenderCommand::UploadModelConstants(m) => Some(m.world().w_axis.truncate()),
                _ => None,
            })
            .collect();
        assert_eq!(worlds, vec![Vec3::new(10.0, 0.0, 0.0), Vec3::new(10.0, 2.0, 0.0)]);
        assert_eq!(commands.draw_count(), 2);
    }
}
