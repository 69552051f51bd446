//! glTF mesh import
//!
//! glTF is right-handed with counter-clockwise front faces. Positions, normals
//! and node transforms are mirrored along Z into the engine's left-handed space
//! and each triangle's winding is reversed so front faces stay clockwise.

use std::path::Path;

use glam::{Mat4, Vec3};

use super::mesh::{MeshData, MeshError, MeshNode, SubMeshData, Vertex};

impl From<gltf::Error> for MeshError {
    fn from(e: gltf::Error) -> Self {
        match e {
            gltf::Error::Io(e) => Self::Io(e),
            other => Self::Import(other.to_string()),
        }
    }
}

/// Load a `.gltf` or `.glb` file into a single mesh with its node hierarchy
pub fn load_gltf(path: impl AsRef<Path>) -> Result<MeshData, MeshError> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let (document, buffers, _images) = gltf::import(path)?;

    let mut data = MeshData {
        name: name.clone(),
        sub_meshes: Vec::new(),
        nodes: vec![MeshNode::root("root")],
    };

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| MeshError::Empty(name.clone()))?;

    for node in scene.nodes() {
        append_node(&node, 0, &buffers, &mut data)?;
    }

    if data.sub_meshes.is_empty() {
        return Err(MeshError::Empty(name));
    }

    log::info!(
        "Imported '{}': {} nodes, {} sub-meshes",
        data.name,
        data.nodes.len(),
        data.sub_meshes.len()
    );
    Ok(data)
}

/// Mirror a right-handed transform into left-handed space
fn mirror_z(matrix: Mat4) -> Mat4 {
    let flip = Mat4::from_scale(Vec3::new(1.0, 1.0, -1.0));
    flip * matrix * flip
}

/// Append `node` and its subtree in pre-order so parents precede children
fn append_node(
    node: &gltf::Node,
    parent: usize,
    buffers: &[gltf::buffer::Data],
    data: &mut MeshData,
) -> Result<(), MeshError> {
    let index = data.nodes.len();
    let mut mesh_node = MeshNode::root(node.name().unwrap_or("node"));
    mesh_node.parent = parent;
    mesh_node.default_matrix = mirror_z(Mat4::from_cols_array_2d(&node.transform().matrix()));

    if let Some(mesh) = node.mesh() {
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                log::warn!(
                    "Skipping non-triangle primitive in '{}'",
                    mesh.name().unwrap_or("mesh")
                );
                continue;
            }
            mesh_node.sub_meshes.push(data.sub_meshes.len());
            data.sub_meshes.push(read_primitive(&primitive, buffers)?);
        }
    }

    data.nodes.push(mesh_node);
    data.nodes[parent].children.push(index);

    for child in node.children() {
        append_node(&child, index, buffers, data)?;
    }
    Ok(())
}

fn read_primitive(
    primitive: &gltf::Primitive,
    buffers: &[gltf::buffer::Data],
) -> Result<SubMeshData, MeshError> {
    let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .ok_or_else(|| MeshError::Import("primitive has no positions".into()))?
        .collect();
    let normals: Vec<[f32; 3]> = reader
        .read_normals()
        .map(Iterator::collect)
        .unwrap_or_else(|| vec![[0.0, 1.0, 0.0]; positions.len()]);
    let uvs: Vec<[f32; 2]> = reader
        .read_tex_coords(0)
        .map(|coords| coords.into_f32().collect())
        .unwrap_or_else(|| vec![[0.0, 0.0]; positions.len()]);

    let vertices = mirrored_vertices(&positions, &normals, &uvs)?;

    let mut indices: Vec<u32> = reader
        .read_indices()
        .map(|indices| indices.into_u32().collect())
        .unwrap_or_else(|| (0..vertices.len() as u32).collect());
    for triangle in indices.chunks_exact_mut(3) {
        triangle.swap(1, 2);
    }

    let diffuse_texture = primitive
        .material()
        .pbr_metallic_roughness()
        .base_color_texture()
        .and_then(|info| match info.texture().source().source() {
            gltf::image::Source::Uri { uri, .. } => Some(uri.to_string()),
            gltf::image::Source::View { .. } => None,
        });

    Ok(SubMeshData {
        vertices,
        indices,
        diffuse_texture,
    })
}

/// Interleave attribute streams into mirrored vertices
fn mirrored_vertices(
    positions: &[[f32; 3]],
    normals: &[[f32; 3]],
    uvs: &[[f32; 2]],
) -> Result<Vec<Vertex>, MeshError> {
    if normals.len() != positions.len() || uvs.len() != positions.len() {
        return Err(MeshError::AttributeMismatch {
            positions: positions.len(),
            normals: normals.len(),
            uvs: uvs.len(),
        });
    }

    Ok(positions
        .iter()
        .zip(normals)
        .zip(uvs)
        .map(|((p, n), uv)| Vertex::new([p[0], p[1], -p[2]], [n[0], n[1], -n[2]], *uv))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_keeps_translation_xy() {
        let rh = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let lh = mirror_z(rh);
        assert_eq!(lh.w_axis.truncate(), Vec3::new(1.0, 2.0, -3.0));
    }

    #[test]
    fn test_mirror_rotation_direction() {
        // A right-handed +90 degree turn about Y maps +Z to +X. In mirrored
        // space the same turn maps -Z to +X.
        let rh = Mat4::from_rotation_y(std::f32::consts::FRAC_PI_2);
        let lh = mirror_z(rh);
        let mapped = lh.transform_vector3(Vec3::NEG_Z);
        assert!((mapped - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_gltf("does/not/exist.gltf").unwrap_err();
        assert!(matches!(err, MeshError::Io(_)), "{err}");
    }

    #[test]
    fn test_short_normal_stream_is_rejected() {
        let positions: [[f32; 3]; 3] = [[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let normals: [[f32; 3]; 2] = [[0.0, 1.0, 0.0], [0.0, 1.0, 0.0]];
        let uvs: [[f32; 2]; 3] = [[0.0, 0.0]; 3];

        let err = mirrored_vertices(&positions, &normals, &uvs).unwrap_err();
        assert!(matches!(
            err,
            MeshError::AttributeMismatch {
                positions: 3,
                normals: 2,
                uvs: 3
            }
        ));
    }

    #[test]
    fn test_vertices_mirror_z() {
        let vertices =
            mirrored_vertices(&[[1.0, 2.0, 3.0]], &[[0.0, 0.0, 1.0]], &[[0.5, 0.25]]).unwrap();
        assert_eq!(
            vertices,
            vec![Vertex::new([1.0, 2.0, -3.0], [0.0, 0.0, -1.0], [0.5, 0.25])]
        );
    }
}
