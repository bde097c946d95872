//! Mesh data contract consumed by the buffer subsystem
//!
//! The asset loader (out of scope here) hands over already-parsed geometry:
//! a submesh table plus flat vertex and index arrays. The engine validates
//! the cross-references between them before any bytes reach the GPU, so a
//! malformed hand-off becomes a load error instead of a silent bad copy.

use bytemuck::{Pod, Zeroable};

use crate::core::stage::LoadError;

/// Interleaved vertex layout fed to the fixed pipeline
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Surface normal
    pub normal: [f32; 3],
    /// Per-vertex color
    pub color: [f32; 3],
    /// Texture coordinate
    pub texture_coord: [f32; 2],
}

/// One submesh window into the shared vertex and index arrays
#[derive(Debug, Clone, Copy)]
pub struct Submesh {
    /// Flat color applied to the submesh's vertices at load time
    pub color: [f32; 3],
    /// First vertex of the submesh
    pub vertex_base: u32,
    /// Number of vertices in the submesh
    pub vertex_count: u32,
    /// First index of the submesh
    pub index_base: u32,
    /// Number of indices in the submesh
    pub index_count: u32,
}

/// Parsed mesh data handed over by the asset loader
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    /// Submesh windows into the arrays below
    pub submeshes: Vec<Submesh>,
    /// Flat vertex array shared by all submeshes
    pub vertices: Vec<Vertex>,
    /// Flat index array shared by all submeshes
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Check the internal consistency of the hand-off. Mismatched sizes and
    /// out-of-range references are load errors, never guessed around.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.vertices.is_empty() {
            return Err(LoadError::new("mesh has no vertices"));
        }
        if self.indices.is_empty() {
            return Err(LoadError::new("mesh has no indices"));
        }

        for (number, submesh) in self.submeshes.iter().enumerate() {
            let vertex_end = u64::from(submesh.vertex_base) + u64::from(submesh.vertex_count);
            if vertex_end > self.vertices.len() as u64 {
                return Err(LoadError::new(format!(
                    "submesh {number} vertex range {}..{vertex_end} exceeds {} vertices",
                    submesh.vertex_base,
                    self.vertices.len()
                )));
            }
            let index_end = u64::from(submesh.index_base) + u64::from(submesh.index_count);
            if index_end > self.indices.len() as u64 {
                return Err(LoadError::new(format!(
                    "submesh {number} index range {}..{index_end} exceeds {} indices",
                    submesh.index_base,
                    self.indices.len()
                )));
            }
        }

        for (position, &index) in self.indices.iter().enumerate() {
            if index as usize >= self.vertices.len() {
                return Err(LoadError::new(format!(
                    "index {index} at position {position} exceeds {} vertices",
                    self.vertices.len()
                )));
            }
        }

        Ok(())
    }

    /// Vertex array as raw bytes for the staging copy
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index array as raw bytes for the staging copy
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Total index count for the instanced draw
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> MeshData {
        let vertex = |x: f32, y: f32| Vertex {
            position: [x, y, 0.0],
            normal: [0.0, 0.0, 1.0],
            color: [1.0, 1.0, 1.0],
            texture_coord: [0.0, 0.0],
        };
        MeshData {
            submeshes: vec![Submesh {
                color: [1.0, 1.0, 1.0],
                vertex_base: 0,
                vertex_count: 3,
                index_base: 0,
                index_count: 3,
            }],
            vertices: vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(0.0, 1.0)],
            indices: vec![0, 1, 2],
        }
    }

    #[test]
    fn a_consistent_mesh_validates() {
        assert!(triangle().validate().is_ok());
    }

    #[test]
    fn empty_arrays_are_rejected() {
        let mut mesh = triangle();
        mesh.vertices.clear();
        assert!(mesh.validate().is_err());

        let mut mesh = triangle();
        mesh.indices.clear();
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn out_of_range_submesh_vertex_window_is_rejected() {
        let mut mesh = triangle();
        mesh.submeshes[0].vertex_count = 4;
        let error = mesh.validate().unwrap_err();
        assert!(error.to_string().contains("vertex range"));
    }

    #[test]
    fn out_of_range_submesh_index_window_is_rejected() {
        let mut mesh = triangle();
        mesh.submeshes[0].index_base = 1;
        let error = mesh.validate().unwrap_err();
        assert!(error.to_string().contains("index range"));
    }

    #[test]
    fn index_beyond_the_vertex_array_is_rejected() {
        let mut mesh = triangle();
        mesh.indices[2] = 3;
        let error = mesh.validate().unwrap_err();
        assert!(error.to_string().contains("exceeds 3 vertices"));
    }

    #[test]
    fn byte_views_cover_the_whole_arrays() {
        let mesh = triangle();
        assert_eq!(
            mesh.vertex_bytes().len(),
            3 * std::mem::size_of::<Vertex>()
        );
        assert_eq!(mesh.index_bytes().len(), 3 * std::mem::size_of::<u32>());
        assert_eq!(mesh.index_count(), 3);
    }
}
