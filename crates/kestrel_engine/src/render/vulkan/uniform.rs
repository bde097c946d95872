//! Shader-visible uniform data layouts

use bytemuck::{Pod, Zeroable};

/// Ceiling on instances of one model in a single frame, fixed by the size of
/// the shader-side transform array
pub const MAX_MODEL_INSTANCES: usize = 128;

/// Per-frame view and projection matrices (set 1, binding 0)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UboViewProjection {
    /// Inverse of the camera transform, column-major
    pub view: [[f32; 4]; 4],
    /// Perspective projection with the Y axis flipped, column-major
    pub proj: [[f32; 4]; 4],
}

/// Per-instance model transforms (set 0, binding 0)
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct UboModelInstance {
    /// One column-major transform per drawn instance; unused slots stay zero
    pub model: [[[f32; 4]; 4]; MAX_MODEL_INSTANCES],
}

impl Default for UboModelInstance {
    fn default() -> Self {
        Self::zeroed()
    }
}
