//! Rendering domain: host-facing data types and the Vulkan backend

pub mod camera;
pub mod frame;
pub mod mesh;
pub mod model;
pub mod texture;
pub mod vulkan;

pub use camera::Transform3;
pub use frame::{plan_draws, FramePacket, InstanceGroup, ModelHandle, PlannedDraw};
pub use mesh::{MeshData, Submesh, Vertex};
pub use model::Model;
pub use texture::{Texture, TextureData};
pub use vulkan::RenderError;
