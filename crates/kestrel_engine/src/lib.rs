//! # Kestrel Engine
//!
//! A resource-lifecycle and frame-rendering core for a real-time 3D
//! renderer on Vulkan.
//!
//! ## Features
//!
//! - **Staged lifecycle**: every composite GPU resource is acquired and
//!   released through one ordered stage protocol with transactional rollback
//! - **Device and queue selection**: capability-ranked queue family pools
//!   with mutex-guarded, non-blocking queue leasing
//! - **Double-buffered frame pipeline**: two frame slots of semaphores and
//!   fences, independent of the swapchain image count
//! - **Instanced drawing**: one indexed draw call per model group, up to 128
//!   instances per model per frame
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kestrel_engine::{Engine, EngineConfig, FramePacket, Transform3};
//!
//! # fn window() -> winit_like::Window { unimplemented!() }
//! # mod winit_like {
//! #     pub struct Window;
//! #     unsafe impl raw_window_handle::HasRawDisplayHandle for Window {
//! #         fn raw_display_handle(&self) -> raw_window_handle::RawDisplayHandle {
//! #             unimplemented!()
//! #         }
//! #     }
//! #     unsafe impl raw_window_handle::HasRawWindowHandle for Window {
//! #         fn raw_window_handle(&self) -> raw_window_handle::RawWindowHandle {
//! #             unimplemented!()
//! #         }
//! #     }
//! # }
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     kestrel_engine::foundation::logging::init();
//!
//!     let window = window();
//!     let mut engine = Engine::new(EngineConfig::default(), &window)?;
//!
//!     // Each frame the host passes the camera and the instances grouped
//!     // by model; the engine issues one instanced draw per group.
//!     let packet = FramePacket::new(Transform3::default());
//!     engine.render_frame(&packet)?;
//!
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod foundation;
pub mod render;

mod engine;

pub use crate::core::config::{AppVersion, ConfigError, EngineConfig, ShaderConfig};
pub use crate::core::stage::{LoadError, StageStack};
pub use engine::Engine;
pub use render::camera::Transform3;
pub use render::frame::{FramePacket, InstanceGroup, ModelHandle};
pub use render::mesh::{MeshData, Submesh, Vertex};
pub use render::texture::TextureData;
pub use render::vulkan::{QueueExhausted, RenderError, SelectionError, MAX_FRAMES_IN_FLIGHT, MAX_MODEL_INSTANCES};
