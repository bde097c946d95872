//! Physical device enumeration and logical device ownership
//!
//! Every enumerated physical device gets a logical device; the first one is
//! nominated to own the presentation surface and swapchain. Logical devices
//! are the allocation authority for all GPU memory and own the shader
//! modules loaded from the configured SPIR-V blobs.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device, Instance};
use std::ffi::CStr;
use std::io::Cursor;
use thiserror::Error;

use crate::core::config::ShaderConfig;
use crate::core::stage::LoadError;

/// Fatal startup condition: no device or queue family satisfies the minimum
/// requirements.
#[derive(Debug, Clone, Copy, Error)]
pub enum SelectionError {
    /// Device enumeration returned nothing
    #[error("no GPU with Vulkan support found")]
    NoDevices,
    /// No queue family supports graphics work
    #[error("no queue family with graphics support found")]
    NoGraphicsFamily,
    /// No queue family can present to the target surface
    #[error("no queue family can present to the target surface")]
    NoPresentationFamily,
}

impl From<SelectionError> for LoadError {
    fn from(error: SelectionError) -> Self {
        LoadError::new(error.to_string())
    }
}

/// One physical device with its logical device and shader modules
pub struct RenderDevice {
    physical: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    logical: Device,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
    presentation: bool,
}

impl RenderDevice {
    /// Create the logical device for one physical device. `presentation`
    /// selects the swapchain extension; the feature set (geometry shaders,
    /// tessellation shaders, sampler anisotropy, and multi-draw-indirect
    /// when supported) is requested either way.
    pub fn new(
        instance: &Instance,
        physical: vk::PhysicalDevice,
        queue_family_properties: &[vk::QueueFamilyProperties],
        presentation: bool,
        shaders: &ShaderConfig,
        debug: bool,
    ) -> Result<Self, LoadError> {
        let properties = unsafe { instance.get_physical_device_properties(physical) };
        let supported = unsafe { instance.get_physical_device_features(physical) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical) };

        if debug {
            let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
            log::debug!(
                "physical device: {} (type {:?}, API version {}, driver version {})",
                name.to_string_lossy(),
                properties.device_type,
                properties.api_version,
                properties.driver_version,
            );
        }

        // One create-info per family, exposing every queue with linearly
        // descending priorities.
        let priorities: Vec<Vec<f32>> = queue_family_properties
            .iter()
            .map(|family| {
                let count = family.queue_count as usize;
                (0..count)
                    .map(|queue| (count - queue) as f32 / count as f32)
                    .collect()
            })
            .collect();
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = priorities
            .iter()
            .enumerate()
            .map(|(family_index, family_priorities)| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family_index as u32)
                    .queue_priorities(family_priorities)
                    .build()
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures::builder()
            .geometry_shader(true)
            .tessellation_shader(true)
            .sampler_anisotropy(true)
            .multi_draw_indirect(supported.multi_draw_indirect == vk::TRUE)
            .build();

        let extensions = if presentation {
            vec![SwapchainLoader::name().as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let logical = unsafe {
            instance
                .create_device(physical, &create_info, None)
                .map_err(|code| {
                    LoadError::new(format!("logical device creation failed: {code:?}"))
                })?
        };

        let mut device = Self {
            physical,
            properties,
            memory_properties,
            logical,
            vert_shader: vk::ShaderModule::null(),
            frag_shader: vk::ShaderModule::null(),
            presentation,
        };

        // Partial failure drops `device`, destroying whatever was created.
        device.vert_shader = load_shader_module(&device.logical, &shaders.vertex_shader_path)
            .map_err(|e| e.context("failed to load vertex shader"))?;
        device.frag_shader = load_shader_module(&device.logical, &shaders.fragment_shader_path)
            .map_err(|e| e.context("failed to load fragment shader"))?;

        Ok(device)
    }

    /// Physical device handle
    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    /// Logical device handle
    pub fn logical(&self) -> &Device {
        &self.logical
    }

    /// Device memory layout used for allocation decisions
    pub fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    /// Vertex shader module owned by this device
    pub fn vert_shader(&self) -> vk::ShaderModule {
        self.vert_shader
    }

    /// Fragment shader module owned by this device
    pub fn frag_shader(&self) -> vk::ShaderModule {
        self.frag_shader
    }

    /// Whether this device owns the presentation surface
    pub fn is_presentation(&self) -> bool {
        self.presentation
    }

    /// Device name reported by the driver
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.logical.device_wait_idle();
            self.logical.destroy_shader_module(self.vert_shader, None);
            self.logical.destroy_shader_module(self.frag_shader, None);
            self.logical.destroy_device(None);
        }
    }
}

/// Select a memory type satisfying the requirements and property flags
pub fn select_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    requirements: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32, LoadError> {
    for index in 0..memory_properties.memory_type_count {
        let supported = requirements.memory_type_bits & (1 << index) != 0;
        let matches = memory_properties.memory_types[index as usize]
            .property_flags
            .contains(flags);
        if supported && matches {
            return Ok(index);
        }
    }
    Err(LoadError::new("no suitable memory type found"))
}

/// Load a pre-compiled SPIR-V blob into a shader module. The blob is handed
/// to the API as-is, never parsed here.
fn load_shader_module(device: &Device, path: &str) -> Result<vk::ShaderModule, LoadError> {
    let bytes = std::fs::read(path)
        .map_err(|e| LoadError::new(format!("failed to read shader file {path}: {e}")))?;
    let code = ash::util::read_spv(&mut Cursor::new(&bytes))
        .map_err(|e| LoadError::new(format!("shader file {path} is not valid SPIR-V: {e}")))?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
    unsafe {
        device
            .create_shader_module(&create_info, None)
            .map_err(|code| LoadError::new(format!("shader module creation failed: {code:?}")))
    }
}
