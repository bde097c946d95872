//! Vulkan instance, debug messenger, and presentation surface
//!
//! The windowing layer stays external: the host hands over raw display and
//! window handles, the platform extension list comes from `ash-window`, and
//! surface creation is delegated to it as well.

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Surface;
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};

use crate::core::config::EngineConfig;
use crate::core::stage::{LoadError, StageStack};

const ENGINE_NAME: &str = "Kestrel";
const ENGINE_VERSION: u32 = vk::make_api_version(0, 0, 1, 0);
const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Instance-level state: entry point, instance, optional debug messenger,
/// and the presentation surface.
pub struct RenderInstance {
    parts: InstanceParts,
    stages: StageStack<InstanceParts>,
}

struct InstanceParts {
    application_name: String,
    application_version: u32,
    debug: bool,
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
    entry: Option<Entry>,
    instance: Option<ash::Instance>,
    debug_utils: Option<DebugUtils>,
    debug_messenger: vk::DebugUtilsMessengerEXT,
    surface_loader: Option<Surface>,
    surface: vk::SurfaceKHR,
}

impl RenderInstance {
    /// Create the instance, debug messenger (debug configurations only), and
    /// presentation surface through the staged protocol.
    pub fn new(
        config: &EngineConfig,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self, LoadError> {
        let version = &config.application_version;
        let mut parts = InstanceParts {
            application_name: config.application_name.clone(),
            application_version: vk::make_api_version(
                0,
                version.major,
                version.minor,
                version.patch,
            ),
            debug: config.debug,
            display_handle,
            window_handle,
            entry: None,
            instance: None,
            debug_utils: None,
            debug_messenger: vk::DebugUtilsMessengerEXT::null(),
            surface_loader: None,
            surface: vk::SurfaceKHR::null(),
        };

        let mut stages = StageStack::new();
        stages.add(
            "instance",
            InstanceParts::load_instance,
            InstanceParts::unload_instance,
        );
        stages.add(
            "debug messenger",
            InstanceParts::load_debug_messenger,
            InstanceParts::unload_debug_messenger,
        );
        stages.add(
            "window surface",
            InstanceParts::load_surface,
            InstanceParts::unload_surface,
        );
        stages
            .load(&mut parts)
            .map_err(|e| e.context("could not initialize Vulkan instance"))?;

        Ok(Self { parts, stages })
    }

    /// Vulkan entry point
    pub fn entry(&self) -> &Entry {
        self.parts.entry.as_ref().expect("instance is loaded")
    }

    /// Instance handle
    pub fn handle(&self) -> &ash::Instance {
        self.parts.instance.as_ref().expect("instance is loaded")
    }

    /// Presentation surface
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.parts.surface
    }

    /// Surface extension loader
    pub fn surface_loader(&self) -> &Surface {
        self.parts
            .surface_loader
            .as_ref()
            .expect("instance is loaded")
    }
}

impl Drop for RenderInstance {
    fn drop(&mut self) {
        self.stages.unload(&mut self.parts);
    }
}

impl InstanceParts {
    fn load_instance(&mut self) -> Result<(), LoadError> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| LoadError::new(format!("failed to load the Vulkan library: {e}")))?;

        let application_name = CString::new(self.application_name.as_str())
            .map_err(|_| LoadError::new("application name contains a NUL byte"))?;
        let engine_name = CString::new(ENGINE_NAME).expect("engine name is NUL-free");
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&application_name)
            .application_version(self.application_version)
            .engine_name(&engine_name)
            .engine_version(ENGINE_VERSION)
            .api_version(vk::API_VERSION_1_0);

        // Platform extensions come from the windowing layer.
        let mut extensions = ash_window::enumerate_required_extensions(self.display_handle)
            .map_err(|code| {
                LoadError::new(format!("failed to query platform extensions: {code:?}"))
            })?
            .to_vec();
        if self.debug {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names: Vec<CString> = if self.debug {
            vec![CString::new(VALIDATION_LAYER).expect("layer name is NUL-free")]
        } else {
            Vec::new()
        };
        let layer_pointers: Vec<*const i8> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        if self.debug {
            for extension in &extensions {
                let name = unsafe { CStr::from_ptr(*extension) };
                log::debug!("instance extension: {}", name.to_string_lossy());
            }
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_pointers);

        let instance = unsafe {
            entry.create_instance(&create_info, None).map_err(|code| {
                LoadError::new(format!("instance creation failed: {code:?}"))
            })?
        };

        self.entry = Some(entry);
        self.instance = Some(instance);
        Ok(())
    }

    fn unload_instance(&mut self) {
        if let Some(instance) = self.instance.take() {
            unsafe { instance.destroy_instance(None) };
        }
        self.entry = None;
    }

    fn load_debug_messenger(&mut self) -> Result<(), LoadError> {
        if !self.debug {
            return Ok(());
        }
        let (entry, instance) = self.loaded_instance()?;
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        self.debug_messenger = unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(|code| {
                    LoadError::new(format!("debug messenger creation failed: {code:?}"))
                })?
        };
        self.debug_utils = Some(debug_utils);
        Ok(())
    }

    fn unload_debug_messenger(&mut self) {
        if let Some(debug_utils) = self.debug_utils.take() {
            unsafe {
                debug_utils.destroy_debug_utils_messenger(self.debug_messenger, None);
            }
            self.debug_messenger = vk::DebugUtilsMessengerEXT::null();
        }
    }

    fn load_surface(&mut self) -> Result<(), LoadError> {
        let (entry, instance) = self.loaded_instance()?;
        let surface_loader = Surface::new(entry, instance);

        // Surface creation is delegated to the windowing layer's handles.
        self.surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.display_handle,
                self.window_handle,
                None,
            )
            .map_err(|code| LoadError::new(format!("surface creation failed: {code:?}")))?
        };
        self.surface_loader = Some(surface_loader);
        Ok(())
    }

    fn unload_surface(&mut self) {
        if let Some(surface_loader) = self.surface_loader.take() {
            unsafe { surface_loader.destroy_surface(self.surface, None) };
            self.surface = vk::SurfaceKHR::null();
        }
    }

    fn loaded_instance(&self) -> Result<(&Entry, &ash::Instance), LoadError> {
        match (self.entry.as_ref(), self.instance.as_ref()) {
            (Some(entry), Some(instance)) => Ok((entry, instance)),
            _ => Err(LoadError::new("instance stage has not been acquired")),
        }
    }
}

/// Route validation layer messages into the log facade
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan] {message_type:?} {message}");
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[vulkan] {message_type:?} {message}");
    } else {
        log::debug!("[vulkan] {message_type:?} {message}");
    }

    vk::FALSE
}
