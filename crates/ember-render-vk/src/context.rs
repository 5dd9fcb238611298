// SPDX-License-Identifier: CEPL-1.0
//! The API connection and the window it presents to.
//!
//! A [`Context`] is built once per process through [`ContextBuilder`]; every
//! other object in this crate borrows it and therefore cannot outlive it.

use std::ffi::{c_char, CStr, CString};
use std::sync::atomic::{AtomicBool, Ordering};

use ash::ext::debug_utils;
use ash::khr::swapchain;
use ash::{vk, Entry, Instance};
use ember_platform::{Platform, PlatformWindow};
use ember_render::{PresentTarget, RenderSize};
use raw_window_handle::HasDisplayHandle;
use tracing::{debug, error, info, trace, warn};

use crate::adapter::Adapter;
use crate::error::{VkError, VkResult};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

const DEFAULT_APP_NAME: &str = "Vulkan Application";
const DEFAULT_WINDOW_SIZE: RenderSize = RenderSize::new(800, 600);

static CONTEXT_ALIVE: AtomicBool = AtomicBool::new(false);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum MessageSeverity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl MessageSeverity {
    /// Highest severity bit wins when a driver sets several.
    pub fn from_flags(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            MessageSeverity::Error
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            MessageSeverity::Warning
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            MessageSeverity::Info
        } else {
            MessageSeverity::Verbose
        }
    }
}

fn emit(severity: MessageSeverity, types: vk::DebugUtilsMessageTypeFlagsEXT, message: &str) {
    match severity {
        MessageSeverity::Verbose => trace!("[vulkan {:?}] {}", types, message),
        MessageSeverity::Info => info!("[vulkan {:?}] {}", types, message),
        MessageSeverity::Warning => warn!("[vulkan {:?}] {}", types, message),
        MessageSeverity::Error => error!("[vulkan {:?}] {}", types, message),
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    // SAFETY: the loader hands us either null or a callback data struct that
    // lives for the duration of this call; p_message is null or NUL terminated.
    let message = unsafe {
        if data.is_null() || (*data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };
    emit(MessageSeverity::from_flags(severity), types, &message);
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

fn create_debug_messenger(entry: &Entry, instance: &Instance) -> VkResult<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    // SAFETY: `ci` is fully initialized and the loader belongs to a live instance.
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .map_err(|e| VkError::context("debug messenger", format!("{e:?}")))?;
    Ok(DebugMessenger { loader, messenger })
}

/// Appends `name` unless an equal name is already present.
fn push_unique(list: &mut Vec<CString>, name: CString) {
    if !list.contains(&name) {
        list.push(name);
    }
}

fn to_cstring(what: &'static str, name: &str) -> VkResult<CString> {
    CString::new(name).map_err(|e| VkError::context(what, format!("{name:?}: {e}")))
}

/// Reads one of Vulkan's fixed-size name arrays. Unterminated input reads as empty.
pub(crate) fn fixed_name(raw: &[c_char]) -> &CStr {
    if !raw.contains(&0) {
        return c"";
    }
    // SAFETY: a terminator lies inside the slice.
    unsafe { CStr::from_ptr(raw.as_ptr()) }
}

fn ptrs(names: &[CString]) -> Vec<*const c_char> {
    names.iter().map(|n| n.as_ptr()).collect()
}

/// Accumulates layer and extension requests, then opens the window and the
/// API connection in one shot. `create` consumes the builder, so nothing can
/// be appended to an already created context.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    app_name: String,
    window_size: RenderSize,
    validation: bool,
    layers: Vec<String>,
    extensions: Vec<String>,
    device_extensions: Vec<String>,
    all_extensions: bool,
    required_extensions: bool,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_owned(),
            window_size: DEFAULT_WINDOW_SIZE,
            validation: true,
            layers: Vec::new(),
            extensions: Vec::new(),
            device_extensions: vec![swapchain::NAME.to_string_lossy().into_owned()],
            all_extensions: false,
            required_extensions: false,
        }
    }
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_app_name(&mut self, app_name: impl Into<String>) -> &mut Self {
        self.app_name = app_name.into();
        self
    }

    pub fn set_window_size(&mut self, size: RenderSize) -> &mut Self {
        self.window_size = size;
        self
    }

    /// Only honoured in debug builds.
    pub fn set_validation(&mut self, enabled: bool) -> &mut Self {
        self.validation = enabled;
        self
    }

    pub fn add_layer(&mut self, layer: impl Into<String>) -> &mut Self {
        self.layers.push(layer.into());
        self
    }

    pub fn add_extension(&mut self, extension: impl Into<String>) -> &mut Self {
        self.extensions.push(extension.into());
        self
    }

    pub fn add_device_extension(&mut self, extension: impl Into<String>) -> &mut Self {
        self.device_extensions.push(extension.into());
        self
    }

    /// Enables every instance extension the loader reports.
    pub fn add_all_extensions(&mut self) -> &mut Self {
        self.all_extensions = true;
        self
    }

    /// Enables the surface extensions the windowing system needs. Resolved
    /// once the window exists.
    pub fn add_required_extensions(&mut self) -> &mut Self {
        self.required_extensions = true;
        self
    }

    pub fn create(self) -> VkResult<Context> {
        if CONTEXT_ALIVE.swap(true, Ordering::SeqCst) {
            return Err(VkError::context(
                "guard",
                "a context already exists in this process",
            ));
        }
        let result = self.build();
        if result.is_err() {
            CONTEXT_ALIVE.store(false, Ordering::SeqCst);
        }
        result
    }

    // STRICT ORDER:
    // 1) windowing subsystem, 2) window, 3) loader + instance, 4) messenger.
    // Context::destroy walks this list backwards. On failure, locals drop in
    // reverse declaration order, which is the same walk.
    fn build(self) -> VkResult<Context> {
        let platform = Platform::init().map_err(|e| VkError::context("windowing init", e))?;
        let window = platform
            .create_window(self.window_size.width, self.window_size.height, &self.app_name)
            .map_err(|e| VkError::context("window", e))?;

        // SAFETY: loading the system Vulkan library has no preconditions
        // beyond not unloading it while in use; `entry` is stored in the Context.
        let entry = unsafe { Entry::load() }.map_err(|e| VkError::context("loader", e))?;

        // SAFETY: plain enumeration calls against a loaded entry.
        let available_extensions = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(|e| VkError::context("extension enumeration", format!("{e:?}")))?;
        let available_layers = unsafe { entry.enumerate_instance_layer_properties() }
            .map_err(|e| VkError::context("layer enumeration", format!("{e:?}")))?;

        let has_extension = |name: &CStr| {
            available_extensions
                .iter()
                .any(|e| fixed_name(&e.extension_name) == name)
        };
        let has_layer = |name: &CStr| {
            available_layers
                .iter()
                .any(|l| fixed_name(&l.layer_name) == name)
        };

        let mut extensions = Vec::new();
        for name in &self.extensions {
            push_unique(&mut extensions, to_cstring("extension name", name)?);
        }
        if self.required_extensions {
            let display = window
                .display_handle()
                .map_err(|e| VkError::context("display handle", e))?
                .as_raw();
            let required = ash_window::enumerate_required_extensions(display)
                .map_err(|e| VkError::context("required extensions", format!("{e:?}")))?;
            for &ptr in required {
                // SAFETY: ash-window returns pointers to static NUL-terminated names.
                push_unique(&mut extensions, unsafe { CStr::from_ptr(ptr) }.to_owned());
            }
        }
        if self.all_extensions {
            for props in &available_extensions {
                push_unique(&mut extensions, fixed_name(&props.extension_name).to_owned());
            }
        }

        let mut layers = Vec::new();
        for name in &self.layers {
            push_unique(&mut layers, to_cstring("layer name", name)?);
        }

        let debug_build = cfg!(debug_assertions) && self.validation;
        if debug_build {
            if has_layer(VALIDATION_LAYER) {
                push_unique(&mut layers, VALIDATION_LAYER.to_owned());
            } else {
                warn!("{:?} not installed, continuing without validation", VALIDATION_LAYER);
            }
        }
        let install_messenger = debug_build && has_extension(debug_utils::NAME);
        if install_messenger {
            push_unique(&mut extensions, debug_utils::NAME.to_owned());
        }

        let mut device_extensions = Vec::new();
        for name in &self.device_extensions {
            push_unique(&mut device_extensions, to_cstring("device extension name", name)?);
        }

        let app_name = to_cstring("application name", &self.app_name)?;
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app_name.as_ptr(),
            application_version: vk::make_api_version(0, 1, 0, 0),
            p_engine_name: app_name.as_ptr(),
            engine_version: vk::make_api_version(0, 1, 0, 0),
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };

        let extension_ptrs = ptrs(&extensions);
        let layer_ptrs = ptrs(&layers);
        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_layer_count: layer_ptrs.len() as u32,
            pp_enabled_layer_names: layer_ptrs.as_ptr(),
            enabled_extension_count: extension_ptrs.len() as u32,
            pp_enabled_extension_names: extension_ptrs.as_ptr(),
            ..Default::default()
        };

        // SAFETY: every pointer in create_info refers to locals that outlive the call.
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| VkError::context("vkCreateInstance", format!("{e:?}")))?;

        let debug = if install_messenger {
            match create_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    // SAFETY: nothing has been created from this instance yet.
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let has_messenger = debug.is_some();
        info!(
            "context '{}' created: {} layer(s), {} instance extension(s), messenger={}",
            self.app_name,
            layers.len(),
            extensions.len(),
            has_messenger
        );
        for name in &extensions {
            debug!("instance extension {:?}", name);
        }
        for name in &layers {
            debug!("layer {:?}", name);
        }

        Ok(Context {
            debug,
            instance,
            entry,
            alive: true,
            window: Some(window),
            platform: Some(platform),
            app_name: self.app_name,
            layers,
            extensions,
            device_extensions,
        })
    }
}

/// The API connection plus the window it presents to.
pub struct Context {
    debug: Option<DebugMessenger>,
    instance: Instance,
    entry: Entry,
    alive: bool,
    window: Option<PlatformWindow>,
    platform: Option<Platform>,
    app_name: String,
    layers: Vec<CString>,
    extensions: Vec<CString>,
    device_extensions: Vec<CString>,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub fn is_valid(&self) -> bool {
        self.alive
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn ash_entry(&self) -> &Entry {
        &self.entry
    }

    pub fn ash_instance(&self) -> &Instance {
        debug_assert!(self.alive, "instance used after Context::destroy");
        &self.instance
    }

    pub fn raw_instance(&self) -> vk::Instance {
        self.ash_instance().handle()
    }

    pub fn window(&self) -> VkResult<&PlatformWindow> {
        self.window.as_ref().ok_or(VkError::NotCreated("window"))
    }

    /// Current drawable size of the context's window, `0x0` once destroyed.
    pub fn framebuffer_size(&self) -> RenderSize {
        self.window
            .as_ref()
            .map(|w| w.framebuffer_size())
            .unwrap_or(RenderSize::new(0, 0))
    }

    pub fn enabled_layers(&self) -> &[CString] {
        &self.layers
    }

    pub fn enabled_extensions(&self) -> &[CString] {
        &self.extensions
    }

    /// Extensions every logical device built from this context enables.
    pub fn device_extensions(&self) -> &[CString] {
        &self.device_extensions
    }

    pub fn available_extensions(&self) -> VkResult<Vec<vk::ExtensionProperties>> {
        // SAFETY: plain enumeration call against a loaded entry.
        unsafe { self.entry.enumerate_instance_extension_properties(None) }
            .map_err(VkError::query("instance extensions"))
    }

    /// Every physical device visible to this instance, in driver order.
    pub fn enumerate_adapters(&self) -> VkResult<Vec<Adapter<'_>>> {
        // SAFETY: the instance is alive for the borrow of self.
        let raw = unsafe { self.ash_instance().enumerate_physical_devices() }
            .map_err(VkError::query("physical devices"))?;
        debug!("{} physical device(s) enumerated", raw.len());
        Ok(raw.into_iter().map(|pd| Adapter::new(self, pd)).collect())
    }

    // STRICT TEARDOWN ORDER: messenger → instance → window → windowing system.
    pub fn destroy(&mut self) {
        if !self.alive {
            return;
        }
        // SAFETY: every object created from this instance borrows the Context,
        // so none can be alive while we hold `&mut self`.
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        self.alive = false;

        if let Some(window) = self.window.take() {
            window.destroy();
        }
        if let Some(platform) = self.platform.take() {
            platform.terminate();
        }
        CONTEXT_ALIVE.store(false, Ordering::SeqCst);
        info!("context '{}' destroyed", self.app_name);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_picks_highest_bit() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as F;
        assert_eq!(MessageSeverity::from_flags(F::VERBOSE), MessageSeverity::Verbose);
        assert_eq!(MessageSeverity::from_flags(F::INFO), MessageSeverity::Info);
        assert_eq!(MessageSeverity::from_flags(F::WARNING), MessageSeverity::Warning);
        assert_eq!(MessageSeverity::from_flags(F::ERROR), MessageSeverity::Error);
        assert_eq!(
            MessageSeverity::from_flags(F::INFO | F::ERROR),
            MessageSeverity::Error
        );
        assert_eq!(MessageSeverity::from_flags(F::empty()), MessageSeverity::Verbose);
    }

    #[test]
    fn severities_are_ordered() {
        assert!(MessageSeverity::Verbose < MessageSeverity::Info);
        assert!(MessageSeverity::Info < MessageSeverity::Warning);
        assert!(MessageSeverity::Warning < MessageSeverity::Error);
    }

    #[test]
    fn push_unique_keeps_first_insertion_order() {
        let mut list = Vec::new();
        push_unique(&mut list, c"VK_KHR_surface".to_owned());
        push_unique(&mut list, c"VK_EXT_debug_utils".to_owned());
        push_unique(&mut list, c"VK_KHR_surface".to_owned());
        assert_eq!(
            list,
            vec![c"VK_KHR_surface".to_owned(), c"VK_EXT_debug_utils".to_owned()]
        );
    }

    #[test]
    fn builder_always_requests_the_swapchain_device_extension() {
        let builder = ContextBuilder::new();
        assert_eq!(builder.device_extensions, vec!["VK_KHR_swapchain".to_owned()]);
        assert_eq!(builder.app_name, DEFAULT_APP_NAME);
        assert_eq!(builder.window_size, RenderSize::new(800, 600));
    }

    #[test]
    fn builder_accumulates_requests() {
        let mut builder = ContextBuilder::new();
        builder
            .set_app_name("demo")
            .add_layer("VK_LAYER_LUNARG_api_dump")
            .add_extension("VK_KHR_get_surface_capabilities2")
            .add_required_extensions()
            .add_all_extensions();
        assert_eq!(builder.app_name, "demo");
        assert_eq!(builder.layers, vec!["VK_LAYER_LUNARG_api_dump".to_owned()]);
        assert_eq!(
            builder.extensions,
            vec!["VK_KHR_get_surface_capabilities2".to_owned()]
        );
        assert!(builder.required_extensions);
        assert!(builder.all_extensions);
    }

    #[test]
    fn interior_nul_is_rejected() {
        assert!(matches!(
            to_cstring("layer name", "bad\0name"),
            Err(VkError::ContextCreation { stage: "layer name", .. })
        ));
    }

    #[test]
    fn names_are_read_up_to_the_terminator() {
        let mut raw = [0 as c_char; 16];
        for (dst, src) in raw.iter_mut().zip(b"VK_KHR_surface") {
            *dst = *src as c_char;
        }
        assert_eq!(fixed_name(&raw), c"VK_KHR_surface");
    }

    #[test]
    fn unterminated_names_read_as_empty() {
        let raw = [b'x' as c_char; 4];
        assert_eq!(fixed_name(&raw), c"");
    }
}
