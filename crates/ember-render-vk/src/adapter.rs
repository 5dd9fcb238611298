// SPDX-License-Identifier: CEPL-1.0
//! Physical device inspection, suitability scoring and queue family discovery.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info};

use crate::context::{fixed_name, Context};
use crate::device::LogicalDevice;
use crate::error::{VkError, VkResult};
use crate::surface::PresentationSurface;

const DISCRETE_BONUS: u32 = 2048;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// `(graphics, present)`, or `IncompleteQueueFamily` if either is unresolved.
    pub fn resolved(&self) -> VkResult<(u32, u32)> {
        match (self.graphics, self.present) {
            (Some(graphics), Some(present)) => Ok((graphics, present)),
            (graphics, present) => Err(VkError::IncompleteQueueFamily { graphics, present }),
        }
    }
}

/// 0 without geometry shaders, otherwise a discrete-GPU bonus plus the
/// largest supported 3D image dimension.
pub fn rate_suitability(
    properties: &vk::PhysicalDeviceProperties,
    features: &vk::PhysicalDeviceFeatures,
) -> u32 {
    if features.geometry_shader == vk::FALSE {
        return 0;
    }
    let mut score = 0u32;
    if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += DISCRETE_BONUS;
    }
    score.saturating_add(properties.limits.max_image_dimension3_d)
}

/// Index of the highest nonzero score. Ties go to the earlier entry.
pub fn best_score_index(scores: &[u32]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        if score == 0 {
            continue;
        }
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((index, score));
        }
    }
    best.map(|(index, _)| index)
}

/// Walks the families in index order and keeps the first graphics-capable and
/// the first present-capable one. Families exposing no queues are skipped.
pub fn scan_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> VkResult<bool>,
) -> VkResult<QueueFamilyIndices> {
    let mut indices = QueueFamilyIndices::default();
    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        if family.queue_count == 0 {
            continue;
        }
        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(index);
        }
        if indices.present.is_none() && supports_present(index)? {
            indices.present = Some(index);
        }
        if indices.is_complete() {
            break;
        }
    }
    Ok(indices)
}

/// Required names that `available` does not list.
pub fn missing_extensions<'r>(
    available: &[vk::ExtensionProperties],
    required: &'r [impl AsRef<CStr>],
) -> Vec<&'r CStr> {
    let mut missing = Vec::new();
    for name in required {
        let name: &CStr = name.as_ref();
        if !available.iter().any(|p| fixed_name(&p.extension_name) == name) {
            missing.push(name);
        }
    }
    missing
}

/// A read-only view of one GPU.
pub struct Adapter<'a> {
    context: &'a Context,
    physical: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    features: vk::PhysicalDeviceFeatures,
    queue_families: QueueFamilyIndices,
}

impl<'a> Adapter<'a> {
    pub(crate) fn new(context: &'a Context, physical: vk::PhysicalDevice) -> Self {
        let instance = context.ash_instance();
        // SAFETY: `physical` was enumerated from this instance.
        let (properties, features) = unsafe {
            (
                instance.get_physical_device_properties(physical),
                instance.get_physical_device_features(physical),
            )
        };
        Self {
            context,
            physical,
            properties,
            features,
            queue_families: QueueFamilyIndices::default(),
        }
    }

    pub fn context(&self) -> &'a Context {
        self.context
    }

    pub fn handle(&self) -> vk::PhysicalDevice {
        self.physical
    }

    pub fn name(&self) -> String {
        fixed_name(&self.properties.device_name)
            .to_string_lossy()
            .into_owned()
    }

    pub fn device_type(&self) -> vk::PhysicalDeviceType {
        self.properties.device_type
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.features
    }

    pub fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        // SAFETY: handle belongs to the context's live instance.
        unsafe {
            self.context
                .ash_instance()
                .get_physical_device_memory_properties(self.physical)
        }
    }

    pub fn queue_family_properties(&self) -> Vec<vk::QueueFamilyProperties> {
        // SAFETY: as above.
        unsafe {
            self.context
                .ash_instance()
                .get_physical_device_queue_family_properties(self.physical)
        }
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        // SAFETY: as above.
        unsafe {
            self.context
                .ash_instance()
                .get_physical_device_format_properties(self.physical, format)
        }
    }

    pub fn extension_properties(&self) -> VkResult<Vec<vk::ExtensionProperties>> {
        // SAFETY: as above.
        unsafe {
            self.context
                .ash_instance()
                .enumerate_device_extension_properties(self.physical)
        }
        .map_err(VkError::query("device extensions"))
    }

    /// Score used for selection. Adapters lacking one of the context's device
    /// extensions score 0 like any other missing mandatory capability.
    pub fn suitability(&self) -> VkResult<u32> {
        let available = self.extension_properties()?;
        let missing = missing_extensions(&available, self.context.device_extensions());
        if !missing.is_empty() {
            debug!("adapter '{}' lacks {:?}", self.name(), missing);
            return Ok(0);
        }
        Ok(rate_suitability(&self.properties, &self.features))
    }

    /// Resolves and caches the graphics and present families against `surface`.
    pub fn find_queue_families(
        &mut self,
        surface: &PresentationSurface<'_>,
    ) -> VkResult<QueueFamilyIndices> {
        let families = self.queue_family_properties();
        let indices = scan_queue_families(&families, |index| {
            surface.supports_present(self.physical, index)
        })?;
        debug!(
            "adapter '{}': graphics={:?} present={:?}",
            self.name(),
            indices.graphics,
            indices.present
        );
        self.queue_families = indices;
        Ok(indices)
    }

    /// The cached scan result. Fails with `IncompleteQueueFamily` until
    /// `find_queue_families` resolved both families.
    pub fn queue_family_indices(&self) -> VkResult<QueueFamilyIndices> {
        self.queue_families.resolved()?;
        Ok(self.queue_families)
    }

    pub fn create_device(&'a self) -> VkResult<LogicalDevice<'a>> {
        let mut device = LogicalDevice::new(self);
        ember_render::GpuResource::create(&mut device)?;
        Ok(device)
    }
}

/// Scores every adapter and keeps the best one. An all-zero field is rejected.
pub fn select_adapter(adapters: Vec<Adapter<'_>>) -> VkResult<Adapter<'_>> {
    let mut scores = Vec::with_capacity(adapters.len());
    for adapter in &adapters {
        let score = adapter.suitability()?;
        debug!(
            "adapter '{}' ({:?}) scored {}",
            adapter.name(),
            adapter.device_type(),
            score
        );
        scores.push(score);
    }

    let Some(index) = best_score_index(&scores) else {
        return Err(VkError::DeviceSelection(format!(
            "{} adapter(s) enumerated, none scored above zero",
            adapters.len()
        )));
    };

    let mut adapters = adapters;
    let chosen = adapters.swap_remove(index);
    info!("selected adapter '{}' (score {})", chosen.name(), scores[index]);
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_char;

    fn props(kind: vk::PhysicalDeviceType, dim: u32) -> vk::PhysicalDeviceProperties {
        vk::PhysicalDeviceProperties {
            device_type: kind,
            limits: vk::PhysicalDeviceLimits {
                max_image_dimension3_d: dim,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn features(geometry: bool) -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures {
            geometry_shader: if geometry { vk::TRUE } else { vk::FALSE },
            ..Default::default()
        }
    }

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn extension(name: &str) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(name.bytes()) {
            *dst = src as c_char;
        }
        props
    }

    #[test]
    fn missing_geometry_shader_scores_zero() {
        let p = props(vk::PhysicalDeviceType::DISCRETE_GPU, 16384);
        assert_eq!(rate_suitability(&p, &features(false)), 0);
    }

    #[test]
    fn discrete_gets_bonus() {
        let discrete = props(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        let integrated = props(vk::PhysicalDeviceType::INTEGRATED_GPU, 4096);
        assert_eq!(rate_suitability(&discrete, &features(true)), 2048 + 8192);
        assert_eq!(rate_suitability(&integrated, &features(true)), 4096);
    }

    #[test]
    fn discrete_beats_integrated() {
        let scores = [
            rate_suitability(&props(vk::PhysicalDeviceType::INTEGRATED_GPU, 4096), &features(true)),
            rate_suitability(&props(vk::PhysicalDeviceType::DISCRETE_GPU, 8192), &features(true)),
        ];
        assert_eq!(best_score_index(&scores), Some(1));
    }

    #[test]
    fn all_zero_scores_select_nothing() {
        assert_eq!(best_score_index(&[0, 0, 0]), None);
        assert_eq!(best_score_index(&[]), None);
    }

    #[test]
    fn ties_go_to_first_enumerated() {
        assert_eq!(best_score_index(&[0, 500, 500, 100]), Some(1));
    }

    #[test]
    fn scan_finds_separate_families() {
        let families = [
            family(vk::QueueFlags::COMPUTE, 2),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 16),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let indices = scan_queue_families(&families, |i| Ok(i == 2)).unwrap();
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));
        assert!(indices.is_complete());
        assert_eq!(indices.resolved().unwrap(), (1, 2));
    }

    #[test]
    fn scan_allows_coinciding_families_and_stops_early() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let mut asked = Vec::new();
        let indices = scan_queue_families(&families, |i| {
            asked.push(i);
            Ok(true)
        })
        .unwrap();
        assert_eq!(indices.resolved().unwrap(), (0, 0));
        assert_eq!(asked, vec![0]);
    }

    #[test]
    fn scan_skips_families_without_queues() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 4),
        ];
        let indices = scan_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
    }

    #[test]
    fn scan_without_present_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let indices = scan_queue_families(&families, |_| Ok(false)).unwrap();
        assert!(!indices.is_complete());
        assert!(matches!(
            indices.resolved(),
            Err(VkError::IncompleteQueueFamily {
                graphics: Some(0),
                present: None
            })
        ));
    }

    #[test]
    fn scan_without_graphics_is_incomplete() {
        let families = [family(vk::QueueFlags::COMPUTE, 1)];
        let indices = scan_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics, None);
        assert!(indices.resolved().is_err());
    }

    #[test]
    fn default_indices_are_incomplete() {
        assert!(!QueueFamilyIndices::default().is_complete());
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let result = scan_queue_families(&families, |_| {
            Err(VkError::Query {
                what: "surface support",
                result: vk::Result::ERROR_SURFACE_LOST_KHR,
            })
        });
        assert!(matches!(result, Err(VkError::Query { .. })));
    }

    #[test]
    fn missing_extensions_lists_only_absent_names() {
        let available = [extension("VK_KHR_swapchain"), extension("VK_KHR_maintenance1")];
        let required = [c"VK_KHR_swapchain", c"VK_KHR_ray_query"];
        assert_eq!(missing_extensions(&available, &required), vec![c"VK_KHR_ray_query"]);
        assert!(missing_extensions(&available, &[c"VK_KHR_swapchain"]).is_empty());
    }
}
