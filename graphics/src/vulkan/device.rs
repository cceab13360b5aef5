//! Physical device selection, queue resolution and the logical device.
//!
//! Selection runs in two steps: [`gather_candidates`] snapshots what each
//! physical device reports into plain data, then [`select_device`] decides
//! over that data without touching the driver. The second step is what the
//! unit tests exercise.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;

use crate::error::{GraphicsError, QueueCapability};

use super::{InstanceHandle, Surface};

/// Queue capabilities a run mode needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRequirements {
    pub graphics: bool,
    pub compute: bool,
    pub present: bool,
}

impl QueueRequirements {
    /// Compute only.
    pub fn headless() -> Self {
        Self {
            graphics: false,
            compute: true,
            present: false,
        }
    }

    /// Graphics, compute and present.
    pub fn windowed() -> Self {
        Self {
            graphics: true,
            compute: true,
            present: true,
        }
    }

    fn required(&self) -> impl Iterator<Item = QueueCapability> + '_ {
        [
            (self.graphics, QueueCapability::Graphics),
            (self.compute, QueueCapability::Compute),
            (self.present, QueueCapability::Present),
        ]
        .into_iter()
        .filter_map(|(needed, cap)| needed.then_some(cap))
    }
}

/// Everything a device must offer to be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRequirements {
    pub queues: QueueRequirements,
    pub swapchain: bool,
    pub sampler_anisotropy: bool,
}

impl DeviceRequirements {
    pub fn headless() -> Self {
        Self {
            queues: QueueRequirements::headless(),
            swapchain: false,
            sampler_anisotropy: false,
        }
    }

    pub fn windowed() -> Self {
        Self {
            queues: QueueRequirements::windowed(),
            swapchain: true,
            sampler_anisotropy: true,
        }
    }
}

/// One queue family as reported by a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    /// Can present to the surface in use (always false headless).
    pub present: bool,
}

impl QueueFamilyInfo {
    fn supports(&self, cap: QueueCapability) -> bool {
        if self.queue_count == 0 {
            return false;
        }
        match cap {
            QueueCapability::Graphics => self.flags.contains(vk::QueueFlags::GRAPHICS),
            QueueCapability::Compute => self.flags.contains(vk::QueueFlags::COMPUTE),
            QueueCapability::Present => self.present,
        }
    }
}

/// Snapshot of a physical device taken before selection.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub families: Vec<QueueFamilyInfo>,
    pub has_swapchain: bool,
    pub sampler_anisotropy: bool,
}

/// Queue family indices chosen for each required capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedQueues {
    pub graphics: Option<u32>,
    pub compute: u32,
    pub present: Option<u32>,
}

impl ResolvedQueues {
    /// Distinct family indices, in first-use order.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);
        for family in [self.graphics, Some(self.compute), self.present]
            .into_iter()
            .flatten()
        {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// Scan queue families once and pick one index per required capability.
///
/// A family that satisfies every required capability at once wins over the
/// first-match-per-capability assignment. Families with no queues are
/// ignored.
pub fn resolve_queues(
    families: &[QueueFamilyInfo],
    requirements: QueueRequirements,
) -> Result<ResolvedQueues, GraphicsError> {
    let mut graphics = None;
    let mut compute = None;
    let mut present = None;
    let mut combined = None;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        if family.supports(QueueCapability::Graphics) {
            graphics.get_or_insert(index);
        }
        if family.supports(QueueCapability::Compute) {
            compute.get_or_insert(index);
        }
        if family.supports(QueueCapability::Present) {
            present.get_or_insert(index);
        }
        if combined.is_none() && requirements.required().all(|cap| family.supports(cap)) {
            combined = Some(index);
        }
    }

    if let Some(missing) = requirements.required().find(|cap| {
        match cap {
            QueueCapability::Graphics => graphics,
            QueueCapability::Compute => compute,
            QueueCapability::Present => present,
        }
        .is_none()
    }) {
        return Err(GraphicsError::IncompleteQueueSet { missing });
    }

    // Compute is always required, so it is resolved at this point.
    let compute = compute.ok_or(GraphicsError::IncompleteQueueSet {
        missing: QueueCapability::Compute,
    })?;

    Ok(match combined {
        Some(index) => ResolvedQueues {
            graphics: requirements.graphics.then_some(index),
            compute: index,
            present: requirements.present.then_some(index),
        },
        None => ResolvedQueues {
            graphics: graphics.filter(|_| requirements.graphics),
            compute,
            present: present.filter(|_| requirements.present),
        },
    })
}

/// Pick the first candidate meeting `requirements`.
///
/// Returns the candidate index and its resolved queues. When every candidate
/// was rejected for a missing queue capability, the error is
/// [`GraphicsError::IncompleteQueueSet`]; otherwise
/// [`GraphicsError::NoSuitableDevice`].
pub fn select_device(
    candidates: &[DeviceCandidate],
    requirements: DeviceRequirements,
) -> Result<(usize, ResolvedQueues), GraphicsError> {
    let mut first_queue_error = None;
    let mut other_rejection = false;

    for (index, candidate) in candidates.iter().enumerate() {
        if requirements.swapchain && !candidate.has_swapchain {
            log::debug!("Rejecting {}: no swapchain extension", candidate.name);
            other_rejection = true;
            continue;
        }
        if requirements.sampler_anisotropy && !candidate.sampler_anisotropy {
            log::debug!("Rejecting {}: no sampler anisotropy", candidate.name);
            other_rejection = true;
            continue;
        }
        match resolve_queues(&candidate.families, requirements.queues) {
            Ok(queues) => return Ok((index, queues)),
            Err(e) => {
                log::debug!("Rejecting {}: {}", candidate.name, e);
                first_queue_error.get_or_insert(e);
            }
        }
    }

    match first_queue_error {
        Some(e) if !other_rejection => Err(e),
        _ if candidates.is_empty() => Err(GraphicsError::NoSuitableDevice(
            "no Vulkan-capable GPU found".into(),
        )),
        _ => Err(GraphicsError::NoSuitableDevice(format!(
            "none of {} devices meets the requirements",
            candidates.len()
        ))),
    }
}

/// First memory type whose bit is set in `type_mask` and whose flags contain
/// `required`.
pub fn query_memory_type(
    memory_types: &[vk::MemoryType],
    type_mask: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, GraphicsError> {
    memory_types
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            *index < 32
                && type_mask & (1 << index) != 0
                && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
        .ok_or(GraphicsError::NoMatchingMemoryType {
            type_mask,
            required,
        })
}

/// Query each physical device for the data [`select_device`] needs.
pub fn gather_candidates(
    instance: &InstanceHandle,
    surface: Option<&Surface>,
) -> Result<Vec<DeviceCandidate>, GraphicsError> {
    let raw = instance.raw();
    let devices = unsafe { raw.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::NoSuitableDevice(format!("failed to enumerate physical devices: {e:?}"))
    })?;

    let mut candidates = Vec::with_capacity(devices.len());
    for handle in devices {
        let properties = unsafe { raw.get_physical_device_properties(handle) };
        let features = unsafe { raw.get_physical_device_features(handle) };
        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from("<unnamed>"));

        let mut families = Vec::new();
        for (index, family) in unsafe { raw.get_physical_device_queue_family_properties(handle) }
            .iter()
            .enumerate()
        {
            let present = match surface {
                Some(surface) => surface.supports_present(handle, index as u32)?,
                None => false,
            };
            families.push(QueueFamilyInfo {
                flags: family.queue_flags,
                queue_count: family.queue_count,
                present,
            });
        }

        let has_swapchain = unsafe { raw.enumerate_device_extension_properties(handle) }
            .map(|extensions| {
                extensions.iter().any(|ext| {
                    ext.extension_name_as_c_str()
                        .is_ok_and(|ext_name| ext_name == ash::khr::swapchain::NAME)
                })
            })
            .unwrap_or(false);

        log::info!(
            "Found GPU: {} (type: {:?}, {} queue families)",
            name,
            properties.device_type,
            families.len()
        );

        candidates.push(DeviceCandidate {
            handle,
            name,
            families,
            has_swapchain,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
        });
    }

    Ok(candidates)
}

/// A resolved queue: family index plus the queue handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSlot {
    pub family: u32,
    pub queue: vk::Queue,
}

/// Device limits the rest of the crate consults.
#[derive(Debug, Clone, Copy)]
pub struct DeviceLimits {
    pub non_coherent_atom_size: vk::DeviceSize,
    pub max_sampler_anisotropy: f32,
    pub max_compute_work_group_count: [u32; 3],
}

/// Instance, physical device, logical device and resolved queues.
///
/// Every buffer, image, pool and pipeline holds an `Arc<DeviceHandle>`, so the
/// logical device is only destroyed after the last of them is gone. The
/// memory allocator lives here too and is torn down just before the device.
pub struct DeviceHandle {
    instance: Arc<InstanceHandle>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    name: String,
    graphics: Option<QueueSlot>,
    compute: QueueSlot,
    present: Option<QueueSlot>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    limits: DeviceLimits,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    allocator: ManuallyDrop<Mutex<Allocator>>,
}

impl DeviceHandle {
    /// Select a physical device and create the logical device on it.
    ///
    /// Queues are resolved before anything else is created, so a device
    /// without the required capabilities never gets a buffer or image.
    pub fn new(
        instance: Arc<InstanceHandle>,
        surface: Option<&Surface>,
        requirements: DeviceRequirements,
    ) -> Result<Arc<Self>, GraphicsError> {
        let candidates = gather_candidates(&instance, surface)?;
        let (index, queues) = select_device(&candidates, requirements)?;
        let candidate = &candidates[index];
        let physical_device = candidate.handle;
        let raw_instance = instance.raw();

        log::info!(
            "Selected GPU: {} (queues: {:?})",
            candidate.name,
            queues
        );

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queues
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let mut device_extensions = Vec::new();
        if requirements.swapchain {
            device_extensions.push(ash::khr::swapchain::NAME.as_ptr());
        }
        let features =
            vk::PhysicalDeviceFeatures::default().sampler_anisotropy(requirements.sampler_anisotropy);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&features);

        let device = unsafe { raw_instance.create_device(physical_device, &create_info, None) }
            .map_err(|e| GraphicsError::creation("logical device", e))?;

        let slot = |family: u32| QueueSlot {
            family,
            queue: unsafe { device.get_device_queue(family, 0) },
        };
        let graphics = queues.graphics.map(slot);
        let compute = slot(queues.compute);
        let present = queues.present.map(slot);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: raw_instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(GraphicsError::creation("memory allocator", e));
            }
        };

        let memory_properties =
            unsafe { raw_instance.get_physical_device_memory_properties(physical_device) };
        let properties = unsafe { raw_instance.get_physical_device_properties(physical_device) };
        let limits = DeviceLimits {
            non_coherent_atom_size: properties.limits.non_coherent_atom_size.max(1),
            // Anisotropy is only usable when the feature was enabled.
            max_sampler_anisotropy: if requirements.sampler_anisotropy {
                properties.limits.max_sampler_anisotropy
            } else {
                1.0
            },
            max_compute_work_group_count: properties.limits.max_compute_work_group_count,
        };

        let swapchain_loader = requirements
            .swapchain
            .then(|| ash::khr::swapchain::Device::new(raw_instance, &device));

        Ok(Arc::new(Self {
            name: candidate.name.clone(),
            instance,
            physical_device,
            device,
            graphics,
            compute,
            present,
            memory_properties,
            limits,
            swapchain_loader,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
        }))
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &Arc<InstanceHandle> {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    pub fn compute_queue(&self) -> QueueSlot {
        self.compute
    }

    pub fn graphics_queue(&self) -> Option<QueueSlot> {
        self.graphics
    }

    pub fn present_queue(&self) -> Option<QueueSlot> {
        self.present
    }

    /// Queue used for one-shot transfers: graphics when available, since
    /// layout transitions to fragment-shader stages need it.
    pub fn transfer_queue(&self) -> QueueSlot {
        self.graphics.unwrap_or(self.compute)
    }

    pub(crate) fn swapchain_loader(&self) -> Result<&ash::khr::swapchain::Device, GraphicsError> {
        self.swapchain_loader.as_ref().ok_or_else(|| {
            GraphicsError::Configuration("device was created without swapchain support".into())
        })
    }

    pub(crate) fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// First memory type in `type_mask` whose flags contain `required`.
    pub fn query_memory_type(
        &self,
        type_mask: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32, GraphicsError> {
        let count = self.memory_properties.memory_type_count as usize;
        query_memory_type(
            &self.memory_properties.memory_types[..count],
            type_mask,
            required,
        )
    }

    /// First format in `candidates` supporting `features` with `tiling`.
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format, GraphicsError> {
        candidates
            .iter()
            .copied()
            .find(|&format| {
                let props = unsafe {
                    self.instance
                        .raw()
                        .get_physical_device_format_properties(self.physical_device, format)
                };
                let supported = match tiling {
                    vk::ImageTiling::LINEAR => props.linear_tiling_features,
                    _ => props.optimal_tiling_features,
                };
                supported.contains(features)
            })
            .ok_or_else(|| {
                GraphicsError::creation("format selection", format!("none of {candidates:?}"))
            })
    }

    pub fn find_depth_format(&self) -> Result<vk::Format, GraphicsError> {
        self.find_supported_format(
            &[
                vk::Format::D32_SFLOAT,
                vk::Format::D32_SFLOAT_S8_UINT,
                vk::Format::D24_UNORM_S8_UINT,
            ],
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    /// Block until every queue on the device is idle.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| GraphicsError::WaitFailed(format!("device wait idle: {e:?}")))
    }

    pub fn queue_wait_idle(&self, queue: vk::Queue) -> Result<(), GraphicsError> {
        unsafe { self.device.queue_wait_idle(queue) }
            .map_err(|e| GraphicsError::WaitFailed(format!("queue wait idle: {e:?}")))
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        log::debug!("Logical device destroyed");
    }
}
