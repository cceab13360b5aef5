//! Descriptor pools and descriptor-set writes.

use std::sync::Arc;

use ash::vk;

use crate::error::GraphicsError;
use crate::pipeline::{BindingDesc, BindingKind, Pipeline};
use crate::resources::{GpuBuffer, GpuImage, Sampler};
use crate::vulkan::DeviceHandle;

/// A resource to bind at one binding of a descriptor set.
pub enum DescriptorWrite<'a> {
    Buffer { binding: u32, buffer: &'a GpuBuffer },
    Texture { binding: u32, image: &'a GpuImage },
    Sampler { binding: u32, sampler: &'a Sampler },
}

impl DescriptorWrite<'_> {
    fn binding(&self) -> u32 {
        match self {
            Self::Buffer { binding, .. }
            | Self::Texture { binding, .. }
            | Self::Sampler { binding, .. } => *binding,
        }
    }

    fn accepts(&self, kind: BindingKind) -> bool {
        matches!(
            (self, kind),
            (
                Self::Buffer { .. },
                BindingKind::UniformBuffer | BindingKind::StorageBuffer
            ) | (Self::Texture { .. }, BindingKind::SampledTexture)
                | (Self::Sampler { .. }, BindingKind::Sampler)
        )
    }
}

/// Pool sized for `max_sets` sets of one binding list. Sets are released
/// with the pool.
pub struct DescriptorPool {
    device: Arc<DeviceHandle>,
    pool: vk::DescriptorPool,
}

/// Pool sizes for `max_sets` sets laid out as `bindings`.
fn pool_sizes(bindings: &[BindingDesc], max_sets: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in bindings {
        let ty = binding.kind.descriptor_type();
        match sizes.iter_mut().find(|s| s.ty == ty) {
            Some(size) => size.descriptor_count += max_sets,
            None => sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(ty)
                    .descriptor_count(max_sets),
            ),
        }
    }
    sizes
}

impl DescriptorPool {
    pub fn new(
        device: Arc<DeviceHandle>,
        bindings: &[BindingDesc],
        max_sets: u32,
    ) -> Result<Self, GraphicsError> {
        let sizes = pool_sizes(bindings, max_sets);
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&sizes)
            .max_sets(max_sets);
        let pool = unsafe { device.raw().create_descriptor_pool(&create_info, None) }
            .map_err(|e| GraphicsError::creation("descriptor pool", e))?;
        Ok(Self { device, pool })
    }

    /// Allocate one set against `pipeline`'s set layout.
    pub fn allocate(&self, pipeline: &Pipeline) -> Result<vk::DescriptorSet, GraphicsError> {
        let layouts = [pipeline.set_layout()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        unsafe { self.device.raw().allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| GraphicsError::creation(format!("{} descriptor set", pipeline.label()), e))?
            .into_iter()
            .next()
            .ok_or_else(|| GraphicsError::creation("descriptor set", "empty allocation"))
    }

    /// Point `set`'s bindings at the given resources.
    ///
    /// Each write is checked against the binding kinds `pipeline` declared.
    pub fn write(
        &self,
        set: vk::DescriptorSet,
        pipeline: &Pipeline,
        writes: &[DescriptorWrite<'_>],
    ) -> Result<(), GraphicsError> {
        for write in writes {
            let binding = write.binding();
            let desc = pipeline.binding(binding).ok_or_else(|| {
                GraphicsError::Configuration(format!(
                    "pipeline '{}' has no binding {binding}",
                    pipeline.label()
                ))
            })?;
            if !write.accepts(desc.kind) {
                return Err(GraphicsError::Configuration(format!(
                    "binding {binding} of '{}' is {:?}",
                    pipeline.label(),
                    desc.kind
                )));
            }

            let ty = desc.kind.descriptor_type();
            let base = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(binding)
                .dst_array_element(0)
                .descriptor_type(ty);

            match write {
                DescriptorWrite::Buffer { buffer, .. } => {
                    let info = [vk::DescriptorBufferInfo::default()
                        .buffer(buffer.raw())
                        .offset(0)
                        .range(vk::WHOLE_SIZE)];
                    let update = base.buffer_info(&info);
                    unsafe { self.device.raw().update_descriptor_sets(&[update], &[]) };
                }
                DescriptorWrite::Texture { image, .. } => {
                    let info = [vk::DescriptorImageInfo::default()
                        .image_view(image.view())
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
                    let update = base.image_info(&info);
                    unsafe { self.device.raw().update_descriptor_sets(&[update], &[]) };
                }
                DescriptorWrite::Sampler { sampler, .. } => {
                    let info = [vk::DescriptorImageInfo::default().sampler(sampler.raw())];
                    let update = base.image_info(&info);
                    unsafe { self.device.raw().update_descriptor_sets(&[update], &[]) };
                }
            }
        }
        Ok(())
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_descriptor_pool(self.pool, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sizes_merge_kinds() {
        let stages = vk::ShaderStageFlags::FRAGMENT;
        let bindings = [
            BindingDesc::new(0, BindingKind::UniformBuffer, stages),
            BindingDesc::new(1, BindingKind::SampledTexture, stages),
            BindingDesc::new(2, BindingKind::Sampler, stages),
            BindingDesc::new(3, BindingKind::UniformBuffer, stages),
        ];
        let sizes = pool_sizes(&bindings, 2);
        assert_eq!(sizes.len(), 3);
        let uniform = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER)
            .unwrap();
        assert_eq!(uniform.descriptor_count, 4);
    }

    #[test]
    fn test_pool_sizes_empty() {
        assert!(pool_sizes(&[], 1).is_empty());
    }
}
