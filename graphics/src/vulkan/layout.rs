//! Image layout transitions.
//!
//! The set of supported transitions is closed: anything outside
//! [`transition_barrier`]'s table is rejected before a command is recorded.

use ash::vk;

use crate::error::GraphicsError;

/// Access masks and pipeline stages for one layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionBarrier {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Look up the barrier for `old -> new`.
pub fn transition_barrier(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<TransitionBarrier, GraphicsError> {
    use vk::ImageLayout as L;

    match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => Ok(TransitionBarrier {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => Ok(TransitionBarrier {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => Ok(TransitionBarrier {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        }),
        _ => Err(GraphicsError::UnsupportedTransition { old, new }),
    }
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

pub fn is_depth_format(format: vk::Format) -> bool {
    has_stencil(format)
        || matches!(
            format,
            vk::Format::D32_SFLOAT | vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32
        )
}

/// Aspect covered by views and barriers on an image of `format`.
pub fn aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if is_depth_format(format) {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUTS: [vk::ImageLayout; 8] = [
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::GENERAL,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::PRESENT_SRC_KHR,
    ];

    const SUPPORTED: [(vk::ImageLayout, vk::ImageLayout); 3] = [
        (
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ),
        (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ),
        (
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ),
    ];

    #[test]
    fn test_upload_transition() {
        let barrier = transition_barrier(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(barrier.src_access, vk::AccessFlags::empty());
        assert_eq!(barrier.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(barrier.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn test_shader_read_transition() {
        let barrier = transition_barrier(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(barrier.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(barrier.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_depth_transition() {
        let barrier = transition_barrier(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert!(barrier
            .dst_access
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert_eq!(
            barrier.dst_stage,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        );
    }

    #[test]
    fn test_every_other_pair_is_rejected() {
        for old in LAYOUTS {
            for new in LAYOUTS {
                let result = transition_barrier(old, new);
                if SUPPORTED.contains(&(old, new)) {
                    assert!(result.is_ok(), "{old:?} -> {new:?} should be supported");
                } else {
                    match result {
                        Err(GraphicsError::UnsupportedTransition { old: o, new: n }) => {
                            assert_eq!((o, n), (old, new));
                        }
                        other => panic!("{old:?} -> {new:?} gave {other:?}"),
                    }
                }
            }
        }
    }

    #[test]
    fn test_aspect_mask() {
        assert_eq!(
            aspect_mask(vk::Format::R8G8B8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            aspect_mask(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_mask(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }
}
