//! Graphics error types.

use ash::vk;
use thiserror::Error;

/// Queue capability that device selection can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueCapability {
    Graphics,
    Compute,
    Present,
}

impl std::fmt::Display for QueueCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
            Self::Present => "present",
        };
        f.write_str(name)
    }
}

/// Cache maintenance on a host mapping of non-coherent memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSyncOp {
    Flush,
    Invalidate,
}

impl std::fmt::Display for HostSyncOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Flush => "flush",
            Self::Invalidate => "invalidate",
        })
    }
}

/// Errors that can occur in the graphics system.
///
/// Only [`GraphicsError::SurfaceOutOfDate`] and
/// [`GraphicsError::SurfaceSuboptimal`] are recoverable; they are consumed by
/// the presentation state machine and never escape a frame.
#[derive(Debug, Error)]
pub enum GraphicsError {
    /// A required layer or extension is missing, or the loader is absent.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no suitable device: {0}")]
    NoSuitableDevice(String),

    #[error("incomplete queue set: no queue family supports {missing}")]
    IncompleteQueueSet { missing: QueueCapability },

    #[error("no memory type matches mask {type_mask:#b} with properties {required:?}")]
    NoMatchingMemoryType {
        type_mask: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("failed to create {what}: {reason}")]
    ResourceCreation { what: String, reason: String },

    #[error("unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("command recording failed: {0}")]
    Recording(String),

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("wait failed: {0}")]
    WaitFailed(String),

    /// Mapping was requested on memory the host cannot see.
    #[error("allocation '{0}' is not host visible")]
    NotHostVisible(String),

    /// Flushing or invalidating a host mapping failed.
    #[error("host {operation} of '{label}' failed: {reason}")]
    HostSync {
        label: String,
        operation: HostSyncOp,
        reason: String,
    },

    #[error("surface out of date")]
    SurfaceOutOfDate,

    #[error("surface suboptimal")]
    SurfaceSuboptimal,

    #[error("presentation failed: {0}")]
    Presentation(String),

    #[error("failed to load shader: {0}")]
    ShaderLoad(String),
}

impl GraphicsError {
    /// Shorthand for a [`GraphicsError::ResourceCreation`] built from a driver
    /// result.
    pub fn creation(what: impl Into<String>, reason: impl std::fmt::Debug) -> Self {
        Self::ResourceCreation {
            what: what.into(),
            reason: format!("{reason:?}"),
        }
    }

    /// Shorthand for a [`GraphicsError::HostSync`] built from a driver result.
    pub fn host_sync(
        label: impl Into<String>,
        operation: HostSyncOp,
        reason: impl std::fmt::Debug,
    ) -> Self {
        Self::HostSync {
            label: label.into(),
            operation,
            reason: format!("{reason:?}"),
        }
    }

    /// Whether the presentation path can recover from this error by
    /// rebuilding the swap surface.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SurfaceOutOfDate | Self::SurfaceSuboptimal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::IncompleteQueueSet {
            missing: QueueCapability::Compute,
        };
        assert_eq!(
            err.to_string(),
            "incomplete queue set: no queue family supports compute"
        );

        let err = GraphicsError::creation("staging buffer", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(err.to_string().contains("staging buffer"));
        assert!(err.to_string().contains("ERROR_OUT_OF_DEVICE_MEMORY"));
    }

    #[test]
    fn test_host_sync_error() {
        let err = GraphicsError::host_sync(
            "uniforms",
            HostSyncOp::Invalidate,
            vk::Result::ERROR_MEMORY_MAP_FAILED,
        );
        assert_eq!(
            err.to_string(),
            "host invalidate of 'uniforms' failed: ERROR_MEMORY_MAP_FAILED"
        );
        assert!(!err.is_transient());
        assert!(matches!(
            err,
            GraphicsError::HostSync {
                operation: HostSyncOp::Invalidate,
                ..
            }
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(GraphicsError::SurfaceOutOfDate.is_transient());
        assert!(GraphicsError::SurfaceSuboptimal.is_transient());
        assert!(!GraphicsError::Presentation("lost".into()).is_transient());
        assert!(!GraphicsError::UnsupportedTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        }
        .is_transient());
    }
}
