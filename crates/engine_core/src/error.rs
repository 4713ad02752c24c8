// crates/engine_core/src/error.rs

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::gpu::{AllocatorId, ResourceId};

/// Failures reported by a [`crate::gpu::Device`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    #[error("failed to create resource '{label}': {reason}")]
    ResourceCreation { label: String, reason: String },

    #[error("invalid or released resource {0:?}")]
    InvalidResource(ResourceId),

    #[error("invalid descriptor handle {0:#x}")]
    InvalidDescriptor(u64),

    #[error("mapped write out of range on {resource:?}: {offset} + {len} > {size}")]
    MapOutOfRange {
        resource: ResourceId,
        offset: u64,
        len: u64,
        size: u64,
    },

    #[error("upload buffer slot {slot} out of range on {resource:?} (capacity {capacity})")]
    SlotOutOfRange {
        resource: ResourceId,
        slot: u32,
        capacity: u32,
    },

    #[error("resource {0:?} does not live in a CPU-visible heap")]
    NotMappable(ResourceId),

    #[error("command list must be closed before it is executed")]
    ListNotClosed,

    #[error("command allocator {0:?} reset while its commands are still in flight")]
    AllocatorInFlight(AllocatorId),

    #[error("unknown {kind} {id}")]
    UnknownObject { kind: &'static str, id: u32 },

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("fence watchdog expired waiting for {value} (completed {completed}) after {timeout:?}")]
    FenceTimeout {
        value: u64,
        completed: u64,
        timeout: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    #[error("reset called while a command list is already recording")]
    AlreadyRecording,

    #[error("no command list is recording; call reset first")]
    NotRecording,

    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("duplicate {kind} name '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("unknown {kind} '{name}'")]
    Unknown { kind: &'static str, name: String },

    #[error("{kind} constant-buffer slot {slot} is already taken")]
    SlotCollision { kind: &'static str, slot: u32 },

    #[error("{kind} constant-buffer slot {slot} is past the buffer's {capacity} slots")]
    SlotOutOfRange { kind: &'static str, slot: u32, capacity: u32 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShaderError {
    #[error("unknown shader file '{0}'")]
    UnknownFile(String),

    #[error("entry point '{entry}' not found in '{file}'")]
    EntryPointMissing { file: String, entry: String },

    #[error("unknown shader stage '{0}'")]
    UnknownStage(String),
}

#[derive(Debug, Error)]
pub enum TextureError {
    #[error("texture file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {err}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("invalid DDS file {}: {reason}", path.display())]
    InvalidDds { path: PathBuf, reason: String },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WaveError {
    #[error("wave grid {rows}x{cols} must be a multiple of 16 in both dimensions")]
    GridNotAligned { rows: u32, cols: u32 },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameGraphError {
    #[error("duplicate frame graph resource '{0}'")]
    DuplicateResource(&'static str),

    #[error("pass '{pass}' references unknown resource #{id}")]
    UnknownResource { pass: &'static str, id: u32 },

    #[error("pass '{pass}' reads '{resource}' before any pass writes it")]
    ReadBeforeWrite {
        pass: &'static str,
        resource: &'static str,
    },
}

/// Top-level error surfaced by the renderer.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error(transparent)]
    Texture(#[from] TextureError),

    #[error(transparent)]
    Wave(#[from] WaveError),

    #[error(transparent)]
    FrameGraph(#[from] FrameGraphError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("scene setup has not been finished")]
    SceneNotReady,

    #[error("scene setup is already finished")]
    SceneFinalized,
}

impl EngineError {
    /// True when the failure came from the device fence path, which has no
    /// local recovery.
    pub fn is_fatal_device(&self) -> bool {
        matches!(
            self,
            EngineError::Device(_) | EngineError::Queue(QueueError::Device(_))
        )
    }
}

/// Window and presentation failures from the platform runner.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("event loop: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    #[error("window creation: {0}")]
    Window(#[from] winit::error::OsError),

    #[error("surface creation: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("no compatible graphics adapter")]
    NoAdapter,

    #[error("device request: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("window surface: {0}")]
    Surface(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<DeviceError> for PlatformError {
    fn from(err: DeviceError) -> Self {
        PlatformError::Engine(err.into())
    }
}
