// crates/engine_core/src/gpu/queue.rs

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::command::{AllocatorId, CommandList};
use super::device::Device;
use crate::error::QueueError;

/// Host-side counters, mostly for tests and the frame report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub submissions: u64,
    pub signals: u64,
    /// Every fence value the host actually blocked on, in order.
    pub waits: Vec<u64>,
}

/// One DIRECT command list, a monotonically increasing fence and the
/// submission endpoint of a [`Device`].
pub struct CommandQueue {
    device: Arc<dyn Device>,
    recording: Option<CommandList>,
    fence: u64,
    timeout: Duration,
    stats: QueueStats,
}

impl CommandQueue {
    pub fn new(device: Arc<dyn Device>, fence_timeout: Duration) -> Self {
        Self {
            device,
            recording: None,
            fence: 0,
            timeout: fence_timeout,
            stats: QueueStats::default(),
        }
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Resets `allocator` and starts recording on it.
    pub fn reset(&mut self, allocator: AllocatorId) -> Result<(), QueueError> {
        if self.recording.is_some() {
            return Err(QueueError::AlreadyRecording);
        }
        self.device.reset_command_allocator(allocator)?;
        self.recording = Some(CommandList::new(allocator));
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// The list currently being recorded.
    pub fn list(&mut self) -> Result<&mut CommandList, QueueError> {
        self.recording.as_mut().ok_or(QueueError::NotRecording)
    }

    /// Closes the current list and submits it.
    pub fn execute(&mut self) -> Result<(), QueueError> {
        let mut list = self.recording.take().ok_or(QueueError::NotRecording)?;
        list.close();
        trace!(target: "gpu", commands = list.commands().len(), "execute");
        self.device.execute(list)?;
        self.stats.submissions += 1;
        Ok(())
    }

    pub fn signal(&mut self) -> Result<u64, QueueError> {
        self.fence += 1;
        self.device.signal(self.fence)?;
        self.stats.signals += 1;
        Ok(self.fence)
    }

    /// Last value handed out by [`CommandQueue::signal`].
    pub fn current_fence(&self) -> u64 {
        self.fence
    }

    pub fn completed_fence(&self) -> u64 {
        self.device.completed_fence()
    }

    pub fn wait_for_fence(&mut self, value: u64) -> Result<(), QueueError> {
        if self.device.completed_fence() >= value {
            return Ok(());
        }
        debug!(target: "gpu", value, completed = self.device.completed_fence(), "waiting for fence");
        self.stats.waits.push(value);
        self.device.wait_for_fence(value, self.timeout)?;
        Ok(())
    }

    /// Signal, then block until the device has caught up.
    pub fn flush(&mut self) -> Result<(), QueueError> {
        let value = self.signal()?;
        self.wait_for_fence(value)
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}
