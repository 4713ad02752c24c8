// crates/engine_core/src/gpu/soft/mod.rs
//! Host-side reference implementation of [`Device`].
//!
//! A worker thread plays the GPU timeline: it receives submissions over a
//! channel and replays them strictly in order. Fence progress is published
//! through a mutex + condvar, and [`Device::wait_for_fence`] gives up after a
//! watchdog timeout instead of spinning forever.

mod executor;
mod kernels;
mod raster;
mod state;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::error::DeviceError;
use crate::gpu::{
    AllocatorId, Command, CommandList, CpuHandle, DescriptorHeap, DescriptorKind, DescriptorPair, Device,
    GpuAddress, GpuHandle, HeapId, HeapType, PipelineDesc, PipelineId, ResourceDesc, ResourceId, ResourceState,
    RootSignatureDesc, RootSignatureId, ViewDesc,
};

use self::state::{stride_for, InFlight, SoftHeap, SoftResource, SoftState, SHADER_VISIBLE_BIT};

#[derive(Copy, Clone, Debug, Default)]
pub struct SoftDeviceConfig {
    /// Keep every executed command for inspection.
    pub record_trace: bool,
    /// Keep a copy of the last presented back buffer.
    pub capture_presented: bool,
    /// Shade draws into their render targets instead of only validating them.
    pub rasterize: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidationError {
    pub submission: u64,
    pub message: String,
}

/// A host write into memory the device may still be reading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hazard {
    pub resource: ResourceId,
    pub label: String,
    /// Submission that still references the resource.
    pub submission: u64,
    pub completed_fence: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraceEntry {
    pub submission: u64,
    pub command: Command,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PresentedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub sequence: u64,
}

enum Submission {
    Execute { submission: u64, list: CommandList },
    Signal(u64),
    Present { resource: ResourceId },
    Shutdown,
}

#[derive(Default)]
struct Control {
    paused: bool,
    stalled: bool,
    shutting_down: bool,
}

struct Shared {
    state: Mutex<SoftState>,
    fence: Mutex<u64>,
    fence_cv: Condvar,
    control: Mutex<Control>,
    control_cv: Condvar,
    config: SoftDeviceConfig,
}

pub struct SoftDevice {
    shared: Arc<Shared>,
    tx: Sender<Submission>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SoftDevice {
    pub fn new(config: SoftDeviceConfig) -> Result<Self, DeviceError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(SoftState::default()),
            fence: Mutex::new(0),
            fence_cv: Condvar::new(),
            control: Mutex::new(Control::default()),
            control_cv: Condvar::new(),
            config,
        });
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("soft-gpu".into())
            .spawn(move || run_timeline(worker_shared, rx))
            .map_err(|e| DeviceError::DeviceLost(format!("failed to start device timeline: {e}")))?;
        info!(target: "gpu", "software device started");
        Ok(Self {
            shared,
            tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn send(&self, submission: Submission) -> Result<(), DeviceError> {
        self.tx
            .send(submission)
            .map_err(|_| DeviceError::DeviceLost("device timeline has exited".into()))
    }

    // --- TEST CONTROLS ---

    /// Holds the timeline before its next submission.
    pub fn pause(&self) {
        self.shared.control.lock().paused = true;
    }

    pub fn resume(&self) {
        self.shared.control.lock().paused = false;
        self.shared.control_cv.notify_all();
    }

    /// From now on no fence value is ever published again.
    pub fn stall(&self) {
        self.shared.control.lock().stalled = true;
    }

    // --- INSPECTION ---

    pub fn validation_errors(&self) -> Vec<ValidationError> {
        self.shared.state.lock().validation.clone()
    }

    pub fn hazards(&self) -> Vec<Hazard> {
        self.shared.state.lock().hazards.clone()
    }

    pub fn trace(&self) -> Vec<TraceEntry> {
        self.shared.state.lock().trace.clone()
    }

    pub fn clear_trace(&self) {
        self.shared.state.lock().trace.clear();
    }

    pub fn presented_image(&self) -> Option<PresentedImage> {
        self.shared.state.lock().presented.clone()
    }

    pub fn present_count(&self) -> u64 {
        self.shared.state.lock().present_count
    }

    pub fn draw_count(&self) -> u64 {
        self.shared.state.lock().draw_count
    }

    pub fn dispatch_count(&self) -> u64 {
        self.shared.state.lock().dispatch_count
    }

    pub fn submission_count(&self) -> u64 {
        self.shared.state.lock().submissions
    }

    /// Backing slots ever allocated, live or free.
    pub fn resource_slot_count(&self) -> usize {
        self.shared.state.lock().resources.len()
    }

    pub fn is_alive(&self, id: ResourceId) -> bool {
        self.shared.state.lock().resource(id).is_some()
    }

    /// State as last seen by the device timeline.
    pub fn resource_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.shared.state.lock().resource(id).map(|r| r.state)
    }

    /// Raw contents of any resource, including default-heap ones.
    pub fn read_resource(&self, id: ResourceId) -> Option<Vec<u8>> {
        self.shared.state.lock().resource(id).map(|r| r.data.clone())
    }

    pub fn read_texture_f32(&self, id: ResourceId) -> Option<Vec<f32>> {
        self.read_resource(id).map(|bytes| bytemuck::pod_collect_to_vec(&bytes))
    }

    /// Every descriptor slot of a live heap.
    pub fn heap_views(&self, heap: HeapId) -> Option<Vec<Option<ViewDesc>>> {
        self.shared.state.lock().heap(heap).map(|h| h.views.clone())
    }

    /// Resolves a CPU handle to its view, failing for stale handles.
    pub fn view_at(&self, handle: CpuHandle) -> Result<ViewDesc, String> {
        self.shared.state.lock().view_for_cpu(handle)
    }

    pub fn gpu_view_at(&self, handle: GpuHandle) -> Result<ViewDesc, String> {
        self.shared.state.lock().view_for_gpu(handle)
    }
}

impl Drop for SoftDevice {
    fn drop(&mut self) {
        {
            let mut control = self.shared.control.lock();
            control.paused = false;
            control.shutting_down = true;
        }
        self.shared.control_cv.notify_all();
        let _ = self.tx.send(Submission::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!(target: "gpu", "device timeline panicked");
            }
        }
    }
}

fn run_timeline(shared: Arc<Shared>, rx: Receiver<Submission>) {
    while let Ok(submission) = rx.recv() {
        {
            let mut control = shared.control.lock();
            while control.paused && !control.shutting_down {
                shared.control_cv.wait(&mut control);
            }
        }
        match submission {
            Submission::Execute { submission, list } => {
                let mut state = shared.state.lock();
                executor::execute_list(&mut state, submission, &list, &shared.config);
            }
            Submission::Signal(value) => {
                if shared.control.lock().stalled {
                    debug!(target: "gpu", value, "stalled: dropping fence signal");
                    continue;
                }
                let mut fence = shared.fence.lock();
                *fence = (*fence).max(value);
                shared.fence_cv.notify_all();
            }
            Submission::Present { resource } => present(&shared, resource),
            Submission::Shutdown => break,
        }
    }
    debug!(target: "gpu", "device timeline exiting");
}

fn present(shared: &Shared, resource: ResourceId) {
    let mut state = shared.state.lock();
    state.present_count += 1;
    let sequence = state.present_count;
    let captured = match state.resource(resource) {
        None => Err(format!("present of {}", state.label(resource))),
        Some(res) if res.state != ResourceState::Present => Err(format!(
            "back buffer '{}' presented while in {:?}",
            res.label, res.state
        )),
        Some(res) => Ok(PresentedImage {
            width: res.desc.width as u32,
            height: res.desc.height,
            rgba: if shared.config.capture_presented {
                res.data.clone()
            } else {
                Vec::new()
            },
            sequence,
        }),
    };
    match captured {
        Ok(image) => {
            if shared.config.capture_presented {
                state.presented = Some(image);
            }
        }
        Err(message) => state.validation_error(sequence, message),
    }
}

impl Device for SoftDevice {
    fn create_committed_resource(
        &self,
        heap: HeapType,
        desc: &ResourceDesc,
        initial_state: ResourceState,
        label: &str,
    ) -> Result<ResourceId, DeviceError> {
        let size = desc.byte_size();
        if size == 0 {
            return Err(DeviceError::ResourceCreation {
                label: label.to_string(),
                reason: "zero-sized resource".into(),
            });
        }
        if size > u64::from(u32::MAX) {
            return Err(DeviceError::ResourceCreation {
                label: label.to_string(),
                reason: format!("{size} bytes exceeds the addressable range"),
            });
        }
        let mut state = self.shared.state.lock();
        let id = state
            .insert_resource(SoftResource::new(*desc, heap, initial_state, vec![0; size as usize], label))
            .map_err(|reason| DeviceError::ResourceCreation {
                label: label.to_string(),
                reason,
            })?;
        debug!(target: "gpu", ?id, label, size, "resource created");
        Ok(id)
    }

    fn release_resource(&self, id: ResourceId) {
        if self.shared.state.lock().release_resource(id) {
            debug!(target: "gpu", ?id, "resource released");
        }
    }

    fn resource_desc(&self, id: ResourceId) -> Result<ResourceDesc, DeviceError> {
        self.shared
            .state
            .lock()
            .resource(id)
            .map(|r| r.desc)
            .ok_or(DeviceError::InvalidResource(id))
    }

    fn gpu_address(&self, id: ResourceId) -> Result<GpuAddress, DeviceError> {
        let state = self.shared.state.lock();
        state.resource(id).ok_or(DeviceError::InvalidResource(id))?;
        Ok(GpuAddress(u64::from(id.0) << 32))
    }

    fn write_mapped(&self, id: ResourceId, offset: u64, bytes: &[u8]) -> Result<(), DeviceError> {
        let completed = self.completed_fence();
        let mut state = self.shared.state.lock();
        state.in_flight.retain(|f| !f.retired(completed));

        let (label, size) = {
            let res = state.resource(id).ok_or(DeviceError::InvalidResource(id))?;
            if res.heap != HeapType::Upload {
                return Err(DeviceError::NotMappable(id));
            }
            (res.label.clone(), res.desc.byte_size())
        };
        let len = bytes.len() as u64;
        if offset + len > size {
            return Err(DeviceError::MapOutOfRange {
                resource: id,
                offset,
                len,
                size,
            });
        }

        let pending: Vec<u64> = state
            .in_flight
            .iter()
            .filter(|f| f.resources.contains(&id))
            .map(|f| f.submission)
            .collect();
        for submission in pending {
            error!(target: "gpu", label = %label, submission, completed, "host write into in-flight resource");
            state.hazards.push(Hazard {
                resource: id,
                label: label.clone(),
                submission,
                completed_fence: completed,
            });
        }

        if let Some(res) = state.resource_mut(id) {
            res.data[offset as usize..(offset + len) as usize].copy_from_slice(bytes);
        }
        Ok(())
    }

    fn read_mapped(&self, id: ResourceId, offset: u64, len: u64) -> Result<Vec<u8>, DeviceError> {
        let state = self.shared.state.lock();
        let res = state.resource(id).ok_or(DeviceError::InvalidResource(id))?;
        if res.heap == HeapType::Default {
            return Err(DeviceError::NotMappable(id));
        }
        let size = res.desc.byte_size();
        if offset + len > size {
            return Err(DeviceError::MapOutOfRange {
                resource: id,
                offset,
                len,
                size,
            });
        }
        Ok(res.data[offset as usize..(offset + len) as usize].to_vec())
    }

    fn create_descriptor_heap(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeap, DeviceError> {
        if capacity == 0 {
            return Err(DeviceError::ResourceCreation {
                label: format!("{kind:?} heap"),
                reason: "zero descriptors".into(),
            });
        }
        // Only CBV/SRV/UAV heaps may be shader visible.
        let shader_visible = shader_visible && kind == DescriptorKind::CbvSrvUav;
        let stride = stride_for(kind);
        let mut state = self.shared.state.lock();
        state.heaps.push(SoftHeap {
            kind,
            capacity,
            stride,
            shader_visible,
            views: vec![None; capacity as usize],
            alive: true,
        });
        let id = HeapId(state.heaps.len() as u32);
        let base = u64::from(id.0) << 32;
        Ok(DescriptorHeap {
            id,
            kind,
            capacity,
            shader_visible,
            start: DescriptorPair {
                cpu: CpuHandle(base),
                gpu: if shader_visible {
                    GpuHandle(base | SHADER_VISIBLE_BIT)
                } else {
                    GpuHandle::NULL
                },
                stride,
            },
        })
    }

    fn release_descriptor_heap(&self, heap: &DescriptorHeap) {
        if let Some(h) = self.shared.state.lock().heap_mut(heap.id) {
            h.alive = false;
            h.views.clear();
        }
    }

    fn descriptor_stride(&self, kind: DescriptorKind) -> u32 {
        stride_for(kind)
    }

    fn create_view(&self, view: &ViewDesc, dest: CpuHandle) -> Result<(), DeviceError> {
        let mut state = self.shared.state.lock();
        let (heap_id, slot) = state
            .decode_cpu(dest)
            .map_err(|_| DeviceError::InvalidDescriptor(dest.0))?;
        if let Some(res) = state::view_resource(view) {
            if state.resource(res).is_none() {
                return Err(DeviceError::InvalidResource(res));
            }
        }
        let heap = state
            .heap_mut(heap_id)
            .ok_or(DeviceError::InvalidDescriptor(dest.0))?;
        if heap.kind != view.kind() {
            return Err(DeviceError::InvalidDescriptor(dest.0));
        }
        heap.views[slot as usize] = Some(*view);
        Ok(())
    }

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> Result<RootSignatureId, DeviceError> {
        let mut state = self.shared.state.lock();
        state.root_signatures.push(desc.clone());
        Ok(RootSignatureId(state.root_signatures.len() as u32))
    }

    fn create_pipeline_state(&self, desc: &PipelineDesc) -> Result<PipelineId, DeviceError> {
        let mut state = self.shared.state.lock();
        let sig = desc.root_signature.0 as usize;
        if sig == 0 || sig > state.root_signatures.len() {
            return Err(DeviceError::UnknownObject {
                kind: "root signature",
                id: desc.root_signature.0,
            });
        }
        state.pipelines.push(desc.clone());
        Ok(PipelineId(state.pipelines.len() as u32))
    }

    fn create_command_allocator(&self) -> Result<AllocatorId, DeviceError> {
        let mut state = self.shared.state.lock();
        state.allocators += 1;
        Ok(AllocatorId(state.allocators))
    }

    fn reset_command_allocator(&self, id: AllocatorId) -> Result<(), DeviceError> {
        let completed = self.completed_fence();
        let mut state = self.shared.state.lock();
        if id.0 == 0 || id.0 > state.allocators {
            return Err(DeviceError::UnknownObject {
                kind: "command allocator",
                id: id.0,
            });
        }
        state.in_flight.retain(|f| !f.retired(completed));
        if let Some(busy) = state.in_flight.iter().find(|f| f.allocator == id).map(|f| f.submission) {
            state.validation_error(busy, format!("allocator {id:?} reset while submission {busy} is in flight"));
            return Err(DeviceError::AllocatorInFlight(id));
        }
        Ok(())
    }

    fn execute(&self, list: CommandList) -> Result<(), DeviceError> {
        if !list.is_closed() {
            return Err(DeviceError::ListNotClosed);
        }
        let submission = {
            let mut state = self.shared.state.lock();
            state.submissions += 1;
            let submission = state.submissions;
            let resources = state.referenced_resources(list.commands());
            state.in_flight.push(InFlight {
                submission,
                allocator: list.allocator(),
                resources,
                retire_at: None,
            });
            submission
        };
        self.send(Submission::Execute { submission, list })
    }

    fn signal(&self, value: u64) -> Result<(), DeviceError> {
        {
            let mut state = self.shared.state.lock();
            for f in state.in_flight.iter_mut().filter(|f| f.retire_at.is_none()) {
                f.retire_at = Some(value);
            }
        }
        self.send(Submission::Signal(value))
    }

    fn completed_fence(&self) -> u64 {
        *self.shared.fence.lock()
    }

    fn wait_for_fence(&self, value: u64, timeout: Duration) -> Result<(), DeviceError> {
        let deadline = Instant::now() + timeout;
        let mut fence = self.shared.fence.lock();
        while *fence < value {
            if self.shared.fence_cv.wait_until(&mut fence, deadline).timed_out() && *fence < value {
                error!(target: "gpu", value, completed = *fence, ?timeout, "fence watchdog expired");
                return Err(DeviceError::FenceTimeout {
                    value,
                    completed: *fence,
                    timeout,
                });
            }
        }
        Ok(())
    }

    fn present(&self, back_buffer: ResourceId, _sync_interval: u32) -> Result<(), DeviceError> {
        self.send(Submission::Present { resource: back_buffer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Barrier, CommandQueue, Format};

    fn device() -> Arc<SoftDevice> {
        Arc::new(
            SoftDevice::new(SoftDeviceConfig {
                record_trace: true,
                capture_presented: true,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    #[test]
    fn fences_complete_in_order() {
        let dev = device();
        let mut queue = CommandQueue::new(dev.clone(), Duration::from_secs(5));
        let alloc = dev.create_command_allocator().unwrap();
        queue.reset(alloc).unwrap();
        queue.execute().unwrap();
        let v = queue.signal().unwrap();
        queue.wait_for_fence(v).unwrap();
        assert!(dev.completed_fence() >= v);
        assert_eq!(dev.submission_count(), 1);
    }

    #[test]
    fn barrier_before_state_is_checked() {
        let dev = device();
        let tex = dev
            .create_committed_resource(
                HeapType::Default,
                &ResourceDesc::tex2d(Format::R32Float, 16, 16),
                ResourceState::Common,
                "tex",
            )
            .unwrap();
        let mut queue = CommandQueue::new(dev.clone(), Duration::from_secs(5));
        let alloc = dev.create_command_allocator().unwrap();
        queue.reset(alloc).unwrap();
        queue.list().unwrap().resource_barrier(&[Barrier::transition(
            tex,
            ResourceState::GenericRead,
            ResourceState::CopyDest,
        )]);
        queue.execute().unwrap();
        queue.flush().unwrap();

        let errors = dev.validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("before=GenericRead"));
        assert_eq!(dev.resource_state(tex), Some(ResourceState::CopyDest));
    }

    #[test]
    fn stuck_fence_hits_the_watchdog() {
        let dev = device();
        dev.stall();
        dev.signal(1).unwrap();
        let err = dev.wait_for_fence(1, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, DeviceError::FenceTimeout { value: 1, completed: 0, .. }));
    }

    #[test]
    fn write_into_in_flight_resource_is_a_hazard() {
        let dev = device();
        let buf = dev
            .create_committed_resource(HeapType::Upload, &ResourceDesc::buffer(256), ResourceState::GenericRead, "cb")
            .unwrap();
        let dst = dev
            .create_committed_resource(HeapType::Default, &ResourceDesc::buffer(256), ResourceState::CopyDest, "dst")
            .unwrap();
        let mut queue = CommandQueue::new(dev.clone(), Duration::from_secs(5));
        let alloc = dev.create_command_allocator().unwrap();

        dev.pause();
        queue.reset(alloc).unwrap();
        queue.list().unwrap().copy_buffer_region(dst, 0, buf, 0, 256);
        queue.execute().unwrap();
        let v = queue.signal().unwrap();

        dev.write_mapped(buf, 0, &[1; 16]).unwrap();
        assert_eq!(dev.hazards().len(), 1);

        dev.resume();
        queue.wait_for_fence(v).unwrap();
        dev.write_mapped(buf, 0, &[2; 16]).unwrap();
        assert_eq!(dev.hazards().len(), 1);
    }

    #[test]
    fn allocator_reset_while_in_flight_is_rejected() {
        let dev = device();
        let alloc = dev.create_command_allocator().unwrap();
        dev.pause();
        let mut list = CommandList::new(alloc);
        list.close();
        dev.execute(list).unwrap();
        dev.signal(1).unwrap();
        assert_eq!(dev.reset_command_allocator(alloc), Err(DeviceError::AllocatorInFlight(alloc)));
        dev.resume();
        dev.wait_for_fence(1, Duration::from_secs(5)).unwrap();
        assert!(dev.reset_command_allocator(alloc).is_ok());
    }

    #[test]
    fn released_heap_invalidates_handles() {
        let dev = device();
        let heap = dev.create_descriptor_heap(DescriptorKind::CbvSrvUav, 4, true).unwrap();
        let tex = dev
            .create_committed_resource(
                HeapType::Default,
                &ResourceDesc::tex2d(Format::R32Float, 16, 16),
                ResourceState::GenericRead,
                "tex",
            )
            .unwrap();
        dev.create_view(
            &ViewDesc::Srv {
                resource: tex,
                format: Format::R32Float,
            },
            heap.slot(2).cpu,
        )
        .unwrap();
        assert!(dev.gpu_view_at(heap.slot(2).gpu).is_ok());
        dev.release_descriptor_heap(&heap);
        assert!(dev.gpu_view_at(heap.slot(2).gpu).is_err());
    }

    #[test]
    fn released_slots_are_reused_under_a_fresh_id() {
        let dev = device();
        let desc = ResourceDesc::buffer(64);
        let first = dev
            .create_committed_resource(HeapType::Upload, &desc, ResourceState::GenericRead, "first")
            .unwrap();
        let first_address = dev.gpu_address(first).unwrap();
        dev.release_resource(first);

        let second = dev
            .create_committed_resource(HeapType::Upload, &desc, ResourceState::GenericRead, "second")
            .unwrap();
        assert_ne!(second, first);
        assert_eq!(dev.resource_slot_count(), 1);
        assert!(!dev.is_alive(first));
        assert!(dev.is_alive(second));
        assert_ne!(dev.gpu_address(second).unwrap(), first_address);
        assert_eq!(dev.write_mapped(first, 0, &[1; 4]), Err(DeviceError::InvalidResource(first)));

        // Releasing the stale id again must not free the new occupant.
        dev.release_resource(first);
        assert!(dev.is_alive(second));
        dev.write_mapped(second, 0, &[7; 4]).unwrap();
        assert_eq!(&dev.read_resource(second).unwrap()[..4], &[7; 4]);
    }

    #[test]
    fn unclosed_list_is_rejected() {
        let dev = device();
        let alloc = dev.create_command_allocator().unwrap();
        assert_eq!(dev.execute(CommandList::new(alloc)), Err(DeviceError::ListNotClosed));
    }
}
