// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
An in-memory copy device.

Resources are plain byte vectors. Command lists are executed by a simulated queue thread, in
submission order, and fences are signalled from that thread once everything submitted before
them has run. Waiting on a fence blocks on a condition variable.

The device enforces the same rules a debug layer would: alignment of placed texture regions,
bounds of buffer copies, and the state each transition claims a resource is in.
*/

use crate::bittricks::{align_up, is_aligned};
use crate::error::DeviceError;
use crate::imp::{
    CopyAlignment, CopyBackend, ResourceState, StagingSlice, SubresourceFootprint, Transition,
};
use crate::task::TextureSegment;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Size of one copy block of a texel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TexelBlock {
    pub width: u32,
    pub height: u32,
    pub bytes: u32,
}

impl TexelBlock {
    pub const R8: TexelBlock = TexelBlock {
        width: 1,
        height: 1,
        bytes: 1,
    };
    pub const RGBA8: TexelBlock = TexelBlock {
        width: 1,
        height: 1,
        bytes: 4,
    };
    /// 4x4 blocks of 8 bytes.
    pub const BC1: TexelBlock = TexelBlock {
        width: 4,
        height: 4,
        bytes: 8,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    /// Array layers are separate subresources.
    D2,
    /// Depth slices belong to one subresource per mip.
    D3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub mip_level_count: u32,
    pub dimension: TextureDimension,
    pub block: TexelBlock,
}

impl TextureDescriptor {
    pub fn new_2d(width: u32, height: u32, block: TexelBlock) -> Self {
        TextureDescriptor {
            width,
            height,
            depth_or_array_layers: 1,
            mip_level_count: 1,
            dimension: TextureDimension::D2,
            block,
        }
    }

    /// Number of subresources, in mip-major order: `mip + layer * mip_level_count`.
    pub fn subresource_count(&self) -> u32 {
        match self.dimension {
            TextureDimension::D2 => self.mip_level_count * self.depth_or_array_layers,
            TextureDimension::D3 => self.mip_level_count,
        }
    }

    fn subresource_size(&self, subresource: u32) -> (u32, u32, u32) {
        let mip = subresource % self.mip_level_count;
        let width = (self.width >> mip).max(1);
        let height = (self.height >> mip).max(1);
        let depth = match self.dimension {
            TextureDimension::D2 => 1,
            TextureDimension::D3 => (self.depth_or_array_layers >> mip).max(1),
        };
        (width, height, depth)
    }
}

struct Subresource {
    rows: u32,
    row_bytes: u64,
    depth: u32,
    data: Vec<u8>,
    state: ResourceState,
}

struct TextureInner {
    descriptor: TextureDescriptor,
    label: String,
    subresources: Mutex<Vec<Subresource>>,
}

/// A texture in host memory. Clones share storage.
#[derive(Clone)]
pub struct SoftwareTexture {
    inner: Arc<TextureInner>,
}

impl Debug for SoftwareTexture {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareTexture")
            .field("label", &self.inner.label)
            .field("descriptor", &self.inner.descriptor)
            .finish()
    }
}

impl SoftwareTexture {
    pub fn descriptor(&self) -> TextureDescriptor {
        self.inner.descriptor
    }

    /// Tightly packed block rows of one subresource.
    pub fn subresource_contents(&self, subresource: u32) -> Vec<u8> {
        self.inner.subresources.lock().unwrap()[subresource as usize]
            .data
            .clone()
    }

    pub fn state(&self, subresource: u32) -> ResourceState {
        self.inner.subresources.lock().unwrap()[subresource as usize].state
    }
}

struct BufferInner {
    label: String,
    bytes: Mutex<Vec<u8>>,
    state: Mutex<ResourceState>,
}

/// A buffer in host memory. Clones share storage.
#[derive(Clone)]
pub struct SoftwareBuffer {
    inner: Arc<BufferInner>,
}

impl Debug for SoftwareBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareBuffer")
            .field("label", &self.inner.label)
            .field("len", &self.len())
            .finish()
    }
}

impl SoftwareBuffer {
    pub fn len(&self) -> u64 {
        self.inner.bytes.lock().unwrap().len() as u64
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn contents(&self) -> Vec<u8> {
        self.inner.bytes.lock().unwrap().clone()
    }
    pub fn state(&self) -> ResourceState {
        *self.inner.state.lock().unwrap()
    }
}

/// Device-side staging memory. The arena's bytes are captured as commands are recorded.
#[derive(Debug)]
pub struct SoftwareStaging {
    capacity: u64,
}

impl SoftwareStaging {
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

enum Command {
    CopyBuffer {
        destination: SoftwareBuffer,
        offset: u64,
        bytes: Vec<u8>,
    },
    CopyTexture {
        destination: SoftwareTexture,
        segment: TextureSegment,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListState {
    Initial,
    Recording,
    Closed,
}

pub struct SoftwareCommandList {
    label: String,
    state: ListState,
    commands: Vec<Command>,
}

impl Debug for SoftwareCommandList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareCommandList")
            .field("label", &self.label)
            .field("state", &self.state)
            .field("commands", &self.commands.len())
            .finish()
    }
}

struct FenceInner {
    value: Mutex<u64>,
    changed: Condvar,
}

#[derive(Clone)]
pub struct SoftwareFence {
    inner: Arc<FenceInner>,
}

impl Debug for SoftwareFence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareFence")
            .field("value", &*self.inner.value.lock().unwrap())
            .finish()
    }
}

enum QueueItem {
    Execute(Vec<Command>),
    Signal(Arc<FenceInner>, u64),
}

struct DeviceInner {
    alignment: CopyAlignment,
    lost: AtomicBool,
    executed_lists: Arc<AtomicU64>,
    latency_micros: Arc<AtomicU64>,
    queue: Mutex<Option<Sender<QueueItem>>>,
    queue_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        self.queue.get_mut().unwrap().take();
        if let Some(thread) = self.queue_thread.get_mut().unwrap().take() {
            let _ = thread.join();
        }
    }
}

/// The device itself. Clones share one queue.
#[derive(Clone)]
pub struct SoftwareDevice {
    inner: Arc<DeviceInner>,
}

impl Debug for SoftwareDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareDevice")
            .field("alignment", &self.inner.alignment)
            .field("lost", &self.inner.lost.load(Ordering::Relaxed))
            .field("executed_lists", &self.executed_lists())
            .finish()
    }
}

fn run_queue(
    receiver: mpsc::Receiver<QueueItem>,
    executed_lists: Arc<AtomicU64>,
    latency_micros: Arc<AtomicU64>,
) {
    while let Ok(item) = receiver.recv() {
        match item {
            QueueItem::Execute(commands) => {
                let latency = latency_micros.load(Ordering::Relaxed);
                if latency > 0 {
                    std::thread::sleep(Duration::from_micros(latency));
                }
                for command in commands {
                    run_command(command);
                }
                executed_lists.fetch_add(1, Ordering::Relaxed);
            }
            QueueItem::Signal(fence, value) => {
                let mut current = fence.value.lock().unwrap();
                *current = (*current).max(value);
                fence.changed.notify_all();
            }
        }
    }
}

fn run_command(command: Command) {
    match command {
        Command::CopyBuffer {
            destination,
            offset,
            bytes,
        } => {
            let mut target = destination.inner.bytes.lock().unwrap();
            target[offset as usize..offset as usize + bytes.len()].copy_from_slice(&bytes);
        }
        Command::CopyTexture {
            destination,
            segment,
            bytes,
        } => {
            let block_height = destination.inner.descriptor.block.height;
            let mut subresources = destination.inner.subresources.lock().unwrap();
            let target = &mut subresources[segment.subresource as usize];
            let first_row = segment.origin[1] / block_height;
            for s in 0..segment.slices {
                for r in 0..segment.rows {
                    let staged = ((s * segment.rows + r) as u64 * segment.row_pitch) as usize;
                    let slice = (segment.origin[2] + s) as u64;
                    let row = (first_row + r) as u64;
                    let to = ((slice * target.rows as u64 + row) * target.row_bytes) as usize;
                    let len = segment.row_bytes as usize;
                    target.data[to..to + len].copy_from_slice(&bytes[staged..staged + len]);
                }
            }
        }
    }
}

impl SoftwareDevice {
    pub fn new() -> Result<Self, DeviceError> {
        Self::with_alignment(CopyAlignment::D3D12)
    }

    /// Starts the simulated copy queue thread.
    pub fn with_alignment(alignment: CopyAlignment) -> Result<Self, DeviceError> {
        let (sender, receiver) = mpsc::channel();
        let executed_lists = Arc::new(AtomicU64::new(0));
        let latency_micros = Arc::new(AtomicU64::new(0));
        let thread = {
            let executed_lists = executed_lists.clone();
            let latency_micros = latency_micros.clone();
            std::thread::Builder::new()
                .name("software copy queue".to_string())
                .spawn(move || run_queue(receiver, executed_lists, latency_micros))
                .map_err(|e| {
                    DeviceError::Backend(format!("Can't spawn software copy queue {e}"))
                })?
        };
        Ok(SoftwareDevice {
            inner: Arc::new(DeviceInner {
                alignment,
                lost: AtomicBool::new(false),
                executed_lists,
                latency_micros,
                queue: Mutex::new(Some(sender)),
                queue_thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Delays every executed command list, to make copies visibly asynchronous.
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_micros
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// While lost, every device operation fails with [`DeviceError::Lost`].
    pub fn set_lost(&self, lost: bool) {
        self.inner.lost.store(lost, Ordering::Release);
    }

    /// Command lists the queue has finished.
    pub fn executed_lists(&self) -> u64 {
        self.inner.executed_lists.load(Ordering::Relaxed)
    }

    pub fn create_buffer(&self, len: u64) -> SoftwareBuffer {
        self.create_buffer_labeled(len, "buffer")
    }

    pub fn create_buffer_labeled(&self, len: u64, label: &str) -> SoftwareBuffer {
        SoftwareBuffer {
            inner: Arc::new(BufferInner {
                label: label.to_string(),
                bytes: Mutex::new(vec![0; len as usize]),
                state: Mutex::new(ResourceState::Common),
            }),
        }
    }

    pub fn create_texture(&self, descriptor: TextureDescriptor, label: &str) -> SoftwareTexture {
        let block = descriptor.block;
        let subresources = (0..descriptor.subresource_count())
            .map(|index| {
                let (width, height, depth) = descriptor.subresource_size(index);
                let rows = height.div_ceil(block.height);
                let row_bytes = width.div_ceil(block.width) as u64 * block.bytes as u64;
                Subresource {
                    rows,
                    row_bytes,
                    depth,
                    data: vec![0; (row_bytes * rows as u64 * depth as u64) as usize],
                    state: ResourceState::Common,
                }
            })
            .collect();
        SoftwareTexture {
            inner: Arc::new(TextureInner {
                descriptor,
                label: label.to_string(),
                subresources: Mutex::new(subresources),
            }),
        }
    }

    fn check(&self) -> Result<(), DeviceError> {
        if self.inner.lost.load(Ordering::Acquire) {
            Err(DeviceError::Lost)
        } else {
            Ok(())
        }
    }

    fn submit(&self, item: QueueItem) -> Result<(), DeviceError> {
        let queue = self.inner.queue.lock().unwrap();
        queue
            .as_ref()
            .ok_or(DeviceError::Lost)?
            .send(item)
            .map_err(|_| DeviceError::Lost)
    }
}

fn recording(list: &SoftwareCommandList) -> Result<(), DeviceError> {
    if list.state == ListState::Recording {
        Ok(())
    } else {
        Err(DeviceError::InvalidState(format!(
            "command list {} is not open for recording",
            list.label
        )))
    }
}

fn check_staged(staging: &SoftwareStaging, source: &StagingSlice<'_>) -> Result<(), DeviceError> {
    if source.offset + source.bytes.len() as u64 > staging.capacity {
        return Err(DeviceError::InvalidState(format!(
            "staged region {}..{} outside {} byte staging",
            source.offset,
            source.offset + source.bytes.len() as u64,
            staging.capacity
        )));
    }
    Ok(())
}

impl CopyBackend for SoftwareDevice {
    type Buffer = SoftwareBuffer;
    type Texture = SoftwareTexture;
    type Staging = SoftwareStaging;
    type CommandList = SoftwareCommandList;
    type Fence = SoftwareFence;

    fn alignment(&self) -> CopyAlignment {
        self.inner.alignment
    }

    fn create_staging(&self, capacity: u64, _label: &str) -> Result<SoftwareStaging, DeviceError> {
        self.check()?;
        Ok(SoftwareStaging { capacity })
    }

    fn create_command_list(&self, label: &str) -> Result<SoftwareCommandList, DeviceError> {
        self.check()?;
        Ok(SoftwareCommandList {
            label: label.to_string(),
            state: ListState::Initial,
            commands: Vec::new(),
        })
    }

    fn create_fence(&self, initial_value: u64) -> Result<SoftwareFence, DeviceError> {
        self.check()?;
        Ok(SoftwareFence {
            inner: Arc::new(FenceInner {
                value: Mutex::new(initial_value),
                changed: Condvar::new(),
            }),
        })
    }

    fn copyable_footprints(
        &self,
        texture: &SoftwareTexture,
        first_subresource: u32,
        count: u32,
    ) -> Result<Vec<SubresourceFootprint>, DeviceError> {
        self.check()?;
        let descriptor = texture.inner.descriptor;
        if first_subresource + count > descriptor.subresource_count() {
            return Err(DeviceError::InvalidState(format!(
                "subresources {first_subresource}..{} out of range for {}",
                first_subresource + count,
                texture.inner.label
            )));
        }
        let subresources = texture.inner.subresources.lock().unwrap();
        Ok((first_subresource..first_subresource + count)
            .map(|index| {
                let (width, height, depth) = descriptor.subresource_size(index);
                let subresource = &subresources[index as usize];
                SubresourceFootprint {
                    subresource: index,
                    width,
                    height,
                    depth,
                    block_height: descriptor.block.height,
                    rows: subresource.rows,
                    row_bytes: subresource.row_bytes,
                    row_pitch: align_up(subresource.row_bytes, self.inner.alignment.row_pitch),
                }
            })
            .collect())
    }

    fn reset(&self, list: &mut SoftwareCommandList) -> Result<(), DeviceError> {
        self.check()?;
        list.commands.clear();
        list.state = ListState::Recording;
        Ok(())
    }

    fn transition_buffer(
        &self,
        list: &mut SoftwareCommandList,
        buffer: &SoftwareBuffer,
        transition: Transition,
    ) -> Result<(), DeviceError> {
        self.check()?;
        recording(list)?;
        let mut state = buffer.inner.state.lock().unwrap();
        if *state != transition.before {
            return Err(DeviceError::InvalidState(format!(
                "{} is in {:?}, not {:?}",
                buffer.inner.label, *state, transition.before
            )));
        }
        *state = transition.after;
        Ok(())
    }

    fn transition_texture(
        &self,
        list: &mut SoftwareCommandList,
        texture: &SoftwareTexture,
        first_subresource: u32,
        count: u32,
        transition: Transition,
    ) -> Result<(), DeviceError> {
        self.check()?;
        recording(list)?;
        let mut subresources = texture.inner.subresources.lock().unwrap();
        let range = first_subresource as usize..(first_subresource + count) as usize;
        if let Some((index, wrong)) = subresources[range.clone()]
            .iter()
            .enumerate()
            .find(|(_, s)| s.state != transition.before)
        {
            return Err(DeviceError::InvalidState(format!(
                "{} subresource {} is in {:?}, not {:?}",
                texture.inner.label,
                first_subresource as usize + index,
                wrong.state,
                transition.before
            )));
        }
        for subresource in &mut subresources[range] {
            subresource.state = transition.after;
        }
        Ok(())
    }

    fn copy_buffer_region(
        &self,
        list: &mut SoftwareCommandList,
        staging: &SoftwareStaging,
        source: StagingSlice<'_>,
        destination: &SoftwareBuffer,
        destination_offset: u64,
    ) -> Result<(), DeviceError> {
        self.check()?;
        recording(list)?;
        check_staged(staging, &source)?;
        let len = source.bytes.len() as u64;
        let granule = self.inner.alignment.buffer_copy_size;
        if destination_offset % granule != 0 || len % granule != 0 {
            return Err(DeviceError::InvalidState(format!(
                "buffer copy of {len} bytes at {destination_offset} is not {granule} byte aligned"
            )));
        }
        if destination_offset + len > destination.len() {
            return Err(DeviceError::InvalidState(format!(
                "buffer copy to {}..{} overruns {}",
                destination_offset,
                destination_offset + len,
                destination.inner.label
            )));
        }
        list.commands.push(Command::CopyBuffer {
            destination: destination.clone(),
            offset: destination_offset,
            bytes: source.bytes.to_vec(),
        });
        Ok(())
    }

    fn copy_texture_region(
        &self,
        list: &mut SoftwareCommandList,
        staging: &SoftwareStaging,
        source: StagingSlice<'_>,
        destination: &SoftwareTexture,
        segment: &TextureSegment,
    ) -> Result<(), DeviceError> {
        self.check()?;
        recording(list)?;
        check_staged(staging, &source)?;
        let alignment = self.inner.alignment;
        if !is_aligned(source.offset, alignment.placement)
            || !is_aligned(segment.row_pitch, alignment.row_pitch)
        {
            return Err(DeviceError::InvalidState(format!(
                "placed footprint at {} with pitch {} violates {:?}",
                source.offset, segment.row_pitch, alignment
            )));
        }
        {
            let subresources = destination.inner.subresources.lock().unwrap();
            let target = subresources.get(segment.subresource as usize).ok_or_else(|| {
                DeviceError::InvalidState(format!("no subresource {}", segment.subresource))
            })?;
            let block_height = destination.inner.descriptor.block.height;
            let first_row = segment.origin[1] / block_height;
            if first_row + segment.rows > target.rows
                || segment.origin[2] + segment.slices > target.depth
                || segment.row_bytes > target.row_bytes
            {
                return Err(DeviceError::InvalidState(format!(
                    "{segment:?} outside subresource {}",
                    segment.subresource
                )));
            }
        }
        list.commands.push(Command::CopyTexture {
            destination: destination.clone(),
            segment: *segment,
            bytes: source.bytes.to_vec(),
        });
        Ok(())
    }

    fn close(&self, list: &mut SoftwareCommandList) -> Result<(), DeviceError> {
        self.check()?;
        recording(list)?;
        list.state = ListState::Closed;
        Ok(())
    }

    fn execute(&self, list: &mut SoftwareCommandList) -> Result<(), DeviceError> {
        self.check()?;
        if list.state != ListState::Closed {
            return Err(DeviceError::InvalidState(format!(
                "command list {} executed before close",
                list.label
            )));
        }
        self.submit(QueueItem::Execute(std::mem::take(&mut list.commands)))
    }

    fn signal(&self, fence: &SoftwareFence, value: u64) -> Result<(), DeviceError> {
        self.check()?;
        self.submit(QueueItem::Signal(fence.inner.clone(), value))
    }

    fn completed_value(&self, fence: &SoftwareFence) -> Result<u64, DeviceError> {
        self.check()?;
        Ok(*fence.inner.value.lock().unwrap())
    }

    fn wait_for_fence(&self, fence: &SoftwareFence, value: u64) -> Result<(), DeviceError> {
        self.check()?;
        let mut current = fence.inner.value.lock().unwrap();
        while *current < value {
            current = fence.inner.changed.wait(current).unwrap();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit_and_wait(device: &SoftwareDevice, list: &mut SoftwareCommandList, value: u64) {
        let fence = device.create_fence(0).unwrap();
        device.close(list).unwrap();
        device.execute(list).unwrap();
        device.signal(&fence, value).unwrap();
        device.wait_for_fence(&fence, value).unwrap();
        assert_eq!(device.completed_value(&fence).unwrap(), value);
    }

    #[test]
    fn buffer_copy_lands_after_fence() {
        let device = SoftwareDevice::new().unwrap();
        device.set_latency(Duration::from_millis(5));
        let buffer = device.create_buffer(8);
        let staging = device.create_staging(64, "staging").unwrap();
        let mut list = device.create_command_list("list").unwrap();
        device.reset(&mut list).unwrap();
        device
            .copy_buffer_region(
                &mut list,
                &staging,
                StagingSlice {
                    offset: 0,
                    bytes: &[1, 2, 3, 4],
                },
                &buffer,
                2,
            )
            .unwrap();
        submit_and_wait(&device, &mut list, 1);
        assert_eq!(buffer.contents(), vec![0, 0, 1, 2, 3, 4, 0, 0]);
        assert_eq!(device.executed_lists(), 1);
    }

    #[test]
    fn out_of_bounds_copy_rejected() {
        let device = SoftwareDevice::new().unwrap();
        let buffer = device.create_buffer(4);
        let staging = device.create_staging(64, "staging").unwrap();
        let mut list = device.create_command_list("list").unwrap();
        device.reset(&mut list).unwrap();
        let err = device
            .copy_buffer_region(
                &mut list,
                &staging,
                StagingSlice {
                    offset: 0,
                    bytes: &[0; 8],
                },
                &buffer,
                0,
            )
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidState(_)));
    }

    #[test]
    fn transitions_are_tracked() {
        let device = SoftwareDevice::new().unwrap();
        let buffer = device.create_buffer(4);
        let mut list = device.create_command_list("list").unwrap();
        device.reset(&mut list).unwrap();
        let to_copy = Transition::new(ResourceState::Common, ResourceState::CopyDest);
        device.transition_buffer(&mut list, &buffer, to_copy).unwrap();
        assert_eq!(buffer.state(), ResourceState::CopyDest);
        //claiming the wrong prior state is an error
        assert!(device.transition_buffer(&mut list, &buffer, to_copy).is_err());
    }

    #[test]
    fn recording_requires_reset() {
        let device = SoftwareDevice::new().unwrap();
        let buffer = device.create_buffer(4);
        let mut list = device.create_command_list("list").unwrap();
        assert!(
            device
                .transition_buffer(&mut list, &buffer, Transition::default())
                .is_err()
        );
        device.reset(&mut list).unwrap();
        device.close(&mut list).unwrap();
        assert!(device.close(&mut list).is_err());
    }

    #[test]
    fn construction_reports_rules_instead_of_panicking() {
        let rules = CopyAlignment {
            buffer_copy_size: 4,
            ..CopyAlignment::D3D12
        };
        let device: Result<SoftwareDevice, DeviceError> = SoftwareDevice::with_alignment(rules);
        let device = device.unwrap();
        assert_eq!(device.alignment(), rules);
        assert_eq!(device.executed_lists(), 0);
    }

    #[test]
    fn lost_device_fails_everything() {
        let device = SoftwareDevice::new().unwrap();
        device.set_lost(true);
        assert_eq!(device.create_fence(0).unwrap_err(), DeviceError::Lost);
        device.set_lost(false);
        device.create_fence(0).unwrap();
    }

    #[test]
    fn footprints_follow_mips_and_blocks() {
        let device = SoftwareDevice::new().unwrap();
        let descriptor = TextureDescriptor {
            mip_level_count: 3,
            ..TextureDescriptor::new_2d(20, 10, TexelBlock::BC1)
        };
        let texture = device.create_texture(descriptor, "bc1");
        let footprints = device.copyable_footprints(&texture, 0, 3).unwrap();
        assert_eq!(footprints[0].rows, 3);
        assert_eq!(footprints[0].row_bytes, 5 * 8);
        assert_eq!(footprints[0].row_pitch, 256);
        assert_eq!((footprints[1].width, footprints[1].height), (10, 5));
        assert_eq!(footprints[1].rows, 2);
        assert_eq!(footprints[2].row_bytes, 2 * 8);
        assert!(device.copyable_footprints(&texture, 2, 2).is_err());
    }

    #[test]
    fn volume_subresources_share_mips() {
        let descriptor = TextureDescriptor {
            depth_or_array_layers: 8,
            mip_level_count: 2,
            dimension: TextureDimension::D3,
            ..TextureDescriptor::new_2d(4, 4, TexelBlock::R8)
        };
        assert_eq!(descriptor.subresource_count(), 2);
        assert_eq!(descriptor.subresource_size(1), (2, 2, 4));
    }
}
