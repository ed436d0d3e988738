// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
wgpu copy device.

wgpu has no mappable upload heap, so the staging backing is a `COPY_SRC | COPY_DST` buffer the
size of the arena. Each staged region is written into it through the queue as the copy is
recorded, and the encoder then copies from it into the destination. Queue writes always land
before the next submission, so the one-task-per-submission model of the worker keeps them
ordered.

Fences are emulated with `on_submitted_work_done` callbacks; waiting polls the device.
Resource states are tracked by wgpu itself, so transitions are only logged.
*/

use crate::bittricks::align_up;
use crate::error::DeviceError;
use crate::imp::{CopyAlignment, CopyBackend, StagingSlice, SubresourceFootprint, Transition};
use crate::task::TextureSegment;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};
use wgpu::{Extent3d, PollType, TexelCopyBufferInfo, TexelCopyBufferLayout, TexelCopyTextureInfo, Trace};

const ALIGNMENT: CopyAlignment = CopyAlignment {
    buffer_offset: wgpu::COPY_BUFFER_ALIGNMENT,
    buffer_copy_size: wgpu::COPY_BUFFER_ALIGNMENT,
    row_pitch: wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64,
    placement: wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64,
};

#[derive(Debug, Clone)]
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

pub struct WgpuCommandList {
    label: String,
    encoder: Option<wgpu::CommandEncoder>,
    finished: Option<wgpu::CommandBuffer>,
}

impl Debug for WgpuCommandList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuCommandList")
            .field("label", &self.label)
            .field("recording", &self.encoder.is_some())
            .field("closed", &self.finished.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct WgpuFence {
    value: Arc<Mutex<u64>>,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        WgpuDevice { device, queue }
    }

    /// Opens the default adapter with downlevel limits.
    pub async fn request(label: &str) -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::from_env_or_default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await?;
        let descriptor = wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: Default::default(),
            required_limits: wgpu::Limits::downlevel_defaults(),
            memory_hints: Default::default(),
            trace: Trace::Off,
        };
        let (device, queue) = adapter.request_device(&descriptor).await?;
        logwise::info_sync!(
            "opened wgpu device {label}",
            label = logwise::privacy::LogIt(&label)
        );
        Ok(WgpuDevice::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

fn encoder(list: &mut WgpuCommandList) -> Result<&mut wgpu::CommandEncoder, DeviceError> {
    let label = &list.label;
    list.encoder.as_mut().ok_or_else(|| {
        DeviceError::InvalidState(format!("command list {label} is not open for recording"))
    })
}

/// Layout of one subresource, numbered `mip + layer * mip_level_count`.
fn footprint(
    size: Extent3d,
    dimension: wgpu::TextureDimension,
    format: wgpu::TextureFormat,
    mip_level_count: u32,
    subresource: u32,
) -> Result<SubresourceFootprint, DeviceError> {
    let block_bytes = format.block_copy_size(None).ok_or_else(|| {
        DeviceError::Unsupported(format!("{format:?} needs an aspect to be copied"))
    })?;
    let (block_width, block_height) = format.block_dimensions();
    let mip = subresource % mip_level_count;
    let physical = size.mip_level_size(mip, dimension).physical_size(format);
    let depth = match dimension {
        wgpu::TextureDimension::D3 => physical.depth_or_array_layers,
        _ => 1,
    };
    let row_bytes = (physical.width / block_width) as u64 * block_bytes as u64;
    Ok(SubresourceFootprint {
        subresource,
        width: physical.width,
        height: physical.height,
        depth,
        block_height,
        rows: physical.height / block_height,
        row_bytes,
        row_pitch: align_up(row_bytes, ALIGNMENT.row_pitch),
    })
}

fn subresource_count(texture: &wgpu::Texture) -> u32 {
    match texture.dimension() {
        wgpu::TextureDimension::D3 => texture.mip_level_count(),
        _ => texture.mip_level_count() * texture.depth_or_array_layers(),
    }
}

fn log_transition(kind: &str, transition: Transition) {
    logwise::trace_sync!(
        "{kind} {before} -> {after}",
        kind = logwise::privacy::LogIt(&kind),
        before = logwise::privacy::LogIt(&transition.before),
        after = logwise::privacy::LogIt(&transition.after)
    );
}

impl CopyBackend for WgpuDevice {
    type Buffer = wgpu::Buffer;
    type Texture = wgpu::Texture;
    type Staging = wgpu::Buffer;
    type CommandList = WgpuCommandList;
    type Fence = WgpuFence;

    fn alignment(&self) -> CopyAlignment {
        ALIGNMENT
    }

    fn create_staging(&self, capacity: u64, label: &str) -> Result<wgpu::Buffer, DeviceError> {
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: align_up(capacity, wgpu::COPY_BUFFER_ALIGNMENT),
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }))
    }

    fn create_command_list(&self, label: &str) -> Result<WgpuCommandList, DeviceError> {
        Ok(WgpuCommandList {
            label: label.to_string(),
            encoder: None,
            finished: None,
        })
    }

    fn create_fence(&self, initial_value: u64) -> Result<WgpuFence, DeviceError> {
        Ok(WgpuFence {
            value: Arc::new(Mutex::new(initial_value)),
        })
    }

    fn copyable_footprints(
        &self,
        texture: &wgpu::Texture,
        first_subresource: u32,
        count: u32,
    ) -> Result<Vec<SubresourceFootprint>, DeviceError> {
        if first_subresource + count > subresource_count(texture) {
            return Err(DeviceError::InvalidState(format!(
                "subresources {first_subresource}..{} out of range",
                first_subresource + count
            )));
        }
        (first_subresource..first_subresource + count)
            .map(|subresource| {
                footprint(
                    texture.size(),
                    texture.dimension(),
                    texture.format(),
                    texture.mip_level_count(),
                    subresource,
                )
            })
            .collect()
    }

    fn reset(&self, list: &mut WgpuCommandList) -> Result<(), DeviceError> {
        list.finished = None;
        list.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(&list.label),
                }),
        );
        Ok(())
    }

    fn transition_buffer(
        &self,
        list: &mut WgpuCommandList,
        _buffer: &wgpu::Buffer,
        transition: Transition,
    ) -> Result<(), DeviceError> {
        encoder(list)?;
        log_transition("buffer", transition);
        Ok(())
    }

    fn transition_texture(
        &self,
        list: &mut WgpuCommandList,
        _texture: &wgpu::Texture,
        _first_subresource: u32,
        _count: u32,
        transition: Transition,
    ) -> Result<(), DeviceError> {
        encoder(list)?;
        log_transition("texture", transition);
        Ok(())
    }

    fn copy_buffer_region(
        &self,
        list: &mut WgpuCommandList,
        staging: &wgpu::Buffer,
        source: StagingSlice<'_>,
        destination: &wgpu::Buffer,
        destination_offset: u64,
    ) -> Result<(), DeviceError> {
        let encoder = encoder(list)?;
        if source.bytes.is_empty() {
            return Ok(());
        }
        self.queue.write_buffer(staging, source.offset, source.bytes);
        encoder.copy_buffer_to_buffer(
            staging,
            source.offset,
            destination,
            destination_offset,
            source.bytes.len() as u64,
        );
        Ok(())
    }

    fn copy_texture_region(
        &self,
        list: &mut WgpuCommandList,
        staging: &wgpu::Buffer,
        source: StagingSlice<'_>,
        destination: &wgpu::Texture,
        segment: &TextureSegment,
    ) -> Result<(), DeviceError> {
        let encoder = encoder(list)?;
        let padded_len = align_up(source.bytes.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT);
        if padded_len == source.bytes.len() as u64 {
            self.queue.write_buffer(staging, source.offset, source.bytes);
        } else {
            let mut padded = source.bytes.to_vec();
            padded.resize(padded_len as usize, 0);
            self.queue.write_buffer(staging, source.offset, &padded);
        }
        let mip_level_count = destination.mip_level_count();
        let (mip_level, layer) = match destination.dimension() {
            wgpu::TextureDimension::D3 => (segment.subresource, 0),
            _ => (
                segment.subresource % mip_level_count,
                segment.subresource / mip_level_count,
            ),
        };
        encoder.copy_buffer_to_texture(
            TexelCopyBufferInfo {
                buffer: staging,
                layout: TexelCopyBufferLayout {
                    offset: source.offset,
                    bytes_per_row: Some(segment.row_pitch as u32),
                    rows_per_image: Some(segment.rows),
                },
            },
            TexelCopyTextureInfo {
                texture: destination,
                mip_level,
                origin: wgpu::Origin3d {
                    x: segment.origin[0],
                    y: segment.origin[1],
                    z: segment.origin[2] + layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            Extent3d {
                width: segment.extent[0],
                height: segment.extent[1],
                depth_or_array_layers: segment.extent[2],
            },
        );
        Ok(())
    }

    fn close(&self, list: &mut WgpuCommandList) -> Result<(), DeviceError> {
        let encoder = list.encoder.take().ok_or_else(|| {
            DeviceError::InvalidState(format!("command list {} closed twice", list.label))
        })?;
        list.finished = Some(encoder.finish());
        Ok(())
    }

    fn execute(&self, list: &mut WgpuCommandList) -> Result<(), DeviceError> {
        let commands = list.finished.take().ok_or_else(|| {
            DeviceError::InvalidState(format!(
                "command list {} executed before close",
                list.label
            ))
        })?;
        self.queue.submit(std::iter::once(commands));
        Ok(())
    }

    fn signal(&self, fence: &WgpuFence, value: u64) -> Result<(), DeviceError> {
        let fence_value = fence.value.clone();
        self.queue.on_submitted_work_done(move || {
            let mut current = fence_value.lock().unwrap();
            *current = (*current).max(value);
        });
        Ok(())
    }

    fn completed_value(&self, fence: &WgpuFence) -> Result<u64, DeviceError> {
        self.device.poll(PollType::Poll)?;
        Ok(*fence.value.lock().unwrap())
    }

    fn wait_for_fence(&self, fence: &WgpuFence, value: u64) -> Result<(), DeviceError> {
        while *fence.value.lock().unwrap() < value {
            self.device.poll(PollType::Wait)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_footprint_is_pitch_aligned() {
        let size = Extent3d {
            width: 100,
            height: 30,
            depth_or_array_layers: 1,
        };
        let f = footprint(
            size,
            wgpu::TextureDimension::D2,
            wgpu::TextureFormat::Rgba8Unorm,
            1,
            0,
        )
        .unwrap();
        assert_eq!(f.row_bytes, 400);
        assert_eq!(f.row_pitch, 512);
        assert_eq!(f.rows, 30);
        assert_eq!(f.depth, 1);
    }

    #[test]
    fn compressed_footprint_counts_block_rows() {
        let size = Extent3d {
            width: 64,
            height: 64,
            depth_or_array_layers: 6,
        };
        //mip 1 of layer 2
        let f = footprint(
            size,
            wgpu::TextureDimension::D2,
            wgpu::TextureFormat::Bc1RgbaUnorm,
            3,
            7,
        )
        .unwrap();
        assert_eq!((f.width, f.height), (32, 32));
        assert_eq!(f.block_height, 4);
        assert_eq!(f.rows, 8);
        assert_eq!(f.row_bytes, 8 * 8);
        assert_eq!(f.depth, 1);
    }

    #[test]
    fn volume_footprint_keeps_depth() {
        let size = Extent3d {
            width: 16,
            height: 16,
            depth_or_array_layers: 8,
        };
        let f = footprint(size, wgpu::TextureDimension::D3, wgpu::TextureFormat::R8Unorm, 2, 1)
            .unwrap();
        assert_eq!((f.width, f.height, f.depth), (8, 8, 4));
    }

    #[test]
    fn depth_stencil_needs_aspect() {
        let size = Extent3d {
            width: 4,
            height: 4,
            depth_or_array_layers: 1,
        };
        assert!(matches!(
            footprint(
                size,
                wgpu::TextureDimension::D2,
                wgpu::TextureFormat::Depth24PlusStencil8,
                1,
                0
            ),
            Err(DeviceError::Unsupported(_))
        ));
    }
}
