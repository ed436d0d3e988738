// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The device layer.

The scheduler never talks to a graphics API directly. Everything it needs, from staging
allocation to fences, goes through [`CopyBackend`]. Two implementations ship:

* [`software::SoftwareDevice`], an in-memory device with a simulated copy queue. It is always
  available and is what the tests drive.
* [`wgpu::WgpuDevice`], available with the `backend_wgpu` feature.
*/

use crate::error::DeviceError;
use crate::task::TextureSegment;
use std::fmt::Debug;

pub mod software;

#[cfg(feature = "backend_wgpu")]
pub mod wgpu;

/// Alignment rules a device imposes on staged copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CopyAlignment {
    /// Alignment of every arena reservation. Power of two.
    pub buffer_offset: u64,
    /// Buffer copy offsets and lengths must be multiples of this.
    pub buffer_copy_size: u64,
    /// Row pitch of staged texture rows. Power of two.
    pub row_pitch: u64,
    /// Alignment of the first byte of a staged texture region. Power of two.
    pub placement: u64,
}

impl CopyAlignment {
    /// The rules of a D3D12 copy queue.
    pub const D3D12: CopyAlignment = CopyAlignment {
        buffer_offset: 4,
        buffer_copy_size: 1,
        row_pitch: 256,
        placement: 512,
    };
}

impl Default for CopyAlignment {
    fn default() -> Self {
        CopyAlignment::D3D12
    }
}

/// Where one subresource's rows are laid out when staged.
///
/// Sizes are in copy blocks: for uncompressed formats a row is one texel high, for
/// block-compressed formats a row is `block_height` texels high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceFootprint {
    pub subresource: u32,
    /// Texels.
    pub width: u32,
    /// Texels.
    pub height: u32,
    pub depth: u32,
    pub block_height: u32,
    /// Block rows per slice.
    pub rows: u32,
    /// Meaningful bytes per block row.
    pub row_bytes: u64,
    /// Distance between staged rows, aligned to [`CopyAlignment::row_pitch`].
    pub row_pitch: u64,
}

impl SubresourceFootprint {
    /// Bytes a tightly-pitched staging of this subresource occupies.
    pub fn staged_size(&self) -> u64 {
        let total_rows = self.rows as u64 * self.depth as u64;
        if total_rows == 0 {
            0
        } else {
            (total_rows - 1) * self.row_pitch + self.row_bytes
        }
    }
}

/// A staged source region: an arena offset and the bytes stored there.
///
/// Devices whose staging memory is the arena itself only need `offset`; devices that upload
/// through their queue use `bytes`.
#[derive(Debug, Clone, Copy)]
pub struct StagingSlice<'a> {
    pub offset: u64,
    pub bytes: &'a [u8],
}

/// Usage state of a destination resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ResourceState {
    #[default]
    Common,
    CopyDest,
    CopySource,
    VertexAndConstantBuffer,
    IndexBuffer,
    PixelShaderResource,
    NonPixelShaderResource,
    UnorderedAccess,
    GenericRead,
}

/// States a destination is in before a copy, and should be left in after it.
///
/// The copy itself always happens in [`ResourceState::CopyDest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Transition {
    pub before: ResourceState,
    pub after: ResourceState,
}

impl Transition {
    pub const fn new(before: ResourceState, after: ResourceState) -> Self {
        Transition { before, after }
    }
}

/**
A device that can run staged copies on a dedicated queue.

Command lists are recorded and executed on the copy worker only. Everything else may be
called from any thread.
*/
pub trait CopyBackend: Send + Sync + 'static {
    type Buffer: Clone + Debug + Send + Sync + 'static;
    type Texture: Clone + Debug + Send + Sync + 'static;
    /// Device-side backing for the staging arena.
    type Staging: Send + Sync + 'static;
    /// A command allocator together with its list.
    type CommandList: Send + 'static;
    type Fence: Send + Sync + 'static;

    fn alignment(&self) -> CopyAlignment;

    fn create_staging(&self, capacity: u64, label: &str) -> Result<Self::Staging, DeviceError>;
    fn create_command_list(&self, label: &str) -> Result<Self::CommandList, DeviceError>;
    fn create_fence(&self, initial_value: u64) -> Result<Self::Fence, DeviceError>;

    /// Layout of `count` subresources starting at `first_subresource`, as they must be staged.
    fn copyable_footprints(
        &self,
        texture: &Self::Texture,
        first_subresource: u32,
        count: u32,
    ) -> Result<Vec<SubresourceFootprint>, DeviceError>;

    /// Discards previous contents and opens the list for recording.
    fn reset(&self, list: &mut Self::CommandList) -> Result<(), DeviceError>;

    fn transition_buffer(
        &self,
        list: &mut Self::CommandList,
        buffer: &Self::Buffer,
        transition: Transition,
    ) -> Result<(), DeviceError>;

    fn transition_texture(
        &self,
        list: &mut Self::CommandList,
        texture: &Self::Texture,
        first_subresource: u32,
        count: u32,
        transition: Transition,
    ) -> Result<(), DeviceError>;

    fn copy_buffer_region(
        &self,
        list: &mut Self::CommandList,
        staging: &Self::Staging,
        source: StagingSlice<'_>,
        destination: &Self::Buffer,
        destination_offset: u64,
    ) -> Result<(), DeviceError>;

    fn copy_texture_region(
        &self,
        list: &mut Self::CommandList,
        staging: &Self::Staging,
        source: StagingSlice<'_>,
        destination: &Self::Texture,
        segment: &TextureSegment,
    ) -> Result<(), DeviceError>;

    fn close(&self, list: &mut Self::CommandList) -> Result<(), DeviceError>;

    /// Submits a closed list to the copy queue.
    fn execute(&self, list: &mut Self::CommandList) -> Result<(), DeviceError>;

    /// Queues a signal of `fence` to `value` behind everything already submitted.
    fn signal(&self, fence: &Self::Fence, value: u64) -> Result<(), DeviceError>;

    fn completed_value(&self, fence: &Self::Fence) -> Result<u64, DeviceError>;

    /// Blocks the calling thread until `fence` reaches `value`.
    fn wait_for_fence(&self, fence: &Self::Fence, value: u64) -> Result<(), DeviceError>;
}
