// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Copy task model.

A [`CopyTask`] describes, in arena offsets, everything the copy worker needs to move one
posted upload to its destination. Tasks are built by the posting thread after the payload
has been written into the arena; from then on the bytes are only read.

# Texture staging

Each subresource is staged row by row at the device's row pitch, starting on a placement
boundary. When the reservation wraps, rows continue at the start of the ring. A row never
straddles the wrap, and every region handed to the device starts on a placement boundary,
so one subresource becomes at most four regions:

1. whole slices that fit before the wrap,
2. the leading rows of the slice cut by the wrap,
3. the trailing rows of that slice, from the start of the ring,
4. the remaining whole slices.
*/

use crate::arena::{ArenaRange, Reservation, StagingArena};
use crate::bittricks::align_up;
use crate::error::PostError;
use crate::imp::{CopyAlignment, SubresourceFootprint, Transition};
use std::fmt::Display;
use std::num::NonZeroU64;

/**
Identifies a posted upload.

Ids are issued densely starting at 1, in the order their staging space was reserved. A task
is done once [`crate::CopyEngine::execute_count`] reaches its id.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(NonZeroU64);

impl TaskId {
    pub(crate) fn new(id: NonZeroU64) -> Self {
        TaskId(id)
    }
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task {}", self.0)
    }
}

/// How source image bytes are laid out in caller memory, for one subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageLayout {
    /// Offset of the first row within the source.
    pub offset: u64,
    /// Meaningful bytes per row.
    pub row_bytes: u64,
    pub rows: u32,
    /// Distance between rows in the source.
    pub row_pitch: u64,
    pub depth: u32,
    /// Distance between slices in the source.
    pub slice_pitch: u64,
}

impl ImageLayout {
    pub fn new_2d(offset: u64, row_bytes: u64, rows: u32, row_pitch: u64) -> Self {
        ImageLayout {
            offset,
            row_bytes,
            rows,
            row_pitch,
            depth: 1,
            slice_pitch: (rows as u64).saturating_mul(row_pitch),
        }
    }

    pub fn with_depth(self, depth: u32, slice_pitch: u64) -> Self {
        ImageLayout {
            depth,
            slice_pitch,
            ..self
        }
    }

    /// Rows, slices and bytes per row actually copied into a subresource of `footprint`.
    fn copied(&self, footprint: &SubresourceFootprint) -> (u32, u32, u64) {
        (
            self.rows.min(footprint.rows),
            self.depth.min(footprint.depth),
            self.row_bytes.min(footprint.row_bytes),
        )
    }

    /// Source offset of `row` in `slice`. Bounded by [`Self::source_end`] for copied rows.
    fn row_start(&self, slice: u32, row: u32) -> u64 {
        self.offset + slice as u64 * self.slice_pitch + row as u64 * self.row_pitch
    }

    /// One past the last source byte read when staging into `footprint`.
    ///
    /// `None` if that position does not fit in a `u64`. Every byte staged for a footprint lies
    /// below this end, so once it is checked against the source the staging arithmetic cannot
    /// overflow.
    fn source_end(&self, footprint: &SubresourceFootprint) -> Option<u64> {
        let (rows, slices, bytes) = self.copied(footprint);
        if rows == 0 || slices == 0 || bytes == 0 {
            return Some(0);
        }
        let last_slice = (slices as u64 - 1).checked_mul(self.slice_pitch)?;
        let last_row = (rows as u64 - 1).checked_mul(self.row_pitch)?;
        self.offset
            .checked_add(last_slice)?
            .checked_add(last_row)?
            .checked_add(bytes)
    }
}

/// One contiguous piece of a buffer upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSegment {
    pub arena_offset: u64,
    /// Offset relative to the copy's destination offset.
    pub destination_delta: u64,
    pub len: u64,
}

/// One region of a texture upload, contiguous in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSegment {
    pub subresource: u32,
    /// Placement-aligned offset of the first row.
    pub arena_offset: u64,
    pub row_pitch: u64,
    pub row_bytes: u64,
    /// First block row, within each slice.
    pub first_row: u32,
    /// Block rows per slice. Also the rows-per-image of the staged region.
    pub rows: u32,
    pub first_slice: u32,
    pub slices: u32,
    /// Texel origin within the subresource.
    pub origin: [u32; 3],
    /// Texel extent.
    pub extent: [u32; 3],
}

impl TextureSegment {
    /// Bytes spanned in the arena, from the first row to the end of the last row.
    pub fn staged_len(&self) -> u64 {
        (self.rows as u64 * self.slices as u64 - 1) * self.row_pitch + self.row_bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferCopy<Buffer> {
    pub destination: Buffer,
    pub destination_offset: u64,
    /// One segment, or two when the staged bytes wrap.
    pub segments: Vec<BufferSegment>,
    pub transition: Transition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureCopy<Texture> {
    pub destination: Texture,
    pub first_subresource: u32,
    pub subresource_count: u32,
    pub segments: Vec<TextureSegment>,
    pub transition: Transition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyTask<Buffer, Texture> {
    Buffer(BufferCopy<Buffer>),
    Texture(TextureCopy<Texture>),
}

impl<Buffer, Texture> CopyTask<Buffer, Texture> {
    /// Number of copy commands the worker will record.
    pub fn segment_count(&self) -> usize {
        match self {
            CopyTask::Buffer(b) => b.segments.len(),
            CopyTask::Texture(t) => t.segments.len(),
        }
    }
    pub fn transition(&self) -> Transition {
        match self {
            CopyTask::Buffer(b) => b.transition,
            CopyTask::Texture(t) => t.transition,
        }
    }
}

/// A task as held by the registry, with the arena bytes it pins.
#[derive(Debug)]
pub(crate) struct QueuedTask<Buffer, Texture> {
    pub(crate) task: CopyTask<Buffer, Texture>,
    pub(crate) charge: u64,
}

/// Validates a buffer upload against the device's copy rules.
pub(crate) fn check_buffer_upload(
    destination_offset: u64,
    len: u64,
    alignment: CopyAlignment,
) -> Result<(), PostError> {
    let granule = alignment.buffer_copy_size;
    if destination_offset % granule != 0 || len % granule != 0 {
        return Err(PostError::MisalignedBuffer {
            offset: destination_offset,
            len,
            alignment: granule,
        });
    }
    Ok(())
}

/// Copies `bytes` into the reservation and describes the copy.
pub(crate) fn stage_buffer<Buffer>(
    arena: &StagingArena,
    reservation: &Reservation,
    bytes: &[u8],
    destination: Buffer,
    destination_offset: u64,
    transition: Transition,
) -> BufferCopy<Buffer> {
    arena.write(reservation, 0, bytes);
    BufferCopy {
        destination,
        destination_offset,
        segments: reservation
            .ranges()
            .iter()
            .filter(|r| r.len > 0)
            .map(|r| BufferSegment {
                arena_offset: r.arena_offset,
                destination_delta: r.payload_offset,
                len: r.len,
            })
            .collect(),
        transition,
    }
}

/// Validates source layouts against the destination's footprints.
pub(crate) fn check_texture_upload(
    footprints: &[SubresourceFootprint],
    layouts: &[ImageLayout],
    source_len: usize,
) -> Result<(), PostError> {
    if layouts.len() != footprints.len() {
        return Err(PostError::LayoutCountMismatch {
            layouts: layouts.len(),
            subresources: footprints.len() as u32,
        });
    }
    let required = footprints
        .iter()
        .zip(layouts)
        .map(|(f, l)| l.source_end(f).unwrap_or(u64::MAX))
        .max()
        .unwrap_or(0);
    if required > source_len as u64 {
        return Err(PostError::SourceTooSmall {
            required,
            actual: source_len as u64,
        });
    }
    Ok(())
}

/// Arena bytes to reserve so that [`plan_texture`] always fits, wherever the reservation lands.
pub(crate) fn texture_reservation_len(
    footprints: &[SubresourceFootprint],
    alignment: CopyAlignment,
) -> u64 {
    let max_pitch = footprints.iter().map(|f| f.row_pitch).max().unwrap_or(0);
    let rows: u64 = footprints
        .iter()
        .map(|f| f.rows as u64 * f.depth as u64 * f.row_pitch + alignment.placement)
        .sum();
    //a wrap costs up to a row plus three extra placement paddings
    rows + 4 * alignment.placement + max_pitch
}

struct PlanCursor<'a> {
    ranges: &'a [ArenaRange],
    index: usize,
    position: u64,
}

impl PlanCursor<'_> {
    fn end(&self) -> u64 {
        self.ranges[self.index].arena_end()
    }
    fn next_range(&mut self) {
        self.index += 1;
        assert!(
            self.index < self.ranges.len(),
            "texture staging overran its reservation"
        );
        self.position = self.ranges[self.index].arena_offset;
    }
    fn align(&mut self, placement: u64) {
        let aligned = align_up(self.position, placement);
        if aligned > self.end() {
            self.next_range();
        } else {
            self.position = aligned;
        }
    }
    /// Rows of `row_pitch` that fit in the current range, the last needing only `row_bytes`.
    fn rows_fitting(&self, row_pitch: u64, row_bytes: u64) -> u64 {
        let end = self.end();
        if self.position + row_bytes > end {
            0
        } else {
            (end - self.position - row_bytes) / row_pitch + 1
        }
    }
}

/// Lays out every row of `footprints` inside `reservation`.
pub(crate) fn plan_texture(
    reservation: &Reservation,
    footprints: &[SubresourceFootprint],
    placement: u64,
) -> Vec<TextureSegment> {
    let mut cursor = PlanCursor {
        ranges: reservation.ranges(),
        index: 0,
        position: reservation.ranges()[0].arena_offset,
    };
    let mut segments = Vec::new();
    for footprint in footprints {
        if footprint.rows == 0 || footprint.depth == 0 || footprint.row_bytes == 0 {
            continue;
        }
        let mut slice = 0;
        let mut row = 0;
        while slice < footprint.depth {
            cursor.align(placement);
            let fit = cursor.rows_fitting(footprint.row_pitch, footprint.row_bytes);
            if fit == 0 {
                cursor.next_range();
                continue;
            }
            let (rows, slices) = if row > 0 {
                ((footprint.rows - row).min(fit as u32), 1)
            } else if fit >= footprint.rows as u64 {
                let whole = (fit / footprint.rows as u64).min((footprint.depth - slice) as u64);
                (footprint.rows, whole as u32)
            } else {
                (fit as u32, 1)
            };
            let origin_y = row * footprint.block_height;
            let segment = TextureSegment {
                subresource: footprint.subresource,
                arena_offset: cursor.position,
                row_pitch: footprint.row_pitch,
                row_bytes: footprint.row_bytes,
                first_row: row,
                rows,
                first_slice: slice,
                slices,
                origin: [0, origin_y, slice],
                extent: [
                    footprint.width,
                    (rows * footprint.block_height).min(footprint.height.saturating_sub(origin_y)),
                    slices,
                ],
            };
            cursor.position += segment.staged_len();
            segments.push(segment);
            row += rows;
            if row == footprint.rows {
                row = 0;
                slice += slices;
            }
        }
    }
    segments
}

/// Copies source rows into the arena positions chosen by [`plan_texture`].
///
/// Rows and columns the source does not cover are zeroed.
pub(crate) fn stage_texture(
    arena: &StagingArena,
    reservation: &Reservation,
    segments: &[TextureSegment],
    footprints: &[SubresourceFootprint],
    layouts: &[ImageLayout],
    source: &[u8],
) {
    let first_subresource = footprints.first().map(|f| f.subresource).unwrap_or(0);
    let widest = footprints.iter().map(|f| f.row_bytes).max().unwrap_or(0);
    let zeros = vec![0u8; widest as usize];
    for segment in segments {
        let index = (segment.subresource - first_subresource) as usize;
        let footprint = &footprints[index];
        let layout = &layouts[index];
        let (copied_rows, copied_slices, copied_bytes) = layout.copied(footprint);
        for s in 0..segment.slices {
            for r in 0..segment.rows {
                let slice = segment.first_slice + s;
                let row = segment.first_row + r;
                let staged = segment.arena_offset
                    + (s as u64 * segment.rows as u64 + r as u64) * segment.row_pitch;
                let payload = reservation.payload_offset_of(staged);
                let copied = if slice < copied_slices && row < copied_rows {
                    let from = layout.row_start(slice, row) as usize;
                    arena.write(reservation, payload, &source[from..from + copied_bytes as usize]);
                    copied_bytes
                } else {
                    0
                };
                if copied < segment.row_bytes {
                    arena.write(
                        reservation,
                        payload + copied,
                        &zeros[..(segment.row_bytes - copied) as usize],
                    );
                }
            }
        }
    }
}
