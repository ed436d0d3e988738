/*! staging_copies schedules CPU-to-GPU uploads through a bounded staging arena.

Renderers and asset loaders post uploads from whatever thread has the data. A single copy
worker owns the device's copy queue and runs each upload behind its own fence. Callers hold a
[`TaskId`] and wait on it only when they actually need the destination to be current.

```
use staging_copies::{CopyEngine, EngineConfig, ImageLayout};
use staging_copies::imp::software::{SoftwareDevice, TexelBlock, TextureDescriptor};

let device = SoftwareDevice::new().unwrap();
let texture = device.create_texture(TextureDescriptor::new_2d(4, 2, TexelBlock::RGBA8), "sprite");
let engine = CopyEngine::new(device.clone(), EngineConfig::default()).unwrap();

let pixels = [0xFFu8; 4 * 4 * 2];
let layout = ImageLayout::new_2d(0, 16, 2, 16);
let task = engine.post_upload_texture_task(&texture, 0, 1, &pixels, &[layout]).unwrap();
engine.wait_copy_task(task);
assert_eq!(texture.subresource_contents(0), pixels.to_vec());
```

# Pieces

| Piece          | Role                                                                       |
|----------------|----------------------------------------------------------------------------|
| [`arena`]      | Ring allocator over staging memory. Reservations may wrap, never overlap.  |
| [`registry`]   | Task table keyed by id. Many producers, one consumer, grows online.        |
| [`task`]       | What the worker copies, expressed in arena offsets.                        |
| [`CopyEngine`] | The public contract: post, wait, introspect, grow, shut down.              |
| [`imp`]        | The device layer, as the [`imp::CopyBackend`] trait.                       |

# Ordering

Task ids are handed out in the order staging space is reserved, and tasks complete in id
order. Once [`CopyEngine::execute_count`] reaches `t`, every copy of every task up to `t` is
visible on the device.

# Backends

The `backend_wgpu` feature (on by default) provides [`imp::wgpu::WgpuDevice`]. The
[`imp::software::SoftwareDevice`] is always available; it runs copies on a simulated queue
and validates them the way a debug layer would.
*/

logwise::declare_logging_domain!();

pub mod arena;
mod bittricks;
mod completion;
mod config;
mod engine;
mod error;
pub mod imp;
pub mod registry;
pub mod task;

pub use config::{DEFAULT_REGISTRY_CAPACITY, DEFAULT_STAGING_CAPACITY, EngineConfig, ReclaimPolicy};
pub use engine::CopyEngine;
pub use error::{ArenaError, DeviceError, EngineError, PostError};
pub use imp::{CopyAlignment, CopyBackend, ResourceState, Transition};
pub use task::{CopyTask, ImageLayout, TaskId};
