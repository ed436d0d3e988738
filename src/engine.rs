// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The copy engine.

[`CopyEngine`] accepts uploads from any number of threads and runs them on one dedicated copy
worker. Posting an upload copies the caller's bytes into the staging arena right away, so the
caller's buffer may be reused as soon as the post returns. The destination only sees the
bytes once the task is complete.

```
use staging_copies::{CopyEngine, EngineConfig};
use staging_copies::imp::software::SoftwareDevice;

let device = SoftwareDevice::new().unwrap();
let buffer = device.create_buffer(16);
let engine = CopyEngine::new(device.clone(), EngineConfig::default()).unwrap();
let task = engine.post_upload_buffer_task(&buffer, 0, &[7; 16]).unwrap();
engine.wait_copy_task(task);
assert_eq!(buffer.contents(), vec![7; 16]);
```
*/

pub(crate) mod worker;

use crate::arena::{Reservation, StagingArena};
use crate::completion::Completion;
use crate::config::EngineConfig;
use crate::error::{EngineError, PostError, fatal};
use crate::imp::{CopyAlignment, CopyBackend, Transition};
use crate::registry::TaskRegistry;
use crate::task::{
    CopyTask, ImageLayout, QueuedTask, TaskId, TextureCopy, check_buffer_upload,
    check_texture_upload, plan_texture, stage_buffer, stage_texture, texture_reservation_len,
};
use std::fmt::{Debug, Formatter};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use worker::{Worker, WorkerMessage};

pub(crate) struct Staging<B: CopyBackend> {
    pub(crate) arena: StagingArena,
    pub(crate) device: B::Staging,
}

pub(crate) struct Shared<B: CopyBackend> {
    pub(crate) backend: B,
    pub(crate) alignment: CopyAlignment,
    /// Posts and the worker hold this for reading; growth holds it for writing.
    pub(crate) staging: RwLock<Staging<B>>,
    pub(crate) registry: TaskRegistry<QueuedTask<B::Buffer, B::Texture>>,
    pub(crate) completion: Completion,
    pub(crate) config: EngineConfig,
}

pub struct CopyEngine<B: CopyBackend> {
    shared: Arc<Shared<B>>,
    wake: Sender<WorkerMessage>,
    worker: Option<JoinHandle<()>>,
}

impl<B: CopyBackend> Debug for CopyEngine<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyEngine")
            .field("current_task_id", &self.current_task_id())
            .field("execute_count", &self.execute_count())
            .field("pending_tasks", &self.pending_tasks())
            .field("completion", &self.shared.completion)
            .finish_non_exhaustive()
    }
}

impl<B: CopyBackend> CopyEngine<B> {
    /**
    Creates the staging arena, the copy command list and fence, and starts the copy worker.
    */
    pub fn new(backend: B, config: EngineConfig) -> Result<Self, EngineError> {
        let alignment = backend.alignment();
        let arena = StagingArena::new(config.staging_capacity, alignment.buffer_offset)?;
        let device_staging = backend.create_staging(arena.capacity(), &config.debug_label)?;
        let list = backend.create_command_list(&config.debug_label)?;
        let fence = backend.create_fence(0)?;
        let staging_capacity = arena.capacity();

        let (wake, receiver) = mpsc::channel();
        let shared = Arc::new(Shared {
            backend,
            alignment,
            staging: RwLock::new(Staging {
                arena,
                device: device_staging,
            }),
            registry: TaskRegistry::new(config.initial_registry_capacity),
            completion: Completion::new(),
            config,
        });
        let worker = Worker::new(shared.clone(), receiver, list, fence);
        let handle = thread::Builder::new()
            .name(shared.config.worker_name.clone())
            .spawn(move || worker.run())?;
        logwise::info_sync!(
            "copy engine started with {staging_capacity} staging bytes",
            staging_capacity = staging_capacity
        );
        Ok(CopyEngine {
            shared,
            wake,
            worker: Some(handle),
        })
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    #[track_caller]
    fn check_alive(&self, operation: &str) {
        if self.shared.completion.is_poisoned() {
            fatal(operation, &"copy engine stopped after a device failure");
        }
    }

    fn reservation_failed(&self, error: &crate::error::ArenaError) {
        logwise::warn_sync!(
            "staging reservation failed: {error}",
            error = logwise::privacy::LogIt(error)
        );
    }

    /// Publishes a staged task and wakes the worker.
    fn enqueue(
        &self,
        reservation: Reservation,
        task: CopyTask<B::Buffer, B::Texture>,
    ) -> TaskId {
        let id = reservation.sequence();
        let task_id = id.get();
        let segments = task.segment_count() as u64;
        logwise::trace_sync!(
            "posting task {task_id} with {segments} segments",
            task_id = task_id,
            segments = segments
        );
        self.shared.registry.insert(
            id,
            QueuedTask {
                task,
                charge: reservation.charge(),
            },
        );
        //if the worker is gone, the poison check reports it on the next call
        let _ = self.wake.send(WorkerMessage::Wake);
        TaskId::new(id)
    }

    /**
    Uploads `source` into `destination` at `destination_offset`.

    The destination is expected in [`crate::ResourceState::Common`] and is left there.
    */
    #[track_caller]
    pub fn post_upload_buffer_task(
        &self,
        destination: &B::Buffer,
        destination_offset: u64,
        source: &[u8],
    ) -> Result<TaskId, PostError> {
        self.post_upload_buffer_task_with(destination, destination_offset, source, Transition::default())
    }

    /// Like [`Self::post_upload_buffer_task`], with explicit destination states.
    #[track_caller]
    pub fn post_upload_buffer_task_with(
        &self,
        destination: &B::Buffer,
        destination_offset: u64,
        source: &[u8],
        transition: Transition,
    ) -> Result<TaskId, PostError> {
        self.check_alive("post_upload_buffer_task");
        let len = source.len() as u64;
        check_buffer_upload(destination_offset, len, self.shared.alignment)?;

        let staging = self.shared.staging.read().unwrap();
        let reservation = staging.arena.reserve(len).inspect_err(|e| self.reservation_failed(e))?;
        let write = logwise::perfwarn_begin!("stage buffer upload");
        let copy = stage_buffer(
            &staging.arena,
            &reservation,
            source,
            destination.clone(),
            destination_offset,
            transition,
        );
        drop(write);
        let id = self.enqueue(reservation, CopyTask::Buffer(copy));
        drop(staging);
        Ok(id)
    }

    /**
    Uploads `subresource_count` subresources of `destination`, starting at
    `first_subresource`.

    `layouts[i]` describes where subresource `first_subresource + i` lives in `source`.
    Source rows longer than the destination's are truncated; destination rows the source does
    not cover are zeroed.
    */
    #[track_caller]
    pub fn post_upload_texture_task(
        &self,
        destination: &B::Texture,
        first_subresource: u32,
        subresource_count: u32,
        source: &[u8],
        layouts: &[ImageLayout],
    ) -> Result<TaskId, PostError> {
        self.post_upload_texture_task_with(
            destination,
            first_subresource,
            subresource_count,
            source,
            layouts,
            Transition::default(),
        )
    }

    /// Like [`Self::post_upload_texture_task`], with explicit destination states.
    #[track_caller]
    pub fn post_upload_texture_task_with(
        &self,
        destination: &B::Texture,
        first_subresource: u32,
        subresource_count: u32,
        source: &[u8],
        layouts: &[ImageLayout],
        transition: Transition,
    ) -> Result<TaskId, PostError> {
        self.check_alive("post_upload_texture_task");
        let footprints =
            self.shared
                .backend
                .copyable_footprints(destination, first_subresource, subresource_count)?;
        check_texture_upload(&footprints, layouts, source.len())?;
        let len = texture_reservation_len(&footprints, self.shared.alignment);

        let staging = self.shared.staging.read().unwrap();
        let reservation = staging.arena.reserve(len).inspect_err(|e| self.reservation_failed(e))?;
        let write = logwise::perfwarn_begin!("stage texture upload");
        let segments = plan_texture(&reservation, &footprints, self.shared.alignment.placement);
        stage_texture(
            &staging.arena,
            &reservation,
            &segments,
            &footprints,
            layouts,
            source,
        );
        drop(write);
        let copy = TextureCopy {
            destination: destination.clone(),
            first_subresource,
            subresource_count,
            segments,
            transition,
        };
        let id = self.enqueue(reservation, CopyTask::Texture(copy));
        drop(staging);
        Ok(id)
    }

    #[track_caller]
    fn check_issued(&self, operation: &str, id: TaskId) {
        let current = self.current_task_id();
        if id.get() > current {
            fatal(
                operation,
                &format!("{id} was never issued; the latest is {current}"),
            );
        }
    }

    /**
    Blocks until `id` is complete, yielding the thread between checks.

    Always returns `true`; a wait that cannot succeed panics instead.

    # Panics
    If `id` was not issued by this engine, or if the engine stops after a device failure
    before `id` completes.
    */
    #[track_caller]
    pub fn wait_copy_task(&self, id: TaskId) -> bool {
        self.check_issued("wait_copy_task", id);
        while !self.shared.completion.is_complete(id) {
            self.check_alive("wait_copy_task");
            thread::yield_now();
        }
        true
    }

    /**
    Waits for `id` without blocking the thread.

    # Panics
    As [`Self::wait_copy_task`].
    */
    #[track_caller]
    pub fn wait_copy_task_async(&self, id: TaskId) -> impl Future<Output = ()> + Send + '_ {
        self.check_issued("wait_copy_task_async", id);
        let location = std::panic::Location::caller();
        async move {
            self.shared.completion.wait(id).await;
            if !self.shared.completion.is_complete(id) {
                fatal(
                    "wait_copy_task_async",
                    &format!("copy engine stopped before {id} completed (waited at {location})"),
                );
            }
        }
    }

    /**
    Runs `callback` once `id` is complete.

    If it already is, the callback runs right away on the calling thread. Otherwise it runs on
    the copy worker, which waits for it, so it should be short.
    */
    #[track_caller]
    pub fn on_task_complete<F>(&self, id: TaskId, callback: F)
    where
        F: FnOnce(TaskId) + Send + 'static,
    {
        self.check_issued("on_task_complete", id);
        self.shared.completion.on_complete(id, Box::new(callback));
    }

    pub fn is_task_complete(&self, id: TaskId) -> bool {
        self.shared.completion.is_complete(id)
    }

    /// The most recently issued task id, or 0 if none.
    pub fn current_task_id(&self) -> u64 {
        self.shared.staging.read().unwrap().arena.issued()
    }

    /// Number of tasks whose copies are complete.
    pub fn execute_count(&self) -> u64 {
        self.shared.completion.completed()
    }

    /// Tasks posted but not yet picked up by the worker.
    pub fn pending_tasks(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn registry_capacity(&self) -> usize {
        self.shared.registry.capacity()
    }

    pub fn staging_remaining(&self) -> u64 {
        self.shared.staging.read().unwrap().arena.remaining()
    }

    pub fn staging_capacity(&self) -> u64 {
        self.shared.staging.read().unwrap().arena.capacity()
    }

    /**
    Grows the staging arena to `new_capacity` bytes.

    Waits for every posted task to complete, then moves the live bytes into a larger arena and
    recreates the device staging memory. Posts made meanwhile block until growth is done.
    */
    pub fn grow_staging(&self, new_capacity: u64) -> Result<(), EngineError> {
        loop {
            let issued = self.current_task_id();
            while self.execute_count() < issued {
                self.check_alive("grow_staging");
                thread::yield_now();
            }
            let mut staging = self.shared.staging.write().unwrap();
            //a post may have slipped in before the lock
            if staging.arena.issued() != self.execute_count() {
                continue;
            }
            let staging = &mut *staging;
            let old_capacity = staging.arena.capacity();
            staging.arena.grow(new_capacity)?;
            if staging.arena.capacity() != old_capacity {
                staging.device = self
                    .shared
                    .backend
                    .create_staging(staging.arena.capacity(), &self.shared.config.debug_label)?;
            }
            return Ok(());
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.wake.send(WorkerMessage::Shutdown);
            if worker.join().is_err() {
                logwise::error_sync!("copy worker exited by panicking");
            }
            let count = self.execute_count();
            logwise::info_sync!("copy engine stopped after {count} tasks", count = count);
        }
    }

    /// Waits for every posted task to complete, then stops the copy worker.
    pub fn shutdown(mut self) {
        self.stop();
    }
}

impl<B: CopyBackend> Drop for CopyEngine<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
