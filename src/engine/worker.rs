// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The copy worker: sole consumer of the registry and sole writer of the completion counter.

use super::{Shared, Staging};
use crate::config::ReclaimPolicy;
use crate::error::{DeviceError, fatal};
use crate::imp::{CopyBackend, ResourceState, StagingSlice, Transition};
use crate::task::{CopyTask, QueuedTask, TaskId};
use std::sync::Arc;
use std::sync::mpsc::Receiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerMessage {
    /// A task was posted.
    Wake,
    /// Drain everything posted, then exit.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    Draining,
}

pub(crate) struct Worker<B: CopyBackend> {
    shared: Arc<Shared<B>>,
    receiver: Receiver<WorkerMessage>,
    list: B::CommandList,
    fence: B::Fence,
    fence_value: u64,
}

impl<B: CopyBackend> Worker<B> {
    pub(crate) fn new(
        shared: Arc<Shared<B>>,
        receiver: Receiver<WorkerMessage>,
        list: B::CommandList,
        fence: B::Fence,
    ) -> Self {
        Worker {
            shared,
            receiver,
            list,
            fence,
            fence_value: 0,
        }
    }

    pub(crate) fn run(mut self) {
        logwise::info_sync!("copy worker started");
        let mut state = State::Waiting;
        let mut shutting_down = false;
        loop {
            match state {
                State::Waiting => {
                    match self.receiver.recv() {
                        Ok(WorkerMessage::Wake) => {}
                        Ok(WorkerMessage::Shutdown) | Err(_) => shutting_down = true,
                    }
                    //coalesce wakes that piled up while draining
                    while let Ok(message) = self.receiver.try_recv() {
                        if message == WorkerMessage::Shutdown {
                            shutting_down = true;
                        }
                    }
                    logwise::trace_sync!("copy worker draining");
                    state = State::Draining;
                }
                State::Draining => match self.shared.registry.pop() {
                    Some((id, queued)) => self.execute(TaskId::new(id), queued),
                    None if shutting_down => break,
                    None => {
                        logwise::trace_sync!("copy worker waiting");
                        state = State::Waiting;
                    }
                },
            }
        }
        let count = self.shared.completion.completed();
        logwise::info_sync!("copy worker stopped after {count} tasks", count = count);
    }

    fn execute(&mut self, id: TaskId, queued: QueuedTask<B::Buffer, B::Texture>) {
        let task_id = id.get();
        logwise::trace_sync!("executing task {task_id}", task_id = task_id);
        let shared = self.shared.clone();
        let staging = shared.staging.read().unwrap();
        if let Err(e) = self.submit(&staging, &queued.task) {
            drop(staging);
            shared.completion.poison();
            fatal("copy task execution", &e);
        }
        if shared.config.reclaim == ReclaimPolicy::OnCompletion {
            staging.arena.release(queued.charge);
        }
        drop(staging);
        shared.completion.advance(id);
    }

    /// Records, submits and waits for one task.
    fn submit(
        &mut self,
        staging: &Staging<B>,
        task: &CopyTask<B::Buffer, B::Texture>,
    ) -> Result<(), DeviceError> {
        let backend = &self.shared.backend;
        let list = &mut self.list;
        backend.reset(list)?;
        let requested = task.transition();
        let into_copy = Transition::new(requested.before, ResourceState::CopyDest);
        let out_of_copy = Transition::new(ResourceState::CopyDest, requested.after);
        match task {
            CopyTask::Buffer(copy) => {
                backend.transition_buffer(list, &copy.destination, into_copy)?;
                for segment in &copy.segments {
                    //safe because the task owns these bytes until its charge is released
                    let bytes = unsafe { staging.arena.bytes(segment.arena_offset, segment.len) };
                    backend.copy_buffer_region(
                        list,
                        &staging.device,
                        StagingSlice {
                            offset: segment.arena_offset,
                            bytes,
                        },
                        &copy.destination,
                        copy.destination_offset + segment.destination_delta,
                    )?;
                }
                backend.transition_buffer(list, &copy.destination, out_of_copy)?;
            }
            CopyTask::Texture(copy) => {
                backend.transition_texture(
                    list,
                    &copy.destination,
                    copy.first_subresource,
                    copy.subresource_count,
                    into_copy,
                )?;
                for segment in &copy.segments {
                    let bytes =
                        unsafe { staging.arena.bytes(segment.arena_offset, segment.staged_len()) };
                    backend.copy_texture_region(
                        list,
                        &staging.device,
                        StagingSlice {
                            offset: segment.arena_offset,
                            bytes,
                        },
                        &copy.destination,
                        segment,
                    )?;
                }
                backend.transition_texture(
                    list,
                    &copy.destination,
                    copy.first_subresource,
                    copy.subresource_count,
                    out_of_copy,
                )?;
            }
        }
        backend.close(list)?;
        backend.execute(list)?;

        let target = self.fence_value + 1;
        backend.signal(&self.fence, target)?;
        if backend.completed_value(&self.fence)? < target {
            let wait = logwise::perfwarn_begin!("copy fence wait");
            backend.wait_for_fence(&self.fence, target)?;
            drop(wait);
        }
        self.fence_value = target;
        Ok(())
    }
}
