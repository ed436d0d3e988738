// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Many threads posting into one engine at once.
//!
//! The registry starts small, so the posts below also force it to grow while the worker is
//! draining it.

use staging_copies::imp::software::SoftwareDevice;
use staging_copies::{CopyEngine, EngineConfig, TaskId};
use std::sync::Mutex;

const THREADS: u64 = 8;
const POSTS: u64 = 100;
const REGION: u64 = 16;

#[test]
fn posts_from_many_threads() {
    let device = SoftwareDevice::new().unwrap();
    let total = POSTS;
    let buffer = device.create_buffer(total * REGION);
    let config = EngineConfig {
        initial_registry_capacity: 16,
        ..EngineConfig::default()
    };
    let engine = CopyEngine::new(device.clone(), config).unwrap();
    let ids = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for thread in 0..THREADS {
            let engine = &engine;
            let buffer = &buffer;
            let ids = &ids;
            scope.spawn(move || {
                //regions are dealt out round robin
                for region in (thread..POSTS).step_by(THREADS as usize) {
                    let bytes = [region as u8; REGION as usize];
                    let id = engine
                        .post_upload_buffer_task(buffer, region * REGION, &bytes)
                        .unwrap();
                    ids.lock().unwrap().push(id);
                }
            });
        }
    });

    let mut ids = ids.into_inner().unwrap();
    for id in &ids {
        engine.wait_copy_task(*id);
    }
    assert_eq!(engine.execute_count(), total);
    assert_eq!(engine.current_task_id(), total);
    assert_eq!(engine.pending_tasks(), 0);
    assert_eq!(device.executed_lists(), total);

    ids.sort();
    let raw: Vec<u64> = ids.iter().map(|id| id.get()).collect();
    assert_eq!(raw, (1..=total).collect::<Vec<_>>());

    let contents = buffer.contents();
    for region in 0..total {
        let start = (region * REGION) as usize;
        assert!(
            contents[start..start + REGION as usize]
                .iter()
                .all(|b| *b == region as u8),
            "region {region} was not uploaded"
        );
    }
}

#[test]
fn registry_grows_past_its_initial_capacity() {
    let device = SoftwareDevice::new().unwrap();
    //slow the queue down so posts pile up in the registry
    device.set_latency(std::time::Duration::from_millis(20));
    let buffer = device.create_buffer(4);
    let config = EngineConfig {
        initial_registry_capacity: 2,
        ..EngineConfig::default()
    };
    let engine = CopyEngine::new(device.clone(), config).unwrap();
    let mut last = None;
    for value in 0..20u8 {
        last = Some(engine.post_upload_buffer_task(&buffer, 0, &[value; 4]).unwrap());
    }
    //the worker is still on the first task, so the rest had to fit in the registry at once
    assert!(
        engine.registry_capacity() > 2,
        "registry stayed at {} slots",
        engine.registry_capacity()
    );
    engine.wait_copy_task(last.unwrap());
    assert_eq!(engine.execute_count(), 20);
    //the last post wins
    assert_eq!(buffer.contents(), vec![19; 4]);
}

#[test]
fn engine_is_shared_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<CopyEngine<SoftwareDevice>>();
    assert_send_sync::<TaskId>();
}
