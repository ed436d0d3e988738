// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Texture uploads through the software device, read back subresource by subresource.

use staging_copies::imp::software::{
    SoftwareDevice, TexelBlock, TextureDescriptor, TextureDimension,
};
use staging_copies::{
    CopyEngine, DEFAULT_STAGING_CAPACITY, DeviceError, EngineConfig, ImageLayout, PostError,
    ReclaimPolicy, ResourceState, Transition,
};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8 ^ seed).collect()
}

#[test]
fn tightly_packed_2d() {
    let device = SoftwareDevice::new().unwrap();
    let texture = device.create_texture(TextureDescriptor::new_2d(16, 8, TexelBlock::RGBA8), "2d");
    let engine = CopyEngine::new(device.clone(), EngineConfig::default()).unwrap();

    let source = pattern(64 * 8, 1);
    let id = engine
        .post_upload_texture_task(&texture, 0, 1, &source, &[ImageLayout::new_2d(0, 64, 8, 64)])
        .unwrap();
    engine.wait_copy_task(id);
    assert_eq!(texture.subresource_contents(0), source);
    assert_eq!(texture.state(0), ResourceState::Common);
}

#[test]
fn padded_source_rows() {
    let device = SoftwareDevice::new().unwrap();
    let texture = device.create_texture(TextureDescriptor::new_2d(3, 4, TexelBlock::RGBA8), "odd");
    let engine = CopyEngine::new(device.clone(), EngineConfig::default()).unwrap();

    //12 meaningful bytes per row, 20 between rows, starting 8 bytes in
    let source = pattern(8 + 20 * 4, 2);
    let layout = ImageLayout::new_2d(8, 12, 4, 20);
    let id = engine
        .post_upload_texture_task(&texture, 0, 1, &source, &[layout])
        .unwrap();
    engine.wait_copy_task(id);

    let expected: Vec<u8> = (0..4)
        .flat_map(|row| source[8 + row * 20..8 + row * 20 + 12].to_vec())
        .collect();
    assert_eq!(texture.subresource_contents(0), expected);
}

#[test]
fn short_rows_are_zero_filled() {
    let device = SoftwareDevice::new().unwrap();
    let texture = device.create_texture(TextureDescriptor::new_2d(8, 2, TexelBlock::R8), "short");
    let engine = CopyEngine::new(device.clone(), EngineConfig::default()).unwrap();

    let first = engine
        .post_upload_texture_task(&texture, 0, 1, &[0xAA; 16], &[ImageLayout::new_2d(0, 8, 2, 8)])
        .unwrap();
    //only half of each row comes from the source this time
    let second = engine
        .post_upload_texture_task(&texture, 0, 1, &[0x11; 8], &[ImageLayout::new_2d(0, 4, 2, 4)])
        .unwrap();
    engine.wait_copy_task(second);
    assert!(engine.is_task_complete(first));
    assert_eq!(
        texture.subresource_contents(0),
        vec![0x11, 0x11, 0x11, 0x11, 0, 0, 0, 0, 0x11, 0x11, 0x11, 0x11, 0, 0, 0, 0]
    );
}

#[test]
fn wrapped_texture_upload() {
    let device = SoftwareDevice::new().unwrap();
    let buffer = device.create_buffer(6000);
    let texture = device.create_texture(TextureDescriptor::new_2d(16, 8, TexelBlock::RGBA8), "wrap");
    let config = EngineConfig {
        staging_capacity: 8192,
        reclaim: ReclaimPolicy::OnCompletion,
        ..EngineConfig::default()
    };
    let engine = CopyEngine::new(device.clone(), config).unwrap();

    //push the arena head close to the end
    let filler = engine.post_upload_buffer_task(&buffer, 0, &[0; 6000]).unwrap();
    engine.wait_copy_task(filler);

    for seed in 0..4u8 {
        let source = pattern(64 * 8, seed);
        let id = engine
            .post_upload_texture_task(&texture, 0, 1, &source, &[ImageLayout::new_2d(0, 64, 8, 64)])
            .unwrap();
        engine.wait_copy_task(id);
        assert_eq!(texture.subresource_contents(0), source, "upload {seed}");
    }
    assert_eq!(engine.staging_remaining(), 8192);
}

#[test]
fn block_compressed_mips() {
    let device = SoftwareDevice::new().unwrap();
    let descriptor = TextureDescriptor {
        mip_level_count: 2,
        ..TextureDescriptor::new_2d(8, 8, TexelBlock::BC1)
    };
    let texture = device.create_texture(descriptor, "bc1");
    let engine = CopyEngine::new(device.clone(), EngineConfig::default()).unwrap();

    //mip 0 is 2x2 blocks, mip 1 is a single block
    let source = pattern(32 + 8, 3);
    let layouts = [ImageLayout::new_2d(0, 16, 2, 16), ImageLayout::new_2d(32, 8, 1, 8)];
    let id = engine
        .post_upload_texture_task(&texture, 0, 2, &source, &layouts)
        .unwrap();
    engine.wait_copy_task(id);
    assert_eq!(texture.subresource_contents(0), source[..32].to_vec());
    assert_eq!(texture.subresource_contents(1), source[32..].to_vec());

    //a single mip on its own
    let mip = [0x42; 8];
    let id = engine
        .post_upload_texture_task(&texture, 1, 1, &mip, &[ImageLayout::new_2d(0, 8, 1, 8)])
        .unwrap();
    engine.wait_copy_task(id);
    assert_eq!(texture.subresource_contents(0), source[..32].to_vec());
    assert_eq!(texture.subresource_contents(1), mip.to_vec());
}

#[test]
fn array_layers() {
    let device = SoftwareDevice::new().unwrap();
    let descriptor = TextureDescriptor {
        depth_or_array_layers: 2,
        ..TextureDescriptor::new_2d(4, 4, TexelBlock::RGBA8)
    };
    let texture = device.create_texture(descriptor, "array");
    let engine = CopyEngine::new(device.clone(), EngineConfig::default()).unwrap();

    let source = pattern(64, 4);
    let id = engine
        .post_upload_texture_task(&texture, 1, 1, &source, &[ImageLayout::new_2d(0, 16, 4, 16)])
        .unwrap();
    engine.wait_copy_task(id);
    assert_eq!(texture.subresource_contents(0), vec![0; 64]);
    assert_eq!(texture.subresource_contents(1), source);
}

#[test]
fn volume_texture() {
    let device = SoftwareDevice::new().unwrap();
    let descriptor = TextureDescriptor {
        depth_or_array_layers: 3,
        dimension: TextureDimension::D3,
        ..TextureDescriptor::new_2d(4, 4, TexelBlock::RGBA8)
    };
    let texture = device.create_texture(descriptor, "volume");
    let engine = CopyEngine::new(device.clone(), EngineConfig::default()).unwrap();

    let source = pattern(16 * 4 * 3, 5);
    let layout = ImageLayout::new_2d(0, 16, 4, 16).with_depth(3, 64);
    let id = engine
        .post_upload_texture_task(&texture, 0, 1, &source, &[layout])
        .unwrap();
    engine.wait_copy_task(id);
    assert_eq!(texture.subresource_contents(0), source);
}

#[test]
fn explicit_transitions() {
    let device = SoftwareDevice::new().unwrap();
    let texture = device.create_texture(TextureDescriptor::new_2d(4, 4, TexelBlock::RGBA8), "sampled");
    let buffer = device.create_buffer(16);
    let engine = CopyEngine::new(device.clone(), EngineConfig::default()).unwrap();
    let layout = [ImageLayout::new_2d(0, 16, 4, 16)];

    let to_shader = Transition::new(ResourceState::Common, ResourceState::PixelShaderResource);
    let id = engine
        .post_upload_texture_task_with(&texture, 0, 1, &[1; 64], &layout, to_shader)
        .unwrap();
    engine.wait_copy_task(id);
    assert_eq!(texture.state(0), ResourceState::PixelShaderResource);

    let stay = Transition::new(
        ResourceState::PixelShaderResource,
        ResourceState::PixelShaderResource,
    );
    let id = engine
        .post_upload_texture_task_with(&texture, 0, 1, &[2; 64], &layout, stay)
        .unwrap();
    engine.wait_copy_task(id);
    assert_eq!(texture.state(0), ResourceState::PixelShaderResource);
    assert_eq!(texture.subresource_contents(0), vec![2; 64]);

    let to_vertex = Transition::new(ResourceState::Common, ResourceState::VertexAndConstantBuffer);
    let id = engine
        .post_upload_buffer_task_with(&buffer, 0, &[3; 16], to_vertex)
        .unwrap();
    engine.wait_copy_task(id);
    assert_eq!(buffer.state(), ResourceState::VertexAndConstantBuffer);
    assert_eq!(buffer.contents(), vec![3; 16]);
}

#[test]
fn invalid_texture_posts() {
    let device = SoftwareDevice::new().unwrap();
    let descriptor = TextureDescriptor {
        mip_level_count: 2,
        ..TextureDescriptor::new_2d(4, 4, TexelBlock::RGBA8)
    };
    let texture = device.create_texture(descriptor, "invalid");
    let engine = CopyEngine::new(device.clone(), EngineConfig::default()).unwrap();
    let remaining = engine.staging_remaining();

    let error = engine
        .post_upload_texture_task(&texture, 0, 2, &[0; 64], &[ImageLayout::new_2d(0, 16, 4, 16)])
        .unwrap_err();
    assert_eq!(
        error,
        PostError::LayoutCountMismatch {
            layouts: 1,
            subresources: 2
        }
    );

    let error = engine
        .post_upload_texture_task(&texture, 0, 1, &[0; 32], &[ImageLayout::new_2d(0, 16, 4, 16)])
        .unwrap_err();
    assert_eq!(
        error,
        PostError::SourceTooSmall {
            required: 64,
            actual: 32
        }
    );

    let error = engine
        .post_upload_texture_task(&texture, 1, 2, &[0; 64], &[ImageLayout::new_2d(0, 8, 2, 8); 2])
        .unwrap_err();
    assert!(matches!(
        error,
        PostError::Device(DeviceError::InvalidState(_))
    ));

    //nothing was issued and nothing was reserved
    assert_eq!(engine.current_task_id(), 0);
    assert_eq!(engine.staging_remaining(), remaining);
}

#[test]
fn full_hd_frame_fits_default_staging() {
    let device = SoftwareDevice::new().unwrap();
    let texture = device.create_texture(TextureDescriptor::new_2d(1920, 1080, TexelBlock::RGBA8), "frame");
    let engine = CopyEngine::new(device.clone(), EngineConfig::default()).unwrap();
    assert_eq!(engine.staging_capacity(), DEFAULT_STAGING_CAPACITY);

    let row = 1920 * 4;
    let source = pattern(row * 1080, 6);
    for _ in 0..2 {
        let layout = ImageLayout::new_2d(0, row as u64, 1080, row as u64);
        let id = engine
            .post_upload_texture_task(&texture, 0, 1, &source, &[layout])
            .unwrap();
        assert!(engine.wait_copy_task(id));
    }
    assert_eq!(texture.subresource_contents(0), source);
}

#[test]
fn overflowing_layout_does_not_stall_later_posts() {
    let device = SoftwareDevice::new().unwrap();
    let texture = device.create_texture(TextureDescriptor::new_2d(4, 4, TexelBlock::RGBA8), "overflow");
    let buffer = device.create_buffer(16);
    let engine = CopyEngine::new(device.clone(), EngineConfig::default()).unwrap();

    //the last source byte lies past the end of the address space
    let layout = ImageLayout::new_2d(u64::MAX - 3, 16, 1, 16);
    let error = engine
        .post_upload_texture_task(&texture, 0, 1, &[0; 64], &[layout])
        .unwrap_err();
    assert_eq!(
        error,
        PostError::SourceTooSmall {
            required: u64::MAX,
            actual: 64
        }
    );
    assert_eq!(engine.current_task_id(), 0);

    let id = engine.post_upload_buffer_task(&buffer, 0, &[5; 16]).unwrap();
    assert_eq!(id.get(), 1);
    assert!(engine.wait_copy_task(id));
    assert_eq!(buffer.contents(), vec![5; 16]);
}
