//! End-to-end pipeline tests over real encoded images

use std::io::Cursor;
use std::path::PathBuf;

use anyhow::Result;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use tempfile::TempDir;

use imgpipe_core::{DeviceKind, DeviceParams, LoaderConfig, RecordReader};
use imgpipe_loader::api::{self, SourceConfig, StartConfig};
use imgpipe_loader::{
    AugmentationParams, FileListReader, ImageDecoder, Loader, MacrobatchReader, MacrobatchWriter,
};

const LABEL_STRIDE: usize = 4;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A solid-color PNG; a constant image survives crop and resize unchanged,
/// so every output byte equals the input value
fn solid_png(value: u8) -> Vec<u8> {
    let mut img = RgbImage::new(8, 8);
    for pixel in img.pixels_mut() {
        *pixel = Rgb([value, value, value]);
    }
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageOutputFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn record_value(index: u32) -> u8 {
    (index % 251) as u8
}

/// Write `total` records split into archives of `per_archive`, record `i`
/// labeled `i` as u32 LE and encoding a solid image of `record_value(i)`
fn write_archives(dir: &TempDir, total: u32, per_archive: u32) -> Result<PathBuf> {
    let prefix = dir.path().join("macro_");
    let mut index = 0u32;
    let mut archive = 0usize;
    while index < total {
        let mut name = prefix.as_os_str().to_os_string();
        name.push(archive.to_string());
        let mut writer = MacrobatchWriter::create(PathBuf::from(name), LABEL_STRIDE);
        for _ in 0..per_archive.min(total - index) {
            writer.append(&solid_png(record_value(index)), &index.to_le_bytes())?;
            index += 1;
        }
        writer.finish()?;
        archive += 1;
    }
    Ok(prefix)
}

fn test_config() -> LoaderConfig {
    LoaderConfig {
        inner_size: 4,
        rgb: true,
        label_size: 4,
        num_labels: 1,
        minibatch_size: 128,
        pipeline_depth: 2,
        seed: Some(99),
    }
}

fn start_macrobatch(prefix: &PathBuf, num_data: usize, device: DeviceKind) -> Result<Loader> {
    let config = test_config();
    let reader = MacrobatchReader::new(prefix, 0, num_data, LABEL_STRIDE)?;
    let decoder = ImageDecoder::new(
        config.inner_size,
        config.rgb,
        AugmentationParams::default(),
        config.seed,
    )?;
    let params = DeviceParams { kind: device, device_id: 0 };
    Ok(Loader::start(
        config,
        Box::new(reader),
        Box::new(decoder),
        &params,
    )?)
}

fn minibatch_labels(labels: &[u8]) -> Vec<u32> {
    labels
        .chunks(LABEL_STRIDE)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

#[test]
fn test_epoch_streams_in_order_and_wraps_mid_minibatch() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let prefix = write_archives(&dir, 1000, 256)?;
    let mut loader = start_macrobatch(&prefix, 1000, DeviceKind::Host)?;
    let item_size = loader.config().item_max_size();
    let pool = loader.pool();

    // 1000 records at 128 per minibatch: seven full batches in epoch 0
    for batch in 0..7u32 {
        let mb = loader.next()?;
        let expected: Vec<u32> = (batch * 128..(batch + 1) * 128).collect();
        assert_eq!(minibatch_labels(mb.labels), expected);
        assert_eq!(mb.epoch, 0);

        // solid source images survive decode byte for byte
        for (item, &label) in expected.iter().enumerate() {
            let bytes = &mb.data[item * item_size..(item + 1) * item_size];
            assert!(bytes.iter().all(|&b| b == record_value(label)));
        }
    }

    // the eighth batch takes the epoch's last 104 records plus the next
    // epoch's first 24, and is stamped with the new epoch
    let mb = loader.next()?;
    let expected: Vec<u32> = (896..1000).chain(0..24).collect();
    assert_eq!(minibatch_labels(mb.labels), expected);
    assert_eq!(mb.epoch, 1);

    loader.stop()?;
    assert_eq!(pool.stats().outstanding_buffers, 0);
    assert_eq!(pool.stats().outstanding_bytes, 0);
    Ok(())
}

#[test]
fn test_reset_restarts_the_epoch_from_record_zero() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let prefix = write_archives(&dir, 600, 200)?;
    let mut loader = start_macrobatch(&prefix, 600, DeviceKind::Host)?;

    assert_eq!(minibatch_labels(loader.next()?.labels)[0], 0);
    assert_eq!(minibatch_labels(loader.next()?.labels)[0], 128);

    loader.reset()?;
    let mb = loader.next()?;
    assert_eq!(
        minibatch_labels(mb.labels),
        (0..128).collect::<Vec<u32>>()
    );

    // the rewound epoch holds the full 600 records again: three more full
    // batches, then a batch spanning the boundary at exactly record 600
    for batch in 1..4u32 {
        assert_eq!(minibatch_labels(loader.next()?.labels)[0], batch * 128);
    }
    let mb = loader.next()?;
    let expected: Vec<u32> = (512..600).chain(0..40).collect();
    assert_eq!(minibatch_labels(mb.labels), expected);

    loader.stop()?;
    Ok(())
}

#[test]
fn test_accelerator_device_matches_host_output() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let prefix = write_archives(&dir, 300, 300)?;

    let mut host = start_macrobatch(&prefix, 300, DeviceKind::Host)?;
    let mut accel = start_macrobatch(&prefix, 300, DeviceKind::Accelerator)?;

    let a = host.next()?;
    let b = accel.next()?;
    assert_eq!(a.data, b.data);
    assert_eq!(a.labels, b.labels);

    host.stop()?;
    accel.stop()?;
    Ok(())
}

#[test]
fn test_file_list_source_feeds_the_pipeline() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let mut listing = String::new();
    for i in 0..256u32 {
        let name = format!("img{i}.png");
        std::fs::write(dir.path().join(&name), solid_png(record_value(i)))?;
        listing.push_str(&format!("{name} {i}\n"));
    }
    let listing_path = dir.path().join("train.txt");
    std::fs::write(&listing_path, listing)?;

    let config = test_config();
    let reader = FileListReader::new(&listing_path, 0, 1 << 20, LABEL_STRIDE, false, config.seed)?;
    assert_eq!(reader.num_records(), 256);
    let decoder = ImageDecoder::new(
        config.inner_size,
        config.rgb,
        AugmentationParams::default(),
        config.seed,
    )?;
    let mut loader = Loader::start(
        config,
        Box::new(reader),
        Box::new(decoder),
        &DeviceParams::default(),
    )?;

    let mb = loader.next()?;
    assert_eq!(minibatch_labels(mb.labels), (0..128).collect::<Vec<u32>>());
    loader.stop()?;
    Ok(())
}

#[test]
fn test_integer_boundary_drives_a_full_session() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let prefix = write_archives(&dir, 400, 200)?;

    let config = StartConfig {
        loader: test_config(),
        augment: AugmentationParams::default(),
        device: DeviceParams::default(),
        source: SourceConfig {
            path: prefix,
            macrobatch: true,
            macro_start: 0,
            num_data: 400,
            shuffle: false,
            max_record_size: 1 << 20,
        },
    };

    let mut loader = api::start(&config).expect("start should succeed");
    assert!(loader.current().is_none());

    assert_eq!(api::next(&mut loader), 0);
    let mb = loader.current().expect("a minibatch is exposed after next");
    assert_eq!(minibatch_labels(mb.labels)[0], 0);

    assert_eq!(api::next(&mut loader), 0);
    assert_eq!(
        minibatch_labels(loader.current().unwrap().labels)[0],
        128
    );

    assert_eq!(api::reset(&mut loader), 0);
    assert!(loader.current().is_none(), "reset releases the current batch");

    assert_eq!(api::next(&mut loader), 0);
    assert_eq!(minibatch_labels(loader.current().unwrap().labels)[0], 0);

    assert_eq!(api::stop(loader), 0);
    Ok(())
}

#[test]
fn test_boundary_surfaces_fill_failure_as_minus_one() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;

    // records exist but one is far over the size cap
    let mut listing = String::new();
    for i in 0..4u32 {
        let name = format!("img{i}.png");
        std::fs::write(dir.path().join(&name), solid_png(record_value(i)))?;
        listing.push_str(&format!("{name} {i}\n"));
    }
    let listing_path = dir.path().join("train.txt");
    std::fs::write(&listing_path, listing)?;

    let config = StartConfig {
        loader: LoaderConfig {
            minibatch_size: 4,
            inner_size: 4,
            ..test_config()
        },
        augment: AugmentationParams::default(),
        device: DeviceParams::default(),
        source: SourceConfig {
            path: listing_path,
            macrobatch: false,
            macro_start: 0,
            num_data: 0,
            shuffle: false,
            max_record_size: 16,
        },
    };

    let mut loader = api::start(&config).expect("listing parses, start succeeds");
    assert_eq!(api::next(&mut loader), -1);
    assert!(loader.current().is_none());
    assert_eq!(api::stop(loader), 0);
    Ok(())
}
