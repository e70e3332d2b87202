//! End-to-end pipeline properties

use edgeconnect_web::{
    composite, BackendType, ImageCodec, ImagePreprocessor, InpaintProcessor, InpaintRequest,
    MaskSource, PreprocessingOptions, ResizePolicy, ServiceConfig,
};
use image::{DynamicImage, GrayImage, Luma, LumaA, Rgb, RgbImage, Rgba, RgbaImage};

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
    })
}

fn processor(policy: ResizePolicy) -> InpaintProcessor {
    let config = ServiceConfig::builder()
        .backend(BackendType::Mock)
        .resize_policy(policy)
        .build()
        .unwrap();
    let processor = InpaintProcessor::from_config(config).unwrap();
    processor.initialize().unwrap();
    processor
}

#[test]
fn test_any_input_layout_becomes_rgb() {
    let inputs = [
        DynamicImage::ImageRgb8(gradient(10, 6)),
        DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 6, Luma([77]))),
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 6, Rgba([10, 20, 30, 0]))),
        DynamicImage::ImageLumaA8(image::ImageBuffer::from_pixel(10, 6, LumaA([5, 9]))),
    ];
    for input in &inputs {
        let rgb = ImagePreprocessor::to_rgb(input);
        assert_eq!(rgb.dimensions(), (10, 6));
        assert_eq!(rgb.as_raw().len(), 10 * 6 * 3);
    }

    // Alpha is dropped without blending
    let rgb = ImagePreprocessor::to_rgb(&inputs[2]);
    assert_eq!(rgb.get_pixel(0, 0), &Rgb([10, 20, 30]));
}

#[test]
fn test_binarization_is_idempotent() {
    let mask = GrayImage::from_fn(16, 16, |x, y| Luma([((x * 16 + y) % 256) as u8]));
    let once = ImagePreprocessor::binarize_mask(&mask, 127);
    let twice = ImagePreprocessor::binarize_mask(&once, 127);
    assert_eq!(once, twice);
    assert!(once.pixels().all(|p| p[0] == 0 || p[0] == 255));
}

#[test]
fn test_prepared_rasters_share_dimensions() {
    let image = DynamicImage::ImageRgb8(gradient(300, 170));
    let mask = DynamicImage::ImageLuma8(GrayImage::from_pixel(150, 85, Luma([255])));

    for policy in [
        ResizePolicy::default(),
        ResizePolicy::MultipleOf { multiple: 8 },
    ] {
        let options = PreprocessingOptions {
            resize_policy: policy,
            ..PreprocessingOptions::default()
        };
        let prepared = ImagePreprocessor::prepare(&image, &mask, &options).unwrap();
        let dims = prepared.image().dimensions();
        assert_eq!(prepared.gray().dimensions(), dims);
        assert_eq!(prepared.edges().dimensions(), dims);
        assert_eq!(prepared.mask().dimensions(), dims);
        assert_eq!(prepared.original_size(), (300, 170));
    }
}

#[test]
fn test_composite_keeps_unmasked_pixels() {
    let image = DynamicImage::ImageRgb8(gradient(24, 24));
    let mask = DynamicImage::ImageLuma8(GrayImage::from_fn(24, 24, |x, _| {
        Luma([if x < 12 { 255 } else { 0 }])
    }));
    let options = PreprocessingOptions {
        resize_policy: ResizePolicy::MultipleOf { multiple: 4 },
        ..PreprocessingOptions::default()
    };
    let tensors = ImagePreprocessor::prepare(&image, &mask, &options)
        .unwrap()
        .to_tensors();

    let generated = ndarray::Array4::<f32>::from_elem(tensors.image.raw_dim(), 0.25);
    let merged = composite(&generated, &tensors.image, &tensors.mask).unwrap();

    for ((index, value), original) in merged.indexed_iter().zip(tensors.image.iter()) {
        let (_, _, _, x) = index;
        if x >= 12 {
            assert_eq!(value, original);
        } else {
            assert!((value - 0.25).abs() < 1e-6);
        }
    }
}

#[test]
fn test_all_zero_mask_returns_resized_input() {
    // Fixed 64x64: the output is the resized input restored to the upload size
    let processor = processor(ResizePolicy::Fixed {
        width: 64,
        height: 64,
    });
    let input = gradient(64, 64);
    let request = InpaintRequest {
        image: ImageCodec::encode_png(&input).unwrap(),
        mask: MaskSource::Bytes(
            ImageCodec::encode_png(&RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]))).unwrap(),
        ),
    };

    let outcome = processor.process(&request).unwrap();
    assert_eq!(outcome.image, input);
}

#[test]
fn test_masked_pixels_change_and_size_is_restored() {
    let processor = processor(ResizePolicy::default());
    let input = gradient(200, 120);
    let mask = GrayImage::from_fn(200, 120, |x, y| {
        Luma([if (80..120).contains(&x) && (40..80).contains(&y) { 255 } else { 0 }])
    });

    let outcome = processor
        .process_images(
            &DynamicImage::ImageRgb8(input.clone()),
            &DynamicImage::ImageLuma8(mask),
        )
        .unwrap();
    assert_eq!(outcome.image.dimensions(), (200, 120));
    assert_ne!(outcome.image.get_pixel(100, 60), input.get_pixel(100, 60));
    assert!(outcome.timings.total_ms >= outcome.timings.postprocessing_ms);
}

#[test]
fn test_mask_at_other_resolution_is_aligned() {
    let processor = processor(ResizePolicy::MultipleOf { multiple: 8 });
    let input = gradient(64, 48);
    // Drawn on a half-size canvas, as the browser page does
    let mask = RgbImage::from_pixel(32, 24, Rgb([0, 0, 0]));

    let outcome = processor
        .process_images(
            &DynamicImage::ImageRgb8(input.clone()),
            &DynamicImage::ImageRgb8(mask),
        )
        .unwrap();
    assert_eq!(outcome.image, input);
}
