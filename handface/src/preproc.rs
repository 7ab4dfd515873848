//! Preprocessing of camera frames into classifier input.
//!
//! A frame is scaled to `[0, 1]`, batched, center-cropped to a square and resized to the model
//! resolution. Cropping and resizing follow the bilinear `crop_and_resize` of TensorFlow, which
//! is what the hand/face model was trained and exported with.
use anyhow::{bail, Result};
use image::RgbImage;
use ndarray::{Array3, Array4, ArrayView4, Axis};

/// Side length of the square model input.
pub const IMAGE_SIZE: usize = 224;

/// Crop region in coordinates normalized to `[0, 1]` of the full image dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropBox {
    pub top: f32,
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
}

impl CropBox {
    /// The whole image.
    pub const FULL: CropBox = CropBox {
        top: 0.0,
        left: 0.0,
        bottom: 1.0,
        right: 1.0,
    };

    /// Largest square centered on the image, with side `min(height, width)`.
    pub fn center_square(height: u32, width: u32) -> Self {
        if height == width {
            return Self::FULL;
        }

        let (height, width) = (height as f32, width as f32);
        let size = height.min(width);
        Self {
            top: (height - size) / 2.0 / height,
            left: (width - size) / 2.0 / width,
            bottom: (height + size) / 2.0 / height,
            right: (width + size) / 2.0 / width,
        }
    }
}

/// Convert a frame to a `(height, width, 3)` array with values in `[0, 1]`.
pub fn normalize(frame: &RgbImage) -> Array3<f32> {
    let (width, height) = frame.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        frame[(x as u32, y as u32)][c] as f32 / 255.0
    })
}

/// Crop boxes out of a `(batch, height, width, channels)` array and resize them bilinearly.
///
/// Each box is paired with the batch index of the image it is cut from. Samples which fall
/// outside of the image are set to zero.
pub fn crop_and_resize(
    images: ArrayView4<f32>,
    boxes: &[(CropBox, usize)],
    crop_size: (usize, usize),
) -> Result<Array4<f32>> {
    let (batch, image_height, image_width, channels) = images.dim();
    if image_height == 0 || image_width == 0 {
        bail!("cannot crop from an empty image");
    }

    let (crop_height, crop_width) = crop_size;
    let mut crops = Array4::zeros((boxes.len(), crop_height, crop_width, channels));

    let max_y = (image_height - 1) as f32;
    let max_x = (image_width - 1) as f32;

    for (box_index, (crop, image_index)) in boxes.iter().enumerate() {
        if *image_index >= batch {
            bail!("box refers to image {} of a batch of {}", image_index, batch);
        }
        let image = images.index_axis(Axis(0), *image_index);

        let height_scale = match crop_height {
            h if h > 1 => (crop.bottom - crop.top) * max_y / (h - 1) as f32,
            _ => 0.0,
        };
        let width_scale = match crop_width {
            w if w > 1 => (crop.right - crop.left) * max_x / (w - 1) as f32,
            _ => 0.0,
        };

        for y in 0..crop_height {
            let in_y = match crop_height {
                h if h > 1 => crop.top * max_y + y as f32 * height_scale,
                _ => 0.5 * (crop.top + crop.bottom) * max_y,
            };
            if in_y < 0.0 || in_y > max_y {
                continue;
            }
            let (top_y, bottom_y) = (in_y.floor() as usize, in_y.ceil() as usize);
            let y_lerp = in_y - in_y.floor();

            for x in 0..crop_width {
                let in_x = match crop_width {
                    w if w > 1 => crop.left * max_x + x as f32 * width_scale,
                    _ => 0.5 * (crop.left + crop.right) * max_x,
                };
                if in_x < 0.0 || in_x > max_x {
                    continue;
                }
                let (left_x, right_x) = (in_x.floor() as usize, in_x.ceil() as usize);
                let x_lerp = in_x - in_x.floor();

                for c in 0..channels {
                    let top_left = image[[top_y, left_x, c]];
                    let top_right = image[[top_y, right_x, c]];
                    let bottom_left = image[[bottom_y, left_x, c]];
                    let bottom_right = image[[bottom_y, right_x, c]];

                    let top = top_left + (top_right - top_left) * x_lerp;
                    let bottom = bottom_left + (bottom_right - bottom_left) * x_lerp;
                    crops[[box_index, y, x, c]] = top + (bottom - top) * y_lerp;
                }
            }
        }
    }

    Ok(crops)
}

/// Turn a frame into a `(1, image_size, image_size, 3)` model input.
pub fn preprocess(frame: &RgbImage, image_size: usize) -> Result<Array4<f32>> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        bail!("cannot preprocess an empty {}x{} frame", width, height);
    }

    let batched = normalize(frame).insert_axis(Axis(0));
    let crop = CropBox::center_square(height, width);

    crop_and_resize(batched.view(), &[(crop, 0)], (image_size, image_size))
}

#[cfg(test)]
mod test {
    use image::Rgb;

    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1.0e-4, "{a} != {b}");
    }

    #[test]
    fn square_frames_are_not_cropped() {
        for size in [1, 224, 480] {
            assert_eq!(CropBox::center_square(size, size), CropBox::FULL);
        }
    }

    #[test]
    fn crop_is_centered_square_of_shorter_side() {
        for (height, width) in [(480, 640), (720, 1280), (640, 480), (3, 7), (101, 100)] {
            let crop = CropBox::center_square(height, width);
            let (h, w) = (height as f32, width as f32);
            let size = h.min(w);

            // Square of side `size` in pixels
            let crop_width = (crop.right - crop.left) * w;
            let crop_height = (crop.bottom - crop.top) * h;
            assert!((crop_width - size).abs() < 1.0e-3, "{height}x{width}");
            assert!((crop_height - size).abs() < 1.0e-3, "{height}x{width}");

            // Centered on both axes
            assert_close((crop.left + crop.right) / 2.0, 0.5);
            assert_close((crop.top + crop.bottom) / 2.0, 0.5);
        }
    }

    #[test]
    fn shorter_axis_keeps_full_extent() {
        let crop = CropBox::center_square(480, 640);
        assert_eq!(crop.top, 0.0);
        assert_eq!(crop.bottom, 1.0);
        assert_close(crop.left, 0.125);
        assert_close(crop.right, 0.875);
    }

    #[test]
    fn normalize_scales_to_unit_range() {
        let frame = RgbImage::from_pixel(3, 2, Rgb([0, 128, 255]));
        let normalized = normalize(&frame);

        assert_eq!(normalized.dim(), (2, 3, 3));
        assert_close(normalized[[1, 2, 0]], 0.0);
        assert_close(normalized[[1, 2, 1]], 128.0 / 255.0);
        assert_close(normalized[[1, 2, 2]], 1.0);
    }

    #[test]
    fn wide_frame_samples_center_columns() -> Result<()> {
        // Columns 0, 40, 80, 120 on a 2x4 frame
        let frame = RgbImage::from_fn(4, 2, |x, _| {
            let v = (x * 40) as u8;
            Rgb([v, v, v])
        });

        let batched = preprocess(&frame, 2)?;
        assert_eq!(batched.dim(), (1, 2, 2, 3));

        for y in 0..2 {
            assert_close(batched[[0, y, 0, 0]], 30.0 / 255.0);
            assert_close(batched[[0, y, 1, 0]], 90.0 / 255.0);
        }

        Ok(())
    }

    #[test]
    fn all_ones_frame_keeps_its_value() -> Result<()> {
        let frame = RgbImage::from_pixel(224, 224, Rgb([1, 1, 1]));
        let input = preprocess(&frame, IMAGE_SIZE)?;

        assert_eq!(input.dim(), (1, IMAGE_SIZE, IMAGE_SIZE, 3));
        for value in input.iter() {
            assert_close(*value, 1.0 / 255.0);
        }

        Ok(())
    }

    #[test]
    fn camera_sized_frame_is_resized_to_model_input() -> Result<()> {
        let frame = RgbImage::from_pixel(640, 480, Rgb([255, 0, 0]));
        let input = preprocess(&frame, IMAGE_SIZE)?;

        assert_eq!(input.dim(), (1, IMAGE_SIZE, IMAGE_SIZE, 3));
        assert_close(input[[0, 112, 112, 0]], 1.0);
        assert_close(input[[0, 112, 112, 1]], 0.0);

        Ok(())
    }

    #[test]
    fn samples_outside_the_image_are_zero() -> Result<()> {
        let images = Array4::from_elem((1, 2, 2, 1), 1.0);
        let crop = CropBox {
            top: -1.0,
            left: 0.0,
            bottom: 0.0,
            right: 1.0,
        };

        let crops = crop_and_resize(images.view(), &[(crop, 0)], (3, 2))?;
        assert_eq!(crops[[0, 0, 0, 0]], 0.0);
        assert_eq!(crops[[0, 1, 1, 0]], 0.0);
        assert_close(crops[[0, 2, 0, 0]], 1.0);

        Ok(())
    }

    #[test]
    fn reject_empty_frames_and_bad_batch_index() {
        assert!(preprocess(&RgbImage::new(0, 0), IMAGE_SIZE).is_err());

        let images = Array4::<f32>::zeros((1, 2, 2, 3));
        assert!(crop_and_resize(images.view(), &[(CropBox::FULL, 1)], (2, 2)).is_err());
    }
}
