use crate::canvas::Canvas;
use crate::error::{SessionError, TrainError};
use crate::shapes::BoundingBox;
use burn::prelude::{Backend, Tensor};
use image::{Rgba, RgbaImage};
use std::path::Path;

/// Converts an `[S, S, 1]` image tensor with values in `[0, 1]` back into an
/// opaque RGBA image.
pub fn image_from_tensor<B: Backend>(image: &Tensor<B, 3>) -> Result<RgbaImage, TrainError> {
    let [height, width, _] = image.dims();
    let values = image
        .clone()
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| TrainError::Data {
            message: format!("{e:?}"),
        })?;

    let mut output = RgbaImage::new(width as u32, height as u32);
    for (pixel, value) in output.pixels_mut().zip(values) {
        let grey = (value * 255.0).round().clamp(0.0, 255.0) as u8;
        *pixel = Rgba([grey, grey, grey, 255]);
    }
    Ok(output)
}

pub fn draw_bounding_box(image: RgbaImage, bbox: BoundingBox, colour: Rgba<u8>) -> RgbaImage {
    let mut canvas = Canvas::from_image(image);
    canvas.stroke_rect(bbox.x, bbox.y, bbox.width, bbox.height, 1.0, colour);
    canvas.into_image()
}

pub fn save_png(image: &RgbaImage, path: &Path) -> Result<(), SessionError> {
    image.save(path).map_err(|source| SessionError::Image {
        path: path.to_path_buf(),
        source,
    })
}
