use image::{Rgba, RgbaImage};

// https://imagemagick.org/script/command-line-options.php#colorspace
const LUMA_RED: f32 = 0.212656;
const LUMA_GREEN: f32 = 0.715158;
const LUMA_BLUE: f32 = 0.072186;

/// Perceptual grey value of one pixel, clamped to a byte.
fn grey_value(pixel: &Rgba<u8>) -> u8 {
    let [r, g, b, _] = pixel.0;
    let grey = LUMA_RED * r as f32 + LUMA_GREEN * g as f32 + LUMA_BLUE * b as f32;
    grey.round().clamp(0.0, 255.0) as u8
}

/// Replaces R, G and B with the luma of the pixel; alpha is preserved.
pub fn convert_to_greyscale(image: &RgbaImage) -> RgbaImage {
    let mut output = RgbaImage::new(image.width(), image.height());
    for (source, target) in image.pixels().zip(output.pixels_mut()) {
        let grey = grey_value(source);
        *target = Rgba([grey, grey, grey, source.0[3]]);
    }
    output
}

/// Greyscale conversion followed by extraction of a single channel in `[0, 1]`,
/// row-major, ready to be wrapped as an `[height, width, 1]` tensor.
pub fn normalise_image(image: &RgbaImage) -> Vec<f32> {
    convert_to_greyscale(image)
        .pixels()
        .map(|pixel| pixel.0[0] as f32 / 255.0)
        .collect()
}
