use crate::canvas::{Canvas, GRAY, PINK, WHITE};
use crate::error::ShapeError;
use crate::greyscale::normalise_image;
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;
use clap::ValueEnum;
use image::RgbaImage;
use rand::Rng;
use rand_distr::{Distribution, Uniform};

pub const IMAGE_SIZE: usize = 224;
pub const IMAGE_CHANNELS: usize = 1;
pub const SHAPE_MARGIN: f32 = 10.0;
pub const SHAPE_MIN_SIZE: f32 = 40.0;

const SQUARE_STROKE_WIDTH: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeType {
    Square = 0,
    Triangle = 1,
    Circle = 2,
}

impl ShapeType {
    pub const ALL: [ShapeType; 3] = [ShapeType::Square, ShapeType::Triangle, ShapeType::Circle];

    pub fn id(self) -> usize {
        self as usize
    }

    /// Nearest shape type for a regressed class value.
    pub fn nearest(value: f32) -> Self {
        let index = value.round().clamp(0.0, (Self::ALL.len() - 1) as f32) as usize;
        Self::ALL[index]
    }
}

/// Which of the two demos is running; decides label layout and shape pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemoVariant {
    /// Squares only, label `[x, y, w, h]`.
    BoundingBox,
    /// Any shape, label `[shape_type, x, y, w, h]`.
    ShapeAndBoundingBox,
}

impl DemoVariant {
    pub fn label_width(self) -> usize {
        match self {
            DemoVariant::BoundingBox => 4,
            DemoVariant::ShapeAndBoundingBox => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn to_array(self) -> [f32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    pub fn from_slice(values: &[f32]) -> Option<Self> {
        match values {
            [x, y, width, height] => Some(Self {
                x: *x,
                y: *y,
                width: *width,
                height: *height,
            }),
            _ => None,
        }
    }

    /// Intersection over union; zero when the boxes are disjoint or degenerate.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);
        let inter_w = (right - self.x.max(other.x)).max(0.0);
        let inter_h = (bottom - self.y.max(other.y)).max(0.0);
        let inter = inter_w * inter_h;
        let area_a = self.width.max(0.0) * self.height.max(0.0);
        let area_b = other.width.max(0.0) * other.height.max(0.0);
        let union = area_a + area_b - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Canvas size and placement constraints for rendered shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeGeometry {
    pub image_size: usize,
    pub margin: f32,
    pub min_size: f32,
}

impl Default for ShapeGeometry {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
            margin: SHAPE_MARGIN,
            min_size: SHAPE_MIN_SIZE,
        }
    }
}

impl ShapeGeometry {
    fn validate(&self) -> Result<(), ShapeError> {
        let slack = self.image_size as f32 - 2.0 * self.margin - self.min_size;
        if self.margin < 0.0 || self.min_size <= 0.0 || slack <= 0.0 {
            return Err(ShapeError::Geometry {
                message: format!(
                    "image size {} cannot hold a shape of at least {} with margin {}",
                    self.image_size, self.min_size, self.margin
                ),
            });
        }
        Ok(())
    }

    /// Samples a square box that respects the margin on every side.
    pub fn sample_bounding_box<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<BoundingBox, ShapeError> {
        self.validate()?;
        let unit = Uniform::new(0.0f32, 1.0).map_err(|e| ShapeError::Geometry {
            message: e.to_string(),
        })?;
        let size = self.image_size as f32;

        let upper_coord_limit = size - 2.0 * self.margin - self.min_size;
        let x = unit.sample(rng) * upper_coord_limit + self.margin;
        let y = unit.sample(rng) * upper_coord_limit + self.margin;
        let max_coord = x.max(y);

        let upper_size_limit = size - max_coord - self.margin - self.min_size;
        let side = (unit.sample(rng) * upper_size_limit + self.min_size)
            .min(size - self.margin - max_coord);

        Ok(BoundingBox {
            x,
            y,
            width: side,
            height: side,
        })
    }
}

/// One rendered sample: its label and its `[S, S, 1]` image tensor.
#[derive(Debug, Clone)]
pub struct Shape<B: Backend> {
    pub shape_type: ShapeType,
    pub bounding_box: BoundingBox,
    pub image: Tensor<B, 3>,
}

fn draw_square(canvas: &mut Canvas, bbox: BoundingBox) {
    let BoundingBox { x, y, width, height } = bbox;
    canvas.fill_rect(x, y, width, height, PINK);
    canvas.stroke_rect(x, y, width, height, SQUARE_STROKE_WIDTH, GRAY);
}

fn draw_triangle(canvas: &mut Canvas, bbox: BoundingBox) {
    let BoundingBox { x, y, width, height } = bbox;
    canvas.fill_triangle((x, y + height), (x + width / 2.0, y), (x + width, y + height), PINK);
}

fn draw_circle(canvas: &mut Canvas, bbox: BoundingBox) {
    let rx = bbox.width / 2.0;
    let ry = bbox.height / 2.0;
    canvas.fill_ellipse(bbox.x + rx, bbox.y + ry, rx, ry, PINK);
}

/// Draws one shape of the given type on a fresh white canvas.
pub fn render_shape(shape_type: ShapeType, bbox: BoundingBox, image_size: usize) -> RgbaImage {
    let mut canvas = Canvas::new(image_size as u32, image_size as u32);
    canvas.fill(WHITE);
    match shape_type {
        ShapeType::Square => draw_square(&mut canvas, bbox),
        ShapeType::Triangle => draw_triangle(&mut canvas, bbox),
        ShapeType::Circle => draw_circle(&mut canvas, bbox),
    }
    canvas.into_image()
}

pub fn generate_shape<B: Backend, R: Rng + ?Sized>(
    variant: DemoVariant,
    geometry: &ShapeGeometry,
    rng: &mut R,
    device: &B::Device,
) -> Result<Shape<B>, ShapeError> {
    let bounding_box = geometry.sample_bounding_box(rng)?;
    let shape_type = match variant {
        DemoVariant::BoundingBox => ShapeType::Square,
        DemoVariant::ShapeAndBoundingBox => {
            ShapeType::ALL[rng.random_range(0..ShapeType::ALL.len())]
        }
    };

    let pixels = render_shape(shape_type, bounding_box, geometry.image_size);
    let values = normalise_image(&pixels);
    let size = geometry.image_size;
    let image =
        Tensor::<B, 3>::from_data(TensorData::new(values, [size, size, IMAGE_CHANNELS]), device);

    Ok(Shape {
        shape_type,
        bounding_box,
        image,
    })
}
