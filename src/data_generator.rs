use crate::error::ShapeError;
use crate::shapes::{generate_shape, BoundingBox, DemoVariant, Shape, ShapeGeometry, ShapeType};
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;
use rand::Rng;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Rendered shapes plus the stacked image tensor `[N, S, S, 1]` and the label
/// tensor `[N, K]`. Row `i` of `labels` and slice `i` of `images` both belong
/// to `shapes[i]`.
#[derive(Debug)]
pub struct ShapeBatch<B: Backend> {
    pub shapes: Vec<Shape<B>>,
    pub images: Tensor<B, 4>,
    pub labels: Tensor<B, 2>,
}

pub fn encode_label(variant: DemoVariant, shape_type: ShapeType, bbox: BoundingBox) -> Vec<f32> {
    let mut row = Vec::with_capacity(variant.label_width());
    if variant == DemoVariant::ShapeAndBoundingBox {
        row.push(shape_type.id() as f32);
    }
    row.extend_from_slice(&bbox.to_array());
    row
}

/// Splits a label (or prediction) row into its optional class value and its box.
pub fn decode_label(variant: DemoVariant, row: &[f32]) -> Option<(Option<f32>, BoundingBox)> {
    if row.len() != variant.label_width() {
        return None;
    }
    match variant {
        DemoVariant::BoundingBox => BoundingBox::from_slice(row).map(|bbox| (None, bbox)),
        DemoVariant::ShapeAndBoundingBox => {
            let (class, rest) = row.split_first()?;
            BoundingBox::from_slice(rest).map(|bbox| (Some(*class), bbox))
        }
    }
}

/// Renders `num_shapes` samples and packs them into tensors.
///
/// `on_shape` runs synchronously as each sample is produced; its first error
/// aborts the batch.
pub fn generate_shapes<B, R, F>(
    num_shapes: usize,
    variant: DemoVariant,
    geometry: &ShapeGeometry,
    rng: &mut R,
    device: &B::Device,
    mut on_shape: F,
) -> Result<ShapeBatch<B>, ShapeError>
where
    B: Backend,
    R: Rng + ?Sized,
    F: FnMut(usize, &Shape<B>) -> Result<(), ShapeError>,
{
    if num_shapes == 0 {
        return Err(ShapeError::EmptyBatch);
    }

    let mut shapes = Vec::with_capacity(num_shapes);
    let mut label_values = Vec::with_capacity(num_shapes * variant.label_width());
    for index in 0..num_shapes {
        let shape = generate_shape::<B, R>(variant, geometry, rng, device)?;
        on_shape(index, &shape)?;
        label_values.extend(encode_label(variant, shape.shape_type, shape.bounding_box));
        shapes.push(shape);
    }

    let images = Tensor::stack::<4>(shapes.iter().map(|shape| shape.image.clone()).collect(), 0);
    let labels = Tensor::<B, 2>::from_data(
        TensorData::new(label_values, [num_shapes, variant.label_width()]),
        device,
    );
    debug!(
        "generated {num_shapes} shapes: images={:?}, labels={:?}",
        images.dims(),
        labels.dims()
    );

    Ok(ShapeBatch {
        shapes,
        images,
        labels,
    })
}

pub fn save_labels_to_csv<B: Backend>(
    variant: DemoVariant,
    shapes: &[Shape<B>],
    filename: &Path,
) -> io::Result<()> {
    let file = File::create(filename)?;
    let mut writer = BufWriter::new(file);

    match variant {
        DemoVariant::BoundingBox => writeln!(writer, "x,y,width,height")?,
        DemoVariant::ShapeAndBoundingBox => writeln!(writer, "shape_type,x,y,width,height")?,
    }

    for shape in shapes {
        let row = encode_label(variant, shape.shape_type, shape.bounding_box);
        let fields: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(writer, "{}", fields.join(","))?;
    }
    writer.flush()?;

    debug!("Labels saved to {}", filename.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray<f32>;

    fn small_geometry() -> ShapeGeometry {
        ShapeGeometry {
            image_size: 24,
            margin: 2.0,
            min_size: 6.0,
        }
    }

    #[test]
    fn batch_rows_match_stacking_order() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(42);
        let batch = generate_shapes::<TestBackend, _, _>(
            6,
            DemoVariant::ShapeAndBoundingBox,
            &small_geometry(),
            &mut rng,
            &device,
            |_, _| Ok(()),
        )
        .unwrap();

        assert_eq!(batch.shapes.len(), 6);
        assert_eq!(batch.images.dims(), [6, 24, 24, 1]);
        assert_eq!(batch.labels.dims(), [6, 5]);

        let labels = batch.labels.clone().into_data().to_vec::<f32>().unwrap();
        let images = batch.images.clone().into_data().to_vec::<f32>().unwrap();
        let per_image = 24 * 24;
        for (index, shape) in batch.shapes.iter().enumerate() {
            let row = &labels[index * 5..(index + 1) * 5];
            assert_eq!(
                row,
                encode_label(DemoVariant::ShapeAndBoundingBox, shape.shape_type, shape.bounding_box)
            );
            let own = shape.image.clone().into_data().to_vec::<f32>().unwrap();
            assert_eq!(&images[index * per_image..(index + 1) * per_image], own.as_slice());
        }
    }

    #[test]
    fn callback_sees_every_sample_in_order() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = Vec::new();
        let batch = generate_shapes::<TestBackend, _, _>(
            4,
            DemoVariant::BoundingBox,
            &small_geometry(),
            &mut rng,
            &device,
            |index, shape| {
                seen.push((index, shape.bounding_box));
                Ok(())
            },
        )
        .unwrap();

        let expected: Vec<_> = batch.shapes.iter().map(|s| s.bounding_box).enumerate().collect();
        assert_eq!(seen, expected);
        assert_eq!(batch.labels.dims(), [4, 4]);
    }

    #[test]
    fn callback_failure_aborts_the_batch() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut calls = 0;
        let result = generate_shapes::<TestBackend, _, _>(
            10,
            DemoVariant::BoundingBox,
            &small_geometry(),
            &mut rng,
            &device,
            |index, _| {
                calls += 1;
                if index == 2 {
                    Err(ShapeError::Callback {
                        message: "canvas gone".to_string(),
                    })
                } else {
                    Ok(())
                }
            },
        );

        assert!(matches!(result, Err(ShapeError::Callback { .. })));
        assert_eq!(calls, 3);
    }

    #[test]
    fn empty_batch_is_an_error() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(1);
        let result = generate_shapes::<TestBackend, _, _>(
            0,
            DemoVariant::BoundingBox,
            &small_geometry(),
            &mut rng,
            &device,
            |_, _| Ok(()),
        );
        assert!(matches!(result, Err(ShapeError::EmptyBatch)));
    }

    #[test]
    fn label_rows_decode_back_exactly() {
        let bbox = BoundingBox {
            x: 13.731_2,
            y: 88.125,
            width: 41.000_03,
            height: 41.000_03,
        };
        let row = encode_label(DemoVariant::BoundingBox, ShapeType::Square, bbox);
        assert_eq!(decode_label(DemoVariant::BoundingBox, &row), Some((None, bbox)));

        let row = encode_label(DemoVariant::ShapeAndBoundingBox, ShapeType::Circle, bbox);
        let (class, decoded) = decode_label(DemoVariant::ShapeAndBoundingBox, &row).unwrap();
        assert_eq!(class, Some(2.0));
        assert_eq!(decoded, bbox);

        assert_eq!(decode_label(DemoVariant::ShapeAndBoundingBox, &row[1..]), None);
    }

    #[test]
    fn labels_are_written_with_header() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(9);
        let batch = generate_shapes::<TestBackend, _, _>(
            3,
            DemoVariant::ShapeAndBoundingBox,
            &small_geometry(),
            &mut rng,
            &device,
            |_, _| Ok(()),
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");

        save_labels_to_csv(DemoVariant::ShapeAndBoundingBox, &batch.shapes, &path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "shape_type,x,y,width,height");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1].split(',').count(), 5);
    }
}
