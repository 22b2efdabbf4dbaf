use crate::activation::{Activation, ReLU, Sigmoid};
use crate::data_generator::decode_label;
use crate::error::{ModelError, TrainError};
use crate::history::{BatchStats, EpochStats, TrainingObserver};
use crate::optimizer::rmsprop;
use crate::shapes::{BoundingBox, DemoVariant, ShapeType, IMAGE_CHANNELS};
use crate::util::debug_tensor;
use burn::module::{AutodiffModule, Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, TensorData};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

const KERNEL_SIZE: usize = 3;
const POOL_SIZE: usize = 2;
const HIDDEN_UNITS: usize = 64;

/// Glorot uniform, the usual default for conv and dense kernels.
const KERNEL_INITIALIZER: Initializer = Initializer::XavierUniform { gain: 1.0 };

/// Hyperparameters of one training run plus the sample counts around it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub batch_size: usize,
    pub num_epochs: usize,
    pub learning_rate: f64,
    /// Fraction of the training batch held out, taken from its tail.
    pub validation_split: f32,
    pub train_samples: usize,
    pub predict_samples: usize,
    /// How many training samples are rendered to the training-data directory.
    pub preview_samples: usize,
    pub run_name: String,
}

impl TrainConfig {
    pub fn for_variant(variant: DemoVariant) -> Self {
        let batch_size = match variant {
            DemoVariant::BoundingBox => 32,
            DemoVariant::ShapeAndBoundingBox => 25,
        };
        TrainConfig {
            batch_size,
            num_epochs: 10,
            learning_rate: 5e-3,
            validation_split: 0.2,
            train_samples: 100,
            predict_samples: 10,
            preview_samples: 10,
            run_name: "default_run".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StageLayout {
    filters: usize,
    pool: bool,
}

const SHAPE_AND_BOX_STAGES: [StageLayout; 3] = [
    StageLayout { filters: 16, pool: true },
    StageLayout { filters: 32, pool: true },
    StageLayout { filters: 32, pool: false },
];

const BOX_ONLY_STAGES: [StageLayout; 4] = [
    StageLayout { filters: 16, pool: true },
    StageLayout { filters: 32, pool: true },
    StageLayout { filters: 32, pool: true },
    StageLayout { filters: 32, pool: false },
];

fn stage_layouts(variant: DemoVariant) -> &'static [StageLayout] {
    match variant {
        DemoVariant::BoundingBox => &BOX_ONLY_STAGES,
        DemoVariant::ShapeAndBoundingBox => &SHAPE_AND_BOX_STAGES,
    }
}

/// Number of features left after the conv stack, or an error when the image
/// shrinks to nothing on the way.
fn flattened_features(image_size: usize, stages: &[StageLayout]) -> Result<usize, ModelError> {
    let too_small = || ModelError::InputTooSmall {
        image_size,
        stages: stages.len(),
    };
    let mut side = image_size;
    let mut channels = IMAGE_CHANNELS;
    for stage in stages {
        side = side.checked_sub(KERNEL_SIZE - 1).filter(|s| *s > 0).ok_or_else(too_small)?;
        if stage.pool {
            side /= POOL_SIZE;
            if side == 0 {
                return Err(too_small());
            }
        }
        channels = stage.filters;
    }
    Ok(side * side * channels)
}

/// The kernel initializer also fills the bias; biases start at zero instead.
fn zero_bias<B: Backend>(
    bias: Option<Param<Tensor<B, 1>>>,
    device: &B::Device,
) -> Option<Param<Tensor<B, 1>>> {
    bias.map(|param| Param::from_tensor(Tensor::zeros(param.val().dims(), device)))
}

/// 3x3 valid convolution, sigmoid, then an optional 2x2 max-pool.
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    conv: Conv2d<B>,
    pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvStage<B> {
    fn init(in_channels: usize, layout: StageLayout, device: &B::Device) -> Self {
        let mut conv = Conv2dConfig::new([in_channels, layout.filters], [KERNEL_SIZE, KERNEL_SIZE])
            .with_initializer(KERNEL_INITIALIZER)
            .init(device);
        conv.bias = zero_bias(conv.bias.take(), device);
        let pool = layout.pool.then(|| {
            MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE])
                .with_strides([POOL_SIZE, POOL_SIZE])
                .init()
        });
        Self { conv, pool }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = <Sigmoid as Activation<4, B>>::forward(self.conv.forward(input));
        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// Conv stack, dense(64, relu), dense(K) with no output activation.
#[derive(Module, Debug)]
pub struct ShapeModel<B: Backend> {
    stages: Vec<ConvStage<B>>,
    hidden: Linear<B>,
    output: Linear<B>,
}

impl<B: Backend> ShapeModel<B> {
    pub fn init(
        variant: DemoVariant,
        image_size: usize,
        device: &B::Device,
    ) -> Result<Self, ModelError> {
        let layouts = stage_layouts(variant);
        let features = flattened_features(image_size, layouts)?;

        let mut stages = Vec::with_capacity(layouts.len());
        let mut in_channels = IMAGE_CHANNELS;
        for layout in layouts {
            stages.push(ConvStage::init(in_channels, *layout, device));
            in_channels = layout.filters;
        }

        let mut hidden = LinearConfig::new(features, HIDDEN_UNITS)
            .with_initializer(KERNEL_INITIALIZER)
            .init(device);
        hidden.bias = zero_bias(hidden.bias.take(), device);
        let mut output = LinearConfig::new(HIDDEN_UNITS, variant.label_width())
            .with_initializer(KERNEL_INITIALIZER)
            .init(device);
        output.bias = zero_bias(output.bias.take(), device);

        debug!(
            "built model: {} conv stages, {features} flattened features, {} outputs",
            stages.len(),
            variant.label_width()
        );
        Ok(Self { stages, hidden, output })
    }

    /// Takes NHWC images `[N, S, S, 1]` and returns `[N, K]` raw outputs.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images.permute([0, 3, 1, 2]);
        for stage in &self.stages {
            x = stage.forward(x);
        }
        let x = x.flatten::<2>(1, 3);
        let x = <ReLU as Activation<2, B>>::forward(self.hidden.forward(x));
        self.output.forward(x)
    }
}

/// Multiplier applied to the class channel of the labels so its scale is
/// comparable to pixel coordinates.
pub fn class_weight(image_size: usize) -> f32 {
    image_size as f32 / 2.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LossKind {
    MeanAbsoluteError,
    /// MSE against labels whose class channel is scaled by `class_weight`.
    WeightedMeanSquaredError { class_weight: f32 },
}

impl LossKind {
    pub fn for_variant(variant: DemoVariant, image_size: usize) -> Self {
        match variant {
            DemoVariant::BoundingBox => LossKind::MeanAbsoluteError,
            DemoVariant::ShapeAndBoundingBox => LossKind::WeightedMeanSquaredError {
                class_weight: class_weight(image_size),
            },
        }
    }

    pub fn compute<B: Backend>(
        &self,
        predictions: Tensor<B, 2>,
        targets: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        match *self {
            LossKind::MeanAbsoluteError => predictions.sub(targets).abs().mean(),
            LossKind::WeightedMeanSquaredError { class_weight } => {
                let [_, width] = targets.dims();
                let mut scale = vec![1.0f32; width];
                scale[0] = class_weight;
                let scale = TensorData::new(scale, [1, width]);
                let scale = Tensor::<B, 2>::from_data(scale, &targets.device());
                predictions.sub(targets.mul(scale)).powf_scalar(2.0).mean()
            }
        }
    }
}

fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    Tensor::<B, 1, Int>::from_data(TensorData::new(values, [indices.len()]), device)
}

fn loss_value<B: Backend>(loss: Tensor<B, 1>) -> f32 {
    loss.into_scalar().elem::<f32>()
}

/// Fits `model` on `images`/`labels` with RMSProp, holding out the tail of the
/// batch for validation. Training rows are shuffled every epoch.
pub fn do_train<B, R, O>(
    mut model: ShapeModel<B>,
    images: Tensor<B, 4>,
    labels: Tensor<B, 2>,
    loss_kind: LossKind,
    config: &TrainConfig,
    rng: &mut R,
    observer: &mut O,
) -> Result<ShapeModel<B>, TrainError>
where
    B: AutodiffBackend,
    R: Rng + ?Sized,
    O: TrainingObserver + ?Sized,
{
    let rows = images.dims()[0];
    let split_at = ((rows as f32) * (1.0 - config.validation_split)).floor() as usize;
    if split_at == 0 || config.batch_size == 0 {
        return Err(TrainError::EmptyTrainingSet {
            rows,
            batch_size: config.batch_size,
        });
    }
    let val_rows = rows - split_at;
    let device = images.device();

    let train_images = images.clone().narrow(0, 0, split_at);
    let train_labels = labels.clone().narrow(0, 0, split_at);
    let validation = (val_rows > 0).then(|| {
        (
            images.narrow(0, split_at, val_rows).inner(),
            labels.narrow(0, split_at, val_rows).inner(),
        )
    });

    let mut optimizer = rmsprop::<B, ShapeModel<B>>();
    let mut order: Vec<usize> = (0..split_at).collect();
    let num_epochs = config.num_epochs;
    info!(
        "training on {split_at} samples, validating on {val_rows}, \
         {num_epochs} epochs of batch size {}",
        config.batch_size
    );

    for epoch in 1..=num_epochs {
        order.shuffle(rng);
        let mut weighted_loss = 0.0f32;

        for (batch_index, chunk) in order.chunks(config.batch_size).enumerate() {
            let indices = index_tensor::<B>(chunk, &device);
            let inputs = train_images.clone().select(0, indices.clone());
            let targets = train_labels.clone().select(0, indices);

            let outputs = model.forward(inputs);
            let loss = loss_kind.compute(outputs, targets);
            let value = loss_value(loss.clone());
            if !value.is_finite() {
                return Err(TrainError::NonFiniteLoss { epoch, loss: value });
            }

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(config.learning_rate, model, grads);

            weighted_loss += value * chunk.len() as f32;
            observer.on_batch_end(&BatchStats {
                epoch,
                batch: batch_index + 1,
                loss: value,
            });
        }

        let val_loss = validation.as_ref().map(|(val_images, val_labels)| {
            let outputs = model.valid().forward(val_images.clone());
            loss_value(loss_kind.compute(outputs, val_labels.clone()))
        });
        let stats = EpochStats {
            epoch,
            total_epochs: num_epochs,
            loss: weighted_loss / split_at as f32,
            val_loss,
        };
        info!(
            "epoch {}/{}: loss={:.4} val_loss={}",
            epoch,
            num_epochs,
            stats.loss,
            val_loss.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".to_string())
        );
        observer.on_epoch_end(&stats);
    }

    Ok(model)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Class channel rescaled back to shape-id units.
    pub class_value: Option<f32>,
    pub shape_type: Option<ShapeType>,
    pub bounding_box: BoundingBox,
}

pub fn predict<B: Backend>(
    model: &ShapeModel<B>,
    images: Tensor<B, 4>,
    variant: DemoVariant,
    image_size: usize,
) -> Result<Vec<Prediction>, TrainError> {
    let outputs = model.forward(images);
    debug_tensor("predictions", &outputs);

    let [_, width] = outputs.dims();
    if width != variant.label_width() {
        return Err(TrainError::OutputWidth {
            expected: variant.label_width(),
            actual: width,
        });
    }
    let values = outputs
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| TrainError::Data {
            message: format!("{e:?}"),
        })?;

    let weight = class_weight(image_size);
    values
        .chunks(width)
        .map(|row| {
            let (class, bounding_box) = decode_label(variant, row).ok_or(TrainError::OutputWidth {
                expected: variant.label_width(),
                actual: row.len(),
            })?;
            let class_value = class.map(|value| value / weight);
            Ok(Prediction {
                class_value,
                shape_type: class_value.map(ShapeType::nearest),
                bounding_box,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_generator::generate_shapes;
    use crate::history::TrainingHistory;
    use crate::shapes::ShapeGeometry;
    use burn::backend::{Autodiff, NdArray};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    struct NoopObserver;

    impl TrainingObserver for NoopObserver {}

    fn tiny_config(variant: DemoVariant) -> TrainConfig {
        TrainConfig {
            batch_size: 4,
            num_epochs: 2,
            train_samples: 10,
            ..TrainConfig::for_variant(variant)
        }
    }

    #[test]
    fn biases_start_at_zero() {
        let device = Default::default();
        let model =
            ShapeModel::<TestBackend>::init(DemoVariant::ShapeAndBoundingBox, 32, &device).unwrap();
        let biases = model
            .stages
            .iter()
            .map(|stage| stage.conv.bias.clone())
            .chain([model.hidden.bias.clone(), model.output.bias.clone()]);
        for bias in biases {
            let values = bias.unwrap().val().into_data().to_vec::<f32>().unwrap();
            assert!(!values.is_empty());
            assert!(values.iter().all(|v| *v == 0.0), "{values:?}");
        }
    }

    #[test]
    fn default_224_architecture_flattens_as_expected() {
        // 224 -> 222 -> 111 -> 109 -> 54 -> 52
        assert_eq!(flattened_features(224, &SHAPE_AND_BOX_STAGES).unwrap(), 52 * 52 * 32);
        // ... -> 26 -> 24
        assert_eq!(flattened_features(224, &BOX_ONLY_STAGES).unwrap(), 24 * 24 * 32);
    }

    #[test]
    fn too_small_images_are_a_model_error() {
        let device = Default::default();
        let result = ShapeModel::<TestBackend>::init(DemoVariant::BoundingBox, 16, &device);
        assert!(matches!(result, Err(ModelError::InputTooSmall { stages: 4, .. })));
    }

    #[test]
    fn forward_produces_one_row_per_image() {
        let device = Default::default();
        let model =
            ShapeModel::<TestBackend>::init(DemoVariant::ShapeAndBoundingBox, 32, &device).unwrap();
        let images = Tensor::<TestBackend, 4>::zeros([3, 32, 32, 1], &device);
        assert_eq!(model.forward(images).dims(), [3, 5]);
    }

    #[test]
    fn mean_absolute_error_matches_hand_computation() {
        let device = Default::default();
        let predictions = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 4]),
            &device,
        );
        let targets = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![2.0f32, 2.0, 1.0, 8.0], [1, 4]),
            &device,
        );
        let loss = loss_value(LossKind::MeanAbsoluteError.compute(predictions, targets));
        approx::assert_relative_eq!(loss, 7.0 / 4.0);
    }

    #[test]
    fn weighted_loss_scales_only_the_class_channel() {
        let device = Default::default();
        let predictions = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![112.0f32, 10.0, 10.0, 40.0, 40.0], [1, 5]),
            &device,
        );
        let targets = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, 10.0, 10.0, 40.0, 40.0], [1, 5]),
            &device,
        );
        let loss = LossKind::for_variant(DemoVariant::ShapeAndBoundingBox, 224);
        approx::assert_relative_eq!(loss_value(loss.compute(predictions, targets)), 0.0);
    }

    #[test]
    fn training_reports_every_batch_and_epoch() {
        let variant = DemoVariant::ShapeAndBoundingBox;
        let geometry = ShapeGeometry {
            image_size: 24,
            margin: 2.0,
            min_size: 6.0,
        };
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(5);
        let batch = generate_shapes::<TestAutodiffBackend, _, _>(
            10,
            variant,
            &geometry,
            &mut rng,
            &device,
            |_, _| Ok(()),
        )
        .unwrap();
        let model =
            ShapeModel::<TestAutodiffBackend>::init(variant, geometry.image_size, &device).unwrap();
        let mut history = TrainingHistory::default();

        let config = tiny_config(variant);
        let trained = do_train(
            model,
            batch.images,
            batch.labels,
            LossKind::for_variant(variant, geometry.image_size),
            &config,
            &mut rng,
            &mut history,
        )
        .unwrap();

        // 8 training rows in batches of 4, 2 held out
        assert_eq!(history.batches.len(), 4);
        assert_eq!(history.epochs.len(), 2);
        assert!(history.epochs.iter().all(|e| e.loss.is_finite()));
        assert!(history.epochs.iter().all(|e| e.val_loss.is_some()));

        let fresh = generate_shapes::<TestBackend, _, _>(
            3,
            variant,
            &geometry,
            &mut rng,
            &device,
            |_, _| Ok(()),
        )
        .unwrap();
        let predictions =
            predict(&trained.valid(), fresh.images, variant, geometry.image_size).unwrap();
        assert_eq!(predictions.len(), 3);
        assert!(predictions.iter().all(|p| p.shape_type.is_some()));
    }

    #[test]
    fn fitting_without_training_rows_fails() {
        let variant = DemoVariant::BoundingBox;
        let device = Default::default();
        let model = ShapeModel::<TestAutodiffBackend>::init(variant, 48, &device).unwrap();
        let images = Tensor::<TestAutodiffBackend, 4>::zeros([1, 48, 48, 1], &device);
        let labels = Tensor::<TestAutodiffBackend, 2>::zeros([1, 4], &device);
        let mut rng = StdRng::seed_from_u64(0);
        let result = do_train(
            model,
            images,
            labels,
            LossKind::MeanAbsoluteError,
            &tiny_config(variant),
            &mut rng,
            &mut NoopObserver,
        );
        assert!(matches!(result, Err(TrainError::EmptyTrainingSet { rows: 1, .. })));
    }

    #[test]
    fn bounding_box_predictions_have_no_class() {
        let device = Default::default();
        let model = ShapeModel::<TestBackend>::init(DemoVariant::BoundingBox, 48, &device).unwrap();
        let images = Tensor::<TestBackend, 4>::zeros([2, 48, 48, 1], &device);
        let predictions = predict(&model, images, DemoVariant::BoundingBox, 48).unwrap();
        assert_eq!(predictions.len(), 2);
        assert!(predictions.iter().all(|p| p.class_value.is_none() && p.shape_type.is_none()));
    }
}
