mod activation;
mod canvas;
mod data_generator;
mod draw;
mod error;
mod greyscale;
mod history;
mod logging;
mod model;
mod optimizer;
mod session;
mod shapes;
mod util;

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::wgpu::WgpuDevice;
use burn::backend::{Autodiff, NdArray, Wgpu};
use burn::tensor::backend::AutodiffBackend;
use clap::{Args, Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::model::TrainConfig;
use crate::session::Session;
use crate::shapes::{DemoVariant, ShapeGeometry};

#[derive(Parser, Debug)]
#[command(about = "Train a small CNN to locate synthetic shapes", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    options: RunOptions,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Train a model, then predict on fresh samples.
    Run,
    /// Train a model and write its loss history.
    Train,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendKind {
    Wgpu,
    Cpu,
}

#[derive(Args, Debug)]
struct RunOptions {
    #[arg(
        long,
        global = true,
        env = "DEMO_VARIANT",
        value_enum,
        default_value_t = DemoVariant::ShapeAndBoundingBox
    )]
    variant: DemoVariant,

    #[arg(long, global = true, env = "BACKEND", value_enum, default_value_t = BackendKind::Wgpu)]
    backend: BackendKind,

    #[arg(long, global = true, env = "ARTIFACT_DIR", default_value = "./model")]
    artifact_dir: PathBuf,

    #[arg(long, global = true, env = "RUN_NAME", default_value = "default_run")]
    run_name: String,

    #[arg(long, global = true, env = "TRAIN_SAMPLES")]
    train_samples: Option<usize>,

    #[arg(long, global = true, env = "PREDICT_SAMPLES")]
    predict_samples: Option<usize>,

    #[arg(long, global = true, env = "NUM_EPOCHS")]
    epochs: Option<usize>,

    #[arg(long, global = true, env = "BATCH_SIZE")]
    batch_size: Option<usize>,

    #[arg(long, global = true, env = "LEARNING_RATE")]
    learning_rate: Option<f64>,

    #[arg(long, global = true, env = "VALIDATION_SPLIT")]
    validation_split: Option<f32>,

    /// Where training samples are rendered; defaults to the run's training-data directory.
    #[arg(long, global = true, env = "PREVIEW_DIR")]
    preview_dir: Option<PathBuf>,

    /// Seed for shape generation and shuffling; random when absent.
    #[arg(long, global = true, env = "SEED")]
    seed: Option<u64>,
}

impl RunOptions {
    fn train_config(&self) -> TrainConfig {
        let defaults = TrainConfig::for_variant(self.variant);
        TrainConfig {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            num_epochs: self.epochs.unwrap_or(defaults.num_epochs),
            learning_rate: self.learning_rate.unwrap_or(defaults.learning_rate),
            validation_split: self
                .validation_split
                .map(|split| split.clamp(0.0, 1.0))
                .unwrap_or(defaults.validation_split),
            train_samples: self.train_samples.unwrap_or(defaults.train_samples),
            predict_samples: self.predict_samples.unwrap_or(defaults.predict_samples),
            preview_samples: defaults.preview_samples,
            run_name: self.run_name.clone(),
        }
    }
}

fn run<B: AutodiffBackend>(
    command: Command,
    options: &RunOptions,
    device: B::Device,
) -> Result<(), SessionError> {
    let config = options.train_config();
    let artifact_dir = options.artifact_dir.join(&config.run_name);
    info!(
        "variant={:?}, artifacts in {}, config={:?}",
        options.variant,
        artifact_dir.display(),
        config
    );

    let mut session = Session::<B>::new(
        options.variant,
        ShapeGeometry::default(),
        config,
        artifact_dir,
        device,
        options.seed,
    )
    .with_preview_dir(options.preview_dir.clone());

    let final_loss = session.train_model()?.final_loss();
    info!("training finished, final loss {:?}", final_loss);
    if let Some(path) = session.show_visor()? {
        info!("loss history written to {}", path.display());
    }

    if let Command::Run = command {
        let reports = session.make_predictions()?;
        if !reports.is_empty() {
            let mean_iou = reports.iter().map(|r| r.iou()).sum::<f32>() / reports.len() as f32;
            let correct = reports
                .iter()
                .filter(|r| r.prediction.shape_type.is_some_and(|t| t == r.actual_shape_type))
                .count();
            info!(
                "{} predictions written to {}: mean IoU {:.3}",
                reports.len(),
                session.predictions_dir().display(),
                mean_iou
            );
            if options.variant == DemoVariant::ShapeAndBoundingBox {
                info!("shape type correct for {correct}/{}", reports.len());
            }
        }
    }

    debug!(
        "final state: training={:?}, predicting={:?}, trained={}, model={}, visor_open={}, \
         controls={:?}",
        session.training_state(),
        session.prediction_state(),
        session.is_trained(),
        session.has_model(),
        session.visor().is_some_and(|visor| visor.open),
        session.control_states()
    );
    Ok(())
}

fn main() -> ExitCode {
    dotenv().ok();
    if let Err(e) = logging::init() {
        eprintln!("{e}");
    }

    let cli = Cli::parse();
    let result = match cli.options.backend {
        BackendKind::Wgpu => {
            run::<Autodiff<Wgpu>>(cli.command, &cli.options, WgpuDevice::default())
        }
        BackendKind::Cpu => {
            warn!("training on the CPU backend; expect this to be slow at full image size");
            run::<Autodiff<NdArray>>(cli.command, &cli.options, NdArrayDevice::default())
        }
    };

    // Failed actions have already been logged by the session.
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
