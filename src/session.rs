//! Training and prediction controllers.
//!
//! A [`Session`] owns everything the demo mutates between actions: the current
//! model, the training history, the run flags and the last error message. Each
//! action runs through [`Session::run_action`], which refuses to start while
//! the same controller is running, records the outcome, and surfaces failures
//! as a one-line message.

use crate::canvas::{BLUE, RED};
use crate::data_generator::{generate_shapes, save_labels_to_csv};
use crate::draw::{draw_bounding_box, image_from_tensor, save_png};
use crate::error::{SessionError, ShapeError};
use crate::history::TrainingHistory;
use crate::model::{do_train, predict, LossKind, Prediction, ShapeModel, TrainConfig};
use crate::shapes::{BoundingBox, DemoVariant, Shape, ShapeGeometry, ShapeType};
use crate::util::{has_entries, reset_dir};
use burn::module::AutodiffModule;
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

const TRAINING_DATA_DIR: &str = "training-data";
const PREDICTIONS_DIR: &str = "predictions";
const HISTORY_FILE: &str = "history.csv";
const LABELS_FILE: &str = "labels.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TrainModel,
    ClearTrainingData,
    MakePredictions,
    ClearPredictions,
    ShowVisor,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::TrainModel => "train_model",
            Action::ClearTrainingData => "clear_training_data",
            Action::MakePredictions => "make_predictions",
            Action::ClearPredictions => "clear_predictions",
            Action::ShowVisor => "show_visor",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one controller. `Succeeded` and `Failed` are idle states that
/// remember how the last run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_running(self) -> bool {
        self == RunState::Running
    }
}

/// Which actions are currently available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlStates {
    pub show_visor: bool,
    pub train_model: bool,
    pub clear_training_data: bool,
    pub make_predictions: bool,
    pub clear_predictions: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Visor {
    pub history: TrainingHistory,
    pub open: bool,
}

/// One prediction next to the sample it was made for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionReport {
    pub actual_shape_type: ShapeType,
    pub actual_box: BoundingBox,
    pub prediction: Prediction,
}

impl PredictionReport {
    pub fn iou(&self) -> f32 {
        self.actual_box.iou(&self.prediction.bounding_box)
    }
}

pub struct Session<B: AutodiffBackend> {
    variant: DemoVariant,
    geometry: ShapeGeometry,
    config: TrainConfig,
    artifact_dir: PathBuf,
    preview_dir: Option<PathBuf>,
    device: B::Device,
    rng: StdRng,
    model: Option<ShapeModel<B>>,
    visor: Option<Visor>,
    training: RunState,
    predicting: RunState,
    trained: bool,
    last_error: Option<String>,
}

impl<B: AutodiffBackend> Session<B> {
    /// `artifact_dir` is the per-run output directory; it is created on demand.
    pub fn new(
        variant: DemoVariant,
        geometry: ShapeGeometry,
        config: TrainConfig,
        artifact_dir: PathBuf,
        device: B::Device,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            variant,
            geometry,
            config,
            artifact_dir,
            preview_dir: None,
            device,
            rng,
            model: None,
            visor: None,
            training: RunState::Idle,
            predicting: RunState::Idle,
            trained: false,
            last_error: None,
        }
    }

    /// Renders the training previews to `dir` instead of the training-data
    /// directory.
    pub fn with_preview_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.preview_dir = dir;
        self
    }

    pub fn preview_dir(&self) -> PathBuf {
        self.preview_dir
            .clone()
            .unwrap_or_else(|| self.training_data_dir())
    }

    pub fn training_data_dir(&self) -> PathBuf {
        self.artifact_dir.join(TRAINING_DATA_DIR)
    }

    pub fn predictions_dir(&self) -> PathBuf {
        self.artifact_dir.join(PREDICTIONS_DIR)
    }

    pub fn training_state(&self) -> RunState {
        self.training
    }

    pub fn prediction_state(&self) -> RunState {
        self.predicting
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn visor(&self) -> Option<&Visor> {
        self.visor.as_ref()
    }

    /// Message shown in the error panel, if the last action failed.
    pub fn error_message(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn hide_error(&mut self) {
        self.last_error = None;
    }

    pub fn control_states(&self) -> ControlStates {
        let training = self.training.is_running();
        let predicting = self.predicting.is_running();
        ControlStates {
            show_visor: self.visor.is_some(),
            train_model: !training,
            clear_training_data: has_entries(&self.training_data_dir()) && !training,
            make_predictions: self.trained && !predicting,
            clear_predictions: has_entries(&self.predictions_dir()) && !predicting,
        }
    }

    fn state_mut(&mut self, action: Action) -> Option<&mut RunState> {
        match action {
            Action::TrainModel => Some(&mut self.training),
            Action::MakePredictions => Some(&mut self.predicting),
            Action::ClearTrainingData | Action::ClearPredictions | Action::ShowVisor => None,
        }
    }

    /// Runs `body` as `action`: refuses to start while the controller is
    /// running, records success or failure, and surfaces errors to the panel.
    fn run_action<T>(
        &mut self,
        action: Action,
        body: impl FnOnce(&mut Self) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        self.hide_error();
        let busy = match action {
            Action::ClearTrainingData => self.training.is_running(),
            Action::ClearPredictions => self.predicting.is_running(),
            _ => self.state_mut(action).is_some_and(|state| state.is_running()),
        };
        if busy {
            return Err(self.surface(action, SessionError::Busy));
        }

        if let Some(state) = self.state_mut(action) {
            *state = RunState::Running;
        }
        let result = body(self);
        let outcome = if result.is_ok() {
            RunState::Succeeded
        } else {
            RunState::Failed
        };
        if let Some(state) = self.state_mut(action) {
            *state = outcome;
        }
        self.report_memory();

        result.map_err(|e| self.surface(action, e))
    }

    fn surface(&mut self, action: Action, e: SessionError) -> SessionError {
        error!("[{action}] {e}");
        self.last_error = Some(e.to_string());
        e
    }

    fn report_memory(&self) {
        debug!(
            "session: model={}, trained={}, training={:?}, predicting={:?}",
            self.model.is_some(),
            self.trained,
            self.training,
            self.predicting
        );
    }

    /// Replaces the model with one trained on a freshly generated batch.
    pub fn train_model(&mut self) -> Result<&TrainingHistory, SessionError> {
        self.run_action(Action::TrainModel, Self::train_inner)?;
        self.visor
            .as_ref()
            .map(|visor| &visor.history)
            .ok_or(SessionError::NotTrained)
    }

    fn train_inner(&mut self) -> Result<(), SessionError> {
        self.trained = false;
        let dir = self.training_data_dir();
        reset_dir(&dir)?;
        self.model = None;

        let preview = self.config.preview_samples;
        let preview_dir = self.preview_dir();
        let batch = generate_shapes::<B, _, _>(
            self.config.train_samples,
            self.variant,
            &self.geometry,
            &mut self.rng,
            &self.device,
            |index, shape| {
                if index >= preview {
                    return Ok(());
                }
                write_preview(&preview_dir, index, shape).map_err(|e| ShapeError::Callback {
                    message: e.to_string(),
                })
            },
        )?;
        let labels_path = dir.join(LABELS_FILE);
        save_labels_to_csv(self.variant, &batch.shapes, &labels_path).map_err(|source| {
            SessionError::Io {
                path: labels_path.clone(),
                source,
            }
        })?;

        let model = ShapeModel::<B>::init(self.variant, self.geometry.image_size, &self.device)?;
        let loss = LossKind::for_variant(self.variant, self.geometry.image_size);
        let visor = self.visor.get_or_insert_with(Visor::default);
        visor.history = TrainingHistory::default();
        visor.open = true;

        let model = do_train(
            model,
            batch.images,
            batch.labels,
            loss,
            &self.config,
            &mut self.rng,
            &mut visor.history,
        )?;

        self.model = Some(model);
        self.trained = true;
        Ok(())
    }

    /// Empties the training-data directory and drops the model.
    pub fn clear_training_data(&mut self) -> Result<(), SessionError> {
        self.run_action(Action::ClearTrainingData, |session| {
            reset_dir(&session.training_data_dir())?;
            session.model = None;
            session.trained = false;
            Ok(())
        })
    }

    /// Runs the trained model on fresh samples and renders actual (blue) and
    /// predicted (red) boxes for each.
    pub fn make_predictions(&mut self) -> Result<Vec<PredictionReport>, SessionError> {
        self.run_action(Action::MakePredictions, Self::predict_inner)
    }

    fn predict_inner(&mut self) -> Result<Vec<PredictionReport>, SessionError> {
        let model = match (&self.model, self.trained) {
            (Some(model), true) => model.valid(),
            _ => return Err(SessionError::NotTrained),
        };
        let dir = self.predictions_dir();
        reset_dir(&dir)?;

        let batch = generate_shapes::<B::InnerBackend, _, _>(
            self.config.predict_samples,
            self.variant,
            &self.geometry,
            &mut self.rng,
            &self.device,
            |_, _| Ok(()),
        )?;
        let predictions = predict(&model, batch.images, self.variant, self.geometry.image_size)?;

        let mut reports = Vec::with_capacity(predictions.len());
        for (index, (shape, prediction)) in batch.shapes.iter().zip(predictions).enumerate() {
            info!(
                "actual shape type: {:?}; predicted shape type: {:?} ({})",
                shape.shape_type,
                prediction.shape_type,
                prediction
                    .class_value
                    .map(|v| format!("{v:.2}"))
                    .unwrap_or_else(|| "-".to_string())
            );
            let image = image_from_tensor(&shape.image)?;
            let image = draw_bounding_box(image, shape.bounding_box, BLUE);
            let image = draw_bounding_box(image, prediction.bounding_box, RED);
            save_png(&image, &dir.join(format!("prediction_{index:03}.png")))?;

            reports.push(PredictionReport {
                actual_shape_type: shape.shape_type,
                actual_box: shape.bounding_box,
                prediction,
            });
        }
        Ok(reports)
    }

    /// Empties the predictions directory and closes the visor.
    pub fn clear_predictions(&mut self) -> Result<(), SessionError> {
        self.run_action(Action::ClearPredictions, |session| {
            reset_dir(&session.predictions_dir())?;
            if let Some(visor) = session.visor.as_mut() {
                visor.open = false;
            }
            Ok(())
        })
    }

    /// Reopens the visor: logs the loss curves and writes them next to the
    /// other artifacts. Does nothing before the first training run.
    pub fn show_visor(&mut self) -> Result<Option<PathBuf>, SessionError> {
        self.run_action(Action::ShowVisor, |session| {
            let Some(visor) = session.visor.as_mut() else {
                return Ok(None);
            };
            visor.open = true;
            visor.history.log_summary();

            let path = session.artifact_dir.join(HISTORY_FILE);
            ensure_dir(&session.artifact_dir)?;
            visor
                .history
                .save_to_csv(&path)
                .map_err(|source| SessionError::Io {
                    path: path.clone(),
                    source,
                })?;
            Ok(Some(path))
        })
    }
}

/// Renders one training sample with its actual box into `dir`.
fn write_preview<B: Backend>(
    dir: &Path,
    index: usize,
    shape: &Shape<B>,
) -> Result<(), SessionError> {
    ensure_dir(dir)?;
    let image = draw_bounding_box(image_from_tensor(&shape.image)?, shape.bounding_box, BLUE);
    save_png(&image, &dir.join(format!("sample_{index:03}.png")))
}

fn ensure_dir(dir: &Path) -> Result<(), SessionError> {
    std::fs::create_dir_all(dir).map_err(|source| SessionError::Io {
        path: dir.to_path_buf(),
        source,
    })
}
