//! Training progress reporting.
//!
//! The fit loop reports every finished batch and epoch to a
//! [`TrainingObserver`]. [`TrainingHistory`] records the loss curves so they
//! can be shown after the run and written out as CSV.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// 1-based batch number within the epoch.
    pub batch: usize,
    pub loss: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    pub total_epochs: usize,
    /// Mean training loss over the epoch, weighted by batch size.
    pub loss: f32,
    /// Loss over the held-out tail of the batch, when one exists.
    pub val_loss: Option<f32>,
}

pub trait TrainingObserver {
    fn on_batch_end(&mut self, _stats: &BatchStats) {}
    fn on_epoch_end(&mut self, _stats: &EpochStats) {}
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub batches: Vec<BatchStats>,
    pub epochs: Vec<EpochStats>,
}

impl TrainingObserver for TrainingHistory {
    fn on_batch_end(&mut self, stats: &BatchStats) {
        self.batches.push(*stats);
    }

    fn on_epoch_end(&mut self, stats: &EpochStats) {
        self.epochs.push(*stats);
    }
}

impl TrainingHistory {
    pub fn final_loss(&self) -> Option<f32> {
        self.epochs.last().map(|epoch| epoch.loss)
    }

    pub fn log_summary(&self) {
        for epoch in &self.epochs {
            match epoch.val_loss {
                Some(val_loss) => info!(
                    "epoch {}/{}: loss={:.4} val_loss={:.4}",
                    epoch.epoch, epoch.total_epochs, epoch.loss, val_loss
                ),
                None => info!(
                    "epoch {}/{}: loss={:.4}",
                    epoch.epoch, epoch.total_epochs, epoch.loss
                ),
            }
        }
    }

    pub fn save_to_csv(&self, filename: &Path) -> io::Result<()> {
        let file = File::create(filename)?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "epoch,loss,val_loss")?;
        for epoch in &self.epochs {
            let val_loss = epoch.val_loss.map(|v| v.to_string()).unwrap_or_default();
            writeln!(writer, "{},{},{}", epoch.epoch, epoch.loss, val_loss)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_records_in_order_and_writes_csv() {
        let mut history = TrainingHistory::default();
        history.on_batch_end(&BatchStats {
            epoch: 1,
            batch: 1,
            loss: 4.0,
        });
        history.on_epoch_end(&EpochStats {
            epoch: 1,
            total_epochs: 2,
            loss: 4.0,
            val_loss: Some(5.0),
        });
        history.on_epoch_end(&EpochStats {
            epoch: 2,
            total_epochs: 2,
            loss: 2.5,
            val_loss: None,
        });
        assert_eq!(history.batches.len(), 1);
        assert_eq!(history.final_loss(), Some(2.5));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        history.save_to_csv(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "epoch,loss,val_loss\n1,4,5\n2,2.5,\n");
    }
}
