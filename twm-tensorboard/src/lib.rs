//! TensorBoard backend of [`Recorder`].
use log::warn;
use std::path::Path;
use tensorboard_rs::summary_writer::SummaryWriter;
use twm_core::record::{Record, RecordValue, Recorder};

/// Write records to TFRecord.
///
/// The step of every record is read from the scalar under the step key,
/// `buffer/size` by default. Arrays such as visit histograms are summarized
/// by their mean and maximum under `<key>/mean` and `<key>/max`.
pub struct TensorboardRecorder {
    writer: SummaryWriter,
    step_key: String,
    ignore_unsupported_value: bool,
}

impl TensorboardRecorder {
    /// Construct a [`TensorboardRecorder`].
    ///
    /// TFRecord will be stored in `logdir`.
    pub fn new<P: AsRef<Path>>(logdir: P) -> Self {
        Self {
            writer: SummaryWriter::new(logdir),
            step_key: "buffer/size".to_string(),
            ignore_unsupported_value: true,
        }
    }

    /// Construct a [`TensorboardRecorder`] warning about arrays it cannot summarize.
    pub fn new_with_check_unsupported_value<P: AsRef<Path>>(logdir: P) -> Self {
        Self {
            ignore_unsupported_value: false,
            ..Self::new(logdir)
        }
    }

    /// Sets the key of the step counter.
    pub fn step_key(mut self, key: impl Into<String>) -> Self {
        self.step_key = key.into();
        self
    }
}

impl Recorder for TensorboardRecorder {
    /// Write a given [Record] into a TFRecord.
    ///
    /// [RecordValue::DateTime] values are discarded.
    fn write(&mut self, record: Record) {
        let step = match record.get(&self.step_key) {
            Some(RecordValue::Scalar(v)) => *v as usize,
            _ => {
                warn!("Record without step key {}, skipped", self.step_key);
                return;
            }
        };

        for (k, v) in record.iter() {
            if *k == self.step_key {
                continue;
            }
            match v {
                RecordValue::Scalar(v) => self.writer.add_scalar(k, *v, step),
                RecordValue::DateTime(_) => {} // discard value
                RecordValue::Array1(data) if !data.is_empty() => {
                    let mean = data.iter().sum::<f32>() / data.len() as f32;
                    let max = data.iter().cloned().fold(f32::MIN, f32::max);
                    self.writer.add_scalar(&format!("{}/mean", k), mean, step);
                    self.writer.add_scalar(&format!("{}/max", k), max, step);
                }
                RecordValue::Array1(_) => {
                    if !self.ignore_unsupported_value {
                        warn!("Empty array under {}", k);
                    }
                }
            };
        }
    }

    fn flush(&mut self) {
        self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_write_records() {
        let dir = TempDir::new("tensorboard").unwrap();
        let mut recorder = TensorboardRecorder::new(dir.path());

        let mut record = Record::from_scalar("buffer/size", 10.0);
        record.insert("wm/loss", RecordValue::Scalar(0.5));
        record.insert("buffer/visits", RecordValue::Array1(vec![1.0, 3.0]));
        recorder.write(record);
        recorder.write(Record::from_scalar("wm/loss", 0.5));
        recorder.flush();

        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_some());
    }
}
