//! Types and traits for recording metrics of a training run.
//!
//! A [`Record`] maps string keys to [`RecordValue`]s. The [`Trainer`](crate::Trainer)
//! collects records from the replay store, the models and the evaluator, folds them
//! with a [`MetricsSummarizer`] and hands the summaries to a [`Recorder`].
//!
//! ```rust
//! use twm_core::record::{Record, RecordValue};
//!
//! let mut record = Record::from_scalar("loss", 0.5);
//! record.insert("visits", RecordValue::Array1(vec![1.0, 0.0, 2.0]));
//! let record = record.with_prefix("wm/");
//! assert_eq!(record.get_scalar("wm/loss").unwrap(), 0.5);
//! ```
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;
mod summarizer;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::Recorder;
pub use summarizer::MetricsSummarizer;
