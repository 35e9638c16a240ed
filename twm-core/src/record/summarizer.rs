//! Accumulation of records between emissions.
use super::{Record, RecordValue};
use std::collections::HashSet;
use xxhash_rust::xxh3::Xxh3Builder;

/// Accumulates records and summarizes them on demand.
///
/// Scalars are averaged over the stored records, except for the keys given at
/// construction, which keep the most recent value (e.g., the buffer size).
/// Non-scalar values always keep the most recent value.
pub struct MetricsSummarizer {
    data: Vec<Record>,
    except_keys: HashSet<String, Xxh3Builder>,
}

impl MetricsSummarizer {
    /// Creates a summarizer. Scalars under `except_keys` are not averaged.
    pub fn new<K: AsRef<str>>(except_keys: &[K]) -> Self {
        Self {
            data: vec![],
            except_keys: except_keys.iter().map(|k| k.as_ref().to_string()).collect(),
        }
    }

    /// Stores a record.
    pub fn append(&mut self, record: Record) {
        self.data.push(record);
    }

    /// Returns the number of records stored since the last summary.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no record is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn keys(&self) -> HashSet<String, Xxh3Builder> {
        let mut keys = HashSet::<String, Xxh3Builder>::default();
        for record in self.data.iter() {
            for k in record.keys() {
                keys.insert(k.clone());
            }
        }
        keys
    }

    fn last(&self, key: &str) -> Option<RecordValue> {
        self.data
            .iter()
            .rev()
            .find_map(|record| record.get(key).cloned())
    }

    fn mean(&self, key: &str) -> Option<RecordValue> {
        let vs: Vec<f32> = self
            .data
            .iter()
            .filter_map(|record| match record.get(key) {
                Some(RecordValue::Scalar(v)) => Some(*v),
                _ => None,
            })
            .collect();
        if vs.is_empty() {
            None
        } else {
            Some(RecordValue::Scalar(vs.iter().sum::<f32>() / vs.len() as f32))
        }
    }

    /// Summarizes the stored records and clears the storage.
    pub fn summarize(&mut self) -> Record {
        let mut record = Record::empty();

        for key in self.keys().iter() {
            let value = match self.last(key) {
                Some(RecordValue::Scalar(v)) if !self.except_keys.contains(key) => {
                    self.mean(key).unwrap_or(RecordValue::Scalar(v))
                }
                Some(v) => v,
                None => continue,
            };
            record.insert(key.clone(), value);
        }

        self.data = vec![];
        record
    }

    /// Averages the scalars of the given records; other values keep the latest one.
    pub fn mean_records(records: Vec<Record>) -> Record {
        let mut summarizer = Self::new::<&str>(&[]);
        for record in records {
            summarizer.append(record);
        }
        summarizer.summarize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_except_keys() {
        let mut summarizer = MetricsSummarizer::new(&["buffer/size"]);
        summarizer.append(Record::from_slice(&[
            ("buffer/size", RecordValue::Scalar(10.0)),
            ("wm/loss", RecordValue::Scalar(1.0)),
        ]));
        summarizer.append(Record::from_slice(&[
            ("buffer/size", RecordValue::Scalar(20.0)),
            ("wm/loss", RecordValue::Scalar(3.0)),
            ("buffer/visits", RecordValue::Array1(vec![1.0, 2.0])),
        ]));

        let record = summarizer.summarize();
        assert_eq!(record.get_scalar("buffer/size").unwrap(), 20.0);
        assert_eq!(record.get_scalar("wm/loss").unwrap(), 2.0);
        assert_eq!(record.get_array1("buffer/visits").unwrap(), vec![1.0, 2.0]);
        assert!(summarizer.is_empty());
        assert!(summarizer.summarize().is_empty());
    }

    #[test]
    fn test_mean_records_skips_missing_keys() {
        let record = MetricsSummarizer::mean_records(vec![
            Record::from_scalar("a", 1.0),
            Record::from_scalar("b", 4.0),
            Record::from_scalar("a", 2.0),
        ]);
        assert_eq!(record.get_scalar("a").unwrap(), 1.5);
        assert_eq!(record.get_scalar("b").unwrap(), 4.0);
    }
}
