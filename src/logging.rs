//! Sample logging to JSON Lines and end-of-run summaries.

use crate::channel::Sample;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// A sample as written to the log, stamped with its arrival time
#[derive(Debug, Serialize)]
struct LoggedSample<'a> {
    timestamp: DateTime<Utc>,
    values: &'a Sample,
}

/// Logger for writing samples to a JSON Lines file
pub struct SampleLogger {
    writer: BufWriter<File>,
    samples_written: u64,
}

impl SampleLogger {
    /// Create a new logger writing to the specified file
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path.as_ref())?;

        Ok(Self {
            writer: BufWriter::new(file),
            samples_written: 0,
        })
    }

    /// Append a sample to the log file
    pub fn log(&mut self, sample: &Sample) -> io::Result<()> {
        let record = LoggedSample {
            timestamp: Utc::now(),
            values: sample,
        };
        let json = serde_json::to_string(&record)?;
        writeln!(self.writer, "{}", json)?;
        self.samples_written += 1;

        // Flush every 10 samples to avoid losing data on crash
        if self.samples_written % 10 == 0 {
            self.writer.flush()?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl Drop for SampleLogger {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Statistics for one reported field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSummary {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub last: f64,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub duration_secs: f64,
    pub samples_count: u64,
    pub fields: Vec<FieldSummary>,
}

#[derive(Debug, Clone)]
struct FieldStats {
    name: String,
    min: f64,
    max: f64,
    sum: f64,
    count: u64,
    last: f64,
}

impl FieldStats {
    fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            min: value,
            max: value,
            sum: value,
            count: 1,
            last: value,
        }
    }

    fn push(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
        self.last = value;
    }
}

/// Running statistics over the samples of a run
pub struct SummaryAccumulator {
    fields: Vec<FieldStats>,
    samples: u64,
    start_time: Option<DateTime<Utc>>,
    last_time: Option<DateTime<Utc>>,
}

impl SummaryAccumulator {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            samples: 0,
            start_time: None,
            last_time: None,
        }
    }

    /// Add a sample to the accumulator
    pub fn add_sample(&mut self, sample: &Sample) {
        self.add_sample_at(sample, Utc::now());
    }

    fn add_sample_at(&mut self, sample: &Sample, at: DateTime<Utc>) {
        if self.start_time.is_none() {
            self.start_time = Some(at);
        }
        self.last_time = Some(at);
        self.samples += 1;

        for (name, value) in sample.iter() {
            match self.fields.iter_mut().find(|f| f.name == name) {
                Some(stats) => stats.push(value),
                None => self.fields.push(FieldStats::new(name, value)),
            }
        }
    }

    /// Generate summary from accumulated samples
    pub fn generate_summary(&self) -> Option<RunSummary> {
        let (start, end) = (self.start_time?, self.last_time?);
        let duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;

        Some(RunSummary {
            duration_secs,
            samples_count: self.samples,
            fields: self
                .fields
                .iter()
                .map(|f| FieldSummary {
                    name: f.name.clone(),
                    min: f.min,
                    max: f.max,
                    mean: f.sum / f.count as f64,
                    last: f.last,
                })
                .collect(),
        })
    }
}

impl Default for SummaryAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::fs;

    fn sample(step: f64, temp: f64) -> Sample {
        Sample::new(vec![("Step".into(), step), ("Temperature".into(), temp)])
    }

    #[test]
    fn logger_writes_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.jsonl");
        {
            let mut logger = SampleLogger::new(&path).unwrap();
            logger.log(&sample(10.0, 300.0)).unwrap();
            logger.log(&sample(20.0, 301.5)).unwrap();
            assert_eq!(logger.samples_written(), 2);
        }

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["values"]["Step"], 20.0);
        assert_eq!(second["values"]["Temperature"], 301.5);
        assert!(second["timestamp"].is_string());
        // key order follows the reporter
        assert!(lines[0].find("\"Step\"").unwrap() < lines[0].find("\"Temperature\"").unwrap());
    }

    #[test]
    fn summary_tracks_per_field_statistics() {
        let mut acc = SummaryAccumulator::new();
        assert!(acc.generate_summary().is_none());

        let t0 = Utc::now();
        acc.add_sample_at(&sample(10.0, 300.0), t0);
        acc.add_sample_at(&sample(20.0, 310.0), t0 + Duration::milliseconds(500));
        acc.add_sample_at(&sample(30.0, 290.0), t0 + Duration::milliseconds(1500));

        let summary = acc.generate_summary().unwrap();
        assert_eq!(summary.samples_count, 3);
        assert!((summary.duration_secs - 1.5).abs() < 1e-9);
        let temp = &summary.fields[1];
        assert_eq!(temp.name, "Temperature");
        assert_eq!((temp.min, temp.max, temp.last), (290.0, 310.0, 290.0));
        assert!((temp.mean - 300.0).abs() < 1e-9);
    }
}
