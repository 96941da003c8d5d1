//! Per-cycle measurement records, the bounded rolling window, and the
//! operator-facing CSV export.

use std::{collections::VecDeque, fs, io::Write as _, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Everything one control-loop iteration measured and decided. Appended
/// exactly once per completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    /// Wall-clock epoch seconds of the capture.
    pub timestamp: f64,
    /// Raw ambient estimate, before screen-bleed correction.
    pub ambient: f64,
    /// Screen brightness at capture time, 0 if unavailable.
    pub screen: f64,
    /// Subtracted screen-bleed correction.
    pub correction: f64,
    /// Corrected brightness percentage.
    pub percent: f64,
    /// Computed target step.
    pub step: i32,
    /// Actuator step actually observed before the cycle.
    pub real_step: i32,
}

impl CycleRecord {
    /// Ambient estimate with the screen-bleed correction removed.
    pub fn corrected_ambient(&self) -> f64 {
        self.ambient - self.correction
    }

    fn csv_row(&self) -> String {
        format!(
            "{:.2},{},{},{:.2},{},{:.1},{},{}\n",
            self.timestamp,
            self.corrected_ambient() as i64,
            self.screen as i64,
            self.correction,
            self.ambient as i64,
            self.percent,
            self.step,
            self.real_step,
        )
    }
}

pub const CSV_HEADER: &str = "Timestamp,Ambient,Screen,Correction,RawAmbient,Percentage,Step,RealStep";

/// Bounded ring of the most recent cycle records. The window feeds the
/// percent smoothing; once full, the oldest record is evicted.
#[derive(Debug)]
pub struct Window {
    records: VecDeque<CycleRecord>,
    capacity: usize,
}

impl Window {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, record: CycleRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn latest(&self) -> Option<&CycleRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Average percent over the window plus one candidate value; used to
    /// smooth the step decision without committing the candidate yet.
    pub fn smoothed_percent(&self, candidate: f64) -> f64 {
        let sum: f64 = self.records.iter().map(|r| r.percent).sum();
        (sum + candidate) / (self.records.len() + 1) as f64
    }

    /// Drops the accumulated window when lighting jumped: old percents would
    /// otherwise drag the smoothed value for many cycles.
    pub fn flush(&mut self) {
        self.records.clear();
    }

    pub fn records(&self) -> impl Iterator<Item = &CycleRecord> {
        self.records.iter()
    }

    pub fn to_vec(&self) -> Vec<CycleRecord> {
        self.records.iter().copied().collect()
    }
}

/// Unbounded export history. Only the operator clears it, through a
/// successful export.
#[derive(Debug, Default)]
pub struct History {
    records: Vec<CycleRecord>,
}

impl History {
    pub fn push(&mut self, record: CycleRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes the history as CSV and clears it on success.
    pub fn export(&mut self, path: &Path) -> Result<usize> {
        let mut out = String::with_capacity(64 * (self.records.len() + 1));
        out.push_str(CSV_HEADER);
        out.push('\n');
        for record in &self.records {
            out.push_str(&record.csv_row());
        }
        let mut file = fs::File::create(path)
            .with_context(|| format!("unable to export to {}", path.display()))?;
        file.write_all(out.as_bytes())
            .with_context(|| format!("unable to export to {}", path.display()))?;
        let exported = self.records.len();
        self.records.clear();
        Ok(exported)
    }
}
