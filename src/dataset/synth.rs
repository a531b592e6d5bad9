//! Random sparse dataset generator

use std::io::Write;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use super::DatasetError;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthOptions {
    pub samples: usize,
    pub features: usize,
    /// Inclusive range of features switched on per sample
    pub min_active: usize,
    pub max_active: usize,
    pub seed: u64,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            samples: 200,
            features: 200,
            min_active: 20,
            max_active: 50,
            seed: 0,
        }
    }
}

impl SynthOptions {
    fn validate(&self) -> Result<(), DatasetError> {
        if self.features == 0 {
            return Err(DatasetError::InvalidOptions(
                "at least one feature is required".to_string(),
            ));
        }
        if self.min_active > self.max_active {
            return Err(DatasetError::InvalidOptions(format!(
                "min active features ({}) exceeds max ({})",
                self.min_active, self.max_active
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SynthStats {
    pub samples: usize,
    pub features: usize,
    /// Non-empty cells written
    pub cells: usize,
}

pub fn feature_name(index: usize) -> String {
    format!("f{}", index)
}

pub fn sample_name(index: usize) -> String {
    format!("s{}", index)
}

/// Write a random sparse dataset as CSV
///
/// Each sample draws how many features to switch on, then picks that many
/// feature indices with replacement, so a sample may end up with fewer
/// distinct active features than drawn.
pub fn generate<W: Write>(writer: W, options: &SynthOptions) -> Result<SynthStats, DatasetError> {
    options.validate()?;

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut out = csv::Writer::from_writer(writer);

    let mut header = Vec::with_capacity(options.features + 1);
    header.push("sample".to_string());
    header.extend((0..options.features).map(feature_name));
    out.write_record(&header)?;

    let mut stats = SynthStats {
        samples: options.samples,
        features: options.features,
        cells: 0,
    };
    let mut row = vec![0.0f64; options.features];
    let mut record = Vec::with_capacity(options.features + 1);
    for k in 0..options.samples {
        row.iter_mut().for_each(|v| *v = 0.0);
        let active = rng.random_range(options.min_active..=options.max_active);
        for _ in 0..active {
            let idx = rng.random_range(0..options.features);
            row[idx] = rng.random();
        }

        record.clear();
        record.push(sample_name(k));
        for &value in &row {
            if value == 0.0 {
                record.push(String::new());
            } else {
                record.push(value.to_string());
                stats.cells += 1;
            }
        }
        out.write_record(&record)?;
    }

    out.flush()?;
    Ok(stats)
}
