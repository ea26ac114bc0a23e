//! File loading and report writing for the command-line front end.

use std::fs;
use std::path::{Path, PathBuf};

use csv::{Reader, Writer};
use serde::{Deserialize, Serialize};

use crate::config::InferenceConfig;
use crate::error::Result;
use crate::pipeline::InferenceResult;
use crate::variant::{ReadCounts, Variant};

#[derive(Debug, Deserialize)]
struct CountRecord {
    variant_id: String,
    alt: u64,
    total: u64,
}

/// Read a CSV with columns `variant_id,alt,total`.
pub fn read_counts(path: &Path) -> Result<ReadCounts> {
    let mut reader = Reader::from_path(path)?;
    let mut variants = Vec::new();
    for record in reader.deserialize() {
        let record: CountRecord = record?;
        variants.push(Variant {
            id: record.variant_id,
            alt: record.alt,
            total: record.total,
        });
    }
    ReadCounts::from_variants(variants)
}

pub fn load_config(path: &Path) -> Result<InferenceConfig> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct ClusterRow {
    cluster: usize,
    vaf: f64,
    variants: usize,
}

/// `out` + `tree.json` -> `out.tree.json`; dots already in the prefix are kept.
fn output_path(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Write every report table next to `prefix` and return the paths written.
pub fn write_outputs(prefix: &Path, result: &InferenceResult) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    let path = output_path(prefix, "cluster_bic.csv");
    write_rows(&path, &result.clustering.scores)?;
    written.push(path);

    let clusters: Vec<ClusterRow> = result
        .clustering
        .vafs
        .iter()
        .enumerate()
        .map(|(i, &vaf)| ClusterRow {
            cluster: i + 1,
            vaf,
            variants: result.clustering.labels.iter().filter(|&&l| l == i + 1).count(),
        })
        .collect();
    let path = output_path(prefix, "clusters.csv");
    write_rows(&path, &clusters)?;
    written.push(path);

    let path = output_path(prefix, "clone_bic.csv");
    write_rows(&path, &result.clone_scores)?;
    written.push(path);

    let path = output_path(prefix, "chains.csv");
    write_rows(&path, &result.chain_diagnostics)?;
    written.push(path);

    let path = output_path(prefix, "configurations.csv");
    write_rows(&path, &result.posterior.summary())?;
    written.push(path);

    let path = output_path(prefix, "assignments.csv");
    write_rows(&path, &result.best.assignments)?;
    written.push(path);

    let path = output_path(prefix, "tree.json");
    fs::write(&path, serde_json::to_string_pretty(&result.best.tree)?)?;
    written.push(path);

    Ok(written)
}
