//! Trait tables on disk (CSV through polars).

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use mvbm::api::TraitData;
use nalgebra::DMatrix;
use polars::prelude::*;

/// Reads a CSV with one labelled row per tip. `traits` selects columns;
/// when `None` every column other than `label_column` is used.
pub fn read_traits(path: &Path, label_column: &str, traits: Option<&[String]>) -> Result<TraitData> {
    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(100))
        .finish()
        .and_then(|lf| lf.collect())
        .with_context(|| format!("reading {}", path.display()))?;
    tracing::debug!(rows = df.height(), cols = df.width(), "trait_csv_shape");

    let labels = df
        .column(label_column)
        .with_context(|| format!("{} has no {label_column:?} column", path.display()))?
        .cast(&DataType::String)?;
    let labels: Vec<String> = labels
        .str()?
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.map(str::to_owned)
                .with_context(|| format!("missing label in row {}", i + 1))
        })
        .collect::<Result<_>>()?;

    let names: Vec<String> = match traits {
        Some(t) => t.to_vec(),
        None => df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .filter(|s| s != label_column)
            .collect(),
    };
    if names.is_empty() {
        bail!("{} has no trait columns", path.display());
    }

    let mut columns = Vec::with_capacity(names.len());
    for name in &names {
        let series = df
            .column(name)
            .with_context(|| format!("{} has no {name:?} column", path.display()))?
            .cast(&DataType::Float64)?;
        let values = series
            .f64()?
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.with_context(|| format!("missing {name:?} value in row {}", i + 1)))
            .collect::<Result<Vec<f64>>>()?;
        columns.push(values);
    }
    let values = DMatrix::from_fn(labels.len(), names.len(), |i, j| columns[j][i]);
    Ok(TraitData::new(labels, names, values)?)
}

/// Writes `data` as CSV with the labels in `label_column`.
pub fn write_traits(path: &Path, label_column: &str, data: &TraitData) -> Result<()> {
    let mut columns = vec![Series::new(label_column.into(), &data.labels)];
    for (j, name) in data.traits.iter().enumerate() {
        let values: Vec<f64> = data.values.column(j).iter().copied().collect();
        columns.push(Series::new(name.as_str().into(), values));
    }
    let mut df = DataFrame::new(columns)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
