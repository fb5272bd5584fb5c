use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use arrow::array::{
    Array, AsArray, Float32Array, Float64Array, Int32Array, Int64Array, StringArray,
};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{Observation, WaterUseDataset};
use crate::taxonomy::{CITY_ID, PROVINCE, YEAR};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a water-use table from a file.  Dispatch by extension.
///
/// Every format carries the general columns `City_ID`, `Year` and
/// `Province_n`; every other column is an item column holding numbers.
///
/// Supported formats:
/// * `.csv`     – header row; an unnamed leading index column is ignored
/// * `.json`    – `[{ "City_ID": "C1", "Year": 2000, "Province_n": "Gansu", ...items }, ...]`
/// * `.parquet` – one column per field, items as Float64/Float32/Int
pub fn load_file(path: &Path) -> Result<WaterUseDataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let dataset = match ext.as_str() {
        "csv" => load_csv(path),
        "json" => load_json(path),
        "parquet" | "pq" => load_parquet(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
    .with_context(|| format!("loading {}", path.display()))?;

    log::info!(
        "Loaded {} observations: {} cities, {} years, {} item columns",
        dataset.len(),
        dataset.cities.len(),
        dataset.years.len(),
        dataset.item_columns.len()
    );
    Ok(dataset)
}

fn is_general(column: &str) -> bool {
    column == CITY_ID || column == YEAR || column == PROVINCE
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one row per city and year.
/// Empty cells and `NaN` are missing observations.
fn load_csv(path: &Path) -> Result<WaterUseDataset> {
    let reader = csv::Reader::from_path(path).context("opening CSV")?;
    read_csv(reader)
}

fn read_csv<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<WaterUseDataset> {
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("CSV missing '{name}' column"))
    };
    let city_idx = position(CITY_ID)?;
    let year_idx = position(YEAR)?;
    let province_idx = position(PROVINCE)?;

    // Everything else is an item, except a blank index column left by
    // dataframe exports.
    let item_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.is_empty() && !is_general(h))
        .map(|(i, h)| (i, h.clone()))
        .collect();

    let mut rows = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        let year = field(year_idx)
            .parse::<i32>()
            .with_context(|| format!("CSV row {row_no}: '{}' is not a year", field(year_idx)))?;

        let mut values = BTreeMap::new();
        for (col_idx, col_name) in &item_cols {
            let value = parse_cell(field(*col_idx))
                .with_context(|| format!("CSV row {row_no}, column '{col_name}'"))?;
            values.insert(col_name.clone(), value);
        }

        rows.push(Observation {
            city_id: field(city_idx).to_string(),
            year,
            province: field(province_idx).to_string(),
            values,
        });
    }

    let item_columns = item_cols.into_iter().map(|(_, name)| name).collect();
    WaterUseDataset::from_observations(item_columns, rows)
}

fn parse_cell(s: &str) -> Result<Option<f64>> {
    if s.is_empty() || s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    let v = s
        .replace(',', "")
        .parse::<f64>()
        .map_err(|_| anyhow!("'{s}' is not a number"))?;
    Ok((!v.is_nan()).then_some(v))
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, the default `df.to_json(orient='records')`):
///
/// ```json
/// [
///   {
///     "City_ID": "C1",
///     "Year": 2000,
///     "Province_n": "Gansu",
///     "Irrigation WU: Rice": 12.5,
///     "Irrigation WU: Wheat": null
///   },
///   ...
/// ]
/// ```
fn load_json(path: &Path) -> Result<WaterUseDataset> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    parse_json(&text)
}

fn parse_json(text: &str) -> Result<WaterUseDataset> {
    let root: JsonValue = serde_json::from_str(text).context("parsing JSON")?;

    let records = root
        .as_array()
        .context("Expected top-level JSON array")?;

    let mut item_columns: Vec<String> = Vec::new();
    let mut rows = Vec::with_capacity(records.len());

    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let city_id = match obj.get(CITY_ID) {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => bail!("Row {i}: missing or invalid '{CITY_ID}'"),
        };
        let year = obj
            .get(YEAR)
            .and_then(JsonValue::as_i64)
            .and_then(|y| i32::try_from(y).ok())
            .with_context(|| format!("Row {i}: missing or invalid '{YEAR}'"))?;
        let province = obj
            .get(PROVINCE)
            .and_then(JsonValue::as_str)
            .with_context(|| format!("Row {i}: missing or invalid '{PROVINCE}'"))?
            .to_string();

        let mut values = BTreeMap::new();
        for (key, val) in obj {
            if is_general(key) {
                continue;
            }
            let value = match val {
                JsonValue::Null => None,
                JsonValue::Number(n) => n.as_f64(),
                other => bail!("Row {i}, '{key}': expected a number, got {other}"),
            };
            if !item_columns.contains(key) {
                item_columns.push(key.clone());
            }
            values.insert(key.clone(), value);
        }

        rows.push(Observation {
            city_id,
            year,
            province,
            values,
        });
    }

    WaterUseDataset::from_observations(item_columns, rows)
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file with one column per field.
///
/// Expected schema:
/// - `City_ID`: Utf8 / LargeUtf8 (integer ids are converted to text)
/// - `Year`: Int32 or Int64
/// - `Province_n`: Utf8 / LargeUtf8
/// - Any other columns are items (Float64, Float32, Int32, Int64)
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`).
fn load_parquet(path: &Path) -> Result<WaterUseDataset> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut item_columns: Vec<String> = Vec::new();
    let mut rows = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let n_rows = batch.num_rows();

        let column = |name: &str| {
            schema
                .index_of(name)
                .map(|idx| batch.column(idx))
                .map_err(|_| anyhow!("Parquet file missing '{name}' column"))
        };
        let city_col = column(CITY_ID)?;
        let year_col = column(YEAR)?;
        let province_col = column(PROVINCE)?;

        let items: Vec<(usize, String)> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| !is_general(f.name()))
            .map(|(i, f)| (i, f.name().clone()))
            .collect();
        for (_, name) in &items {
            if !item_columns.contains(name) {
                item_columns.push(name.clone());
            }
        }

        for row in 0..n_rows {
            let city_id = extract_text(city_col, row)
                .with_context(|| format!("Row {row}: failed to read '{CITY_ID}'"))?;
            let year = extract_year(year_col, row)
                .with_context(|| format!("Row {row}: failed to read '{YEAR}'"))?;
            let province = extract_text(province_col, row)
                .with_context(|| format!("Row {row}: failed to read '{PROVINCE}'"))?;

            let mut values = BTreeMap::new();
            for (col_idx, col_name) in &items {
                let value = extract_number(batch.column(*col_idx), row)
                    .with_context(|| format!("Row {row}: failed to read '{col_name}'"))?;
                values.insert(col_name.clone(), value);
            }

            rows.push(Observation {
                city_id,
                year,
                province,
                values,
            });
        }
    }

    WaterUseDataset::from_observations(item_columns, rows)
}

// -- Parquet / Arrow helpers --

/// Extract a text cell; integer ids are rendered as text.
fn extract_text(col: &Arc<dyn Array>, row: usize) -> Result<String> {
    if col.is_null(row) {
        bail!("null value in identifying column");
    }
    match col.data_type() {
        DataType::Utf8 => {
            let arr = col
                .as_any()
                .downcast_ref::<StringArray>()
                .context("expected StringArray")?;
            Ok(arr.value(row).to_string())
        }
        DataType::LargeUtf8 => Ok(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 | DataType::Int64 => Ok(format!(
            "{}",
            extract_number(col, row)?.context("null id")? as i64
        )),
        other => bail!("Expected a text column, got {other:?}"),
    }
}

/// Extract a year; it must be a whole number that fits an `i32`.
fn extract_year(col: &Arc<dyn Array>, row: usize) -> Result<i32> {
    let value = extract_number(col, row)?.context("null year")?;
    if value.fract() != 0.0 || value < i32::MIN as f64 || value > i32::MAX as f64 {
        bail!("{value} is not a year");
    }
    Ok(value as i32)
}

/// Extract a numeric cell as `f64`; nulls and NaN become `None`.
fn extract_number(col: &Arc<dyn Array>, row: usize) -> Result<Option<f64>> {
    if col.is_null(row) {
        return Ok(None);
    }
    let value = match col.data_type() {
        DataType::Float64 => col
            .as_any()
            .downcast_ref::<Float64Array>()
            .context("expected Float64Array")?
            .value(row),
        DataType::Float32 => col
            .as_any()
            .downcast_ref::<Float32Array>()
            .context("expected Float32Array")?
            .value(row) as f64,
        DataType::Int64 => col
            .as_any()
            .downcast_ref::<Int64Array>()
            .context("expected Int64Array")?
            .value(row) as f64,
        DataType::Int32 => col
            .as_any()
            .downcast_ref::<Int32Array>()
            .context("expected Int32Array")?
            .value(row) as f64,
        other => bail!("Expected a numeric column, got {other:?}"),
    };
    Ok((!value.is_nan()).then_some(value))
}
