use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use arrow::array::{ArrayRef, Float64Array, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::taxonomy::{CITY_ID, GENERAL_COLUMNS, PROVINCE, YEAR};

// ---------------------------------------------------------------------------
// Observation – one row of the source table
// ---------------------------------------------------------------------------

/// One city in one year.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub city_id: String,
    pub year: i32,
    pub province: String,
    /// Item columns: column_name → value (`None` when not observed).
    pub values: BTreeMap<String, Option<f64>>,
}

impl Observation {
    pub fn value(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied().flatten()
    }
}

// ---------------------------------------------------------------------------
// WaterUseDataset – the complete loaded table
// ---------------------------------------------------------------------------

/// The full parsed dataset with its extent pre-computed.
///
/// Read-only once built; share it behind an `Arc` between scope filters.
#[derive(Debug, Clone)]
pub struct WaterUseDataset {
    /// All observations (rows), in file order.
    pub rows: Vec<Observation>,
    /// Item columns in file order (excludes the general columns).
    pub item_columns: Vec<String>,
    pub years: BTreeSet<i32>,
    pub cities: BTreeSet<String>,
    pub provinces: BTreeSet<String>,
}

impl WaterUseDataset {
    /// Index the observations. Fails when `(city_id, year)` repeats.
    pub fn from_observations(item_columns: Vec<String>, rows: Vec<Observation>) -> Result<Self> {
        let mut keys = HashSet::with_capacity(rows.len());
        let mut years = BTreeSet::new();
        let mut cities = BTreeSet::new();
        let mut provinces = BTreeSet::new();

        for row in &rows {
            if !keys.insert((row.city_id.as_str(), row.year)) {
                bail!("Duplicate row for city {} in {}", row.city_id, row.year);
            }
            years.insert(row.year);
            cities.insert(row.city_id.clone());
            provinces.insert(row.province.clone());
        }

        Ok(WaterUseDataset {
            rows,
            item_columns,
            years,
            cities,
            provinces,
        })
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.item_columns.iter().any(|c| c == column)
    }
}

// ---------------------------------------------------------------------------
// Table – a filtered, column-selected copy handed to collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub city_id: String,
    pub year: i32,
    pub province: String,
    /// Aligned with [`Table::columns`].
    pub values: Vec<Option<f64>>,
}

/// Rows restricted to the visible scope over the general columns plus the
/// visible item columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    /// Physical unit of each column once converted, aligned with `columns`.
    pub units: Vec<Option<String>>,
    pub rows: Vec<TableRow>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// General columns followed by the item columns.
    pub fn header(&self) -> Vec<String> {
        GENERAL_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.columns.iter().cloned())
            .collect()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn unit_of(&self, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.units.get(idx)?.as_deref()
    }

    /// Values of one column, row by row.
    pub fn column(&self, column: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Build an Arrow batch with the general columns first.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = vec![
            Field::new(CITY_ID, DataType::Utf8, false),
            Field::new(YEAR, DataType::Int32, false),
            Field::new(PROVINCE, DataType::Utf8, false),
        ];
        fields.extend(
            self.columns
                .iter()
                .map(|c| Field::new(c.as_str(), DataType::Float64, true)),
        );

        let mut arrays: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                self.rows.iter().map(|r| r.city_id.as_str()),
            )),
            Arc::new(Int32Array::from_iter_values(self.rows.iter().map(|r| r.year))),
            Arc::new(StringArray::from_iter_values(
                self.rows.iter().map(|r| r.province.as_str()),
            )),
        ];
        for idx in 0..self.columns.len() {
            let values: Float64Array = self.rows.iter().map(|r| r.values[idx]).collect();
            arrays.push(Arc::new(values));
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }

    /// Write the table as CSV; missing values become empty cells.
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.header())?;
        for row in &self.rows {
            let mut record = vec![row.city_id.clone(), row.year.to_string(), row.province.clone()];
            record.extend(
                row.values
                    .iter()
                    .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
            );
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use arrow::array::Array;

    pub(crate) fn obs(city: &str, year: i32, province: &str, values: &[(&str, f64)]) -> Observation {
        Observation {
            city_id: city.to_string(),
            year,
            province: province.to_string(),
            values: values
                .iter()
                .map(|(c, v)| (c.to_string(), Some(*v)))
                .collect(),
        }
    }

    #[test]
    fn from_observations_indexes_extent() {
        let ds = WaterUseDataset::from_observations(
            vec!["a".into()],
            vec![
                obs("c1", 2000, "A", &[("a", 1.0)]),
                obs("c2", 2001, "A", &[("a", 2.0)]),
                obs("c3", 2000, "B", &[]),
            ],
        )
        .unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.years, BTreeSet::from([2000, 2001]));
        assert_eq!(ds.cities.len(), 3);
        assert_eq!(ds.provinces, BTreeSet::from(["A".to_string(), "B".to_string()]));
        assert_eq!(ds.rows[2].value("a"), None);
    }

    #[test]
    fn duplicate_city_year_is_rejected() {
        let err = WaterUseDataset::from_observations(
            vec![],
            vec![obs("c1", 2000, "A", &[]), obs("c1", 2000, "B", &[])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("c1"));
    }

    fn table() -> Table {
        Table {
            columns: vec!["x".into(), "y".into()],
            units: vec![None, Some("mm".into())],
            rows: vec![
                TableRow {
                    city_id: "c1".into(),
                    year: 2000,
                    province: "A".into(),
                    values: vec![Some(1.5), None],
                },
                TableRow {
                    city_id: "c2".into(),
                    year: 2000,
                    province: "B".into(),
                    values: vec![Some(2.0), Some(3.0)],
                },
            ],
        }
    }

    #[test]
    fn table_columns_and_units() {
        let t = table();
        assert_eq!(t.header(), vec!["City_ID", "Year", "Province_n", "x", "y"]);
        assert_eq!(t.column("y").unwrap(), vec![None, Some(3.0)]);
        assert_eq!(t.unit_of("y"), Some("mm"));
        assert_eq!(t.unit_of("x"), None);
        assert!(t.column("z").is_none());
    }

    #[test]
    fn table_to_record_batch_keeps_nulls() {
        let batch = table().to_record_batch().unwrap();
        assert_eq!(batch.num_columns(), 5);
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.column(4).null_count(), 1);
    }

    #[test]
    fn table_writes_csv_with_empty_missing_cells() {
        let mut buf = Vec::new();
        table().write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "City_ID,Year,Province_n,x,y");
        assert_eq!(lines[1], "c1,2000,A,1.5,");
    }
}
