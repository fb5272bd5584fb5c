use crate::scope::Scope;

use super::model::{Table, TableRow, WaterUseDataset};

// ---------------------------------------------------------------------------
// Row predicate: which observations the scope keeps
// ---------------------------------------------------------------------------

/// Return indices of observations inside the scope's time range and city set.
pub fn visible_rows(dataset: &WaterUseDataset, scope: &Scope) -> Vec<usize> {
    dataset
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| scope.admits(row.year, &row.city_id))
        .map(|(i, _)| i)
        .collect()
}

/// Copy the visible rows over the given item columns.
///
/// A column the dataset does not carry yields `None` in every row rather
/// than an error; the taxonomy may name items a particular file lacks.
pub fn view(dataset: &WaterUseDataset, scope: &Scope, columns: &[String]) -> Table {
    let missing: Vec<&String> = columns.iter().filter(|c| !dataset.has_column(c)).collect();
    if !missing.is_empty() {
        log::debug!("{} visible columns absent from the dataset", missing.len());
    }

    let rows = visible_rows(dataset, scope)
        .into_iter()
        .map(|idx| {
            let row = &dataset.rows[idx];
            TableRow {
                city_id: row.city_id.clone(),
                year: row.year,
                province: row.province.clone(),
                values: columns.iter().map(|c| row.value(c)).collect(),
            }
        })
        .collect();

    Table {
        columns: columns.to_vec(),
        units: vec![None; columns.len()],
        rows,
    }
}
