use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::color::{Classification, SequentialMap};
use crate::data::loader::load_file;
use crate::data::model::{Table, WaterUseDataset};
use crate::geo::{aggregate, Aggregation, Boundaries};
use crate::scope::{Dimension, ScopeError, ScopeFilter, ScopeWarning};
use crate::taxonomy::Taxonomy;
use crate::units::{convert_column, UnitRegistry};

/// Number of colour classes on the map.
pub const DEFAULT_CLASSES: usize = 5;

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
pub struct AppState {
    /// Column catalogue shared by every scope filter.
    pub taxonomy: Arc<Taxonomy>,

    pub units: UnitRegistry,

    /// Narrowing session (None until user loads a dataset).
    pub filter: Option<ScopeFilter>,

    /// Prefecture outlines (None until user loads them).
    pub boundaries: Option<Boundaries>,

    /// Current scope applied to the dataset (cached).
    pub view: Table,

    /// Item columns in view (cached).
    pub visible_columns: Vec<String>,

    /// Column shown on the map.
    pub map_column: Option<String>,

    /// Unit the map column is shown in; empty keeps the recorded unit.
    pub map_unit: String,

    pub aggregation: Aggregation,
    pub classification: Classification,
    pub classes: usize,

    /// One value per city for the map column (cached).
    pub map_values: BTreeMap<String, f64>,

    /// Active colour map.
    pub color_map: Option<SequentialMap>,

    /// Ids of the outlines drawn for the cities in scope (cached).
    pub map_regions: Vec<String>,

    /// Values ticked in the side panel, keyed by scope key.
    pub picks: BTreeMap<&'static str, BTreeSet<String>>,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,
}

impl AppState {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        Self {
            taxonomy,
            units: UnitRegistry::default(),
            filter: None,
            boundaries: None,
            view: Table::default(),
            visible_columns: Vec::new(),
            map_column: None,
            map_unit: String::new(),
            aggregation: Aggregation::default(),
            classification: Classification::default(),
            classes: DEFAULT_CLASSES,
            map_values: BTreeMap::new(),
            color_map: None,
            map_regions: Vec::new(),
            picks: BTreeMap::new(),
            status_message: None,
        }
    }

    /// Ingest a newly loaded dataset and start a fresh scope.
    pub fn set_dataset(&mut self, dataset: WaterUseDataset) {
        self.filter = Some(ScopeFilter::new(Arc::new(dataset), self.taxonomy.clone()));
        self.picks.clear();
        self.status_message = None;
        self.refresh();
    }

    pub fn set_boundaries(&mut self, boundaries: Boundaries) {
        self.boundaries = Some(boundaries);
        self.status_message = None;
        self.rebuild_map();
    }

    /// Load a dataset file, reporting failures in the status line.
    pub fn open_dataset(&mut self, path: &Path) {
        match load_file(path) {
            Ok(dataset) => self.set_dataset(dataset),
            Err(e) => {
                log::error!("Failed to load file: {e:#}");
                self.status_message = Some(format!("Error: {e:#}"));
            }
        }
    }

    pub fn open_boundaries(&mut self, path: &Path) {
        match Boundaries::load(path) {
            Ok(boundaries) => self.set_boundaries(boundaries),
            Err(e) => {
                log::error!("Failed to load boundaries: {e:#}");
                self.status_message = Some(format!("Error: {e:#}"));
            }
        }
    }

    /// Narrow `key` to (or, with `keep == false`, away from) the ticked
    /// values.
    pub fn apply_picks(&mut self, key: &'static str, keep: bool) -> Result<(), ScopeError> {
        let picked: Vec<String> = self.picks.remove(key).unwrap_or_default().into_iter().collect();
        if picked.is_empty() {
            return Ok(());
        }
        let values: Vec<&str> = picked.iter().map(String::as_str).collect();
        let Some(filter) = self.filter.as_mut() else {
            return Ok(());
        };
        let warnings = if keep {
            filter.update_scope(key, Some(&values), None)?
        } else {
            filter.update_scope(key, None, Some(&values))?
        };
        self.report(&warnings);
        self.refresh();
        Ok(())
    }

    pub fn toggle_pick(&mut self, key: &'static str, value: &str) {
        let picked = self.picks.entry(key).or_default();
        if !picked.remove(value) {
            picked.insert(value.to_string());
        }
    }

    pub fn is_picked(&self, key: &str, value: &str) -> bool {
        self.picks.get(key).is_some_and(|p| p.contains(value))
    }

    pub fn clear(&mut self, dims: &[Dimension]) {
        if let Some(filter) = self.filter.as_mut() {
            filter.clear(dims);
            self.status_message = None;
            self.refresh();
        }
    }

    pub fn undo(&mut self) {
        if self.filter.as_mut().is_some_and(ScopeFilter::undo) {
            self.refresh();
        }
    }

    pub fn redo(&mut self) {
        if self.filter.as_mut().is_some_and(ScopeFilter::redo) {
            self.refresh();
        }
    }

    pub fn set_map_column(&mut self, column: String) {
        self.map_column = Some(column);
        self.map_unit.clear();
        self.refresh();
    }

    /// Recompute the cached view, columns and map after a scope change.
    pub fn refresh(&mut self) {
        let Some(filter) = &self.filter else {
            return;
        };
        self.view = filter.view();
        self.visible_columns = self.view.columns.clone();

        let keep = self
            .map_column
            .as_ref()
            .is_some_and(|c| self.visible_columns.contains(c));
        if !keep {
            self.map_column = self.visible_columns.first().cloned();
            self.map_unit.clear();
        }
        self.rebuild_map();
    }

    /// Convert the map column to `map_unit` and rebuild the colour map.
    pub fn rebuild_map(&mut self) {
        self.map_values.clear();
        self.color_map = None;
        self.map_regions = match (&self.boundaries, &self.filter) {
            (Some(boundaries), Some(filter)) => boundaries
                .geometries_for(filter.scope().cities.iter().map(String::as_str))
                .into_iter()
                .map(|r| r.id.clone())
                .collect(),
            _ => Vec::new(),
        };
        let Some(column) = self.map_column.clone() else {
            return;
        };

        let unit = self.map_unit.trim().to_string();
        if !unit.is_empty() {
            if let Err(e) = convert_column(&mut self.view, &self.units, &self.taxonomy, &column, &unit) {
                log::warn!("Failed to convert '{column}' to {unit}: {e}");
                self.status_message = Some(format!("Units: {e}"));
            }
        }

        if let Some(values) = aggregate(&self.view, &column, self.aggregation) {
            let all: Vec<f64> = values.values().copied().collect();
            self.color_map = Some(SequentialMap::new(&column, &all, self.classes, self.classification));
            self.map_values = values;
        }
    }

    /// City drawn under `[lon, lat]` and its mapped value.
    pub fn region_at(&self, point: [f64; 2]) -> Option<(&str, Option<f64>)> {
        let region = self.boundaries.as_ref()?.region_at(point)?;
        let id = self.map_regions.iter().find(|id| **id == region.id)?;
        Some((id.as_str(), self.map_values.get(id).copied()))
    }

    /// The map is rebuilt from a fresh view so repeated conversions do not
    /// compound.
    pub fn set_map_unit(&mut self, unit: String) {
        self.map_unit.clear();
        self.refresh();
        self.map_unit = unit;
        self.rebuild_map();
    }

    /// Write the current (converted) view to disk.
    pub fn export_view(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path).context("creating export file")?;
        self.view.write_csv(file)?;
        log::info!("Exported {} rows to {}", self.view.len(), path.display());
        Ok(())
    }

    fn report(&mut self, warnings: &[ScopeWarning]) {
        self.status_message = match warnings {
            [] => None,
            [w] => Some(w.to_string()),
            [w, rest @ ..] => Some(format!("{w} (+{} more)", rest.len())),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::tests::obs;

    const MAIZE_WUI: &str = "Irrigation water-use intensity (WUI): Maize";
    const RICE_WU: &str = "Irrigation WU: Rice";

    fn state() -> AppState {
        let rows = vec![
            obs("c1", 2000, "A", &[(MAIZE_WUI, 100.0), (RICE_WU, 1.0)]),
            obs("c1", 2001, "A", &[(MAIZE_WUI, 300.0), (RICE_WU, 2.0)]),
            obs("c2", 2000, "B", &[(MAIZE_WUI, 50.0), (RICE_WU, 3.0)]),
        ];
        let ds = WaterUseDataset::from_observations(
            vec![MAIZE_WUI.to_string(), RICE_WU.to_string()],
            rows,
        )
        .unwrap();
        let mut state = AppState::new(Taxonomy::standard());
        state.set_dataset(ds);
        state
    }

    #[test]
    fn loading_selects_first_visible_column() {
        let s = state();
        assert_eq!(s.view.len(), 3);
        assert_eq!(s.map_column.as_deref(), Some("Irrigation water-use intensity (WUI): Rice"));
        assert!(s.map_values.is_empty());
    }

    #[test]
    fn picks_narrow_and_switch_map_column() {
        let mut s = state();
        s.toggle_pick("measurements", "WUI");
        s.apply_picks("measurements", false).unwrap();
        assert!(s.picks.is_empty());
        assert_eq!(s.map_column.as_deref(), Some(RICE_WU));

        s.toggle_pick("Province_n", "A");
        assert!(s.is_picked("Province_n", "A"));
        s.apply_picks("Province_n", true).unwrap();
        assert_eq!(s.view.len(), 2);
        assert_eq!(s.map_values.len(), 1);
        assert_eq!(s.map_values["c1"], 1.5);
    }

    #[test]
    fn nothing_ticked_leaves_scope_alone() {
        let mut s = state();
        s.apply_picks("cities", true).unwrap();
        assert_eq!(s.view.len(), 3);
        assert!(!s.filter.as_ref().unwrap().can_undo());
    }

    #[test]
    fn unknown_pick_key_is_an_error() {
        let mut s = state();
        s.toggle_pick("colour", "red");
        assert!(matches!(
            s.apply_picks("colour", true),
            Err(ScopeError::InvalidScope(_))
        ));
    }

    #[test]
    fn bad_pick_values_surface_in_status() {
        let mut s = state();
        s.toggle_pick("time", "someday");
        s.apply_picks("time", true).unwrap();
        assert!(s.status_message.unwrap().contains("someday"));
    }

    #[test]
    fn map_unit_converts_without_compounding() {
        let mut s = state();
        s.set_map_column(MAIZE_WUI.to_string());
        s.set_map_unit("mm * km**-2".to_string());
        s.set_map_unit("mm * km**-2".to_string());
        assert_eq!(s.view.unit_of(MAIZE_WUI), Some("mm * km**-2"));
        assert!((s.map_values["c1"] - 20.0).abs() < 1e-9);
        assert!(s.status_message.is_none());
    }

    #[test]
    fn undo_restores_previous_view() {
        let mut s = state();
        s.toggle_pick("cities", "c2");
        s.apply_picks("cities", false).unwrap();
        assert_eq!(s.view.len(), 2);
        s.undo();
        assert_eq!(s.view.len(), 3);
        s.redo();
        assert_eq!(s.view.len(), 2);
        s.clear(&[Dimension::Cities]);
        assert_eq!(s.view.len(), 3);
    }

    #[test]
    fn open_reports_load_failures() {
        let mut s = AppState::new(Taxonomy::standard());
        let dir = tempfile::tempdir().unwrap();
        s.open_dataset(&dir.path().join("missing.csv"));
        assert!(s.filter.is_none());
        assert!(s.status_message.as_deref().unwrap().starts_with("Error:"));

        let path = dir.path().join("data.csv");
        std::fs::write(&path, "City_ID,Year,Province_n,Irrigation WU: Rice\nc1,2000,A,1.5\n").unwrap();
        s.open_dataset(&path);
        assert!(s.status_message.is_none());
        assert_eq!(s.view.len(), 1);
    }

    #[test]
    fn boundaries_follow_cities_in_scope() {
        let mut s = state();
        let geojson = r#"{"type": "FeatureCollection", "features": [
            {"properties": {"Perfecture": "c1"}, "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1]]]}},
            {"properties": {"Perfecture": "c2"}, "geometry": {"type": "Polygon", "coordinates": [[[2,0],[3,0],[3,1]]]}}
        ]}"#;
        s.set_boundaries(Boundaries::from_geojson_str(geojson).unwrap());
        assert_eq!(s.map_regions, vec!["c1", "c2"]);

        assert_eq!(s.region_at([2.9, 0.1]).map(|(id, _)| id), Some("c2"));

        s.toggle_pick("cities", "c1");
        s.apply_picks("cities", true).unwrap();
        assert_eq!(s.map_regions, vec!["c1"]);
        assert_eq!(s.region_at([0.9, 0.1]).map(|(id, _)| id), Some("c1"));
        assert!(s.region_at([2.9, 0.1]).is_none());
        assert!(s.region_at([5.0, 5.0]).is_none());
    }

    #[test]
    fn export_writes_csv() {
        let s = state();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("view.csv");
        s.export_view(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("City_ID,Year,Province_n,"));
        assert_eq!(text.lines().count(), 4);
    }
}
