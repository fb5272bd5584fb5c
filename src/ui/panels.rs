use std::collections::BTreeSet;

use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};
use egui_extras::{Column, TableBuilder};

use crate::color::Classification;
use crate::geo::Aggregation;
use crate::scope::Dimension;
use crate::state::AppState;
use crate::taxonomy::{CITY_ID, PROVINCE, YEAR};

// ---------------------------------------------------------------------------
// Left side panel – scope and map widgets
// ---------------------------------------------------------------------------

/// One tickable list in the side panel.
struct PickList {
    title: &'static str,
    /// Key understood by `ScopeFilter::update_scope`.
    key: &'static str,
    /// Dimension reset by the section's Clear button.
    clears: Dimension,
    /// `(value, label)` pairs.
    values: Vec<(String, String)>,
}

/// Render the left scope panel.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Scope");
    ui.separator();

    let Some(filter) = &state.filter else {
        ui.label("No dataset loaded.");
        return;
    };

    let scope = filter.scope().clone();
    let provinces: BTreeSet<String> = state.view.rows.iter().map(|r| r.province.clone()).collect();
    let taxonomy = state.taxonomy.clone();

    let lists = [
        PickList {
            title: "Years",
            key: "time",
            clears: Dimension::Time,
            values: scope.time.iter().map(|y| (y.to_string(), y.to_string())).collect(),
        },
        PickList {
            title: "Provinces",
            key: PROVINCE,
            clears: Dimension::Cities,
            values: provinces.into_iter().map(|p| (p.clone(), p)).collect(),
        },
        PickList {
            title: "Cities",
            key: "cities",
            clears: Dimension::Cities,
            values: scope.cities.iter().map(|c| (c.clone(), c.clone())).collect(),
        },
        PickList {
            title: "Sectors",
            key: "sectors",
            clears: Dimension::Sectors,
            values: scope
                .sectors
                .iter()
                .map(|s| {
                    let name = taxonomy.sector(*s).map_or("", |e| e.name.as_str());
                    (s.code().to_string(), format!("{s}  {name}"))
                })
                .collect(),
        },
        PickList {
            title: "Measurements",
            key: "measurements",
            clears: Dimension::Measurements,
            values: scope
                .measurements
                .iter()
                .map(|m| (m.code().to_string(), m.code().to_string()))
                .collect(),
        },
        PickList {
            title: "Items",
            key: "items",
            clears: Dimension::Items,
            values: state.visible_columns.iter().map(|c| (c.clone(), c.clone())).collect(),
        },
    ];

    ui.horizontal(|ui: &mut Ui| {
        let (can_undo, can_redo) = state
            .filter
            .as_ref()
            .map_or((false, false), |f| (f.can_undo(), f.can_redo()));
        if ui.add_enabled(can_undo, egui::Button::new("Undo")).clicked() {
            state.undo();
        }
        if ui.add_enabled(can_redo, egui::Button::new("Redo")).clicked() {
            state.redo();
        }
        if ui.button("Clear all").clicked() {
            state.clear(&[]);
        }
    });
    ui.separator();

    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            map_controls(ui, state);
            ui.separator();

            for list in &lists {
                pick_section(ui, state, list);
            }
        });
}

fn pick_section(ui: &mut Ui, state: &mut AppState, list: &PickList) {
    let n_picked = state.picks.get(list.key).map_or(0, BTreeSet::len);
    let header_text = format!("{}  ({n_picked}/{})", list.title, list.values.len());

    egui::CollapsingHeader::new(RichText::new(header_text).strong())
        .id_salt(list.key)
        .default_open(false)
        .show(ui, |ui: &mut Ui| {
            ui.horizontal(|ui: &mut Ui| {
                let mut action = None;
                if ui.small_button("Keep").clicked() {
                    action = Some(true);
                }
                if ui.small_button("Drop").clicked() {
                    action = Some(false);
                }
                if ui.small_button("Clear").clicked() {
                    state.clear(&[list.clears]);
                }
                if let Some(keep) = action {
                    if let Err(e) = state.apply_picks(list.key, keep) {
                        log::error!("{e}");
                        state.status_message = Some(format!("Error: {e}"));
                    }
                }
            });

            for (value, label) in &list.values {
                let mut checked = state.is_picked(list.key, value);
                if ui.checkbox(&mut checked, label.as_str()).changed() {
                    state.toggle_pick(list.key, value);
                }
            }
        });
}

/// Column, unit and classification controls for the map.
fn map_controls(ui: &mut Ui, state: &mut AppState) {
    ui.strong("Map");

    let current = state.map_column.clone().unwrap_or_default();
    egui::ComboBox::from_id_salt("map_column")
        .selected_text(&current)
        .width(ui.available_width() - 8.0)
        .show_ui(ui, |ui: &mut Ui| {
            for col in state.visible_columns.clone() {
                if ui.selectable_label(current == col, col.as_str()).clicked() {
                    state.set_map_column(col);
                }
            }
        });

    ui.horizontal(|ui: &mut Ui| {
        ui.label("Unit");
        let unit = state
            .map_column
            .as_deref()
            .and_then(|c| state.view.unit_of(c))
            .map(str::to_string);
        let response = ui.add(
            egui::TextEdit::singleline(&mut state.map_unit)
                .hint_text(unit.unwrap_or_default())
                .desired_width(120.0),
        );
        let submitted = response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
        if ui.button("Apply").clicked() || submitted {
            let unit = state.map_unit.clone();
            state.set_map_unit(unit);
        }
    });

    let mut changed = false;
    ui.horizontal(|ui: &mut Ui| {
        let years: Vec<i32> = state
            .filter
            .as_ref()
            .map(|f| f.scope().time.iter().copied().collect())
            .unwrap_or_default();
        changed |= ui
            .radio_value(&mut state.aggregation, Aggregation::Mean, "Mean")
            .changed();
        let selected = match state.aggregation {
            Aggregation::Year(y) => y.to_string(),
            Aggregation::Mean => "Year…".to_string(),
        };
        egui::ComboBox::from_id_salt("map_year")
            .selected_text(selected)
            .show_ui(ui, |ui: &mut Ui| {
                for y in years {
                    changed |= ui
                        .selectable_value(&mut state.aggregation, Aggregation::Year(y), y.to_string())
                        .changed();
                }
            });
    });

    egui::ComboBox::from_id_salt("classification")
        .selected_text(state.classification.label())
        .show_ui(ui, |ui: &mut Ui| {
            for c in Classification::ALL {
                changed |= ui
                    .selectable_value(&mut state.classification, c, c.label())
                    .changed();
            }
        });
    changed |= ui
        .add(egui::Slider::new(&mut state.classes, 2..=9).text("classes"))
        .changed();

    if changed {
        state.rebuild_map();
    }
}

// ---------------------------------------------------------------------------
// Bottom panel – the current view
// ---------------------------------------------------------------------------

/// Render the scoped table with the general columns first.
pub fn view_table(ui: &mut Ui, state: &AppState) {
    let table = &state.view;
    if table.columns.is_empty() && table.is_empty() {
        ui.label("Nothing in view.");
        return;
    }

    let headers: Vec<String> = [CITY_ID, YEAR, PROVINCE]
        .iter()
        .map(|c| c.to_string())
        .chain(table.columns.iter().enumerate().map(|(i, c)| {
            match table.units.get(i).cloned().flatten() {
                Some(unit) => format!("{c} [{unit}]"),
                None => c.clone(),
            }
        }))
        .collect();

    ScrollArea::horizontal().show(ui, |ui: &mut Ui| {
        TableBuilder::new(ui)
            .striped(true)
            .resizable(true)
            .cell_layout(egui::Layout::left_to_right(egui::Align::Center))
            .columns(Column::auto().at_least(60.0), 3)
            .columns(Column::initial(140.0).at_least(60.0).clip(true), table.columns.len())
            .min_scrolled_height(0.0)
            .header(20.0, |mut header| {
                for h in &headers {
                    header.col(|ui: &mut Ui| {
                        ui.strong(h.as_str()).on_hover_text(h.as_str());
                    });
                }
            })
            .body(|body| {
                body.rows(18.0, table.rows.len(), |mut row| {
                    let r = &table.rows[row.index()];
                    row.col(|ui: &mut Ui| {
                        ui.label(r.city_id.as_str());
                    });
                    row.col(|ui: &mut Ui| {
                        ui.label(r.year.to_string());
                    });
                    row.col(|ui: &mut Ui| {
                        ui.label(r.province.as_str());
                    });
                    for v in &r.values {
                        row.col(|ui: &mut Ui| match v {
                            Some(x) => {
                                ui.label(format!("{x:.3}"));
                            }
                            None => {
                                ui.label(RichText::new("–").color(Color32::GRAY));
                            }
                        });
                    }
                });
            });
    });
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open dataset…").clicked() {
                open_dataset_dialog(state);
                ui.close_menu();
            }
            if ui.button("Open boundaries…").clicked() {
                open_boundaries_dialog(state);
                ui.close_menu();
            }
            if ui
                .add_enabled(state.filter.is_some(), egui::Button::new("Export view…"))
                .clicked()
            {
                export_dialog(state);
                ui.close_menu();
            }
        });

        ui.separator();

        if let Some(filter) = &state.filter {
            let dataset = filter.dataset();
            ui.label(format!(
                "{} observations of {} cities in {} provinces, {} in view, {} columns",
                dataset.len(),
                dataset.cities.len(),
                dataset.provinces.len(),
                state.view.len(),
                state.visible_columns.len()
            ));
        }
        if let Some(boundaries) = &state.boundaries {
            ui.separator();
            ui.label(format!("{} outlines", boundaries.len()));
        }

        if let Some(msg) = &state.status_message {
            ui.separator();
            ui.label(RichText::new(msg).color(Color32::RED));
        }
    });
}

// ---------------------------------------------------------------------------
// File dialogs
// ---------------------------------------------------------------------------

pub fn open_dataset_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open water-use data")
        .add_filter("Supported files", &["csv", "json", "parquet", "pq"])
        .add_filter("CSV", &["csv"])
        .add_filter("JSON", &["json"])
        .add_filter("Parquet", &["parquet", "pq"])
        .pick_file();

    if let Some(path) = file {
        state.open_dataset(&path);
    }
}

pub fn open_boundaries_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open prefecture boundaries")
        .add_filter("GeoJSON", &["geojson", "json"])
        .pick_file();

    if let Some(path) = file {
        state.open_boundaries(&path);
    }
}

pub fn export_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Export view")
        .set_file_name("view.csv")
        .add_filter("CSV", &["csv"])
        .save_file();

    if let Some(path) = file {
        if let Err(e) = state.export_view(&path) {
            log::error!("Failed to export view: {e:#}");
            state.status_message = Some(format!("Error: {e:#}"));
        }
    }
}
