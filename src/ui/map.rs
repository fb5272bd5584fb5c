use eframe::egui::{Color32, RichText, Stroke, Ui};
use egui_plot::{Plot, PlotPoints, Polygon};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Choropleth map (central panel)
// ---------------------------------------------------------------------------

/// Render the prefecture map coloured by the selected column.
pub fn choropleth(ui: &mut Ui, state: &AppState) {
    let Some(boundaries) = &state.boundaries else {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("Open prefecture boundaries to draw the map  (File → Open boundaries…)");
        });
        return;
    };
    if state.filter.is_none() {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("Open a dataset to colour the map  (File → Open dataset…)");
        });
        return;
    }

    legend(ui, state);

    let color_map = state.color_map.as_ref();
    let regions: Vec<_> = state.map_regions.iter().filter_map(|id| boundaries.get(id)).collect();

    let mut plot = Plot::new("choropleth");
    if let Some([min_x, min_y, max_x, max_y]) = boundaries.bounds() {
        plot = plot.include_x(min_x).include_x(max_x).include_y(min_y).include_y(max_y);
    }
    let response = plot
        .data_aspect(1.0)
        .x_axis_label("Longitude")
        .y_axis_label("Latitude")
        .show_grid(false)
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true)
        .show(ui, |plot_ui| {
            let hovered = plot_ui
                .pointer_coordinate()
                .and_then(|p| state.region_at([p.x, p.y]));

            for region in &regions {
                let value = state.map_values.get(&region.id).copied();
                let fill = color_map.map_or(Color32::LIGHT_GRAY, |cm| cm.color_for(value));
                let is_hovered = hovered.is_some_and(|(id, _)| id == region.id);
                let stroke = if is_hovered {
                    Stroke::new(2.0, Color32::BLACK)
                } else {
                    Stroke::new(0.5, Color32::WHITE)
                };

                for ring in &region.polygons {
                    let points: PlotPoints = ring.iter().copied().collect();
                    plot_ui.polygon(Polygon::new(points).fill_color(fill).stroke(stroke));
                }
            }
            hovered.map(|(id, value)| (id.to_string(), value))
        });

    if let Some((city, value)) = response.inner {
        let value = value.map_or("no data".to_string(), |v| format!("{v:.3}"));
        response.response.on_hover_text_at_pointer(format!("{city}: {value}"));
    }
}

fn legend(ui: &mut Ui, state: &AppState) {
    let Some(cm) = &state.color_map else {
        return;
    };
    let unit = state
        .map_column
        .as_deref()
        .and_then(|c| state.view.unit_of(c))
        .map(|u| format!(" [{u}]"))
        .unwrap_or_default();

    ui.horizontal_wrapped(|ui: &mut Ui| {
        ui.strong(format!("{}{unit}", cm.column));
        ui.separator();
        let entries = cm.legend_entries();
        if entries.is_empty() {
            ui.label(RichText::new("no data in view").color(Color32::GRAY));
        }
        for (label, color) in entries {
            ui.label(RichText::new("■").color(color).size(16.0));
            ui.label(label);
        }
        ui.label(RichText::new("■").color(Color32::LIGHT_GRAY).size(16.0));
        ui.label("missing");
    });
    ui.add_space(4.0);
}
