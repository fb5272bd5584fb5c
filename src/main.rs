use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use china_water_use::app::WaterUseApp;
use china_water_use::state::AppState;
use china_water_use::taxonomy::Taxonomy;
use clap::Parser;
use eframe::egui;

#[derive(Parser, Debug)]
#[command(
    name = "china-water-use",
    about = "Narrow and map municipal water-use statistics of China"
)]
struct Args {
    /// Water-use table to open (.csv, .json or .parquet)
    data: Option<PathBuf>,

    /// Prefecture outlines (.geojson)
    boundaries: Option<PathBuf>,

    /// Replace the built-in column catalogue with a JSON taxonomy
    #[arg(long)]
    taxonomy: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let taxonomy = match &args.taxonomy {
        Some(path) => Arc::new(Taxonomy::from_json_file(path)?),
        None => Taxonomy::standard(),
    };

    let mut state = AppState::new(taxonomy);
    if let Some(path) = &args.data {
        state.open_dataset(path);
    }
    if let Some(path) = &args.boundaries {
        state.open_boundaries(path);
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 860.0])
            .with_min_inner_size([640.0, 420.0]),
        ..Default::default()
    };

    eframe::run_native(
        "China Water Use Explorer",
        options,
        Box::new(|_cc| Ok(Box::new(WaterUseApp::new(state)))),
    )
    .map_err(|e| anyhow!("{e}"))
}
