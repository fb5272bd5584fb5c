//! Writes a synthetic water-use table (CSV and Parquet) with every column of
//! the built-in taxonomy, plus square prefecture outlines to map it on.
use std::path::PathBuf;

use anyhow::{Context, Result};
use china_water_use::data::model::{Table, TableRow};
use china_water_use::geo::PREFECTURE;
use china_water_use::taxonomy::{Measurement, Sector, Taxonomy, PROVINCE};
use clap::Parser;
use parquet::arrow::ArrowWriter;
use serde_json::json;

const PROVINCES: [&str; 8] = [
    "Beijing", "Hebei", "Shanxi", "Jiangsu", "Henan", "Sichuan", "Gansu", "Xinjiang",
];

#[derive(Parser, Debug)]
#[command(
    name = "generate_sample",
    about = "Write synthetic water-use data and prefecture outlines"
)]
struct Args {
    /// Output directory (created if absent)
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Number of provinces (at most 8)
    #[arg(long, default_value = "4")]
    provinces: usize,

    /// Cities per province
    #[arg(long, default_value = "5")]
    cities: usize,

    #[arg(long, default_value = "2000")]
    first_year: i32,

    #[arg(long, default_value = "2013")]
    last_year: i32,

    /// Fraction of cells left empty
    #[arg(long, default_value = "0.05")]
    missing: f64,

    #[arg(long, default_value = "42")]
    seed: u64,
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

/// Typical magnitude and intensity per sector, in the units the data is
/// recorded in.
fn ranges(sector: Sector) -> ((f64, f64), (f64, f64)) {
    match sector {
        Sector::Irrigation => ((1.0, 120.0), (200.0, 900.0)),
        Sector::Industry => ((0.5, 80.0), (10.0, 150.0)),
        Sector::Rural => ((5.0, 300.0), (20.0, 120.0)),
        Sector::Urban => ((5.0, 500.0), (40.0, 250.0)),
    }
}

struct City {
    id: String,
    province: &'static str,
    /// Grid cell of the outline.
    cell: (usize, usize),
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut rng = SimpleRng::new(args.seed);
    let taxonomy = Taxonomy::standard();

    let cities: Vec<City> = PROVINCES
        .iter()
        .take(args.provinces.clamp(1, PROVINCES.len()))
        .enumerate()
        .flat_map(|(p, &province)| {
            (0..args.cities).map(move |c| City {
                id: format!("C{:02}{:02}", p + 1, c + 1),
                province,
                cell: (p, c),
            })
        })
        .collect();
    let years: Vec<i32> = (args.first_year..=args.last_year).collect();

    let items = taxonomy.flatten(&Sector::ALL, &Measurement::ALL);
    let summary = taxonomy.summary_columns(&Sector::ALL);
    let columns: Vec<String> = items.iter().chain(&summary).cloned().collect();

    // One row per (city, year).
    let mut rows = Vec::with_capacity(cities.len() * years.len());

    for city in &cities {
        // Per-city baselines so values are stable across years.
        let mut baselines = Vec::new();
        for sector in Sector::ALL {
            let ((m_lo, m_hi), (i_lo, i_hi)) = ranges(sector);
            for _ in taxonomy.labels(sector, Measurement::Intensity) {
                baselines.push((rng.uniform(m_lo, m_hi), rng.uniform(i_lo, i_hi)));
            }
        }
        let trend = rng.uniform(-0.02, 0.03);

        for &year in &years {
            let growth = 1.0 + trend * (year - args.first_year) as f64;
            let mut row: Vec<f64> = Vec::with_capacity(columns.len());
            let mut sector_totals = Vec::new();
            let mut baseline = baselines.iter();

            for sector in Sector::ALL {
                let n = taxonomy.labels(sector, Measurement::Intensity).len();
                let mut wui = Vec::with_capacity(n);
                let mut magnitude = Vec::with_capacity(n);
                for &(m, i) in baseline.by_ref().take(n) {
                    magnitude.push(m * growth * rng.uniform(0.95, 1.05));
                    wui.push(i / growth.max(0.5) * rng.uniform(0.9, 1.1));
                }
                let wu: Vec<f64> = wui.iter().zip(&magnitude).map(|(i, m)| i * m * 1e-3).collect();
                sector_totals.push(wu.iter().sum::<f64>() * 1e-2);

                // Same order as `Measurement::ALL`.
                row.extend(&wui);
                row.extend(&wu);
                row.extend(&magnitude);
            }
            row.push(sector_totals.iter().sum());
            row.extend(&sector_totals);

            let values = row
                .into_iter()
                .map(|v| (rng.next_f64() >= args.missing).then_some(v))
                .collect();
            rows.push(TableRow {
                city_id: city.id.clone(),
                year,
                province: city.province.to_string(),
                values,
            });
        }
    }
    let table = Table {
        units: vec![None; columns.len()],
        columns,
        rows,
    };

    std::fs::create_dir_all(&args.output).context("creating output directory")?;

    // ---- Parquet ----
    let batch = table.to_record_batch().context("building record batch")?;
    let parquet_path = args.output.join("values_data.parquet");
    let file = std::fs::File::create(&parquet_path).context("creating parquet file")?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;

    // ---- CSV ----
    let csv_path = args.output.join("values_data.csv");
    let file = std::fs::File::create(&csv_path).context("creating csv file")?;
    table.write_csv(file)?;

    // ---- Outlines ----
    let features: Vec<_> = cities
        .iter()
        .map(|city| {
            let (p, c) = city.cell;
            let (x, y) = (80.0 + 4.0 * p as f64, 25.0 + 3.0 * c as f64);
            json!({
                "type": "Feature",
                "properties": { PREFECTURE: city.id, PROVINCE: city.province },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[x, y], [x + 3.8, y], [x + 3.8, y + 2.8], [x, y + 2.8], [x, y]]],
                },
            })
        })
        .collect();
    let geojson = json!({ "type": "FeatureCollection", "features": features });
    let geojson_path = args.output.join("prefectures.geojson");
    std::fs::write(&geojson_path, serde_json::to_string_pretty(&geojson)?)
        .context("writing outlines")?;

    let head = batch.project(&[0, 1, 2, 3, 4])?.slice(0, batch.num_rows().min(5));
    println!("{}", arrow::util::pretty::pretty_format_batches(&[head])?);
    println!(
        "Wrote {} rows x {} columns for {} cities to {}, {} and {}",
        table.len(),
        table.columns.len(),
        cities.len(),
        csv_path.display(),
        parquet_path.display(),
        geojson_path.display()
    );
    Ok(())
}
