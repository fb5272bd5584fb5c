use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// General columns – identifying columns present on every row
// ---------------------------------------------------------------------------

pub const CITY_ID: &str = "City_ID";
pub const YEAR: &str = "Year";
pub const PROVINCE: &str = "Province_n";

/// Identifying columns, in the order they lead every view.
pub const GENERAL_COLUMNS: [&str; 3] = [CITY_ID, YEAR, PROVINCE];

/// Regional totals. The sector codes double as the column names of the
/// per-sector totals.
pub const TOTAL_WATER_USE: &str = "Total water use";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Sector,
    Measurement,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Sector => write!(f, "sector"),
            KeyKind::Measurement => write!(f, "measurement"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxonomyError {
    #[error("'{key}' is not a valid {kind} code")]
    InvalidKey { kind: KeyKind, key: String },

    #[error("taxonomy has no entry for sector {0}")]
    MissingSector(Sector),

    #[error("sector {sector} lists {expected} subcategories but {found} {measurement} labels")]
    LabelCount {
        sector: Sector,
        measurement: Measurement,
        expected: usize,
        found: usize,
    },

    #[error("column label '{0}' is defined more than once")]
    DuplicateLabel(String),
}

// ---------------------------------------------------------------------------
// Sector / Measurement – the fixed vocabularies
// ---------------------------------------------------------------------------

/// Top-level category of water use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sector {
    #[serde(rename = "IRR")]
    Irrigation,
    #[serde(rename = "IND")]
    Industry,
    #[serde(rename = "RUR")]
    Rural,
    #[serde(rename = "URB")]
    Urban,
}

impl Sector {
    pub const ALL: [Sector; 4] = [
        Sector::Irrigation,
        Sector::Industry,
        Sector::Rural,
        Sector::Urban,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Sector::Irrigation => "IRR",
            Sector::Industry => "IND",
            Sector::Rural => "RUR",
            Sector::Urban => "URB",
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Sector {
    type Err = TaxonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sector::ALL
            .into_iter()
            .find(|sector| sector.code() == s)
            .ok_or_else(|| TaxonomyError::InvalidKey {
                kind: KeyKind::Sector,
                key: s.to_string(),
            })
    }
}

/// Dimension of a statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Measurement {
    /// Water-use intensity.
    #[serde(rename = "WUI")]
    Intensity,
    /// Water-use volume.
    #[serde(rename = "WU")]
    Volume,
    /// Size of the activity using the water (area, population, GVA).
    #[serde(rename = "Magnitude")]
    Magnitude,
}

impl Measurement {
    pub const ALL: [Measurement; 3] = [
        Measurement::Intensity,
        Measurement::Volume,
        Measurement::Magnitude,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Measurement::Intensity => "WUI",
            Measurement::Volume => "WU",
            Measurement::Magnitude => "Magnitude",
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Measurement {
    type Err = TaxonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Measurement::ALL
            .into_iter()
            .find(|m| m.code() == s)
            .ok_or_else(|| TaxonomyError::InvalidKey {
                kind: KeyKind::Measurement,
                key: s.to_string(),
            })
    }
}

/// Parse a list of codes, keeping the valid ones and reporting the rest.
pub fn parse_codes<T>(codes: &[&str]) -> (Vec<T>, Vec<TaxonomyError>)
where
    T: FromStr<Err = TaxonomyError>,
{
    let mut parsed = Vec::with_capacity(codes.len());
    let mut invalid = Vec::new();
    for code in codes {
        match code.parse() {
            Ok(value) => parsed.push(value),
            Err(e) => {
                log::warn!("{e}");
                invalid.push(e);
            }
        }
    }
    (parsed, invalid)
}

// ---------------------------------------------------------------------------
// select – the narrowing primitive
// ---------------------------------------------------------------------------

/// Outcome of [`select`]: the surviving elements and the requested elements
/// that were not in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<T: Ord> {
    pub selected: BTreeSet<T>,
    pub invalid: BTreeSet<T>,
}

/// `(pool ∩ include) − exclude`, where a missing `include` keeps the whole
/// pool and a missing `exclude` removes nothing.
///
/// Elements of `include` or `exclude` that are not in `pool` are logged and
/// returned in [`Selection::invalid`]; they never abort the selection.
pub fn select<T>(
    pool: &BTreeSet<T>,
    include: Option<&BTreeSet<T>>,
    exclude: Option<&BTreeSet<T>>,
) -> Selection<T>
where
    T: Ord + Clone + fmt::Debug,
{
    let invalid: BTreeSet<T> = include
        .into_iter()
        .chain(exclude)
        .flatten()
        .filter(|v| !pool.contains(*v))
        .cloned()
        .collect();
    if !invalid.is_empty() {
        log::warn!("Invalid items: {invalid:?}.");
    }

    let selected = pool
        .iter()
        .filter(|v| include.map_or(true, |inc| inc.contains(*v)))
        .filter(|v| !exclude.is_some_and(|exc| exc.contains(*v)))
        .cloned()
        .collect();

    Selection { selected, invalid }
}

// ---------------------------------------------------------------------------
// Taxonomy – sector → subcategory → measurement → column label
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subcategory {
    /// Internal code, also the fragment used in column labels.
    pub code: String,
    /// Display label.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorEntry {
    pub name: String,
    pub subcategories: Vec<Subcategory>,
    /// Column labels per measurement, aligned with `subcategories`.
    pub items: BTreeMap<Measurement, Vec<String>>,
}

/// Where a column label sits in the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelPosition<'a> {
    pub sector: Sector,
    pub subcategory: &'a Subcategory,
    pub measurement: Measurement,
}

/// The immutable catalogue of item columns.
///
/// Build it once (see [`Taxonomy::standard`] or [`Taxonomy::from_json_file`])
/// and share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    sectors: BTreeMap<Sector, SectorEntry>,
    #[serde(default)]
    summary: Vec<String>,
}

impl Taxonomy {
    /// The shared built-in taxonomy.
    pub fn standard() -> Arc<Taxonomy> {
        static STANDARD: OnceLock<Arc<Taxonomy>> = OnceLock::new();
        STANDARD.get_or_init(|| Arc::new(Taxonomy::builtin())).clone()
    }

    /// Load a taxonomy with the same shape as the built-in one from JSON.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Taxonomy> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path).context("reading taxonomy file")?;
        Ok(Taxonomy::from_json_str(&text)?)
    }

    pub fn from_json_str(text: &str) -> anyhow::Result<Taxonomy> {
        let taxonomy: Taxonomy = serde_json::from_str(text)?;
        taxonomy.validate()?;
        Ok(taxonomy)
    }

    fn validate(&self) -> Result<(), TaxonomyError> {
        let mut seen = HashSet::new();
        for sector in Sector::ALL {
            let entry = self
                .sectors
                .get(&sector)
                .ok_or(TaxonomyError::MissingSector(sector))?;
            for measurement in Measurement::ALL {
                let found = entry.items.get(&measurement).map_or(0, Vec::len);
                if found != entry.subcategories.len() {
                    return Err(TaxonomyError::LabelCount {
                        sector,
                        measurement,
                        expected: entry.subcategories.len(),
                        found,
                    });
                }
            }
            for label in entry.items.values().flatten() {
                if !seen.insert(label.as_str()) {
                    return Err(TaxonomyError::DuplicateLabel(label.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn sector(&self, sector: Sector) -> Option<&SectorEntry> {
        self.sectors.get(&sector)
    }

    /// Column labels of one `(sector, measurement)` pair, in subcategory order.
    pub fn labels(&self, sector: Sector, measurement: Measurement) -> &[String] {
        self.sectors
            .get(&sector)
            .and_then(|entry| entry.items.get(&measurement))
            .map_or(&[], Vec::as_slice)
    }

    /// Every subcategory label of every requested `(sector, measurement)`
    /// pair, iterating sectors and measurements in the order given.
    pub fn flatten<'a, S, M>(&self, sectors: S, measurements: M) -> Vec<String>
    where
        S: IntoIterator<Item = &'a Sector>,
        M: IntoIterator<Item = &'a Measurement> + Clone,
    {
        let mut columns = Vec::new();
        for &sector in sectors {
            for &measurement in measurements.clone() {
                columns.extend(self.labels(sector, measurement).iter().cloned());
            }
        }
        columns
    }

    /// [`Taxonomy::flatten`] over raw codes. Unknown codes are dropped and
    /// returned alongside the labels.
    pub fn flatten_codes(
        &self,
        sectors: &[&str],
        measurements: &[&str],
    ) -> (Vec<String>, Vec<TaxonomyError>) {
        let (sectors, mut invalid) = parse_codes::<Sector>(sectors);
        let (measurements, invalid_measurements) = parse_codes::<Measurement>(measurements);
        invalid.extend(invalid_measurements);
        (self.flatten(&sectors, &measurements), invalid)
    }

    /// Every label in the taxonomy.
    pub fn all_labels(&self) -> BTreeSet<String> {
        self.sectors
            .values()
            .flat_map(|entry| entry.items.values().flatten().cloned())
            .collect()
    }

    /// Reverse lookup of a column label.
    pub fn locate(&self, label: &str) -> Option<LabelPosition<'_>> {
        self.sectors.iter().find_map(|(&sector, entry)| {
            entry.items.iter().find_map(|(&measurement, labels)| {
                let idx = labels.iter().position(|l| l == label)?;
                Some(LabelPosition {
                    sector,
                    subcategory: entry.subcategories.get(idx)?,
                    measurement,
                })
            })
        })
    }

    /// Regional total columns: the grand total plus one per requested sector.
    pub fn summary_columns<'a>(&self, sectors: impl IntoIterator<Item = &'a Sector>) -> Vec<String> {
        let wanted: BTreeSet<&str> = sectors.into_iter().map(|s| s.code()).collect();
        self.summary
            .iter()
            .filter(|col| col.as_str() == TOTAL_WATER_USE || wanted.contains(col.as_str()))
            .cloned()
            .collect()
    }

    pub fn is_summary(&self, column: &str) -> bool {
        self.summary.iter().any(|c| c == column)
    }

    fn builtin() -> Taxonomy {
        let mut sectors = BTreeMap::new();

        let crops = [
            ("Rice", "水稻"),
            ("Wheat", "小麦"),
            ("Maize", "玉米"),
            ("Vegetables and fruits", "果蔬"),
            ("Others", "其它"),
        ];
        sectors.insert(
            Sector::Irrigation,
            entry("Irrigation", &crops, |m, c| match m {
                Measurement::Intensity => format!("Irrigation water-use intensity (WUI): {c}"),
                Measurement::Volume => format!("Irrigation WU: {c}"),
                Measurement::Magnitude => format!("Irrigated area: {c}"),
            }),
        );

        let industries = [
            ("Textile", "纺织"),
            ("Papermaking", "造纸"),
            ("Petrochemicals", "石化"),
            ("Metallurgy", "冶金"),
            ("Mining", "采矿"),
            ("Food", "食品"),
            ("Cements", "水泥"),
            ("Machinery", "机械"),
            ("Electronics", "电子"),
            ("Thermal electrivity", "火电"),
            ("Others", "其它"),
        ];
        sectors.insert(
            Sector::Industry,
            entry("Industry", &industries, |m, c| match m {
                Measurement::Intensity => format!("Industrial WUI: {c}"),
                Measurement::Volume => format!("Industrial WU: {c}"),
                Measurement::Magnitude => format!("Industrial gross value added (GVA): {c}"),
            }),
        );

        let rural = [("domestic", "人居"), ("livestock", "牲畜")];
        sectors.insert(
            Sector::Rural,
            entry("Rural", &rural, |m, c| match m {
                Measurement::Intensity => format!("Rural {c} WUI"),
                Measurement::Volume => format!("Rural {c} WU"),
                Measurement::Magnitude => format!("Rural {c} population"),
            }),
        );

        // Urban magnitudes differ per subcategory: people for domestic use,
        // value added for services.
        let urban = [("domestic", "人居"), ("service", "服务业")];
        sectors.insert(
            Sector::Urban,
            entry("Urban", &urban, |m, c| match (m, c) {
                (Measurement::Intensity, _) => format!("Urban {c} WUI"),
                (Measurement::Volume, _) => format!("Urban {c} WU"),
                (Measurement::Magnitude, "service") => "Urban service GVA".to_string(),
                (Measurement::Magnitude, _) => format!("Urban {c} population"),
            }),
        );

        let summary = std::iter::once(TOTAL_WATER_USE)
            .chain(Sector::ALL.iter().map(|s| s.code()))
            .map(str::to_string)
            .collect();

        Taxonomy { sectors, summary }
    }
}

fn entry(
    name: &str,
    subcategories: &[(&str, &str)],
    label: impl Fn(Measurement, &str) -> String,
) -> SectorEntry {
    let items = Measurement::ALL
        .into_iter()
        .map(|m| {
            let labels = subcategories.iter().map(|(code, _)| label(m, code)).collect();
            (m, labels)
        })
        .collect();
    SectorEntry {
        name: name.to_string(),
        subcategories: subcategories
            .iter()
            .map(|(code, name)| Subcategory {
                code: code.to_string(),
                name: name.to_string(),
            })
            .collect(),
        items,
    }
}
