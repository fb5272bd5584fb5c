use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::data::filter;
use crate::data::model::{Table, WaterUseDataset};
use crate::taxonomy::{select, Measurement, Sector, Taxonomy, TaxonomyError, CITY_ID, PROVINCE, YEAR};

// ---------------------------------------------------------------------------
// Errors and warnings
// ---------------------------------------------------------------------------

/// Programming errors: the caller named something that is not a scope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error(
        "'{0}' is not a valid scope: time/Year, cities/City_ID, sectors, measurements, items, Province_n"
    )]
    InvalidScope(String),
}

/// Data problems found while narrowing. These never abort the operation;
/// the offending values are dropped (or, for items, kept) and reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeWarning {
    #[error(transparent)]
    InvalidKey(#[from] TaxonomyError),

    #[error("{dimension}: '{value}' is not in the current scope")]
    OutOfScope {
        dimension: &'static str,
        value: String,
    },

    #[error("'{0}' is not a year")]
    InvalidYear(String),

    #[error("'{0}' is not a column of the taxonomy")]
    UnknownItem(String),
}

// ---------------------------------------------------------------------------
// Dimensions and narrowing operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dimension {
    Time,
    Cities,
    Sectors,
    Measurements,
    /// The include/exclude column overrides.
    Items,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Time,
        Dimension::Cities,
        Dimension::Sectors,
        Dimension::Measurements,
        Dimension::Items,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Dimension::Time => "time",
            Dimension::Cities => "cities",
            Dimension::Sectors => "sectors",
            Dimension::Measurements => "measurements",
            Dimension::Items => "items",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dimension {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dimension::ALL
            .into_iter()
            .find(|d| d.name() == s)
            .ok_or_else(|| ScopeError::InvalidScope(s.to_string()))
    }
}

/// Row attributes that narrow a primary dimension indirectly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// `Province_n`: narrows cities.
    Province,
}

impl FromStr for Attribute {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            PROVINCE | "province" => Ok(Attribute::Province),
            other => Err(ScopeError::InvalidScope(other.to_string())),
        }
    }
}

/// Requested subset for one narrowing step. `None` leaves that side
/// unconstrained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criteria<T: Ord> {
    pub include: Option<BTreeSet<T>>,
    pub exclude: Option<BTreeSet<T>>,
}

impl<T: Ord> Default for Criteria<T> {
    fn default() -> Self {
        Criteria {
            include: None,
            exclude: None,
        }
    }
}

impl<T: Ord> Criteria<T> {
    pub fn include(values: impl IntoIterator<Item = T>) -> Self {
        Criteria {
            include: Some(values.into_iter().collect()),
            exclude: None,
        }
    }

    pub fn exclude(values: impl IntoIterator<Item = T>) -> Self {
        Criteria {
            include: None,
            exclude: Some(values.into_iter().collect()),
        }
    }
}

/// Narrowing of one of the four intersective dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetNarrowing {
    Time(Criteria<i32>),
    Cities(Criteria<String>),
    Sectors(Criteria<Sector>),
    Measurements(Criteria<Measurement>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Narrowing {
    /// Intersect a dimension with the requested subset.
    Set(SetNarrowing),
    /// Accumulate column overrides.
    Items(Criteria<String>),
    /// Narrow cities through a row attribute.
    Derived {
        attribute: Attribute,
        criteria: Criteria<String>,
    },
}

impl Narrowing {
    /// The dimension this operation changes.
    pub fn dimension(&self) -> Dimension {
        match self {
            Narrowing::Set(SetNarrowing::Time(_)) => Dimension::Time,
            Narrowing::Set(SetNarrowing::Cities(_)) => Dimension::Cities,
            Narrowing::Set(SetNarrowing::Sectors(_)) => Dimension::Sectors,
            Narrowing::Set(SetNarrowing::Measurements(_)) => Dimension::Measurements,
            Narrowing::Items(_) => Dimension::Items,
            Narrowing::Derived {
                attribute: Attribute::Province,
                ..
            } => Dimension::Cities,
        }
    }
}

// ---------------------------------------------------------------------------
// Scope – immutable snapshot of the narrowing state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub time: BTreeSet<i32>,
    pub cities: BTreeSet<String>,
    pub sectors: BTreeSet<Sector>,
    pub measurements: BTreeSet<Measurement>,
    pub include_items: BTreeSet<String>,
    pub exclude_items: BTreeSet<String>,
}

/// Result of applying a [`Narrowing`].
#[derive(Debug, Clone)]
pub struct Narrowed {
    pub scope: Scope,
    pub warnings: Vec<ScopeWarning>,
}

impl Scope {
    /// The unconstrained scope: the dataset's full extent.
    pub fn full(dataset: &WaterUseDataset) -> Self {
        Scope {
            time: dataset.years.clone(),
            cities: dataset.cities.clone(),
            sectors: Sector::ALL.into_iter().collect(),
            measurements: Measurement::ALL.into_iter().collect(),
            include_items: BTreeSet::new(),
            exclude_items: BTreeSet::new(),
        }
    }

    /// Apply one narrowing step, returning the new scope. `self` is left
    /// untouched.
    pub fn apply(&self, op: &Narrowing, dataset: &WaterUseDataset, taxonomy: &Taxonomy) -> Narrowed {
        let mut next = self.clone();
        let mut warnings = Vec::new();
        let dim = op.dimension();

        match op {
            Narrowing::Set(SetNarrowing::Time(c)) => {
                next.time = narrow_set(&self.time, c, dim.name(), &mut warnings);
            }
            Narrowing::Set(SetNarrowing::Cities(c)) => {
                next.cities = narrow_set(&self.cities, c, dim.name(), &mut warnings);
            }
            Narrowing::Set(SetNarrowing::Sectors(c)) => {
                next.sectors = narrow_set(&self.sectors, c, dim.name(), &mut warnings);
            }
            Narrowing::Set(SetNarrowing::Measurements(c)) => {
                next.measurements =
                    narrow_set(&self.measurements, c, dim.name(), &mut warnings);
            }
            Narrowing::Items(c) => {
                let known = taxonomy.all_labels();
                for (values, target) in [
                    (&c.include, &mut next.include_items),
                    (&c.exclude, &mut next.exclude_items),
                ] {
                    for label in values.iter().flatten() {
                        if !known.contains(label) {
                            log::warn!("'{label}' is not a column of the taxonomy");
                            warnings.push(ScopeWarning::UnknownItem(label.clone()));
                        }
                        target.insert(label.clone());
                    }
                }
            }
            Narrowing::Derived {
                attribute: Attribute::Province,
                criteria,
            } => {
                let rows: Vec<_> = filter::visible_rows(dataset, self)
                    .into_iter()
                    .map(|idx| &dataset.rows[idx])
                    .collect();
                let provinces: BTreeSet<String> = rows.iter().map(|r| r.province.clone()).collect();
                let resolved = narrow_set(&provinces, criteria, PROVINCE, &mut warnings);
                let cities: BTreeSet<String> = rows
                    .iter()
                    .filter(|r| resolved.contains(&r.province))
                    .map(|r| r.city_id.clone())
                    .collect();
                next.cities = cities.intersection(&self.cities).cloned().collect();
            }
        }

        log::debug!(
            "{dim} narrowed: {} → {}",
            self.size_of(dim),
            next.size_of(dim)
        );
        Narrowed {
            scope: next,
            warnings,
        }
    }

    /// A copy with the named dimensions reset to their value in `initial`.
    pub fn cleared(&self, dims: &[Dimension], initial: &Scope) -> Scope {
        let mut next = self.clone();
        for dim in dims {
            match dim {
                Dimension::Time => next.time = initial.time.clone(),
                Dimension::Cities => next.cities = initial.cities.clone(),
                Dimension::Sectors => next.sectors = initial.sectors.clone(),
                Dimension::Measurements => next.measurements = initial.measurements.clone(),
                Dimension::Items => {
                    next.include_items = initial.include_items.clone();
                    next.exclude_items = initial.exclude_items.clone();
                }
            }
        }
        next
    }

    /// Whether an observation in `(year, city)` is in view.
    pub fn admits(&self, year: i32, city_id: &str) -> bool {
        self.time.contains(&year) && self.cities.contains(city_id)
    }

    /// Columns the current sectors and measurements could show, before the
    /// item overrides.
    pub fn items(&self, taxonomy: &Taxonomy) -> Vec<String> {
        taxonomy.flatten(&self.sectors, &self.measurements)
    }

    /// Item columns in view, in taxonomy order.
    pub fn visible_columns(&self, taxonomy: &Taxonomy) -> Vec<String> {
        let items = self.items(taxonomy);
        let pool: BTreeSet<String> = items.iter().cloned().collect();
        let include = (!self.include_items.is_empty()).then_some(&self.include_items);
        let exclude = (!self.exclude_items.is_empty()).then_some(&self.exclude_items);
        let selection = select(&pool, include, exclude);
        items
            .into_iter()
            .filter(|c| selection.selected.contains(c))
            .collect()
    }

    fn size_of(&self, dim: Dimension) -> usize {
        match dim {
            Dimension::Time => self.time.len(),
            Dimension::Cities => self.cities.len(),
            Dimension::Sectors => self.sectors.len(),
            Dimension::Measurements => self.measurements.len(),
            Dimension::Items => self.include_items.len() + self.exclude_items.len(),
        }
    }
}

fn narrow_set<T>(
    current: &BTreeSet<T>,
    criteria: &Criteria<T>,
    dimension: &'static str,
    warnings: &mut Vec<ScopeWarning>,
) -> BTreeSet<T>
where
    T: Ord + Clone + fmt::Debug + fmt::Display,
{
    let selection = select(current, criteria.include.as_ref(), criteria.exclude.as_ref());
    warnings.extend(selection.invalid.iter().map(|v| ScopeWarning::OutOfScope {
        dimension,
        value: v.to_string(),
    }));
    selection.selected
}

// ---------------------------------------------------------------------------
// ScopeFilter – a narrowing session over one dataset
// ---------------------------------------------------------------------------

/// Keys accepted by [`ScopeFilter::update_scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKey {
    Dimension(Dimension),
    Derived(Attribute),
}

impl FromStr for ScopeKey {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            YEAR => Ok(ScopeKey::Dimension(Dimension::Time)),
            CITY_ID => Ok(ScopeKey::Dimension(Dimension::Cities)),
            _ => s
                .parse::<Dimension>()
                .map(ScopeKey::Dimension)
                .or_else(|_| s.parse::<Attribute>().map(ScopeKey::Derived)),
        }
    }
}

impl ScopeKey {
    /// Dimension a key resets when cleared.
    fn dimension(self) -> Dimension {
        match self {
            ScopeKey::Dimension(dim) => dim,
            ScopeKey::Derived(Attribute::Province) => Dimension::Cities,
        }
    }
}

/// Narrowing state of one session. Owns its scope history; the dataset and
/// taxonomy are shared read-only.
#[derive(Debug, Clone)]
pub struct ScopeFilter {
    taxonomy: Arc<Taxonomy>,
    dataset: Arc<WaterUseDataset>,
    initial: Scope,
    current: Scope,
    undo: Vec<Scope>,
    redo: Vec<Scope>,
}

impl ScopeFilter {
    pub fn new(dataset: Arc<WaterUseDataset>, taxonomy: Arc<Taxonomy>) -> Self {
        let initial = Scope::full(&dataset);
        ScopeFilter {
            taxonomy,
            dataset,
            current: initial.clone(),
            initial,
            undo: Vec::new(),
            redo: Vec::new(),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.current
    }

    pub fn initial_scope(&self) -> &Scope {
        &self.initial
    }

    pub fn dataset(&self) -> &Arc<WaterUseDataset> {
        &self.dataset
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }

    /// Apply a narrowing step in place and return its warnings.
    pub fn narrow(&mut self, op: Narrowing) -> Vec<ScopeWarning> {
        let Narrowed { scope, warnings } = self.current.apply(&op, &self.dataset, &self.taxonomy);
        self.commit(scope);
        warnings
    }

    /// String-keyed narrowing for scripts.
    ///
    /// `key` is one of `time`/`Year`, `cities`/`City_ID`, `sectors`,
    /// `measurements`, `items` or `Province_n`. An unknown key is an error;
    /// values that cannot be parsed are dropped and reported.
    pub fn update_scope(
        &mut self,
        key: &str,
        include: Option<&[&str]>,
        exclude: Option<&[&str]>,
    ) -> Result<Vec<ScopeWarning>, ScopeError> {
        let key: ScopeKey = key.parse()?;
        let mut warnings = Vec::new();

        let op = match key {
            ScopeKey::Dimension(Dimension::Time) => Narrowing::Set(SetNarrowing::Time(
                parse_criteria(include, exclude, &mut warnings, |v| {
                    v.trim()
                        .parse::<i32>()
                        .map_err(|_| ScopeWarning::InvalidYear(v.to_string()))
                }),
            )),
            ScopeKey::Dimension(Dimension::Cities) => Narrowing::Set(SetNarrowing::Cities(
                parse_criteria(include, exclude, &mut warnings, |v| Ok(v.to_string())),
            )),
            ScopeKey::Dimension(Dimension::Sectors) => Narrowing::Set(SetNarrowing::Sectors(
                parse_criteria(include, exclude, &mut warnings, |v| Ok(v.parse::<Sector>()?)),
            )),
            ScopeKey::Dimension(Dimension::Measurements) => {
                Narrowing::Set(SetNarrowing::Measurements(parse_criteria(
                    include,
                    exclude,
                    &mut warnings,
                    |v| Ok(v.parse::<Measurement>()?),
                )))
            }
            ScopeKey::Dimension(Dimension::Items) => Narrowing::Items(parse_criteria(
                include,
                exclude,
                &mut warnings,
                |v| Ok(v.to_string()),
            )),
            ScopeKey::Derived(attribute) => Narrowing::Derived {
                attribute,
                criteria: parse_criteria(include, exclude, &mut warnings, |v| Ok(v.to_string())),
            },
        };

        warnings.extend(self.narrow(op));
        Ok(warnings)
    }

    /// Reset dimensions to their value at construction. An empty slice
    /// resets all of them.
    pub fn clear(&mut self, dims: &[Dimension]) {
        let dims = if dims.is_empty() { &Dimension::ALL[..] } else { dims };
        let next = self.current.cleared(dims, &self.initial);
        let names: Vec<&str> = dims.iter().map(|d| d.name()).collect();
        log::info!("{} cleared.", names.join(", "));
        self.commit(next);
    }

    /// [`ScopeFilter::clear`] by name. Takes the keys of
    /// [`ScopeFilter::update_scope`]; `Province_n` resets cities. Every name
    /// is checked before anything is reset.
    pub fn clear_named(&mut self, names: &[&str]) -> Result<(), ScopeError> {
        let dims = names
            .iter()
            .map(|n| n.parse::<ScopeKey>().map(ScopeKey::dimension))
            .collect::<Result<Vec<_>, _>>()?;
        self.clear(&dims);
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Step back to the previous scope. Returns `false` with nothing to undo.
    pub fn undo(&mut self) -> bool {
        match self.undo.pop() {
            Some(prev) => {
                let current = std::mem::replace(&mut self.current, prev);
                self.redo.push(current);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.redo.pop() {
            Some(next) => {
                let current = std::mem::replace(&mut self.current, next);
                self.undo.push(current);
                true
            }
            None => false,
        }
    }

    pub fn visible_columns(&self) -> Vec<String> {
        self.current.visible_columns(&self.taxonomy)
    }

    /// Indices of the dataset rows in view.
    pub fn visible_rows(&self) -> Vec<usize> {
        filter::visible_rows(&self.dataset, &self.current)
    }

    /// A copy of the dataset restricted to the current scope.
    pub fn view(&self) -> Table {
        filter::view(&self.dataset, &self.current, &self.visible_columns())
    }

    fn commit(&mut self, next: Scope) {
        if next == self.current {
            return;
        }
        let prev = std::mem::replace(&mut self.current, next);
        self.undo.push(prev);
        self.redo.clear();
    }
}

fn parse_criteria<T: Ord>(
    include: Option<&[&str]>,
    exclude: Option<&[&str]>,
    warnings: &mut Vec<ScopeWarning>,
    parse: impl Fn(&str) -> Result<T, ScopeWarning>,
) -> Criteria<T> {
    let mut parse_all = |values: Option<&[&str]>| {
        values.map(|values| {
            values
                .iter()
                .filter_map(|v| match parse(v) {
                    Ok(value) => Some(value),
                    Err(w) => {
                        log::warn!("{w}");
                        warnings.push(w);
                        None
                    }
                })
                .collect::<BTreeSet<T>>()
        })
    };
    Criteria {
        include: parse_all(include),
        exclude: parse_all(exclude),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::tests::obs;
    use crate::data::model::Observation;

    const IRR_MAIZE_WUI: &str = "Irrigation water-use intensity (WUI): Maize";

    /// Provinces A (c1, c2) and B (c3) over 2000–2002.
    fn dataset() -> Arc<WaterUseDataset> {
        let mut rows: Vec<Observation> = Vec::new();
        for year in 2000..=2002 {
            for (city, province) in [("c1", "A"), ("c2", "A"), ("c3", "B")] {
                rows.push(obs(city, year, province, &[(IRR_MAIZE_WUI, year as f64)]));
            }
        }
        Arc::new(WaterUseDataset::from_observations(vec![IRR_MAIZE_WUI.to_string()], rows).unwrap())
    }

    fn filter() -> ScopeFilter {
        ScopeFilter::new(dataset(), Taxonomy::standard())
    }

    fn strings(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn new_filter_starts_at_full_extent() {
        let f = filter();
        assert_eq!(f.scope().time, BTreeSet::from([2000, 2001, 2002]));
        assert_eq!(f.scope().cities, strings(&["c1", "c2", "c3"]));
        assert_eq!(f.scope().sectors.len(), 4);
        assert_eq!(f.scope().measurements.len(), 3);
        assert_eq!(f.visible_rows().len(), 9);
    }

    #[test]
    fn sector_narrowing_intersects_with_current_scope() {
        let mut f = filter();
        f.narrow(Narrowing::Set(SetNarrowing::Sectors(Criteria::include([Sector::Irrigation]))));
        let warnings = f.narrow(Narrowing::Set(SetNarrowing::Sectors(Criteria::include([
            Sector::Irrigation,
            Sector::Industry,
        ]))));
        assert_eq!(f.scope().sectors, BTreeSet::from([Sector::Irrigation]));
        assert_eq!(
            warnings,
            vec![ScopeWarning::OutOfScope {
                dimension: "sectors",
                value: "IND".into()
            }]
        );
    }

    #[test]
    fn province_narrowing_derives_cities() {
        let mut f = filter();
        let warnings = f.update_scope("Province_n", Some(&["A"]), None).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(f.scope().cities, strings(&["c1", "c2"]));
    }

    #[test]
    fn province_narrowing_respects_prior_city_scope() {
        let mut f = filter();
        f.update_scope("cities", None, Some(&["c2"])).unwrap();
        f.update_scope("Province_n", Some(&["A"]), None).unwrap();
        assert_eq!(f.scope().cities, strings(&["c1"]));
    }

    #[test]
    fn province_narrowing_only_sees_visible_rows() {
        let mut f = filter();
        f.update_scope("cities", Some(&["c3"]), None).unwrap();
        let warnings = f.update_scope("Province_n", Some(&["A"]), None).unwrap();
        assert!(f.scope().cities.is_empty());
        assert_eq!(
            warnings,
            vec![ScopeWarning::OutOfScope {
                dimension: PROVINCE,
                value: "A".into()
            }]
        );
        assert_eq!(
            warnings[0].to_string(),
            "Province_n: 'A' is not in the current scope"
        );
    }

    #[test]
    fn item_overrides_accumulate_in_any_order() {
        let a = "Irrigation WU: Rice";
        let b = "Irrigation WU: Wheat";

        let mut f1 = filter();
        f1.update_scope("items", Some(&[a]), None).unwrap();
        f1.update_scope("items", Some(&[b]), None).unwrap();

        let mut f2 = filter();
        f2.update_scope("items", Some(&[b]), None).unwrap();
        f2.update_scope("items", Some(&[a]), None).unwrap();

        assert_eq!(f1.scope().include_items, strings(&[a, b]));
        assert_eq!(f1.scope().include_items, f2.scope().include_items);
        assert_eq!(f1.visible_columns(), vec![a.to_string(), b.to_string()]);
    }

    #[test]
    fn unknown_item_is_kept_and_reported() {
        let mut f = filter();
        let warnings = f.update_scope("items", None, Some(&["Nope"])).unwrap();
        assert_eq!(warnings, vec![ScopeWarning::UnknownItem("Nope".into())]);
        assert!(f.scope().exclude_items.contains("Nope"));
    }

    #[test]
    fn visible_columns_apply_exclusions_within_sector_and_measurement() {
        let mut f = filter();
        f.update_scope("sectors", Some(&["IRR"]), None).unwrap();
        f.update_scope("measurements", Some(&["WUI"]), None).unwrap();
        f.update_scope("items", None, Some(&[IRR_MAIZE_WUI])).unwrap();
        let cols = f.visible_columns();
        assert_eq!(cols.len(), 4);
        assert!(!cols.iter().any(|c| c == IRR_MAIZE_WUI));
    }

    #[test]
    fn visible_columns_stay_within_flattened_taxonomy() {
        let mut f = filter();
        f.update_scope("sectors", Some(&["URB"]), None).unwrap();
        f.update_scope("items", Some(&["Irrigation WU: Rice", "Urban service WU"]), None)
            .unwrap();
        assert_eq!(f.visible_columns(), vec!["Urban service WU".to_string()]);
    }

    #[test]
    fn invalid_codes_are_dropped_with_warning() {
        let mut f = filter();
        let warnings = f
            .update_scope("sectors", Some(&["IRR", "XYZ"]), None)
            .unwrap();
        assert_eq!(f.scope().sectors, BTreeSet::from([Sector::Irrigation]));
        assert!(matches!(&warnings[..], [ScopeWarning::InvalidKey(_)]));

        let warnings = f.update_scope("Year", Some(&["2001", "soon"]), None).unwrap();
        assert_eq!(f.scope().time, BTreeSet::from([2001]));
        assert_eq!(warnings, vec![ScopeWarning::InvalidYear("soon".into())]);
    }

    #[test]
    fn unknown_keys_are_fatal() {
        let mut f = filter();
        assert_eq!(
            f.update_scope("rivers", Some(&["x"]), None),
            Err(ScopeError::InvalidScope("rivers".into()))
        );
        assert_eq!(
            f.clear_named(&["sectors", "rivers"]),
            Err(ScopeError::InvalidScope("rivers".into()))
        );
        assert_eq!(
            f.update_scope("County", Some(&["x"]), None),
            Err(ScopeError::InvalidScope("County".into()))
        );
        let message = ScopeError::InvalidScope("rivers".into()).to_string();
        for key in ["time", "Year", "cities", "City_ID", "sectors", "measurements", "items", "Province_n"] {
            assert!(message.contains(key), "{key} missing from '{message}'");
        }
    }

    #[test]
    fn clear_named_takes_update_keys() {
        let mut f = filter();
        f.update_scope("Province_n", Some(&["A"]), None).unwrap();
        f.update_scope("Year", Some(&["2001"]), None).unwrap();
        f.clear_named(&["Province_n", "Year"]).unwrap();
        assert_eq!(f.scope(), f.initial_scope());
    }

    #[test]
    fn clear_named_rejects_before_resetting_anything() {
        let mut f = filter();
        f.update_scope("sectors", Some(&["IRR"]), None).unwrap();
        assert!(f.clear_named(&["sectors", "bogus"]).is_err());
        assert_eq!(f.scope().sectors.len(), 1);
    }

    #[test]
    fn clear_one_dimension_leaves_others() {
        let mut f = filter();
        f.update_scope("sectors", Some(&["IRR"]), None).unwrap();
        f.update_scope("time", Some(&["2000"]), None).unwrap();
        f.update_scope("cities", Some(&["c1"]), None).unwrap();
        f.update_scope("measurements", Some(&["WU"]), None).unwrap();
        f.update_scope("items", Some(&["Irrigation WU: Rice"]), None).unwrap();
        let before = f.scope().clone();

        f.clear_named(&["sectors"]).unwrap();
        let after = f.scope();
        assert_eq!(after.sectors, f.initial_scope().sectors);
        assert_eq!(after.time, before.time);
        assert_eq!(after.cities, before.cities);
        assert_eq!(after.measurements, before.measurements);
        assert_eq!(after.include_items, before.include_items);
    }

    #[test]
    fn clear_all_restores_construction_scope() {
        let mut f = filter();
        f.update_scope("sectors", None, Some(&["IND"])).unwrap();
        f.update_scope("Province_n", Some(&["B"]), None).unwrap();
        f.update_scope("items", Some(&["Rural domestic WU"]), None).unwrap();
        f.clear(&[]);
        assert_eq!(f.scope(), f.initial_scope());
    }

    #[test]
    fn undo_and_redo_walk_history() {
        let mut f = filter();
        f.update_scope("time", Some(&["2000", "2001"]), None).unwrap();
        f.update_scope("time", Some(&["2001"]), None).unwrap();
        assert!(f.undo());
        assert_eq!(f.scope().time, BTreeSet::from([2000, 2001]));
        assert!(f.redo());
        assert_eq!(f.scope().time, BTreeSet::from([2001]));
        assert!(!f.redo());
        assert!(f.undo());
        assert!(f.undo());
        assert!(!f.can_undo());
        assert_eq!(f.scope(), f.initial_scope());
    }

    #[test]
    fn view_restricts_rows_and_columns() {
        let mut f = filter();
        f.update_scope("sectors", Some(&["IRR"]), None).unwrap();
        f.update_scope("measurements", Some(&["WUI"]), None).unwrap();
        f.update_scope("time", Some(&["2001"]), None).unwrap();
        f.update_scope("Province_n", Some(&["A"]), None).unwrap();

        let view = f.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view.columns.len(), 5);
        assert_eq!(view.column(IRR_MAIZE_WUI).unwrap(), vec![Some(2001.0); 2]);
        assert_eq!(view.column("Irrigation water-use intensity (WUI): Rice").unwrap(), vec![None; 2]);
    }

    #[test]
    fn apply_leaves_original_scope_untouched() {
        let ds = dataset();
        let tax = Taxonomy::standard();
        let scope = Scope::full(&ds);
        let op = Narrowing::Set(SetNarrowing::Time(Criteria::exclude([2000])));
        let narrowed = scope.apply(&op, &ds, &tax);
        assert_eq!(scope.time.len(), 3);
        assert_eq!(narrowed.scope.time, BTreeSet::from([2001, 2002]));
        assert_eq!(op.dimension(), Dimension::Time);
    }

    mod properties {
        use super::*;
        use proptest::collection::btree_set;
        use proptest::prelude::*;

        fn sector_set() -> impl Strategy<Value = BTreeSet<Sector>> {
            btree_set(prop::sample::select(Sector::ALL.to_vec()), 0..4)
        }

        proptest! {
            #[test]
            fn narrowing_is_monotone(
                steps in proptest::collection::vec((sector_set(), btree_set(1999i32..2004, 0..4)), 1..6),
            ) {
                let mut f = filter();
                for (sectors, years) in steps {
                    let before = f.scope().clone();
                    f.narrow(Narrowing::Set(SetNarrowing::Sectors(Criteria::include(sectors))));
                    f.narrow(Narrowing::Set(SetNarrowing::Time(Criteria::include(years))));
                    prop_assert!(f.scope().sectors.is_subset(&before.sectors));
                    prop_assert!(f.scope().time.is_subset(&before.time));
                    let labels: BTreeSet<String> = f.scope().items(f.taxonomy()).into_iter().collect();
                    prop_assert!(f.visible_columns().iter().all(|c| labels.contains(c)));
                }
            }

            #[test]
            fn clear_after_any_narrowing_restores_initial(
                sectors in sector_set(),
                cities in btree_set(prop::sample::select(vec!["c1", "c2", "c3", "c9"]), 0..4),
            ) {
                let mut f = filter();
                f.narrow(Narrowing::Set(SetNarrowing::Sectors(Criteria::exclude(sectors))));
                f.narrow(Narrowing::Set(SetNarrowing::Cities(Criteria::include(
                    cities.into_iter().map(str::to_string),
                ))));
                f.clear(&[]);
                prop_assert_eq!(f.scope(), f.initial_scope());
            }
        }
    }
}
