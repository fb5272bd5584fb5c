use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::data::model::Table;
use crate::taxonomy::{Measurement, Sector, Taxonomy};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    #[error("Not registered unit of item: '{0}'")]
    UnitNotFound(String),

    #[error("cannot parse unit '{expr}': {reason}")]
    Parse { expr: String, reason: String },

    #[error("unknown unit '{0}'")]
    UnknownUnit(String),

    #[error("cannot convert '{from}' to '{to}': dimensions differ")]
    Incompatible { from: String, to: String },

    #[error("{targets} target units given for {columns} columns")]
    TargetCount { targets: usize, columns: usize },

    #[error("column '{0}' is not in the table")]
    MissingColumn(String),
}

// ---------------------------------------------------------------------------
// Unit – a scale factor over base dimensions
// ---------------------------------------------------------------------------

/// Base dimensions, in the order of [`Unit::dims`].
const BASE: [&str; 4] = ["m", "g", "s", "yuan"];

/// A physical unit as a multiple of the base units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unit {
    /// Size of one of this unit in base units.
    pub factor: f64,
    /// Exponents of length, mass, time and currency.
    pub dims: [i32; 4],
}

impl Unit {
    const ONE: Unit = Unit {
        factor: 1.0,
        dims: [0; 4],
    };

    fn base(idx: usize) -> Unit {
        let mut dims = [0; 4];
        dims[idx] = 1;
        Unit { factor: 1.0, dims }
    }

    /// Product of two units, or `None` when an exponent overflows.
    fn checked_mul(self, other: Unit) -> Option<Unit> {
        let mut dims = self.dims;
        for (d, o) in dims.iter_mut().zip(other.dims) {
            *d = d.checked_add(o)?;
        }
        Some(Unit {
            factor: self.factor * other.factor,
            dims,
        })
    }

    fn checked_powi(self, n: i32) -> Option<Unit> {
        let mut dims = self.dims;
        for d in &mut dims {
            *d = d.checked_mul(n)?;
        }
        Some(Unit {
            factor: self.factor.powi(n),
            dims,
        })
    }

    fn scaled(self, by: f64) -> Unit {
        Unit {
            factor: self.factor * by,
            ..self
        }
    }

    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.dims == other.dims
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.factor)?;
        for (name, exp) in BASE.iter().zip(self.dims) {
            match exp {
                0 => {}
                1 => write!(f, " {name}")?,
                n => write!(f, " {name}**{n}")?,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UnitRegistry – named units, prefixes and the expression parser
// ---------------------------------------------------------------------------

const PREFIXES: [(&str, f64); 11] = [
    ("da", 1e1),
    ("G", 1e9),
    ("M", 1e6),
    ("k", 1e3),
    ("h", 1e2),
    ("d", 1e-1),
    ("c", 1e-2),
    ("m", 1e-3),
    ("u", 1e-6),
    ("µ", 1e-6),
    ("n", 1e-9),
];

#[derive(Debug, Clone)]
pub struct UnitRegistry {
    units: BTreeMap<String, Unit>,
}

impl Default for UnitRegistry {
    fn default() -> Self {
        let mut registry = UnitRegistry {
            units: BASE
                .iter()
                .enumerate()
                .map(|(i, name)| (name.to_string(), Unit::base(i)))
                .collect(),
        };
        for definition in [
            "ha = 1e4 m ** 2",
            "mu = 666.6667 m ** 2",
            "L = 1e-3 m ** 3",
            "t = 1e6 g",
            "min = 60 s",
            "h = 3600 s",
            "d = 86400 s",
            "yr = 365.25 d",
            "TMC = 1e8 m ** 3",
        ] {
            // The built-in table parses by construction.
            if let Err(e) = registry.define(definition) {
                log::error!("bad built-in unit '{definition}': {e}");
            }
        }
        registry
    }
}

impl UnitRegistry {
    /// Add a unit from a `name = expression` definition, e.g.
    /// `TMC = 1e8 m ** 3`.
    pub fn define(&mut self, definition: &str) -> Result<(), UnitError> {
        let (name, expr) = definition.split_once('=').ok_or_else(|| UnitError::Parse {
            expr: definition.to_string(),
            reason: "expected 'name = expression'".to_string(),
        })?;
        let unit = self.parse(expr.trim())?;
        self.units.insert(name.trim().to_string(), unit);
        Ok(())
    }

    /// Resolve a single unit name, trying prefixed forms when the bare name
    /// is not registered.
    fn lookup(&self, name: &str) -> Result<Unit, UnitError> {
        if let Some(unit) = self.units.get(name) {
            return Ok(*unit);
        }
        PREFIXES
            .iter()
            .find_map(|(prefix, scale)| {
                let rest = name.strip_prefix(prefix)?;
                self.units.get(rest).map(|u| u.scaled(*scale))
            })
            .ok_or_else(|| UnitError::UnknownUnit(name.to_string()))
    }

    /// Parse a product of factors such as `mm * km**-2`, `m3 / yr` or
    /// `1e8 m ^ 3`.
    pub fn parse(&self, expr: &str) -> Result<Unit, UnitError> {
        let tokens = tokenize(expr)?;
        let err = |reason: &str| UnitError::Parse {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let mut unit = Unit::ONE;
        let mut dividing = false;
        let mut expect_factor = true;
        let mut iter = tokens.into_iter().peekable();

        while let Some(token) = iter.next() {
            match token {
                Token::Mul | Token::Div if expect_factor => return Err(err("missing factor")),
                Token::Mul => {
                    dividing = false;
                    expect_factor = true;
                }
                Token::Div => {
                    dividing = true;
                    expect_factor = true;
                }
                Token::Pow => return Err(err("exponent without a base")),
                Token::Exponent(_) => return Err(err("signed number outside an exponent")),
                Token::Number(_) | Token::Name(..) => {
                    // Juxtaposition multiplies: `1e8 m ** 3`.
                    let mut factor = match token {
                        Token::Number(value) => Unit::ONE.scaled(value),
                        Token::Name(name, exp) => {
                            let exp = exponent(exp).ok_or_else(|| err("exponent out of range"))?;
                            self.lookup(&name)?
                                .checked_powi(exp)
                                .ok_or_else(|| err("exponent out of range"))?
                        }
                        _ => unreachable!(),
                    };
                    if iter.peek() == Some(&Token::Pow) {
                        iter.next();
                        let n = match iter.next() {
                            Some(Token::Number(n) | Token::Exponent(n)) if n.fract() == 0.0 => n,
                            _ => return Err(err("exponent must be an integer")),
                        };
                        factor = exponent(n)
                            .and_then(|n| factor.checked_powi(n))
                            .ok_or_else(|| err("exponent out of range"))?;
                    }
                    if dividing {
                        factor = factor
                            .checked_powi(-1)
                            .ok_or_else(|| err("exponent out of range"))?;
                    }
                    unit = unit
                        .checked_mul(factor)
                        .ok_or_else(|| err("exponent out of range"))?;
                    expect_factor = false;
                }
            }
        }
        if expect_factor {
            return Err(err("expression ends without a factor"));
        }
        Ok(unit)
    }

    /// Multiplier taking magnitudes in `from` to magnitudes in `to`.
    pub fn conversion_factor(&self, from: &str, to: &str) -> Result<f64, UnitError> {
        let source = self.parse(from)?;
        let target = self.parse(to)?;
        if !source.is_compatible(&target) {
            return Err(UnitError::Incompatible {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(source.factor / target.factor)
    }
}

/// Largest exponent magnitude accepted in an expression.
const MAX_EXPONENT: f64 = 64.0;

fn exponent(n: f64) -> Option<i32> {
    (n.fract() == 0.0 && n.abs() <= MAX_EXPONENT).then_some(n as i32)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    /// Signed number; only valid right after `**` or `^`.
    Exponent(f64),
    /// Unit name with an exponent written as trailing digits (`m3`).
    Name(String, f64),
    Mul,
    Div,
    Pow,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, UnitError> {
    let err = |reason: String| UnitError::Parse {
        expr: expr.to_string(),
        reason,
    };
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '^' => {
                tokens.push(Token::Pow);
                i += 1;
            }
            '*' | '·' => {
                tokens.push(Token::Mul);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Div);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' || c == '-' || c == '+' => {
                let signed = c == '-' || c == '+';
                if signed && tokens.last() != Some(&Token::Pow) {
                    return Err(err(format!("sign '{c}' outside an exponent")));
                }
                let start = i;
                i += 1;
                while i < chars.len() {
                    let d = chars[i];
                    let exp_sign = (d == '-' || d == '+') && matches!(chars[i - 1], 'e' | 'E');
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exp_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| err(format!("'{text}' is not a number")))?;
                tokens.push(if signed {
                    Token::Exponent(value)
                } else {
                    Token::Number(value)
                });
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphabetic() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                let digits_start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let exp = if digits_start == i {
                    1.0
                } else {
                    chars[digits_start..i]
                        .iter()
                        .collect::<String>()
                        .parse::<f64>()
                        .map_err(|_| err("bad exponent".to_string()))?
                };
                tokens.push(Token::Name(name, exp));
            }
            other => return Err(err(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Canonical units of the dataset's columns
// ---------------------------------------------------------------------------

/// Unit the dataset records a column in.
pub fn canonical_unit(taxonomy: &Taxonomy, column: &str) -> Result<&'static str, UnitError> {
    if taxonomy.is_summary(column) {
        return Ok("km ** 3");
    }
    let unit = taxonomy
        .locate(column)
        .and_then(|pos| match (pos.sector, pos.measurement) {
            (Sector::Irrigation, Measurement::Intensity) => Some("mm * kha**-1"),
            (Sector::Irrigation, Measurement::Magnitude) => Some("kha"),
            (Sector::Irrigation, Measurement::Volume) => Some("mm"),
            _ => None,
        });
    unit.ok_or_else(|| UnitError::UnitNotFound(column.to_string()))
}

// ---------------------------------------------------------------------------
// Converting table columns
// ---------------------------------------------------------------------------

/// Requested units for the item columns of a table.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitTarget {
    /// Same unit for every column.
    All(String),
    /// Only the listed columns are converted.
    PerColumn(BTreeMap<String, String>),
    /// One unit per column, in column order.
    Ordered(Vec<String>),
}

impl UnitTarget {
    fn resolve(&self, columns: &[String]) -> Result<Vec<(String, String)>, UnitError> {
        match self {
            UnitTarget::All(unit) => Ok(columns.iter().map(|c| (c.clone(), unit.clone())).collect()),
            UnitTarget::PerColumn(map) => Ok(columns
                .iter()
                .filter_map(|c| map.get(c).map(|u| (c.clone(), u.clone())))
                .collect()),
            UnitTarget::Ordered(units) => {
                if units.len() != columns.len() {
                    return Err(UnitError::TargetCount {
                        targets: units.len(),
                        columns: columns.len(),
                    });
                }
                Ok(columns.iter().cloned().zip(units.iter().cloned()).collect())
            }
        }
    }
}

/// What [`convert_table`] does when a column cannot be converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnFailure {
    /// Leave the column as it is, report it, and carry on.
    #[default]
    Skip,
    /// Stop at the first failure and leave the table untouched.
    Abort,
}

/// Convert one column in place. Its current unit is the one recorded in the
/// table, or the canonical unit when it has not been converted yet.
pub fn convert_column(
    table: &mut Table,
    registry: &UnitRegistry,
    taxonomy: &Taxonomy,
    column: &str,
    target: &str,
) -> Result<(), UnitError> {
    let idx = table
        .column_index(column)
        .ok_or_else(|| UnitError::MissingColumn(column.to_string()))?;
    let from = match table.units.get(idx).cloned().flatten() {
        Some(unit) => unit,
        None => canonical_unit(taxonomy, column)?.to_string(),
    };
    let factor = registry.conversion_factor(&from, target)?;

    for row in &mut table.rows {
        if let Some(v) = row.values[idx].as_mut() {
            *v *= factor;
        }
    }
    if table.units.len() < table.columns.len() {
        table.units.resize(table.columns.len(), None);
    }
    table.units[idx] = Some(target.to_string());
    log::debug!("converted '{column}' from {from} to {target} (x{factor})");
    Ok(())
}

/// Convert the table's item columns to the requested units.
///
/// Returns the columns that failed; with [`OnFailure::Abort`] the first
/// failure is returned as the error instead and `table` is unchanged.
pub fn convert_table(
    table: &mut Table,
    registry: &UnitRegistry,
    taxonomy: &Taxonomy,
    target: &UnitTarget,
    on_failure: OnFailure,
) -> Result<Vec<(String, UnitError)>, UnitError> {
    let plan = target.resolve(&table.columns)?;
    let mut converted = table.clone();
    let mut failures = Vec::new();

    for (column, unit) in plan {
        if let Err(e) = convert_column(&mut converted, registry, taxonomy, &column, &unit) {
            match on_failure {
                OnFailure::Abort => return Err(e),
                OnFailure::Skip => {
                    log::warn!("Failed to convert '{column}': {e}");
                    failures.push((column, e));
                }
            }
        }
    }

    *table = converted;
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::data::model::TableRow;

    const WUI_RICE: &str = "Irrigation water-use intensity (WUI): Rice";
    const AREA_RICE: &str = "Irrigated area: Rice";
    const URBAN_WU: &str = "Urban domestic WU";

    fn table() -> Table {
        Table {
            columns: vec![WUI_RICE.into(), AREA_RICE.into(), URBAN_WU.into()],
            units: vec![None; 3],
            rows: vec![TableRow {
                city_id: "C1".into(),
                year: 2000,
                province: "Gansu".into(),
                values: vec![Some(100.0), Some(2.0), Some(7.0)],
            }],
        }
    }

    #[test]
    fn parses_prefixed_units_and_exponents() {
        let reg = UnitRegistry::default();
        assert_relative_eq!(reg.parse("mm").unwrap().factor, 1e-3);
        assert_relative_eq!(reg.parse("km**2").unwrap().factor, 1e6);
        assert_relative_eq!(reg.parse("kha").unwrap().factor, 1e7);
        assert_eq!(reg.parse("m3 / yr").unwrap().dims, [3, 0, -1, 0]);
        assert_eq!(reg.parse("mm * km**-2").unwrap().dims, [-1, 0, 0, 0]);
        assert_relative_eq!(reg.parse("TMC").unwrap().factor, 1e8);
        assert_relative_eq!(reg.parse("1e8 m ^ 3").unwrap().factor, 1e8);
    }

    #[test]
    fn bare_names_win_over_prefixes() {
        let reg = UnitRegistry::default();
        // hour, not hecto-something
        assert_eq!(reg.parse("h").unwrap().dims, [0, 0, 1, 0]);
        // minute, not milli-inch
        assert_relative_eq!(reg.parse("min").unwrap().factor, 60.0);
        assert_relative_eq!(reg.parse("dam").unwrap().factor, 10.0);
    }

    #[test]
    fn parse_errors_are_reported() {
        let reg = UnitRegistry::default();
        assert_eq!(reg.parse("furlong"), Err(UnitError::UnknownUnit("furlong".into())));
        assert!(matches!(reg.parse("m *"), Err(UnitError::Parse { .. })));
        assert!(matches!(reg.parse("m ** x"), Err(UnitError::Parse { .. })));
        assert!(matches!(reg.parse("(m)"), Err(UnitError::Parse { .. })));
    }

    #[test]
    fn oversized_exponents_are_parse_errors() {
        let reg = UnitRegistry::default();
        assert!(matches!(reg.parse("m99999 ** 99999"), Err(UnitError::Parse { .. })));
        assert!(matches!(
            reg.parse("m ** 2000000000 * m ** 2000000000"),
            Err(UnitError::Parse { .. })
        ));
        assert!(matches!(reg.parse("m ** -65"), Err(UnitError::Parse { .. })));
        assert_eq!(reg.parse("m ** 64").unwrap().dims, [64, 0, 0, 0]);
        assert_eq!(reg.parse("m ** -64").unwrap().dims, [-64, 0, 0, 0]);
    }

    #[test]
    fn signed_numbers_only_follow_an_exponent_operator() {
        let reg = UnitRegistry::default();
        assert!(matches!(reg.parse("m -1"), Err(UnitError::Parse { .. })));
        assert!(matches!(reg.parse("+2 m"), Err(UnitError::Parse { .. })));
        assert!(matches!(
            reg.conversion_factor("km", "m -1"),
            Err(UnitError::Parse { .. })
        ));
        assert_eq!(reg.parse("m ** -1").unwrap().dims, [-1, 0, 0, 0]);
        assert_eq!(reg.parse("m ^ +2").unwrap().dims, [2, 0, 0, 0]);
        assert_relative_eq!(reg.parse("1e-3 m").unwrap().factor, 1e-3);
    }

    #[test]
    fn conversion_factor_checks_dimensions() {
        let reg = UnitRegistry::default();
        assert_relative_eq!(reg.conversion_factor("mm * kha**-1", "mm * km**-2").unwrap(), 0.1);
        assert_relative_eq!(reg.conversion_factor("km ** 3", "TMC").unwrap(), 10.0);
        assert!(matches!(
            reg.conversion_factor("kha", "mm"),
            Err(UnitError::Incompatible { .. })
        ));
    }

    #[test]
    fn define_adds_units() {
        let mut reg = UnitRegistry::default();
        reg.define("acre = 4046.8564 m**2").unwrap();
        assert_relative_eq!(reg.conversion_factor("kacre", "ha").unwrap(), 404.68564, epsilon = 1e-9);
        assert!(reg.define("no equals sign").is_err());
    }

    #[test]
    fn canonical_units_cover_irrigation_and_totals() {
        let tax = Taxonomy::standard();
        assert_eq!(canonical_unit(&tax, WUI_RICE), Ok("mm * kha**-1"));
        assert_eq!(canonical_unit(&tax, AREA_RICE), Ok("kha"));
        assert_eq!(canonical_unit(&tax, "Irrigation WU: Rice"), Ok("mm"));
        assert_eq!(canonical_unit(&tax, "Total water use"), Ok("km ** 3"));
        assert_eq!(
            canonical_unit(&tax, URBAN_WU),
            Err(UnitError::UnitNotFound(URBAN_WU.into()))
        );
    }

    #[test]
    fn convert_table_skips_columns_without_units() {
        let reg = UnitRegistry::default();
        let tax = Taxonomy::standard();
        let mut t = table();
        let target = UnitTarget::PerColumn(BTreeMap::from([
            (WUI_RICE.to_string(), "mm * km**-2".to_string()),
            (URBAN_WU.to_string(), "km**3".to_string()),
        ]));
        let failures = convert_table(&mut t, &reg, &tax, &target, OnFailure::Skip).unwrap();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, URBAN_WU);
        assert_relative_eq!(t.rows[0].values[0].unwrap(), 10.0);
        assert_eq!(t.unit_of(WUI_RICE), Some("mm * km**-2"));
        assert_eq!(t.rows[0].values[1], Some(2.0));
        assert_eq!(t.rows[0].values[2], Some(7.0));
        assert_eq!(t.unit_of(URBAN_WU), None);
    }

    #[test]
    fn convert_table_abort_leaves_table_untouched() {
        let reg = UnitRegistry::default();
        let tax = Taxonomy::standard();
        let mut t = table();
        let target = UnitTarget::Ordered(vec!["mm * km**-2".into(), "ha".into(), "km**3".into()]);
        let err = convert_table(&mut t, &reg, &tax, &target, OnFailure::Abort).unwrap_err();
        assert_eq!(err, UnitError::UnitNotFound(URBAN_WU.into()));
        assert_eq!(t, table());
    }

    #[test]
    fn ordered_targets_must_match_column_count() {
        let reg = UnitRegistry::default();
        let tax = Taxonomy::standard();
        let mut t = table();
        let target = UnitTarget::Ordered(vec!["mm".into()]);
        assert_eq!(
            convert_table(&mut t, &reg, &tax, &target, OnFailure::Skip),
            Err(UnitError::TargetCount {
                targets: 1,
                columns: 3
            })
        );
    }

    #[test]
    fn converted_columns_convert_from_their_new_unit() {
        let reg = UnitRegistry::default();
        let tax = Taxonomy::standard();
        let mut t = table();
        convert_column(&mut t, &reg, &tax, AREA_RICE, "ha").unwrap();
        assert_relative_eq!(t.rows[0].values[1].unwrap(), 2000.0);
        convert_column(&mut t, &reg, &tax, AREA_RICE, "km**2").unwrap();
        assert_relative_eq!(t.rows[0].values[1].unwrap(), 20.0);
        assert_eq!(
            convert_column(&mut t, &reg, &tax, "nope", "m"),
            Err(UnitError::MissingColumn("nope".into()))
        );
    }
}
