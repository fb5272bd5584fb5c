use eframe::egui::Color32;
use palette::{Hsl, IntoColor, Srgb};

// ---------------------------------------------------------------------------
// Sequential palette generator
// ---------------------------------------------------------------------------

/// Lightness at the pale and dark ends of the red ramp.
const LIGHTNESS_PALE: f32 = 0.92;
const LIGHTNESS_DARK: f32 = 0.32;

/// Generates `n` colours running from pale to dark red.
pub fn generate_ramp(n: usize) -> Vec<Color32> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let t = if n == 1 { 1.0 } else { i as f32 / (n - 1) as f32 };
            let lightness = LIGHTNESS_PALE + (LIGHTNESS_DARK - LIGHTNESS_PALE) * t;
            let hsl = Hsl::new(2.0, 0.75, lightness);
            let rgb: Srgb = hsl.into_color();
            Color32::from_rgb(
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Class breaks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Classification {
    /// Classes of equal width between min and max.
    #[default]
    EqualInterval,
    /// Classes holding roughly equal numbers of values.
    Quantile,
}

impl Classification {
    pub const ALL: [Classification; 2] = [Classification::EqualInterval, Classification::Quantile];

    pub fn label(self) -> &'static str {
        match self {
            Classification::EqualInterval => "Equal interval",
            Classification::Quantile => "Quantile",
        }
    }

    /// Upper bounds of `k` classes; the last equals the maximum. Empty when
    /// there are no finite values.
    pub fn breaks(self, values: &[f64], k: usize) -> Vec<f64> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() || k == 0 {
            return Vec::new();
        }
        sorted.sort_by(f64::total_cmp);
        let min = sorted[0];
        let max = sorted[sorted.len() - 1];

        let mut breaks: Vec<f64> = match self {
            Classification::EqualInterval => {
                let width = (max - min) / k as f64;
                (1..=k).map(|i| min + width * i as f64).collect()
            }
            Classification::Quantile => (1..=k)
                .map(|i| {
                    let pos = (i * sorted.len()).div_ceil(k).saturating_sub(1);
                    sorted[pos.min(sorted.len() - 1)]
                })
                .collect(),
        };
        if let Some(last) = breaks.last_mut() {
            *last = max;
        }
        breaks.dedup();
        breaks
    }
}

// ---------------------------------------------------------------------------
// Sequential map: value → Color32
// ---------------------------------------------------------------------------

/// Maps numeric values to the colour of their class.
#[derive(Debug, Clone)]
pub struct SequentialMap {
    pub column: String,
    breaks: Vec<f64>,
    colors: Vec<Color32>,
    missing_color: Color32,
}

impl SequentialMap {
    /// Build a map with `k` classes over the given values.
    pub fn new(column: &str, values: &[f64], k: usize, classification: Classification) -> Self {
        let breaks = classification.breaks(values, k);
        let colors = generate_ramp(breaks.len());
        SequentialMap {
            column: column.to_string(),
            breaks,
            colors,
            missing_color: Color32::LIGHT_GRAY,
        }
    }

    /// Colour of the class containing `value`; grey for missing values.
    pub fn color_for(&self, value: Option<f64>) -> Color32 {
        let Some(v) = value.filter(|v| v.is_finite()) else {
            return self.missing_color;
        };
        let class = self
            .breaks
            .iter()
            .position(|b| v <= *b)
            .unwrap_or(self.breaks.len().saturating_sub(1));
        self.colors.get(class).copied().unwrap_or(self.missing_color)
    }

    /// Return the legend entries (class range label → colour) for the UI.
    pub fn legend_entries(&self) -> Vec<(String, Color32)> {
        let mut lower: Option<f64> = None;
        self.breaks
            .iter()
            .zip(&self.colors)
            .map(|(upper, c)| {
                let label = match lower {
                    None => format!("≤ {upper:.2}"),
                    Some(lo) => format!("{lo:.2} – {upper:.2}"),
                };
                lower = Some(*upper);
                (label, *c)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn ramp_runs_from_light_to_dark() {
        let ramp = generate_ramp(5);
        assert_eq!(ramp.len(), 5);
        let brightness = |c: Color32| c.r() as u32 + c.g() as u32 + c.b() as u32;
        assert!(ramp.windows(2).all(|w| brightness(w[0]) > brightness(w[1])));
        assert!(ramp[4].r() > ramp[4].g());
        assert!(generate_ramp(0).is_empty());
    }

    #[test]
    fn equal_interval_breaks_span_range() {
        let b = Classification::EqualInterval.breaks(&[0.0, 10.0, 3.0, f64::NAN], 5);
        assert_eq!(b.len(), 5);
        assert_relative_eq!(b[0], 2.0);
        assert_relative_eq!(b[4], 10.0);
    }

    #[test]
    fn quantile_breaks_follow_ranks() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        let b = Classification::Quantile.breaks(&values, 5);
        assert_eq!(b, vec![2.0, 4.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn constant_values_collapse_to_one_class() {
        let b = Classification::EqualInterval.breaks(&[3.0, 3.0], 5);
        assert_eq!(b, vec![3.0]);
        assert!(Classification::Quantile.breaks(&[], 5).is_empty());
    }

    #[test]
    fn color_for_picks_class_and_greys_missing() {
        let map = SequentialMap::new("x", &[0.0, 10.0], 5, Classification::EqualInterval);
        assert_eq!(map.color_for(Some(0.0)), generate_ramp(5)[0]);
        assert_eq!(map.color_for(Some(10.0)), generate_ramp(5)[4]);
        assert_eq!(map.color_for(Some(99.0)), generate_ramp(5)[4]);
        assert_eq!(map.color_for(None), Color32::LIGHT_GRAY);
        let legend = map.legend_entries();
        assert_eq!(legend.len(), 5);
        assert_eq!(legend[0].0, "≤ 2.00");
        assert_eq!(legend[1].0, "2.00 – 4.00");
    }
}
