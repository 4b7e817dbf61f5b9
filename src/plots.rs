//! Live plot data: named series sharing one independent axis.

use crate::channel::Sample;
use crate::errors::PlotError;

/// Axis candidates, most preferred first.
pub const AXIS_PREFERENCE: [&str; 2] = ["Step", "Time (ps)"];

/// Colours assigned to series in order, wrapping around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesColor {
    Blue,
    Green,
    Silver,
    Pink,
    LightBlue,
    Red,
    DarkGray,
    LightGreen,
}

pub const PALETTE: [SeriesColor; 8] = [
    SeriesColor::Blue,
    SeriesColor::Green,
    SeriesColor::Silver,
    SeriesColor::Pink,
    SeriesColor::LightBlue,
    SeriesColor::Red,
    SeriesColor::DarkGray,
    SeriesColor::LightGreen,
];

/// One dependent field plotted against the axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub color: SeriesColor,
    pub points: Vec<(f64, f64)>,
}

impl Series {
    fn new(name: String, color: SeriesColor) -> Self {
        Self {
            name,
            color,
            points: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn last(&self) -> Option<(f64, f64)> {
        self.points.last().copied()
    }

    /// `(x_min, x_max, y_min, y_max)`, padded so a flat series still has
    /// a non-empty range.
    pub fn bounds(&self) -> Option<[f64; 4]> {
        let (first, rest) = self.points.split_first()?;
        let mut b = [first.0, first.0, first.1, first.1];
        for &(x, y) in rest {
            b[0] = b[0].min(x);
            b[1] = b[1].max(x);
            b[2] = b[2].min(y);
            b[3] = b[3].max(y);
        }
        if b[1] <= b[0] {
            b[1] = b[0] + 1.0;
        }
        if b[3] <= b[2] {
            let pad = (b[2].abs() * 0.05).max(1.0);
            b[2] -= pad;
            b[3] += pad;
        }
        Some(b)
    }
}

/// The plots of one run. Empty until `create_plots` fixes the schema.
#[derive(Debug, Default, Clone)]
pub struct PlotSet {
    axis: Option<String>,
    series: Vec<Series>,
}

impl PlotSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_created(&self) -> bool {
        self.axis.is_some()
    }

    pub fn axis(&self) -> Option<&str> {
        self.axis.as_deref()
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    pub fn get(&self, name: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.name == name)
    }

    /// Pick the axis among `field_names` and allocate one empty series per
    /// remaining field. Can only succeed once.
    pub fn create_plots(&mut self, field_names: &[String]) -> Result<(), PlotError> {
        if self.is_created() {
            return Err(PlotError::AlreadyCreated);
        }
        let axis = select_axis(field_names)?;

        self.series = field_names
            .iter()
            .filter(|name| name.as_str() != axis)
            .zip(PALETTE.iter().cycle())
            .map(|(name, color)| Series::new(name.clone(), *color))
            .collect();
        self.axis = Some(axis.to_string());
        Ok(())
    }

    /// Append the sample's values to their series.
    pub fn append_sample(&mut self, sample: &Sample) -> Result<(), PlotError> {
        let axis = self.axis.as_deref().ok_or(PlotError::NotCreated)?;
        let x = sample
            .get(axis)
            .ok_or_else(|| PlotError::MissingAxisValue(axis.to_string()))?;

        for series in &mut self.series {
            if let Some(y) = sample.get(&series.name) {
                series.points.push((x, y));
            }
        }
        Ok(())
    }
}

/// First field of `AXIS_PREFERENCE` present in `field_names`.
pub fn select_axis(field_names: &[String]) -> Result<&'static str, PlotError> {
    AXIS_PREFERENCE
        .iter()
        .copied()
        .find(|axis| field_names.iter().any(|name| name == axis))
        .ok_or_else(|| PlotError::NoAxisField {
            preferred: AXIS_PREFERENCE.iter().map(|s| s.to_string()).collect(),
            fields: field_names.to_vec(),
        })
}
