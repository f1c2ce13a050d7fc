//! What a caller asks for: data source, time, variable, level and window.

use chrono::{DateTime, FixedOffset};
use std::ops::RangeInclusive;

use crate::util::format_level;

/// A coordinate selection on one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Span {
    Point(f64),
    /// Closed interval; bounds may be given in either order.
    Range(f64, f64),
}

impl Span {
    /// Returns `(min, max)` regardless of the order the bounds were given in.
    pub fn bounds(&self) -> (f64, f64) {
        match *self {
            Self::Point(p) => (p, p),
            Self::Range(a, b) if a <= b => (a, b),
            Self::Range(a, b) => (b, a),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        let (min, max) = self.bounds();
        value >= min && value <= max
    }

    /// Closed-interval test at `f32` precision, the width MDFS files store
    /// coordinates in. Bounds are narrowed too, so `39.9` matches a value
    /// stored as `39.9f32`.
    pub fn contains_f32(&self, value: f64) -> bool {
        let (min, max) = self.bounds();
        let value = value as f32;
        value >= min as f32 && value <= max as f32
    }
}

impl From<f64> for Span {
    fn from(p: f64) -> Self {
        Self::Point(p)
    }
}

impl From<RangeInclusive<f64>> for Span {
    fn from(r: RangeInclusive<f64>) -> Self {
        Self::Range(*r.start(), *r.end())
    }
}

impl From<(f64, f64)> for Span {
    fn from((a, b): (f64, f64)) -> Self {
        Self::Range(a, b)
    }
}

/// Optional latitude/longitude restriction. `None` means unrestricted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Extent {
    pub lat: Option<Span>,
    pub lon: Option<Span>,
}

impl Extent {
    pub fn new(lat: Option<Span>, lon: Option<Span>) -> Self {
        Self { lat, lon }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.lat.is_none() && self.lon.is_none()
    }

    /// Closed-interval test on both axes, at stored coordinate precision.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.lat.is_none_or(|s| s.contains_f32(lat))
            && self.lon.is_none_or(|s| s.contains_f32(lon))
    }
}

/// Model runs carry a forecast hour and usually a vertical level;
/// observations carry neither.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestKind {
    Model { forecast_hour: u32, level: Option<f64> },
    Observation,
}

/// A fully specified data request.
///
/// Built with [`DataRequest::model`] or [`DataRequest::observation`] and the
/// `with_*` methods; resolution only ever reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    pub source: String,
    /// Model initial time or observation time.
    pub time: DateTime<FixedOffset>,
    pub variable: Vec<String>,
    pub kind: RequestKind,
    pub extent: Extent,
    /// Filename template, e.g. `{inittime:%y%m%d%H}.{fh:03d}`.
    pub wildcard: Option<String>,
}

impl DataRequest {
    pub fn model(source: &str, init_time: DateTime<FixedOffset>, forecast_hour: u32) -> Self {
        Self {
            source: source.to_string(),
            time: init_time,
            variable: Vec::new(),
            kind: RequestKind::Model {
                forecast_hour,
                level: None,
            },
            extent: Extent::default(),
            wildcard: None,
        }
    }

    /// Model request addressed by valid time instead of forecast hour.
    ///
    /// Returns `None` when `valid_time` precedes `init_time`.
    pub fn model_valid_at(
        source: &str,
        init_time: DateTime<FixedOffset>,
        valid_time: DateTime<FixedOffset>,
    ) -> Option<Self> {
        let hours = (valid_time - init_time).num_hours();
        let hours = u32::try_from(hours).ok()?;
        Some(Self::model(source, init_time, hours))
    }

    pub fn observation(source: &str, time: DateTime<FixedOffset>) -> Self {
        Self {
            source: source.to_string(),
            time,
            variable: Vec::new(),
            kind: RequestKind::Observation,
            extent: Extent::default(),
            wildcard: None,
        }
    }

    /// Sets the variable path; `/` separates nested segments (`FY4A/L1/CHINA/C012`).
    pub fn with_variable(mut self, path: &str) -> Self {
        self.variable = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    /// Ignored for observations.
    pub fn with_level(mut self, level: f64) -> Self {
        if let RequestKind::Model { level: l, .. } = &mut self.kind {
            *l = Some(level);
        }
        self
    }

    pub fn with_lat(mut self, span: impl Into<Span>) -> Self {
        self.extent.lat = Some(span.into());
        self
    }

    pub fn with_lon(mut self, span: impl Into<Span>) -> Self {
        self.extent.lon = Some(span.into());
        self
    }

    pub fn with_wildcard(mut self, wildcard: &str) -> Self {
        self.wildcard = Some(wildcard.to_string());
        self
    }

    pub fn forecast_hour(&self) -> Option<u32> {
        match self.kind {
            RequestKind::Model { forecast_hour, .. } => Some(forecast_hour),
            RequestKind::Observation => None,
        }
    }

    pub fn level(&self) -> Option<f64> {
        match self.kind {
            RequestKind::Model { level, .. } => level,
            RequestKind::Observation => None,
        }
    }

    /// Parent directory on the server: `source/variable.../level`.
    pub fn directory(&self) -> String {
        let mut parts = Vec::with_capacity(self.variable.len() + 2);
        parts.push(self.source.clone());
        parts.extend(self.variable.iter().cloned());
        if let Some(level) = self.level() {
            parts.push(format_level(level));
        }
        parts.join("/")
    }
}
