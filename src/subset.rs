//! Spatial restriction of decoded grids and station tables.

use std::ops::Range;

use crate::grid::{Axis, GridData, GridHeader, GridValues};
use crate::request::{Extent, Span};
use crate::station::StationTable;

/// Tolerance, in grid cells, for bounds that sit on a grid line. It must
/// absorb the `f32` rounding of the header step accumulated over several
/// thousand cells.
const INDEX_EPS: f64 = 1e-3;

/// Index interval of `axis` covered by `span`.
///
/// Ranges never extrapolate: indices are clamped to the axis, and a range
/// that misses the axis entirely selects nothing. A point selects the
/// nearest index.
pub fn axis_indices(axis: &Axis, span: Option<&Span>) -> Range<usize> {
    let Some(span) = span else {
        return 0..axis.count;
    };
    if axis.count == 0 {
        return 0..0;
    }
    let last = (axis.count - 1) as f64;
    let to_index = |v: f64| {
        if axis.step == 0.0 { 0.0 } else { (v - axis.start) / axis.step }
    };

    match *span {
        Span::Point(p) => {
            let i = to_index(p).round().clamp(0.0, last) as usize;
            i..i + 1
        }
        Span::Range(..) => {
            let (lo, hi) = span.bounds();
            let (a, b) = (to_index(lo), to_index(hi));
            let first = (a.min(b) - INDEX_EPS).ceil().max(0.0);
            let end = (a.max(b) + INDEX_EPS).floor().min(last);
            if end < first {
                0..0
            } else {
                first as usize..end as usize + 1
            }
        }
    }
}

impl GridData {
    /// Narrows the grid to `extent`. Axis order and direction are kept.
    pub fn subset(&self, extent: &Extent) -> GridData {
        let lat = axis_indices(&self.lat_axis(), extent.lat.as_ref());
        let lon = axis_indices(&self.lon_axis(), extent.lon.as_ref());
        if lat.len() == self.values.lat && lon.len() == self.values.lon {
            return self.clone();
        }

        let headers = self
            .headers
            .iter()
            .map(|h| narrow_header(h, &lat, &lon))
            .collect();
        GridData {
            headers,
            values: slice_values(&self.values, &lat, &lon),
            angles: self.angles.as_ref().map(|a| slice_values(a, &lat, &lon)),
            missing_value: self.missing_value,
        }
    }
}

impl StationTable {
    /// Keeps records inside the closed `extent`, in their original order.
    pub fn subset(&self, extent: &Extent) -> StationTable {
        let records: Vec<_> = self
            .records
            .iter()
            .filter(|r| extent.contains(r.lat, r.lon))
            .cloned()
            .collect();
        let mut header = self.header.clone();
        header.station_count = records.len() as i32;
        StationTable { header, records }
    }
}

fn narrow_header(h: &GridHeader, lat: &Range<usize>, lon: &Range<usize>) -> GridHeader {
    let mut out = h.clone();
    let (lat_axis, lon_axis) = (h.lat_axis(), h.lon_axis());
    if lat.len() != lat_axis.count {
        out.lat_start = lat_axis.value(lat.start) as f32;
        out.lat_end = lat_axis.value(lat.end.saturating_sub(1).max(lat.start)) as f32;
        out.lat_count = lat.len() as i32;
    }
    if lon.len() != lon_axis.count {
        out.lon_start = lon_axis.value(lon.start) as f32;
        out.lon_end = lon_axis.value(lon.end.saturating_sub(1).max(lon.start)) as f32;
        out.lon_count = lon.len() as i32;
    }
    out
}

fn slice_values(v: &GridValues, lat: &Range<usize>, lon: &Range<usize>) -> GridValues {
    let mut data = Vec::with_capacity(v.layers * lat.len() * lon.len());
    for layer in 0..v.layers {
        for i in lat.clone() {
            let row = (layer * v.lat + i) * v.lon;
            data.extend_from_slice(&v.data[row + lon.start..row + lon.end]);
        }
    }
    GridValues {
        layers: v.layers,
        lat: lat.len(),
        lon: lon.len(),
        data,
    }
}
