//! MDFS grid files (type codes 4 and 11).
//!
//! A file holds one or more blocks. Each block is a 278-byte header followed
//! by `lat_count × lon_count` little-endian `f32` values in row-major
//! `[lat][lon]` order; vector grids (type 11) append a second block of
//! directions in degrees. Several blocks back to back (ensemble members)
//! become the layer axis of the decoded grid.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone};
use serde::Serialize;
use tracing::debug;

use crate::decode::{GRID_SCALAR, GRID_VECTOR, MDFS_DISCRIMINATOR, RawPayload};
use crate::error::{MdfsError, MdfsResult};
use crate::reader::LeReader;
use crate::schema::{FieldKind, FieldValue, RawText, Record, Schema, field};

/// Default missing-value sentinel used by MICAPS grid producers.
pub const GRID_MISSING_VALUE: f32 = 9999.0;

pub(crate) const GRID_HEADER: Schema = Schema(&[
    field("discriminator", FieldKind::Text(4)),
    field("type", FieldKind::I16),
    field("model_name", FieldKind::Text(20)),
    field("element", FieldKind::Text(50)),
    field("description", FieldKind::Text(30)),
    field("level", FieldKind::F32),
    field("year", FieldKind::I32),
    field("month", FieldKind::I32),
    field("day", FieldKind::I32),
    field("hour", FieldKind::I32),
    field("timezone", FieldKind::I32),
    field("period", FieldKind::I32),
    field("lon_start", FieldKind::F32),
    field("lon_end", FieldKind::F32),
    field("lon_step", FieldKind::F32),
    field("lon_count", FieldKind::I32),
    field("lat_start", FieldKind::F32),
    field("lat_end", FieldKind::F32),
    field("lat_step", FieldKind::F32),
    field("lat_count", FieldKind::I32),
    field("isoline_start", FieldKind::F32),
    field("isoline_end", FieldKind::F32),
    field("isoline_step", FieldKind::F32),
    field("extent", FieldKind::Text(100)),
]);

pub const GRID_HEADER_SIZE: usize = GRID_HEADER.size();

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridHeader {
    pub discriminator: RawText,
    pub kind: i16,
    pub model_name: RawText,
    pub element: RawText,
    pub description: RawText,
    pub level: f32,
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub hour: i32,
    /// Hours east of UTC the time fields are expressed in.
    pub timezone: i32,
    /// Forecast hour.
    pub period: i32,
    pub lon_start: f32,
    pub lon_end: f32,
    pub lon_step: f32,
    pub lon_count: i32,
    pub lat_start: f32,
    pub lat_end: f32,
    pub lat_step: f32,
    pub lat_count: i32,
    pub isoline_start: f32,
    pub isoline_end: f32,
    pub isoline_step: f32,
    pub extent: RawText,
}

impl GridHeader {
    pub(crate) fn from_record(r: &Record) -> Self {
        Self {
            discriminator: r.text("discriminator"),
            kind: r.i16("type"),
            model_name: r.text("model_name"),
            element: r.text("element"),
            description: r.text("description"),
            level: r.f32("level"),
            year: r.i32("year"),
            month: r.i32("month"),
            day: r.i32("day"),
            hour: r.i32("hour"),
            timezone: r.i32("timezone"),
            period: r.i32("period"),
            lon_start: r.f32("lon_start"),
            lon_end: r.f32("lon_end"),
            lon_step: r.f32("lon_step"),
            lon_count: r.i32("lon_count"),
            lat_start: r.f32("lat_start"),
            lat_end: r.f32("lat_end"),
            lat_step: r.f32("lat_step"),
            lat_count: r.i32("lat_count"),
            isoline_start: r.f32("isoline_start"),
            isoline_end: r.f32("isoline_end"),
            isoline_step: r.f32("isoline_step"),
            extent: r.text("extent"),
        }
    }

    pub(crate) fn to_record(&self) -> Record {
        use FieldValue::*;

        let mut r = Record::default();
        r.push("discriminator", Text(self.discriminator.0.clone()));
        r.push("type", I16(self.kind));
        r.push("model_name", Text(self.model_name.0.clone()));
        r.push("element", Text(self.element.0.clone()));
        r.push("description", Text(self.description.0.clone()));
        r.push("level", F32(self.level));
        r.push("year", I32(self.year));
        r.push("month", I32(self.month));
        r.push("day", I32(self.day));
        r.push("hour", I32(self.hour));
        r.push("timezone", I32(self.timezone));
        r.push("period", I32(self.period));
        r.push("lon_start", F32(self.lon_start));
        r.push("lon_end", F32(self.lon_end));
        r.push("lon_step", F32(self.lon_step));
        r.push("lon_count", I32(self.lon_count));
        r.push("lat_start", F32(self.lat_start));
        r.push("lat_end", F32(self.lat_end));
        r.push("lat_step", F32(self.lat_step));
        r.push("lat_count", I32(self.lat_count));
        r.push("isoline_start", F32(self.isoline_start));
        r.push("isoline_end", F32(self.isoline_end));
        r.push("isoline_step", F32(self.isoline_step));
        r.push("extent", Text(self.extent.0.clone()));
        r
    }

    /// The 278 header bytes as the producer lays them out.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(GRID_HEADER_SIZE);
        GRID_HEADER.write(&self.to_record(), &mut out);
        out.freeze()
    }

    /// Header fields by name, in file order.
    pub fn dump(&self) -> Vec<(String, String)> {
        self.to_record().entries()
    }

    pub fn is_vector(&self) -> bool {
        self.kind == GRID_VECTOR
    }

    fn components(&self) -> usize {
        if self.is_vector() { 2 } else { 1 }
    }

    fn points(&self) -> MdfsResult<usize> {
        let lon = usize::try_from(self.lon_count).ok();
        let lat = usize::try_from(self.lat_count).ok();
        match (lon, lat) {
            (Some(lon), Some(lat)) => lon.checked_mul(lat).ok_or_else(|| {
                MdfsError::MalformedPayload(format!("grid of {lon}×{lat} points is too large"))
            }),
            _ => Err(MdfsError::MalformedPayload(format!(
                "negative grid dimensions {}×{}",
                self.lon_count, self.lat_count
            ))),
        }
    }

    /// Bytes taken by one block: header plus every component.
    fn block_size(&self) -> MdfsResult<usize> {
        self.points()?
            .checked_mul(4 * self.components())
            .and_then(|n| n.checked_add(GRID_HEADER_SIZE))
            .ok_or_else(|| MdfsError::MalformedPayload("grid block size overflows".to_string()))
    }

    fn same_layout(&self, other: &GridHeader) -> bool {
        self.kind == other.kind
            && self.lon_count == other.lon_count
            && self.lat_count == other.lat_count
            && self.lon_start == other.lon_start
            && self.lat_start == other.lat_start
            && self.lon_step == other.lon_step
            && self.lat_step == other.lat_step
    }

    /// Model initial time, or `None` if the date fields are invalid.
    pub fn reference_time(&self) -> Option<DateTime<FixedOffset>> {
        header_time(self.year, self.month, self.day, self.hour, 0, 0, self.timezone)
    }

    pub fn valid_time(&self) -> Option<DateTime<FixedOffset>> {
        Some(self.reference_time()? + Duration::hours(i64::from(self.period)))
    }

    pub fn lon_axis(&self) -> Axis {
        Axis::from_header(self.lon_start, self.lon_end, self.lon_step, self.lon_count)
    }

    pub fn lat_axis(&self) -> Axis {
        Axis::from_header(self.lat_start, self.lat_end, self.lat_step, self.lat_count)
    }
}

pub(crate) fn header_time(
    year: i32,
    month: i32,
    day: i32,
    hour: i32,
    minute: i32,
    second: i32,
    timezone: i32,
) -> Option<DateTime<FixedOffset>> {
    let date = NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)?;
    let naive = date.and_hms_opt(
        u32::try_from(hour).ok()?,
        u32::try_from(minute).ok()?,
        u32::try_from(second).ok()?,
    )?;
    let offset = FixedOffset::east_opt(timezone.checked_mul(3600)?)?;
    offset.from_local_datetime(&naive).single()
}

/// A regularly spaced coordinate axis: `start + index * step`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Axis {
    pub start: f64,
    /// Negative for descending axes.
    pub step: f64,
    pub count: usize,
}

impl Axis {
    /// Builds an axis from header fields.
    ///
    /// The direction follows `start → end`; the header step gives the
    /// spacing. Descending axes keep a negative step and are never flipped.
    pub(crate) fn from_header(start: f32, end: f32, step: f32, count: i32) -> Self {
        let count = usize::try_from(count).unwrap_or(0);
        let (start, end, step) = (f64::from(start), f64::from(end), f64::from(step));
        let step = if count > 1 && step == 0.0 {
            (end - start) / (count - 1) as f64
        } else if (end - start) * step < 0.0 {
            -step
        } else {
            step
        };
        Self { start, step, count }
    }

    pub fn value(&self, index: usize) -> f64 {
        self.start + index as f64 * self.step
    }

    pub fn values(&self) -> Vec<f64> {
        (0..self.count).map(|i| self.value(i)).collect()
    }

    pub fn end(&self) -> f64 {
        self.value(self.count.saturating_sub(1))
    }
}

/// Values of a grid indexed `[layer][lat][lon]`. Missing points are NaN.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridValues {
    pub layers: usize,
    pub lat: usize,
    pub lon: usize,
    pub data: Vec<f32>,
}

impl GridValues {
    pub fn get(&self, layer: usize, lat: usize, lon: usize) -> Option<f32> {
        if layer >= self.layers || lat >= self.lat || lon >= self.lon {
            return None;
        }
        Some(self.data[(layer * self.lat + lat) * self.lon + lon])
    }

    pub fn is_missing(&self, layer: usize, lat: usize, lon: usize) -> bool {
        self.get(layer, lat, lon).is_some_and(f32::is_nan)
    }

    /// One `[lat][lon]` plane.
    pub fn layer(&self, layer: usize) -> Option<&[f32]> {
        let plane = self.lat * self.lon;
        (layer < self.layers).then(|| &self.data[layer * plane..(layer + 1) * plane])
    }

    pub fn missing_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_nan()).count()
    }
}

/// A decoded grid file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridData {
    /// One header per layer; never empty.
    pub headers: Vec<GridHeader>,
    pub values: GridValues,
    /// Direction in degrees for vector grids.
    pub angles: Option<GridValues>,
    /// Sentinel that was translated to NaN while decoding.
    pub missing_value: f32,
}

impl GridData {
    pub fn header(&self) -> &GridHeader {
        &self.headers[0]
    }

    pub fn layer_count(&self) -> usize {
        self.values.layers
    }

    pub fn lon_axis(&self) -> Axis {
        self.header().lon_axis()
    }

    pub fn lat_axis(&self) -> Axis {
        self.header().lat_axis()
    }

    /// Splits a vector grid into eastward/northward components:
    /// `u = m·cos(θ)`, `v = m·sin(θ)`.
    pub fn to_uv(&self) -> Option<(GridValues, GridValues)> {
        let angles = self.angles.as_ref()?;
        let (u, v): (Vec<f32>, Vec<f32>) = self
            .values
            .data
            .iter()
            .zip(&angles.data)
            .map(|(m, a)| {
                let rad = a.to_radians();
                (m * rad.cos(), m * rad.sin())
            })
            .unzip();
        let shaped = |data| GridValues { data, ..self.values.clone() };
        Some((shaped(u), shaped(v)))
    }

    /// Encodes the grid back into the file layout, writing NaN as the sentinel.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        let plane = self.values.lat * self.values.lon;
        for (layer, header) in self.headers.iter().enumerate() {
            out.extend_from_slice(&header.to_bytes());
            let blocks = std::iter::once(&self.values).chain(self.angles.as_ref());
            for values in blocks {
                for v in &values.data[layer * plane..(layer + 1) * plane] {
                    out.put_f32_le(if v.is_nan() { self.missing_value } else { *v });
                }
            }
        }
        out.freeze()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GridDecoder {
    missing_value: f32,
}

impl Default for GridDecoder {
    fn default() -> Self {
        Self::new(GRID_MISSING_VALUE)
    }
}

impl GridDecoder {
    pub fn new(missing_value: f32) -> Self {
        Self { missing_value }
    }

    pub fn decode(&self, payload: &RawPayload) -> MdfsResult<GridData> {
        let buf = &payload.bytes[..];
        let first = read_header(buf)?;
        let block = first.block_size()?;

        let layers = buf.len() / block;
        if layers == 0 || buf.len() % block != 0 {
            return Err(MdfsError::SizeMismatch {
                expected: block * layers.max(1),
                actual: buf.len(),
            });
        }

        let plane = first.points()?;
        let mut headers = Vec::with_capacity(layers);
        let mut values = Vec::with_capacity(plane * layers);
        let mut angles = first.is_vector().then(|| Vec::with_capacity(plane * layers));

        for (i, chunk) in buf.chunks_exact(block).enumerate() {
            let header = if i == 0 { first.clone() } else { read_header(chunk)? };
            if !header.same_layout(&first) {
                return Err(MdfsError::MalformedPayload(format!(
                    "layer {i} of {} does not share the first layer's grid",
                    payload.source_path
                )));
            }
            let mut body = LeReader::new(&chunk[GRID_HEADER_SIZE..]);
            self.read_plane(&mut body, plane, &mut values)?;
            if let Some(angles) = angles.as_mut() {
                self.read_plane(&mut body, plane, angles)?;
            }
            headers.push(header);
        }

        debug!(
            path = %payload.source_path,
            layers,
            lon = first.lon_count,
            lat = first.lat_count,
            vector = first.is_vector(),
            "decoded grid"
        );

        let shape = |data| GridValues {
            layers,
            lat: first.lat_count as usize,
            lon: first.lon_count as usize,
            data,
        };
        Ok(GridData {
            values: shape(values),
            angles: angles.map(shape),
            headers,
            missing_value: self.missing_value,
        })
    }

    fn read_plane(&self, body: &mut LeReader<'_>, points: usize, out: &mut Vec<f32>) -> MdfsResult<()> {
        for _ in 0..points {
            let available = body.remaining();
            let v = body.f32().ok_or(MdfsError::SizeMismatch {
                expected: points * 4,
                actual: available,
            })?;
            out.push(if v == self.missing_value { f32::NAN } else { v });
        }
        Ok(())
    }
}

fn read_header(buf: &[u8]) -> MdfsResult<GridHeader> {
    if buf.len() >= 4 && &buf[..4] != MDFS_DISCRIMINATOR {
        return Err(MdfsError::BadDiscriminator {
            expected: "mdfs".to_string(),
            found: String::from_utf8_lossy(&buf[..4]).into_owned(),
        });
    }
    let record = GRID_HEADER
        .read(&mut LeReader::new(buf))
        .ok_or(MdfsError::SizeMismatch {
            expected: GRID_HEADER_SIZE,
            actual: buf.len(),
        })?;
    let header = GridHeader::from_record(&record);
    if header.kind != GRID_SCALAR && header.kind != GRID_VECTOR {
        return Err(MdfsError::BadDiscriminator {
            expected: format!("grid type {GRID_SCALAR} or {GRID_VECTOR}"),
            found: format!("type {}", header.kind),
        });
    }
    Ok(header)
}
