//! MDFS station files.
//!
//! Layout: a 288-byte header, `i32` station count, `i16` element count and
//! that many `(i16 id, i16 type)` declarations, then one variable-length
//! record per station: `i32 id, f32 lon, f32 lat, i16 n` followed by `n`
//! `(i16 element id, value)` pairs whose width depends on the declared type.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tracing::debug;

use crate::decode::{GRID_SCALAR, GRID_VECTOR, MDFS_DISCRIMINATOR, RawPayload};
use crate::elements::{ELEVATION_ELEMENT, ElementNames};
use crate::error::{MdfsError, MdfsResult};
use crate::grid::header_time;
use crate::reader::LeReader;
use crate::request::Span;
use crate::schema::{FieldKind, FieldValue, RawText, Record, Schema, field};

/// Default missing-value sentinel of station files.
pub const STATION_MISSING_VALUE: f64 = 999999.0;

pub(crate) const STATION_HEADER: Schema = Schema(&[
    field("discriminator", FieldKind::Text(4)),
    field("type", FieldKind::I16),
    field("description", FieldKind::Text(100)),
    field("level", FieldKind::F32),
    field("level_description", FieldKind::Text(50)),
    field("year", FieldKind::I32),
    field("month", FieldKind::I32),
    field("day", FieldKind::I32),
    field("hour", FieldKind::I32),
    field("minute", FieldKind::I32),
    field("second", FieldKind::I32),
    field("timezone", FieldKind::I32),
    field("extent", FieldKind::Text(100)),
]);

pub const STATION_HEADER_SIZE: usize = STATION_HEADER.size();

/// Storage type of one station element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueType {
    I8,
    I16,
    I32,
    /// Type 4; stored as four bytes like [`ValueType::I32`].
    Long,
    F32,
    F64,
    /// `i16` length followed by that many bytes.
    Text,
}

impl ValueType {
    pub fn from_code(code: i16) -> Option<Self> {
        Some(match code {
            1 => Self::I8,
            2 => Self::I16,
            3 => Self::I32,
            4 => Self::Long,
            5 => Self::F32,
            6 => Self::F64,
            7 => Self::Text,
            _ => return None,
        })
    }

    pub fn code(self) -> i16 {
        match self {
            Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 => 3,
            Self::Long => 4,
            Self::F32 => 5,
            Self::F64 => 6,
            Self::Text => 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementDef {
    pub id: i16,
    pub value_type: ValueType,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StationValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl StationValue {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Integer(v) => Some(v as f64),
            Self::Real(v) => Some(v),
            Self::Text(_) => None,
        }
    }

    fn is_sentinel(&self, missing: f64) -> bool {
        self.as_f64() == Some(missing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationHeader {
    pub discriminator: RawText,
    pub kind: i16,
    pub description: RawText,
    pub level: f32,
    pub level_description: RawText,
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub hour: i32,
    pub minute: i32,
    pub second: i32,
    pub timezone: i32,
    pub extent: RawText,
    /// Record count declared by the file.
    pub station_count: i32,
    /// Declared elements, in file order.
    pub elements: Vec<ElementDef>,
}

impl StationHeader {
    fn from_record(r: &Record, station_count: i32, elements: Vec<ElementDef>) -> Self {
        Self {
            discriminator: r.text("discriminator"),
            kind: r.i16("type"),
            description: r.text("description"),
            level: r.f32("level"),
            level_description: r.text("level_description"),
            year: r.i32("year"),
            month: r.i32("month"),
            day: r.i32("day"),
            hour: r.i32("hour"),
            minute: r.i32("minute"),
            second: r.i32("second"),
            timezone: r.i32("timezone"),
            extent: r.text("extent"),
            station_count,
            elements,
        }
    }

    fn to_record(&self) -> Record {
        use FieldValue::*;

        let mut r = Record::default();
        r.push("discriminator", Text(self.discriminator.0.clone()));
        r.push("type", I16(self.kind));
        r.push("description", Text(self.description.0.clone()));
        r.push("level", F32(self.level));
        r.push("level_description", Text(self.level_description.0.clone()));
        r.push("year", I32(self.year));
        r.push("month", I32(self.month));
        r.push("day", I32(self.day));
        r.push("hour", I32(self.hour));
        r.push("minute", I32(self.minute));
        r.push("second", I32(self.second));
        r.push("timezone", I32(self.timezone));
        r.push("extent", Text(self.extent.0.clone()));
        r
    }

    /// Header fields by name, in file order, followed by the element count.
    pub fn dump(&self) -> Vec<(String, String)> {
        let mut out = self.to_record().entries();
        out.push(("station_count".to_string(), self.station_count.to_string()));
        out.push(("element_count".to_string(), self.elements.len().to_string()));
        out
    }

    pub fn reference_time(&self) -> Option<DateTime<FixedOffset>> {
        header_time(
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.timezone,
        )
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.elements.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn element_index(&self, name: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationRecord {
    pub id: i32,
    pub lon: f64,
    pub lat: f64,
    pub elevation: Option<f64>,
    /// One slot per declared element; `None` when absent or missing.
    pub values: Vec<Option<StationValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationTable {
    pub header: StationHeader,
    /// Wire order; duplicate ids are kept.
    pub records: Vec<StationRecord>,
}

impl StationTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Value of element `name` for the record at `index`.
    pub fn value(&self, index: usize, name: &str) -> Option<&StationValue> {
        let column = self.header.element_index(name)?;
        self.records.get(index)?.values.get(column)?.as_ref()
    }

    /// All values of one element, in record order.
    pub fn column(&self, name: &str) -> Option<Vec<Option<&StationValue>>> {
        let column = self.header.element_index(name)?;
        Some(
            self.records
                .iter()
                .map(|r| r.values.get(column).and_then(Option::as_ref))
                .collect(),
        )
    }

    /// Keeps records whose element `name` falls in `span`, in order.
    ///
    /// Records with the value missing, or holding text, are dropped.
    /// `F32` elements are compared at their stored precision. Returns `None`
    /// when the table has no such element.
    pub fn filter(&self, name: &str, span: &Span) -> Option<StationTable> {
        let column = self.header.element_index(name)?;
        let stored_f32 = self.header.elements[column].value_type == ValueType::F32;
        let records: Vec<_> = self
            .records
            .iter()
            .filter(|r| {
                let value = r.values.get(column).and_then(Option::as_ref);
                match value.and_then(StationValue::as_f64) {
                    Some(v) if stored_f32 => span.contains_f32(v),
                    Some(v) => span.contains(v),
                    None => false,
                }
            })
            .cloned()
            .collect();
        let mut header = self.header.clone();
        header.station_count = records.len() as i32;
        Some(StationTable { header, records })
    }

    /// Encodes the table in the file layout. Missing values are left out of
    /// their record.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(STATION_HEADER_SIZE + 6);
        STATION_HEADER.write(&self.header.to_record(), &mut out);
        out.put_i32_le(self.records.len() as i32);
        out.put_i16_le(self.header.elements.len() as i16);
        for e in &self.header.elements {
            out.put_i16_le(e.id);
            out.put_i16_le(e.value_type.code());
        }
        for r in &self.records {
            out.put_i32_le(r.id);
            out.put_f32_le(r.lon as f32);
            out.put_f32_le(r.lat as f32);
            let present: Vec<_> = self
                .header
                .elements
                .iter()
                .zip(&r.values)
                .filter_map(|(e, v)| v.as_ref().map(|v| (e, v)))
                .collect();
            out.put_i16_le(present.len() as i16);
            for (e, v) in present {
                out.put_i16_le(e.id);
                put_value(&mut out, e.value_type, v);
            }
        }
        out.freeze()
    }
}

fn put_value(out: &mut BytesMut, ty: ValueType, v: &StationValue) {
    let int = match v {
        StationValue::Integer(i) => *i,
        StationValue::Real(f) => *f as i64,
        StationValue::Text(_) => 0,
    };
    let real = v.as_f64().unwrap_or(0.0);
    match ty {
        ValueType::I8 => out.put_i8(int as i8),
        ValueType::I16 => out.put_i16_le(int as i16),
        ValueType::I32 | ValueType::Long => out.put_i32_le(int as i32),
        ValueType::F32 => out.put_f32_le(real as f32),
        ValueType::F64 => out.put_f64_le(real),
        ValueType::Text => {
            let text = match v {
                StationValue::Text(s) => s.as_bytes(),
                _ => &[],
            };
            out.put_i16_le(text.len() as i16);
            out.put_slice(text);
        }
    }
}

#[derive(Debug, Clone)]
pub struct StationDecoder {
    missing_value: f64,
    names: ElementNames,
}

impl Default for StationDecoder {
    fn default() -> Self {
        Self::new(STATION_MISSING_VALUE, ElementNames::default())
    }
}

impl StationDecoder {
    pub fn new(missing_value: f64, names: ElementNames) -> Self {
        Self {
            missing_value,
            names,
        }
    }

    pub fn names(&self) -> &ElementNames {
        &self.names
    }

    pub fn decode(&self, payload: &RawPayload) -> MdfsResult<StationTable> {
        let buf = &payload.bytes[..];
        let mut r = LeReader::new(buf);
        let short = |needed: usize| MdfsError::SizeMismatch {
            expected: needed,
            actual: buf.len(),
        };

        if buf.len() >= 4 && &buf[..4] != MDFS_DISCRIMINATOR {
            return Err(MdfsError::BadDiscriminator {
                expected: "mdfs".to_string(),
                found: String::from_utf8_lossy(&buf[..4]).into_owned(),
            });
        }
        let record = STATION_HEADER
            .read(&mut r)
            .ok_or_else(|| short(STATION_HEADER_SIZE + 6))?;
        let kind = record.i16("type");
        if kind == GRID_SCALAR || kind == GRID_VECTOR {
            return Err(MdfsError::BadDiscriminator {
                expected: "station type".to_string(),
                found: format!("grid type {kind}"),
            });
        }

        let station_count = r.i32().ok_or_else(|| short(STATION_HEADER_SIZE + 6))?;
        let element_count = r.i16().ok_or_else(|| short(STATION_HEADER_SIZE + 6))?;
        let (Ok(stations), Ok(elements)) =
            (usize::try_from(station_count), usize::try_from(element_count))
        else {
            return Err(MdfsError::MalformedPayload(format!(
                "negative counts: {station_count} stations, {element_count} elements"
            )));
        };

        let mut defs = Vec::with_capacity(elements);
        for _ in 0..elements {
            let (id, code) = r
                .i16()
                .zip(r.i16())
                .ok_or_else(|| short(STATION_HEADER_SIZE + 6 + elements * 4))?;
            let value_type = ValueType::from_code(code).ok_or_else(|| {
                MdfsError::MalformedPayload(format!("element {id} has unknown type {code}"))
            })?;
            defs.push(ElementDef {
                id,
                value_type,
                name: self.names.name(id),
            });
        }

        // Every record is at least 14 bytes, which bounds the preallocation.
        let mut records = Vec::with_capacity(stations.min(r.remaining() / 14));
        for _ in 0..stations {
            records.push(self.read_record(&mut r, &defs, &short)?);
        }
        if r.remaining() != 0 {
            return Err(MdfsError::SizeMismatch {
                expected: r.position(),
                actual: buf.len(),
            });
        }

        debug!(
            path = %payload.source_path,
            stations,
            elements,
            "decoded station table"
        );
        Ok(StationTable {
            header: StationHeader::from_record(&record, station_count, defs),
            records,
        })
    }

    fn read_record(
        &self,
        r: &mut LeReader<'_>,
        defs: &[ElementDef],
        short: &impl Fn(usize) -> MdfsError,
    ) -> MdfsResult<StationRecord> {
        let head = r.position() + 14;
        let id = r.i32().ok_or_else(|| short(head))?;
        let lon = r.f32().ok_or_else(|| short(head))?;
        let lat = r.f32().ok_or_else(|| short(head))?;
        let count = r.i16().ok_or_else(|| short(head))?;

        let mut values = vec![None; defs.len()];
        let mut elevation = None;
        for _ in 0..count.max(0) {
            let element = r.i16().ok_or_else(|| short(r.position() + 2))?;
            let slot = defs.iter().position(|d| d.id == element).ok_or_else(|| {
                MdfsError::MalformedPayload(format!(
                    "station {id} carries undeclared element {element}"
                ))
            })?;
            let value = read_value(r, defs[slot].value_type).ok_or_else(|| short(r.position() + 1))?;
            if value.is_sentinel(self.missing_value) {
                continue;
            }
            if element == ELEVATION_ELEMENT {
                elevation = value.as_f64();
            }
            values[slot] = Some(value);
        }

        Ok(StationRecord {
            id,
            lon: f64::from(lon),
            lat: f64::from(lat),
            elevation,
            values,
        })
    }
}

fn read_value(r: &mut LeReader<'_>, ty: ValueType) -> Option<StationValue> {
    Some(match ty {
        ValueType::I8 => StationValue::Integer(r.i8()?.into()),
        ValueType::I16 => StationValue::Integer(r.i16()?.into()),
        ValueType::I32 | ValueType::Long => StationValue::Integer(r.i32()?.into()),
        ValueType::F32 => StationValue::Real(r.f32()?.into()),
        ValueType::F64 => StationValue::Real(r.f64()?),
        ValueType::Text => {
            let len = usize::try_from(r.i16()?).ok()?;
            StationValue::Text(crate::util::fixed_text(r.take(len)?))
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn header(elements: Vec<ElementDef>) -> StationHeader {
        StationHeader {
            discriminator: RawText::from("mdfs"),
            kind: 1,
            description: RawText::from("24h rainfall"),
            level: 0.0,
            level_description: RawText::from("surface"),
            year: 2023,
            month: 2,
            day: 20,
            hour: 20,
            minute: 0,
            second: 0,
            timezone: 8,
            extent: RawText::default(),
            station_count: 0,
            elements,
        }
    }

    fn def(id: i16, value_type: ValueType) -> ElementDef {
        ElementDef {
            id,
            value_type,
            name: id.to_string(),
        }
    }

    pub(crate) fn station(id: i32, lat: f64, lon: f64, rain: Option<f64>) -> StationRecord {
        StationRecord {
            id,
            lon,
            lat,
            elevation: None,
            values: vec![rain.map(StationValue::Real)],
        }
    }

    /// A one-element (id 1017, f32) table of the given stations.
    pub(crate) fn table(records: Vec<StationRecord>) -> StationTable {
        let mut header = header(vec![def(1017, ValueType::F32)]);
        header.station_count = records.len() as i32;
        StationTable { header, records }
    }

    #[test]
    fn test_filter_by_element_value() {
        let t = table(vec![
            station(54511, 39.8, 116.47, Some(0.1)),
            station(58367, 31.4, 121.45, Some(12.0)),
            station(59287, 23.2, 113.3, None),
            station(56778, 25.0, 102.68, Some(50.0)),
        ]);
        let bytes = t.to_bytes().to_vec();
        let decoded = StationDecoder::default()
            .decode(&RawPayload::new(bytes, "SURFACE/RAIN24_ALL_STATION/20230220200000.000"))
            .unwrap();

        let wet = decoded.filter("1017", &Span::Range(0.1, 25.0)).unwrap();
        let ids: Vec<i32> = wet.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![54511, 58367]);
        assert_eq!(wet.header.station_count, 2);

        let exact = decoded.filter("1017", &Span::Point(50.0)).unwrap();
        assert_eq!(exact.len(), 1);
        assert!(decoded.filter("9999", &Span::Point(0.0)).is_none());
    }

    #[test]
    fn test_header_is_288_bytes() {
        assert_eq!(STATION_HEADER_SIZE, 288);
    }

    #[test]
    fn test_decode_mixed_types() {
        let mut header = header(vec![
            def(ELEVATION_ELEMENT, ValueType::F32),
            def(1, ValueType::I16),
            def(601, ValueType::F64),
            def(9, ValueType::Text),
        ]);
        header.station_count = 2;
        let table = StationTable {
            header,
            records: vec![
                StationRecord {
                    id: 54511,
                    lon: 116.5,
                    lat: 39.75,
                    elevation: Some(31.5),
                    values: vec![
                        Some(StationValue::Real(31.5)),
                        Some(StationValue::Integer(11)),
                        Some(StationValue::Real(-3.25)),
                        Some(StationValue::Text("北京".to_string())),
                    ],
                },
                StationRecord {
                    id: 58367,
                    lon: 121.5,
                    lat: 31.25,
                    elevation: None,
                    values: vec![None, Some(StationValue::Integer(12)), None, None],
                },
            ],
        };

        let decoded = StationDecoder::default()
            .decode(&RawPayload::new(table.to_bytes(), "x"))
            .unwrap();
        assert_eq!(decoded, table);
        assert_eq!(decoded.value(0, "9"), Some(&StationValue::Text("北京".to_string())));
        assert_eq!(decoded.column("1").unwrap().len(), 2);
        assert_eq!(
            decoded.header.reference_time().unwrap().to_rfc3339(),
            "2023-02-20T20:00:00+08:00"
        );
    }

    #[test]
    fn test_sentinel_becomes_none() {
        let t = table(vec![station(1, 30.0, 120.0, Some(999999.0))]);
        let decoded = StationDecoder::default()
            .decode(&RawPayload::new(t.to_bytes(), "x"))
            .unwrap();
        assert_eq!(decoded.records[0].values, vec![None]);
    }

    #[test]
    fn test_duplicate_ids_are_kept_in_order() {
        let t = table(vec![
            station(7, 30.0, 120.0, Some(1.0)),
            station(3, 31.0, 121.0, Some(2.0)),
            station(7, 32.0, 122.0, Some(3.0)),
        ]);
        let decoded = StationDecoder::default()
            .decode(&RawPayload::new(t.to_bytes(), "x"))
            .unwrap();
        let ids: Vec<i32> = decoded.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![7, 3, 7]);
    }

    #[test]
    fn test_element_names_are_applied() {
        let names: ElementNames = [(1017, "rain24".to_string())].into_iter().collect();
        let t = table(vec![station(1, 30.0, 120.0, Some(5.5))]);
        let decoded = StationDecoder::new(STATION_MISSING_VALUE, names)
            .decode(&RawPayload::new(t.to_bytes(), "x"))
            .unwrap();
        assert_eq!(decoded.header.variable_names(), vec!["rain24"]);
        assert_eq!(decoded.value(0, "rain24"), Some(&StationValue::Real(5.5)));
    }

    #[test]
    fn test_truncated_and_padded_payloads() {
        let bytes = table(vec![station(1, 30.0, 120.0, Some(5.5))]).to_bytes();

        let short = RawPayload::new(bytes.slice(..bytes.len() - 1), "x");
        assert!(matches!(
            StationDecoder::default().decode(&short),
            Err(MdfsError::SizeMismatch { .. })
        ));

        let mut long = bytes.to_vec();
        long.push(0);
        assert!(matches!(
            StationDecoder::default().decode(&RawPayload::new(long, "x")),
            Err(MdfsError::SizeMismatch { expected, actual }) if actual == expected + 1
        ));
    }

    #[test]
    fn test_undeclared_element_is_malformed() {
        let mut bytes = table(vec![station(1, 30.0, 120.0, Some(5.5))])
            .to_bytes()
            .to_vec();
        // The element id of the only value follows the 14-byte record head.
        let at = STATION_HEADER_SIZE + 6 + 4 + 14;
        bytes[at..at + 2].copy_from_slice(&77i16.to_le_bytes());
        assert!(matches!(
            StationDecoder::default().decode(&RawPayload::new(bytes, "x")),
            Err(MdfsError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_grid_payload_is_rejected() {
        let mut t = table(vec![]);
        t.header.kind = GRID_SCALAR;
        assert!(matches!(
            StationDecoder::default().decode(&RawPayload::new(t.to_bytes(), "x")),
            Err(MdfsError::BadDiscriminator { .. })
        ));
    }
}
