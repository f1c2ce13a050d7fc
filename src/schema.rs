//! Declarative fixed-size header layouts.
//!
//! A header is described once as an ordered list of named fields; the same
//! description drives reading, writing and dumping, so the grid and station
//! decoders share byte order and width rules.

use bytes::BufMut;
use serde::{Serialize, Serializer};
use std::fmt;

use crate::reader::LeReader;
use crate::util::fixed_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldKind {
    /// Fixed-width, NUL-padded text.
    Text(usize),
    I16,
    I32,
    F32,
}

impl FieldKind {
    pub(crate) const fn width(self) -> usize {
        match self {
            Self::Text(n) => n,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Field {
    pub(crate) name: &'static str,
    pub(crate) kind: FieldKind,
}

pub(crate) const fn field(name: &'static str, kind: FieldKind) -> Field {
    Field { name, kind }
}

/// An ordered header layout.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Schema(pub(crate) &'static [Field]);

impl Schema {
    pub(crate) const fn size(&self) -> usize {
        let mut total = 0;
        let mut i = 0;
        while i < self.0.len() {
            total += self.0[i].kind.width();
            i += 1;
        }
        total
    }

    /// Reads every field in order; `None` if the input is too short.
    pub(crate) fn read(&self, reader: &mut LeReader<'_>) -> Option<Record> {
        if reader.remaining() < self.size() {
            return None;
        }
        let mut values = Vec::with_capacity(self.0.len());
        for f in self.0 {
            let value = match f.kind {
                FieldKind::Text(n) => FieldValue::Text(reader.take(n)?.to_vec()),
                FieldKind::I16 => FieldValue::I16(reader.i16()?),
                FieldKind::I32 => FieldValue::I32(reader.i32()?),
                FieldKind::F32 => FieldValue::F32(reader.f32()?),
            };
            values.push((f.name, value));
        }
        Some(Record { values })
    }

    /// Writes `record` back in schema order. Text is padded or cut to width.
    pub(crate) fn write(&self, record: &Record, out: &mut impl BufMut) {
        for f in self.0 {
            match (f.kind, record.get(f.name)) {
                (FieldKind::Text(n), Some(FieldValue::Text(raw))) => {
                    let take = raw.len().min(n);
                    out.put_slice(&raw[..take]);
                    out.put_bytes(0, n - take);
                }
                (FieldKind::I16, Some(FieldValue::I16(v))) => out.put_i16_le(*v),
                (FieldKind::I32, Some(FieldValue::I32(v))) => out.put_i32_le(*v),
                (FieldKind::F32, Some(FieldValue::F32(v))) => out.put_f32_le(*v),
                (kind, _) => out.put_bytes(0, kind.width()),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FieldValue {
    Text(Vec<u8>),
    I16(i16),
    I32(i32),
    F32(f32),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(raw) => write!(f, "{:?}", fixed_text(raw)),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
        }
    }
}

/// Header text kept as the exact bytes that were read.
///
/// Producers write GBK-encoded, NUL-padded strings; the bytes are kept so a
/// header can be written back unchanged, and [`RawText::text`] gives a
/// lossy UTF-8 view. Equality ignores trailing NUL padding.
#[derive(Debug, Clone, Default)]
pub struct RawText(pub Vec<u8>);

impl RawText {
    pub fn text(&self) -> String {
        fixed_text(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn unpadded(&self) -> &[u8] {
        let end = self.0.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        &self.0[..end]
    }
}

impl PartialEq for RawText {
    fn eq(&self, other: &Self) -> bool {
        self.unpadded() == other.unpadded()
    }
}

impl Eq for RawText {}

impl From<&str> for RawText {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for RawText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

impl Serialize for RawText {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text())
    }
}

/// Field values in schema order, addressable by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Record {
    values: Vec<(&'static str, FieldValue)>,
}

impl Record {
    pub(crate) fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    pub(crate) fn push(&mut self, name: &'static str, value: FieldValue) {
        self.values.push((name, value));
    }

    pub(crate) fn text(&self, name: &str) -> RawText {
        match self.get(name) {
            Some(FieldValue::Text(raw)) => RawText(raw.clone()),
            _ => RawText::default(),
        }
    }

    pub(crate) fn i16(&self, name: &str) -> i16 {
        match self.get(name) {
            Some(FieldValue::I16(v)) => *v,
            _ => 0,
        }
    }

    pub(crate) fn i32(&self, name: &str) -> i32 {
        match self.get(name) {
            Some(FieldValue::I32(v)) => *v,
            _ => 0,
        }
    }

    pub(crate) fn f32(&self, name: &str) -> f32 {
        match self.get(name) {
            Some(FieldValue::F32(v)) => *v,
            _ => 0.0,
        }
    }

    /// `(name, rendered value)` pairs, for dumping a header.
    pub(crate) fn entries(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }
}
