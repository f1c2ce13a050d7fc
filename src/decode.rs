//! Raw payloads and detection of which MDFS layout they hold.

use bytes::Bytes;

use crate::error::{MdfsError, MdfsResult};
use crate::grid::{GridData, GridDecoder};
use crate::station::{StationDecoder, StationTable};

pub const MDFS_DISCRIMINATOR: &[u8; 4] = b"mdfs";

/// Type code of a scalar grid.
pub const GRID_SCALAR: i16 = 4;
/// Type code of a vector (magnitude + direction) grid.
pub const GRID_VECTOR: i16 = 11;

/// File bytes as fetched, together with where they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub bytes: Bytes,
    pub source_path: String,
}

impl RawPayload {
    pub fn new(bytes: impl Into<Bytes>, source_path: &str) -> Self {
        Self {
            bytes: bytes.into(),
            source_path: source_path.to_string(),
        }
    }

    /// Reads the 4-byte discriminator and the type code that follows it.
    pub fn format(&self) -> MdfsResult<Format> {
        let buf = &self.bytes[..];
        if buf.len() < 6 {
            return Err(MdfsError::SizeMismatch {
                expected: 6,
                actual: buf.len(),
            });
        }
        if &buf[..4] != MDFS_DISCRIMINATOR {
            return Err(MdfsError::BadDiscriminator {
                expected: "mdfs".to_string(),
                found: String::from_utf8_lossy(&buf[..4]).into_owned(),
            });
        }
        let kind = i16::from_le_bytes([buf[4], buf[5]]);
        Ok(match kind {
            GRID_SCALAR | GRID_VECTOR => Format::Grid(kind),
            other => Format::Station(other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Grid(i16),
    Station(i16),
}

/// A decoded file of either layout.
#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    Grid(GridData),
    Stations(StationTable),
}

impl Dataset {
    pub fn as_grid(&self) -> Option<&GridData> {
        match self {
            Self::Grid(g) => Some(g),
            Self::Stations(_) => None,
        }
    }

    pub fn as_stations(&self) -> Option<&StationTable> {
        match self {
            Self::Grid(_) => None,
            Self::Stations(s) => Some(s),
        }
    }

    pub fn into_grid(self) -> Option<GridData> {
        match self {
            Self::Grid(g) => Some(g),
            Self::Stations(_) => None,
        }
    }

    pub fn into_stations(self) -> Option<StationTable> {
        match self {
            Self::Grid(_) => None,
            Self::Stations(s) => Some(s),
        }
    }
}

/// Dispatches to the grid or station decoder based on the type code.
pub fn decode_any(
    payload: &RawPayload,
    grids: &GridDecoder,
    stations: &StationDecoder,
) -> MdfsResult<Dataset> {
    match payload.format()? {
        Format::Grid(_) => grids.decode(payload).map(Dataset::Grid),
        Format::Station(_) => stations.decode(payload).map(Dataset::Stations),
    }
}
