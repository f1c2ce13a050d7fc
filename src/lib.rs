//! A Rust client for MICAPS GDS data services and a decoder for the MDFS
//! grid/station binary formats they serve.
//!
//! The flow for one request is: resolve the request to a remote file through
//! the server's catalog, fetch its bytes, decode them into a [`GridData`] or
//! [`StationTable`], then cut out the requested latitude/longitude window.
//!
//! ## Quick start
//! - Point the client at a server with `GDS_ADDRESS=host:port` or a `.gdsrc`
//!   file (current directory or home directory) containing `address: host:port`.
//! - Build a [`DataRequest`] and call [`Client::grid`], [`Client::stations`]
//!   or [`Client::retrieve`].
//!
//! ```no_run
//! use anyhow::Result;
//! use chrono::{FixedOffset, TimeZone};
//! use mdfs::{Client, DataRequest};
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?;
//!     let bjt = FixedOffset::east_opt(8 * 3600).unwrap();
//!     let request = DataRequest::model("ECMWF_HR", bjt.with_ymd_and_hms(2023, 2, 20, 20, 0, 0).unwrap(), 24)
//!         .with_variable("RH")
//!         .with_level(850.0)
//!         .with_lat(20.0..=40.0)
//!         .with_lon(110.0..=130.0);
//!     let grid = client.grid(&request)?;
//!     println!("{} x {} points", grid.values.lat, grid.values.lon);
//!     Ok(())
//! }
//! ```
//!
//! The decoders need no network and can be used on their own:
//!
//! ```no_run
//! # fn main() -> mdfs::MdfsResult<()> {
//! use mdfs::{GridDecoder, RawPayload};
//!
//! let bytes = std::fs::read("23022020.024")?;
//! let grid = GridDecoder::default().decode(&RawPayload::new(bytes, "23022020.024"))?;
//! println!("{:?}", grid.header().valid_time());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod catalog;
mod client;
mod config;
mod decode;
mod elements;
mod error;
mod grid;
mod pattern;
mod reader;
mod request;
mod schema;
mod station;
mod subset;
mod transport;
mod util;
pub mod wire;

pub use catalog::{CatalogEntry, MatchPolicy, RemotePath};
pub use client::{Client, ClientConfig};
pub use decode::{Dataset, Format, GRID_SCALAR, GRID_VECTOR, RawPayload, decode_any};
pub use elements::{ELEVATION_ELEMENT, ElementNames};
pub use error::{MdfsError, MdfsResult};
pub use grid::{
    Axis, GRID_HEADER_SIZE, GRID_MISSING_VALUE, GridData, GridDecoder, GridHeader, GridValues,
};
pub use pattern::{FilenamePattern, RenderedName};
pub use request::{DataRequest, Extent, RequestKind, Span};
pub use schema::RawText;
pub use station::{
    ElementDef, STATION_HEADER_SIZE, STATION_MISSING_VALUE, StationDecoder, StationHeader,
    StationRecord, StationTable, StationValue, ValueType,
};
pub use subset::axis_indices;
pub use transport::{Channel, HttpTransport, Transport};
