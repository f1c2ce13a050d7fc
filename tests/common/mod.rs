//! A loopback GDS server speaking the frame protocol over HTTP.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use mdfs::wire::{self, Command, Frame, Reply};
use mdfs::{
    CatalogEntry, ClientConfig, ElementDef, GRID_SCALAR, GridHeader, RawText, StationHeader,
    StationRecord, StationTable, StationValue, ValueType,
};

pub struct FakeGds {
    pub address: String,
    requests: Arc<Mutex<Vec<Command>>>,
}

impl FakeGds {
    /// Serves `files` (full remote path → bytes) as a directory tree.
    pub fn start(files: Vec<(&str, Vec<u8>)>) -> Self {
        Self::start_with_delay(files, Duration::ZERO)
    }

    /// Like [`FakeGds::start`], but every reply is held back by `delay`.
    pub fn start_with_delay(files: Vec<(&str, Vec<u8>)>, delay: Duration) -> Self {
        let files: BTreeMap<String, Vec<u8>> = files
            .into_iter()
            .map(|(p, b)| (p.to_string(), b))
            .collect();
        let files = Arc::new(files);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let log = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let files = Arc::clone(&files);
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    let _ = serve(stream, &files, &log, delay);
                });
            }
        });

        Self { address, requests }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            address: self.address.clone(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        }
    }

    pub fn requests(&self) -> Vec<Command> {
        self.requests.lock().unwrap().clone()
    }
}

fn serve(
    mut stream: TcpStream,
    files: &BTreeMap<String, Vec<u8>>,
    log: &Mutex<Vec<Command>>,
    delay: Duration,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let header_end = loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let length: usize = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let request = wire::decode_command(&buf[header_end..header_end + length]).unwrap();
    log.lock().unwrap().push(request.body.clone());
    let reply = answer(&request.body, files);
    let body = wire::encode_reply(&Frame::new(request.request_id, reply)).unwrap();

    thread::sleep(delay);
    write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )?;
    stream.write_all(&body)?;
    stream.flush()
}

fn not_found() -> Reply {
    Reply::Failure {
        code: 1,
        message: "NotFoundException".to_string(),
    }
}

fn answer(command: &Command, files: &BTreeMap<String, Vec<u8>>) -> Reply {
    match command {
        Command::ListDirectory { path } => {
            let entries = children(path, files);
            if entries.is_empty() {
                not_found()
            } else {
                Reply::Listing(entries)
            }
        }
        Command::GetFile { path, range } => match files.get(path) {
            None => not_found(),
            Some(bytes) => {
                let (start, end) = match range {
                    Some(r) => {
                        let start = (r.offset as usize).min(bytes.len());
                        (start, (start + r.length as usize).min(bytes.len()))
                    }
                    None => (0, bytes.len()),
                };
                Reply::Payload(bytes[start..end].to_vec().into())
            }
        },
        Command::LatestName { path, filter } => {
            let suffix = filter.trim_start_matches('*');
            let name = children(path, files)
                .into_iter()
                .filter(|e| !e.is_dir && e.name.ends_with(suffix))
                .map(|e| e.name)
                .max()
                .unwrap_or_default();
            Reply::Name(name)
        }
    }
}

fn children(directory: &str, files: &BTreeMap<String, Vec<u8>>) -> Vec<CatalogEntry> {
    let prefix = format!("{}/", directory.trim_end_matches('/'));
    let modified = Utc.with_ymd_and_hms(2023, 2, 20, 12, 0, 0).unwrap();
    let mut out: Vec<CatalogEntry> = Vec::new();
    for (path, bytes) in files {
        let Some(rest) = path.strip_prefix(&prefix) else {
            continue;
        };
        match rest.split_once('/') {
            Some((dir, _)) => {
                if !out.iter().any(|e| e.is_dir && e.name == dir) {
                    out.push(CatalogEntry {
                        name: dir.to_string(),
                        is_dir: true,
                        size: 0,
                        modified,
                    });
                }
            }
            None => out.push(CatalogEntry {
                name: rest.to_string(),
                is_dir: false,
                size: bytes.len() as u64,
                modified,
            }),
        }
    }
    out
}

/// A scalar grid header; values of the grid are filled by [`grid_file`].
pub fn grid_header(lon: (f32, f32, i32), lat: (f32, f32, i32)) -> GridHeader {
    GridHeader {
        discriminator: RawText::from("mdfs"),
        kind: GRID_SCALAR,
        model_name: RawText::from("ECMWF_HR"),
        element: RawText::from("RH"),
        description: RawText::from("relative humidity"),
        level: 850.0,
        year: 2023,
        month: 2,
        day: 20,
        hour: 20,
        timezone: 8,
        period: 24,
        lon_start: lon.0,
        lon_end: lon.0 + lon.1 * (lon.2 - 1) as f32,
        lon_step: lon.1,
        lon_count: lon.2,
        lat_start: lat.0,
        lat_end: lat.0 + lat.1 * (lat.2 - 1) as f32,
        lat_step: lat.1,
        lat_count: lat.2,
        isoline_start: 0.0,
        isoline_end: 100.0,
        isoline_step: 5.0,
        extent: RawText::default(),
    }
}

/// Header plus values `row * 1000 + column`.
pub fn grid_file(h: &GridHeader) -> Vec<u8> {
    let mut out = h.to_bytes().to_vec();
    for i in 0..h.lat_count {
        for j in 0..h.lon_count {
            out.extend_from_slice(&((i * 1000 + j) as f32).to_le_bytes());
        }
    }
    out
}

/// A 24-hour rainfall table, element 1017 as `f32`.
pub fn rain_table(stations: &[(i32, f64, f64, f64)]) -> StationTable {
    let header = StationHeader {
        discriminator: RawText::from("mdfs"),
        kind: 1,
        description: RawText::from("24 hour rainfall"),
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
        station_count: stations.len() as i32,
        elements: vec![ElementDef {
            id: 1017,
            value_type: ValueType::F32,
            name: "1017".to_string(),
        }],
    };
    let records = stations
        .iter()
        .map(|&(id, lat, lon, rain)| StationRecord {
            id,
            lon,
            lat,
            elevation: None,
            values: vec![Some(StationValue::Real(rain))],
        })
        .collect();
    StationTable { header, records }
}
