mod common;

use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, TimeZone};
use mdfs::wire::Command;
use mdfs::{Client, ClientConfig, DataRequest, Dataset, MdfsError, StationValue};

use common::{FakeGds, grid_file, grid_header, rain_table};

const RH_PATH: &str = "ECMWF_HR/RH/850/23022020.024";
const RAIN_PATH: &str = "SURFACE/RAIN24_ALL_STATION/20230220200000.000";

fn bjt(y: i32, m: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(8 * 3600)
        .unwrap()
        .with_ymd_and_hms(y, m, d, h, 0, 0)
        .unwrap()
}

fn rh_request() -> DataRequest {
    DataRequest::model("ECMWF_HR", bjt(2023, 2, 20, 20), 24)
        .with_variable("RH")
        .with_level(850.0)
        .with_lat(20.0..=40.0)
        .with_lon(110.0..=130.0)
}

fn rain_request() -> DataRequest {
    DataRequest::observation("SURFACE", bjt(2023, 2, 20, 20))
        .with_variable("RAIN24_ALL_STATION")
        .with_lat(20.0..=40.0)
        .with_lon(110.0..=130.0)
}

fn server() -> FakeGds {
    let rh = grid_file(&grid_header((60.0, 0.25, 361), (60.0, -0.25, 241)));
    let rain = rain_table(&[
        (54511, 39.8, 116.47, 0.5),
        (58367, 31.4, 121.45, 12.0),
        (59287, 20.0, 113.3, 3.0),
        (56778, 25.0, 130.0, 0.0),
        (50953, 45.75, 126.77, 1.0),
        (59981, 16.8, 112.3, 7.0),
        (47108, 37.5, 131.0, 2.0),
    ])
    .to_bytes()
    .to_vec();

    FakeGds::start(vec![
        ("ECMWF_HR/RH/850/23022008.024", vec![0; 8]),
        (RH_PATH, rh),
        ("ECMWF_HR/RH/850/23022020.048", vec![0; 8]),
        ("ECMWF_HR/TMP/850/23022020.024", vec![0; 8]),
        ("SURFACE/RAIN24_ALL_STATION/20230220080000.000", vec![0; 8]),
        (RAIN_PATH, rain),
    ])
}

#[test]
fn test_model_grid_is_resolved_fetched_and_subset() {
    let gds = server();
    let client = Client::with_config(gds.config()).unwrap();

    let grid = client.grid(&rh_request()).unwrap();
    let h = grid.header();
    assert_eq!(h.element.text(), "RH");
    assert_eq!((h.lat_start, h.lat_end, h.lat_count), (40.0, 20.0, 81));
    assert_eq!((h.lon_start, h.lon_end, h.lon_count), (110.0, 130.0, 81));
    // Source row 80 (lat 40), column 200 (lon 110).
    assert_eq!(grid.values.get(0, 0, 0), Some(80_200.0));
    assert_eq!(
        h.valid_time().unwrap(),
        bjt(2023, 2, 21, 20)
    );

    assert_eq!(
        gds.requests(),
        vec![
            Command::ListDirectory {
                path: "ECMWF_HR/RH/850".to_string()
            },
            Command::GetFile {
                path: RH_PATH.to_string(),
                range: None
            },
        ]
    );
}

#[test]
fn test_station_table_keeps_boundary_records() {
    let gds = server();
    let client = Client::with_config(gds.config()).unwrap();

    let table = client.stations(&rain_request()).unwrap();
    let ids: Vec<i32> = table.records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![54511, 58367, 59287, 56778]);
    assert!(table.records.iter().any(|r| r.lat == 20.0));
    assert!(table.records.iter().any(|r| r.lon == 130.0));
    assert_eq!(table.value(1, "1017"), Some(&StationValue::Real(12.0)));
    assert_eq!(table.header.station_count, 4);
}

#[test]
fn test_missing_time_is_data_not_found_without_fetch() {
    let gds = server();
    let client = Client::with_config(gds.config()).unwrap();

    let request = DataRequest::model("ECMWF_HR", bjt(2023, 2, 21, 8), 24)
        .with_variable("RH")
        .with_level(850.0);
    let err = client.grid(&request).unwrap_err();
    assert!(matches!(err, MdfsError::DataNotFound(_)), "{err}");
    assert!(!err.is_retryable());
    assert!(
        gds.requests()
            .iter()
            .all(|c| !matches!(c, Command::GetFile { .. }))
    );
}

#[test]
fn test_missing_directory_is_data_not_found() {
    let gds = server();
    let client = Client::with_config(gds.config()).unwrap();
    let request = DataRequest::model("GRAPES_GFS", bjt(2023, 2, 20, 20), 24)
        .with_variable("RH")
        .with_level(850.0);
    assert!(matches!(
        client.retrieve(&request),
        Err(MdfsError::DataNotFound(_))
    ));
}

#[test]
fn test_slow_server_times_out_as_unavailable() {
    let gds = FakeGds::start_with_delay(vec![(RH_PATH, vec![0; 8])], Duration::from_secs(5));
    let config = ClientConfig {
        timeout: Duration::from_millis(500),
        ..gds.config()
    };
    let client = Client::with_config(config).unwrap();

    let started = Instant::now();
    let err = client.list("ECMWF_HR/RH/850").unwrap_err();
    assert!(matches!(err, MdfsError::TransportUnavailable { .. }), "{err}");
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn test_unreachable_host_is_bounded_by_connect_timeout() {
    // Non-routable: the SYN is never answered.
    let config = ClientConfig {
        address: "10.255.255.1:8080".to_string(),
        timeout: Duration::from_secs(60),
        connect_timeout: Duration::from_millis(300),
        connect_retries: 0,
        ..ClientConfig::default()
    };
    let client = Client::with_config(config).unwrap();

    let started = Instant::now();
    let err = client.list("ECMWF_HR/RH/850").unwrap_err();
    assert!(matches!(err, MdfsError::TransportUnavailable { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_retrieve_many_detects_each_format() {
    let gds = server();
    let config = ClientConfig {
        pool_size: 4,
        ..gds.config()
    };
    let client = Client::with_config(config).unwrap();

    let results = client.retrieve_many(&[rh_request(), rain_request()]);
    assert!(matches!(&results[0], Ok(Dataset::Grid(g)) if g.values.lat == 81));
    assert!(matches!(&results[1], Ok(Dataset::Stations(s)) if s.len() == 4));
}

#[test]
fn test_catalog_browsing() {
    let gds = server();
    let client = Client::with_config(gds.config()).unwrap();

    assert_eq!(client.list_vars("ECMWF_HR").unwrap(), vec!["RH", "TMP"]);
    assert_eq!(
        client.latest_name("ECMWF_HR/RH/850", "*.024").unwrap(),
        "23022020.024"
    );
    let files: Vec<String> = client
        .walk("ECMWF_HR")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(files.len(), 4);
    assert!(files.contains(&"ECMWF_HR/TMP/850/23022020.024".to_string()));
}

#[test]
fn test_sync_directory_refuses_escaping_names() {
    let gds = FakeGds::start(vec![
        ("SURFACE/RAIN24_ALL_STATION/20230220200000.000", vec![1; 8]),
        ("SURFACE/../../escaped.000", vec![2; 8]),
    ]);
    let client = Client::with_config(gds.config()).unwrap();
    let parent = tempfile::tempdir().unwrap();
    let root = parent.path().join("a/b");

    let err = client.sync_directory("SURFACE", &root).unwrap_err();
    assert!(matches!(err, MdfsError::MalformedPayload(_)), "{err}");
    assert!(!parent.path().join("escaped.000").exists());
    assert!(
        gds.requests()
            .iter()
            .all(|c| !matches!(c, Command::GetFile { .. }))
    );
}

#[test]
fn test_sync_directory_downloads_tree() {
    let gds = server();
    let client = Client::with_config(gds.config()).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let paths = client.sync_directory("SURFACE", dir.path()).unwrap();
    assert_eq!(paths.len(), 2);
    let local = dir.path().join("RAIN24_ALL_STATION/20230220200000.000");
    let table = mdfs::StationDecoder::default()
        .decode(&mdfs::RawPayload::new(std::fs::read(&local).unwrap(), RAIN_PATH))
        .unwrap();
    assert_eq!(table.len(), 7);

    // A second run finds everything in place and fetches nothing.
    let fetched = |gds: &FakeGds| {
        gds.requests()
            .iter()
            .filter(|c| matches!(c, Command::GetFile { .. }))
            .count()
    };
    let before = fetched(&gds);
    client.sync_directory("SURFACE", dir.path()).unwrap();
    assert_eq!(fetched(&gds), before);
}
