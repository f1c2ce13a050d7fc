use anyhow::Result;
use chrono::{FixedOffset, Offset, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogEntry, MatchPolicy, RemotePath, Resolver};
use crate::config::load_config;
use crate::decode::{Dataset, RawPayload, decode_any};
use crate::elements::ElementNames;
use crate::error::{MdfsError, MdfsResult};
use crate::grid::{GRID_MISSING_VALUE, GridData, GridDecoder};
use crate::request::DataRequest;
use crate::station::{STATION_MISSING_VALUE, StationDecoder, StationTable};
use crate::transport::{Channel, HttpTransport, Transport};
use crate::util::{file_name_of, parent_of};
use crate::wire::{ByteRange, Command, Reply};

/// Bytes requested per exchange when downloading to disk.
const DOWNLOAD_CHUNK: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// GDS server as `host:port`.
    pub address: String,
    /// Bound on one whole exchange, connect included.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Idle connections kept per host; 0 opens a connection per exchange.
    pub pool_size: usize,
    /// Extra attempts when the connection cannot be established.
    pub connect_retries: usize,
    /// Time zone the catalog spells file names in.
    pub catalog_offset: FixedOffset,
    pub match_policy: MatchPolicy,
    pub grid_missing_value: f32,
    pub station_missing_value: f64,
    pub element_names: ElementNames,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_size: 0,
            connect_retries: 2,
            catalog_offset: FixedOffset::east_opt(8 * 3600).unwrap_or(Utc.fix()),
            match_policy: MatchPolicy::default(),
            grid_missing_value: GRID_MISSING_VALUE,
            station_missing_value: STATION_MISSING_VALUE,
            element_names: ElementNames::default(),
        }
    }
}

/// Entry point: resolves, fetches, decodes and subsets GDS data.
pub struct Client {
    config: ClientConfig,
    channel: Channel<Box<dyn Transport>>,
    grids: GridDecoder,
    stations: StationDecoder,
    progress: bool,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client using environment variables and/or `.gdsrc`.
    ///
    /// This is equivalent to `Client::new(None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None)
    }

    /// Creates a client using (in order of precedence):
    /// - the explicit `address` argument
    /// - environment variables `GDS_ADDRESS` / `GDS_TIMEOUT` / `GDS_POOL_SIZE`
    /// - config file from `GDS_RC` or `.gdsrc`
    pub fn new(address: Option<String>) -> Result<Self> {
        let cfg = load_config(address)?;
        Ok(Self::with_config(cfg)?)
    }

    /// Creates a client over HTTP from a ready configuration.
    pub fn with_config(config: ClientConfig) -> MdfsResult<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Creates a client over any transport, e.g. an in-process fake server.
    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        let channel = Channel::new(&config.address, Box::new(transport) as Box<dyn Transport>);
        Self {
            grids: GridDecoder::new(config.grid_missing_value),
            stations: StationDecoder::new(config.station_missing_value, config.element_names.clone()),
            channel,
            config,
            progress: false,
        }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_match_policy(mut self, policy: MatchPolicy) -> Self {
        self.config.match_policy = policy;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn resolver(&self) -> Resolver<'_, Box<dyn Transport>> {
        Resolver::new(
            &self.channel,
            self.config.catalog_offset,
            self.config.match_policy,
        )
    }

    /// Resolves a request to one remote file without fetching it.
    pub fn resolve(&self, request: &DataRequest) -> MdfsResult<RemotePath> {
        self.resolver().resolve(request)
    }

    /// Resolves and fetches the raw bytes of a request.
    pub fn fetch(&self, request: &DataRequest) -> MdfsResult<RawPayload> {
        let path = self.resolve(request)?;
        self.fetch_path(&path.full_path())
    }

    /// Fetches a file by its full remote path.
    pub fn fetch_path(&self, path: &str) -> MdfsResult<RawPayload> {
        let bytes = self.get_file(path, None)?;
        debug!(path, bytes = bytes.len(), "fetched");
        Ok(RawPayload::new(bytes, path))
    }

    fn get_file(&self, path: &str, range: Option<ByteRange>) -> MdfsResult<bytes::Bytes> {
        match self.channel.exchange(Command::GetFile {
            path: path.to_string(),
            range,
        })? {
            Reply::Payload(bytes) => Ok(bytes),
            other => Err(MdfsError::ProtocolMismatch(format!(
                "expected payload reply for {path}, got {}",
                other.kind_name()
            ))),
        }
    }

    /// Fetches, decodes and subsets a grid.
    pub fn grid(&self, request: &DataRequest) -> MdfsResult<GridData> {
        let grid = self.grids.decode(&self.fetch(request)?)?;
        Ok(if request.extent.is_unrestricted() {
            grid
        } else {
            grid.subset(&request.extent)
        })
    }

    /// Fetches, decodes and subsets a station table.
    pub fn stations(&self, request: &DataRequest) -> MdfsResult<StationTable> {
        let table = self.stations.decode(&self.fetch(request)?)?;
        Ok(if request.extent.is_unrestricted() {
            table
        } else {
            table.subset(&request.extent)
        })
    }

    /// Like [`Client::grid`] / [`Client::stations`], choosing by the file's type code.
    pub fn retrieve(&self, request: &DataRequest) -> MdfsResult<Dataset> {
        let payload = self.fetch(request)?;
        let data = decode_any(&payload, &self.grids, &self.stations)?;
        if request.extent.is_unrestricted() {
            return Ok(data);
        }
        Ok(match data {
            Dataset::Grid(g) => Dataset::Grid(g.subset(&request.extent)),
            Dataset::Stations(s) => Dataset::Stations(s.subset(&request.extent)),
        })
    }

    /// Runs independent requests in parallel; results keep the input order.
    pub fn retrieve_many(&self, requests: &[DataRequest]) -> Vec<MdfsResult<Dataset>> {
        requests.par_iter().map(|r| self.retrieve(r)).collect()
    }

    /// Entries of one remote directory.
    pub fn list(&self, directory: &str) -> MdfsResult<Vec<CatalogEntry>> {
        self.resolver().list(directory)
    }

    /// Variables (sub-directories) of a data source.
    pub fn list_vars(&self, source: &str) -> MdfsResult<Vec<String>> {
        self.resolver().list_dirs(source)
    }

    pub fn latest_name(&self, directory: &str, filter: &str) -> MdfsResult<String> {
        self.resolver().latest_name(directory, filter)
    }

    /// Every file below `directory`, with full remote paths as names.
    pub fn walk(&self, directory: &str) -> MdfsResult<Vec<CatalogEntry>> {
        self.resolver().walk(directory)
    }

    /// Downloads one remote file to `target`.
    ///
    /// An existing file of the right size is kept; a shorter one is resumed
    /// from its current length.
    pub fn download(&self, remote: &str, target: &Path) -> MdfsResult<PathBuf> {
        let name = file_name_of(remote)
            .ok_or_else(|| MdfsError::DataNotFound(remote.to_string()))?;
        let entry = self
            .list(parent_of(remote))?
            .into_iter()
            .find(|e| !e.is_dir && e.name == name)
            .ok_or_else(|| MdfsError::DataNotFound(remote.to_string()))?;
        let target = if target.as_os_str().is_empty() {
            PathBuf::from(name)
        } else {
            target.to_path_buf()
        };
        self.download_file(remote, entry.size, &target, self.progress)
    }

    fn download_file(&self, remote: &str, size: u64, target: &Path, progress: bool) -> MdfsResult<PathBuf> {
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let existing = fs::metadata(target).map(|m| m.len()).ok();
        if existing == Some(size) {
            info!(path = remote, target = %target.display(), "already downloaded, skipping");
            return Ok(target.to_path_buf());
        }
        let mut downloaded = existing.unwrap_or(0);
        if downloaded > size {
            warn!(path = remote, local = downloaded, remote = size, "local file is larger, downloading again");
            downloaded = 0;
        }

        let mut out = OpenOptions::new()
            .create(true)
            .write(true)
            .append(downloaded > 0)
            .truncate(downloaded == 0)
            .open(target)?;

        let pb = progress.then(|| {
            let pb = ProgressBar::new(size);
            pb.set_style(bar_style(
                "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
            ));
            pb.set_position(downloaded);
            pb
        });

        while downloaded < size {
            let length = DOWNLOAD_CHUNK.min(size - downloaded);
            let chunk = self.get_file(
                remote,
                Some(ByteRange {
                    offset: downloaded,
                    length,
                }),
            )?;
            if chunk.is_empty() {
                break;
            }
            out.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            if let Some(pb) = &pb {
                pb.inc(chunk.len() as u64);
            }
        }
        out.flush()?;
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }

        let actual = fs::metadata(target)?.len();
        if actual != size {
            warn!(path = remote, expected = size, actual, "downloaded size differs from catalog");
            return Err(MdfsError::SizeMismatch {
                expected: size as usize,
                actual: actual as usize,
            });
        }
        info!(path = remote, target = %target.display(), bytes = size, "downloaded");
        Ok(target.to_path_buf())
    }

    /// Mirrors every file below `directory` into `local_root`, in parallel.
    ///
    /// Returns the local paths in catalog order. The first failure aborts.
    pub fn sync_directory(&self, directory: &str, local_root: &Path) -> MdfsResult<Vec<PathBuf>> {
        let directory = directory.trim_end_matches('/');
        let entries = self.walk(directory)?;
        info!(directory, files = entries.len(), "syncing");

        let pb = self.progress.then(|| {
            let pb = ProgressBar::new(entries.len() as u64);
            pb.set_style(bar_style("{spinner:.green} {pos}/{len} files {wide_bar} {eta}"));
            pb
        });

        let result = entries
            .par_iter()
            .map(|entry| -> MdfsResult<PathBuf> {
                let relative = entry
                    .name
                    .strip_prefix(directory)
                    .unwrap_or(&entry.name)
                    .trim_start_matches('/');
                let path = self.download_file(&entry.name, entry.size, &local_root.join(relative), false)?;
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
                Ok(path)
            })
            .collect::<MdfsResult<Vec<_>>>();

        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }
        result
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::decode::GRID_SCALAR;
    use crate::grid::tests::{block, header};
    use crate::transport::testing::ScriptedTransport;

    fn entry(name: &str, size: u64) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            is_dir: false,
            size,
            modified: Utc.with_ymd_and_hms(2023, 2, 20, 12, 0, 0).unwrap(),
        }
    }

    fn client(replies: Vec<Reply>) -> Client {
        Client::with_transport(ClientConfig::default(), ScriptedTransport::new(replies))
    }

    fn rh_request() -> DataRequest {
        let bjt = FixedOffset::east_opt(8 * 3600).unwrap();
        DataRequest::model("ECMWF_HR", bjt.with_ymd_and_hms(2023, 2, 20, 20, 0, 0).unwrap(), 24)
            .with_variable("RH")
            .with_level(850.0)
    }

    #[test]
    fn test_default_config() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.catalog_offset.local_minus_utc(), 8 * 3600);
        assert_eq!(cfg.match_policy, MatchPolicy::Unique);
        assert_eq!(cfg.station_missing_value, 999999.0);
    }

    #[test]
    fn test_grid_request_is_subset() {
        let h = header(GRID_SCALAR, (100.0, 1.0, 41), (50.0, -1.0, 41));
        let client = client(vec![
            Reply::Listing(vec![entry("23022020.024", 0)]),
            Reply::Payload(block(&h).into()),
        ]);
        let grid = client
            .grid(&rh_request().with_lat(20.0..=40.0).with_lon(110.0..=130.0))
            .unwrap();
        assert_eq!((grid.values.lat, grid.values.lon), (21, 21));
        assert_eq!(grid.header().lat_start, 40.0);
        assert_eq!(grid.header().lon_start, 110.0);
    }

    #[test]
    fn test_decode_failure_is_surfaced_verbatim() {
        let client = client(vec![
            Reply::Listing(vec![entry("23022020.024", 0)]),
            Reply::Payload(bytes::Bytes::from_static(b"diamond 4 not binary")),
        ]);
        assert!(matches!(
            client.retrieve(&rh_request()),
            Err(MdfsError::BadDiscriminator { .. })
        ));
    }

    #[test]
    fn test_download_resumes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("23022020.024");
        fs::write(&target, b"0123").unwrap();

        let client = client(vec![
            Reply::Listing(vec![entry("23022020.024", 10)]),
            Reply::Payload(bytes::Bytes::from_static(b"456789")),
        ]);
        client.download("ECMWF_HR/RH/850/23022020.024", &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"0123456789");
    }

    #[test]
    fn test_download_skips_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.bin");
        fs::write(&target, b"abc").unwrap();

        // Only the listing is scripted: a fetch would run out of replies.
        let client = client(vec![Reply::Listing(vec![entry("a.bin", 3)])]);
        client.download("X/a.bin", &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"abc");
    }

    #[test]
    fn test_short_download_is_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.bin");
        let client = client(vec![
            Reply::Listing(vec![entry("a.bin", 5)]),
            Reply::Payload(bytes::Bytes::from_static(b"abc")),
            Reply::Payload(bytes::Bytes::new()),
        ]);
        assert!(matches!(
            client.download("X/a.bin", &target),
            Err(MdfsError::SizeMismatch { expected: 5, actual: 3 })
        ));
    }

    #[test]
    fn test_sync_directory_mirrors_tree() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(vec![
            Reply::Listing(vec![
                CatalogEntry {
                    is_dir: true,
                    ..entry("850", 0)
                },
            ]),
            Reply::Listing(vec![entry("23022020.024", 2)]),
            Reply::Payload(bytes::Bytes::from_static(b"ok")),
        ]);
        let paths = client.sync_directory("ECMWF_HR/RH/", dir.path()).unwrap();
        assert_eq!(paths, vec![dir.path().join("850/23022020.024")]);
        assert_eq!(fs::read(&paths[0]).unwrap(), b"ok");
    }
}
