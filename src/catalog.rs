//! Turns a [`DataRequest`] into the path of one remote file.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{MdfsError, MdfsResult};
use crate::pattern::{FilenamePattern, RenderedName};
use crate::request::DataRequest;
use crate::transport::{Channel, Transport};
use crate::util::join_path;
use crate::wire::{Command, Reply};

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// What to do when several catalog entries match a glob template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Fail with [`MdfsError::AmbiguousMatch`].
    #[default]
    Unique,
    /// Pick the name closest to the rendered template.
    Closest,
}

/// A resolved file location on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub directory: String,
    pub file_name: String,
}

impl RemotePath {
    pub fn full_path(&self) -> String {
        join_path(&self.directory, &self.file_name)
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_path())
    }
}

pub struct Resolver<'a, T> {
    channel: &'a Channel<T>,
    /// Time zone the server encodes file names in.
    offset: FixedOffset,
    policy: MatchPolicy,
}

impl<'a, T: Transport> Resolver<'a, T> {
    pub fn new(channel: &'a Channel<T>, offset: FixedOffset, policy: MatchPolicy) -> Self {
        Self {
            channel,
            offset,
            policy,
        }
    }

    pub fn resolve(&self, request: &DataRequest) -> MdfsResult<RemotePath> {
        let directory = request.directory();
        let time = request.time.with_timezone(&self.offset);
        let forecast_hour = request.forecast_hour().unwrap_or(0);

        let (pattern, listing) = match &request.wildcard {
            Some(wildcard) => (FilenamePattern::parse(wildcard)?, None),
            None => {
                let entries = self.list(&directory)?;
                let latest = entries
                    .iter()
                    .filter(|e| !e.is_dir)
                    .map(|e| e.name.as_str())
                    .max()
                    .ok_or_else(|| MdfsError::DataNotFound(format!("{directory} has no files")))?;
                let pattern = FilenamePattern::guess(latest)?;
                debug!(%directory, latest, pattern = %pattern, "guessed filename template");
                (pattern, Some(entries))
            }
        };

        let target = pattern.render(&time, forecast_hour)?;
        if target.is_exact() && listing.is_none() {
            debug!(%directory, file = target.as_str(), "built file name without listing");
            return Ok(RemotePath {
                directory,
                file_name: target.as_str().to_string(),
            });
        }

        let entries = match listing {
            Some(entries) => entries,
            None => self.list(&directory)?,
        };
        let file_name = choose(&directory, &target, &entries, self.policy)?;
        debug!(%directory, file = %file_name, "resolved");
        Ok(RemotePath {
            directory,
            file_name,
        })
    }

    pub fn list(&self, directory: &str) -> MdfsResult<Vec<CatalogEntry>> {
        match self.channel.exchange(Command::ListDirectory {
            path: directory.to_string(),
        })? {
            Reply::Listing(entries) => Ok(entries),
            other => Err(unexpected("listing", &other)),
        }
    }

    /// Sub-directory names directly below `directory`.
    pub fn list_dirs(&self, directory: &str) -> MdfsResult<Vec<String>> {
        let mut dirs: Vec<String> = self
            .list(directory)?
            .into_iter()
            .filter(|e| e.is_dir)
            .map(|e| e.name)
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    /// Newest file name in `directory` whose name matches the server-side `filter`.
    pub fn latest_name(&self, directory: &str, filter: &str) -> MdfsResult<String> {
        match self.channel.exchange(Command::LatestName {
            path: directory.to_string(),
            filter: filter.to_string(),
        })? {
            Reply::Name(name) if name.is_empty() => Err(MdfsError::DataNotFound(format!(
                "no file matching {filter:?} in {directory}"
            ))),
            Reply::Name(name) => Ok(name),
            other => Err(unexpected("name", &other)),
        }
    }

    /// Every file path below `directory`, depth first, in listing order.
    pub fn walk(&self, directory: &str) -> MdfsResult<Vec<CatalogEntry>> {
        let mut out = Vec::new();
        self.walk_into(directory.trim_end_matches('/'), &mut out)?;
        Ok(out)
    }

    fn walk_into(&self, directory: &str, out: &mut Vec<CatalogEntry>) -> MdfsResult<()> {
        for entry in self.list(directory)? {
            if !is_plain_name(&entry.name) {
                return Err(MdfsError::MalformedPayload(format!(
                    "listing of {directory} has unsafe entry name {:?}",
                    entry.name
                )));
            }
            let path = join_path(directory, &entry.name);
            if entry.is_dir {
                self.walk_into(&path, out)?;
            } else {
                out.push(CatalogEntry {
                    name: path,
                    ..entry
                });
            }
        }
        Ok(())
    }
}

/// A single path component: no separators, no `.` or `..`.
fn is_plain_name(name: &str) -> bool {
    !matches!(name, "" | "." | "..") && !name.contains(['/', '\\', ':'])
}

/// Picks the single entry that matches `target`, or applies `policy`.
pub(crate) fn choose(
    directory: &str,
    target: &RenderedName,
    entries: &[CatalogEntry],
    policy: MatchPolicy,
) -> MdfsResult<String> {
    let mut candidates: Vec<&str> = entries
        .iter()
        .filter(|e| !e.is_dir && target.matches(&e.name))
        .map(|e| e.name.as_str())
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    match (candidates.as_slice(), policy) {
        ([], _) => Err(MdfsError::DataNotFound(join_path(directory, target.as_str()))),
        ([only], _) => Ok(only.to_string()),
        (many, MatchPolicy::Unique) => Err(MdfsError::AmbiguousMatch {
            directory: directory.to_string(),
            candidates: many.iter().map(|s| s.to_string()).collect(),
        }),
        (many, MatchPolicy::Closest) => {
            let stem = target.stem();
            // Longest shared prefix wins; sorted order breaks ties toward the smaller name.
            let best = many
                .iter()
                .enumerate()
                .max_by_key(|(i, name)| (common_prefix(&stem, name), std::cmp::Reverse(*i)))
                .map(|(_, name)| name.to_string());
            best.ok_or_else(|| MdfsError::DataNotFound(join_path(directory, target.as_str())))
        }
    }
}

fn common_prefix(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

fn unexpected(wanted: &str, got: &Reply) -> MdfsError {
    MdfsError::ProtocolMismatch(format!(
        "expected {wanted} reply, got {}",
        got.kind_name()
    ))
}
