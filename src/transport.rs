//! Moves encoded frames to the GDS server and back.

use bytes::Bytes;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::ClientConfig;
use crate::error::{MdfsError, MdfsResult, remote_failure};
use crate::util::backoff;
use crate::wire::{self, Command, Frame, Reply};

/// Sends one request frame and returns the matching reply frame.
///
/// Implementations must not retry a full exchange: the listing on the
/// server may change between attempts.
pub trait Transport: Send + Sync {
    fn send(&self, frame: Bytes) -> MdfsResult<Bytes>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, frame: Bytes) -> MdfsResult<Bytes> {
        (**self).send(frame)
    }
}

/// Frames carried as HTTP request/response bodies to `http://{address}/DataService`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    address: String,
    url: String,
    connect_retries: usize,
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> MdfsResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("mdfs-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("mdfs-rs")),
        );
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_size)
            .build()
            .map_err(|e| MdfsError::unavailable(&config.address, e))?;

        Ok(Self {
            address: config.address.clone(),
            url: format!("http://{}/DataService", config.address.trim_end_matches('/')),
            connect_retries: config.connect_retries,
            http,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Transport for HttpTransport {
    fn send(&self, frame: Bytes) -> MdfsResult<Bytes> {
        let mut tries = 0usize;
        let mut sleep = Duration::from_millis(200);
        let resp = loop {
            match self.http.post(&self.url).body(frame.clone()).send() {
                Ok(resp) => break resp,
                // Nothing reached the server yet, so only this step is safe to repeat.
                Err(err) if err.is_connect() && !err.is_timeout() && tries < self.connect_retries => {
                    tries += 1;
                    warn!(address = %self.address, attempt = tries, error = %err, "connect failed, retrying");
                    thread::sleep(sleep);
                    sleep = backoff(sleep, Duration::from_secs(2));
                }
                Err(err) => return Err(MdfsError::unavailable(&self.address, describe(&err))),
            }
        };

        let status = resp.status();
        if status.is_server_error() {
            return Err(MdfsError::unavailable(
                &self.address,
                format!("HTTP {status}"),
            ));
        }
        if !status.is_success() {
            return Err(MdfsError::ProtocolMismatch(format!(
                "HTTP {status} from {}",
                self.url
            )));
        }

        // A body cut short by a reset or timeout never reaches the decoder.
        resp.bytes()
            .map_err(|e| MdfsError::unavailable(&self.address, describe(&e)))
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

/// Numbers requests, runs them through a [`Transport`] and checks the replies.
#[derive(Debug)]
pub struct Channel<T> {
    address: String,
    next_id: AtomicU64,
    transport: T,
}

impl<T: Transport> Channel<T> {
    pub fn new(address: &str, transport: T) -> Self {
        Self {
            address: address.to_string(),
            next_id: AtomicU64::new(1),
            transport,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// One request, one reply. Failure replies become typed errors.
    pub fn exchange(&self, command: Command) -> MdfsResult<Reply> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let context = command.path().to_string();
        debug!(request_id, path = %context, ?command, "sending");

        let frame = wire::encode_command(&Frame::new(request_id, command))?;
        let raw = self.transport.send(frame)?;
        let reply = wire::decode_reply(&raw)?;

        if reply.request_id != request_id {
            return Err(MdfsError::ProtocolMismatch(format!(
                "reply for request {} arrived for request {}",
                reply.request_id, request_id
            )));
        }
        debug!(request_id, kind = reply.body.kind_name(), bytes = raw.len(), "received");

        match reply.body {
            Reply::Failure { code, message } => Err(remote_failure(code, &message, &context)),
            body => Ok(body),
        }
    }
}
