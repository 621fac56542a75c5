use crate::error::TransportError;
use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::{error, info, warn};

/// A single POST exchange; retry is layered on top by [`post_with_retry`].
pub trait Transport: Send + Sync {
    fn post(&self, url: &str, bearer: Option<&str>, body: &[u8]) -> Result<Vec<u8>, TransportError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(250),
        }
    }
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(1)
            .build()
            .context("failed to build metadata HTTP client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn post(&self, url: &str, bearer: Option<&str>, body: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut req = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let resp = req.send().map_err(|e| classify(&e))?;
        let status = resp.status();
        let bytes = resp.bytes().map_err(|e| classify(&e))?;
        if status.is_success() {
            return Ok(bytes.to_vec());
        }
        Err(TransportError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        text.push_str(": ");
        text.push_str(&s.to_string());
        source = s.source();
    }
    text
}

const TRANSIENT_SIGNATURES: &[&str] = &[
    "timed out",
    "broken pipe",
    "dns error",
    "failed to lookup address",
    "no such host",
    "name or service not known",
    "network is down",
];

/// Whether an error description carries one of the transient signatures.
pub fn is_transient_message(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    TRANSIENT_SIGNATURES.iter().any(|sig| text.contains(sig))
}

fn has_transient_io(err: &(dyn StdError + 'static)) -> bool {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = cur {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NetworkDown
            ) {
                return true;
            }
        }
        cur = e.source();
    }
    false
}

fn classify(err: &reqwest::Error) -> TransportError {
    let text = error_chain(err);
    if err.is_timeout() || has_transient_io(err) || is_transient_message(&text) {
        TransportError::Transient(text)
    } else {
        TransportError::Fatal(text)
    }
}

/// POSTs `body`, retrying transient failures up to the policy's attempt
/// count with a fixed delay between attempts. Status errors are not retried.
pub fn post_with_retry<T: Transport + ?Sized>(
    transport: &T,
    policy: &RetryPolicy,
    worker_id: usize,
    url: &str,
    bearer: Option<&str>,
    body: &[u8],
) -> Result<Vec<u8>, TransportError> {
    info!("[worker {worker_id}] post url [{url}]");
    info!("[worker {worker_id}] post payload [{}]", String::from_utf8_lossy(body));

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match transport.post(url, bearer, body) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                warn!("[worker {worker_id}] POST failed with error, retrying ({e})");
                std::thread::sleep(policy.delay);
            }
            Err(e) => {
                match &e {
                    TransportError::Status { status, body } => {
                        error!("[worker {worker_id}] POST failed with status {status} ({body})")
                    }
                    TransportError::Transient(_) => {
                        error!("[worker {worker_id}] POST failed with error, giving up after {attempt} attempts ({e})")
                    }
                    _ => error!("[worker {worker_id}] POST failed ({e})"),
                }
                return Err(e);
            }
        }
    }
}
