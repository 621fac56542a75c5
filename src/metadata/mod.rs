//! Bibliographic metadata for a document, fetched from a remote query
//! service: auth token, templated query, barcode disambiguation.

pub mod http;
pub mod types;

use crate::config::{MetadataSettings, Settings};
use crate::error::TransportError;
use crate::util::substitute_once;
use anyhow::Result;
use http::{HttpTransport, RetryPolicy, Transport, post_with_retry};
use serde::Serialize;
use tracing::{debug, info, warn};
use types::{Record, SearchResult};

pub const UNSPECIFIED: &str = "<unspecified>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Metadata {
    pub title: String,
    pub author: String,
    pub published: String,
    pub description: String,
    pub subjects: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            title: UNSPECIFIED.into(),
            author: UNSPECIFIED.into(),
            published: UNSPECIFIED.into(),
            description: UNSPECIFIED.into(),
            subjects: UNSPECIFIED.into(),
        }
    }
}

/// How a record was picked out of a multi-record response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Only,
    Barcode(usize),
    Fallback,
}

impl Selection {
    pub fn index(self) -> usize {
        match self {
            Selection::Barcode(ix) => ix,
            Selection::Only | Selection::Fallback => 0,
        }
    }
}

/// Picks the record to use for `id`: the only one, the first whose barcode
/// equals `id`, or else the first.
pub fn select_record(records: &[Record], id: &str) -> Selection {
    if records.len() <= 1 {
        return Selection::Only;
    }
    records
        .iter()
        .position(|r| r.all("barcode").any(|b| b == id))
        .map(Selection::Barcode)
        .unwrap_or(Selection::Fallback)
}

fn field(record: &Record, name: &str) -> String {
    match record.first(name) {
        Some(v) => {
            debug!("located field [{name}] -> [{v}]");
            v.to_string()
        }
        None => {
            warn!("cannot find field [{name}] in search results");
            String::new()
        }
    }
}

fn default_if_empty(value: String, default: &str) -> String {
    if value.is_empty() { default.to_string() } else { value }
}

struct Endpoint {
    settings: MetadataSettings,
    transport: Box<dyn Transport>,
}

pub struct MetadataResolver {
    endpoint: Option<Endpoint>,
    id_placeholder: String,
    retry: RetryPolicy,
}

impl MetadataResolver {
    pub fn new(settings: &Settings) -> Result<Self> {
        let endpoint = match &settings.metadata {
            Some(md) => Some(Endpoint {
                settings: md.clone(),
                transport: Box::new(HttpTransport::new(md.timeout)?),
            }),
            None => None,
        };
        Ok(Self {
            endpoint,
            id_placeholder: settings.id_placeholder.clone(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_transport(
        settings: MetadataSettings,
        id_placeholder: &str,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            endpoint: Some(Endpoint {
                settings,
                transport,
            }),
            id_placeholder: id_placeholder.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// A resolver that always answers with placeholders.
    pub fn unconfigured() -> Self {
        Self {
            endpoint: None,
            id_placeholder: String::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Metadata for document `id`. Without an endpoint every field is the
    /// placeholder. Description and subjects are never queried.
    pub fn resolve(&self, worker_id: usize, id: &str) -> Result<Metadata, TransportError> {
        let mut md = Metadata::default();
        let Some(ep) = &self.endpoint else {
            return Ok(md);
        };

        let token = self.auth_token(worker_id, ep)?;
        let Some(record) = self.query(worker_id, ep, id, token.as_deref())? else {
            return Ok(md);
        };

        md.title = default_if_empty(field(&record, "title"), &md.title);
        md.author = default_if_empty(field(&record, "author"), &md.author);
        md.published = default_if_empty(field(&record, "published_date"), &md.published);
        Ok(md)
    }

    fn auth_token(&self, worker_id: usize, ep: &Endpoint) -> Result<Option<String>, TransportError> {
        let Some(url) = &ep.settings.auth_endpoint else {
            return Ok(None);
        };
        let body = post_with_retry(ep.transport.as_ref(), &self.retry, worker_id, url, None, b"")?;
        let token = String::from_utf8_lossy(&body).trim().to_string();
        Ok((!token.is_empty()).then_some(token))
    }

    fn query(
        &self,
        worker_id: usize,
        ep: &Endpoint,
        id: &str,
        token: Option<&str>,
    ) -> Result<Option<Record>, TransportError> {
        let query = substitute_once(&ep.settings.query_template, &self.id_placeholder, id);
        let body = post_with_retry(
            ep.transport.as_ref(),
            &self.retry,
            worker_id,
            &ep.settings.query_endpoint,
            token,
            query.as_bytes(),
        )?;
        debug!("[worker {worker_id}] received query response [{}]", String::from_utf8_lossy(&body));

        let result: SearchResult = serde_json::from_slice(&body)?;
        let Some(records) = result
            .groups
            .into_iter()
            .next()
            .map(|g| g.records)
            .filter(|r| !r.is_empty())
        else {
            warn!("[worker {worker_id}] received no results for id [{id}]");
            return Ok(None);
        };

        let selection = select_record(&records, id);
        match selection {
            Selection::Only => {}
            Selection::Barcode(ix) => info!(
                "[worker {worker_id}] received {} results for id [{id}], matched by barcode, using result # {}",
                records.len(),
                ix + 1
            ),
            Selection::Fallback => warn!(
                "[worker {worker_id}] received {} results for id [{id}], cannot match by barcode, using the first",
                records.len()
            ),
        }
        Ok(records.into_iter().nth(selection.index()))
    }
}
