use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use derivative::Derivative;
use http::{Request, StatusCode};
use hyper::Body;
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::handler::http::steering::{RuleLookup, RuleStore};
use crate::proxy::http::connector::HttpsClient;

/// HttpRuleStore asks the rule service for the rule of a path with `GET <base><path>`.
#[derive(Derivative)]
#[derivative(Debug)]
#[derive(Clone)]
pub struct HttpRuleStore {
    #[derivative(Debug = "ignore")]
    client: HttpsClient,
    base: String,
    timeout: Option<Duration>,
}

impl HttpRuleStore {
    pub fn new(client: HttpsClient, base: String, timeout: Option<Duration>) -> Self {
        Self {
            client,
            base,
            timeout,
        }
    }

    async fn fetch(&self, uri: &str) -> Result<RuleLookup> {
        let request = Request::get(uri).body(Body::empty())?;
        let (parts, body) = self.client.request(request).await?.into_parts();
        let body = hyper::body::to_bytes(body).await?;
        Ok(RuleLookup {
            status: parts.status,
            body: Some(body),
        })
    }
}

#[async_trait]
impl RuleStore for HttpRuleStore {
    #[instrument(skip(self))]
    async fn lookup(&self, path: &str) -> Result<RuleLookup> {
        let uri = format!("{}{}", self.base, path);
        debug!("fetching rule [{}]", uri);
        match self.timeout {
            None => self.fetch(&uri).await,
            Some(duration) => timeout(duration, self.fetch(&uri))
                .await
                .map_err(|_| anyhow!("rule store timed out after {:?}", duration))?,
        }
    }
}

/// FileRuleStore serves rules from a rule database file: a JSON or YAML list of rules, each
/// carrying the `uri` it applies to, without its leading `/`.
///
/// The file is read on every lookup, so edits apply to the next request.
#[derive(Debug, Clone)]
pub struct FileRuleStore {
    path: PathBuf,
}

impl FileRuleStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn load(&self) -> Result<Vec<Value>> {
        let data = tokio::fs::read(&self.path).await?;
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_slice(&data)?),
            _ => Ok(serde_json::from_slice(&data)?),
        }
    }
}

#[async_trait]
impl RuleStore for FileRuleStore {
    #[instrument(skip(self))]
    async fn lookup(&self, path: &str) -> Result<RuleLookup> {
        let key = path.trim_start_matches('/');
        let rule = self.load().await?.into_iter().find(|rule| {
            rule.get("uri")
                .and_then(Value::as_str)
                .map(|uri| uri.trim_start_matches('/'))
                == Some(key)
        });

        Ok(match rule {
            Some(rule) => RuleLookup {
                status: StatusCode::OK,
                body: Some(Bytes::from(serde_json::to_vec(&json!({ "rule": rule }))?)),
            },
            None => RuleLookup {
                status: StatusCode::NOT_FOUND,
                body: Some(Bytes::from(serde_json::to_vec(&json!({ "error": "Not found" }))?)),
            },
        })
    }
}
