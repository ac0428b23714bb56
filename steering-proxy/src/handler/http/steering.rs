use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderMap, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{Method, StatusCode};
use hyper::{Body, Response};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::handler::http::action::apply_transform;
use crate::handler::http::rule::{Rule, RuleEnvelope, TransformSpec};
use crate::handler::http::selector::authorize;
use crate::handler::http::template::matches;

/// SteeringRequest is everything the pipeline needs from one inbound request.
#[derive(Debug, Clone)]
pub struct SteeringRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    /// Role claim extracted by the transport, already verified. Empty if the claim is missing.
    pub role_claim: String,
    pub body: Option<Bytes>,
}

/// RuleLookup is the raw answer of a [RuleStore]. Only `200 OK` means the rule exists.
#[derive(Debug, Clone)]
pub struct RuleLookup {
    pub status: StatusCode,
    pub body: Option<Bytes>,
}

/// DispatchRequest is the request handed to the [Dispatcher] once the rule has been applied.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// The rule's `operation.url`.
    pub target: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone, Default)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// RuleStore resolves the rule for a request path.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn lookup(&self, path: &str) -> anyhow::Result<RuleLookup>;
}

/// Dispatcher forwards a request to its upstream. It always answers: transport failures are
/// reported as a response status chosen by the dispatcher.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest) -> UpstreamResponse;
}

/// Rejection terminates the pipeline with a fixed status and an empty body.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("rule not found")]
    RuleNotFound,
    #[error("method or role not allowed")]
    Unauthorized,
    #[error("payload does not match template")]
    TemplateViolation,
    #[error("malformed request payload: {0}")]
    MalformedRequest(String),
    #[error("malformed upstream payload: {0}")]
    MalformedResponse(String),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::RuleNotFound => StatusCode::NOT_FOUND,
            Rejection::Unauthorized => StatusCode::FORBIDDEN,
            Rejection::TemplateViolation => StatusCode::UNPROCESSABLE_ENTITY,
            Rejection::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Rejection::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Outcome is the single terminal state of one pipeline run.
#[derive(Debug, Clone)]
pub enum Outcome {
    Rejected(Rejection),
    Proxied(UpstreamResponse),
}

impl Outcome {
    pub fn status(&self) -> StatusCode {
        match self {
            Outcome::Rejected(rejection) => rejection.status(),
            Outcome::Proxied(upstream) => upstream.status,
        }
    }

    /// into_response assembles the outgoing response. Upstream headers are copied except
    /// `content-length`, which the transport recomputes for the rewritten body.
    pub fn into_response(self) -> Response<Body> {
        match self {
            Outcome::Rejected(rejection) => {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = rejection.status();
                response
            }
            Outcome::Proxied(upstream) => {
                let body = upstream.body.map(Body::from).unwrap_or_default();
                let mut response = Response::new(body);
                *response.status_mut() = upstream.status;
                let headers = response.headers_mut();
                for (name, value) in upstream.headers.iter() {
                    if name != CONTENT_LENGTH {
                        headers.append(name, value.clone());
                    }
                }
                response
            }
        }
    }
}

/// Steering runs the rule pipeline: lookup, enabled check, authorization, request body
/// validation and transformation, dispatch, response body transformation.
///
/// It holds no per-request state and can be shared across connections.
#[derive(Clone)]
pub struct Steering {
    store: Arc<dyn RuleStore>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Steering {
    pub fn new(store: Arc<dyn RuleStore>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn handle(&self, request: SteeringRequest) -> Outcome {
        match self.steer(request).await {
            Ok(upstream) => {
                debug!("upstream returned {}", upstream.status);
                Outcome::Proxied(upstream)
            }
            Err(rejection) => {
                warn!("{} - returning {}", rejection, rejection.status());
                Outcome::Rejected(rejection)
            }
        }
    }

    async fn steer(&self, request: SteeringRequest) -> Result<UpstreamResponse, Rejection> {
        let rule = self.resolve(&request.path).await?;
        debug!("steering [{}] -> [{}]", request.path, rule.operation.url);
        debug!(
            "method [{}] -> needed [{}], role [{}] -> needed {:?}",
            request.method, rule.match_rules.method, request.role_claim, rule.match_rules.roles
        );
        if !authorize(&request.method, &request.role_claim, &rule.match_rules) {
            return Err(Rejection::Unauthorized);
        }

        let body = prepare_request_body(&rule, request.body)?;
        let upstream = self
            .dispatcher
            .dispatch(DispatchRequest {
                target: rule.operation.url.clone(),
                method: request.method,
                headers: forwarded_headers(&request.headers),
                body,
            })
            .await;

        prepare_response(&rule, upstream)
    }

    async fn resolve(&self, path: &str) -> Result<Rule, Rejection> {
        let lookup = self.store.lookup(path).await.map_err(|e| {
            error!("rule lookup failed: {}", e);
            Rejection::RuleNotFound
        })?;
        if lookup.status != StatusCode::OK {
            debug!("rule store answered {}", lookup.status);
            return Err(Rejection::RuleNotFound);
        }

        let body = lookup.body.unwrap_or_default();
        let envelope: RuleEnvelope = serde_json::from_slice(&body).map_err(|e| {
            error!("rule store returned an invalid rule: {}", e);
            Rejection::RuleNotFound
        })?;
        if !envelope.rule.enabled {
            debug!("rule is disabled");
            return Err(Rejection::RuleNotFound);
        }
        Ok(envelope.rule)
    }
}

/// prepare_request_body validates the body against the rule's template and applies `to_server`.
/// The body is only parsed when the rule needs it; otherwise it is forwarded untouched.
fn prepare_request_body(rule: &Rule, body: Option<Bytes>) -> Result<Option<Bytes>, Rejection> {
    let body = match body.filter(|b| !b.is_empty()) {
        Some(body) => body,
        None => return Ok(None),
    };
    if rule.template.is_none() && rule.to_server().is_none() {
        debug!("json payload client -> server: no changes");
        return Ok(Some(body));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| Rejection::MalformedRequest(e.to_string()))?;

    if let Some(template) = &rule.template {
        if !matches(&payload, template) {
            return Err(Rejection::TemplateViolation);
        }
        debug!("json template validation successful");
    }

    match rule.to_server() {
        Some(spec) => {
            debug!("json payload client -> server: being updated");
            transform(payload, spec)
                .map(Some)
                .map_err(|e| Rejection::MalformedRequest(e.to_string()))
        }
        None => Ok(Some(body)),
    }
}

/// prepare_response applies `to_client` to a non-empty upstream body.
fn prepare_response(
    rule: &Rule,
    mut upstream: UpstreamResponse,
) -> Result<UpstreamResponse, Rejection> {
    let body = upstream.body.take().filter(|b| !b.is_empty());
    upstream.body = match (body, rule.to_client()) {
        (Some(body), Some(spec)) => {
            debug!("json payload server -> client: being updated");
            let payload: Value = serde_json::from_slice(&body)
                .map_err(|e| Rejection::MalformedResponse(e.to_string()))?;
            Some(transform(payload, spec).map_err(|e| Rejection::MalformedResponse(e.to_string()))?)
        }
        (body, _) => body,
    };
    Ok(upstream)
}

fn transform(payload: Value, spec: &TransformSpec) -> anyhow::Result<Bytes> {
    let payload = apply_transform(payload, spec)?;
    Ok(serde_json::to_vec(&payload)?.into())
}

/// Hop-by-hop headers of RFC 7230 section 6.1, scoped to the inbound connection.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
];

/// forwarded_headers drops the headers the upstream call recomputes, the hop-by-hop headers,
/// and any header the inbound `connection` header names.
fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in listed.iter().map(String::as_str).chain(HOP_BY_HOP.iter().copied()) {
        forwarded.remove(name);
    }
    forwarded.remove(HOST);
    forwarded.remove(CONTENT_LENGTH);
    forwarded.remove(TRANSFER_ENCODING);
    forwarded
}
