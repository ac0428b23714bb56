use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use derivative::Derivative;
use http::{Request, StatusCode};
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use rustls::ClientConfig;
use tokio::time::timeout;
use tracing::{debug, error, instrument};

use crate::handler::http::steering::{DispatchRequest, Dispatcher, UpstreamResponse};

pub type HttpsClient = Client<HttpsConnector<HttpConnector>>;

/// https_client builds the client shared by the rule store and the dispatcher. Plain `http://`
/// targets are allowed.
pub fn https_client(tls_client_config: ClientConfig) -> HttpsClient {
    let https = HttpsConnectorBuilder::new()
        .with_tls_config(tls_client_config)
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder().build(https)
}

/// HttpDispatcher forwards steered requests to the upstream over HTTP or HTTPS.
#[derive(Derivative)]
#[derivative(Debug)]
#[derive(Clone)]
pub struct HttpDispatcher {
    #[derivative(Debug = "ignore")]
    client: HttpsClient,
    upstream: String,
    timeout: Option<Duration>,
}

impl HttpDispatcher {
    pub fn new(client: HttpsClient, upstream: String, timeout: Option<Duration>) -> Self {
        Self {
            client,
            upstream,
            timeout,
        }
    }

    async fn exchange(&self, target: &str, request: DispatchRequest) -> Result<UpstreamResponse> {
        let mut builder = Request::builder().method(request.method).uri(target);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(request.headers);
        }
        let request = builder.body(request.body.map(Body::from).unwrap_or_default())?;

        let (parts, body) = self.client.request(request).await?.into_parts();
        let body = hyper::body::to_bytes(body).await?;
        Ok(UpstreamResponse {
            status: parts.status,
            headers: parts.headers,
            body: Some(body).filter(|b| !b.is_empty()),
        })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    #[instrument(skip(self, request), fields(target = %request.target))]
    async fn dispatch(&self, request: DispatchRequest) -> UpstreamResponse {
        let target = resolve_target(&self.upstream, &request.target);
        debug!("proxying request to [{}]", target);

        let exchange = self.exchange(&target, request);
        let result = match self.timeout {
            None => exchange.await,
            Some(duration) => match timeout(duration, exchange).await {
                Ok(result) => result,
                Err(_) => {
                    error!("upstream [{}] timed out after {:?}", target, duration);
                    return status_only(StatusCode::GATEWAY_TIMEOUT);
                }
            },
        };

        result.unwrap_or_else(|e| {
            error!("fail to forward request to [{}]: {}", target, e);
            status_only(StatusCode::BAD_GATEWAY)
        })
    }
}

fn status_only(status: StatusCode) -> UpstreamResponse {
    UpstreamResponse {
        status,
        ..Default::default()
    }
}

/// resolve_target joins a relative rule target to the upstream base. Absolute targets are kept.
pub fn resolve_target(upstream: &str, target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        return target.to_string();
    }
    format!(
        "{}/{}",
        upstream.trim_end_matches('/'),
        target.trim_start_matches('/')
    )
}
