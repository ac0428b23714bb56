use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::{anyhow, Result};
use derivative::Derivative;
use http::header::HeaderName;
use hyper::server::conn::Http;
use hyper::service::Service;
use hyper::{Body, Request, Response};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::oneshot::Receiver;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, span, Instrument, Level};

use crate::handler::http::steering::{Dispatcher, RuleStore, Steering, SteeringRequest};
use crate::proxy::http::config::{Config, RuleStoreConfig};
use crate::proxy::http::connector::{https_client, HttpDispatcher};
use crate::proxy::http::store::{FileRuleStore, HttpRuleStore};

/// HttpServer is the gateway front: it accepts client connections and lets [HttpService] steer
/// every request on them.
pub struct HttpServer {
    config: Config,
}

impl HttpServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// steering wires the configured rule store and dispatcher into the pipeline.
    pub fn steering(&self) -> Steering {
        let http_config = &self.config.http_config;
        let client = https_client(self.config.tls_config.tls_client_config.clone());

        let store: Arc<dyn RuleStore> = match &http_config.rule_store {
            RuleStoreConfig::Http(base) => Arc::new(HttpRuleStore::new(
                client.clone(),
                base.clone(),
                http_config.upstream_timeout,
            )),
            RuleStoreConfig::File(path) => Arc::new(FileRuleStore::new(path.clone())),
        };
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(HttpDispatcher::new(
            client,
            http_config.upstream.clone(),
            http_config.upstream_timeout,
        ));
        Steering::new(store, dispatcher)
    }

    pub async fn serve(&mut self, rx: Receiver<()>) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.listen_port));
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener, rx).await
    }

    pub async fn serve_listener(&self, listener: TcpListener, mut rx: Receiver<()>) -> Result<()> {
        tracing::info!("Gateway listening on {}", listener.local_addr()?);
        let steering = Arc::new(self.steering());
        let role_claim_header = Arc::new(self.config.http_config.role_claim_header.clone());
        let acceptor = self
            .config
            .tls_config
            .tls_server_config
            .clone()
            .map(|server_config| TlsAcceptor::from(Arc::new(server_config)));
        let rx_mut = &mut rx;

        loop {
            let (stream, addr_remote) = select! {
                stream = listener.accept() => {
                    stream
                },
                _ = &mut *rx_mut => {
                    return Ok(());
                }
            }?;
            debug!(target : "Accept streaming", "remote={:?}", addr_remote);
            let service =
                HttpService::new(addr_remote, steering.clone(), role_claim_header.clone());

            match &acceptor {
                Some(acceptor) => {
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        let result = match acceptor.accept(stream).await {
                            Ok(tls_stream) => serve_http(tls_stream, service).await,
                            Err(e) => Err(anyhow!("{}: tls handshake failed: {}", addr_remote, e)),
                        };
                        if let Err(e) = result {
                            error!("{}", e);
                        }
                    });
                }
                None => {
                    tokio::spawn(async move {
                        if let Err(e) = serve_http(stream, service).await {
                            error!("{}", e);
                        }
                    });
                }
            }
        }
    }
}

/// serve_http lets the HttpService resolve every request of one client connection.
pub async fn serve_http<S>(stream: S, service: HttpService) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let log_key = format!("{{ peer={} }}", service.remote);
    let span = span!(Level::TRACE, "Stream", peer = %service.remote);
    Http::new()
        .serve_connection(stream, service)
        .instrument(span)
        .await
        .map_err(|e| anyhow!("{}: fail to serve http: {}", log_key, e))
}

/// HttpService turns each request into one run of the [Steering] pipeline and answers with its
/// outcome.
#[derive(Derivative)]
#[derivative(Debug)]
#[derive(Clone)]
pub struct HttpService {
    remote: SocketAddr,
    #[derivative(Debug = "ignore")]
    steering: Arc<Steering>,
    role_claim_header: Arc<HeaderName>,
}

impl HttpService {
    pub fn new(
        remote: SocketAddr,
        steering: Arc<Steering>,
        role_claim_header: Arc<HeaderName>,
    ) -> Self {
        Self {
            remote,
            steering,
            role_claim_header,
        }
    }

    async fn handle(self, request: Request<Body>) -> Result<Response<Body>> {
        let log_key = format!("{{remote = {}, path = {} }}", self.remote, request.uri().path());
        debug!("{} : gateway is handling http request", log_key);

        let (parts, body) = request.into_parts();
        let body = hyper::body::to_bytes(body).await?;
        let role_claim = parts
            .headers
            .get(&*self.role_claim_header)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let outcome = self
            .steering
            .handle(SteeringRequest {
                method: parts.method,
                path: parts.uri.path().to_string(),
                headers: parts.headers,
                role_claim,
                body: Some(body).filter(|b| !b.is_empty()),
            })
            .await;
        debug!("{} : answering {}", log_key, outcome.status());
        Ok(outcome.into_response())
    }
}

impl Service<Request<Body>> for HttpService {
    type Response = Response<Body>;
    type Error = anyhow::Error;
    #[allow(clippy::type_complexity)]
    type Future =
        Pin<Box<dyn 'static + Send + Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    #[inline]
    fn call(&mut self, request: Request<Body>) -> Self::Future {
        Box::pin(self.clone().handle(request))
    }
}
