use tokio::signal::unix::SignalKind;
use tokio::sync::oneshot::channel;
use tracing::trace;

use crate::proxy::http::config::Config;
use crate::proxy::http::server::HttpServer;
use crate::signal::Signals;

pub mod handler;
pub mod proxy;
pub mod raw_config;
pub mod signal;

/// proxy_main serves the gateway until SIGINT or SIGTERM.
pub async fn proxy_main(config: Config) -> anyhow::Result<()> {
    trace!("gateway config: {:?}", config);
    let (sender, rx) = channel();

    let mut spawn = tokio::spawn(async move {
        let mut server = HttpServer::new(config);
        server.serve(rx).await
    });

    let mut signals = Signals::from_kinds(&[SignalKind::interrupt(), SignalKind::terminate()])?;
    tokio::select! {
        result = signals.wait() => result?,
        served = &mut spawn => return served?,
    }

    let _ = sender.send(());
    spawn.await?
}
