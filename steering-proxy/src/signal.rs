use futures::future::select_all;
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Signals waits for the first of a set of unix signals.
pub struct Signals(Vec<Signal>);

impl Signals {
    pub fn from_kinds(kinds: &[SignalKind]) -> anyhow::Result<Self> {
        let signals = kinds
            .iter()
            .map(|kind| signal(*kind))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(signals))
    }

    pub async fn wait(&mut self) -> anyhow::Result<()> {
        if self.0.is_empty() {
            return Ok(());
        }
        let (_, index, _) = select_all(self.0.iter_mut().map(|s| Box::pin(s.recv()))).await;
        tracing::info!("received signal #{}, shutting down", index);
        Ok(())
    }
}
