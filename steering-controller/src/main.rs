use std::process::exit;

use steering_controller_lib::cmd::command_line::{get_config_from_opt, Opt};
use steering_proxy::proxy_main;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = match Opt::from_args_checked() {
        Err(e) => {
            println!("{}", e);
            exit(1)
        }
        Ok(o) => o,
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(opt.get_level_filter().into()))
        .init();

    let cfg = get_config_from_opt(&opt).await?;
    info!(
        "loaded config {}: listening on port {}, upstream {}",
        opt.input.display(),
        cfg.listen_port,
        cfg.http_config.upstream
    );
    if opt.check {
        println!("config {} is valid", opt.input.display());
        return Ok(());
    }

    proxy_main(cfg).await
}
