use anyhow::Context;
use auditlog_proxy::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    init_tracing(&config.log)?;

    let registry = Registry::with_builtin_providers()?;
    let sink = Sink::new(&registry, AuditDecoder::audit(), &config)
        .with_context(|| format!("initializing provider {}", config.provider))?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    Server::new(config.webhook.clone(), sink)
        .run(shutdown)
        .await
        .context("running webhook server")?;

    Ok(())
}
