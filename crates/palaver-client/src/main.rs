use palaver_client::config::ClientConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    palaver_client::init_tracing();

    let config = ClientConfig::from_env();
    tracing::debug!(?config, "Client configuration");

    palaver_client::run(config).await
}
