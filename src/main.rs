#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg: peerstash::config::Config = peerstash::config_io::load_or_create_config("config.toml")
        .await
        .expect("Unable to read or create the config.toml file");

    peerstash::config::init_tracing(&cfg);
    tracing::info!("peerstash booted");

    peerstash::app::run(cfg).await?;
    Ok(())
}
