#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use storymode_relay::{
    Config, Server, ServerError,
    config::DEFAULT_LOG_FILTER,
    server::open_ledger,
};

fn main() -> Result<(), ServerError> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filter)
        .init();

    let config = Config::from_env()?;
    log::debug!("Starting with {config:?}");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let ledger = open_ledger(&config)?;
        let server = Server::bind(&config, ledger).await?;
        let handle = server.handle();

        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {e:?}");
                return;
            }
            log::info!("Received ctrl-c, shutting down");
            handle.shutdown();
        });

        server.run().await
    })
}
