use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use warren_c2::{
    api::{self, ApiState},
    auth::SessionStore,
    config::Config,
    Controller, Registry,
};
use warren_radio::Radio;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warren_c2=info,libp2p=warn".parse().unwrap()),
        )
        .init();

    let config = Config::parse();
    let identity = match config.validate() {
        Ok(identity) => identity,
        Err(e) => {
            eprintln!("{e}; cannot continue");
            std::process::exit(1);
        }
    };

    tracing::info!(
        address = %hex::encode(identity.verifying_key().to_bytes()),
        "warren-c2 starting",
    );

    let radio = Radio::new(config.radio_config(identity.clone()));
    if let Err(e) = radio.start().await {
        tracing::error!("{e}; cannot continue");
        std::process::exit(1);
    }

    let registry = Registry::default();
    let controller = Controller::new(radio.clone(), registry, identity);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller_task = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run(shutdown_rx).await })
    };

    // Admin API.
    let sessions = Arc::new(SessionStore::new(
        config.view_token.clone(),
        config.admin_token.clone(),
    ));
    let app = api::router(
        ApiState {
            controller: controller.clone(),
            sessions,
        },
        config.debug_endpoint.as_deref(),
    );
    let listener = match tokio::net::TcpListener::bind(config.api_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("could not bind admin API on {}: {e}", config.api_addr);
            std::process::exit(1);
        }
    };
    tracing::info!("Admin API listening on {}", config.api_addr);

    let api_task = {
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    while !*shutdown.borrow() {
                        if shutdown.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await;
            if let Err(e) = result {
                tracing::error!("Admin API server failed: {e}");
            }
        })
    };

    wait_for_signal().await;
    tracing::info!("Exit requested; exiting gracefully");

    // A second signal forces immediate exit.
    tokio::spawn(async {
        wait_for_signal().await;
        tracing::error!("Exit re-requested; forcing");
        std::process::exit(1);
    });

    let _ = shutdown_tx.send(true);
    let _ = controller_task.await;
    let _ = api_task.await;
    radio.stop().await;

    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return tokio::signal::ctrl_c().await.unwrap_or(()),
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
