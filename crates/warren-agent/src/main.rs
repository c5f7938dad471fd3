use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use warren_agent::{config::Cli, Agent, CellStore, ExchangeEvaluator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warren_agent=info,libp2p=warn".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let conf = match cli.agent_config() {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("{e}; cannot continue");
            std::process::exit(1);
        }
    };

    let store = CellStore::default();
    let agent = match Agent::new(conf, Arc::new(ExchangeEvaluator::new(store))) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("{e}; cannot continue");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.run(shutdown_rx).await })
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
    match run.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(e.into()),
    }
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
