use habitflow::billing::{PriceTable, StripeClient};
use habitflow::{AppState, Config, FileStore, router};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env()?;
    let store = FileStore::open(&config.data_path).await?;
    info!("data directory: {}", config.data_path.display());

    let stripe = StripeClient::new(&config.stripe)?;
    let prices = PriceTable::resolve(&stripe, &config.stripe.products()).await;
    if config.stripe.webhook_secret.is_none() {
        warn!("STRIPE_WEBHOOK_SECRET not set; webhooks will be rejected");
    }
    let plans: Vec<_> = prices.plans().map(|plan| plan.as_str()).collect();
    if plans.is_empty() {
        warn!("no prices loaded; check product ids");
    } else {
        info!("prices loaded: {}", plans.join(", "));
    }

    let addr = config.socket_addr();
    let state = AppState::new(config, Arc::new(store), Arc::new(stripe), prices);
    let app = router(state);

    info!("listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
