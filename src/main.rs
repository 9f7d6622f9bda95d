use std::sync::Arc;

use dotenvy::dotenv;
use tracing::info;

use subscription_engine::infra::{
    app::create_app,
    error::InfraError,
    scheduler::Scheduler,
    setup::{init_app_state, init_tracing},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let app_state = init_app_state().await?;
    let bind_addr = app_state.config.bind_addr;

    let scheduler = Arc::new(Scheduler::new(
        app_state.reconciliation.clone(),
        app_state.clock.clone(),
        &app_state.config.daily_sweep_cron,
        &app_state.config.trial_sweep_cron,
        &app_state.config.analytics_sweep_cron,
    )?);
    scheduler.start().await;

    let app = create_app(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(InfraError::TcpBind)?;

    info!("Backend listening at {}", &listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await
        .map_err(InfraError::Server)?;

    scheduler.shutdown().await;

    Ok(())
}
