use anyhow::Context;
use newsletter_delivery::{
    configuration::get_configuration,
    delivery_worker::run_worker_until_stopped,
    startup::{get_connection_pool, Application},
    storage::{PgStore, Stores},
    telemetry::{get_subscriber, init_subscriber},
};
use std::fmt::{Debug, Display};
use tokio::task::JoinError;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("newsletter_delivery".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber)?;

    let config = get_configuration().context("Failed to read configuration")?;
    let db_pool = get_connection_pool(&config.database);
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to migrate the database")?;

    let stores = Stores::postgres(PgStore::new(db_pool.clone()));
    let application = Application::build(&config, stores.clone()).await?;

    let application_task = tokio::spawn(application.run_until_stopped());
    let worker_task = tokio::spawn(run_worker_until_stopped(config, stores));

    tokio::select! {
        outcome = application_task => report_exit("API", outcome),
        outcome = worker_task => report_exit("Delivery worker", outcome),
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    db_pool.close().await;

    Ok(())
}

fn report_exit(task_name: &str, outcome: Result<Result<(), impl Debug + Display>, JoinError>) {
    match outcome {
        Ok(Ok(())) => tracing::info!("{task_name} has exited"),
        Ok(Err(e)) => tracing::error!(
            error.cause_chain = ?e,
            error.message = %e,
            "{task_name} failed"
        ),
        Err(e) => tracing::error!(
            error.cause_chain = ?e,
            error.message = %e,
            "{task_name} task failed to complete"
        ),
    }
}
