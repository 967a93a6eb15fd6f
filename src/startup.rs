use crate::{
    app_state::AppState,
    campaigns::CampaignManager,
    configuration::{DatabaseSettings, Settings},
    routes::{
        admin, health_check, subscriptions, subscriptions_confirm, subscriptions_unsubscribe,
        tracking, webhooks,
    },
    storage::Stores,
    subscriptions::SubscriptionManager,
    telemetry::{request_span, RequestUuid},
    tracking::Tracker,
};
use anyhow::Context;
use axum::Router;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

pub struct Application {
    address: SocketAddr,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Binds the listener and wires the HTTP surface on top of `stores`.
    pub async fn build(config: &Settings, stores: Stores) -> Result<Self, anyhow::Error> {
        let address = format!("{}:{}", config.application.host, config.application.port);
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind {address}"))?;
        let address = listener.local_addr()?;

        let links = config.application.tracking_links()?;
        let transport = Arc::new(config.email_client.client()?);

        let app_state = AppState {
            campaigns: CampaignManager::new(&stores, &config.campaigns),
            subscriptions: SubscriptionManager::new(&stores, transport, links),
            tracker: Tracker::new(&stores, config.application.link_signer()?),
        };

        Ok(Self {
            address,
            listener,
            router: router(app_state),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        tracing::info!(address = %self.address, "Listening");
        axum::serve(self.listener, self.router).await
    }
}

fn router(app_state: AppState) -> Router {
    Router::new()
        .merge(health_check::router())
        .merge(subscriptions::router())
        .merge(subscriptions_confirm::router())
        .merge(subscriptions_unsubscribe::router())
        .merge(tracking::router())
        .merge(webhooks::router())
        .merge(admin::router())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(RequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(app_state)
}

/// Connections are opened on first use.
pub fn get_connection_pool(config: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(config.with_db())
}
