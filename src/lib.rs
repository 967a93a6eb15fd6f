pub mod app_state;
pub mod campaign_renderer;
pub mod campaigns;
pub mod configuration;
pub mod delivery_worker;
pub mod domain;
pub mod email_client;
pub mod routes;
pub mod startup;
pub mod storage;
pub mod subscriptions;
pub mod telemetry;
pub mod tracking;
pub mod utils;
