pub mod configuration;
pub mod delivery_worker;
pub mod domain;
pub mod fanout_worker;
pub mod queue;
pub mod routes;
pub mod signing;
pub mod startup;
pub mod store;
pub mod telemetry;
pub mod webhook_client;
