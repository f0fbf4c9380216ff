//! SMS and USSD wallet service: a conversational transaction engine over a
//! Postgres ledger, fronted by gateway webhooks and a small dashboard API.

pub mod db;
pub mod engine;
pub mod error;
pub mod providers;
pub mod routes;
