pub mod auth;
pub mod banks;
pub mod utils;
pub mod wallet;
pub mod webhook;
