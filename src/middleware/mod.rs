pub mod auth;
pub mod cache;
pub mod client;
pub mod csrf;
pub mod rate_limit;
pub mod timing;
