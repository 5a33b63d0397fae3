pub mod admin;
pub mod auth;
pub mod categories;
pub mod leads;
pub mod orders;
pub mod products;
pub mod reviews;
pub mod seller;
