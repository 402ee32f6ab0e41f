pub mod auth;
pub mod core;
pub mod reports;
pub mod roster;
pub mod scan;
pub mod seed;
pub mod sessions;
pub mod setup;
