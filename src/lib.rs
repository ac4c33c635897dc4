pub mod auth;
pub mod config;
pub mod decide;
pub mod driver;
pub mod model;
pub mod orchestrator;
pub mod otp;
pub mod source;
