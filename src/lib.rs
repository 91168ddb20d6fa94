pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod geo;
pub mod http;
pub mod normalize;
pub mod obis;
pub mod output;
pub mod store;
pub mod worms;
