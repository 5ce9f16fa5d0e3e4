pub mod config;
pub mod error;
pub mod normalize;
pub mod platform;
pub mod poll;
pub mod protocol;
pub mod registry;
pub mod sources;
pub mod state;
pub mod store;
