pub mod action_parser;
pub mod image;
pub mod model;
pub mod normalize;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;
