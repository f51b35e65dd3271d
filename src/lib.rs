pub mod cache;
pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod index;
pub mod model;
pub mod pending;
pub mod propagate;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod transport;
