pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod gateway;
pub mod hub;
pub mod members;
pub mod messages;
pub mod model;
pub mod rooms;
pub mod service;

pub use error::{ChatError, ChatResult};
pub use service::ChatService;
