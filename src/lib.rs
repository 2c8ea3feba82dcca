pub mod config;
pub mod lifecycle;
pub mod proxy;
pub mod publisher;
pub mod render;
pub mod web;
