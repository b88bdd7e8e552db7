pub mod aggregate;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
mod http;
pub mod image;
pub mod isa;
pub mod metaspace;
pub mod object_store;
pub mod output;
pub mod resolver;
pub mod retrieval;
pub mod sample;
pub mod session;
pub mod sink;
pub mod study;
