pub mod annotation;
pub mod app;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod input;
pub mod mapper;
pub mod output;
pub mod uniprot;
