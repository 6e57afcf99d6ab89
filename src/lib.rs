pub mod analyzer;
pub mod api;
pub mod catalog;
pub mod client;
pub mod config;
pub mod crawler;
pub mod data_models;
pub mod db;
pub mod error;
pub mod indexer;
pub mod inspect;
pub mod query_engine;
