pub mod approvers;
pub mod config;
pub mod directory;
pub mod error;
pub mod event;
pub mod item;
pub mod items;
pub mod lookup;
pub mod offer;
pub mod read_model;
pub mod repository;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;
pub mod validation;
