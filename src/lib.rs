//! Guardline: one age-aware safety policy per child, fanned out to
//! third-party parental-control platforms and compiled into a declarative
//! bundle for on-device agents.

pub mod adapters;
pub mod api;
pub mod compiler;
pub mod config;
pub mod db;
pub mod enforcement;
pub mod models;
pub mod repository;
