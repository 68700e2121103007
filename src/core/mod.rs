//! Core modules for the pipeline control plane.
//!
//! Shared primitives every stage builds on: the store handle, database
//! access, parameter variants, interval math, the engine and workspace
//! capability seams, the artifact store, and the access gate.

pub mod access;
pub mod artifacts;
pub mod broker;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod intervals;
pub mod params;
pub mod schemas;
pub mod store;
pub mod workspace;
