//! Farol API - shared data models, wire constants, and validation
//!
//! This crate defines the model types exchanged between clients, servers,
//! and cluster peers: service instances and snapshots, config records and
//! their gray variants, and the distro replication envelopes.

pub mod config;
pub mod distro;
pub mod model;
pub mod naming;
pub mod validation;
