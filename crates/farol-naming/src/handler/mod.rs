//! Replication handlers

pub mod distro;
