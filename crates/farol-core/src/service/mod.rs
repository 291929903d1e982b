//! Core services

pub mod cluster;
pub mod distro;
pub mod ring;
