//! Distro protocol API models

pub mod model;
