//! Naming API models

pub mod model;
