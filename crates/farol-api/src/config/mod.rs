//! Config API models

pub mod model;
