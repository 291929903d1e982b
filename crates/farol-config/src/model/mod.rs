//! Config service models

pub mod gray_rule;
