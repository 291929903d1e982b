//! Config services

pub mod config;
pub mod longpoll;
