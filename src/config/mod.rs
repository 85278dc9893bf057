// src/config/mod.rs
//! Configuration for the P2P client.

pub mod constants;
