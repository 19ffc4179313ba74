//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod api_server;
