//! Shared fixtures for HTTP-backed tests

pub mod mock_server;
