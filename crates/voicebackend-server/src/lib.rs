//! Library surface exposing the HTTP server for the binary entry point and
//! for black-box integration tests.

pub mod server;
