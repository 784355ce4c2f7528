//! tests/mod.rs
mod support;

mod handler_tests;
mod poller_tests;
