//! HTTP request handlers.

pub mod object_handlers;
