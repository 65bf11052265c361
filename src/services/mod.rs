//! Storage capability consumed by the HTTP handlers.

pub mod storage_service;
