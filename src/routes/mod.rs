//! Route table for the object façade.

pub mod routes;
