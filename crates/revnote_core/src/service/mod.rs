//! Use-case services over the persistence boundary.

pub mod revision_service;
