//! Use-case orchestration over the repositories.

pub mod pipeline_service;
