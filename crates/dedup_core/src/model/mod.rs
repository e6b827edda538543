//! Record, pair and cluster model shared by normalization and resolution.
//!
//! # Responsibility
//! - Define the identity of a record across one or two sources.
//! - Define the shapes exchanged with the external matcher and the golden table.
//!
//! # Invariants
//! - `RecordId` is `<source_tag>:<local_id>` and globally unique per dataset.
//! - Normalization never writes back to raw records.

pub mod cluster;
pub mod pair;
pub mod record;
