//! # stratum-image
//!
//! Layer and image management for Stratum builds.
//!
//! Handles:
//! - **Hashing**: SHA-256 content digests, cache-key framing, and tree digests.
//! - **Snapshots**: Capturing a root filesystem and diffing it across a step.
//! - **Layers**: Deterministic tar.gz deltas with whiteouts, and replaying them.
//! - **Storage**: The content-addressed layer store and its cache index.
//! - **Manifests**: Ordered layers plus runtime metadata of a built image.
//! - **Registry**: Local image catalog management.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod hash;
pub mod layer;
pub mod manifest;
pub mod registry;
pub mod snapshot;
pub mod storage;
