//! # Shared memory for shmloan
//!
//! This module provides the shared-memory core:
//!
//! - **ShmSegment**: one named cross-process memory region, backed by a
//!   memory-mapped file under a platform-appropriate path
//! - **SegmentPair**: deterministic data/flag segment naming and paired
//!   allocation from a single buffer id
//! - **SharedBuffer**: the public buffer type with the hand-off protocol
//! - **ReleaseCollector**: deferred destruction of segments still referenced
//!   by a remote process
//!
//! ## Memory Safety
//!
//! The payload is never synchronized internally. The single-byte release flag
//! is the only cross-process mutable state the protocol itself touches, and
//! it is accessed through atomics with acquire/release ordering.

pub mod buffer;
pub mod collector;
pub mod platform;
pub mod segment;

pub use buffer::{ElementKind, SharedBuffer, TransferDescriptor};
pub use collector::ReleaseCollector;
pub use segment::{SegmentPair, ShmSegment};
