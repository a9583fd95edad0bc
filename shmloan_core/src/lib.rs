//! # shmloan
//!
//! Cross-process shared-memory buffer hand-off for cooperating processes on
//! one host. One process allocates a buffer, hands it to another process
//! without copying its contents, and both sides release it safely and exactly
//! once — with no live message channel between them for reference counting.
//!
//! The crate provides the fundamental building blocks:
//!
//! - **SharedBuffer**: a typed view over a named shared-memory segment, with
//!   ownership tracking and the transfer protocol
//! - **TransferDescriptor**: the small serializable record that crosses the
//!   process boundary (no handles, no pointers)
//! - **ReleaseCollector**: a process-wide registry that finalizes buffers
//!   whose ownership was transferred out, once the remote side signals it is
//!   finished
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shmloan_core::{ElementKind, ReleaseCollector, SharedBuffer};
//!
//! let collector = Arc::new(ReleaseCollector::new());
//! let mut buffer = SharedBuffer::allocate(ElementKind::F32, 1024, collector).unwrap();
//! buffer.view_mut::<f32>().unwrap().fill(1.0);
//!
//! // Send the descriptor to the consumer process over any transport.
//! let descriptor = buffer.prepare_for_transfer().unwrap();
//! let encoded = serde_json::to_string(&descriptor).unwrap();
//! # let _ = encoded;
//! ```
//!
//! The consumer calls [`SharedBuffer::resume_from_transfer`] with the decoded
//! descriptor and gets the same `view()`/`len()` contract as the producer.

pub mod error;
pub mod memory;

// Re-export commonly used types for easy access
pub use error::{LoanError, LoanResult};
pub use memory::buffer::{ElementKind, SharedBuffer, TransferDescriptor};
pub use memory::collector::ReleaseCollector;
