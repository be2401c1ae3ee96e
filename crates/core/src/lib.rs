//! Domain types and pure logic for the vidgen ComfyUI job worker.
//!
//! Covers job input normalization, the workflow graph document, the
//! parameter injector that patches a template before submission, and
//! the fixed-interval retry helper shared by the network layers.

pub mod dimensions;
pub mod error;
pub mod injector;
pub mod params;
pub mod retry;
pub mod workflow;
