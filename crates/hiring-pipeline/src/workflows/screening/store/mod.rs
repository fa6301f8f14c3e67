//! Repository and audit log implementations.

mod jsonl;
mod memory;

pub use jsonl::{read_events, JsonlAuditLog};
pub use memory::{MemoryAuditLog, MemoryNotifier, MemoryRepository};
