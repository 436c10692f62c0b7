//! Ports to external systems
//!
//! The engine talks to three external collaborators through trait objects:
//! - [`LlmPort`]: the chat + tool-use LLM API
//! - [`MemoryPort`]: the content-addressed memory store
//! - [`FsPort`]: the filesystem and subprocess surface used by executor tools
//!
//! Ports surface their native errors; the agents wrap them with error
//! context before reporting to callers. All ports are assumed internally
//! task-safe and may be accessed concurrently.

pub mod fs;
pub mod llm;
pub mod memory;

pub use fs::{CommandOutput, EditOutput, FsPort, LocalFs, ReadOutput, WriteOutput};
pub use llm::{
    AnthropicClient, ChatMessage, ChatResponse, ContentBlock, LlmConfig, LlmPort, Role,
    StopReason, TokenUsage, ToolSpec,
};
pub use memory::{InMemoryStore, MemoryPort, MemoryRecord, StoredMemory};
