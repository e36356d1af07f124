//! Service implementations behind the orchestrator's injected traits

pub mod checkpoint;
pub mod providers;

pub use checkpoint::{JsonlCheckpointStore, MemoryCheckpointStore};
pub use providers::{
    registry_from_env, AnthropicClient, ChatCompletionsClient, GeminiClient,
};

#[cfg(test)]
mod tests;
