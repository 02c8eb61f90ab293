pub mod aggregate;
pub mod executor;
pub mod llm;
pub mod loader;
pub mod normalizer;
pub mod page_executor;
pub mod progress;
pub mod prompt;
pub mod scheduler;
pub mod service;
pub mod token_gate;
pub mod workflow;
