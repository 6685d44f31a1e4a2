mod gateway;

pub use gateway::{LlmClient, LlmError, LlmMessage};
