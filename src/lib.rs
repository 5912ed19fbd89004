pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod stream;
pub mod transport;

pub use client::{ChatCompletions, QwenClient};
pub use config::ClientConfig;
pub use error::QwenError;
pub use protocol::{
    ChatMessage, ChatRequest, ChatResponse, Choice, ContentBlock, FunctionCall, ResponseMessage,
    Role, StreamChunk, Usage,
};
pub use stream::{ChatStream, StreamHandle};
