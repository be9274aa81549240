// Public modules
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod message;
pub mod observability;
pub mod render;
pub mod responder;
pub mod session;
pub mod sse;
pub mod template;

#[cfg(test)]
mod testing;

// Re-exports
pub use client::{ChatModel, ChatRequest, FragmentStream, GenAiClient};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig, ConfigSource, ModelConfig};
pub use error::{Error, Result};
pub use message::{ConversationHistory, Message, Role};
pub use observability::register_biometrics;
pub use render::{PlainTextRenderer, Renderer, StreamedText, render_streamed_message};
pub use responder::{ContextProvider, MemoryPolicy, NoContext, Responder};
pub use session::{SessionContext, SessionController, SessionId, SessionStore};
pub use template::PromptTemplate;
