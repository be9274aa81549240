//! Turns a user question into a streamed answer from the remote model.
//!
//! The [`Responder`] fills a [`PromptTemplate`] with the question (and, when a
//! [`ContextProvider`] supplies it, retrieved context), hands the prompt to a
//! [`ChatModel`], and returns the model's fragments untouched.  It never
//! retries; a failed request is the caller's to handle.

use tracing::{debug, info, warn};

use crate::client::{ChatModel, ChatRequest, FragmentStream};
use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::observability::{RESPONDER_FAILURES, RESPONDER_GENERATIONS};
use crate::template::{CONTEXT, PromptTemplate, QUESTION};

/// Supplies extra context to bind into the prompt.
///
/// Retrieval-augmented answering plugs in here; the default [`NoContext`]
/// supplies nothing.
#[async_trait::async_trait]
pub trait ContextProvider: Send + Sync {
    /// Returns context relevant to `question`, or `None` if there is none.
    async fn context_for(&self, question: &str) -> Result<Option<String>>;
}

/// A context provider that never supplies context.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

#[async_trait::async_trait]
impl ContextProvider for NoContext {
    async fn context_for(&self, _: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// How much of the conversation the model sees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemoryPolicy {
    /// Only the filled prompt for the current question.
    #[default]
    QuestionOnly,
    /// Every prior turn followed by the filled prompt.
    FullHistory,
}

/// Produces streamed answers from a remote chat model.
pub struct Responder<M: ChatModel> {
    model: M,
    config: ModelConfig,
    template: PromptTemplate,
    context: Box<dyn ContextProvider>,
    memory: MemoryPolicy,
}

impl<M: ChatModel> Responder<M> {
    /// Creates a responder that binds only the question.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is incomplete.
    pub fn new(model: M, config: ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model,
            config,
            template: PromptTemplate::question_only(),
            context: Box::new(NoContext),
            memory: MemoryPolicy::QuestionOnly,
        })
    }

    /// Replaces the prompt template.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the template references a placeholder
    /// other than `question` or `context`, since nothing could ever bind it.
    pub fn with_template(mut self, template: PromptTemplate) -> Result<Self> {
        if let Some(unknown) = template
            .placeholders()
            .into_iter()
            .find(|name| *name != QUESTION && *name != CONTEXT)
        {
            return Err(Error::configuration(
                format!("prompt template placeholder {{{{{unknown}}}}} can never be bound"),
                Some(unknown.to_string()),
            ));
        }
        self.template = template;
        Ok(self)
    }

    /// Installs a context provider.
    pub fn with_context_provider(mut self, provider: impl ContextProvider + 'static) -> Self {
        self.context = Box::new(provider);
        self
    }

    /// Sets how much of the conversation the model sees.
    pub fn with_memory(mut self, memory: MemoryPolicy) -> Self {
        self.memory = memory;
        self
    }

    /// The model settings this responder is bound to.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// The active memory policy.
    pub fn memory(&self) -> MemoryPolicy {
        self.memory
    }

    /// Answers `question` without any prior turns.
    pub async fn generate(&self, question: &str) -> Result<FragmentStream> {
        self.generate_with_history(question, &[]).await
    }

    /// Answers `question`, given the turns that preceded it.
    ///
    /// `prior` is only sent to the model under [`MemoryPolicy::FullHistory`].
    ///
    /// # Errors
    ///
    /// Configuration errors for unbound placeholders; remote service errors
    /// if the model rejects the request.  Errors after streaming starts arrive
    /// as stream items.
    pub async fn generate_with_history(
        &self,
        question: &str,
        prior: &[Message],
    ) -> Result<FragmentStream> {
        info!("Generating response for the user query.");
        RESPONDER_GENERATIONS.click();
        let result = self.submit(question, prior).await;
        if let Err(err) = &result {
            RESPONDER_FAILURES.click();
            warn!(error = %err, "response generation failed");
        }
        result
    }

    async fn submit(&self, question: &str, prior: &[Message]) -> Result<FragmentStream> {
        let prompt = self.build_prompt(question).await?;
        let request = self.build_request(prompt, prior);
        debug!(
            messages = request.messages.len(),
            model = %self.config.inference_model_id,
            "submitting chat request"
        );
        self.model.stream_chat(&request).await
    }

    async fn build_prompt(&self, question: &str) -> Result<String> {
        let context = if self.template.references(CONTEXT) {
            self.context.context_for(question).await?
        } else {
            None
        };
        let mut bindings = vec![(QUESTION, question)];
        if let Some(context) = context.as_deref() {
            bindings.push((CONTEXT, context));
        }
        self.template.format(&bindings)
    }

    fn build_request(&self, prompt: String, prior: &[Message]) -> ChatRequest {
        let mut messages = match self.memory {
            MemoryPolicy::QuestionOnly => Vec::with_capacity(1),
            MemoryPolicy::FullHistory => prior.to_vec(),
        };
        messages.push(Message::user(prompt));
        ChatRequest {
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }
}
