//! Core chat session management.
//!
//! A [`SessionContext`] owns the conversation for one connected front-end and
//! is passed explicitly to the [`SessionController`], which appends turns,
//! drives the renderer, and delegates answers to its [`Responder`].

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use serde_json::to_writer_pretty;
use tracing::{info, warn};

use crate::client::{ChatModel, GenAiClient};
use crate::config::{ConfigSource, ModelConfig};
use crate::error::{Error, Result};
use crate::message::{ConversationHistory, Message, Role};
use crate::observability::{SESSION_PARTIAL_TURNS, SESSION_TURN_DURATION, SESSION_TURNS};
use crate::render::{Renderer, StreamedText, render_streamed_message};
use crate::responder::{MemoryPolicy, Responder};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Identifies one connected front-end session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an externally assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocates an identifier unique within this process.
    pub fn generate() -> Self {
        let n = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        Self(format!("session-{}-{n}", std::process::id()))
    }

    /// The identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-session conversation state.
///
/// `rendered` counts the messages already shown, so re-initializing a session
/// never shows a message twice.
#[derive(Debug, Clone)]
pub struct SessionContext {
    id: SessionId,
    history: ConversationHistory,
    rendered: usize,
}

impl SessionContext {
    /// Creates a session with an empty history.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            history: ConversationHistory::new(),
            rendered: 0,
        }
    }

    /// The session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The conversation so far.
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Returns the number of messages in the conversation.
    pub fn message_count(&self) -> usize {
        self.history.len()
    }

    fn append(&mut self, message: Message) {
        self.history.push(message);
    }

    fn render_pending(&mut self, renderer: &mut dyn Renderer) {
        for message in &self.history.messages()[self.rendered..] {
            renderer.render_message(message.role(), message.content());
        }
        self.rendered = self.history.len();
    }

    /// Saves the conversation to `path` as pretty-printed JSON.
    pub fn save_transcript_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let transcript = TranscriptFile {
            version: 1,
            session: &self.id,
            messages: &self.history,
        };
        let file = File::create(path.as_ref())
            .map_err(|err| Error::io("failed to create transcript file", err))?;
        let writer = BufWriter::new(file);
        to_writer_pretty(writer, &transcript).map_err(|err| {
            Error::serialization("failed to serialize transcript", Some(Box::new(err)))
        })
    }
}

#[derive(Serialize)]
struct TranscriptFile<'a> {
    version: u8,
    session: &'a SessionId,
    messages: &'a ConversationHistory,
}

/// Sessions keyed by identifier.
///
/// Nothing crosses session boundaries; removing a session discards its
/// history.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<SessionId, SessionContext>,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `id`, creating an empty one if none exists.
    pub fn get_or_create(&mut self, id: &SessionId) -> &mut SessionContext {
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| SessionContext::new(id.clone()))
    }

    /// Returns the session for `id`, if it exists.
    pub fn get(&self, id: &SessionId) -> Option<&SessionContext> {
        self.sessions.get(id)
    }

    /// Ends a session, returning its final state.
    pub fn remove(&mut self, id: &SessionId) -> Option<SessionContext> {
        self.sessions.remove(id)
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Mediates between the UI surface and the responder for one session.
pub struct SessionController<M: ChatModel> {
    responder: Responder<M>,
}

impl SessionController<GenAiClient> {
    /// Initializes a session against the hosted inference service.
    pub fn connect(
        session: &mut SessionContext,
        source: &ConfigSource,
        memory: MemoryPolicy,
        renderer: &mut dyn Renderer,
    ) -> Result<Self> {
        Self::initialize(
            session,
            source,
            |config| {
                let client = GenAiClient::new(&config)?;
                Ok(Responder::new(client, config)?.with_memory(memory))
            },
            renderer,
        )
    }
}

impl<M: ChatModel> SessionController<M> {
    /// Wraps an already-built responder.
    pub fn new(responder: Responder<M>) -> Self {
        Self { responder }
    }

    /// Prepares a session for input.
    ///
    /// Renders every message not yet shown, then loads the model settings from
    /// `source` and hands them to `build` to construct the responder.  Calling
    /// this again on the same session renders nothing twice and leaves the
    /// history untouched.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the source is missing or malformed; no
    /// responder is constructed in that case.
    pub fn initialize<F>(
        session: &mut SessionContext,
        source: &ConfigSource,
        build: F,
        renderer: &mut dyn Renderer,
    ) -> Result<Self>
    where
        F: FnOnce(ModelConfig) -> Result<Responder<M>>,
    {
        session.render_pending(renderer);
        let config = source.load()?;
        info!(
            session = %session.id(),
            config = %source.path().display(),
            model = %config.inference_model_id,
            "starting chat session"
        );
        let responder = build(config)?;
        Ok(Self { responder })
    }

    /// The responder answering for this session.
    pub fn responder(&self) -> &Responder<M> {
        &self.responder
    }

    /// Renders the whole conversation again, e.g. after the screen was cleared.
    pub fn replay(&self, session: &SessionContext, renderer: &mut dyn Renderer) {
        for message in session.history() {
            renderer.render_message(message.role(), message.content());
        }
    }

    /// Handles one submitted input.
    ///
    /// This method:
    /// 1. Adds the user message to history and renders it
    /// 2. Asks the responder for a streamed answer
    /// 3. Renders fragments as they arrive
    /// 4. Adds the concatenated answer to history
    ///
    /// If the answer fails partway, whatever text arrived is still recorded as
    /// the assistant message, so the history keeps alternating, and the error
    /// is returned.  Nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns a validation error for the empty string (history untouched), or the
    /// configuration or remote service error that ended the answer.
    pub async fn handle_input(
        &self,
        session: &mut SessionContext,
        text: &str,
        renderer: &mut dyn Renderer,
    ) -> Result<()> {
        if text.is_empty() {
            return Err(Error::validation(
                "input must not be empty",
                Some("text".to_string()),
            ));
        }
        let start = Instant::now();

        session.append(Message::user(text));
        session.render_pending(renderer);

        let prior_len = session.message_count() - 1;
        let generated = self
            .responder
            .generate_with_history(text, &session.history().messages()[..prior_len])
            .await;
        let streamed = match generated {
            Ok(fragments) => render_streamed_message(renderer, fragments).await,
            Err(err) => StreamedText {
                text: String::new(),
                fragments: 0,
                error: Some(err),
            },
        };

        session.append(Message::new(Role::Assistant, streamed.text));
        // The stream itself was the rendering of the assistant message.
        session.rendered = session.message_count();

        SESSION_TURNS.click();
        SESSION_TURN_DURATION.add(start.elapsed().as_secs_f64());
        match streamed.error {
            Some(err) => {
                SESSION_PARTIAL_TURNS.click();
                warn!(
                    session = %session.id(),
                    fragments = streamed.fragments,
                    error = %err,
                    "answer ended early; keeping partial text"
                );
                Err(err)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::testing::{RecordingRenderer, Reply, ScriptedModel};

    const CONFIG: &str = "OCI:
  COMPARTMENT_OCID: ocid1.compartment.oc1..test
  AI:
    INFERENCE_MODEL: cohere.command-r-plus
    SERVICE_ENDPOINT: https://inference.example.com
";

    fn config_source(name: &str) -> ConfigSource {
        let dir: PathBuf =
            env::temp_dir().join(format!("incibot-session-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("app_config.test.yml");
        fs::write(&path, CONFIG).unwrap();
        ConfigSource::file(path)
    }

    fn start(
        name: &str,
        model: Arc<ScriptedModel>,
        session: &mut SessionContext,
        renderer: &mut RecordingRenderer,
    ) -> SessionController<Arc<ScriptedModel>> {
        SessionController::initialize(
            session,
            &config_source(name),
            |config| Responder::new(model, config),
            renderer,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn hello_then_again() {
        let model = Arc::new(ScriptedModel::new(vec![
            Reply::Fragments(vec!["Hi", " there"]),
            Reply::Fragments(vec!["Hello again"]),
        ]));
        let mut session = SessionContext::new(SessionId::new("s1"));
        let mut renderer = RecordingRenderer::default();
        let controller = start("hello", model, &mut session, &mut renderer);

        controller
            .handle_input(&mut session, "hello", &mut renderer)
            .await
            .unwrap();
        assert_eq!(
            session.history().messages(),
            &[Message::user("hello"), Message::assistant("Hi there")]
        );

        controller
            .handle_input(&mut session, "again", &mut renderer)
            .await
            .unwrap();
        assert_eq!(
            session.history().messages(),
            &[
                Message::user("hello"),
                Message::assistant("Hi there"),
                Message::user("again"),
                Message::assistant("Hello again"),
            ]
        );
        assert_eq!(
            renderer.events,
            vec![
                "user:hello",
                "start:assistant",
                "fragment:Hi",
                "fragment: there",
                "finish",
                "user:again",
                "start:assistant",
                "fragment:Hello again",
                "finish",
            ]
        );
    }

    #[tokio::test]
    async fn n_inputs_give_2n_alternating_messages() {
        let model = Arc::new(ScriptedModel::new(vec![
            Reply::Fragments(vec!["one"]),
            Reply::Fragments(vec![]),
            Reply::FailAfter(vec!["par"], Error::streaming("dropped", None)),
            Reply::Reject(Error::api(500, "down", None)),
            Reply::Fragments(vec!["five"]),
        ]));
        let mut session = SessionContext::new(SessionId::generate());
        let mut renderer = RecordingRenderer::default();
        let controller = start("alternate", model, &mut session, &mut renderer);

        for input in ["a", "b", "c", "d", "e"] {
            let _ = controller
                .handle_input(&mut session, input, &mut renderer)
                .await;
        }
        assert_eq!(session.message_count(), 10);
        for (i, message) in session.history().iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(message.role(), expected);
        }
        assert_eq!(session.history().messages()[3].content(), "");
        assert_eq!(session.history().messages()[5].content(), "par");
    }

    #[tokio::test]
    async fn partial_answer_kept_on_failure() {
        let model = Arc::new(ScriptedModel::new(vec![Reply::FailAfter(
            vec!["Inci", "dent management "],
            Error::streaming("connection reset", None),
        )]));
        let mut session = SessionContext::new(SessionId::new("s2"));
        let mut renderer = RecordingRenderer::default();
        let controller = start("partial", model, &mut session, &mut renderer);

        let err = controller
            .handle_input(&mut session, "What is incident management?", &mut renderer)
            .await
            .unwrap_err();
        assert!(err.is_remote_service());
        assert_eq!(
            session.history().last(),
            Some(&Message::assistant("Incident management "))
        );
    }

    #[tokio::test]
    async fn initialize_twice_renders_once() {
        let model = Arc::new(ScriptedModel::new(vec![Reply::Fragments(vec!["answer"])]));
        let mut session = SessionContext::new(SessionId::new("s3"));
        let mut renderer = RecordingRenderer::default();
        let controller = start("twice", model.clone(), &mut session, &mut renderer);
        controller
            .handle_input(&mut session, "question", &mut renderer)
            .await
            .unwrap();

        // A fresh front-end attaching to the same session sees prior turns once.
        let mut fresh = RecordingRenderer::default();
        let mut reattached = session.clone();
        reattached.rendered = 0;
        let _ = start("twice", model.clone(), &mut reattached, &mut fresh);
        let _ = start("twice", model, &mut reattached, &mut fresh);
        assert_eq!(fresh.events, vec!["user:question", "assistant:answer"]);
        assert_eq!(reattached.message_count(), 2);
    }

    #[tokio::test]
    async fn missing_config_builds_no_responder() {
        let mut session = SessionContext::new(SessionId::new("s4"));
        let mut renderer = RecordingRenderer::default();
        let mut built = false;
        let source = ConfigSource::file(env::temp_dir().join("incibot-no-such-config.yml"));
        let result = SessionController::initialize(
            &mut session,
            &source,
            |config| {
                built = true;
                Responder::new(ScriptedModel::default(), config)
            },
            &mut renderer,
        );
        match result {
            Ok(_) => panic!("expected a configuration error"),
            Err(err) => assert!(err.is_configuration()),
        }
        assert!(!built);
        assert_eq!(session.message_count(), 0);
    }

    #[tokio::test]
    async fn empty_input_rejected_without_touching_history() {
        let model = Arc::new(ScriptedModel::default());
        let mut session = SessionContext::new(SessionId::new("s5"));
        let mut renderer = RecordingRenderer::default();
        let controller = start("empty", model.clone(), &mut session, &mut renderer);
        let err = controller
            .handle_input(&mut session, "", &mut renderer)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(session.message_count(), 0);
        assert!(model.requests().is_empty());
        assert!(renderer.events.is_empty());
    }

    #[tokio::test]
    async fn whitespace_input_is_forwarded() {
        let model = Arc::new(ScriptedModel::new(vec![Reply::Fragments(vec!["?"])]));
        let mut session = SessionContext::new(SessionId::new("s8"));
        let mut renderer = RecordingRenderer::default();
        let controller = start("whitespace", model.clone(), &mut session, &mut renderer);
        controller
            .handle_input(&mut session, "  ", &mut renderer)
            .await
            .unwrap();
        assert_eq!(
            session.history().messages(),
            &[Message::user("  "), Message::assistant("?")]
        );
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn full_history_excludes_current_question() {
        let model = Arc::new(ScriptedModel::new(vec![
            Reply::Fragments(vec!["first"]),
            Reply::Fragments(vec!["second"]),
        ]));
        let mut session = SessionContext::new(SessionId::new("s6"));
        let mut renderer = RecordingRenderer::default();
        let build_model = model.clone();
        let controller = SessionController::initialize(
            &mut session,
            &config_source("memory"),
            |config| {
                Ok(Responder::new(build_model, config)?.with_memory(MemoryPolicy::FullHistory))
            },
            &mut renderer,
        )
        .unwrap();
        controller
            .handle_input(&mut session, "one", &mut renderer)
            .await
            .unwrap();
        controller
            .handle_input(&mut session, "two", &mut renderer)
            .await
            .unwrap();
        let requests = model.requests();
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[1].messages[0], Message::user("one"));
        assert_eq!(requests[1].messages[1], Message::assistant("first"));
    }

    #[test]
    fn store_creates_sessions_lazily_and_isolates_them() {
        let mut store = SessionStore::new();
        let a = SessionId::new("a");
        let b = SessionId::new("b");
        store.get_or_create(&a).append(Message::user("only in a"));
        assert_eq!(store.get_or_create(&a).message_count(), 1);
        assert_eq!(store.get_or_create(&b).message_count(), 0);
        assert_eq!(store.len(), 2);
        let ended = store.remove(&a).unwrap();
        assert_eq!(ended.message_count(), 1);
        assert!(store.get(&a).is_none());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn transcript_round_trips_as_json() {
        let mut session = SessionContext::new(SessionId::new("s7"));
        session.append(Message::user("hello"));
        session.append(Message::assistant("hi"));
        let path = env::temp_dir().join(format!("incibot-transcript-{}.json", std::process::id()));
        session.save_transcript_to(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["session"], "s7");
        assert_eq!(value["messages"][1]["role"], "assistant");
        assert_eq!(value["messages"][1]["content"], "hi");
    }
}
