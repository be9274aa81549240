//! Test doubles for the model and the UI surface.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::stream;

use crate::client::{ChatModel, ChatRequest, FragmentStream};
use crate::error::{Error, Result};
use crate::message::Role;
use crate::render::Renderer;

/// What the model does for one request.
pub(crate) enum Reply {
    /// Stream the fragments, then complete.
    Fragments(Vec<&'static str>),
    /// Stream the fragments, then fail.
    FailAfter(Vec<&'static str>, Error),
    /// Refuse the request outright.
    Reject(Error),
}

/// A model that plays back scripted replies and records every request.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub(crate) fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChatModel for ScriptedModel {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Fragments(Vec::new()));
        let items: Vec<Result<String>> = match reply {
            Reply::Fragments(fragments) => {
                fragments.into_iter().map(|f| Ok(f.to_string())).collect()
            }
            Reply::FailAfter(fragments, err) => fragments
                .into_iter()
                .map(|f| Ok(f.to_string()))
                .chain(std::iter::once(Err(err)))
                .collect(),
            Reply::Reject(err) => return Err(err),
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

/// A renderer that records every call as a short string.
#[derive(Default)]
pub(crate) struct RecordingRenderer {
    pub(crate) events: Vec<String>,
}

impl Renderer for RecordingRenderer {
    fn render_message(&mut self, role: Role, content: &str) {
        self.events.push(format!("{role}:{content}"));
    }

    fn start_stream(&mut self, role: Role) {
        self.events.push(format!("start:{role}"));
    }

    fn print_fragment(&mut self, text: &str) {
        self.events.push(format!("fragment:{text}"));
    }

    fn finish_stream(&mut self) {
        self.events.push("finish".to_string());
    }

    fn print_error(&mut self, error: &str) {
        self.events.push(format!("error:{error}"));
    }

    fn print_info(&mut self, info: &str) {
        self.events.push(format!("info:{info}"));
    }
}
