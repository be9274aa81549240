//! Output rendering for the chat front-end.
//!
//! The session controller never writes to a terminal directly; it drives a
//! [`Renderer`].  [`PlainTextRenderer`] is the terminal implementation, with
//! optional ANSI styling for role labels and errors.

use std::io::{self, Stdout, Write};

use futures::StreamExt;

use crate::client::FragmentStream;
use crate::error::Error;
use crate::message::Role;

/// ANSI escape code for bold text (used for role labels).
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code for cyan text (used for the user label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for the assistant label).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for dim text (used for informational output).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// Trait for rendering the conversation.
pub trait Renderer: Send {
    /// Render a complete message.
    fn render_message(&mut self, role: Role, content: &str);

    /// Called before the first fragment of a streamed message.
    fn start_stream(&mut self, role: Role) {
        _ = role;
    }

    /// Print one fragment of a streamed message.
    ///
    /// This is called incrementally, in arrival order, as the model streams.
    fn print_fragment(&mut self, text: &str);

    /// Called once a streamed message is complete or has failed.
    fn finish_stream(&mut self) {}

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);
}

/// The outcome of rendering a streamed message.
#[derive(Debug, Clone)]
pub struct StreamedText {
    /// Every fragment received, concatenated in arrival order.
    pub text: String,
    /// Number of fragments received.
    pub fragments: usize,
    /// The error that ended the stream early, if any.
    pub error: Option<Error>,
}

/// Renders a fragment stream as one assistant message and returns the text.
///
/// The stream is drained until it ends or yields an error.  On error the text
/// accumulated so far is still returned alongside the error.
pub async fn render_streamed_message(
    renderer: &mut dyn Renderer,
    mut fragments: FragmentStream,
) -> StreamedText {
    let mut streamed = StreamedText {
        text: String::new(),
        fragments: 0,
        error: None,
    };
    renderer.start_stream(Role::Assistant);
    while let Some(fragment) = fragments.next().await {
        match fragment {
            Ok(text) => {
                renderer.print_fragment(&text);
                streamed.text.push_str(&text);
                streamed.fragments += 1;
            }
            Err(err) => {
                streamed.error = Some(err);
                break;
            }
        }
    }
    renderer.finish_stream();
    streamed
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
        }
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn label(&self, role: Role) -> String {
        let (name, color) = match role {
            Role::User => ("You", ANSI_CYAN),
            Role::Assistant => ("Bot", ANSI_GREEN),
        };
        if self.use_color {
            format!("{ANSI_BOLD}{color}{name}:{ANSI_RESET}")
        } else {
            format!("{name}:")
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn render_message(&mut self, role: Role, content: &str) {
        let label = self.label(role);
        println!("{label} {content}");
        self.flush();
    }

    fn start_stream(&mut self, role: Role) {
        let label = self.label(role);
        print!("{label} ");
        self.flush();
    }

    fn print_fragment(&mut self, text: &str) {
        print!("{text}");
        self.flush();
    }

    fn finish_stream(&mut self) {
        println!();
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        if self.use_color {
            eprintln!("{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("Error: {error}");
        }
    }

    fn print_info(&mut self, info: &str) {
        if self.use_color {
            println!("{ANSI_DIM}{info}{ANSI_RESET}");
        } else {
            println!("{info}");
        }
        self.flush();
    }
}
