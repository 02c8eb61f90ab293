//! Scripted language model for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{ChatMessage, Completion, CompletionFailure, CompletionOptions, LanguageModel};

type Responder = dyn Fn(&[ChatMessage]) -> Result<Completion, CompletionFailure> + Send + Sync;

enum Script {
    Queue(Mutex<VecDeque<Result<Completion, CompletionFailure>>>),
    Function(Box<Responder>),
}

/// Language model returning scripted responses, one per call.
pub struct ScriptedModel {
    script: Script,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    /// Responses are consumed in call order. Calls past the end fail.
    pub fn new(responses: Vec<Result<Completion, CompletionFailure>>) -> Self {
        Self::with_script(Script::Queue(Mutex::new(responses.into())))
    }

    /// Every call answered by `respond`.
    pub fn from_fn(
        respond: impl Fn(&[ChatMessage]) -> Result<Completion, CompletionFailure> + Send + Sync + 'static,
    ) -> Self {
        Self::with_script(Script::Function(Box::new(respond)))
    }

    /// Every call returns the same text.
    pub fn always(output: &str) -> Self {
        let output = output.to_string();
        Self::from_fn(move |_| Ok(text(&output)))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Message lists received so far, in call order.
    pub fn received(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Successful completion without usage.
pub fn text(output: &str) -> Completion {
    Completion {
        output: output.to_string(),
        usage: None,
    }
}

pub fn http_failure(status: u16) -> CompletionFailure {
    CompletionFailure::Http {
        status,
        message: format!("OpenRouter request failed with status {status}"),
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(
        &self,
        messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<Completion, CompletionFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        match &self.script {
            Script::Function(respond) => respond(messages),
            Script::Queue(queue) => queue
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or_else(|| {
                    Err(CompletionFailure::InvalidResponse(
                        "No scripted response left".into(),
                    ))
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_consumed_in_order() {
        let model = ScriptedModel::new(vec![Ok(text("a")), Err(http_failure(503))]);
        let options = CompletionOptions::default();
        assert_eq!(model.complete(&[], &options).unwrap().output, "a");
        assert_eq!(model.complete(&[], &options).unwrap_err().status(), Some(503));
        assert!(model.complete(&[], &options).is_err());
        assert_eq!(model.call_count(), 3);
    }

    #[test]
    fn records_messages() {
        let model = ScriptedModel::always("{}");
        model
            .complete(&[ChatMessage::system("hi")], &CompletionOptions::default())
            .unwrap();
        assert_eq!(model.received()[0][0].content.text(), "hi");
    }
}
