//! Scripted invoker for tests
//!
//! Replies are chosen by service and, optionally, by a substring of the
//! user prompt. Every call is recorded so tests can assert on what was sent.

use std::sync::Mutex;

use super::{AiInvoker, Invocation};
use crate::{Error, Result, ServiceKind};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

#[derive(Debug, Clone)]
struct Rule {
    service: ServiceKind,
    prompt_contains: Option<String>,
    reply: Reply,
}

/// An `AiInvoker` with canned replies
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `text` to any call to `service` not matched by a more specific rule
    pub fn respond(self, service: ServiceKind, text: impl Into<String>) -> Self {
        self.push(Rule {
            service,
            prompt_contains: None,
            reply: Reply::Text(text.into()),
        })
    }

    /// Reply with `text` when the user prompt contains `needle`
    pub fn respond_when(
        self,
        service: ServiceKind,
        needle: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.push(Rule {
            service,
            prompt_contains: Some(needle.into()),
            reply: Reply::Text(text.into()),
        })
    }

    /// Fail every call to `service` with an upstream error
    pub fn fail(self, service: ServiceKind, message: impl Into<String>) -> Self {
        self.push(Rule {
            service,
            prompt_contains: None,
            reply: Reply::Fail(message.into()),
        })
    }

    fn push(self, rule: Rule) -> Self {
        self.rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(rule);
        self
    }

    /// Every invocation received so far, in order
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self, service: ServiceKind) -> usize {
        self.calls().iter().filter(|c| c.service == service).count()
    }
}

#[async_trait::async_trait]
impl AiInvoker for ScriptedInvoker {
    async fn invoke(&self, invocation: &Invocation) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(invocation.clone());

        let rules = self
            .rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        // Prompt-specific rules win over catch-all rules for the same service
        let matched = rules
            .iter()
            .filter(|r| r.service == invocation.service)
            .find(|r| {
                r.prompt_contains
                    .as_deref()
                    .is_some_and(|needle| invocation.user_prompt.contains(needle))
            })
            .or_else(|| {
                rules
                    .iter()
                    .find(|r| r.service == invocation.service && r.prompt_contains.is_none())
            });

        match matched.map(|r| &r.reply) {
            Some(Reply::Text(text)) => Ok(text.clone()),
            Some(Reply::Fail(message)) => Err(Error::upstream(invocation.service, message.clone())),
            None => Err(Error::upstream(
                invocation.service,
                "no scripted reply for this service",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_specific_rule_wins() {
        let invoker = ScriptedInvoker::new()
            .respond(ServiceKind::Logic, "generic")
            .respond_when(ServiceKind::Logic, "gardener", "specific");

        let generic = Invocation::new(ServiceKind::Logic, "m", "", "hello");
        let specific = Invocation::new(ServiceKind::Logic, "m", "", "the gardener did it");

        assert_eq!(invoker.invoke(&generic).await.unwrap(), "generic");
        assert_eq!(invoker.invoke(&specific).await.unwrap(), "specific");
        assert_eq!(invoker.call_count(ServiceKind::Logic), 2);
    }

    #[tokio::test]
    async fn test_failure_and_missing_rule() {
        let invoker = ScriptedInvoker::new().fail(ServiceKind::Image, "quota exhausted");

        let err = invoker
            .invoke(&Invocation::new(ServiceKind::Image, "m", "", "p"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { service: ServiceKind::Image, .. }));

        let err = invoker
            .invoke(&Invocation::new(ServiceKind::Storyteller, "m", "", "p"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no scripted reply"));
    }
}
