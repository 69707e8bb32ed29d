//! Reply decision loop
//!
//! One polling cycle: enumerate candidate messages, decide per thread
//! whether a reply is owed, and trigger the send + label side effects.
//! A thread is owed a reply exactly when none of its messages carries the
//! provider's outbound marker; that marker is the only cross-cycle
//! deduplication state, so the provider's label semantics are authoritative.
//!
//! All failures stop at the cycle boundary: [`run_cycle`] logs and returns
//! normally so the scheduler is never blocked.

use tracing::{debug, error, info};

use crate::compose::compose_reply;
use crate::config::BotConfig;
use crate::errors::AppResult;
use crate::gmail::MailProvider;
use crate::models::Thread;

/// Provider label id marking a message as sent from this mailbox
pub const SENT_LABEL_ID: &str = "SENT";

/// What a cycle did, for operator logging and tests
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Candidate messages returned by the search query
    pub candidates: usize,
    /// Replies actually sent this cycle
    pub replies_sent: usize,
    /// Whether the cycle was cut short by an error
    pub failed: bool,
}

/// Run one polling cycle to completion
///
/// Never propagates an error: the first failure aborts the remaining
/// per-candidate work for this cycle, is logged, and the cycle still counts
/// as complete for scheduling purposes. The next scheduled cycle is the
/// implicit retry mechanism.
pub async fn run_cycle<P: MailProvider>(provider: &P, config: &BotConfig) -> CycleOutcome {
    let mut outcome = CycleOutcome::default();
    match cycle_impl(provider, config, &mut outcome).await {
        Ok(()) => {
            info!(
                candidates = outcome.candidates,
                replies = outcome.replies_sent,
                "cycle complete"
            );
        }
        Err(err) => {
            outcome.failed = true;
            error!(
                error = %err,
                candidates = outcome.candidates,
                replies = outcome.replies_sent,
                "cycle aborted"
            );
        }
    }
    outcome
}

/// Fallible body of a cycle
///
/// Candidates are processed sequentially in provider order; `?` on any step
/// abandons the rest of the batch.
async fn cycle_impl<P: MailProvider>(
    provider: &P,
    config: &BotConfig,
    outcome: &mut CycleOutcome,
) -> AppResult<()> {
    let candidates = provider.list_messages(&config.search_query).await?;
    outcome.candidates = candidates.len();

    for candidate in &candidates {
        let thread = provider.get_thread(&candidate.thread_id).await?;
        if has_prior_reply(&thread) {
            debug!(thread_id = %candidate.thread_id, "thread already replied, skipping");
            continue;
        }

        let (subject, from) = candidate_headers(&thread, &candidate.id);
        let raw = compose_reply(&subject, &from, &config.reply_body);
        provider.send_reply(&candidate.thread_id, &raw).await?;

        let label_id = ensure_label(provider, &config.label_name).await?;
        provider.add_labels(&candidate.id, &[label_id]).await?;
        outcome.replies_sent += 1;
        info!(
            message_id = %candidate.id,
            thread_id = %candidate.thread_id,
            "auto-reply sent and labeled"
        );
    }
    Ok(())
}

/// Whether any message in the thread carries the outbound marker
fn has_prior_reply(thread: &Thread) -> bool {
    thread
        .messages
        .iter()
        .any(|m| m.label_ids.iter().any(|l| l == SENT_LABEL_ID))
}

/// Resolve the subject and sender of a candidate from its thread
///
/// Prefers the candidate's own message, falling back to the first message
/// of the thread. Missing headers resolve to empty strings; an empty thread
/// still gets a reply.
fn candidate_headers(thread: &Thread, message_id: &str) -> (String, String) {
    let message = thread
        .messages
        .iter()
        .find(|m| m.id == message_id)
        .or_else(|| thread.messages.first());
    let header = |name: &str| {
        message
            .and_then(|m| m.header(name))
            .unwrap_or_default()
            .to_owned()
    };
    (header("Subject"), header("From"))
}

/// Resolve the configured label's id, creating the label iff absent
///
/// `list_labels` is consulted before `create_label`, so an existing label is
/// never duplicated.
async fn ensure_label<P: MailProvider>(provider: &P, name: &str) -> AppResult<String> {
    if let Some(label) = provider
        .list_labels()
        .await?
        .into_iter()
        .find(|l| l.name == name)
    {
        return Ok(label.id);
    }
    Ok(provider.create_label(name).await?.id)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use secrecy::SecretString;

    use super::{CycleOutcome, run_cycle};
    use crate::config::BotConfig;
    use crate::errors::{AppError, AppResult};
    use crate::gmail::MailProvider;
    use crate::models::{Header, Label, MessageRef, Payload, SendAck, Thread, ThreadMessage};

    fn test_config() -> BotConfig {
        BotConfig {
            client_id: "client".to_owned(),
            client_secret: SecretString::new("secret".into()),
            refresh_token: Some(SecretString::new("refresh".into())),
            search_query: "is:unread -from:me".to_owned(),
            reply_body: "Auto-reply: Thanks for your email!".to_owned(),
            label_name: "Auto-Replied".to_owned(),
            delay_min_ms: 45_000,
            delay_max_ms: 120_000,
            http_timeout_ms: 30_000,
            oauth_port: 4000,
            redirect_uri: "http://localhost:4000/oauth2callback".to_owned(),
        }
    }

    fn message(id: &str, labels: &[&str], subject: &str, from: &str) -> ThreadMessage {
        ThreadMessage {
            id: id.to_owned(),
            label_ids: labels.iter().map(|l| (*l).to_owned()).collect(),
            payload: Some(Payload {
                headers: vec![
                    Header {
                        name: "Subject".to_owned(),
                        value: subject.to_owned(),
                    },
                    Header {
                        name: "From".to_owned(),
                        value: from.to_owned(),
                    },
                ],
            }),
        }
    }

    /// In-memory provider recording every side-effecting call
    #[derive(Default)]
    struct FakeProvider {
        candidates: Vec<MessageRef>,
        threads: HashMap<String, Thread>,
        labels: Vec<Label>,
        fail_list: bool,
        fail_thread: Option<String>,
        sent: Mutex<Vec<(String, String)>>,
        created: Mutex<Vec<String>>,
        labeled: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl FakeProvider {
        fn with_candidate(mut self, id: &str, thread_id: &str, thread: Thread) -> Self {
            self.candidates.push(MessageRef {
                id: id.to_owned(),
                thread_id: thread_id.to_owned(),
            });
            self.threads.insert(thread_id.to_owned(), thread);
            self
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().expect("sent lock").clone()
        }

        fn created(&self) -> Vec<String> {
            self.created.lock().expect("created lock").clone()
        }

        fn labeled(&self) -> Vec<(String, Vec<String>)> {
            self.labeled.lock().expect("labeled lock").clone()
        }
    }

    impl MailProvider for FakeProvider {
        async fn list_messages(&self, _query: &str) -> AppResult<Vec<MessageRef>> {
            if self.fail_list {
                return Err(AppError::Provider("list failed (503)".to_owned()));
            }
            Ok(self.candidates.clone())
        }

        async fn get_thread(&self, thread_id: &str) -> AppResult<Thread> {
            if self.fail_thread.as_deref() == Some(thread_id) {
                return Err(AppError::Timeout("get thread timed out".to_owned()));
            }
            Ok(self.threads.get(thread_id).cloned().unwrap_or_default())
        }

        async fn send_reply(&self, thread_id: &str, raw: &str) -> AppResult<SendAck> {
            self.sent
                .lock()
                .expect("sent lock")
                .push((thread_id.to_owned(), raw.to_owned()));
            Ok(SendAck {
                id: format!("sent-{thread_id}"),
                thread_id: Some(thread_id.to_owned()),
            })
        }

        async fn list_labels(&self) -> AppResult<Vec<Label>> {
            Ok(self.labels.clone())
        }

        async fn create_label(&self, name: &str) -> AppResult<Label> {
            self.created.lock().expect("created lock").push(name.to_owned());
            Ok(Label {
                id: format!("Label_{}", self.created.lock().expect("created lock").len()),
                name: name.to_owned(),
            })
        }

        async fn add_labels(&self, message_id: &str, label_ids: &[String]) -> AppResult<()> {
            self.labeled
                .lock()
                .expect("labeled lock")
                .push((message_id.to_owned(), label_ids.to_vec()));
            Ok(())
        }
    }

    fn decode(raw: &str) -> String {
        String::from_utf8(URL_SAFE_NO_PAD.decode(raw).expect("valid base64url"))
            .expect("valid utf-8")
    }

    #[tokio::test]
    async fn replies_and_labels_fresh_thread() {
        let thread = Thread {
            messages: vec![message("m1", &["UNREAD", "INBOX"], "Hello", "Alice <a@example.com>")],
        };
        let provider = FakeProvider::default().with_candidate("m1", "t1", thread);

        let outcome = run_cycle(&provider, &test_config()).await;

        assert_eq!(
            outcome,
            CycleOutcome {
                candidates: 1,
                replies_sent: 1,
                failed: false
            }
        );
        let sent = provider.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "t1");
        let envelope = decode(&sent[0].1);
        assert!(envelope.contains("Subject: Re: Hello"));
        assert!(envelope.contains("To: <a@example.com>"));
        // Label was absent, so it is created once and applied to the message.
        assert_eq!(provider.created(), ["Auto-Replied"]);
        assert_eq!(provider.labeled().len(), 1);
        assert_eq!(provider.labeled()[0].0, "m1");
    }

    #[tokio::test]
    async fn replies_even_when_thread_history_is_empty() {
        let provider = FakeProvider::default().with_candidate("m1", "t1", Thread::default());

        let outcome = run_cycle(&provider, &test_config()).await;

        assert_eq!(outcome.replies_sent, 1);
        assert_eq!(provider.sent().len(), 1);
        assert_eq!(provider.labeled().len(), 1);
    }

    #[tokio::test]
    async fn skips_thread_with_prior_outbound_message() {
        let thread = Thread {
            messages: vec![
                message("m2", &["UNREAD"], "Question", "Bob <b@example.com>"),
                message("m2r", &["SENT"], "Re: Question", "me@example.com"),
            ],
        };
        let provider = FakeProvider::default().with_candidate("m2", "t2", thread);

        let outcome = run_cycle(&provider, &test_config()).await;

        assert_eq!(outcome.candidates, 1);
        assert_eq!(outcome.replies_sent, 0);
        assert!(!outcome.failed);
        assert!(provider.sent().is_empty());
        assert!(provider.created().is_empty());
        assert!(provider.labeled().is_empty());
    }

    #[tokio::test]
    async fn existing_label_is_reused_not_recreated() {
        let thread = Thread {
            messages: vec![message("m3", &["UNREAD"], "Hi", "c@example.com")],
        };
        let mut provider = FakeProvider::default().with_candidate("m3", "t3", thread);
        provider.labels = vec![Label {
            id: "Label_7".to_owned(),
            name: "Auto-Replied".to_owned(),
        }];

        run_cycle(&provider, &test_config()).await;

        assert!(provider.created().is_empty());
        assert_eq!(provider.labeled(), [("m3".to_owned(), vec!["Label_7".to_owned()])]);
    }

    #[tokio::test]
    async fn list_failure_is_swallowed_at_the_cycle_boundary() {
        let provider = FakeProvider {
            fail_list: true,
            ..FakeProvider::default()
        };

        let outcome = run_cycle(&provider, &test_config()).await;

        assert!(outcome.failed);
        assert_eq!(outcome.candidates, 0);
        assert_eq!(outcome.replies_sent, 0);
        assert!(provider.sent().is_empty());
    }

    #[tokio::test]
    async fn mid_cycle_failure_abandons_remaining_candidates() {
        let fresh = |subject: &str| Thread {
            messages: vec![message("x", &["UNREAD"], subject, "d@example.com")],
        };
        let mut provider = FakeProvider::default()
            .with_candidate("m1", "t1", fresh("one"))
            .with_candidate("m2", "t2", fresh("two"))
            .with_candidate("m3", "t3", fresh("three"));
        provider.fail_thread = Some("t2".to_owned());

        let outcome = run_cycle(&provider, &test_config()).await;

        // The first candidate was handled; the failure on the second
        // abandons the third as well.
        assert!(outcome.failed);
        assert_eq!(outcome.candidates, 3);
        assert_eq!(outcome.replies_sent, 1);
        assert_eq!(provider.sent().len(), 1);
        assert_eq!(provider.sent()[0].0, "t1");
    }
}
