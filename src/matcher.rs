//! Matching & deduplication — turns a time window plus a resolved rule set
//! into a rule-tagged delivery plan.
//!
//! Each non-default rule runs as a scoped mailbox query; every thread
//! contributes at most one representative message (the newest one not sent
//! from an own address). Message ids dedup across rules, earlier rules
//! winning ties, and a final pass over the whole inbox window hands
//! everything unclaimed to the fallback rule.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::mailbox::{is_own_address, MailFetcher, MailMessage, Thread};
use crate::rules::{ResolvedRules, Rule};
use crate::window::TimeWindow;

/// Folder restriction imposed on queries that do not pick their own.
pub const INBOX_QUERY: &str = "in:inbox";

/// One planned delivery: a representative message tagged with the rule that
/// claimed it.
#[derive(Debug, Clone)]
pub struct DeliveryItem {
    pub id: String,
    pub labels: Vec<String>,
    pub date: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub body: String,
    /// The claiming rule, shared with the resolved rule set.
    pub rule: Arc<Rule>,
}

/// Combine a rule's query with the window bounds.
///
/// A rule that already carries an `in:` term picks its own folder; anything
/// else is restricted to the inbox.
pub fn scoped_query(rule_query: &str, window: &TimeWindow) -> String {
    let has_in_term = rule_query
        .split_whitespace()
        .any(|term| term.starts_with("in:"));
    if has_in_term {
        format!("{} {rule_query}", window.date_range_query())
    } else {
        format!("{INBOX_QUERY} {} {rule_query}", window.date_range_query())
    }
}

/// The newest message in a thread that was not sent from an own address.
///
/// Threads where every message is self-sent have no representative.
pub fn representative<'a>(thread: &'a Thread, own: &[String]) -> Option<&'a MailMessage> {
    thread
        .messages
        .iter()
        .rev()
        .find(|m| !is_own_address(&m.from, own))
}

/// Run-local dedup set: insertion ordered, first writer wins.
#[derive(Default)]
struct DedupSet {
    items: Vec<DeliveryItem>,
    seen: HashSet<String>,
}

impl DedupSet {
    fn insert(&mut self, item: DeliveryItem) -> bool {
        if !self.seen.insert(item.id.clone()) {
            return false;
        }
        self.items.push(item);
        true
    }
}

/// Matches rules against the mailbox and builds the delivery plan.
pub struct Matcher<'a> {
    fetcher: &'a dyn MailFetcher,
    /// Primary address + send-as aliases, resolved once per run.
    own_addresses: Vec<String>,
}

impl<'a> Matcher<'a> {
    pub fn new(fetcher: &'a dyn MailFetcher, own_addresses: Vec<String>) -> Self {
        Self {
            fetcher,
            own_addresses,
        }
    }

    /// Build the deduplicated, rule-tagged plan for one window.
    ///
    /// `window_threads` is the already-fetched unscoped inbox result for
    /// the window (the caller needs it first for the empty-window
    /// short-circuit); its unclaimed representatives go to the fallback.
    /// A failing rule query is logged and skipped; it never takes the
    /// fallback pass down with it.
    pub async fn collect(
        &self,
        window: &TimeWindow,
        rules: &ResolvedRules,
        window_threads: &[Thread],
    ) -> Result<Vec<DeliveryItem>, FetchError> {
        let mut set = DedupSet::default();

        for rule in &rules.rules {
            let Some(query) = rule.query.as_deref().filter(|q| !q.trim().is_empty()) else {
                continue;
            };
            let scoped = scoped_query(query, window);
            let threads = match self.fetcher.search(&scoped).await {
                Ok(threads) => threads,
                Err(e) => {
                    warn!(query = %scoped, error = %e, "Rule query failed, skipping rule");
                    continue;
                }
            };

            let mut claimed = 0usize;
            for thread in &threads {
                if let Some(message) = representative(thread, &self.own_addresses) {
                    if set.insert(self.item_for(thread, message, Arc::clone(rule))) {
                        claimed += 1;
                    }
                }
            }
            debug!(query = %query, threads = threads.len(), claimed, "Rule matched");
        }

        for thread in window_threads {
            if let Some(message) = representative(thread, &self.own_addresses) {
                set.insert(self.item_for(thread, message, Arc::clone(&rules.fallback)));
            }
        }

        Ok(set.items)
    }

    fn item_for(&self, thread: &Thread, message: &MailMessage, rule: Arc<Rule>) -> DeliveryItem {
        // Thread-level labels: union across messages, first occurrence order.
        let mut labels: Vec<String> = Vec::new();
        for msg in &thread.messages {
            for label in &msg.labels {
                if !labels.contains(label) {
                    labels.push(label.clone());
                }
            }
        }

        DeliveryItem {
            id: message.id.clone(),
            labels,
            date: message.date,
            from: message.from.clone(),
            to: message.to.clone(),
            cc: message.cc.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            rule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::rules::{resolve, Resolution};

    struct FakeFetcher {
        /// Query → threads. Unknown queries return an error, so tests pin
        /// down exactly which query strings the matcher constructs.
        by_query: HashMap<String, Vec<Thread>>,
        queries: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn new(by_query: HashMap<String, Vec<Thread>>) -> Self {
            Self {
                by_query,
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MailFetcher for FakeFetcher {
        async fn search(&self, query: &str) -> Result<Vec<Thread>, FetchError> {
            self.queries.lock().unwrap().push(query.to_string());
            self.by_query
                .get(query)
                .cloned()
                .ok_or_else(|| FetchError::SearchFailed {
                    query: query.to_string(),
                    reason: "no canned result".into(),
                })
        }

        async fn own_addresses(&self) -> Result<Vec<String>, FetchError> {
            Ok(vec!["me@example.com".into()])
        }
    }

    fn message(id: &str, from: &str, epoch: i64) -> MailMessage {
        MailMessage {
            id: id.into(),
            from: from.into(),
            to: "me@example.com".into(),
            cc: String::new(),
            subject: format!("subject {id}"),
            body: format!("body {id}"),
            date: DateTime::from_timestamp(epoch, 0).unwrap(),
            labels: vec![],
        }
    }

    fn thread(id: &str, messages: Vec<MailMessage>) -> Thread {
        Thread {
            id: id.into(),
            messages,
        }
    }

    fn window() -> TimeWindow {
        TimeWindow {
            last_checked: 100,
            next_check: 200,
        }
    }

    fn rule(query: Option<&str>, webhook: Option<&str>) -> Rule {
        Rule {
            query: query.map(String::from),
            webhook_url: webhook.map(String::from),
            ..Rule::default()
        }
    }

    fn resolved(raw: &[Rule]) -> ResolvedRules {
        match resolve(raw).unwrap() {
            Resolution::Active(r) => r,
            Resolution::NothingToDo => panic!("expected active rules"),
        }
    }

    #[test]
    fn scoped_query_forces_inbox() {
        assert_eq!(
            scoped_query("label:urgent", &window()),
            "in:inbox after:100 before:199 label:urgent"
        );
    }

    #[test]
    fn scoped_query_respects_in_term() {
        assert_eq!(
            scoped_query("in:spam from:foo", &window()),
            "after:100 before:199 in:spam from:foo"
        );
    }

    #[test]
    fn representative_is_newest_non_self() {
        let own = vec!["me@example.com".to_string()];
        let t = thread(
            "t1",
            vec![
                message("m1", "alice@example.com", 10),
                message("m2", "Me <me@example.com>", 20),
            ],
        );
        assert_eq!(representative(&t, &own).unwrap().id, "m1");
    }

    #[test]
    fn self_only_thread_has_no_representative() {
        let own = vec!["me@example.com".to_string()];
        let t = thread("t1", vec![message("m1", "me@example.com", 10)]);
        assert!(representative(&t, &own).is_none());
    }

    #[tokio::test]
    async fn earlier_rule_wins_dedup_tie() {
        let w = window();
        let raw = [
            rule(Some("label:a"), Some("https://hook/a")),
            rule(Some("label:b"), Some("https://hook/b")),
            rule(None, Some("https://hook/default")),
        ];
        let rules = resolved(&raw);

        let shared = thread("t1", vec![message("m1", "alice@example.com", 150)]);
        let fetcher = FakeFetcher::new(HashMap::from([
            (scoped_query("label:a", &w), vec![shared.clone()]),
            (scoped_query("label:b", &w), vec![shared.clone()]),
        ]));

        let matcher = Matcher::new(&fetcher, vec!["me@example.com".into()]);
        let plan = matcher.collect(&w, &rules, &[shared]).await.unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].id, "m1");
        assert_eq!(plan[0].rule.query.as_deref(), Some("label:a"));
    }

    #[tokio::test]
    async fn unmatched_messages_go_to_fallback() {
        let w = window();
        let raw = [
            rule(Some("label:a"), Some("https://hook/a")),
            rule(None, Some("https://hook/default")),
        ];
        let rules = resolved(&raw);

        let matched = thread("t1", vec![message("m1", "alice@example.com", 150)]);
        let unmatched = thread("t2", vec![message("m2", "bob@example.com", 160)]);
        let fetcher = FakeFetcher::new(HashMap::from([(
            scoped_query("label:a", &w),
            vec![matched.clone()],
        )]));

        let matcher = Matcher::new(&fetcher, vec!["me@example.com".into()]);
        let plan = matcher
            .collect(&w, &rules, &[matched, unmatched])
            .await
            .unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].rule.query.as_deref(), Some("label:a"));
        assert!(plan[1].rule.is_default);
        assert_eq!(plan[1].id, "m2");
    }

    #[tokio::test]
    async fn failing_rule_query_is_skipped() {
        let w = window();
        let raw = [
            rule(Some("label:broken"), Some("https://hook/a")),
            rule(None, Some("https://hook/default")),
        ];
        let rules = resolved(&raw);

        // No canned result for the broken rule's query → search error.
        let fetcher = FakeFetcher::new(HashMap::new());
        let leftover = thread("t1", vec![message("m1", "alice@example.com", 150)]);

        let matcher = Matcher::new(&fetcher, vec!["me@example.com".into()]);
        let plan = matcher.collect(&w, &rules, &[leftover]).await.unwrap();

        // The fallback pass still ran and claimed the message.
        assert_eq!(plan.len(), 1);
        assert!(plan[0].rule.is_default);
    }

    #[tokio::test]
    async fn queryless_rules_fetch_nothing() {
        let w = window();
        let mut fallback = rule(None, Some("https://hook/default"));
        fallback.is_default = true;
        let raw = [rule(Some("  "), Some("https://hook/a")), fallback];
        let rules = resolved(&raw);

        let fetcher = FakeFetcher::new(HashMap::new());
        let matcher = Matcher::new(&fetcher, vec!["me@example.com".into()]);
        let plan = matcher.collect(&w, &rules, &[]).await.unwrap();

        assert!(plan.is_empty());
        assert!(fetcher.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn thread_labels_are_unioned() {
        let w = window();
        let raw = [
            rule(Some("label:a"), Some("https://hook/a")),
            rule(None, Some("https://hook/default")),
        ];
        let rules = resolved(&raw);

        let mut first = message("m1", "alice@example.com", 150);
        first.labels = vec!["INBOX".into(), "work".into()];
        let mut second = message("m2", "bob@example.com", 160);
        second.labels = vec!["INBOX".into(), "urgent".into()];
        let t = thread("t1", vec![first, second]);

        let fetcher =
            FakeFetcher::new(HashMap::from([(scoped_query("label:a", &w), vec![t])]));
        let matcher = Matcher::new(&fetcher, vec!["me@example.com".into()]);
        let plan = matcher.collect(&w, &rules, &[]).await.unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].labels, vec!["INBOX", "work", "urgent"]);
    }
}
