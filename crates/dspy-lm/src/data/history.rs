use std::fmt::Write as _;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::{LmUsage, Message, ModelType, Params, Response};

/// Parameter keys starting with this prefix are credentials and never recorded.
pub const CREDENTIAL_PREFIX: &str = "api_";

/// One completed [`LM::invoke`](crate::LM::invoke) call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The prompt as given, when the call was made with a prompt.
    pub prompt: Option<String>,
    /// The messages actually sent.
    pub messages: Vec<Message>,
    /// Merged call parameters with credentials removed.
    pub params: Params,
    pub response: Response,
    pub outputs: Vec<String>,
    pub usage: LmUsage,
    /// `None` when the response came from cache.
    pub cost: Option<f64>,
    pub model: String,
    pub model_type: ModelType,
    pub timestamp: DateTime<Utc>,
}

/// Drops every parameter whose key looks like a credential.
pub fn scrub_credentials(params: &Params) -> Params {
    params
        .iter()
        .filter(|(key, _)| !key.starts_with(CREDENTIAL_PREFIX))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Append-only call log, ordered by completion.
#[derive(Debug, Default)]
pub struct HistoryStore {
    entries: RwLock<Vec<Arc<HistoryEntry>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: HistoryEntry) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(entry));
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `n` most recent entries, oldest first.
    pub fn last(&self, n: usize) -> Vec<Arc<HistoryEntry>> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    pub fn entries(&self) -> Vec<Arc<HistoryEntry>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Token usage summed over every recorded call.
    pub fn total_usage(&self) -> LmUsage {
        self.entries()
            .iter()
            .fold(LmUsage::default(), |acc, entry| acc + entry.usage.clone())
    }

    /// Sum of known costs; cache hits contribute nothing.
    pub fn total_cost(&self) -> f64 {
        self.entries().iter().filter_map(|entry| entry.cost).sum()
    }

    /// Transcript of the `n` most recent entries.
    pub fn render(&self, n: usize, styled: bool) -> String {
        render_entries(&self.last(n), styled)
    }
}

fn render_entries(entries: &[Arc<HistoryEntry>], styled: bool) -> String {
    let red = |text: &str| {
        if styled {
            text.red().to_string()
        } else {
            text.to_string()
        }
    };
    let green = |text: &str| {
        if styled {
            text.green().to_string()
        } else {
            text.to_string()
        }
    };

    let mut out = String::new();
    for entry in entries {
        out.push_str("\n\n\n");
        for message in &entry.messages {
            let _ = writeln!(out, "{}", red(&format!("{} message:", message.role.label())));
            let _ = writeln!(out, "{}", message.content.trim());
            out.push_str("\n\n");
        }

        let _ = writeln!(out, "{}", red("Response:"));
        let first = entry.outputs.first().map(String::as_str).unwrap_or_default();
        let _ = writeln!(out, "{}", green(first.trim()));

        if entry.outputs.len() > 1 {
            let others = format!(" \t (and {} other completions)", entry.outputs.len() - 1);
            out.push_str(&red(&others));
        }
    }
    out.push_str("\n\n\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Choice;
    use serde_json::json;

    fn entry(outputs: &[&str], cost: Option<f64>) -> HistoryEntry {
        let response = Response::new(
            outputs.iter().map(|text| Choice::chat(*text)).collect(),
            LmUsage::new(3, 1),
        );
        HistoryEntry {
            prompt: Some("2+2=".to_string()),
            messages: vec![Message::user("2+2=")],
            params: Params::new(),
            outputs: response.outputs(),
            usage: response.usage.clone(),
            response,
            cost,
            model: "openai/gpt-4o-mini".to_string(),
            model_type: ModelType::Chat,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn scrubs_api_prefixed_keys_only() {
        let mut params = Params::new();
        params.insert("api_key".to_string(), json!("sk-secret"));
        params.insert("api_base".to_string(), json!("http://localhost"));
        params.insert("temperature".to_string(), json!(0.0));
        params.insert("rapid_api".to_string(), json!(true));

        let scrubbed = scrub_credentials(&params);
        assert_eq!(
            scrubbed.keys().collect::<Vec<_>>(),
            vec!["temperature", "rapid_api"]
        );
    }

    #[test]
    fn last_returns_most_recent_in_order() {
        let store = HistoryStore::new();
        for text in ["a", "b", "c"] {
            store.push(entry(&[text], Some(0.5)));
        }

        let last_two = store.last(2);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].outputs, vec!["b"]);
        assert_eq!(last_two[1].outputs, vec!["c"]);
        assert_eq!(store.last(10).len(), 3);
        assert_eq!(store.total_usage().total_tokens, 12);
        assert_eq!(store.total_cost(), 1.5);
    }

    #[test]
    fn render_reports_extra_completions() {
        let store = HistoryStore::new();
        store.push(entry(&["4", "four", "IV"], None));

        let transcript = store.render(1, false);
        assert!(transcript.contains("User message:\n2+2="));
        assert!(transcript.contains("Response:\n4\n"));
        assert!(transcript.contains("(and 2 other completions)"));
    }
}
