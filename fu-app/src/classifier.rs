//! Turns a raw user message into `(summary, topic, urgency)`.
//!
//! [`FallbackClassifier`] wraps an optional remote classifier and the keyword
//! rules; callers always get a classification back.

use fu_llm::{ChatCompletion, ChatMessage, CompletionOptions, extract_json_object};
use fu_store::{Topic, Urgency};
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;

const SUMMARY_MAX_CHARS: usize = 100;

const CLASSIFIER_PROMPT: &str = "Du klassifizierst Support-Nachrichten von Mitarbeitern. \
Antworte ausschließlich mit einem JSON-Objekt ohne weiteren Text:\n\
{\"summary\": \"<Kernfrage in höchstens 100 Zeichen>\", \
\"topic\": \"kyc|technical|task_rejection|payment|task_help|general\", \
\"urgency\": \"low|normal|high|urgent\"}\n\
kyc = Identitätsprüfung und Dokumente, technical = App- oder Loginprobleme, \
task_rejection = abgelehnte Aufgaben, payment = Auszahlungen und Geld, \
task_help = Fragen zur Durchführung einer Aufgabe, general = alles andere.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub summary: String,
    pub topic: Topic,
    pub urgency: Urgency,
}

#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, message: &str) -> anyhow::Result<Classification>;
}

/// Remote classification with a strict JSON reply contract.
pub struct LlmClassifier {
    llm: Arc<dyn ChatCompletion>,
    options: CompletionOptions,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn ChatCompletion>, options: CompletionOptions) -> Self {
        Self { llm, options }
    }
}

#[async_trait::async_trait]
impl Classifier for LlmClassifier {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn classify(&self, message: &str) -> anyhow::Result<Classification> {
        let messages = [
            ChatMessage::system(CLASSIFIER_PROMPT),
            ChatMessage::user(message),
        ];
        let reply = self.llm.complete(&messages, &self.options).await?;
        parse_classification(&reply)
    }
}

fn parse_classification(reply: &str) -> anyhow::Result<Classification> {
    let value = extract_json_object(reply)?;
    let summary = truncate_chars(str_field(&value, "summary")?, SUMMARY_MAX_CHARS);
    let topic: Topic = str_field(&value, "topic")?.parse()?;
    let urgency: Urgency = str_field(&value, "urgency")?.parse()?;
    Ok(Classification {
        summary,
        topic,
        urgency,
    })
}

fn str_field<'a>(value: &'a serde_json::Value, name: &str) -> anyhow::Result<&'a str> {
    value
        .get(name)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("classifier reply missing field {name:?}"))
}

/// Deterministic keyword rules. Topic groups are checked in a fixed priority order.
pub struct RuleClassifier {
    topic_rules: Vec<(Topic, Regex)>,
    urgent: Regex,
    casual: Regex,
}

impl RuleClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        let topic_rules = vec![
            (
                Topic::Kyc,
                Regex::new(
                    r"(?i)\b(kyc|verifizierung\w*|verifizier\w*|identität\w*|identifizierung|ausweis\w*|reisepass|pass\s?foto|dokument\w*|selfie|identity|verification|verify|passport|documents?)\b",
                )?,
            ),
            (
                Topic::Technical,
                Regex::new(
                    r"(?i)\b(app|fehler\w*|error\w*|bug\w*|absturz|abgestürzt|stürzt|crash\w*|login|einloggen|anmelden|anmeldung|passwort|password|hängt|lädt nicht|laden|update|technisch\w*|technical|funktioniert nicht|geht nicht)\b",
                )?,
            ),
            (
                Topic::TaskRejection,
                Regex::new(
                    r"(?i)\b(abgelehnt|ablehnung\w*|zurückgewiesen|nicht akzeptiert|nicht angenommen|rejected|rejection|declined)\b",
                )?,
            ),
            (
                Topic::Payment,
                Regex::new(
                    r"(?i)\b(zahlung\w*|bezahl\w*|auszahlung\w*|ausgezahlt|geld|gehalt|lohn|überweisung\w*|überwiesen|rechnung\w*|vergütung|verdienst|iban|payment\w*|payout\w*|paid|salary|invoice\w*|money)\b",
                )?,
            ),
            (
                Topic::TaskHelp,
                Regex::new(
                    r"(?i)\b(aufgabe\w*|auftrag|aufträge\w*|anleitung|schritt\w*|hilfe|task\w*|help|how (do|to)|wie (mache|funktioniert|geht|soll))\b",
                )?,
            ),
        ];
        let urgent = Regex::new(
            r"(?i)\b(dringend\w*|sofort|asap|schnellstmöglich|notfall|wichtig|urgent\w*|emergency|immediately)\b",
        )?;
        let casual = Regex::new(
            r"(?i)\b(kurze frage|nur so|irgendwann|kein stress|keine eile|wenn du zeit hast|quick question|no rush|just wondering|whenever)\b",
        )?;
        Ok(Self {
            topic_rules,
            urgent,
            casual,
        })
    }

    pub fn classify_message(&self, message: &str) -> Classification {
        Classification {
            summary: truncate_chars(message.trim(), SUMMARY_MAX_CHARS),
            topic: self.topic(message),
            urgency: self.urgency(message),
        }
    }

    fn topic(&self, message: &str) -> Topic {
        self.topic_rules
            .iter()
            .find(|(_, re)| re.is_match(message))
            .map(|(topic, _)| *topic)
            .unwrap_or(Topic::General)
    }

    fn urgency(&self, message: &str) -> Urgency {
        let bangs = message.chars().filter(|c| *c == '!').count();
        if self.urgent.is_match(message) || bangs >= 2 {
            return Urgency::High;
        }
        if self.casual.is_match(message) || message.contains('?') {
            return Urgency::Low;
        }
        Urgency::Normal
    }
}

#[async_trait::async_trait]
impl Classifier for RuleClassifier {
    async fn classify(&self, message: &str) -> anyhow::Result<Classification> {
        Ok(self.classify_message(message))
    }
}

/// Tries the primary classifier and degrades to the keyword rules on any failure.
pub struct FallbackClassifier {
    primary: Option<Arc<dyn Classifier>>,
    rules: RuleClassifier,
}

impl FallbackClassifier {
    pub fn new(primary: Option<Arc<dyn Classifier>>) -> Result<Self, regex::Error> {
        Ok(Self {
            primary,
            rules: RuleClassifier::new()?,
        })
    }

    pub fn rules_only() -> Result<Self, regex::Error> {
        Self::new(None)
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn classify(&self, message: &str) -> Classification {
        if let Some(primary) = self.primary.as_ref() {
            match primary.classify(message).await {
                Ok(c) => {
                    tracing::debug!(topic = %c.topic, urgency = %c.urgency, "remote classification");
                    return c;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "remote classification failed; using keyword rules");
                }
            }
        }
        let c = self.rules.classify_message(message);
        tracing::debug!(topic = %c.topic, urgency = %c.urgency, "rule classification");
        c
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}
