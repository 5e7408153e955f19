//! Builds the outbound follow-up text. Deterministic; no model calls.

use crate::availability::BusinessHours;
use chrono::{DateTime, Duration, Utc};
use fu_store::{FollowUpRecord, Topic, Urgency};

pub const FALLBACK_MESSAGE: &str =
    "Hallo! Ich bin wieder da, lass uns dein Anliegen jetzt gemeinsam lösen.";

const URGENT_CLOSING: &str =
    "Ich kümmere mich mit Priorität darum und melde mich gleich wieder bei dir.";
const GENERIC_CLOSING: &str = "Melde dich gern, wenn noch etwas offen ist.";

pub fn greeting(elapsed: Duration, local_hour: u32) -> &'static str {
    if elapsed > Duration::hours(48) {
        "Guten Morgen"
    } else if elapsed >= Duration::hours(12) {
        if local_hour < 10 { "Guten Morgen" } else { "Hallo" }
    } else if elapsed >= Duration::hours(1) {
        "Hallo"
    } else {
        "Hi"
    }
}

/// Escalated urgency overrides the topic line.
pub fn closing(topic: Topic, urgency: Urgency) -> &'static str {
    if urgency.is_escalated() {
        return URGENT_CLOSING;
    }
    match topic {
        Topic::Kyc => "Lade die Dokumente gern nochmal hoch, ich prüfe sie dann direkt.",
        Topic::Technical => "Probiere das mal aus!",
        Topic::TaskRejection => {
            "Schau dir die Anmerkungen zur Aufgabe an und reiche sie gern erneut ein."
        }
        Topic::Payment => "Gib mir Bescheid, falls die Zahlung dann immer noch fehlt.",
        Topic::TaskHelp => "Sag Bescheid, wenn du bei einem Schritt hängen bleibst.",
        Topic::General => GENERIC_CLOSING,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Composer {
    hours: BusinessHours,
}

impl Composer {
    pub fn new(hours: BusinessHours) -> Self {
        Self { hours }
    }

    pub fn compose(
        &self,
        record: &FollowUpRecord,
        first_name: &str,
        answer: &str,
        now: DateTime<Utc>,
    ) -> String {
        let first_name = first_name.trim();
        let answer = answer.trim();
        if first_name.is_empty() || answer.is_empty() {
            tracing::warn!(
                follow_up_id = %record.id,
                "missing name or answer; composing fallback message"
            );
            return FALLBACK_MESSAGE.to_string();
        }

        let elapsed = now.signed_duration_since(record.created_at);
        let greeting = greeting(elapsed, self.hours.local_hour(now));
        let closing = closing(record.detected_topic, record.urgency_level);
        format!("{greeting} {first_name}! Bin wieder da.\n\nZu deiner Frage: {answer}\n\n{closing}")
    }
}
