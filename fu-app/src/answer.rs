//! Short direct answers to a classified question, grounded on knowledge snippets.

use fu_llm::{ChatCompletion, ChatMessage, CompletionOptions};
use fu_store::{KnowledgeBase, KnowledgeSnippet, Topic, Urgency};
use std::sync::Arc;

pub const SNIPPET_LIMIT: usize = 3;
const EXCERPT_MAX_CHARS: usize = 300;

/// Used whenever no usable answer can be produced.
pub const FALLBACK_ANSWER: &str = "Beschreib mir dein Problem bitte noch einmal kurz, \
dann schauen wir uns das direkt gemeinsam an.";

const ANSWER_PROMPT: &str = "Du bist ein erfahrener Support-Mitarbeiter und antwortest \
Mitarbeitern im Chat. Antworte direkt und umsetzbar in höchstens drei Sätzen auf Deutsch, \
duze die Person und wiederhole die Frage nicht. Nutze den Wissenskontext, wenn er passt; \
erfinde keine Fakten.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRequest {
    pub question_summary: String,
    pub topic: Topic,
    pub urgency: Urgency,
}

#[async_trait::async_trait]
pub trait AnswerSource: Send + Sync {
    async fn answer(&self, request: &AnswerRequest) -> anyhow::Result<String>;
}

/// Remote answer generation with knowledge-base context.
pub struct LlmAnswerSource {
    llm: Arc<dyn ChatCompletion>,
    knowledge: Arc<dyn KnowledgeBase>,
    options: CompletionOptions,
}

impl LlmAnswerSource {
    pub fn new(
        llm: Arc<dyn ChatCompletion>,
        knowledge: Arc<dyn KnowledgeBase>,
        options: CompletionOptions,
    ) -> Self {
        Self {
            llm,
            knowledge,
            options,
        }
    }
}

#[async_trait::async_trait]
impl AnswerSource for LlmAnswerSource {
    #[tracing::instrument(level = "debug", skip_all, fields(topic = %request.topic))]
    async fn answer(&self, request: &AnswerRequest) -> anyhow::Result<String> {
        let snippets = self
            .knowledge
            .relevant_snippets(request.topic, SNIPPET_LIMIT)
            .await?;
        tracing::debug!(snippets = snippets.len(), "knowledge context loaded");

        let messages = [
            ChatMessage::system(ANSWER_PROMPT),
            ChatMessage::user(build_user_prompt(request, &snippets)),
        ];
        let reply = self.llm.complete(&messages, &self.options).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(anyhow::anyhow!("empty answer from model"));
        }
        Ok(reply.to_string())
    }
}

fn build_user_prompt(request: &AnswerRequest, snippets: &[KnowledgeSnippet]) -> String {
    let mut prompt = format!(
        "Frage: {}\nThema: {}\nDringlichkeit: {}\n",
        request.question_summary.trim(),
        request.topic,
        request.urgency
    );
    if snippets.is_empty() {
        prompt.push_str("\nWissenskontext: keiner\n");
    } else {
        prompt.push_str("\nWissenskontext:\n");
        for snippet in snippets {
            prompt.push_str("- ");
            prompt.push_str(&excerpt(snippet));
            prompt.push('\n');
        }
    }
    prompt
}

fn excerpt(snippet: &KnowledgeSnippet) -> String {
    let body = if snippet.summary.trim().is_empty() {
        snippet.content.trim()
    } else {
        snippet.summary.trim()
    };
    let body: String = body.chars().take(EXCERPT_MAX_CHARS).collect();
    format!("{}: {}", snippet.title.trim(), body)
}

/// The fixed answer, as an [`AnswerSource`].
pub struct StaticAnswerSource;

#[async_trait::async_trait]
impl AnswerSource for StaticAnswerSource {
    async fn answer(&self, _request: &AnswerRequest) -> anyhow::Result<String> {
        Ok(FALLBACK_ANSWER.to_string())
    }
}

/// Never-empty answers: the primary source if it works, the fixed text otherwise.
pub struct AnswerGenerator {
    source: Arc<dyn AnswerSource>,
}

impl AnswerGenerator {
    /// Without a primary source every answer is the fixed text.
    pub fn new(primary: Option<Arc<dyn AnswerSource>>) -> Self {
        Self {
            source: primary
                .unwrap_or_else(|| Arc::new(StaticAnswerSource) as Arc<dyn AnswerSource>),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn generate(&self, request: &AnswerRequest) -> String {
        match self.source.answer(request).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!("answer source returned empty text; using fallback");
                FALLBACK_ANSWER.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "answer generation failed; using fallback");
                FALLBACK_ANSWER.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fu_store::SnippetId;
    use std::sync::Mutex;

    struct RecordingLlm {
        reply: Result<String, String>,
        prompts: Mutex<Vec<(Vec<ChatMessage>, CompletionOptions)>>,
    }

    impl RecordingLlm {
        fn new(reply: Result<&str, &str>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string).map_err(str::to_string),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl ChatCompletion for RecordingLlm {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            options: &CompletionOptions,
        ) -> fu_llm::Result<String> {
            self.prompts
                .lock()
                .expect("lock")
                .push((messages.to_vec(), *options));
            self.reply.clone().map_err(fu_llm::LlmError::Http)
        }
    }

    struct FixedKnowledge(Vec<KnowledgeSnippet>);

    #[async_trait::async_trait]
    impl KnowledgeBase for FixedKnowledge {
        async fn relevant_snippets(
            &self,
            _topic: Topic,
            limit: usize,
        ) -> fu_store::Result<Vec<KnowledgeSnippet>> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    fn request() -> AnswerRequest {
        AnswerRequest {
            question_summary: "App startet nicht".into(),
            topic: Topic::Technical,
            urgency: Urgency::Normal,
        }
    }

    fn snippet(title: &str, summary: &str) -> KnowledgeSnippet {
        KnowledgeSnippet {
            id: SnippetId::new(title),
            title: title.into(),
            summary: summary.into(),
            content: "Langer Inhalt".into(),
            tags: vec!["technical".into()],
            context_priority: 1.0,
            is_published: true,
            ai_training_enabled: true,
        }
    }

    fn generator(llm: Arc<RecordingLlm>, snippets: Vec<KnowledgeSnippet>) -> AnswerGenerator {
        let options = CompletionOptions {
            temperature: 0.5,
            max_tokens: 200,
        };
        let source = LlmAnswerSource::new(llm, Arc::new(FixedKnowledge(snippets)), options);
        AnswerGenerator::new(Some(Arc::new(source)))
    }

    #[tokio::test]
    async fn model_answer_is_trimmed_and_context_is_embedded() {
        let llm = RecordingLlm::new(Ok("  Lösche die App-Daten und starte neu.  "));
        let answer = generator(
            llm.clone(),
            vec![
                snippet("Cache leeren", "Einstellungen > Apps > Speicher"),
                snippet("Neu installieren", ""),
            ],
        )
        .generate(&request())
        .await;
        assert_eq!(answer, "Lösche die App-Daten und starte neu.");

        let prompts = llm.prompts.lock().expect("lock");
        let (messages, options) = &prompts[0];
        assert_eq!(options.max_tokens, 200);
        let user = &messages[1].content;
        assert!(user.contains("Frage: App startet nicht"), "{user}");
        assert!(user.contains("Thema: technical"), "{user}");
        assert!(user.contains("- Cache leeren: Einstellungen > Apps > Speicher"), "{user}");
        assert!(user.contains("- Neu installieren: Langer Inhalt"), "{user}");
    }

    #[tokio::test]
    async fn model_failure_yields_fallback() {
        let answer = generator(RecordingLlm::new(Err("status=429")), Vec::new())
            .generate(&request())
            .await;
        assert_eq!(answer, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn blank_model_reply_yields_fallback() {
        let answer = generator(RecordingLlm::new(Ok("   ")), Vec::new())
            .generate(&request())
            .await;
        assert_eq!(answer, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn without_primary_the_fixed_answer_is_used() {
        let answer = AnswerGenerator::new(None).generate(&request()).await;
        assert_eq!(answer, FALLBACK_ANSWER);
        let fixed = StaticAnswerSource.answer(&request()).await.expect("static");
        assert_eq!(fixed, FALLBACK_ANSWER);
    }
}
