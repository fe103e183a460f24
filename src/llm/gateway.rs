use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::time::Duration;

use super::{
    candidate_label, clean_joke_text, fallback_vote, parse_vote_label, JokeHistoryEntry,
    JokeOutcome, ModelClient, ModelError, TokenUsage, VoteCandidate, VoteContext, VoteOutcome,
};
use crate::types::FailReason;

const JOKE_SYSTEM_PROMPT: &str = "You are a contestant in a comedy party game. \
    You will be given a prompt inside <prompt> tags. Reply with one short, punchy, \
    funny answer. One sentence, no explanations, no quotation marks, no emoji. \
    Write like a quick-witted human, not like an assistant.";

const VOTE_SYSTEM_PROMPT: &str = "You are judging a comedy party game. You will see \
    a prompt and several candidate answers, each labelled with a letter. Pick the \
    funniest answer. Reply with exactly one letter and nothing else.";

/// Model client backed by an OpenAI-compatible AI gateway. All catalog
/// models are reachable through the same chat-completions surface.
pub struct GatewayClient {
    client: Client<OpenAIConfig>,
    timeout: Duration,
}

impl GatewayClient {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            client: Client::with_config(config),
            timeout,
        }
    }

    /// One chat call with timeout; returns the reply text and usage.
    async fn chat(
        &self,
        model_id: &str,
        messages: Vec<ChatCompletionRequestMessage>,
        max_tokens: u32,
    ) -> Result<(String, TokenUsage), ModelError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(model_id)
            .messages(messages)
            .max_tokens(max_tokens)
            .build()
            .map_err(|e| ModelError::Api(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| ModelError::Timeout(self.timeout))?
            .map_err(|e| ModelError::Api(e.to_string()))?;

        let usage = response
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens as u64,
                output_tokens: u.completion_tokens as u64,
            })
            .unwrap_or_default();

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| ModelError::Parse("no content in response".to_string()))?;

        Ok((text, usage))
    }
}

/// Render one prior round as a user/assistant exchange plus the outcome,
/// so the model can adapt its style to what actually won.
fn history_messages(
    history: &[JokeHistoryEntry],
) -> Result<Vec<ChatCompletionRequestMessage>, ModelError> {
    let mut messages = Vec::with_capacity(history.len() * 3);
    for entry in history {
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(format!(
                    "Round {}: <prompt>{}</prompt>",
                    entry.round_number, entry.prompt_text
                ))
                .build()
                .map_err(|e| ModelError::Api(e.to_string()))?
                .into(),
        );
        messages.push(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(entry.own_text.clone())
                .build()
                .map_err(|e| ModelError::Api(e.to_string()))?
                .into(),
        );
        let feedback = if entry.won {
            "Your answer won that round.".to_string()
        } else if let Some(winning) = &entry.winning_text {
            format!("Your answer lost. The winning answer was: {}", winning)
        } else {
            "That round had no winner.".to_string()
        };
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(feedback)
                .build()
                .map_err(|e| ModelError::Api(e.to_string()))?
                .into(),
        );
    }
    Ok(messages)
}

#[async_trait]
impl ModelClient for GatewayClient {
    async fn generate_joke(
        &self,
        model_id: &str,
        prompt_text: &str,
        history: &[JokeHistoryEntry],
    ) -> JokeOutcome {
        let messages = match build_joke_messages(prompt_text, history) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(model = model_id, "joke request build failed: {}", e);
                return JokeOutcome::forfeit(FailReason::Error, TokenUsage::default());
            }
        };

        match self.chat(model_id, messages, 120).await {
            Ok((raw, usage)) => {
                let text = clean_joke_text(&raw);
                if text.is_empty() {
                    JokeOutcome::forfeit(FailReason::Empty, usage)
                } else {
                    JokeOutcome {
                        text,
                        usage,
                        fail_reason: None,
                    }
                }
            }
            Err(e) => {
                tracing::warn!(model = model_id, "joke generation failed: {}", e);
                JokeOutcome::forfeit(FailReason::Error, TokenUsage::default())
            }
        }
    }

    async fn ai_vote(
        &self,
        model_id: &str,
        prompt_text: &str,
        candidates: &[VoteCandidate],
        ctx: &VoteContext,
    ) -> VoteOutcome {
        // Nothing to deliberate over; skip the model call entirely.
        if candidates.len() < 2 {
            return fallback_vote(candidates, ctx, FailReason::Error, TokenUsage::default());
        }

        let messages = match build_vote_messages(prompt_text, candidates) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(model = model_id, "vote request build failed: {}", e);
                return fallback_vote(candidates, ctx, FailReason::Error, TokenUsage::default());
            }
        };

        match self.chat(model_id, messages, 8).await {
            Ok((reply, usage)) => match parse_vote_label(&reply, candidates.len()) {
                Some(index) => VoteOutcome {
                    chosen_response_id: Some(candidates[index].response_id.clone()),
                    usage,
                    fail_reason: None,
                },
                None => {
                    tracing::warn!(model = model_id, reply = %reply, "unparseable vote label");
                    fallback_vote(candidates, ctx, FailReason::InvalidLabel, usage)
                }
            },
            Err(e) => {
                tracing::warn!(model = model_id, "vote call failed: {}", e);
                fallback_vote(candidates, ctx, FailReason::Error, TokenUsage::default())
            }
        }
    }
}

fn build_joke_messages(
    prompt_text: &str,
    history: &[JokeHistoryEntry],
) -> Result<Vec<ChatCompletionRequestMessage>, ModelError> {
    let mut messages: Vec<ChatCompletionRequestMessage> = vec![
        ChatCompletionRequestSystemMessageArgs::default()
            .content(JOKE_SYSTEM_PROMPT)
            .build()
            .map_err(|e| ModelError::Api(e.to_string()))?
            .into(),
    ];
    messages.extend(history_messages(history)?);
    messages.push(
        ChatCompletionRequestUserMessageArgs::default()
            .content(format!("<prompt>{}</prompt>", prompt_text))
            .build()
            .map_err(|e| ModelError::Api(e.to_string()))?
            .into(),
    );
    Ok(messages)
}

fn build_vote_messages(
    prompt_text: &str,
    candidates: &[VoteCandidate],
) -> Result<Vec<ChatCompletionRequestMessage>, ModelError> {
    let mut listing = format!("Prompt: {}\n\nCandidates:\n", prompt_text);
    for (i, candidate) in candidates.iter().enumerate() {
        listing.push_str(&format!("{}. {}\n", candidate_label(i), candidate.text));
    }
    listing.push_str("\nWhich is funniest? Answer with one letter.");

    Ok(vec![
        ChatCompletionRequestSystemMessageArgs::default()
            .content(VOTE_SYSTEM_PROMPT)
            .build()
            .map_err(|e| ModelError::Api(e.to_string()))?
            .into(),
        ChatCompletionRequestUserMessageArgs::default()
            .content(listing)
            .build()
            .map_err(|e| ModelError::Api(e.to_string()))?
            .into(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_vote_listing_labels_in_order() {
        let candidates = vec![
            VoteCandidate {
                response_id: "r1".to_string(),
                text: "first".to_string(),
            },
            VoteCandidate {
                response_id: "r2".to_string(),
                text: "second".to_string(),
            },
        ];
        let messages = build_vote_messages("a prompt", &candidates).unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_history_messages_shape() {
        let history = vec![JokeHistoryEntry {
            round_number: 1,
            prompt_text: "p".to_string(),
            own_text: "mine".to_string(),
            won: false,
            winning_text: Some("theirs".to_string()),
        }];
        let messages = history_messages(&history).unwrap();
        // user prompt, assistant answer, user feedback
        assert_eq!(messages.len(), 3);
    }
}
