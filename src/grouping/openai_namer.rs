// Group names from an OpenAI compatible chat completion endpoint.

use std::env;
use std::time::Duration;

use affinity_grouping::naming::ServiceFailedSnafu;
use affinity_grouping::{GroupNamer, NamingError};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::grouping::*;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You are a creative group naming assistant. \
Given a set of initials, generate a short, catchy, and fun group name that reflects teamwork. \
Return ONLY the group name as a plain text response, with no additional explanation or punctuation.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatAnswer,
}

#[derive(Debug, Deserialize)]
struct ChatAnswer {
    content: Option<String>,
}

pub struct OpenAiNamer {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiNamer {
    pub fn new(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
    ) -> ElectionResult<OpenAiNamer> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context(HttpClientSnafu {})?;
        Ok(OpenAiNamer {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        })
    }

    /// Reads `OPENAI_API_KEY`, `OPENAI_MODEL` and `OPENAI_BASE_URL`.
    ///
    /// Returns None when there is no API key.
    pub fn from_env(timeout: Duration) -> ElectionResult<Option<OpenAiNamer>> {
        let api_key = match env::var("OPENAI_API_KEY") {
            Ok(k) if !k.trim().is_empty() => k,
            _ => return Ok(None),
        };
        let model = env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        info!("OpenAiNamer: using model {} at {}", model, base_url);
        OpenAiNamer::new(api_key.trim(), &model, &base_url, timeout).map(Some)
    }

    fn request_body<'a>(&'a self, initials: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: initials,
                },
            ],
            temperature: 0.7,
            max_tokens: 15,
            n: 1,
        }
    }
}

impl GroupNamer for OpenAiNamer {
    fn name_group(&self, initials: &[String]) -> Result<String, NamingError> {
        let joined = initials.concat();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&joined))
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| NamingError::ServiceFailed {
                message: e.to_string(),
            })?;
        let parsed: ChatResponse = response.json().map_err(|e| NamingError::ServiceFailed {
            message: e.to_string(),
        })?;
        let name = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string());
        debug!("OpenAiNamer: {:?} -> {:?}", joined, name);
        match name {
            Some(n) => Ok(n),
            None => ServiceFailedSnafu {
                message: "the answer has no choice",
            }
            .fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namer() -> OpenAiNamer {
        OpenAiNamer::new("key", DEFAULT_MODEL, "http://localhost:1/v1/", Duration::from_secs(1))
            .unwrap()
    }

    #[test]
    fn request_shape() {
        let n = namer();
        assert_eq!(n.endpoint, "http://localhost:1/v1/chat/completions");
        let js = serde_json::to_value(n.request_body("ABC")).unwrap();
        assert_eq!(js["model"], "gpt-4o-mini");
        assert_eq!(js["max_tokens"], 15);
        assert_eq!(js["messages"][0]["role"], "system");
        assert_eq!(js["messages"][1]["content"], "ABC");
    }

    #[test]
    fn parses_the_answer() {
        let answer: ChatResponse = serde_json::from_str(
            r#"{"id": "x", "choices": [{"index": 0, "message": {"role": "assistant", "content": " Team Spark "}}]}"#,
        )
        .unwrap();
        assert_eq!(
            answer.choices[0].message.content.as_deref(),
            Some(" Team Spark ")
        );
    }

    #[test]
    fn silent_service_is_cut_by_the_client_timeout() {
        // Accepts connections but never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}/v1", listener.local_addr().unwrap());
        let namer =
            OpenAiNamer::new("key", DEFAULT_MODEL, &base_url, Duration::from_millis(200)).unwrap();
        let start = std::time::Instant::now();
        let res = namer.name_group(&["A".to_string()]);
        assert!(matches!(res, Err(NamingError::ServiceFailed { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
        drop(listener);
    }

    #[test]
    fn unreachable_service_is_a_naming_error() {
        let res = namer().name_group(&["A".to_string(), "B".to_string()]);
        assert!(matches!(res, Err(NamingError::ServiceFailed { .. })));
    }
}
