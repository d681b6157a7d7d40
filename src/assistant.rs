use crate::{
    backend::{blocking, BookingBackend},
    error::BookingError,
    timezone::{display_in, parse_timezone},
    types::AvailabilitySlot,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

const OFFER_LIMIT: usize = 3;
const OFFER_HORIZON_DAYS: i64 = 14;

lazy_static! {
    static ref BOOKING_INTENT: Regex = Regex::new(
        r"(?i)\b(book|booking|appointment|session|schedule|slot|available|availability|termin|buchen|rendez-vous|réserver|disponible|cita|reservar)\b"
    )
    .expect("booking intent pattern");
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion endpoint answered with status {0}")]
    Status(u16),

    #[error("completion contained no text")]
    EmptyReply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, AssistantError>;
}

/// Client for OpenAI compatible `/chat/completions` endpoints.
pub struct HttpCompletionClient {
    url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(base_url: &str, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, AssistantError> {
        let mut request = self.client.post(&self.url).json(&CompletionRequest {
            model: &self.model,
            messages: &messages,
            temperature: 0.3,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AssistantError::Status(response.status().as_u16()));
        }
        let response: CompletionResponse = response.json().await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(AssistantError::EmptyReply)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    En,
    De,
    Fr,
    Es,
}

impl Language {
    /// Maps tags like `de`, `de-AT` or `FR_ca` onto a supported language.
    /// Anything else is English.
    pub fn from_tag(tag: Option<&str>) -> Self {
        let primary = tag
            .unwrap_or_default()
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "de" => Language::De,
            "fr" => Language::Fr,
            "es" => Language::Es,
            _ => Language::En,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::En => "English",
            Language::De => "German",
            Language::Fr => "French",
            Language::Es => "Spanish",
        }
    }

    pub fn fallback_reply(self) -> &'static str {
        match self {
            Language::En => "Sorry, I cannot answer right now. Please try again in a moment.",
            Language::De => "Entschuldigung, ich kann gerade nicht antworten. Bitte versuche es gleich noch einmal.",
            Language::Fr => "Désolé, je ne peux pas répondre pour le moment. Merci de réessayer dans un instant.",
            Language::Es => "Lo siento, ahora mismo no puedo responder. Inténtalo de nuevo en un momento.",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub client_id: Option<String>,
    pub provider_code: Option<String>,
    pub language: Option<String>,
    pub tz: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotOffer {
    pub availability_id: Uuid,
    pub provider_code: String,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_start: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub slots: Vec<SlotOffer>,
    /// Set when the reply is the canned sentence instead of model output.
    pub fallback: bool,
}

/// Chat glue: forwards a message to the language model and, when the client
/// asks for an appointment, attaches a few open slots of the provider.
pub struct Assistant<B: BookingBackend> {
    backend: B,
    llm: Option<Arc<dyn CompletionClient>>,
    timeout: Duration,
    suppress_window: ChronoDuration,
}

impl<B: BookingBackend> Assistant<B> {
    pub fn new(
        backend: B,
        llm: Option<Arc<dyn CompletionClient>>,
        timeout: Duration,
        suppress_window: ChronoDuration,
    ) -> Self {
        if llm.is_none() {
            warn!("No language model configured, chat answers with fallback replies");
        }
        Self {
            backend,
            llm,
            timeout,
            suppress_window,
        }
    }

    pub async fn reply(&self, request: &ChatRequest) -> Result<ChatReply, BookingError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(BookingError::Validation("message must not be empty".into()));
        }
        let tz = request.tz.as_deref().map(parse_timezone).transpose()?;
        let language = Language::from_tag(request.language.as_deref());

        let offers: Vec<SlotOffer> = self
            .offers(request, message)
            .await
            .into_iter()
            .map(|slot| SlotOffer {
                availability_id: slot.id,
                display_start: tz.map(|tz| display_in(slot.start_utc, tz)),
                provider_code: slot.provider_code,
                start_utc: slot.start_utc,
                end_utc: slot.end_utc,
            })
            .collect();

        let Some(llm) = &self.llm else {
            return Ok(fallback(language, offers));
        };

        let messages = vec![
            ChatMessage::system(system_prompt(language, &offers)),
            ChatMessage::user(message),
        ];
        match tokio::time::timeout(self.timeout, llm.complete(messages)).await {
            Ok(Ok(reply)) => Ok(ChatReply {
                reply,
                slots: offers,
                fallback: false,
            }),
            Ok(Err(err)) => {
                warn!(?err, "Language model request failed");
                Ok(fallback(language, offers))
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "Language model request timed out");
                Ok(fallback(language, offers))
            }
        }
    }

    /// Open slots worth offering. Failures to read the store only cost the
    /// offers, never the reply.
    async fn offers(&self, request: &ChatRequest, message: &str) -> Vec<AvailabilitySlot> {
        let Some(provider_code) = request
            .provider_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
        else {
            return Vec::new();
        };
        if !BOOKING_INTENT.is_match(message) {
            return Vec::new();
        }

        let backend = self.backend.clone();
        let provider_code = provider_code.to_string();
        let client_id = request
            .client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let suppress_window = self.suppress_window;

        let result = blocking(move || {
            let now = Utc::now();
            if let Some(client_id) = client_id {
                if backend.has_booked_since(&client_id, now - suppress_window)? {
                    info!(%client_id, "Client booked recently, not offering slots");
                    return Ok(Vec::new());
                }
            }
            Ok(backend.open_slots(
                &provider_code,
                now,
                now + ChronoDuration::days(OFFER_HORIZON_DAYS),
                OFFER_LIMIT,
            )?)
        })
        .await;

        result.unwrap_or_else(|err| {
            warn!(?err, "Failed to load slots for chat offer");
            Vec::new()
        })
    }
}

fn fallback(language: Language, slots: Vec<SlotOffer>) -> ChatReply {
    ChatReply {
        reply: language.fallback_reply().to_string(),
        slots,
        fallback: true,
    }
}

fn system_prompt(language: Language, offers: &[SlotOffer]) -> String {
    let mut prompt = format!(
        "You are the booking assistant of a therapy practice. Answer briefly and kindly in {}. \
         Never give medical advice. Never claim an appointment is booked, the client confirms slots in the app.",
        language.name()
    );
    if offers.is_empty() {
        prompt.push_str(" There are no open slots to offer right now.");
    } else {
        prompt.push_str(" The client can choose one of these open slots:");
        for offer in offers {
            let start = offer
                .display_start
                .clone()
                .unwrap_or_else(|| offer.start_utc.format("%Y-%m-%d %H:%M UTC").to_string());
            prompt.push_str(&format!("\n- {start}"));
        }
    }
    prompt
}
