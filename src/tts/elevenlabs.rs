//! Модуль интеграции с ElevenLabs API
//!
//! Этот модуль содержит тонкий HTTP-слой над эндпоинтом синтеза с
//! посимвольными временными метками и группировку этих меток в слова.
//! Встроенные директивы подачи вырезаются до группировки, чтобы управляющие
//! теги не появлялись среди произнесенных слов и не искажали их тайминг.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MontageError, Result};
use crate::segment::{VoiceSettings, WordTiming};

/// Запрос к бэкенду синтеза
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisRequest {
    /// Текст с префиксом директив подачи
    pub text: String,
    /// Идентификатор голоса
    pub voice_id: String,
    /// Идентификатор модели
    pub model_id: String,
    /// Параметры голоса
    pub voice_settings: VoiceSettings,
    /// Таймаут запроса
    #[serde(skip)]
    pub timeout: Duration,
}

/// Посимвольное выравнивание от бэкенда
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterAlignment {
    /// Символы произнесенного текста
    pub characters: Vec<String>,
    /// Времена начала символов, секунды
    pub character_start_times_seconds: Vec<f64>,
    /// Времена конца символов, секунды
    pub character_end_times_seconds: Vec<f64>,
}

/// Ответ бэкенда синтеза
#[derive(Debug, Clone)]
pub struct BackendResponse {
    /// Аудиоданные
    pub audio: Bytes,
    /// Посимвольное выравнивание, если бэкенд его вернул
    pub alignment: Option<CharacterAlignment>,
}

/// Бэкенд синтеза речи
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Синтезировать один фрагмент текста
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<BackendResponse>;

    /// Имя бэкенда для логов
    fn name(&self) -> &str {
        "synthesis"
    }
}

#[derive(Debug, Deserialize)]
struct TimestampedSpeechResponse {
    audio_base64: String,
    #[serde(default)]
    alignment: Option<CharacterAlignment>,
}

/// HTTP-клиент эндпоинта синтеза с временными метками
pub struct ElevenLabsBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ElevenLabsBackend {
    /// Создать новый экземпляр ElevenLabsBackend
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SynthesisBackend for ElevenLabsBackend {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<BackendResponse> {
        if self.api_key.trim().is_empty() {
            return Err(MontageError::Configuration(
                "ElevenLabs API key is required for synthesis".to_string(),
            ));
        }

        let url = format!(
            "{}/v1/text-to-speech/{}/with-timestamps",
            self.base_url, request.voice_id
        );

        log::debug!(
            "Sending synthesis request: voice={}, model={}, {} chars",
            request.voice_id,
            request.model_id,
            request.text.chars().count()
        );

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .timeout(request.timeout)
            .json(&serde_json::json!({
                "text": request.text,
                "model_id": request.model_id,
                "voice_settings": request.voice_settings,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.text().await {
                Ok(text) => text,
                Err(e) => format!("Failed to read error response: {}", e),
            };
            // 429 и 5xx временные, остальное (авторизация, квота,
            // валидация, политика контента) — терминальные
            let retryable = status.as_u16() == 429 || status.is_server_error();
            log::error!(
                "Synthesis backend error (status {}, retryable {}): {}",
                status,
                retryable,
                message
            );
            return Err(MontageError::Backend {
                status: status.as_u16(),
                message,
                retryable,
            });
        }

        let body: TimestampedSpeechResponse = response.json().await?;
        let audio = general_purpose::STANDARD
            .decode(&body.audio_base64)
            .map_err(|e| MontageError::Other(format!("Failed to decode audio payload: {}", e)))?;

        if audio.is_empty() {
            return Err(MontageError::Backend {
                status: status.as_u16(),
                message: "Backend returned empty audio".to_string(),
                retryable: true,
            });
        }

        Ok(BackendResponse {
            audio: Bytes::from(audio),
            alignment: body.alignment,
        })
    }

    fn name(&self) -> &str {
        "elevenlabs"
    }
}

lazy_static! {
    static ref HTML_TAG_RE: Regex = Regex::new(r"<[^>]*>").unwrap();
}

/// Подготовка текста к синтезу
///
/// Удаляет HTML-разметку, декодирует HTML-сущности и нормализует пробелы.
pub fn prepare_text_for_synthesis(text: &str) -> String {
    let text = HTML_TAG_RE.replace_all(text, "");

    let text = text
        .to_string()
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&apos;", "'");

    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Слово без пунктуации по краям, для подсветки текста
fn clean_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-')
        .to_string()
}

/// Сгруппировать посимвольное выравнивание в пословные метки
///
/// Границы слов — пробельные символы; содержимое квадратных скобок
/// считается директивой подачи и пропускается целиком. Времена в ответе
/// бэкенда заданы в секундах, метки возвращаются в миллисекундах
/// относительно начала сегмента.
pub fn group_alignment_words(
    alignment: &CharacterAlignment,
    segment_index: usize,
) -> Result<Vec<WordTiming>> {
    let char_count = alignment.characters.len();
    if alignment.character_start_times_seconds.len() != char_count
        || alignment.character_end_times_seconds.len() != char_count
    {
        return Err(MontageError::TimingValidation(format!(
            "alignment array length mismatch: {} characters, {} start times, {} end times",
            char_count,
            alignment.character_start_times_seconds.len(),
            alignment.character_end_times_seconds.len()
        )));
    }

    let mut words = Vec::new();
    let mut current = String::new();
    let mut word_start_ms = 0.0;
    let mut word_end_ms = 0.0;
    let mut in_directive = false;

    let mut flush = |current: &mut String, start: f64, end: f64| {
        if !current.is_empty() {
            words.push(WordTiming {
                text: current.clone(),
                clean_text: clean_word(current),
                start_ms: start,
                end_ms: end,
                segment_index,
            });
            current.clear();
        }
    };

    for (i, ch) in alignment.characters.iter().enumerate() {
        let start_ms = alignment.character_start_times_seconds[i] * 1000.0;
        let end_ms = alignment.character_end_times_seconds[i] * 1000.0;

        if in_directive {
            if ch == "]" {
                in_directive = false;
            }
            continue;
        }

        if ch == "[" {
            flush(&mut current, word_start_ms, word_end_ms);
            in_directive = true;
            continue;
        }

        if ch.chars().all(char::is_whitespace) {
            flush(&mut current, word_start_ms, word_end_ms);
            continue;
        }

        if current.is_empty() {
            word_start_ms = start_ms;
        }
        current.push_str(ch);
        word_end_ms = end_ms;
    }
    flush(&mut current, word_start_ms, word_end_ms);

    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alignment_from(text: &str, step_ms: f64) -> CharacterAlignment {
        let characters: Vec<String> = text.chars().map(|c| c.to_string()).collect();
        let starts: Vec<f64> = (0..characters.len())
            .map(|i| i as f64 * step_ms / 1000.0)
            .collect();
        let ends: Vec<f64> = (0..characters.len())
            .map(|i| (i + 1) as f64 * step_ms / 1000.0)
            .collect();
        CharacterAlignment {
            characters,
            character_start_times_seconds: starts,
            character_end_times_seconds: ends,
        }
    }

    #[test]
    fn test_group_words() {
        let alignment = alignment_from("Hello world", 10.0);
        let words = group_alignment_words(&alignment, 3).unwrap();

        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "Hello");
        assert_eq!(words[0].start_ms, 0.0);
        assert_eq!(words[0].end_ms, 50.0);
        assert_eq!(words[1].text, "world");
        assert_eq!(words[1].start_ms, 60.0);
        assert_eq!(words[1].segment_index, 3);
    }

    #[test]
    fn test_directive_markup_is_stripped() {
        let alignment = alignment_from("[whispers] Hello world", 10.0);
        let words = group_alignment_words(&alignment, 0).unwrap();

        // Директива не становится словом и не искажает тайминг слов
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "Hello");
        assert!(words[0].start_ms >= 110.0);
    }

    #[test]
    fn test_clean_text_strips_punctuation() {
        let alignment = alignment_from("\"Hello,\" she said.", 10.0);
        let words = group_alignment_words(&alignment, 0).unwrap();

        assert_eq!(words.len(), 3);
        assert_eq!(words[0].text, "\"Hello,\"");
        assert_eq!(words[0].clean_text, "Hello");
        assert_eq!(words[2].clean_text, "said");
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let mut alignment = alignment_from("Hi", 10.0);
        alignment.character_end_times_seconds.pop();

        assert!(group_alignment_words(&alignment, 0).is_err());
    }

    #[test]
    fn test_prepare_text() {
        assert_eq!(
            prepare_text_for_synthesis("<i>Hello</i>&nbsp;  world &amp; friends"),
            "Hello world & friends"
        );
    }
}
