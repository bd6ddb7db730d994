//! Клиент синтеза речи
//!
//! Этот модуль оборачивает бэкенд синтеза дисциплиной продакшена:
//! кэширование по хэшу содержимого, разбиение текста сверх жесткого лимита
//! эндпоинта, повторы с экспоненциальной задержкой и джиттером, а также
//! предохранитель, прекращающий запросы к систематически падающему бэкенду.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use base64::{engine::general_purpose, Engine};
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::MontageConfig;
use crate::error::{MontageError, Result};
use crate::media::assembler::AudioAssembler;
use crate::segment::{Segment, SynthesisResult, VoiceSettings, WordTiming};
use crate::tts::cache::{cache_key, AudioCache};
use crate::tts::direction::{directive_prefix, resolve_stability};
use crate::tts::elevenlabs::{
    group_alignment_words, prepare_text_for_synthesis, SynthesisBackend, SynthesisRequest,
};
use crate::utils::ffmpeg::estimate_mp3_duration_ms;

/// Знаки конца предложения для разбиения длинного текста
const SENTENCE_BREAKS: &[char] = &['.', '!', '?', '…'];
/// Границы клауз — запасной вариант разбиения
const CLAUSE_BREAKS: &[char] = &[',', ';', ':', '—'];

struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Предохранитель бэкенда синтеза
///
/// Открывается после порогового числа последовательных ошибок, на время
/// охлаждения отклоняет запросы без обращения к сети, затем полуоткрывается
/// и пропускает один пробный запрос.
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Создать предохранитель с порогом ошибок и временем охлаждения
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                open_until: None,
            }),
        }
    }

    /// Проверить, можно ли отправить запрос
    pub fn check(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(open_until) = state.open_until {
            let now = Instant::now();
            if now < open_until {
                return Err(MontageError::CircuitOpen {
                    remaining_ms: open_until.duration_since(now).as_millis() as u64,
                });
            }
            // Полуоткрытое состояние: пропускаем один пробный запрос,
            // счетчик ошибок не сбрасываем, чтобы неудачная проба
            // немедленно открыла предохранитель снова
            state.open_until = None;
        }
        Ok(())
    }

    /// Зафиксировать успешный запрос
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    /// Зафиксировать неудачный запрос
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            state.open_until = Some(Instant::now() + self.cooldown);
            log::warn!(
                "Circuit breaker opened after {} consecutive failures, cooling down for {} ms",
                state.consecutive_failures,
                self.cooldown.as_millis()
            );
        }
    }
}

/// Сериализуемая форма результата синтеза для кэша
#[derive(Debug, Serialize, Deserialize)]
struct CachedSynthesis {
    audio_base64: String,
    word_timings: Vec<WordTiming>,
    duration_ms: f64,
}

/// Клиент синтеза одного сегмента
pub struct SynthesisClient {
    backend: Arc<dyn SynthesisBackend>,
    cache: Option<Arc<dyn AudioCache>>,
    assembler: Arc<AudioAssembler>,
    config: Arc<MontageConfig>,
    breaker: CircuitBreaker,
}

impl SynthesisClient {
    /// Создать новый экземпляр SynthesisClient
    ///
    /// Кэш и бэкенд передаются явно: клиент не держит глобального состояния.
    pub fn new(
        backend: Arc<dyn SynthesisBackend>,
        cache: Option<Arc<dyn AudioCache>>,
        assembler: Arc<AudioAssembler>,
        config: Arc<MontageConfig>,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            config.retry.breaker_failure_threshold,
            Duration::from_millis(config.retry.breaker_cooldown_ms),
        );

        Self {
            backend,
            cache,
            assembler,
            config,
            breaker,
        }
    }

    /// Синтезировать один сегмент
    pub async fn synthesize(&self, segment: &Segment) -> Result<SynthesisResult> {
        let body = prepare_text_for_synthesis(&segment.text);
        if body.is_empty() {
            return Err(MontageError::Configuration(format!(
                "Segment {} has no speakable text after normalization",
                segment.index
            )));
        }

        let prefix = directive_prefix(segment);
        let stability = resolve_stability(segment, &self.config);
        let settings = VoiceSettings {
            stability,
            similarity_boost: self.config.similarity_boost,
            style: segment.style_hint.unwrap_or(self.config.style),
            use_speaker_boost: Some(self.config.speaker_boost),
        };

        let fingerprint = format!(
            "{}:{:.1}:{:.2}:{:.2}",
            self.config.model.as_str(),
            settings.stability,
            settings.similarity_boost,
            settings.style
        );
        let key = cache_key(&format!("{}{}", prefix, body), &segment.voice_id, &fingerprint);

        if self.config.use_caching {
            if let Some(cached) = self.cache_get(&key, segment.index).await {
                log::debug!("Cache hit for segment {}", segment.index);
                return Ok(cached);
            }
        }

        let chunks = split_text_for_synthesis(&body, self.config.max_chunk_chars);
        if chunks.len() > 1 {
            log::info!(
                "Segment {} exceeds the backend payload limit, split into {} chunks",
                segment.index,
                chunks.len()
            );
        }

        let mut chunk_audio: Vec<Bytes> = Vec::with_capacity(chunks.len());
        let mut word_timings: Vec<WordTiming> = Vec::new();
        // Пауза и кроссфейд между частями компенсируют друг друга в сумме
        let inter_chunk_ms = self.config.chunk_gap_ms - self.config.chunk_crossfade_ms;
        let mut cumulative_ms = 0.0;

        for chunk in &chunks {
            let text = format!("{}{}", prefix, chunk);
            let request = SynthesisRequest {
                timeout: self.request_timeout(text.chars().count()),
                text,
                voice_id: segment.voice_id.clone(),
                model_id: self.config.model.as_str().to_string(),
                voice_settings: settings.clone(),
            };

            let response = self.call_with_retry(&request, segment.index).await?;

            let chunk_words = match &response.alignment {
                Some(alignment) => group_alignment_words(alignment, segment.index)?,
                None => Vec::new(),
            };
            let chunk_duration = chunk_words
                .last()
                .map(|w| w.end_ms)
                .unwrap_or_else(|| {
                    estimate_mp3_duration_ms(
                        response.audio.len(),
                        self.config.assembly.mp3_bitrate_kbps,
                    )
                });

            for mut word in chunk_words {
                word.start_ms += cumulative_ms;
                word.end_ms += cumulative_ms;
                word_timings.push(word);
            }

            cumulative_ms += chunk_duration + inter_chunk_ms;
            chunk_audio.push(response.audio);
        }
        // Последняя часть паузы не получает
        let duration_ms = cumulative_ms - inter_chunk_ms;

        let audio = if chunk_audio.len() == 1 {
            chunk_audio.pop().expect("one chunk is present")
        } else {
            self.assembler.join_chunks(&chunk_audio).await?
        };

        let result = SynthesisResult {
            segment_index: segment.index,
            audio,
            word_timings,
            duration_ms,
        };

        if self.config.use_caching {
            self.cache_set(&key, &result).await;
        }

        Ok(result)
    }

    /// Таймаут запроса, растущий с длиной текста
    fn request_timeout(&self, text_chars: usize) -> Duration {
        let scaled = self.config.request_timeout_base_ms
            + self.config.request_timeout_per_kchar_ms * (text_chars as u64 / 1_000);
        Duration::from_millis(scaled.min(self.config.request_timeout_max_ms))
    }

    /// Задержка перед повтором с экспоненциальным ростом и джиттером
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.config.retry.base_delay_ms.saturating_mul(1u64 << (attempt - 1).min(16));
        let capped = exp.min(self.config.retry.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((capped as f64 * jitter) as u64)
    }

    /// Вызов бэкенда с повторами под контролем предохранителя
    async fn call_with_retry(
        &self,
        request: &SynthesisRequest,
        segment_index: usize,
    ) -> Result<crate::tts::elevenlabs::BackendResponse> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.breaker.check()?;

            match self.backend.synthesize(request).await {
                Ok(response) => {
                    self.breaker.record_success();
                    return Ok(response);
                }
                Err(e) => {
                    self.breaker.record_failure();
                    if !e.is_retryable() || attempt >= self.config.retry.max_attempts {
                        log::error!(
                            "Synthesis failed for segment {} after {} attempt(s): {}",
                            segment_index,
                            attempt,
                            e
                        );
                        return Err(e);
                    }

                    let delay = self.backoff_delay(attempt);
                    log::warn!(
                        "Retryable synthesis error for segment {} (attempt {}/{}): {}; retrying in {} ms",
                        segment_index,
                        attempt,
                        self.config.retry.max_attempts,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn cache_get(&self, key: &str, segment_index: usize) -> Option<SynthesisResult> {
        let cache = self.cache.as_ref()?;
        let raw = cache.get(key).await?;
        let cached: CachedSynthesis = match serde_json::from_slice(&raw) {
            Ok(cached) => cached,
            Err(e) => {
                log::warn!("Discarding malformed cache entry {}: {}", key, e);
                return None;
            }
        };
        let audio = match general_purpose::STANDARD.decode(&cached.audio_base64) {
            Ok(audio) => Bytes::from(audio),
            Err(e) => {
                log::warn!("Discarding undecodable cache entry {}: {}", key, e);
                return None;
            }
        };

        let mut word_timings = cached.word_timings;
        for word in &mut word_timings {
            word.segment_index = segment_index;
        }

        Some(SynthesisResult {
            segment_index,
            audio,
            word_timings,
            duration_ms: cached.duration_ms,
        })
    }

    async fn cache_set(&self, key: &str, result: &SynthesisResult) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let cached = CachedSynthesis {
            audio_base64: general_purpose::STANDARD.encode(&result.audio),
            word_timings: result.word_timings.clone(),
            duration_ms: result.duration_ms,
        };
        match serde_json::to_vec(&cached) {
            Ok(raw) => {
                cache
                    .set(
                        key,
                        Bytes::from(raw),
                        Duration::from_secs(self.config.cache_ttl_secs),
                    )
                    .await;
            }
            Err(e) => log::warn!("Failed to serialize cache entry {}: {}", key, e),
        }
    }
}

/// Разбить текст на части не длиннее жесткого лимита бэкенда
///
/// Точка разреза ищется среди знаков конца предложения перед лимитом,
/// затем среди границ клауз, в крайнем случае текст режется по лимиту.
pub fn split_text_for_synthesis(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text.trim();

    while rest.chars().count() > max_chars {
        let window: Vec<(usize, char)> = rest.char_indices().take(max_chars).collect();

        let break_at = find_last_break(&window, SENTENCE_BREAKS)
            .or_else(|| find_last_break(&window, CLAUSE_BREAKS))
            .unwrap_or_else(|| {
                // Жесткий разрез: байтовая граница следующего символа
                rest.char_indices()
                    .nth(max_chars)
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len())
            });

        let (head, tail) = rest.split_at(break_at);
        let head = head.trim();
        if !head.is_empty() {
            chunks.push(head.to_string());
        }
        rest = tail.trim_start();
    }

    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Байтовая позиция сразу после последнего из перечисленных знаков
fn find_last_break(window: &[(usize, char)], breaks: &[char]) -> Option<usize> {
    window
        .iter()
        .rev()
        .find(|(_, c)| breaks.contains(c))
        .map(|(i, c)| i + c.len_utf8())
}
