//! Модуль обработки ошибок библиотеки tts-montage
//!
//! Этот модуль содержит типы ошибок, которые могут возникнуть при работе библиотеки.
//! Классификация соответствует этапам конвейера: синтез речи, слияние временных
//! меток, сборка аудио, проверка результата.

use thiserror::Error;

/// Ошибки библиотеки tts-montage
#[derive(Debug, Error)]
pub enum MontageError {
    /// Ошибка HTTP запроса
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации/десериализации JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ошибка бэкенда синтеза речи
    #[error("Synthesis backend error (status {status}): {message}")]
    Backend {
        /// HTTP статус ответа
        status: u16,
        /// Текст ошибки от бэкенда
        message: String,
        /// Имеет ли смысл повторный запрос
        retryable: bool,
    },

    /// Предохранитель открыт, запросы к бэкенду не отправляются
    #[error("Circuit breaker is open, retry in {remaining_ms} ms")]
    CircuitOpen {
        /// Время до полуоткрытия предохранителя
        remaining_ms: u64,
    },

    /// Синтез речи не удался ни для одного сегмента
    #[error("Speech synthesis failed for all segments: {0:?}")]
    SynthesisFailed(Vec<usize>),

    /// Ошибка внешнего аудио-движка
    #[error("Audio engine error: {0}")]
    AudioEngine(String),

    /// Аудио-движок недоступен
    #[error("Audio engine is not available: {0}")]
    EngineUnavailable(String),

    /// Нарушение инвариантов временных меток
    #[error("Timing validation error: {0}")]
    TimingValidation(String),

    /// Ошибка конфигурации
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Другая ошибка
    #[error("Other error: {0}")]
    Other(String),
}

impl MontageError {
    /// Является ли ошибка временной, то есть повторный запрос имеет смысл
    pub fn is_retryable(&self) -> bool {
        match self {
            MontageError::Backend { retryable, .. } => *retryable,
            MontageError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

impl From<&str> for MontageError {
    fn from(s: &str) -> Self {
        MontageError::Other(s.to_string())
    }
}

impl From<String> for MontageError {
    fn from(s: String) -> Self {
        MontageError::Other(s)
    }
}

/// Тип Result для библиотеки tts-montage
pub type Result<T> = std::result::Result<T, MontageError>;
