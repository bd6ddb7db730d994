//! Модуль конфигурации библиотеки tts-montage
//!
//! Этот модуль содержит структуры и перечисления для настройки библиотеки.
//! Все эмпирически подобранные допуски (длительности кроссфейдов и пауз,
//! размер пакета сборки, пороги проверки временных меток) вынесены сюда
//! как настраиваемые значения, а не фиксированные константы.

use serde::{Deserialize, Serialize};

/// Модель синтеза речи для использования с ElevenLabs API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SynthesisModel {
    /// Многоязычная модель (лучшее качество)
    Multilingual,
    /// Быстрая модель
    Turbo,
    /// Самая дешевая модель с минимальной задержкой
    Flash,
}

impl Default for SynthesisModel {
    fn default() -> Self {
        Self::Multilingual
    }
}

impl SynthesisModel {
    /// Получить строковое представление модели
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Multilingual => "eleven_multilingual_v2",
            Self::Turbo => "eleven_turbo_v2_5",
            Self::Flash => "eleven_flash_v2_5",
        }
    }
}

/// Политика повторов и предохранителя для запросов к бэкенду
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Максимальное количество попыток на один запрос
    pub max_attempts: u32,
    /// Базовая задержка перед повтором, мс
    pub base_delay_ms: u64,
    /// Максимальная задержка перед повтором, мс
    pub max_delay_ms: u64,
    /// Количество последовательных ошибок до открытия предохранителя
    pub breaker_failure_threshold: u32,
    /// Время охлаждения открытого предохранителя, мс
    pub breaker_cooldown_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            breaker_failure_threshold: 5,
            breaker_cooldown_ms: 30_000,
        }
    }
}

/// Настройки сборки аудиодорожки
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Кроссфейд между репликами одного говорящего, мс
    pub same_speaker_crossfade_ms: f64,
    /// Кроссфейд при смене говорящего, мс
    pub speaker_change_crossfade_ms: f64,
    /// Кроссфейд при склейке пакетов, мс
    pub join_crossfade_ms: f64,
    /// Пауза между репликами одного говорящего, мс
    pub same_speaker_gap_ms: f64,
    /// Пауза при смене говорящего, мс
    pub speaker_change_gap_ms: f64,
    /// Пауза при переходе к рассказчику и обратно, мс
    /// (None = использовать speaker_change_gap_ms)
    pub narrator_gap_ms: Option<f64>,
    /// Хвостовая тишина перед кроссфейдом, мс
    pub tail_pad_ms: f64,
    /// Частота среза фильтра удаления постоянной составляющей, Гц
    pub highpass_hz: u32,
    /// Максимальное количество сегментов для попарных кроссфейдов
    pub small_set_max: usize,
    /// Максимальное количество сегментов для сборки одним вызовом движка
    pub gap_concat_max: usize,
    /// Размер пакета при иерархической сборке
    pub batch_size: usize,
    /// Включить нормализацию громкости
    pub normalize_loudness: bool,
    /// Целевая интегральная громкость, LUFS
    pub loudnorm_i: f64,
    /// Максимальный истинный пик, dBTP
    pub loudnorm_tp: f64,
    /// Целевой диапазон громкости, LU
    pub loudnorm_lra: f64,
    /// Таймаут одного вызова аудио-движка, мс
    pub subprocess_timeout_ms: u64,
    /// Битрейт MP3 для оценки длительности по размеру файла, кбит/с
    pub mp3_bitrate_kbps: u32,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            same_speaker_crossfade_ms: 50.0,
            speaker_change_crossfade_ms: 100.0,
            join_crossfade_ms: 100.0,
            same_speaker_gap_ms: 150.0,
            speaker_change_gap_ms: 250.0,
            narrator_gap_ms: None,
            tail_pad_ms: 50.0,
            highpass_hz: 20,
            small_set_max: 5,
            gap_concat_max: 30,
            batch_size: 25,
            normalize_loudness: false,
            loudnorm_i: -16.0,
            loudnorm_tp: -1.5,
            loudnorm_lra: 11.0,
            subprocess_timeout_ms: 120_000,
            mp3_bitrate_kbps: 128,
        }
    }
}

/// Допуски проверки временных меток
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingTolerances {
    /// Максимальная суммарная длительность дорожки, мс
    pub max_total_duration_ms: f64,
    /// Порог предупреждения о задержке первого слова, мс
    pub lead_in_warn_ms: f64,
    /// Порог ошибки о задержке первого слова, мс
    pub lead_in_fail_ms: f64,
    /// Допустимое расхождение конца последнего слова и длительности дорожки, мс
    pub end_drift_tolerance_ms: f64,
    /// Относительный порог пересчета меток после сборки (0.01 = 1%)
    pub rescale_threshold: f64,
}

impl Default for TimingTolerances {
    fn default() -> Self {
        Self {
            max_total_duration_ms: 30.0 * 60.0 * 1000.0,
            lead_in_warn_ms: 400.0,
            lead_in_fail_ms: 1_000.0,
            end_drift_tolerance_ms: 500.0,
            rescale_threshold: 0.01,
        }
    }
}

/// Конфигурация библиотеки
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MontageConfig {
    /// API ключ для ElevenLabs
    pub api_key: String,
    /// Базовый URL API
    pub api_base_url: String,
    /// Модель синтеза речи
    pub model: SynthesisModel,
    /// Максимальное количество одновременных запросов к API
    pub max_concurrent_requests: usize,
    /// Жесткий лимит длины текста одного запроса, символов
    pub max_chunk_chars: usize,
    /// Пауза между частями разбитого сегмента, мс
    pub chunk_gap_ms: f64,
    /// Кроссфейд между частями разбитого сегмента, мс
    pub chunk_crossfade_ms: f64,
    /// Базовая стабильность голоса рассказчика (до квантования)
    pub narrator_stability: f32,
    /// Базовая стабильность голоса персонажа (до квантования)
    pub character_stability: f32,
    /// Сходство с оригинальным голосом (0.0 - 1.0)
    pub similarity_boost: f32,
    /// Выраженность стиля (0.0 - 1.0)
    pub style: f32,
    /// Усиление характера говорящего
    pub speaker_boost: bool,
    /// Базовый таймаут запроса к бэкенду, мс
    pub request_timeout_base_ms: u64,
    /// Добавка к таймауту на каждую тысячу символов, мс
    pub request_timeout_per_kchar_ms: u64,
    /// Максимальный таймаут запроса, мс
    pub request_timeout_max_ms: u64,
    /// Путь к фоновой дорожке, подмешиваемой под озвучку
    pub overlay_audio_path: Option<String>,
    /// Громкость фоновой дорожки (0.0 - 1.0)
    pub overlay_volume: f32,
    /// Громкость озвучки (0.0 - 1.0)
    pub narration_volume: f32,
    /// Использовать кэширование
    pub use_caching: bool,
    /// Директория для дискового кэша (None = кэш в памяти)
    pub cache_dir: Option<String>,
    /// Максимальный размер дискового кэша в байтах
    pub max_cache_size: Option<u64>,
    /// Время жизни записи кэша, секунд
    pub cache_ttl_secs: u64,
    /// Емкость кэша в памяти, записей
    pub cache_capacity: usize,
    /// Удалять временные файлы после завершения
    pub cleanup_temp_files: bool,
    /// Политика повторов и предохранителя
    pub retry: RetryPolicy,
    /// Настройки сборки
    pub assembly: AssemblyConfig,
    /// Допуски временных меток
    pub timing: TimingTolerances,
}

impl Default for MontageConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: "https://api.elevenlabs.io".to_string(),
            model: SynthesisModel::default(),
            max_concurrent_requests: 5,
            max_chunk_chars: 4_800,
            chunk_gap_ms: 50.0,
            chunk_crossfade_ms: 50.0,
            narrator_stability: 0.8,
            character_stability: 0.5,
            similarity_boost: 0.75,
            style: 0.0,
            speaker_boost: true,
            request_timeout_base_ms: 30_000,
            request_timeout_per_kchar_ms: 30_000,
            request_timeout_max_ms: 180_000,
            overlay_audio_path: None,
            overlay_volume: 0.2,
            narration_volume: 1.0,
            use_caching: true,
            cache_dir: None,
            max_cache_size: Some(1024 * 1024 * 1024), // 1 GB
            cache_ttl_secs: 24 * 60 * 60,
            cache_capacity: 256,
            cleanup_temp_files: true,
            retry: RetryPolicy::default(),
            assembly: AssemblyConfig::default(),
            timing: TimingTolerances::default(),
        }
    }
}
