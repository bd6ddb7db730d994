//! Модель данных конвейера озвучивания
//!
//! Сегмент — одна реплика повествования или диалога с метаданными подачи.
//! Порядок воспроизведения фиксируется полем `index` и должен быть
//! воспроизведен точно независимо от порядка завершения синтеза.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::tts::direction::EmotionTag;

/// Роль говорящего
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SpeakerRole {
    /// Рассказчик
    Narrator,
    /// Персонаж
    Character,
}

/// Сегмент повествования или диалога
#[derive(Debug, Clone)]
pub struct Segment {
    /// Порядковый номер сегмента в дорожке
    pub index: usize,
    /// Имя говорящего
    pub speaker: String,
    /// Роль говорящего
    pub role: SpeakerRole,
    /// Текст реплики
    pub text: String,
    /// Эмоциональная окраска реплики
    pub emotion: Option<EmotionTag>,
    /// Дополнительное указание по подаче ("slowly", "sarcastic", ...)
    pub delivery: Option<String>,
    /// Идентификатор голоса бэкенда
    pub voice_id: String,
    /// Желаемая стабильность голоса (0.0 - 1.0), до квантования
    pub stability_hint: Option<f32>,
    /// Желаемая выраженность стиля (0.0 - 1.0)
    pub style_hint: Option<f32>,
}

impl Segment {
    /// Создать сегмент рассказчика
    pub fn narrator(index: usize, text: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            index,
            speaker: "narrator".to_string(),
            role: SpeakerRole::Narrator,
            text: text.into(),
            emotion: None,
            delivery: None,
            voice_id: voice_id.into(),
            stability_hint: None,
            style_hint: None,
        }
    }

    /// Создать сегмент персонажа
    pub fn character(
        index: usize,
        speaker: impl Into<String>,
        text: impl Into<String>,
        voice_id: impl Into<String>,
    ) -> Self {
        Self {
            index,
            speaker: speaker.into(),
            role: SpeakerRole::Character,
            text: text.into(),
            emotion: None,
            delivery: None,
            voice_id: voice_id.into(),
            stability_hint: None,
            style_hint: None,
        }
    }

    /// Задать эмоциональную окраску
    pub fn with_emotion(mut self, emotion: EmotionTag) -> Self {
        self.emotion = Some(emotion);
        self
    }

    /// Задать указание по подаче
    pub fn with_delivery(mut self, delivery: impl Into<String>) -> Self {
        self.delivery = Some(delivery.into());
        self
    }
}

/// Временная метка одного произнесенного слова
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WordTiming {
    /// Слово в том виде, как оно встретилось в тексте
    pub text: String,
    /// Слово без пунктуации, для подсветки
    pub clean_text: String,
    /// Начало слова от начала дорожки, мс
    pub start_ms: f64,
    /// Конец слова от начала дорожки, мс
    pub end_ms: f64,
    /// Номер сегмента, которому принадлежит слово
    pub segment_index: usize,
}

/// Результат синтеза одного сегмента
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Номер сегмента
    pub segment_index: usize,
    /// Аудиоданные сегмента
    pub audio: Bytes,
    /// Метки слов относительно начала сегмента
    pub word_timings: Vec<WordTiming>,
    /// Длительность сегмента, мс
    pub duration_ms: f64,
}

/// Параметры голоса бэкенда синтеза
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceSettings {
    /// Стабильность голоса: эндпоинт с метками принимает только {0.0, 0.5, 1.0}
    pub stability: f32,
    /// Сходство с оригинальным голосом
    pub similarity_boost: f32,
    /// Выраженность стиля
    pub style: f32,
    /// Усиление характера говорящего
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_speaker_boost: Option<bool>,
}

/// Стратегия сборки, выбранная для запроса
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssemblyStrategy {
    /// Один сегмент: только легкий фейд по краям
    SinglePassThrough,
    /// Небольшой набор: цепочка попарных кроссфейдов
    SmallSetCrossfade,
    /// Средний набор: паузы по типу перехода и один concat
    GapConcat,
    /// Большой набор: пакеты по batch_size со склейкой кроссфейдами
    BatchedCrossfade,
}

impl AssemblyStrategy {
    /// Получить строковое представление стратегии
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SinglePassThrough => "single_pass_through",
            Self::SmallSetCrossfade => "small_set_crossfade",
            Self::GapConcat => "gap_concat",
            Self::BatchedCrossfade => "batched_crossfade",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_builders() {
        let seg = Segment::narrator(0, "Once upon a time.", "voice-a");
        assert_eq!(seg.role, SpeakerRole::Narrator);
        assert_eq!(seg.speaker, "narrator");

        let seg = Segment::character(1, "alice", "Hello!", "voice-b")
            .with_emotion(EmotionTag::Excitement)
            .with_delivery("quickly");
        assert_eq!(seg.role, SpeakerRole::Character);
        assert_eq!(seg.emotion, Some(EmotionTag::Excitement));
        assert_eq!(seg.delivery.as_deref(), Some("quickly"));
    }

    #[test]
    fn test_strategy_as_str() {
        assert_eq!(AssemblyStrategy::SmallSetCrossfade.as_str(), "small_set_crossfade");
        assert_eq!(AssemblyStrategy::BatchedCrossfade.as_str(), "batched_crossfade");
    }
}
