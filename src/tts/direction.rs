//! Модуль голосовой режиссуры
//!
//! Преобразует эмоциональные метаданные сегмента в параметры бэкенда:
//! квантованную стабильность голоса и префикс встроенных директив подачи.
//! Таблица соответствия эмоций и директив проверяется на этапе компиляции
//! (match по перечислению), неизвестные директивы отбрасываются, а не
//! передаются бэкенду как есть.

use serde::{Deserialize, Serialize};

use crate::config::MontageConfig;
use crate::segment::{Segment, SpeakerRole};

/// Эмоциональная окраска реплики
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmotionTag {
    /// Нейтральная подача
    Neutral,
    /// Радость
    Happy,
    /// Грусть
    Sad,
    /// Страх
    Fear,
    /// Гнев
    Anger,
    /// Возбуждение
    Excitement,
    /// Шепот
    Whisper,
    /// Крик
    Shout,
    /// Любопытство
    Curious,
    /// Серьезность
    Serious,
}

impl EmotionTag {
    /// Встроенная директива бэкенда для этой эмоции
    pub fn as_directive(&self) -> Option<&'static str> {
        match self {
            Self::Neutral => None,
            Self::Happy => Some("cheerful"),
            Self::Sad => Some("sad"),
            Self::Fear => Some("fearful"),
            Self::Anger => Some("angry"),
            Self::Excitement => Some("excited"),
            Self::Whisper => Some("whispers"),
            Self::Shout => Some("shouts"),
            Self::Curious => Some("curious"),
            Self::Serious => Some("serious"),
        }
    }

    /// Является ли эмоция высокоинтенсивной
    ///
    /// Высокоинтенсивные эмоции требуют максимально выразительной подачи
    /// независимо от роли говорящего.
    pub fn is_high_intensity(&self) -> bool {
        matches!(
            self,
            Self::Fear | Self::Anger | Self::Excitement | Self::Whisper | Self::Shout
        )
    }
}

/// Директивы, которые эндпоинт синтеза принимает внутри текста.
/// Все остальные отбрасываются до отправки запроса.
const DIRECTIVE_WHITELIST: &[&str] = &[
    "angry",
    "cheerful",
    "curious",
    "excited",
    "fearful",
    "laughs",
    "quickly",
    "sad",
    "sarcastic",
    "serious",
    "shouts",
    "sighs",
    "slowly",
    "whispers",
];

/// Входит ли директива в список поддерживаемых бэкендом
pub fn is_whitelisted_directive(directive: &str) -> bool {
    let lowered = directive.trim().to_lowercase();
    DIRECTIVE_WHITELIST.contains(&lowered.as_str())
}

/// Собрать префикс встроенных директив для сегмента
///
/// Директивы дедуплицируются без учета регистра; не входящие в список
/// поддерживаемых отбрасываются с предупреждением в лог.
pub fn directive_prefix(segment: &Segment) -> String {
    let mut directives: Vec<String> = Vec::new();

    if let Some(emotion) = &segment.emotion {
        if let Some(directive) = emotion.as_directive() {
            directives.push(directive.to_string());
        }
    }

    if let Some(delivery) = &segment.delivery {
        let lowered = delivery.trim().to_lowercase();
        if !lowered.is_empty() {
            if is_whitelisted_directive(&lowered) {
                if !directives.iter().any(|d| d.eq_ignore_ascii_case(&lowered)) {
                    directives.push(lowered);
                }
            } else {
                log::warn!(
                    "Dropping unsupported delivery directive '{}' for segment {}",
                    delivery,
                    segment.index
                );
            }
        }
    }

    if directives.is_empty() {
        String::new()
    } else {
        let tags: Vec<String> = directives.iter().map(|d| format!("[{}]", d)).collect();
        format!("{} ", tags.join(""))
    }
}

/// Квантование стабильности голоса
///
/// Эндпоинт синтеза с метками принимает только три значения стабильности.
/// Непрерывное предпочтение отображается порогами: <= 0.25 -> 0.0,
/// <= 0.75 -> 0.5, иначе -> 1.0.
pub fn quantize_stability(preference: f32) -> f32 {
    if preference <= 0.25 {
        0.0
    } else if preference <= 0.75 {
        0.5
    } else {
        1.0
    }
}

/// Вычислить стабильность голоса для сегмента
///
/// База берется из подсказки сегмента или из роли говорящего; рассказчик
/// получает более консистентную подачу. Высокоинтенсивная эмоция приводит
/// к максимально выразительной корзине независимо от роли.
pub fn resolve_stability(segment: &Segment, config: &MontageConfig) -> f32 {
    if let Some(emotion) = &segment.emotion {
        if emotion.is_high_intensity() {
            return 0.0;
        }
    }

    let preference = segment.stability_hint.unwrap_or(match segment.role {
        SpeakerRole::Narrator => config.narrator_stability,
        SpeakerRole::Character => config.character_stability,
    });

    quantize_stability(preference)
}
