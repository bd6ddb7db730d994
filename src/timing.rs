//! Модуль реконструкции временных меток
//!
//! Склеивает пословные метки независимых сегментов в единую шкалу дорожки,
//! пересчитывает ее после физической сборки (кроссфейды сжимают, паузы и
//! подмешивание фона растягивают дорожку относительно наивной конкатенации)
//! и проверяет инварианты результата. Нарушение инвариантов — признак
//! сломанного контракта выше по конвейеру, оно никогда не маскируется.

use crate::config::TimingTolerances;
use crate::error::{MontageError, Result};
use crate::segment::{SynthesisResult, WordTiming};

/// Слить метки сегментов в единую шкалу
///
/// Результаты должны идти в порядке индексов. Метки каждого сегмента
/// смещаются на накопленную длительность, после чего накопленная
/// длительность растет на собственную длительность сегмента
/// (авторитетное поле, при его отсутствии — конец последнего слова).
///
/// Возвращает метки и наивную суммарную длительность в миллисекундах.
pub fn merge_timings(results: &[SynthesisResult]) -> (Vec<WordTiming>, f64) {
    let mut merged = Vec::new();
    let mut cumulative_ms = 0.0;

    for result in results {
        for word in &result.word_timings {
            let mut word = word.clone();
            word.start_ms += cumulative_ms;
            word.end_ms += cumulative_ms;
            merged.push(word);
        }

        let segment_duration = if result.duration_ms > 0.0 {
            result.duration_ms
        } else {
            result.word_timings.last().map(|w| w.end_ms).unwrap_or(0.0)
        };
        cumulative_ms += segment_duration;
    }

    (merged, cumulative_ms)
}

/// Пересчитать метки после физической сборки
///
/// Если фактическая длительность дорожки разошлась с наивной больше чем
/// на порог, все метки умножаются на отношение длительностей и фактическая
/// длительность становится истиной. Меньшее расхождение считается шумом
/// измерения, и истиной остается наивная длительность.
///
/// Возвращает длительность, которой следует доверять дальше.
pub fn rescale_timings(
    timings: &mut [WordTiming],
    naive_ms: f64,
    actual_ms: f64,
    threshold: f64,
) -> f64 {
    if naive_ms <= 0.0 || actual_ms <= 0.0 {
        return naive_ms.max(actual_ms);
    }

    let scale = actual_ms / naive_ms;
    if (scale - 1.0).abs() <= threshold {
        return naive_ms;
    }

    log::info!(
        "Rescaling word timings by {:.4}: naive {:.0} ms, assembled {:.0} ms",
        scale,
        naive_ms,
        actual_ms
    );
    for word in timings.iter_mut() {
        word.start_ms *= scale;
        word.end_ms *= scale;
    }
    actual_ms
}

/// Проверить инварианты итоговых меток
pub fn validate_timings(
    timings: &[WordTiming],
    total_ms: f64,
    tolerances: &TimingTolerances,
) -> Result<()> {
    if timings.is_empty() {
        return Err(MontageError::TimingValidation(
            "word timing list is empty".to_string(),
        ));
    }

    if total_ms <= 0.0 {
        return Err(MontageError::TimingValidation(format!(
            "total duration {} ms is not positive",
            total_ms
        )));
    }
    if total_ms > tolerances.max_total_duration_ms {
        return Err(MontageError::TimingValidation(format!(
            "total duration {:.0} ms exceeds the {:.0} ms limit",
            total_ms, tolerances.max_total_duration_ms
        )));
    }

    let first = &timings[0];
    if first.start_ms > tolerances.lead_in_fail_ms {
        return Err(MontageError::TimingValidation(format!(
            "first word starts at {:.0} ms, past the {:.0} ms lead-in limit",
            first.start_ms, tolerances.lead_in_fail_ms
        )));
    }
    if first.start_ms > tolerances.lead_in_warn_ms {
        log::warn!(
            "First word starts late at {:.0} ms (warn threshold {:.0} ms)",
            first.start_ms,
            tolerances.lead_in_warn_ms
        );
    }

    let last = &timings[timings.len() - 1];
    if (total_ms - last.end_ms).abs() > tolerances.end_drift_tolerance_ms {
        return Err(MontageError::TimingValidation(format!(
            "last word ends at {:.0} ms, {:.0} ms away from the {:.0} ms track end",
            last.end_ms,
            (total_ms - last.end_ms).abs(),
            total_ms
        )));
    }

    for (i, pair) in timings.windows(2).enumerate() {
        if pair[1].start_ms < pair[0].start_ms {
            return Err(MontageError::TimingValidation(format!(
                "word start times decrease between words {} and {} ({:.1} ms -> {:.1} ms)",
                i,
                i + 1,
                pair[0].start_ms,
                pair[1].start_ms
            )));
        }
    }

    Ok(())
}
