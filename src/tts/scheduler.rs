//! Планировщик пакетного синтеза
//!
//! Прогоняет клиент синтеза по списку сегментов окнами фиксированного
//! размера: все запросы окна уходят одновременно, следующее окно
//! начинается только после полного завершения текущего. Это ограничивает
//! количество одновременных исходящих вызовов, сохраняя параллелизм
//! внутри окна. Порядок завершения внутри окна недетерминирован, поэтому
//! после всех окон результаты сортируются по исходному индексу.

use std::sync::Arc;

use futures::future::join_all;

use crate::error::{MontageError, Result};
use crate::progress::ProgressTracker;
use crate::segment::{Segment, SynthesisResult};
use crate::tts::client::SynthesisClient;

/// Итог пакетного синтеза
#[derive(Debug)]
pub struct SynthesisOutcome {
    /// Успешные результаты, отсортированные по индексу сегмента
    pub results: Vec<SynthesisResult>,
    /// Ошибки по индексам сегментов
    pub failures: Vec<(usize, String)>,
}

/// Планировщик синтеза с ограниченным параллелизмом
pub struct BatchScheduler {
    client: Arc<SynthesisClient>,
    window: usize,
}

impl BatchScheduler {
    /// Создать планировщик с указанным размером окна
    pub fn new(client: Arc<SynthesisClient>, window: usize) -> Self {
        Self {
            client,
            window: window.max(1),
        }
    }

    /// Синтезировать все сегменты, сохранив исходный порядок
    ///
    /// Ошибка отдельного сегмента не фатальна и фиксируется по индексу;
    /// если не удался ни один сегмент, операция завершается ошибкой.
    pub async fn run(
        &self,
        segments: &[Segment],
        tracker: Option<&ProgressTracker>,
    ) -> Result<SynthesisOutcome> {
        let total = segments.len();
        let mut results: Vec<SynthesisResult> = Vec::with_capacity(total);
        let mut failures: Vec<(usize, String)> = Vec::new();
        let mut completed = 0usize;

        for window in segments.chunks(self.window) {
            let mut tasks = Vec::with_capacity(window.len());
            for segment in window {
                let client = self.client.clone();
                let segment = segment.clone();
                let index = segment.index;
                let handle = tokio::spawn(async move { client.synthesize(&segment).await });
                tasks.push((index, handle));
            }

            let indices: Vec<usize> = tasks.iter().map(|(i, _)| *i).collect();
            let handles: Vec<_> = tasks.into_iter().map(|(_, h)| h).collect();

            for (index, joined) in indices.into_iter().zip(join_all(handles).await) {
                completed += 1;
                match joined {
                    Ok(Ok(result)) => results.push(result),
                    Ok(Err(e)) => {
                        log::error!("Synthesis failed for segment {}: {}", index, e);
                        failures.push((index, e.to_string()));
                    }
                    Err(e) => {
                        log::error!("Synthesis task for segment {} aborted: {}", index, e);
                        failures.push((index, format!("task aborted: {}", e)));
                    }
                }
            }

            if let Some(t) = tracker {
                let progress = completed as f32 / total.max(1) as f32 * 100.0;
                t.update_step_progress(
                    progress,
                    Some(format!("Генерация речи: {}/{} сегментов", completed, total)),
                );
            }
        }

        // Завершение внутри окна недетерминировано, восстанавливаем порядок
        results.sort_by_key(|r| r.segment_index);
        failures.sort_by_key(|f| f.0);

        if results.is_empty() && !segments.is_empty() {
            let failed: Vec<usize> = failures.iter().map(|f| f.0).collect();
            return Err(MontageError::SynthesisFailed(failed));
        }

        Ok(SynthesisOutcome { results, failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MontageConfig;
    use crate::error::MontageError;
    use crate::media::assembler::AudioAssembler;
    use crate::media::engine::testing::FakeEngine;
    use crate::tts::elevenlabs::{
        BackendResponse, CharacterAlignment, SynthesisBackend, SynthesisRequest,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Мок-бэкенд с задержкой, зависящей от текста сегмента,
    /// и настраиваемыми отказами
    struct ShufflingBackend {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_markers: Vec<String>,
    }

    impl ShufflingBackend {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                fail_markers: Vec::new(),
            }
        }

        fn failing_on(markers: &[&str]) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                fail_markers: markers.iter().map(|m| m.to_string()).collect(),
            }
        }

        fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SynthesisBackend for ShufflingBackend {
        async fn synthesize(&self, request: &SynthesisRequest) -> crate::error::Result<BackendResponse> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            // Чем короче текст, тем дольше синтез: завершение идет
            // в порядке, обратном порядку сегментов
            let delay = 50u64.saturating_sub(request.text.len() as u64);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_markers.iter().any(|m| request.text.contains(m)) {
                return Err(MontageError::Backend {
                    status: 400,
                    message: "scripted validation failure".to_string(),
                    retryable: false,
                });
            }

            let characters: Vec<String> = request.text.chars().map(|c| c.to_string()).collect();
            let starts: Vec<f64> = (0..characters.len()).map(|i| i as f64 * 0.01).collect();
            let ends: Vec<f64> = (0..characters.len()).map(|i| (i + 1) as f64 * 0.01).collect();

            Ok(BackendResponse {
                audio: Bytes::from(vec![0u8; characters.len() * 10]),
                alignment: Some(CharacterAlignment {
                    characters,
                    character_start_times_seconds: starts,
                    character_end_times_seconds: ends,
                }),
            })
        }
    }

    fn make_scheduler(backend: Arc<ShufflingBackend>, window: usize) -> BatchScheduler {
        let mut config = MontageConfig::default();
        config.use_caching = false;
        config.max_concurrent_requests = window;
        let config = Arc::new(config);
        let assembler = Arc::new(AudioAssembler::new(
            Arc::new(FakeEngine::new()),
            config.clone(),
        ));
        let client = Arc::new(SynthesisClient::new(backend, None, assembler, config));
        BatchScheduler::new(client, window)
    }

    fn numbered_segments(count: usize) -> Vec<Segment> {
        (0..count)
            .map(|i| Segment::narrator(i, format!("{} {}", "word".repeat(i % 4 + 1), i), "voice-a"))
            .collect()
    }

    #[tokio::test]
    async fn test_results_are_ordered_despite_completion_shuffle() {
        let backend = Arc::new(ShufflingBackend::new());
        let scheduler = make_scheduler(backend, 5);
        let segments = numbered_segments(12);

        let outcome = scheduler.run(&segments, None).await.unwrap();

        let indices: Vec<usize> = outcome.results.iter().map(|r| r.segment_index).collect();
        assert_eq!(indices, (0..12).collect::<Vec<_>>());
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_window_bounds_concurrency() {
        let backend = Arc::new(ShufflingBackend::new());
        let scheduler = make_scheduler(backend.clone(), 3);
        let segments = numbered_segments(10);

        scheduler.run(&segments, None).await.unwrap();

        assert!(
            backend.max_in_flight() <= 3,
            "max in flight {} exceeds window",
            backend.max_in_flight()
        );
    }

    #[tokio::test]
    async fn test_partial_failures_are_collected_by_index() {
        let backend = Arc::new(ShufflingBackend::failing_on(&["3", "7"]));
        let scheduler = make_scheduler(backend, 4);
        let segments: Vec<Segment> = (0..9)
            .map(|i| Segment::narrator(i, format!("segment number {}", i), "voice-a"))
            .collect();

        let outcome = scheduler.run(&segments, None).await.unwrap();

        let failed: Vec<usize> = outcome.failures.iter().map(|f| f.0).collect();
        assert_eq!(failed, vec![3, 7]);
        let succeeded: Vec<usize> = outcome.results.iter().map(|r| r.segment_index).collect();
        assert_eq!(succeeded, vec![0, 1, 2, 4, 5, 6, 8]);
    }

    #[tokio::test]
    async fn test_all_failures_fail_loudly() {
        let backend = Arc::new(ShufflingBackend::failing_on(&["segment"]));
        let scheduler = make_scheduler(backend, 4);
        let segments: Vec<Segment> = (0..3)
            .map(|i| Segment::narrator(i, format!("segment {}", i), "voice-a"))
            .collect();

        let err = scheduler.run(&segments, None).await.unwrap_err();
        assert!(matches!(err, MontageError::SynthesisFailed(failed) if failed == vec![0, 1, 2]));
    }
}
