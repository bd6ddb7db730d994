//! Основной файл библиотеки tts-montage
//!
//! Библиотека превращает упорядоченный список сегментов повествования и
//! диалогов в одну непрерывную аудиодорожку с пословными временными
//! метками для синхронной подсветки текста. Конвейер: планировщик гонит
//! клиент синтеза по сегментам с ограниченным параллелизмом, реконструктор
//! сливает метки в порядке исходных индексов, сборщик склеивает клипы в
//! одну дорожку, после чего метки пересчитываются по фактической
//! длительности и проверяются на инварианты.

pub mod config;
pub mod error;
pub mod media;
pub mod notification;
pub mod progress;
pub mod segment;
pub mod timing;
pub mod tts;
pub mod utils;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::media::assembler::{AssemblyClip, AudioAssembler};
use crate::media::engine::{AudioEngine, FfmpegEngine};
use crate::progress::{ProcessStep, ProgressObserver, ProgressReporter, ProgressTracker};
use crate::segment::SynthesisResult;
use crate::tts::cache::{AudioCache, DiskAudioCache, MemoryAudioCache};
use crate::tts::client::SynthesisClient;
use crate::tts::elevenlabs::{ElevenLabsBackend, SynthesisBackend};
use crate::tts::scheduler::BatchScheduler;

pub use crate::config::{
    AssemblyConfig, MontageConfig, RetryPolicy, SynthesisModel, TimingTolerances,
};
pub use crate::error::{MontageError, Result};
pub use crate::segment::{AssemblyStrategy, Segment, SpeakerRole, WordTiming};
pub use crate::tts::direction::EmotionTag;

/// Итог работы конвейера озвучивания
#[derive(Debug, Clone)]
pub struct MontageOutput {
    /// Единая аудиодорожка
    pub audio: Bytes,
    /// Пословные метки в шкале дорожки
    pub word_timings: Vec<WordTiming>,
    /// Длительность дорожки, мс
    pub duration_ms: f64,
    /// Стратегия сборки (диагностика и тесты)
    pub strategy: AssemblyStrategy,
    /// Сегменты, синтез которых не удался, с причинами
    pub failed_segments: Vec<(usize, String)>,
}

/// Основная структура для работы с библиотекой
pub struct TtsMontage {
    config: Arc<MontageConfig>,
    backend: Arc<dyn SynthesisBackend>,
    cache: Option<Arc<dyn AudioCache>>,
    engine: Arc<dyn AudioEngine>,
    assembler: Arc<AudioAssembler>,
    client: Arc<SynthesisClient>,
    progress_tracker: Option<ProgressTracker>,
}

impl TtsMontage {
    /// Создать новый экземпляр TtsMontage с указанной конфигурацией
    pub fn new(config: MontageConfig) -> Self {
        let config = Arc::new(config);
        let backend: Arc<dyn SynthesisBackend> = Arc::new(ElevenLabsBackend::new(
            config.api_key.clone(),
            config.api_base_url.clone(),
        ));
        let engine: Arc<dyn AudioEngine> = Arc::new(FfmpegEngine::new(Duration::from_millis(
            config.assembly.subprocess_timeout_ms,
        )));
        let cache = build_cache(&config);

        let assembler = Arc::new(AudioAssembler::new(engine.clone(), config.clone()));
        let client = Arc::new(SynthesisClient::new(
            backend.clone(),
            cache.clone(),
            assembler.clone(),
            config.clone(),
        ));

        Self {
            config,
            backend,
            cache,
            engine,
            assembler,
            client,
            progress_tracker: None,
        }
    }

    /// Создать экземпляр TtsMontage с репортером прогресса
    pub fn with_progress_reporter(
        config: MontageConfig,
        reporter: Box<dyn ProgressReporter>,
    ) -> Self {
        let mut montage = Self::new(config);
        let mut tracker = ProgressTracker::new();
        tracker.set_reporter(reporter);
        montage.progress_tracker = Some(tracker);
        montage
    }

    /// Подменить бэкенд синтеза (тесты, другой поставщик)
    pub fn with_backend(mut self, backend: Arc<dyn SynthesisBackend>) -> Self {
        self.backend = backend;
        self.rebuild();
        self
    }

    /// Подменить аудио-движок
    pub fn with_engine(mut self, engine: Arc<dyn AudioEngine>) -> Self {
        self.engine = engine;
        self.rebuild();
        self
    }

    /// Подменить кэш синтеза
    pub fn with_cache(mut self, cache: Option<Arc<dyn AudioCache>>) -> Self {
        self.cache = cache;
        self.rebuild();
        self
    }

    /// Установить репортер прогресса
    pub fn set_progress_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        if let Some(tracker) = &mut self.progress_tracker {
            tracker.set_reporter(reporter);
        } else {
            let mut tracker = ProgressTracker::new();
            tracker.set_reporter(reporter);
            self.progress_tracker = Some(tracker);
        }
    }

    /// Добавить наблюдателя прогресса
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> Option<usize> {
        self.progress_tracker
            .as_mut()
            .and_then(|tracker| tracker.add_observer(observer))
    }

    fn rebuild(&mut self) {
        self.assembler = Arc::new(AudioAssembler::new(self.engine.clone(), self.config.clone()));
        self.client = Arc::new(SynthesisClient::new(
            self.backend.clone(),
            self.cache.clone(),
            self.assembler.clone(),
            self.config.clone(),
        ));
    }

    /// Основной метод конвейера: синтез, слияние меток, сборка, проверка
    ///
    /// Возвращает либо полностью проверенный артефакт, либо ошибку с
    /// именем упавшего этапа и индексами проблемных сегментов. Ошибка
    /// отдельного сегмента не фатальна: дорожка собирается из удавшихся,
    /// а индексы и причины отказов возвращаются вызывающему.
    pub async fn synthesize_and_assemble(&self, segments: &[Segment]) -> Result<MontageOutput> {
        if segments.is_empty() {
            return Err(MontageError::Configuration(
                "segment list is empty".to_string(),
            ));
        }

        log::info!("Starting montage for {} segment(s)", segments.len());
        let tracker = self.progress_tracker.as_ref();

        // Индекс задает порядок воспроизведения независимо от порядка прихода
        let mut ordered: Vec<Segment> = segments.to_vec();
        ordered.sort_by_key(|s| s.index);

        // 1. Синтез речи
        if let Some(t) = tracker {
            t.set_step(ProcessStep::SpeechSynthesis);
            t.update_step_progress(0.0, Some("Начало синтеза речи".to_string()));
        }

        let scheduler = BatchScheduler::new(self.client.clone(), self.config.max_concurrent_requests);
        let outcome = scheduler.run(&ordered, tracker).await?;

        if !outcome.failures.is_empty() {
            let failed: Vec<usize> = outcome.failures.iter().map(|f| f.0).collect();
            log::warn!(
                "Synthesis failed for {} of {} segments: {:?}",
                failed.len(),
                ordered.len(),
                failed
            );
        }

        // 2. Слияние временных меток
        if let Some(t) = tracker {
            t.set_step(ProcessStep::TimingMerge);
        }
        let (mut word_timings, naive_ms) = timing::merge_timings(&outcome.results);
        if let Some(t) = tracker {
            t.update_step_progress(100.0, Some("Метки слов слиты".to_string()));
        }

        // 3. Сборка аудиодорожки
        if let Some(t) = tracker {
            t.set_step(ProcessStep::AudioAssembly);
        }
        let clips = build_clips(&ordered, &outcome.results);
        let assembled = self.assembler.assemble(&clips).await?;
        if let Some(t) = tracker {
            t.update_step_progress(100.0, Some("Аудиодорожка собрана".to_string()));
        }

        // 4. Пересчет меток по фактической длительности и проверка
        if let Some(t) = tracker {
            t.set_step(ProcessStep::TimingValidation);
        }
        let total_ms = timing::rescale_timings(
            &mut word_timings,
            naive_ms,
            assembled.duration_ms,
            self.config.timing.rescale_threshold,
        );
        timing::validate_timings(&word_timings, total_ms, &self.config.timing)?;

        if let Some(t) = tracker {
            t.complete();
        }

        log::info!(
            "Montage finished: {:.0} ms, {} words, strategy {}",
            total_ms,
            word_timings.len(),
            assembled.strategy.as_str()
        );

        Ok(MontageOutput {
            audio: assembled.audio,
            word_timings,
            duration_ms: total_ms,
            strategy: assembled.strategy,
            failed_segments: outcome.failures,
        })
    }
}

/// Построить кэш согласно конфигурации
fn build_cache(config: &MontageConfig) -> Option<Arc<dyn AudioCache>> {
    if !config.use_caching {
        return None;
    }

    match &config.cache_dir {
        Some(dir) => match DiskAudioCache::new(dir, config.max_cache_size) {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                log::warn!(
                    "Failed to open disk cache at {}, falling back to memory: {}",
                    dir,
                    e
                );
                Some(Arc::new(MemoryAudioCache::new(config.cache_capacity)))
            }
        },
        None => Some(Arc::new(MemoryAudioCache::new(config.cache_capacity))),
    }
}

/// Сопоставить результаты синтеза с метаданными сегментов
fn build_clips(segments: &[Segment], results: &[SynthesisResult]) -> Vec<AssemblyClip> {
    let by_index: HashMap<usize, &Segment> = segments.iter().map(|s| (s.index, s)).collect();

    results
        .iter()
        .filter_map(|result| {
            by_index.get(&result.segment_index).map(|segment| AssemblyClip {
                index: result.segment_index,
                speaker: segment.speaker.clone(),
                role: segment.role,
                audio: result.audio.clone(),
                duration_ms: result.duration_ms,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as MontageResult;
    use crate::media::engine::testing::FakeEngine;
    use crate::notification::MemoryProgressObserver;
    use crate::progress::DefaultProgressReporter;
    use crate::tts::elevenlabs::{
        BackendResponse, CharacterAlignment, SynthesisBackend, SynthesisRequest,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Мок-бэкенд: 10 мс на символ, отказ по подстроке текста
    struct MockBackend {
        calls: AtomicUsize,
        fail_marker: Option<String>,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_marker: None,
            }
        }

        fn failing_on(marker: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_marker: Some(marker.to_string()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SynthesisBackend for MockBackend {
        async fn synthesize(&self, request: &SynthesisRequest) -> MontageResult<BackendResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(marker) = &self.fail_marker {
                if request.text.contains(marker) {
                    return Err(MontageError::Backend {
                        status: 400,
                        message: "scripted failure".to_string(),
                        retryable: false,
                    });
                }
            }

            let characters: Vec<String> = request.text.chars().map(|c| c.to_string()).collect();
            let starts: Vec<f64> = (0..characters.len()).map(|i| i as f64 * 0.01).collect();
            let ends: Vec<f64> = (0..characters.len()).map(|i| (i + 1) as f64 * 0.01).collect();
            let duration_bytes = characters.len() * 10;

            Ok(BackendResponse {
                audio: Bytes::from(vec![0u8; duration_bytes]),
                alignment: Some(CharacterAlignment {
                    characters,
                    character_start_times_seconds: starts,
                    character_end_times_seconds: ends,
                }),
            })
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn story_segments() -> Vec<Segment> {
        vec![
            Segment::narrator(0, "Once upon a time.", "voice-a"),
            Segment::character(1, "alice", "Hello!", "voice-b")
                .with_emotion(EmotionTag::Excitement),
            Segment::narrator(2, "The end.", "voice-a"),
        ]
    }

    fn montage(backend: Arc<MockBackend>, config: MontageConfig) -> TtsMontage {
        TtsMontage::new(config)
            .with_backend(backend)
            .with_engine(Arc::new(FakeEngine::new()))
    }

    #[tokio::test]
    async fn test_story_scenario_small_set() {
        let backend = Arc::new(MockBackend::new());
        let montage = montage(backend.clone(), MontageConfig::default());

        let output = montage
            .synthesize_and_assemble(&story_segments())
            .await
            .unwrap();

        // Три вызова синтеза, сборка попарными кроссфейдами
        assert_eq!(backend.calls(), 3);
        assert_eq!(output.strategy, AssemblyStrategy::SmallSetCrossfade);
        assert!(output.failed_segments.is_empty());

        // Слова: "Once upon a time." + "Hello!" + "The end.",
        // директива возбуждения в слова не попадает
        let words: Vec<&str> = output.word_timings.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(words, vec!["Once", "upon", "a", "time.", "Hello!", "The", "end."]);

        // Метки строго возрастают
        for pair in output.word_timings.windows(2) {
            assert!(pair[0].start_ms < pair[1].start_ms);
        }

        // Длительность: сумма сегментов плюс буферы минус два кроссфейда
        // смены говорящего; конец последнего слова сходится с дорожкой
        let last_end = output.word_timings.last().unwrap().end_ms;
        assert!((output.duration_ms - last_end).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_completion_order_does_not_change_output() {
        // Окно 1 сериализует запросы, окно 3 перемешивает завершение
        let mut outputs = Vec::new();
        for window in [1usize, 3] {
            let backend = Arc::new(MockBackend::new());
            let mut config = MontageConfig::default();
            config.max_concurrent_requests = window;
            let montage = montage(backend, config);
            outputs.push(
                montage
                    .synthesize_and_assemble(&story_segments())
                    .await
                    .unwrap(),
            );
        }

        let words_a: Vec<&str> = outputs[0].word_timings.iter().map(|w| w.text.as_str()).collect();
        let words_b: Vec<&str> = outputs[1].word_timings.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(words_a, words_b);
        assert_eq!(outputs[0].duration_ms, outputs[1].duration_ms);
    }

    #[tokio::test]
    async fn test_partial_failure_reports_indices() {
        let backend = Arc::new(MockBackend::failing_on("Hello"));
        let montage = montage(backend, MontageConfig::default());

        let output = montage
            .synthesize_and_assemble(&story_segments())
            .await
            .unwrap();

        assert_eq!(output.failed_segments.len(), 1);
        assert_eq!(output.failed_segments[0].0, 1);
        assert!(output.word_timings.iter().all(|w| w.segment_index != 1));
    }

    #[tokio::test]
    async fn test_all_segments_failing_is_an_error() {
        let backend = Arc::new(MockBackend::failing_on(""));
        let montage = montage(backend, MontageConfig::default());

        let err = montage
            .synthesize_and_assemble(&story_segments())
            .await
            .unwrap_err();

        assert!(matches!(err, MontageError::SynthesisFailed(_)));
    }

    #[tokio::test]
    async fn test_empty_segment_list_is_rejected() {
        let backend = Arc::new(MockBackend::new());
        let montage = montage(backend, MontageConfig::default());

        assert!(montage.synthesize_and_assemble(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_progress_observers_receive_updates() {
        struct Capture(Arc<std::sync::Mutex<Vec<String>>>);
        impl ProgressObserver for Capture {
            fn on_progress_update(&self, progress: crate::progress::ProgressInfo) {
                self.0.lock().unwrap().push(progress.step);
            }
        }

        let steps = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut reporter = DefaultProgressReporter::new();
        reporter.add_observer(Box::new(Capture(steps.clone())));
        reporter.add_observer(Box::new(MemoryProgressObserver::new()));

        let backend = Arc::new(MockBackend::new());
        let montage =
            TtsMontage::with_progress_reporter(MontageConfig::default(), Box::new(reporter))
                .with_backend(backend)
                .with_engine(Arc::new(FakeEngine::new()));

        montage
            .synthesize_and_assemble(&story_segments())
            .await
            .unwrap();

        let steps = steps.lock().unwrap();
        assert!(!steps.is_empty());
        assert!(steps.iter().any(|s| s == ProcessStep::SpeechSynthesis.as_str()));
        assert!(steps.iter().any(|s| s == ProcessStep::AudioAssembly.as_str()));
    }

    #[tokio::test]
    async fn test_overlay_mixing_triggers_rescale() {
        let overlay = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(overlay.path(), vec![0u8; 2_000]).unwrap();

        let backend = Arc::new(MockBackend::new());
        let mut config = MontageConfig::default();
        config.overlay_audio_path = Some(overlay.path().display().to_string());
        let montage = montage(backend, config);

        let output = montage
            .synthesize_and_assemble(&story_segments())
            .await
            .unwrap();

        // Фон длиннее речи: дорожка растянута, метки пересчитаны
        assert!((output.duration_ms - 2_000.0).abs() < 1.0);
        let last_end = output.word_timings.last().unwrap().end_ms;
        assert!((output.duration_ms - last_end).abs() <= 500.0);
    }
}
