//! Пример использования системы прогресса и уведомлений
//!
//! Этот пример демонстрирует, как озвучить набор сегментов повествования
//! и диалогов с отслеживанием прогресса выполнения.

use tts_montage::notification::{
    CompositeProgressObserver, ConsoleProgressObserver, FileProgressObserver,
};
use tts_montage::progress::{DefaultProgressReporter, ProgressReporter};
use tts_montage::{EmotionTag, MontageConfig, Segment, SynthesisModel, TtsMontage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Инициализируем логирование
    env_logger::init();

    // Получаем API ключ из переменной окружения
    let api_key = std::env::var("ELEVENLABS_API_KEY").expect("ELEVENLABS_API_KEY must be set");

    // Сегменты повествования: рассказчик и персонаж с эмоциональной подачей
    let segments = vec![
        Segment::narrator(0, "Once upon a time, in a quiet village.", "JBFqnCBsd6RMkjVDRZzb"),
        Segment::character(1, "alice", "Hello! Is anybody here?", "EXAVITQu4vr4xnSDxMaL")
            .with_emotion(EmotionTag::Excitement),
        Segment::narrator(2, "But nobody answered.", "JBFqnCBsd6RMkjVDRZzb"),
    ];

    // Создаем конфигурацию
    let config = MontageConfig {
        api_key,
        model: SynthesisModel::Multilingual,
        max_concurrent_requests: 3,
        ..MontageConfig::default()
    };

    // Создаем репортер прогресса с несколькими наблюдателями
    let mut reporter = DefaultProgressReporter::new();
    let mut composite = CompositeProgressObserver::new();
    composite.add_observer(Box::new(ConsoleProgressObserver::new()));
    composite.add_observer(Box::new(FileProgressObserver::new("progress.log")));
    reporter.add_observer(Box::new(composite));

    // Создаем объект TtsMontage с репортером прогресса
    let montage = TtsMontage::with_progress_reporter(config, Box::new(reporter));

    // Запускаем конвейер
    let output = montage.synthesize_and_assemble(&segments).await?;

    println!(
        "Озвучивание завершено: {:.1} с, {} слов, стратегия {}",
        output.duration_ms / 1000.0,
        output.word_timings.len(),
        output.strategy.as_str()
    );

    if !output.failed_segments.is_empty() {
        println!("Не удалось озвучить сегменты: {:?}", output.failed_segments);
    }

    // Сохраняем дорожку и метки для подсветки текста
    tokio::fs::write("montage.mp3", &output.audio).await?;
    tokio::fs::write(
        "word_timings.json",
        serde_json::to_vec_pretty(&output.word_timings)?,
    )
    .await?;

    println!("Дорожка сохранена в montage.mp3, метки — в word_timings.json");

    Ok(())
}
