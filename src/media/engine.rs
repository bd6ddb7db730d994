//! Модуль внешнего аудио-движка
//!
//! Движок принимает декларативный граф фильтров, N входных файлов и один
//! выходной путь; отдельно умеет измерять длительность готового файла.
//! Трейт отделяет сборку от конкретного процесса ffmpeg и позволяет
//! подменять движок в тестах.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::error::{MontageError, Result};
use crate::media::filter::FilterGraph;
use crate::utils::ffmpeg;

/// Внешний движок обработки аудио
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Доступен ли движок
    async fn is_available(&self) -> bool;

    /// Прогнать входные файлы через граф фильтров в выходной файл
    async fn run_filter(&self, inputs: &[PathBuf], graph: &FilterGraph, output: &Path)
        -> Result<()>;

    /// Длительность готового файла в миллисекундах
    async fn probe_duration_ms(&self, path: &Path) -> Result<f64>;
}

/// Движок на основе процесса ffmpeg
pub struct FfmpegEngine {
    subprocess_timeout: Duration,
    // Доступность проверяется один раз на экземпляр, без глобального состояния
    availability: OnceCell<bool>,
}

impl FfmpegEngine {
    /// Создать движок с таймаутом на один вызов процесса
    pub fn new(subprocess_timeout: Duration) -> Self {
        Self {
            subprocess_timeout,
            availability: OnceCell::new(),
        }
    }
}

#[async_trait]
impl AudioEngine for FfmpegEngine {
    async fn is_available(&self) -> bool {
        *self
            .availability
            .get_or_init(|| async {
                let available = ffmpeg::check_ffmpeg_installed().await;
                if available {
                    match ffmpeg::ffmpeg_version().await {
                        Ok(version) => log::info!("Using audio engine: {}", version),
                        Err(e) => log::debug!("Could not read ffmpeg version: {}", e),
                    }
                } else {
                    log::error!("ffmpeg binary was not found in PATH");
                }
                available
            })
            .await
    }

    async fn run_filter(
        &self,
        inputs: &[PathBuf],
        graph: &FilterGraph,
        output: &Path,
    ) -> Result<()> {
        let final_label = graph
            .final_label()
            .ok_or_else(|| MontageError::AudioEngine("empty filter graph".to_string()))?;

        let mut args: Vec<String> = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ];
        for input in inputs {
            args.push("-i".to_string());
            args.push(input.display().to_string());
        }
        args.push("-filter_complex".to_string());
        args.push(graph.render());
        args.push("-map".to_string());
        args.push(final_label);
        args.push("-c:a".to_string());
        args.push("libmp3lame".to_string());
        args.push("-q:a".to_string());
        args.push("4".to_string());
        args.push("-y".to_string());
        args.push(output.display().to_string());

        ffmpeg::run_ffmpeg(&args, self.subprocess_timeout).await
    }

    async fn probe_duration_ms(&self, path: &Path) -> Result<f64> {
        ffmpeg::probe_duration_ms(path, self.subprocess_timeout).await
    }
}
