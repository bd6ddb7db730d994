//! Модуль для реализации системы уведомлений
//!
//! Этот модуль предоставляет конкретные реализации наблюдателей для
//! системы прогресса конвейера озвучивания: вывод в консоль, накопление
//! истории в памяти, запись в файл и пересылка в канал Tokio.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::progress::{ProgressInfo, ProgressObserver};

/// Наблюдатель, выводящий информацию о прогрессе в консоль
pub struct ConsoleProgressObserver {
    /// Префикс для вывода (опционально)
    prefix: Option<String>,
}

impl ConsoleProgressObserver {
    /// Создать новый экземпляр ConsoleProgressObserver
    pub fn new() -> Self {
        Self { prefix: None }
    }

    /// Создать новый экземпляр ConsoleProgressObserver с префиксом
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl Default for ConsoleProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for ConsoleProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        let prefix = self.prefix.as_deref().unwrap_or("");
        let details = progress.details.as_deref().unwrap_or("");

        println!(
            "{}[Прогресс] Этап: {}, Прогресс этапа: {:.1}%, Общий прогресс: {:.1}%{}",
            prefix,
            progress.step,
            progress.step_progress,
            progress.total_progress,
            if details.is_empty() {
                "".to_string()
            } else {
                format!(", Детали: {}", details)
            }
        );
    }
}

/// Наблюдатель, сохраняющий историю прогресса в памяти
pub struct MemoryProgressObserver {
    /// История обновлений прогресса
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl MemoryProgressObserver {
    /// Создать новый экземпляр MemoryProgressObserver
    pub fn new() -> Self {
        Self {
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Получить копию истории обновлений
    pub fn history(&self) -> Vec<ProgressInfo> {
        self.history.lock().unwrap().clone()
    }

    /// Очистить историю обновлений
    pub fn clear_history(&self) {
        self.history.lock().unwrap().clear();
    }
}

impl Default for MemoryProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for MemoryProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        self.history.lock().unwrap().push(progress);
    }
}

/// Наблюдатель, дописывающий обновления прогресса в файл
pub struct FileProgressObserver {
    /// Путь к файлу журнала
    file_path: String,
}

impl FileProgressObserver {
    /// Создать новый экземпляр FileProgressObserver
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }
}

impl ProgressObserver for FileProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        let line = format!(
            "{} | {} | {:.1}% | {:.1}% | {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            progress.step,
            progress.step_progress,
            progress.total_progress,
            progress.details.as_deref().unwrap_or("-")
        );

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .and_then(|mut file| file.write_all(line.as_bytes()));

        if let Err(e) = result {
            log::warn!("Failed to append progress log {}: {}", self.file_path, e);
        }
    }
}

/// Наблюдатель, пересылающий обновления в канал Tokio
pub struct ChannelProgressObserver {
    /// Отправляющая сторона канала
    sender: mpsc::Sender<ProgressInfo>,
}

impl ChannelProgressObserver {
    /// Создать новый экземпляр ChannelProgressObserver
    pub fn new(sender: mpsc::Sender<ProgressInfo>) -> Self {
        Self { sender }
    }
}

impl ProgressObserver for ChannelProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        // Переполненный канал не должен блокировать конвейер
        if let Err(e) = self.sender.try_send(progress) {
            log::debug!("Dropping progress update: {}", e);
        }
    }
}

/// Комбинированный наблюдатель, рассылающий обновления нескольким вложенным
pub struct CompositeProgressObserver {
    observers: Vec<Box<dyn ProgressObserver>>,
}

impl CompositeProgressObserver {
    /// Создать новый экземпляр CompositeProgressObserver
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Добавить вложенного наблюдателя
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) {
        self.observers.push(observer);
    }
}

impl Default for CompositeProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompositeProgressObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeProgressObserver")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ProgressObserver for CompositeProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        for observer in &self.observers {
            observer.on_progress_update(progress.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_observer_collects_history() {
        let observer = MemoryProgressObserver::new();
        observer.on_progress_update(ProgressInfo::new("step", 10.0, 5.0, None));
        observer.on_progress_update(ProgressInfo::new("step", 20.0, 10.0, None));

        let history = observer.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].step_progress, 20.0);

        observer.clear_history();
        assert!(observer.history().is_empty());
    }

    #[tokio::test]
    async fn test_channel_observer_forwards_updates() {
        let (tx, mut rx) = mpsc::channel(4);
        let observer = ChannelProgressObserver::new(tx);

        observer.on_progress_update(ProgressInfo::new("step", 50.0, 25.0, None));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.step, "step");
        assert_eq!(received.step_progress, 50.0);
    }

    #[test]
    fn test_composite_observer_fans_out() {
        let memory_a = MemoryProgressObserver::new();
        let history_a = memory_a.history.clone();
        let memory_b = MemoryProgressObserver::new();
        let history_b = memory_b.history.clone();

        let mut composite = CompositeProgressObserver::new();
        composite.add_observer(Box::new(memory_a));
        composite.add_observer(Box::new(memory_b));

        composite.on_progress_update(ProgressInfo::new("step", 1.0, 1.0, None));

        assert_eq!(history_a.lock().unwrap().len(), 1);
        assert_eq!(history_b.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_file_observer_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        let observer = FileProgressObserver::new(path.display().to_string());

        observer.on_progress_update(ProgressInfo::new("step", 10.0, 5.0, None));
        observer.on_progress_update(ProgressInfo::new("step", 90.0, 45.0, None));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("90.0%"));
    }
}
