//! Модуль для работы с временными файлами
//!
//! Каждый запрос сборки получает собственную уникальную временную
//! директорию. Файлы удаляются и при успехе, и при ошибке; неудачная
//! очистка не фатальна и только пишется в лог.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::Result;

/// Рабочая директория одного запроса сборки
pub struct TempWorkspace {
    temp_dir: Option<TempDir>,
    cleanup: bool,
}

impl TempWorkspace {
    /// Создать новую рабочую директорию
    pub fn new(cleanup: bool) -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        log::debug!("Created temp workspace {}", temp_dir.path().display());

        Ok(Self {
            temp_dir: Some(temp_dir),
            cleanup,
        })
    }

    /// Путь к рабочей директории
    pub fn path(&self) -> &Path {
        self.temp_dir
            .as_ref()
            .expect("workspace is alive until drop")
            .path()
    }

    /// Уникальное имя файла внутри рабочей директории
    pub fn unique_file(&self, prefix: &str, extension: &str) -> PathBuf {
        let file_name = format!("{}_{}.{}", prefix, uuid::Uuid::new_v4(), extension);
        self.path().join(file_name)
    }

    /// Записать байты во временный файл
    pub async fn write_file(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.path().join(name);
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        let Some(temp_dir) = self.temp_dir.take() else {
            return;
        };

        if self.cleanup {
            let path = temp_dir.path().to_path_buf();
            if let Err(e) = temp_dir.close() {
                log::warn!("Failed to clean up temp workspace {}: {}", path.display(), e);
            }
        } else {
            // Файлы оставляются для отладки
            let path = temp_dir.into_path();
            log::debug!("Keeping temp workspace {}", path.display());
        }
    }
}
