//! Модуль кэширования результатов синтеза речи
//!
//! Кэш — единственный разделяемый между запросами изменяемый ресурс.
//! Доступ идет по хэшу содержимого, записи идемпотентны, поэтому
//! блокировок за пределами самого кэша не требуется. Кэш передается
//! клиенту синтеза явно при создании, а не живет в глобальном состоянии.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::Result;

/// Хранилище синтезированного аудио
#[async_trait]
pub trait AudioCache: Send + Sync {
    /// Получить запись по ключу, если она есть и не устарела
    async fn get(&self, key: &str) -> Option<Bytes>;

    /// Сохранить запись с указанным временем жизни
    async fn set(&self, key: &str, value: Bytes, ttl: Duration);
}

/// Вычислить ключ кэша для запроса синтеза
///
/// Ключ учитывает нормализованный текст, голос и отпечаток параметров:
/// одинаковые запросы попадают в одну запись независимо от порядка прихода.
pub fn cache_key(normalized_text: &str, voice_id: &str, settings_fingerprint: &str) -> String {
    let mut hasher = md5::Context::new();
    hasher.consume(normalized_text.as_bytes());
    hasher.consume(b"|");
    hasher.consume(voice_id.as_bytes());
    hasher.consume(b"|");
    hasher.consume(settings_fingerprint.as_bytes());

    format!("{:x}", hasher.compute())
}

struct MemoryEntry {
    value: Bytes,
    expires_at: Instant,
    last_used: u64,
}

struct MemoryInner {
    entries: HashMap<String, MemoryEntry>,
    tick: u64,
}

/// Кэш в памяти с вытеснением давно не использованных записей и TTL
pub struct MemoryAudioCache {
    capacity: usize,
    inner: Mutex<MemoryInner>,
}

impl MemoryAudioCache {
    /// Создать кэш с указанной емкостью (количество записей)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(MemoryInner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Количество записей в кэше (включая устаревшие, но еще не вытесненные)
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Пуст ли кэш
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AudioCache for MemoryAudioCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        match inner.entries.get_mut(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.last_used = tick;
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        inner.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: Instant::now() + ttl,
                last_used: tick,
            },
        );

        // Вытесняем самую давно не использованную запись
        while inner.entries.len() > self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    inner.entries.remove(&k);
                }
                None => break,
            }
        }
    }
}

/// Дисковый кэш: md5-именованные файлы с заголовком срока годности
///
/// Первые 8 байт файла — срок годности записи в миллисекундах Unix-времени,
/// дальше полезная нагрузка. При превышении максимального размера старые
/// файлы удаляются в порядке времени модификации.
pub struct DiskAudioCache {
    cache_dir: PathBuf,
    max_size: Option<u64>,
}

impl DiskAudioCache {
    /// Создать дисковый кэш в указанной директории
    pub fn new(cache_dir: impl Into<PathBuf>, max_size: Option<u64>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        if !cache_dir.exists() {
            std::fs::create_dir_all(&cache_dir)?;
        }

        Ok(Self { cache_dir, max_size })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.bin", key))
    }

    /// Удалить старые файлы, пока размер кэша не станет меньше максимального
    async fn enforce_max_size(&self) {
        let Some(max_size) = self.max_size else {
            return;
        };

        let mut files = Vec::new();
        let mut total_size: u64 = 0;

        let Ok(mut dir) = tokio::fs::read_dir(&self.cache_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            if let Ok(metadata) = entry.metadata().await {
                if metadata.is_file() {
                    total_size += metadata.len();
                    if let Ok(modified) = metadata.modified() {
                        files.push((entry.path(), metadata.len(), modified));
                    }
                }
            }
        }

        if total_size <= max_size {
            return;
        }

        // От старых к новым
        files.sort_by(|a, b| a.2.cmp(&b.2));

        for (path, len, _) in files {
            if total_size <= max_size {
                break;
            }
            if tokio::fs::remove_file(&path).await.is_ok() {
                total_size = total_size.saturating_sub(len);
            }
        }
    }
}

#[async_trait]
impl AudioCache for DiskAudioCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let path = self.entry_path(key);
        let data = tokio::fs::read(&path).await.ok()?;
        if data.len() < 8 {
            return None;
        }

        let mut header = [0u8; 8];
        header.copy_from_slice(&data[..8]);
        let expires_at_ms = i64::from_be_bytes(header);

        if chrono::Utc::now().timestamp_millis() >= expires_at_ms {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }

        Some(Bytes::copy_from_slice(&data[8..]))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) {
        let path = self.entry_path(key);
        let expires_at_ms = chrono::Utc::now().timestamp_millis() + ttl.as_millis() as i64;

        let mut data = Vec::with_capacity(8 + value.len());
        data.extend_from_slice(&expires_at_ms.to_be_bytes());
        data.extend_from_slice(&value);

        if let Err(e) = tokio::fs::write(&path, data).await {
            log::warn!("Failed to write cache entry {}: {}", path.display(), e);
            return;
        }

        self.enforce_max_size().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_roundtrip() {
        let cache = MemoryAudioCache::new(8);
        cache
            .set("k1", Bytes::from_static(b"audio"), Duration::from_secs(60))
            .await;

        assert_eq!(cache.get("k1").await, Some(Bytes::from_static(b"audio")));
        assert_eq!(cache.get("missing").await, None);
    }

    #[tokio::test]
    async fn test_memory_cache_ttl_expiry() {
        let cache = MemoryAudioCache::new(8);
        cache
            .set("k1", Bytes::from_static(b"audio"), Duration::from_secs(0))
            .await;

        assert_eq!(cache.get("k1").await, None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_memory_cache_lru_eviction() {
        let cache = MemoryAudioCache::new(2);
        cache.set("a", Bytes::from_static(b"1"), Duration::from_secs(60)).await;
        cache.set("b", Bytes::from_static(b"2"), Duration::from_secs(60)).await;

        // Обращение к "a" делает "b" кандидатом на вытеснение
        let _ = cache.get("a").await;
        cache.set("c", Bytes::from_static(b"3"), Duration::from_secs(60)).await;

        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn test_disk_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskAudioCache::new(dir.path(), None).unwrap();

        cache
            .set("k1", Bytes::from_static(b"payload"), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("k1").await, Some(Bytes::from_static(b"payload")));
    }

    #[tokio::test]
    async fn test_disk_cache_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskAudioCache::new(dir.path(), None).unwrap();

        cache
            .set("k1", Bytes::from_static(b"payload"), Duration::from_secs(0))
            .await;
        assert_eq!(cache.get("k1").await, None);
    }

    #[test]
    fn test_cache_key_depends_on_all_parts() {
        let base = cache_key("hello world", "voice-a", "m:0.5");
        assert_ne!(base, cache_key("hello world!", "voice-a", "m:0.5"));
        assert_ne!(base, cache_key("hello world", "voice-b", "m:0.5"));
        assert_ne!(base, cache_key("hello world", "voice-a", "m:1.0"));
        assert_eq!(base, cache_key("hello world", "voice-a", "m:0.5"));
    }
}
