//! Модуль для работы с FFmpeg
//!
//! Низкоуровневые обертки над процессами ffmpeg/ffprobe: запуск с
//! таймаутом и жестким завершением по его истечении, проверка наличия,
//! извлечение длительности файла.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{MontageError, Result};

/// Проверка наличия FFmpeg
pub async fn check_ffmpeg_installed() -> bool {
    match Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(_) => false,
    }
}

/// Получение версии FFmpeg
pub async fn ffmpeg_version() -> Result<String> {
    let output = Command::new("ffmpeg").arg("-version").output().await?;

    if !output.status.success() {
        return Err(MontageError::AudioEngine(
            "Failed to get FFmpeg version".to_string(),
        ));
    }

    let version_str = String::from_utf8_lossy(&output.stdout);
    let first_line = version_str.lines().next().unwrap_or("");

    Ok(first_line.to_string())
}

/// Запуск команды FFmpeg с таймаутом
///
/// По истечении таймаута процесс жестко завершается (kill_on_drop).
pub async fn run_ffmpeg(args: &[String], timeout: Duration) -> Result<()> {
    log::debug!("Running ffmpeg {}", args.join(" "));

    let child = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| MontageError::AudioEngine(format!("Failed to start ffmpeg: {}", e)))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            if output.status.success() {
                Ok(())
            } else {
                Err(MontageError::AudioEngine(format!(
                    "FFmpeg command failed with status {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )))
            }
        }
        Ok(Err(e)) => Err(MontageError::AudioEngine(format!(
            "FFmpeg process error: {}",
            e
        ))),
        Err(_) => Err(MontageError::AudioEngine(format!(
            "FFmpeg command timed out after {} ms and was killed",
            timeout.as_millis()
        ))),
    }
}

/// Запуск команды FFprobe с таймаутом
pub async fn run_ffprobe(args: &[String], timeout: Duration) -> Result<String> {
    let child = Command::new("ffprobe")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| MontageError::AudioEngine(format!("Failed to start ffprobe: {}", e)))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            if output.status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            } else {
                Err(MontageError::AudioEngine(format!(
                    "FFprobe command failed with status {}",
                    output.status
                )))
            }
        }
        Ok(Err(e)) => Err(MontageError::AudioEngine(format!(
            "FFprobe process error: {}",
            e
        ))),
        Err(_) => Err(MontageError::AudioEngine(format!(
            "FFprobe command timed out after {} ms and was killed",
            timeout.as_millis()
        ))),
    }
}

/// Получение длительности аудиофайла в миллисекундах
pub async fn probe_duration_ms(path: &Path, timeout: Duration) -> Result<f64> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        path.display().to_string(),
    ];

    let stdout = run_ffprobe(&args, timeout).await?;
    let duration_secs = stdout.trim().parse::<f64>().map_err(|_| {
        MontageError::AudioEngine(format!("Failed to parse audio duration: {}", stdout.trim()))
    })?;

    Ok(duration_secs * 1000.0)
}

/// Оценка длительности MP3 по размеру файла и известному битрейту
pub fn estimate_mp3_duration_ms(byte_len: usize, bitrate_kbps: u32) -> f64 {
    byte_len as f64 * 8.0 / bitrate_kbps.max(1) as f64
}
