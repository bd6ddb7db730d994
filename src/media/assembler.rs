//! Модуль сборки аудиодорожки
//!
//! Превращает упорядоченные клипы независимого синтеза в одну бесшовную
//! дорожку. Стратегия зависит от количества сегментов: одиночный клип
//! проходит насквозь с легким фейдом, небольшой набор склеивается цепочкой
//! попарных кроссфейдов, средний — паузами по типу перехода и одним concat,
//! большой — иерархически, пакетами ограниченного размера (это же удерживает
//! длину аргументов одного вызова движка в допустимых пределах).
//!
//! Перед любой склейкой каждый клип получает фильтр удаления постоянной
//! составляющей и короткую хвостовую тишину, чтобы кроссфейд съедал тишину,
//! а не последний слог.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::config::MontageConfig;
use crate::error::{MontageError, Result};
use crate::media::engine::AudioEngine;
use crate::media::filter::{AudioFilter, FilterGraph, StreamRef};
use crate::segment::{AssemblyStrategy, SpeakerRole};
use crate::utils::ffmpeg::estimate_mp3_duration_ms;
use crate::utils::temp::TempWorkspace;

/// Длительность легкого фейда по краям одиночного сегмента, мс
const LIGHT_FADE_MS: f64 = 10.0;

/// Клип, готовый к сборке
#[derive(Debug, Clone)]
pub struct AssemblyClip {
    /// Номер сегмента
    pub index: usize,
    /// Имя говорящего
    pub speaker: String,
    /// Роль говорящего
    pub role: SpeakerRole,
    /// Аудиоданные
    pub audio: Bytes,
    /// Длительность клипа по данным синтеза, мс
    pub duration_ms: f64,
}

/// Результат сборки
#[derive(Debug, Clone)]
pub struct AssembledAudio {
    /// Единая аудиодорожка
    pub audio: Bytes,
    /// Длительность дорожки, мс
    pub duration_ms: f64,
    /// Стратегия, по которой шла сборка
    pub strategy: AssemblyStrategy,
}

/// Сборщик аудиодорожки
pub struct AudioAssembler {
    engine: Arc<dyn AudioEngine>,
    config: Arc<MontageConfig>,
}

impl AudioAssembler {
    /// Создать новый экземпляр AudioAssembler
    pub fn new(engine: Arc<dyn AudioEngine>, config: Arc<MontageConfig>) -> Self {
        Self { engine, config }
    }

    /// Собрать упорядоченные клипы в одну дорожку
    ///
    /// Недоступность движка фатальна для многосегментных запросов: тихий
    /// откат на сырую конкатенацию дал бы слышимые артефакты. Одиночный
    /// сегмент в этом случае отдается без обработки.
    pub async fn assemble(&self, clips: &[AssemblyClip]) -> Result<AssembledAudio> {
        if clips.is_empty() {
            return Err(MontageError::Configuration(
                "nothing to assemble: clip list is empty".to_string(),
            ));
        }

        if !self.engine.is_available().await {
            if clips.len() > 1 {
                return Err(MontageError::EngineUnavailable(format!(
                    "audio engine is required to assemble {} segments",
                    clips.len()
                )));
            }
            log::warn!("Audio engine unavailable, returning the single segment unprocessed");
            return Ok(AssembledAudio {
                audio: clips[0].audio.clone(),
                duration_ms: clips[0].duration_ms,
                strategy: AssemblyStrategy::SinglePassThrough,
            });
        }

        let workspace = TempWorkspace::new(self.config.cleanup_temp_files)?;
        let mut clip_paths = Vec::with_capacity(clips.len());
        for clip in clips {
            let path = workspace
                .write_file(&format!("segment_{:04}.mp3", clip.index), &clip.audio)
                .await?;
            clip_paths.push(path);
        }

        let assembly = &self.config.assembly;
        let (out_path, strategy) = if clips.len() == 1 {
            let out = self.run_single(&workspace, &clips[0], &clip_paths[0]).await?;
            (out, AssemblyStrategy::SinglePassThrough)
        } else if clips.len() <= assembly.gap_concat_max {
            let out = workspace.path().join("montage.mp3");
            self.run_set(clips, &clip_paths, None, &out, true).await?;
            let strategy = if clips.len() <= assembly.small_set_max {
                AssemblyStrategy::SmallSetCrossfade
            } else {
                AssemblyStrategy::GapConcat
            };
            (out, strategy)
        } else {
            let out = self.run_batched(&workspace, clips, &clip_paths).await?;
            (out, AssemblyStrategy::BatchedCrossfade)
        };

        let audio = Bytes::from(tokio::fs::read(&out_path).await?);
        let duration_ms = match self.engine.probe_duration_ms(&out_path).await {
            Ok(d) if d > 0.0 => d,
            Ok(_) => estimate_mp3_duration_ms(audio.len(), assembly.mp3_bitrate_kbps),
            Err(e) => {
                log::warn!("Duration probe failed ({}), estimating from byte size", e);
                estimate_mp3_duration_ms(audio.len(), assembly.mp3_bitrate_kbps)
            }
        };

        log::info!(
            "Assembled {} segment(s) via {} ({:.0} ms)",
            clips.len(),
            strategy.as_str(),
            duration_ms
        );

        Ok(AssembledAudio {
            audio,
            duration_ms,
            strategy,
        })
    }

    /// Склеить части одного разбитого сегмента: короткая пауза плюс
    /// мини-кроссфейд на каждом стыке
    pub async fn join_chunks(&self, chunks: &[Bytes]) -> Result<Bytes> {
        match chunks.len() {
            0 => {
                return Err(MontageError::Configuration(
                    "no chunks to join".to_string(),
                ))
            }
            1 => return Ok(chunks[0].clone()),
            _ => {}
        }

        if !self.engine.is_available().await {
            return Err(MontageError::EngineUnavailable(
                "audio engine is required to reassemble an oversize segment".to_string(),
            ));
        }

        let workspace = TempWorkspace::new(self.config.cleanup_temp_files)?;
        let mut paths = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            paths.push(
                workspace
                    .write_file(&format!("chunk_{:03}.mp3", i), chunk)
                    .await?,
            );
        }

        let assembly = &self.config.assembly;
        let mut graph = FilterGraph::new();
        let mut prepared = Vec::with_capacity(chunks.len());
        for i in 0..chunks.len() {
            let pad = if i == chunks.len() - 1 {
                0.0
            } else {
                self.config.chunk_gap_ms
            };
            prepared.push(graph.chain(
                StreamRef::Input(i),
                vec![
                    AudioFilter::HighPass {
                        frequency_hz: assembly.highpass_hz,
                    },
                    AudioFilter::Pad { duration_ms: pad },
                ],
            ));
        }

        let mut acc = prepared[0].clone();
        for stream in prepared.into_iter().skip(1) {
            acc = graph.crossfade(acc, stream, self.config.chunk_crossfade_ms);
        }

        let out = workspace.path().join("segment_joined.mp3");
        self.engine.run_filter(&paths, &graph, &out).await?;

        Ok(Bytes::from(tokio::fs::read(&out).await?))
    }

    /// Одиночный сегмент: только легкий фейд по краям
    async fn run_single(
        &self,
        workspace: &TempWorkspace,
        clip: &AssemblyClip,
        clip_path: &Path,
    ) -> Result<PathBuf> {
        let mut graph = FilterGraph::new();
        graph.chain(
            StreamRef::Input(0),
            vec![
                AudioFilter::FadeIn {
                    duration_ms: LIGHT_FADE_MS,
                },
                AudioFilter::FadeOut {
                    start_ms: (clip.duration_ms - LIGHT_FADE_MS).max(0.0),
                    duration_ms: LIGHT_FADE_MS,
                },
            ],
        );

        let out = workspace.path().join("montage.mp3");
        self.engine
            .run_filter(&[clip_path.to_path_buf()], &graph, &out)
            .await?;
        Ok(out)
    }

    /// Собрать набор клипов одним вызовом движка
    ///
    /// До small_set_max клипов включительно — цепочка попарных кроссфейдов,
    /// больше — паузы по типу перехода и один concat. `next` — первый клип
    /// следующего пакета: его наличие означает, что последний клип набора
    /// получает полноценную паузу вместо хвостового буфера.
    async fn run_set(
        &self,
        clips: &[AssemblyClip],
        clip_paths: &[PathBuf],
        next: Option<&AssemblyClip>,
        out: &Path,
        finishing: bool,
    ) -> Result<()> {
        let assembly = &self.config.assembly;
        let n = clips.len();
        let mut graph = FilterGraph::new();

        let acc = if n <= assembly.small_set_max {
            let mut prepared = Vec::with_capacity(n);
            for (i, clip) in clips.iter().enumerate() {
                let pad = if i == n - 1 {
                    self.boundary_pad(clip, next)
                } else {
                    assembly.tail_pad_ms
                };
                prepared.push(graph.chain(
                    StreamRef::Input(i),
                    vec![
                        AudioFilter::HighPass {
                            frequency_hz: assembly.highpass_hz,
                        },
                        AudioFilter::Pad { duration_ms: pad },
                    ],
                ));
            }

            let mut acc = prepared[0].clone();
            for (i, stream) in prepared.into_iter().enumerate().skip(1) {
                let duration = self.crossfade_between(&clips[i - 1], &clips[i]);
                acc = graph.crossfade(acc, stream, duration);
            }
            acc
        } else {
            let mut prepared = Vec::with_capacity(n);
            for (i, clip) in clips.iter().enumerate() {
                let pad = if i == n - 1 {
                    self.boundary_pad(clip, next)
                } else {
                    self.trailing_gap(clip, &clips[i + 1])
                };
                prepared.push(graph.chain(
                    StreamRef::Input(i),
                    vec![
                        AudioFilter::HighPass {
                            frequency_hz: assembly.highpass_hz,
                        },
                        AudioFilter::Pad { duration_ms: pad },
                    ],
                ));
            }
            graph.concat(prepared)
        };

        let mut inputs = clip_paths.to_vec();
        if finishing {
            self.finish(&mut graph, acc, n, &mut inputs);
        }

        self.engine.run_filter(&inputs, &graph, out).await
    }

    /// Иерархическая сборка: пакеты ограниченного размера, затем
    /// последовательная склейка пакетов кроссфейдами
    async fn run_batched(
        &self,
        workspace: &TempWorkspace,
        clips: &[AssemblyClip],
        clip_paths: &[PathBuf],
    ) -> Result<PathBuf> {
        let assembly = &self.config.assembly;
        let batch_size = assembly.batch_size.max(1);
        let batches: Vec<&[AssemblyClip]> = clips.chunks(batch_size).collect();
        let path_batches: Vec<&[PathBuf]> = clip_paths.chunks(batch_size).collect();

        log::debug!(
            "Hierarchical assembly: {} clips in {} batch(es) of up to {}",
            clips.len(),
            batches.len(),
            batch_size
        );

        let mut batch_paths = Vec::with_capacity(batches.len());
        for (k, batch) in batches.iter().enumerate() {
            let out = workspace.path().join(format!("batch_{:03}.mp3", k));
            let next = batches.get(k + 1).map(|b| &b[0]);
            // Единственный пакет пропускает стадию склейки, поэтому
            // завершающие фильтры входят в его собственный граф
            let finishing = batches.len() == 1;
            self.run_set(batch, path_batches[k], next, &out, finishing)
                .await?;
            batch_paths.push(out);
        }

        if batch_paths.len() == 1 {
            return Ok(batch_paths.remove(0));
        }

        let mut acc = batch_paths[0].clone();
        for (k, part) in batch_paths.iter().enumerate().skip(1) {
            let out = workspace.path().join(format!("join_{:03}.mp3", k));
            let finishing = k == batch_paths.len() - 1;
            self.run_join(&acc, part, &out, finishing).await?;
            acc = out;
        }

        Ok(acc)
    }

    /// Склейка двух пакетов облегченным кроссфейдом с той же подготовкой
    /// стыка, что и у отдельных клипов
    async fn run_join(
        &self,
        left: &Path,
        right: &Path,
        out: &Path,
        finishing: bool,
    ) -> Result<()> {
        let assembly = &self.config.assembly;
        let mut graph = FilterGraph::new();

        let prepare = vec![
            AudioFilter::HighPass {
                frequency_hz: assembly.highpass_hz,
            },
            AudioFilter::Pad {
                duration_ms: assembly.tail_pad_ms,
            },
        ];
        let a = graph.chain(StreamRef::Input(0), prepare.clone());
        let b = graph.chain(StreamRef::Input(1), prepare);
        let acc = graph.crossfade(a, b, assembly.join_crossfade_ms);

        let mut inputs = vec![left.to_path_buf(), right.to_path_buf()];
        if finishing {
            self.finish(&mut graph, acc, 2, &mut inputs);
        }

        self.engine.run_filter(&inputs, &graph, out).await
    }

    /// Завершающие стадии итогового графа: подмешивание фоновой дорожки
    /// и нормализация громкости. Нормализация алгебраически продолжает
    /// граф кроссфейдов, а не идет отдельным проходом.
    fn finish(
        &self,
        graph: &mut FilterGraph,
        acc: StreamRef,
        clip_input_count: usize,
        inputs: &mut Vec<PathBuf>,
    ) -> StreamRef {
        let assembly = &self.config.assembly;
        let mut acc = acc;

        if let Some(overlay_path) = &self.config.overlay_audio_path {
            let narration = graph.chain(
                acc,
                vec![AudioFilter::Volume {
                    level: self.config.narration_volume,
                }],
            );
            let overlay = graph.chain(
                StreamRef::Input(clip_input_count),
                vec![AudioFilter::Volume {
                    level: self.config.overlay_volume,
                }],
            );
            acc = graph.mix(vec![narration, overlay]);
            inputs.push(PathBuf::from(overlay_path));
        }

        if assembly.normalize_loudness {
            acc = graph.chain(
                acc,
                vec![AudioFilter::LoudnessNormalize {
                    integrated: assembly.loudnorm_i,
                    true_peak: assembly.loudnorm_tp,
                    range: assembly.loudnorm_lra,
                }],
            );
        }

        acc
    }

    /// Пауза последнего клипа набора: полноценный переход к следующему
    /// пакету или хвостовой буфер в самом конце дорожки
    fn boundary_pad(&self, clip: &AssemblyClip, next: Option<&AssemblyClip>) -> f64 {
        match next {
            Some(next) => self.trailing_gap(clip, next),
            None => self.config.assembly.tail_pad_ms,
        }
    }

    /// Кроссфейд между соседними клипами по типу перехода
    fn crossfade_between(&self, current: &AssemblyClip, next: &AssemblyClip) -> f64 {
        if current.speaker == next.speaker {
            self.config.assembly.same_speaker_crossfade_ms
        } else {
            self.config.assembly.speaker_change_crossfade_ms
        }
    }

    /// Хвостовая пауза клипа по типу перехода к следующему
    fn trailing_gap(&self, current: &AssemblyClip, next: &AssemblyClip) -> f64 {
        let assembly = &self.config.assembly;
        if current.speaker == next.speaker {
            assembly.same_speaker_gap_ms
        } else if current.role == SpeakerRole::Narrator || next.role == SpeakerRole::Narrator {
            assembly
                .narrator_gap_ms
                .unwrap_or(assembly.speaker_change_gap_ms)
        } else {
            assembly.speaker_change_gap_ms
        }
    }
}
