//! Модуль графа аудиофильтров
//!
//! Граф фильтров внешнего аудио-движка моделируется небольшим деревом
//! узлов и рендерится в текстовый синтаксис `-filter_complex` одним
//! проходом. Ручная сборка строк в точках вызова исключена: метки потоков
//! и порядок стадий порождаются самим графом.

use std::fmt;

/// Один аудиофильтр в цепочке обработки потока
#[derive(Debug, Clone, PartialEq)]
pub enum AudioFilter {
    /// Фильтр верхних частот: убирает постоянную составляющую,
    /// щелкающую на стыках независимо синтезированных клипов
    HighPass { frequency_hz: u32 },
    /// Хвостовая тишина
    Pad { duration_ms: f64 },
    /// Плавное нарастание громкости от начала потока
    FadeIn { duration_ms: f64 },
    /// Плавное затухание громкости
    FadeOut { start_ms: f64, duration_ms: f64 },
    /// Изменение громкости
    Volume { level: f32 },
    /// Нормализация громкости
    LoudnessNormalize {
        integrated: f64,
        true_peak: f64,
        range: f64,
    },
}

/// Секунды для синтаксиса движка
fn secs(ms: f64) -> String {
    format!("{:.3}", ms / 1000.0)
}

impl AudioFilter {
    fn render(&self) -> String {
        match self {
            Self::HighPass { frequency_hz } => format!("highpass=f={}", frequency_hz),
            Self::Pad { duration_ms } => format!("apad=pad_dur={}", secs(*duration_ms)),
            Self::FadeIn { duration_ms } => format!("afade=t=in:st=0:d={}", secs(*duration_ms)),
            Self::FadeOut {
                start_ms,
                duration_ms,
            } => format!("afade=t=out:st={}:d={}", secs(*start_ms), secs(*duration_ms)),
            Self::Volume { level } => format!("volume={:.2}", level),
            Self::LoudnessNormalize {
                integrated,
                true_peak,
                range,
            } => format!("loudnorm=I={}:TP={}:LRA={}", integrated, true_peak, range),
        }
    }
}

/// Ссылка на аудиопоток графа
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRef {
    /// Аудиодорожка N-го входного файла
    Input(usize),
    /// Именованный промежуточный поток
    Labeled(String),
}

impl fmt::Display for StreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(i) => write!(f, "[{}:a]", i),
            Self::Labeled(l) => write!(f, "[{}]", l),
        }
    }
}

#[derive(Debug, Clone)]
enum Stage {
    Chain {
        input: StreamRef,
        filters: Vec<AudioFilter>,
        label: String,
    },
    Crossfade {
        first: StreamRef,
        second: StreamRef,
        duration_ms: f64,
        label: String,
    },
    Concat {
        inputs: Vec<StreamRef>,
        label: String,
    },
    Mix {
        inputs: Vec<StreamRef>,
        label: String,
    },
}

impl Stage {
    fn label(&self) -> &str {
        match self {
            Self::Chain { label, .. }
            | Self::Crossfade { label, .. }
            | Self::Concat { label, .. }
            | Self::Mix { label, .. } => label,
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Chain {
                input,
                filters,
                label,
            } => {
                let body = if filters.is_empty() {
                    "anull".to_string()
                } else {
                    filters
                        .iter()
                        .map(AudioFilter::render)
                        .collect::<Vec<_>>()
                        .join(",")
                };
                format!("{}{}[{}]", input, body, label)
            }
            Self::Crossfade {
                first,
                second,
                duration_ms,
                label,
            } => format!(
                "{}{}acrossfade=d={}:c1=tri:c2=tri[{}]",
                first,
                second,
                secs(*duration_ms),
                label
            ),
            Self::Concat { inputs, label } => {
                let heads: String = inputs.iter().map(|i| i.to_string()).collect();
                format!("{}concat=n={}:v=0:a=1[{}]", heads, inputs.len(), label)
            }
            Self::Mix { inputs, label } => {
                let heads: String = inputs.iter().map(|i| i.to_string()).collect();
                format!(
                    "{}amix=inputs={}:duration=longest[{}]",
                    heads,
                    inputs.len(),
                    label
                )
            }
        }
    }
}

/// Граф фильтров одного вызова аудио-движка
#[derive(Debug, Clone, Default)]
pub struct FilterGraph {
    stages: Vec<Stage>,
    counter: usize,
}

impl FilterGraph {
    /// Создать пустой граф
    pub fn new() -> Self {
        Self::default()
    }

    fn next_label(&mut self) -> String {
        let label = format!("s{}", self.counter);
        self.counter += 1;
        label
    }

    /// Добавить цепочку фильтров над потоком
    pub fn chain(&mut self, input: StreamRef, filters: Vec<AudioFilter>) -> StreamRef {
        let label = self.next_label();
        self.stages.push(Stage::Chain {
            input,
            filters,
            label: label.clone(),
        });
        StreamRef::Labeled(label)
    }

    /// Добавить кроссфейд двух потоков
    pub fn crossfade(&mut self, first: StreamRef, second: StreamRef, duration_ms: f64) -> StreamRef {
        let label = self.next_label();
        self.stages.push(Stage::Crossfade {
            first,
            second,
            duration_ms,
            label: label.clone(),
        });
        StreamRef::Labeled(label)
    }

    /// Добавить конкатенацию потоков
    pub fn concat(&mut self, inputs: Vec<StreamRef>) -> StreamRef {
        let label = self.next_label();
        self.stages.push(Stage::Concat {
            inputs,
            label: label.clone(),
        });
        StreamRef::Labeled(label)
    }

    /// Добавить смешивание потоков
    pub fn mix(&mut self, inputs: Vec<StreamRef>) -> StreamRef {
        let label = self.next_label();
        self.stages.push(Stage::Mix {
            inputs,
            label: label.clone(),
        });
        StreamRef::Labeled(label)
    }

    /// Метка итогового потока графа
    pub fn final_label(&self) -> Option<String> {
        self.stages.last().map(|s| format!("[{}]", s.label()))
    }

    /// Пуст ли граф
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Отрендерить граф в синтаксис движка
    pub fn render(&self) -> String {
        self.stages
            .iter()
            .map(Stage::render)
            .collect::<Vec<_>>()
            .join(";")
    }
}

#[cfg(test)]
impl FilterGraph {
    /// Аналитическая длительность результата графа по длительностям входов
    ///
    /// Используется фейковым движком в тестах: pad удлиняет поток,
    /// кроссфейд съедает свою длительность, concat суммирует, mix берет
    /// максимум, остальные фильтры длительность не меняют.
    pub fn simulate_duration_ms(&self, input_durations_ms: &[f64]) -> f64 {
        use std::collections::HashMap;

        fn resolve(
            stream: &StreamRef,
            inputs: &[f64],
            labels: &HashMap<String, f64>,
        ) -> f64 {
            match stream {
                StreamRef::Input(i) => inputs.get(*i).copied().unwrap_or(0.0),
                StreamRef::Labeled(l) => labels.get(l).copied().unwrap_or(0.0),
            }
        }

        let mut labels: HashMap<String, f64> = HashMap::new();
        let mut last = 0.0;

        for stage in &self.stages {
            let value = match stage {
                Stage::Chain { input, filters, .. } => {
                    let mut duration = resolve(input, input_durations_ms, &labels);
                    for filter in filters {
                        if let AudioFilter::Pad { duration_ms } = filter {
                            duration += duration_ms;
                        }
                    }
                    duration
                }
                Stage::Crossfade {
                    first,
                    second,
                    duration_ms,
                    ..
                } => {
                    resolve(first, input_durations_ms, &labels)
                        + resolve(second, input_durations_ms, &labels)
                        - duration_ms
                }
                Stage::Concat { inputs, .. } => inputs
                    .iter()
                    .map(|i| resolve(i, input_durations_ms, &labels))
                    .sum(),
                Stage::Mix { inputs, .. } => inputs
                    .iter()
                    .map(|i| resolve(i, input_durations_ms, &labels))
                    .fold(0.0, f64::max),
            };
            labels.insert(stage.label().to_string(), value);
            last = value;
        }

        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_render() {
        let mut graph = FilterGraph::new();
        let out = graph.chain(
            StreamRef::Input(0),
            vec![
                AudioFilter::HighPass { frequency_hz: 20 },
                AudioFilter::Pad { duration_ms: 50.0 },
            ],
        );

        assert_eq!(out, StreamRef::Labeled("s0".to_string()));
        assert_eq!(graph.render(), "[0:a]highpass=f=20,apad=pad_dur=0.050[s0]");
        assert_eq!(graph.final_label().unwrap(), "[s0]");
    }

    #[test]
    fn test_crossfade_chain_render() {
        let mut graph = FilterGraph::new();
        let a = graph.chain(StreamRef::Input(0), vec![AudioFilter::HighPass { frequency_hz: 20 }]);
        let b = graph.chain(StreamRef::Input(1), vec![AudioFilter::HighPass { frequency_hz: 20 }]);
        let x = graph.crossfade(a, b, 100.0);
        graph.chain(
            x,
            vec![AudioFilter::LoudnessNormalize {
                integrated: -16.0,
                true_peak: -1.5,
                range: 11.0,
            }],
        );

        assert_eq!(
            graph.render(),
            "[0:a]highpass=f=20[s0];\
             [1:a]highpass=f=20[s1];\
             [s0][s1]acrossfade=d=0.100:c1=tri:c2=tri[s2];\
             [s2]loudnorm=I=-16:TP=-1.5:LRA=11[s3]"
        );
    }

    #[test]
    fn test_concat_render() {
        let mut graph = FilterGraph::new();
        let inputs = vec![
            StreamRef::Input(0),
            StreamRef::Input(1),
            StreamRef::Input(2),
        ];
        graph.concat(inputs);

        assert_eq!(graph.render(), "[0:a][1:a][2:a]concat=n=3:v=0:a=1[s0]");
    }

    #[test]
    fn test_mix_render() {
        let mut graph = FilterGraph::new();
        let narration = graph.chain(StreamRef::Input(0), vec![AudioFilter::Volume { level: 1.0 }]);
        let overlay = graph.chain(StreamRef::Input(1), vec![AudioFilter::Volume { level: 0.2 }]);
        graph.mix(vec![narration, overlay]);

        assert_eq!(
            graph.render(),
            "[0:a]volume=1.00[s0];[1:a]volume=0.20[s1];[s0][s1]amix=inputs=2:duration=longest[s2]"
        );
    }

    #[test]
    fn test_empty_chain_is_passthrough() {
        let mut graph = FilterGraph::new();
        graph.chain(StreamRef::Input(0), vec![]);

        assert_eq!(graph.render(), "[0:a]anull[s0]");
    }

    #[test]
    fn test_fade_render() {
        let fade_in = AudioFilter::FadeIn { duration_ms: 10.0 };
        let fade_out = AudioFilter::FadeOut {
            start_ms: 1_990.0,
            duration_ms: 10.0,
        };

        assert_eq!(fade_in.render(), "afade=t=in:st=0:d=0.010");
        assert_eq!(fade_out.render(), "afade=t=out:st=1.990:d=0.010");
    }
}
