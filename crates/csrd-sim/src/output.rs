//! Dataset writer
//!
//! Each scenario becomes two files in the output directory:
//!
//! | File | Content |
//! |------|---------|
//! | `<id>.cf32` | little-endian interleaved f32 I/Q; frames in order, antennas of a frame back to back |
//! | `<id>.json` | [`AnnotationFile`]: where each frame sits in the data file and what it contains |

use crate::error::{SimError, SimResult};
use crate::scenario::{LinkAnnotation, ScenarioOutput, SegmentAnnotation};
use csrd_core::{ErrorTag, SignalMetadata};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const SAMPLE_FORMAT: &str = "cf32_le";

/// Per-frame index entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_id: usize,
    pub receiver_id: String,
    pub sample_rate: f64,
    pub num_antennas: usize,
    /// Samples per antenna
    pub num_samples: usize,
    /// Offset of the frame's first complex sample in the data file
    pub sample_offset: u64,
    pub carrier_frequency: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorTag>,
    pub segments: Vec<SegmentAnnotation>,
    pub links: Vec<LinkAnnotation>,
    #[serde(default)]
    pub metadata: SignalMetadata,
}

/// Annotation document written next to the sample file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationFile {
    pub scenario_id: String,
    pub data_file: String,
    pub sample_format: String,
    pub frames: Vec<FrameRecord>,
}

/// Paths and sizes of one written scenario
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenScenario {
    pub data_path: PathBuf,
    pub annotation_path: PathBuf,
    pub total_samples: u64,
}

#[derive(Debug, Clone)]
pub struct DatasetWriter {
    output_dir: PathBuf,
}

impl DatasetWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn write(&self, output: &ScenarioOutput) -> SimResult<WrittenScenario> {
        fs::create_dir_all(&self.output_dir).map_err(|e| SimError::io(&self.output_dir, e))?;
        let data_name = format!("{}.cf32", output.scenario_id);
        let data_path = self.output_dir.join(&data_name);
        let annotation_path = self.output_dir.join(format!("{}.json", output.scenario_id));

        let file = File::create(&data_path).map_err(|e| SimError::io(&data_path, e))?;
        let mut writer = BufWriter::new(file);
        let mut offset = 0u64;
        let mut frames = Vec::with_capacity(output.frames.len());

        for frame in &output.frames {
            let signal = &frame.signal;
            for antenna in &signal.samples {
                for sample in antenna {
                    writer
                        .write_all(&(sample.re as f32).to_le_bytes())
                        .and_then(|_| writer.write_all(&(sample.im as f32).to_le_bytes()))
                        .map_err(|e| SimError::io(&data_path, e))?;
                }
            }
            frames.push(FrameRecord {
                frame_id: frame.frame_id,
                receiver_id: frame.receiver_id.clone(),
                sample_rate: signal.sample_rate,
                num_antennas: signal.num_antennas(),
                num_samples: signal.len(),
                sample_offset: offset,
                carrier_frequency: signal.carrier_frequency,
                error: signal.error.clone(),
                segments: frame.annotations.clone(),
                links: frame.links.clone(),
                metadata: signal.metadata.clone(),
            });
            offset += (signal.num_antennas() * signal.len()) as u64;
        }
        writer.flush().map_err(|e| SimError::io(&data_path, e))?;

        let document = AnnotationFile {
            scenario_id: output.scenario_id.clone(),
            data_file: data_name,
            sample_format: SAMPLE_FORMAT.to_string(),
            frames,
        };
        let json = serde_json::to_string_pretty(&document).map_err(|e| SimError::Serialization(e.to_string()))?;
        fs::write(&annotation_path, json).map_err(|e| SimError::io(&annotation_path, e))?;

        tracing::info!(
            scenario = %output.scenario_id,
            frames = output.frames.len(),
            samples = offset,
            path = %data_path.display(),
            "scenario written"
        );
        Ok(WrittenScenario {
            data_path,
            annotation_path,
            total_samples: offset,
        })
    }
}
