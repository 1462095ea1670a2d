use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const INDEX_FILE: &str = "messages.jsonl";

/// One persisted chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub device_id: String,
    pub message_type: String,
    pub text: String,
    pub audio_path: Option<String>,
    pub timestamp_ms: u64,
}

/// PCM attached to a message
#[derive(Debug, Clone, Copy)]
pub struct SegmentAudio<'a> {
    pub pcm: &'a [i16],
    pub sample_rate: u32,
    pub channels: u16,
}

/// Persistence collaborator for chat messages
pub trait MessageStore: Send + Sync {
    fn save_message(
        &self,
        device_id: &str,
        message_type: &str,
        text: &str,
        audio: Option<SegmentAudio<'_>>,
        timestamp_ms: u64,
    ) -> Result<MessageRecord>;
}

/// Directory-backed store: WAV per audio segment plus a JSON-lines index
pub struct SegmentArchive {
    dir: PathBuf,
    index_lock: Mutex<()>,
}

impl SegmentArchive {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create archive directory {:?}", dir))?;

        info!("Segment archive at {}", dir.display());

        Ok(Self {
            dir,
            index_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All records in the order they were written; unreadable lines are skipped
    pub fn records(&self) -> Result<Vec<MessageRecord>> {
        let path = self.dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&path).context("Failed to open archive index")?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.context("Failed to read archive index")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping corrupt archive record: {}", e),
            }
        }
        Ok(records)
    }

    fn write_wav(&self, device_id: &str, timestamp_ms: u64, audio: SegmentAudio<'_>) -> Result<PathBuf> {
        let device_dir = self.dir.join(sanitize(device_id));
        fs::create_dir_all(&device_dir).context("Failed to create device directory")?;

        let path = device_dir.join(format!("tts_{}.wav", timestamp_ms));
        let spec = hound::WavSpec {
            channels: audio.channels,
            sample_rate: audio.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;
        for &sample in audio.pcm {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV file")?;

        Ok(path)
    }
}

impl MessageStore for SegmentArchive {
    fn save_message(
        &self,
        device_id: &str,
        message_type: &str,
        text: &str,
        audio: Option<SegmentAudio<'_>>,
        timestamp_ms: u64,
    ) -> Result<MessageRecord> {
        let audio_path = match audio {
            Some(audio) if !audio.pcm.is_empty() => Some(
                self.write_wav(device_id, timestamp_ms, audio)?
                    .display()
                    .to_string(),
            ),
            _ => None,
        };

        let record = MessageRecord {
            device_id: device_id.to_string(),
            message_type: message_type.to_string(),
            text: text.to_string(),
            audio_path,
            timestamp_ms,
        };

        let line = serde_json::to_string(&record)?;
        let _guard = self.index_lock.lock();
        let mut index = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(INDEX_FILE))
            .context("Failed to open archive index")?;
        writeln!(index, "{}", line).context("Failed to append archive record")?;

        info!(
            "Archived {} message for {} (audio: {})",
            message_type,
            device_id,
            record.audio_path.is_some()
        );

        Ok(record)
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
