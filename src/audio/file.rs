use anyhow::{Context, Result};
use hound::WavReader;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{AudioDevice, AudioFrame, PcmFormat};
use super::codec::{ENCODER_FRAME_SAMPLES, FRAME_DURATION_MS};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            anyhow::bail!(
                "Unsupported WAV format: {} bit {:?}, expected 16 bit PCM",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Downmix to mono and resample to the encoder's 16 kHz
    pub fn to_capture_format(&self) -> Vec<i16> {
        let target = PcmFormat::capture();
        let mono = downmix_to_mono(&self.samples, self.channels);
        resample_linear(&mono, self.sample_rate, target.sample_rate)
    }
}

/// Average interleaved channels into one
pub fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Linear-interpolation resampler for mono PCM
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let step = f64::from(from_rate) / f64::from(to_rate);
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = pos - idx as f64;
            let value = f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[next]) * frac;
            value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
        })
        .collect()
}

/// WAV-backed capture source and render sink.
///
/// Capture replays a WAV file as 60 ms frames at 16 kHz mono, optionally
/// paced in real time. Playback writes each stretch of rendered audio to its
/// own WAV file under the output directory.
pub struct WavFileDevice {
    name: String,
    input: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    paced: bool,
    capturing: Arc<AtomicBool>,
    capture_task: Option<JoinHandle<()>>,
    playback_format: PcmFormat,
    playback: Option<hound::WavWriter<BufWriter<File>>>,
    rendered: Vec<PathBuf>,
    played_samples: usize,
}

impl WavFileDevice {
    pub fn new(input: Option<PathBuf>, output_dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = &output_dir {
            fs::create_dir_all(dir).context("Failed to create playback output directory")?;
        }

        let name = match &input {
            Some(path) => format!("wav:{}", path.display()),
            None => "wav:silent".to_string(),
        };

        Ok(Self {
            name,
            input,
            output_dir,
            paced: true,
            capturing: Arc::new(AtomicBool::new(false)),
            capture_task: None,
            playback_format: PcmFormat::new(24000, 1),
            playback: None,
            rendered: Vec::new(),
            played_samples: 0,
        })
    }

    /// Deliver capture frames as fast as the consumer takes them
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// WAV files finished so far
    pub fn rendered_files(&self) -> &[PathBuf] {
        &self.rendered
    }

    pub fn played_samples(&self) -> usize {
        self.played_samples
    }

    fn open_playback_file(&mut self) -> Result<()> {
        let Some(dir) = &self.output_dir else {
            return Ok(());
        };

        let path = dir.join(format!("playback-{:03}.wav", self.rendered.len()));
        let spec = hound::WavSpec {
            channels: self.playback_format.channels,
            sample_rate: self.playback_format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;
        self.playback = Some(writer);
        self.rendered.push(path);
        Ok(())
    }

    fn finish_playback_file(&mut self) -> Result<()> {
        if let Some(writer) = self.playback.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AudioDevice for WavFileDevice {
    async fn start_capture(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            anyhow::bail!("Capture already running on {}", self.name);
        }

        let samples = match &self.input {
            Some(path) => AudioFile::open(path)?.to_capture_format(),
            None => Vec::new(),
        };

        let (tx, rx) = mpsc::channel(100);
        let capturing = self.capturing.clone();
        capturing.store(true, Ordering::SeqCst);
        let paced = self.paced;
        let format = PcmFormat::capture();

        info!("Starting capture from {}", self.name);

        self.capture_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(u64::from(
                FRAME_DURATION_MS,
            )));

            for (index, chunk) in samples.chunks(ENCODER_FRAME_SAMPLES).enumerate() {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }
                if paced {
                    ticker.tick().await;
                }

                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate: format.sample_rate,
                    channels: format.channels,
                    timestamp_ms: index as u64 * u64::from(FRAME_DURATION_MS),
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
            }

            capturing.store(false, Ordering::SeqCst);
        }));

        Ok(rx)
    }

    async fn stop_capture(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.capture_task.take() {
            task.abort();
        }
        info!("Stopped capture from {}", self.name);
        Ok(())
    }

    fn configure_playback(&mut self, format: PcmFormat) -> Result<()> {
        if format != self.playback_format {
            self.finish_playback_file()?;
            self.playback_format = format;
        }
        Ok(())
    }

    fn play(&mut self, pcm: &[i16]) -> Result<()> {
        if self.playback.is_none() {
            self.open_playback_file()?;
        }
        if let Some(writer) = &mut self.playback {
            for &sample in pcm {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }
        }
        self.played_samples += pcm.len();
        Ok(())
    }

    fn stop_playback(&mut self) -> Result<()> {
        self.finish_playback_file()
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WavFileDevice {
    fn drop(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.capture_task.take() {
            task.abort();
        }
        if let Some(writer) = self.playback.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let stereo = vec![100, 300, -200, -400];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![200, -300]);
    }

    #[test]
    fn test_resample_halves_length() {
        let input: Vec<i16> = (0..3200).map(|i| (i % 100) as i16).collect();
        let output = resample_linear(&input, 32000, 16000);
        assert_eq!(output.len(), 1600);
        assert_eq!(output[0], input[0]);
    }

    #[test]
    fn test_resample_identity() {
        let input = vec![1, 2, 3];
        assert_eq!(resample_linear(&input, 16000, 16000), input);
    }
}
