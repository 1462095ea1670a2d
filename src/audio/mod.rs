pub mod archive;
pub mod backend;
pub mod codec;
pub mod file;

pub use archive::{MessageRecord, MessageStore, SegmentArchive, SegmentAudio};
pub use backend::{AudioDevice, AudioFrame, PcmFormat};
pub use codec::{OpusCodec, ENCODER_FRAME_SAMPLES, ENCODER_SAMPLE_RATE};
pub use file::{AudioFile, WavFileDevice};
