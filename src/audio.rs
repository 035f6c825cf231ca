mod buffer;
mod encoder;
mod playback;

pub use buffer::AudioBuffer;
pub use encoder::{ClipEncoder, ClipInfo, EncodeError, EncodedClip};
pub use playback::{CpalMonitor, NullSink, PlaybackError, PlaybackSink};
