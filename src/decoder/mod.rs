//! Media decoding
//!
//! H.264 RTP depacketizing and decoding to RGB24 via FFmpeg, and Opus
//! decoding to interleaved stereo PCM16.

mod depacketizer;

pub mod audio;
pub mod video;

pub use audio::OpusDecoder;
pub use depacketizer::{AccessUnit, H264Depacketizer};
pub use video::{H264Decoder, RgbPicture};
