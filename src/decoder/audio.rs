use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::codec::audio::AudioDecoder;
use ac_ffmpeg::packet::PacketMut;
use log::warn;

/// Sample encodings the Opus decoders hand back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    S16,
    F32,
}

impl SampleEncoding {
    /// Map an FFmpeg sample format name (`s16`, `fltp`, ...)
    pub fn from_format_name(name: &str) -> Option<Self> {
        match name {
            "s16" | "s16p" => Some(SampleEncoding::S16),
            "flt" | "fltp" => Some(SampleEncoding::F32),
            _ => None,
        }
    }

    fn bytes(self) -> usize {
        match self {
            SampleEncoding::S16 => 2,
            SampleEncoding::F32 => 4,
        }
    }

    fn read(self, bytes: &[u8]) -> i16 {
        match self {
            SampleEncoding::S16 => i16::from_ne_bytes([bytes[0], bytes[1]]),
            SampleEncoding::F32 => {
                f32_to_i16(f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
        }
    }
}

#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Opus decoder producing interleaved stereo PCM16
pub struct OpusDecoder {
    decoder: AudioDecoder,
}

// Owned and driven by a single track reader task.
unsafe impl Send for OpusDecoder {}

impl OpusDecoder {
    pub fn new() -> Result<Self, ac_ffmpeg::Error> {
        let decoder = AudioDecoder::new("libopus").or_else(|e| {
            warn!(
                "OpusDecoder: libopus not available ({}), trying built-in opus decoder",
                e
            );
            AudioDecoder::new("opus")
        })?;
        Ok(Self { decoder })
    }

    /// Decode one Opus packet into interleaved stereo samples
    pub fn decode(&mut self, opus_data: &[u8]) -> Vec<i16> {
        let packet = PacketMut::from(opus_data).freeze();
        if let Err(e) = self.decoder.try_push(packet) {
            if e.is_again() {
                let mut samples = self.drain();
                let retry = PacketMut::from(opus_data).freeze();
                if let Err(e) = self.decoder.try_push(retry) {
                    warn!("OpusDecoder: retry failed: {}", e);
                }
                samples.extend(self.drain());
                return samples;
            }
            warn!("OpusDecoder: decode error: {}", e);
            return Vec::new();
        }
        self.drain()
    }

    fn drain(&mut self) -> Vec<i16> {
        let mut out = Vec::new();

        while let Ok(Some(frame)) = self.decoder.take() {
            let sample_count = frame.samples();
            if sample_count == 0 {
                continue;
            }

            let format = frame.sample_format();
            let Some(encoding) = SampleEncoding::from_format_name(format.name()) else {
                warn!("OpusDecoder: unsupported sample format {}", format.name());
                continue;
            };

            let planes = frame.planes();
            let ok = if format.is_planar() {
                let data: Vec<&[u8]> = planes.iter().map(|p| p.data()).collect();
                append_planar(&mut out, &data, encoding, sample_count)
            } else {
                let channels = frame.channel_layout().channels() as usize;
                planes.first().is_some_and(|p| {
                    append_interleaved(&mut out, p.data(), encoding, sample_count, channels)
                })
            };
            if !ok {
                warn!("OpusDecoder: frame too small for {} samples", sample_count);
            }
        }
        out
    }
}

/// Append planar channels as interleaved stereo.
///
/// Mono is duplicated to both channels; channels past the second are dropped.
pub fn append_planar(
    out: &mut Vec<i16>,
    planes: &[&[u8]],
    encoding: SampleEncoding,
    sample_count: usize,
) -> bool {
    let width = encoding.bytes();
    let (left, right) = match planes {
        [] => return false,
        [mono] => (*mono, *mono),
        [left, right, ..] => (*left, *right),
    };
    if left.len() < sample_count * width || right.len() < sample_count * width {
        return false;
    }

    out.reserve(sample_count * 2);
    for i in 0..sample_count {
        let at = i * width;
        out.push(encoding.read(&left[at..at + width]));
        out.push(encoding.read(&right[at..at + width]));
    }
    true
}

/// Append interleaved samples with `channels` per frame as interleaved stereo
pub fn append_interleaved(
    out: &mut Vec<i16>,
    data: &[u8],
    encoding: SampleEncoding,
    sample_count: usize,
    channels: usize,
) -> bool {
    let width = encoding.bytes();
    let channels = channels.max(1);
    let frame_bytes = width * channels;
    if data.len() < sample_count * frame_bytes {
        return false;
    }

    out.reserve(sample_count * 2);
    for frame in data.chunks_exact(frame_bytes).take(sample_count) {
        let left = encoding.read(&frame[..width]);
        let right = if channels > 1 {
            encoding.read(&frame[width..2 * width])
        } else {
            left
        };
        out.push(left);
        out.push(right);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn i16_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    #[test]
    fn test_format_names() {
        assert_eq!(SampleEncoding::from_format_name("fltp"), Some(SampleEncoding::F32));
        assert_eq!(SampleEncoding::from_format_name("s16"), Some(SampleEncoding::S16));
        assert_eq!(SampleEncoding::from_format_name("dbl"), None);
    }

    #[test]
    fn test_f32_conversion_clamps() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
        assert_eq!(f32_to_i16(0.5), 16384);
    }

    #[test]
    fn test_planar_float_interleaves() {
        let left = f32_bytes(&[0.0, 1.0]);
        let right = f32_bytes(&[-1.0, 0.5]);
        let mut out = Vec::new();

        assert!(append_planar(&mut out, &[left.as_slice(), right.as_slice()], SampleEncoding::F32, 2));
        assert_eq!(out, vec![0, -i16::MAX, i16::MAX, 16384]);
    }

    #[test]
    fn test_planar_mono_is_duplicated() {
        let mono = i16_bytes(&[7, -7]);
        let mut out = Vec::new();

        assert!(append_planar(&mut out, &[mono.as_slice()], SampleEncoding::S16, 2));
        assert_eq!(out, vec![7, 7, -7, -7]);
    }

    #[test]
    fn test_interleaved_s16_passthrough() {
        let data = i16_bytes(&[1, 2, 3, 4, 5, 6]);
        let mut out = Vec::new();

        assert!(append_interleaved(&mut out, &data, SampleEncoding::S16, 3, 2));
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_interleaved_mono_is_duplicated() {
        let data = i16_bytes(&[3, -3, 9]);
        let mut out = Vec::new();

        assert!(append_interleaved(&mut out, &data, SampleEncoding::S16, 3, 1));
        assert_eq!(out, vec![3, 3, -3, -3, 9, 9]);
    }

    #[test]
    fn test_short_buffers_rejected() {
        let mut out = Vec::new();
        assert!(!append_interleaved(&mut out, &[0u8; 6], SampleEncoding::S16, 2, 2));
        assert!(!append_planar(&mut out, &[&[0u8; 4][..], &[0u8; 8][..]], SampleEncoding::F32, 2));
        assert!(out.is_empty());
    }
}
