use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::codec::video::VideoDecoder;
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase, Timestamp as FfTimestamp};
use log::warn;

use crate::assets::RTP_VIDEO_CLOCK_RATE;

/// A decoded picture converted to packed RGB24
#[derive(Debug, Clone)]
pub struct RgbPicture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Decoder pts in 90 kHz ticks, as pushed with the access unit
    pub pts: i64,
}

/// H.264 video decoder using FFmpeg, producing RGB24 pictures.
pub struct H264Decoder {
    decoder: VideoDecoder,
    time_base: TimeBase,
    packets: u64,
}

// The decoder is only ever driven from the one track reader task that owns it.
unsafe impl Send for H264Decoder {}

impl H264Decoder {
    pub fn new() -> Result<Self, ac_ffmpeg::Error> {
        let time_base = TimeBase::new(1, RTP_VIDEO_CLOCK_RATE as i32);
        let decoder = VideoDecoder::builder("h264")?
            .time_base(time_base)
            .build()?;

        Ok(Self {
            decoder,
            time_base,
            packets: 0,
        })
    }

    /// Decode one Annex B access unit stamped with `pts` (90 kHz ticks).
    ///
    /// Returns every picture the decoder released; usually zero or one.
    pub fn decode(&mut self, access_unit: &[u8], pts: i64) -> Vec<RgbPicture> {
        self.packets += 1;
        let packet = PacketMut::from(access_unit)
            .with_pts(FfTimestamp::new(pts, self.time_base))
            .freeze();

        if let Err(e) = self.decoder.try_push(packet) {
            warn!("VideoDecoder: failed to push packet {}: {}", self.packets, e);
            return Vec::new();
        }

        let mut pictures = Vec::new();
        loop {
            match self.decoder.take() {
                Ok(Some(frame)) => {
                    let planes = frame.planes();
                    if planes.len() < 3 {
                        warn!("VideoDecoder: unexpected plane count {}", planes.len());
                        continue;
                    }
                    let (width, height) = (frame.width(), frame.height());
                    let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
                    let data = yuv420_to_rgb24(
                        Plane::new(planes[0].data(), planes[0].line_size(), width, height),
                        Plane::new(planes[1].data(), planes[1].line_size(), cw, ch),
                        Plane::new(planes[2].data(), planes[2].line_size(), cw, ch),
                    );
                    let frame_pts = frame.pts();
                    pictures.push(RgbPicture {
                        data,
                        width: width as u32,
                        height: height as u32,
                        pts: if frame_pts.is_null() {
                            pts
                        } else {
                            frame_pts.timestamp()
                        },
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("VideoDecoder: take() error: {}", e);
                    break;
                }
            }
        }
        pictures
    }
}

/// One image plane with its row stride
#[derive(Clone, Copy)]
pub struct Plane<'a> {
    data: &'a [u8],
    stride: usize,
    width: usize,
    height: usize,
}

impl<'a> Plane<'a> {
    pub fn new(data: &'a [u8], stride: usize, width: usize, height: usize) -> Self {
        Self {
            data,
            stride: stride.max(width),
            width,
            height,
        }
    }

    #[inline]
    fn at(&self, x: usize, y: usize) -> u8 {
        self.data
            .get(y.min(self.height.saturating_sub(1)) * self.stride + x.min(self.width.saturating_sub(1)))
            .copied()
            .unwrap_or(0)
    }
}

/// Convert planar YUV 4:2:0 (BT.601, limited range) to packed RGB24.
pub fn yuv420_to_rgb24(y: Plane<'_>, u: Plane<'_>, v: Plane<'_>) -> Vec<u8> {
    let mut out = Vec::with_capacity(y.width * y.height * 3);

    for row in 0..y.height {
        for col in 0..y.width {
            let c = y.at(col, row) as i32 - 16;
            let d = u.at(col / 2, row / 2) as i32 - 128;
            let e = v.at(col / 2, row / 2) as i32 - 128;

            out.push(clamp_u8((298 * c + 409 * e + 128) >> 8));
            out.push(clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8));
            out.push(clamp_u8((298 * c + 516 * d + 128) >> 8));
        }
    }
    out
}

#[inline]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
