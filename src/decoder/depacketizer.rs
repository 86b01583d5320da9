use bytes::{BufMut, Bytes, BytesMut};
use log::debug;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

const NAL_IDR: u8 = 5;
const NAL_STAP_A: u8 = 24;
const NAL_FU_A: u8 = 28;

/// One complete Annex B access unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub data: Bytes,
    /// RTP timestamp shared by every packet of the unit (90 kHz)
    pub rtp_timestamp: u32,
    pub keyframe: bool,
}

/// Reassembles H.264 NAL units from RTP packets (RFC 6184)
/// into complete Annex B access units.
///
/// Units damaged by packet loss are discarded rather than handed to the
/// decoder, and nothing is emitted before the first IDR.
pub struct H264Depacketizer {
    buffer: BytesMut,
    seen_idr: bool,
    in_fragment: bool,
    last_sequence: Option<u16>,
    timestamp: Option<u32>,
    /// A packet of the unit being assembled went missing
    damaged: bool,
}

impl Default for H264Depacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            seen_idr: false,
            in_fragment: false,
            last_sequence: None,
            timestamp: None,
            damaged: false,
        }
    }

    /// Feed one RTP packet.
    /// Returns the access unit its marker bit completes, if any.
    pub fn push(
        &mut self,
        sequence: u16,
        timestamp: u32,
        marker: bool,
        payload: &[u8],
    ) -> Option<AccessUnit> {
        if let Some(last) = self.last_sequence
            && sequence != last.wrapping_add(1)
        {
            debug!(
                "Depacketizer: sequence jump {} -> {}, dropping current unit",
                last, sequence
            );
            self.damaged = true;
        }
        self.last_sequence = Some(sequence);

        // marker of the previous unit was lost
        if self.timestamp.is_some_and(|ts| ts != timestamp) && !self.buffer.is_empty() {
            debug!("Depacketizer: unterminated unit at ts {:?} discarded", self.timestamp);
            self.discard();
        }
        self.timestamp = Some(timestamp);

        self.push_payload(payload);

        if marker {
            self.in_fragment = false;
            self.finish(timestamp)
        } else {
            None
        }
    }

    fn push_payload(&mut self, payload: &[u8]) {
        let Some(&header) = payload.first() else {
            return;
        };

        match header & 0x1F {
            1..=23 => self.push_nal(payload),
            NAL_STAP_A => {
                let mut offset = 1;
                while offset + 2 <= payload.len() {
                    let len = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
                    offset += 2;
                    if offset + len > payload.len() {
                        self.damaged = true;
                        break;
                    }
                    self.push_nal(&payload[offset..offset + len]);
                    offset += len;
                }
            }
            NAL_FU_A => {
                let Some(&fu_header) = payload.get(1) else {
                    return;
                };
                let start = fu_header & 0x80 != 0;
                let end = fu_header & 0x40 != 0;

                if start {
                    if self.in_fragment {
                        self.damaged = true;
                    }
                    self.in_fragment = true;
                    self.buffer.put_slice(&START_CODE);
                    self.buffer.put_u8((header & 0xE0) | (fu_header & 0x1F));
                } else if !self.in_fragment {
                    // continuation of a fragment whose start we never saw
                    self.damaged = true;
                    return;
                }

                self.buffer.put_slice(&payload[2..]);
                if end {
                    self.in_fragment = false;
                }
            }
            other => debug!("Depacketizer: ignoring NAL type {}", other),
        }
    }

    fn push_nal(&mut self, nal: &[u8]) {
        self.buffer.put_slice(&START_CODE);
        self.buffer.put_slice(nal);
    }

    fn discard(&mut self) {
        self.buffer.clear();
        self.in_fragment = false;
        self.damaged = false;
    }

    fn finish(&mut self, rtp_timestamp: u32) -> Option<AccessUnit> {
        if self.buffer.is_empty() {
            self.damaged = false;
            return None;
        }
        if self.damaged {
            self.discard();
            return None;
        }

        let data = self.buffer.split().freeze();
        let keyframe = contains_nal_type(&data, NAL_IDR);
        if !self.seen_idr {
            if !keyframe {
                return None;
            }
            self.seen_idr = true;
        }

        Some(AccessUnit {
            data,
            rtp_timestamp,
            keyframe,
        })
    }
}

/// Scan Annex B data for a NAL unit with the given type.
fn contains_nal_type(data: &[u8], target_type: u8) -> bool {
    data.windows(5)
        .any(|w| w[..4] == START_CODE && w[4] & 0x1F == target_type)
}
