//! ADTS framing for AAC audio.
//!
//! AAC arrives from the demuxer as a run of ADTS frames inside each
//! PES unit. Each frame carries 1024 PCM samples; the 7- or 9-byte
//! header is stripped and its fields feed the `esds` decoder
//! configuration in the init segment.

use bytes::{BufMut, BytesMut};

const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Samples per AAC frame.
pub const SAMPLES_PER_FRAME: u32 = 1024;

/// Decoder configuration extracted from an ADTS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// MPEG-4 audio object type (ADTS profile + 1).
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
}

impl AudioConfig {
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES
            .get(self.sampling_frequency_index as usize)
            .copied()
            .unwrap_or(48000)
    }

    pub fn channels(&self) -> u16 {
        self.channel_configuration as u16
    }

    /// Frame duration in 90 kHz ticks.
    pub fn frame_duration(&self) -> u64 {
        (SAMPLES_PER_FRAME as u64 * 90_000) / self.sample_rate() as u64
    }

    /// Two-byte AudioSpecificConfig.
    pub fn audio_specific_config(&self) -> [u8; 2] {
        [
            (self.object_type << 3) | (self.sampling_frequency_index >> 1),
            ((self.sampling_frequency_index & 0x01) << 7) | (self.channel_configuration << 3),
        ]
    }

    /// Full `esds` box payload (version/flags + ES descriptor chain).
    pub fn esds(&self) -> Vec<u8> {
        let asc = self.audio_specific_config();
        let mut buf = BytesMut::with_capacity(39);
        buf.put_u32(0); // version/flags

        // ES_Descriptor
        buf.put_u8(0x03);
        buf.put_u8(23 + asc.len() as u8);
        buf.put_u16(1); // ES_ID
        buf.put_u8(0); // flags

        // DecoderConfigDescriptor
        buf.put_u8(0x04);
        buf.put_u8(15 + asc.len() as u8);
        buf.put_u8(0x40); // objectTypeIndication: MPEG-4 audio
        buf.put_u8(0x15); // streamType: audio, upStream 0
        buf.put_slice(&[0x00, 0x00, 0x00]); // bufferSizeDB
        buf.put_u32(0); // maxBitrate
        buf.put_u32(0); // avgBitrate

        // DecoderSpecificInfo
        buf.put_u8(0x05);
        buf.put_u8(asc.len() as u8);
        buf.put_slice(&asc);

        // SLConfigDescriptor
        buf.put_u8(0x06);
        buf.put_u8(0x01);
        buf.put_u8(0x02);

        buf.to_vec()
    }
}

/// One raw AAC frame split out of an ADTS run.
#[derive(Debug, Clone)]
pub struct AacFrame<'a> {
    pub config: AudioConfig,
    pub payload: &'a [u8],
}

/// Split a PES payload into its ADTS frames. Bytes that do not line up
/// on a syncword are skipped; a truncated trailing frame is dropped.
pub fn split_frames(data: &[u8]) -> Vec<AacFrame<'_>> {
    let mut frames = Vec::new();
    let mut i = 0;
    while i + 7 <= data.len() {
        if data[i] != 0xFF || data[i + 1] & 0xF0 != 0xF0 {
            i += 1;
            continue;
        }
        let protection_absent = data[i + 1] & 0x01 != 0;
        let header_len = if protection_absent { 7 } else { 9 };
        let frame_length = ((data[i + 3] as usize & 0x03) << 11)
            | ((data[i + 4] as usize) << 3)
            | ((data[i + 5] as usize) >> 5);
        if frame_length < header_len || i + frame_length > data.len() {
            break;
        }
        let config = AudioConfig {
            object_type: ((data[i + 2] >> 6) & 0x03) + 1,
            sampling_frequency_index: (data[i + 2] >> 2) & 0x0F,
            channel_configuration: ((data[i + 2] & 0x01) << 2) | (data[i + 3] >> 6),
        };
        frames.push(AacFrame {
            config,
            payload: &data[i + header_len..i + frame_length],
        });
        i += frame_length;
    }
    frames
}
