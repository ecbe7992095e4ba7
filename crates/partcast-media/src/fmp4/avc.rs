//! Annex-B elementary stream handling for H.264/H.265.
//!
//! PES payloads arrive as Annex-B byte streams (start-code delimited
//! NAL units). CMAF samples need 4-byte length prefixes instead, plus
//! the parameter sets lifted out into the sample entry.

use bytes::{BufMut, BytesMut};

use crate::mpegts::VideoCodec;

/// Iterate NAL unit payloads between start codes (3- or 4-byte form).
pub fn nal_units(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }
    let mut units = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let mut end = starts.get(n + 1).map(|&s| s - 3).unwrap_or(data.len());
        // A 4-byte start code leaves one stray zero before the next.
        if end > start && data[end - 1] == 0 {
            end -= 1;
        }
        units.push(&data[start..end]);
    }
    units.into_iter()
}

fn nal_type(codec: VideoCodec, nal: &[u8]) -> u8 {
    match codec {
        VideoCodec::H264 => nal.first().map(|b| b & 0x1F).unwrap_or(0),
        VideoCodec::H265 => nal.first().map(|b| (b >> 1) & 0x3F).unwrap_or(0),
    }
}

fn is_keyframe_nal(codec: VideoCodec, nal_type: u8) -> bool {
    match codec {
        // IDR slice
        VideoCodec::H264 => nal_type == 5,
        // IDR_W_RADL, IDR_N_LP, CRA
        VideoCodec::H265 => (19..=21).contains(&nal_type),
    }
}

fn is_parameter_set(codec: VideoCodec, nal_type: u8) -> bool {
    match codec {
        VideoCodec::H264 => nal_type == 7 || nal_type == 8,
        VideoCodec::H265 => (32..=34).contains(&nal_type),
    }
}

fn is_delimiter(codec: VideoCodec, nal_type: u8) -> bool {
    match codec {
        VideoCodec::H264 => nal_type == 9,
        VideoCodec::H265 => nal_type == 35,
    }
}

/// H.264 sequence/picture parameter sets captured from the stream.
#[derive(Debug, Clone, Default)]
pub struct ParameterSets {
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
}

impl ParameterSets {
    pub fn is_complete(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    /// Video width/height decoded from the SPS would need full
    /// exp-Golomb parsing; the profile/level bytes are enough for the
    /// decoder configuration record, which is all CMAF needs.
    ///
    /// Returns the `avcC` box payload (AVCDecoderConfigurationRecord).
    pub fn avc_decoder_configuration(&self) -> Option<Vec<u8>> {
        let (sps, pps) = (self.sps.as_ref()?, self.pps.as_ref()?);
        if sps.len() < 4 {
            return None;
        }
        let mut rec = BytesMut::with_capacity(11 + sps.len() + pps.len());
        rec.put_u8(1); // configurationVersion
        rec.put_u8(sps[1]); // AVCProfileIndication
        rec.put_u8(sps[2]); // profile_compatibility
        rec.put_u8(sps[3]); // AVCLevelIndication
        rec.put_u8(0xFF); // 4-byte NAL lengths
        rec.put_u8(0xE1); // one SPS
        rec.put_u16(sps.len() as u16);
        rec.put_slice(sps);
        rec.put_u8(1); // one PPS
        rec.put_u16(pps.len() as u16);
        rec.put_slice(pps);
        Some(rec.to_vec())
    }
}

/// A video sample ready for an `mdat`: length-prefixed NAL units.
#[derive(Debug, Clone)]
pub struct VideoSample {
    pub data: Vec<u8>,
    pub keyframe: bool,
}

/// Convert one Annex-B access unit into a CMAF sample, capturing any
/// parameter sets seen along the way. Access-unit delimiters and
/// parameter sets are carried out-of-band and excluded from the
/// sample payload.
pub fn build_video_sample(
    codec: VideoCodec,
    annexb: &[u8],
    params: &mut ParameterSets,
) -> VideoSample {
    let mut data = Vec::with_capacity(annexb.len() + 16);
    let mut keyframe = false;

    for nal in nal_units(annexb) {
        let ty = nal_type(codec, nal);
        if is_keyframe_nal(codec, ty) {
            keyframe = true;
        }
        if is_parameter_set(codec, ty) {
            if codec == VideoCodec::H264 {
                match ty {
                    7 => params.sps.get_or_insert_with(|| nal.to_vec()),
                    _ => params.pps.get_or_insert_with(|| nal.to_vec()),
                };
            }
            continue;
        }
        if is_delimiter(codec, ty) {
            continue;
        }
        data.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        data.extend_from_slice(nal);
    }

    VideoSample { data, keyframe }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1E, 0xAA];
    const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00, 0x10];
    const NON_IDR: &[u8] = &[0x41, 0x9A, 0x02];

    fn annexb(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, unit) in units.iter().enumerate() {
            if i == 0 {
                out.extend_from_slice(&[0, 0, 0, 1]);
            } else {
                out.extend_from_slice(&[0, 0, 1]);
            }
            out.extend_from_slice(unit);
        }
        out
    }

    #[test]
    fn splits_mixed_start_codes() {
        let data = annexb(&[SPS, PPS, IDR]);
        let units: Vec<_> = nal_units(&data).collect();
        assert_eq!(units, vec![SPS, PPS, IDR]);
    }

    #[test]
    fn keyframe_sample_with_parameter_capture() {
        let mut params = ParameterSets::default();
        let data = annexb(&[&[0x09, 0xF0], SPS, PPS, IDR]);
        let sample = build_video_sample(VideoCodec::H264, &data, &mut params);

        assert!(sample.keyframe);
        assert!(params.is_complete());
        // Sample holds only the IDR slice, length-prefixed.
        assert_eq!(sample.data.len(), 4 + IDR.len());
        assert_eq!(&sample.data[..4], &(IDR.len() as u32).to_be_bytes());
        assert_eq!(&sample.data[4..], IDR);
    }

    #[test]
    fn non_idr_is_not_keyframe() {
        let mut params = ParameterSets::default();
        let sample = build_video_sample(VideoCodec::H264, &annexb(&[NON_IDR]), &mut params);
        assert!(!sample.keyframe);
        assert!(!params.is_complete());
    }

    #[test]
    fn first_parameter_sets_win() {
        let mut params = ParameterSets::default();
        build_video_sample(VideoCodec::H264, &annexb(&[SPS, PPS]), &mut params);
        let other_sps: &[u8] = &[0x67, 0x64, 0x00, 0x28];
        build_video_sample(VideoCodec::H264, &annexb(&[other_sps]), &mut params);
        assert_eq!(params.sps.as_deref(), Some(SPS));
    }

    #[test]
    fn avcc_record_layout() {
        let params = ParameterSets {
            sps: Some(SPS.to_vec()),
            pps: Some(PPS.to_vec()),
        };
        let rec = params.avc_decoder_configuration().unwrap();
        assert_eq!(rec[0], 1);
        assert_eq!(rec[1], SPS[1]);
        assert_eq!(rec[3], SPS[3]);
        assert_eq!(rec[5], 0xE1);
        assert_eq!(rec.len(), 11 + SPS.len() + PPS.len());
    }
}
