//! Media negotiation: turns SIP codec descriptors into room media formats.
//!
//! Pure functions, no state. Three jobs:
//! - map an SDP audio codec name to the room's audio format
//! - derive the room's video format, including the H.264 profile from `profile-level-id`
//! - pick the room resolution closest to a peer's legacy CIF/QCIF size class

use serde::Serialize;
use std::fmt;

use crate::types::Resolution;

/// Audio format understood by the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_num: Option<u32>,
}

/// Video format understood by the room.
///
/// Resolution and framerate stay zero; the room decides them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoFormat {
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    pub resolution: Resolution,
    pub framerate: u32,
}

/// Map an SDP audio codec name to a room audio format. Unknown codecs yield `None`.
pub fn audio_format(codec: &str) -> Option<AudioFormat> {
    let codec = codec.to_ascii_lowercase();
    match codec.as_str() {
        "opus" => Some(AudioFormat {
            codec,
            sample_rate: Some(48_000),
            channel_num: Some(2),
        }),
        "pcmu" | "pcma" => Some(AudioFormat {
            codec,
            sample_rate: None,
            channel_num: None,
        }),
        _ => None,
    }
}

// ─── H.264 profiles ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum H264Profile {
    Baseline,
    ConstrainedBaseline,
    Main,
    Extended,
    High,
    High10,
    High10Intra,
    High422,
    High422Intra,
    High444,
    High444Intra,
    Cavlc444Intra,
}

impl H264Profile {
    /// Short label used in room formats.
    pub fn label(self) -> &'static str {
        match self {
            Self::Baseline => "B",
            Self::ConstrainedBaseline => "CB",
            Self::Main => "M",
            Self::Extended => "E",
            Self::High => "H",
            Self::High10 => "H10",
            Self::High10Intra => "H10I",
            Self::High422 => "H42",
            Self::High422Intra => "H42I",
            Self::High444 => "H44",
            Self::High444Intra => "H44I",
            Self::Cavlc444Intra => "C44I",
        }
    }
}

impl fmt::Display for H264Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const CONSTRAINT_SET0: u8 = 1 << 7;
const CONSTRAINT_SET1: u8 = 1 << 6;
const CONSTRAINT_SET2: u8 = 1 << 5;
const INTRA_ONLY: u8 = 16;

/// Classify a `profile-level-id` (profile_idc, profile-iop, level as hex pairs).
///
/// Profile indications are matched case-insensitively. Returns `None` when the
/// indication or its constraint byte has no entry in the table.
pub fn h264_profile(profile_level_id: &str) -> Option<H264Profile> {
    let idc = profile_level_id.get(0..2)?.to_ascii_uppercase();
    let iop = u8::from_str_radix(profile_level_id.get(2..4)?, 16).ok()?;
    let set = |bit: u8| iop & bit != 0;

    match idc.as_str() {
        "42" if set(CONSTRAINT_SET1) => Some(H264Profile::ConstrainedBaseline),
        "42" => Some(H264Profile::Baseline),
        "4D" if set(CONSTRAINT_SET0) => Some(H264Profile::ConstrainedBaseline),
        "4D" if !set(CONSTRAINT_SET2) => Some(H264Profile::Main),
        "58" if set(CONSTRAINT_SET0) && set(CONSTRAINT_SET1) => {
            Some(H264Profile::ConstrainedBaseline)
        }
        "58" if set(CONSTRAINT_SET0) => Some(H264Profile::Baseline),
        "58" if !set(CONSTRAINT_SET1) => Some(H264Profile::Extended),
        "64" if iop == 0 => Some(H264Profile::High),
        "6E" if iop == 0 => Some(H264Profile::High10),
        "6E" if iop == INTRA_ONLY => Some(H264Profile::High10Intra),
        "7A" if iop == 0 => Some(H264Profile::High422),
        "7A" if iop == INTRA_ONLY => Some(H264Profile::High422Intra),
        "F4" if iop == 0 => Some(H264Profile::High444),
        "F4" if iop == INTRA_ONLY => Some(H264Profile::High444Intra),
        "2C" if iop == INTRA_ONLY => Some(H264Profile::Cavlc444Intra),
        _ => None,
    }
}

fn profile_from_fmtp(fmtp: &str) -> Option<H264Profile> {
    const KEY: &str = "profile-level-id=";
    let start = fmtp.find(KEY)? + KEY.len();
    let value: String = fmtp[start..].chars().take(6).collect();
    h264_profile(&value)
}

/// Derive the room video format for an SDP video codec and its fmtp.
///
/// H.264 always carries a profile, falling back to constrained baseline.
pub fn video_format(codec: &str, fmtp: &str) -> VideoFormat {
    let codec = codec.to_ascii_lowercase();
    let profile = (codec == "h264").then(|| {
        profile_from_fmtp(fmtp)
            .unwrap_or(H264Profile::ConstrainedBaseline)
            .label()
            .to_string()
    });

    VideoFormat {
        codec,
        profile,
        resolution: Resolution::new(0, 0),
        framerate: 0,
    }
}

// ─── Resolution ───────────────────────────────────────────────────────────

pub const CIF: Resolution = Resolution::new(352, 288);
pub const QCIF: Resolution = Resolution::new(176, 144);

/// Legacy size class advertised in fmtp. A bare `CIF` token wins over `QCIF`
/// when both are present.
fn size_class(fmtp: &str) -> Option<Resolution> {
    let mut qcif = false;
    for (pos, _) in fmtp.match_indices("CIF") {
        if pos > 0 && fmtp.as_bytes()[pos - 1] == b'Q' {
            qcif = true;
        } else {
            return Some(CIF);
        }
    }
    qcif.then_some(QCIF)
}

/// Pick the available resolution closest to the peer's CIF/QCIF class.
///
/// Distance is the magnitude `|(w - tw) + (h - th)|`, not the signed sum the
/// controller's own agent minimises: the signed sum always favours the
/// smallest candidate, so a CIF peer offered `[640x480, 352x288, 176x144]`
/// would get QCIF. Ties keep the earliest entry. `None` when fmtp names no
/// size class or nothing is available.
pub fn nearest_resolution(fmtp: &str, available: &[Resolution]) -> Option<Resolution> {
    let target = size_class(fmtp)?;
    let mut best: Option<(i64, Resolution)> = None;

    for candidate in available {
        let diff = (i64::from(candidate.width) - i64::from(target.width)
            + i64::from(candidate.height)
            - i64::from(target.height))
        .abs();
        if best.is_none_or(|(best_diff, _)| diff < best_diff) {
            best = Some((diff, *candidate));
        }
    }

    best.map(|(_, resolution)| resolution)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_codecs() {
        let opus = audio_format("OPUS").unwrap();
        assert_eq!(opus.codec, "opus");
        assert_eq!(opus.sample_rate, Some(48_000));
        assert_eq!(opus.channel_num, Some(2));

        let pcmu = audio_format("PCMU").unwrap();
        assert_eq!(pcmu.codec, "pcmu");
        assert_eq!(pcmu.sample_rate, None);

        assert!(audio_format("G722").is_none());
    }

    #[test]
    fn opus_serializes_in_room_layout() {
        let json = serde_json::to_value(audio_format("opus").unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "codec": "opus", "sampleRate": 48000, "channelNum": 2 })
        );
        let json = serde_json::to_value(audio_format("pcma").unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({ "codec": "pcma" }));
    }

    #[test]
    fn h264_profile_table() {
        assert_eq!(h264_profile("42001f"), Some(H264Profile::Baseline));
        assert_eq!(h264_profile("42e01f"), Some(H264Profile::ConstrainedBaseline));
        assert_eq!(h264_profile("4d001f"), Some(H264Profile::Main));
        assert_eq!(h264_profile("4D801f"), Some(H264Profile::ConstrainedBaseline));
        assert_eq!(h264_profile("4d201f"), None);
        assert_eq!(h264_profile("58c01f"), Some(H264Profile::ConstrainedBaseline));
        assert_eq!(h264_profile("58801f"), Some(H264Profile::Baseline));
        assert_eq!(h264_profile("58001f"), Some(H264Profile::Extended));
        assert_eq!(h264_profile("640028"), Some(H264Profile::High));
        assert_eq!(h264_profile("640c28"), None);
        assert_eq!(h264_profile("6e0010"), Some(H264Profile::High10Intra));
        assert_eq!(h264_profile("6e0010").unwrap().label(), "H10I");
        assert_eq!(h264_profile("7a0028"), Some(H264Profile::High422));
        assert_eq!(h264_profile("f41028"), Some(H264Profile::High444Intra));
        assert_eq!(h264_profile("2c1028"), Some(H264Profile::Cavlc444Intra));
        assert_eq!(h264_profile("ff0010"), None);
        assert_eq!(h264_profile("4"), None);
    }

    #[test]
    fn video_format_for_h264() {
        let fmt = video_format("H264", "packetization-mode=1;profile-level-id=640028");
        assert_eq!(fmt.codec, "h264");
        assert_eq!(fmt.profile.as_deref(), Some("H"));
        assert_eq!(fmt.resolution, Resolution::new(0, 0));
        assert_eq!(fmt.framerate, 0);

        let fallback = video_format("H264", "packetization-mode=1");
        assert_eq!(fallback.profile.as_deref(), Some("CB"));
    }

    #[test]
    fn video_format_without_profile() {
        let fmt = video_format("VP8", "");
        assert_eq!(fmt.codec, "vp8");
        assert!(fmt.profile.is_none());
        let json = serde_json::to_value(&fmt).unwrap();
        assert!(json.get("profile").is_none());
    }

    #[test]
    fn nearest_resolution_for_cif() {
        let available = [
            Resolution::new(640, 480),
            Resolution::new(352, 288),
            Resolution::new(176, 144),
        ];
        assert_eq!(
            nearest_resolution("CIF=1", &available),
            Some(Resolution::new(352, 288))
        );
    }

    #[test]
    fn nearest_resolution_for_qcif() {
        let available = [Resolution::new(640, 480), Resolution::new(320, 240)];
        assert_eq!(
            nearest_resolution("QCIF=2", &available),
            Some(Resolution::new(320, 240))
        );
    }

    #[test]
    fn cif_wins_when_both_classes_listed() {
        let available = [Resolution::new(176, 144), Resolution::new(352, 288)];
        assert_eq!(
            nearest_resolution("QCIF=1;CIF=1", &available),
            Some(Resolution::new(352, 288))
        );
    }

    #[test]
    fn ties_keep_first_entry() {
        let available = [Resolution::new(362, 278), Resolution::new(342, 298)];
        assert_eq!(
            nearest_resolution("CIF=1", &available),
            Some(Resolution::new(362, 278))
        );
    }

    #[test]
    fn no_size_class_or_nothing_available() {
        assert_eq!(nearest_resolution("", &[Resolution::new(640, 480)]), None);
        assert_eq!(nearest_resolution("CIF=1", &[]), None);
    }
}
