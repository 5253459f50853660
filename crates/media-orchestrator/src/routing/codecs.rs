//! Baseline codec capability set offered by every router.

use crate::engine::{MediaKind, RtcpFeedback, RtpCodecCapability};
use serde_json::Value;
use std::collections::BTreeMap;

fn video_feedback() -> Vec<RtcpFeedback> {
    vec![
        RtcpFeedback::new("nack", ""),
        RtcpFeedback::new("nack", "pli"),
        RtcpFeedback::new("ccm", "fir"),
        RtcpFeedback::new("goog-remb", ""),
        RtcpFeedback::new("transport-cc", ""),
    ]
}

/// Opus stereo, VP8 and H264 constrained baseline.
#[must_use]
pub fn baseline_codecs() -> Vec<RtpCodecCapability> {
    let opus_params = BTreeMap::from([("useinbandfec".to_string(), Value::from(1))]);
    let h264_params = BTreeMap::from([
        ("packetization-mode".to_string(), Value::from(1)),
        ("profile-level-id".to_string(), Value::from("42e01f")),
        ("level-asymmetry-allowed".to_string(), Value::from(1)),
    ]);

    vec![
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            preferred_payload_type: 100,
            clock_rate: 48_000,
            channels: Some(2),
            parameters: opus_params,
            rtcp_feedback: vec![RtcpFeedback::new("transport-cc", "")],
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            preferred_payload_type: 101,
            clock_rate: 90_000,
            channels: None,
            parameters: BTreeMap::new(),
            rtcp_feedback: video_feedback(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/H264".to_string(),
            preferred_payload_type: 102,
            clock_rate: 90_000,
            channels: None,
            parameters: h264_params,
            rtcp_feedback: video_feedback(),
        },
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::engine::RtpCapabilities;

    #[test]
    fn test_baseline_covers_audio_and_video() {
        let caps = RtpCapabilities {
            codecs: baseline_codecs(),
        };
        assert!(caps.supports(MediaKind::Audio));
        assert!(caps.supports(MediaKind::Video));
    }

    #[test]
    fn test_payload_types_are_unique() {
        let codecs = baseline_codecs();
        let mut types: Vec<u8> = codecs.iter().map(|c| c.preferred_payload_type).collect();
        types.sort_unstable();
        types.dedup();
        assert_eq!(types.len(), codecs.len());
    }

    #[test]
    fn test_serializes_in_client_shape() {
        let json = serde_json::to_value(baseline_codecs()).unwrap();
        let opus = &json[0];
        assert_eq!(opus["mimeType"], "audio/opus");
        assert_eq!(opus["clockRate"], 48_000);
        assert_eq!(opus["channels"], 2);
        assert_eq!(opus["parameters"]["useinbandfec"], 1);
        assert!(json[1].get("channels").is_none());
        assert_eq!(json[1]["rtcpFeedback"][1]["type"], "nack");
        assert_eq!(json[1]["rtcpFeedback"][1]["parameter"], "pli");
    }
}
