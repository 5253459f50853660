//! Canned identifiers, server records and signalling payloads.

use common::types::{ConsultationId, ParticipantId, ServerId};
use media_orchestrator::store::{AvailableServer, TransportRecord};
use media_orchestrator::engine::{RouterId, TransportId};
use media_orchestrator::session::TransportRole;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Server id used by the default harness.
pub const TEST_SERVER_ID: &str = "mo-test-a";

#[must_use]
pub fn consultation(id: i64) -> ConsultationId {
    ConsultationId(id)
}

#[must_use]
pub fn participant(id: i64) -> ParticipantId {
    ParticipantId(id)
}

/// Active server record.
#[must_use]
pub fn server(id: &str) -> AvailableServer {
    AvailableServer {
        server_id: ServerId::from(id),
        address: "10.0.0.10".to_string(),
        max_routers: 500,
        is_active: true,
    }
}

/// Inactive server record.
#[must_use]
pub fn inactive_server(id: &str) -> AvailableServer {
    AvailableServer {
        is_active: false,
        ..server(id)
    }
}

/// Client DTLS parameters for `connect_transport`.
#[must_use]
pub fn dtls_parameters() -> Value {
    json!({
        "role": "client",
        "fingerprints": [
            { "algorithm": "sha-256", "value": "3A:1F:6C:9E:22:0B:7D:41:AA:5C:E8:90:13:4F:B2:6D:C7:08:91:2E:5A:3B:F4:60:1D:8C:72:E9:0A:B5:46:CF" }
        ]
    })
}

/// RTP capabilities of a browser that supports opus and VP8.
#[must_use]
pub fn client_rtp_capabilities() -> Value {
    json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
        ],
        "headerExtensions": []
    })
}

/// RTP capabilities of a client without video support.
#[must_use]
pub fn audio_only_rtp_capabilities() -> Value {
    json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 }
        ],
        "headerExtensions": []
    })
}

/// Producer RTP parameters for an opus stream.
#[must_use]
pub fn audio_rtp_parameters() -> Value {
    json!({
        "mid": "0",
        "codecs": [
            { "mimeType": "audio/opus", "payloadType": 100, "clockRate": 48000, "channels": 2 }
        ],
        "encodings": [{ "ssrc": 11_111_111 }]
    })
}

/// Producer RTP parameters for a VP8 stream.
#[must_use]
pub fn video_rtp_parameters() -> Value {
    json!({
        "mid": "1",
        "codecs": [
            { "mimeType": "video/VP8", "payloadType": 101, "clockRate": 90000 }
        ],
        "encodings": [{ "ssrc": 22_222_222 }]
    })
}

/// A durable transport record with no live counterpart, as left behind by
/// a crashed process.
#[must_use]
pub fn orphan_transport_record(id: &str, created_at: DateTime<Utc>) -> TransportRecord {
    TransportRecord {
        transport_id: TransportId::from(id),
        consultation_id: ConsultationId(9_999),
        router_id: RouterId::from("router-from-previous-run"),
        participant_id: None,
        role: TransportRole::Consumer,
        server_id: ServerId::from(TEST_SERVER_ID),
        created_at,
    }
}
