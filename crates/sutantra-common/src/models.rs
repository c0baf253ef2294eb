//! Data models for the Sutantra node protocol.
//!
//! These types are carried inside protocol payloads. They are snapshots of
//! what the node reported and are never merged incrementally.

use serde::{Deserialize, Serialize};

// ── Client Role ─────────────────────────────────────────────────────

/// The role a client declares at handshake. The node has the final say.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    Streamer,
    Viewer,
}

impl std::fmt::Display for ClientRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientRole::Streamer => write!(f, "streamer"),
            ClientRole::Viewer => write!(f, "viewer"),
        }
    }
}

impl std::str::FromStr for ClientRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "streamer" => Ok(ClientRole::Streamer),
            "viewer" => Ok(ClientRole::Viewer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

// ── Stream Quality ──────────────────────────────────────────────────

/// Encoding parameters requested when creating a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamQuality {
    /// "VP8", "VP9" or "H264".
    pub video_codec: String,
    /// "Opus" or "AAC".
    pub audio_codec: String,
    pub max_bitrate_kbps: u32,
    pub target_fps: u32,
    /// "WIDTHxHEIGHT", e.g. "1280x720".
    pub resolution: String,
    pub adaptive_bitrate: bool,
}

impl Default for StreamQuality {
    fn default() -> Self {
        Self {
            video_codec: "VP8".into(),
            audio_codec: "Opus".into(),
            max_bitrate_kbps: 2500,
            target_fps: 30,
            resolution: "1280x720".into(),
            adaptive_bitrate: true,
        }
    }
}

/// Quality as it appears in a stream listing: either the full settings
/// or a short label such as "720p".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QualityInfo {
    Settings(StreamQuality),
    Label(String),
}

// ── Stream Descriptor ───────────────────────────────────────────────

/// One discoverable stream, as listed by the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub stream_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub viewers: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityInfo>,
}

// ── Node Metadata ───────────────────────────────────────────────────

/// Remote node metadata reported in the handshake response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: Option<String>,
    pub node_type: Option<String>,
    pub web_port: Option<u16>,
    pub message: Option<String>,
    /// Only reported by nodes that take part in the chain.
    pub peer_count: Option<u64>,
    pub block_height: Option<u64>,
}

// ── Remote Stats ────────────────────────────────────────────────────

/// Counters pushed by the node in `stream-stats`. Every present field
/// replaces the locally held value outright.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteStats {
    #[serde(alias = "viewerCount", skip_serializing_if = "Option::is_none")]
    pub viewer_count: Option<u32>,
    /// Mbps.
    #[serde(alias = "uploadSpeed", skip_serializing_if = "Option::is_none")]
    pub upload_speed: Option<f64>,
    /// Milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<f64>,
    /// Percent.
    #[serde(alias = "packetLoss", skip_serializing_if = "Option::is_none")]
    pub packet_loss: Option<f64>,
    /// Milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_text() {
        for role in [ClientRole::Streamer, ClientRole::Viewer] {
            let parsed: ClientRole = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert_eq!("Viewer".parse::<ClientRole>().unwrap(), ClientRole::Viewer);
        assert!("relay".parse::<ClientRole>().is_err());
    }

    #[test]
    fn descriptor_accepts_label_or_settings_quality() {
        let label: StreamDescriptor = serde_json::from_value(serde_json::json!({
            "stream_id": "s1", "title": "Live", "creator": "c1", "viewers": 3, "quality": "720p"
        }))
        .unwrap();
        assert_eq!(label.quality, Some(QualityInfo::Label("720p".into())));

        let full: StreamDescriptor = serde_json::from_value(serde_json::json!({
            "stream_id": "s2",
            "quality": serde_json::to_value(StreamQuality::default()).unwrap()
        }))
        .unwrap();
        assert_eq!(full.viewers, 0);
        assert_eq!(
            full.quality,
            Some(QualityInfo::Settings(StreamQuality::default()))
        );
    }

    #[test]
    fn remote_stats_accepts_browser_field_names() {
        let stats: RemoteStats =
            serde_json::from_str(r#"{"viewerCount": 7, "packetLoss": 0.5}"#).unwrap();
        assert_eq!(stats.viewer_count, Some(7));
        assert_eq!(stats.packet_loss, Some(0.5));
        assert_eq!(stats.latency, None);
    }
}
