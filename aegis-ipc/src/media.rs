use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identity of a track, derived from title and artist.
/// Used as the artwork cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackKey(String);

impl TrackKey {
    pub fn new(title: &str, artist: &str) -> Self {
        let title = title.trim().to_lowercase();
        let artist = artist.trim().to_lowercase();
        Self(format!("{}\u{1f}{}", title, artist))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Decoded artwork bytes. Cheap to clone; serialized as base64.
#[derive(Clone, PartialEq, Eq)]
pub struct Artwork(Arc<[u8]>);

impl Artwork {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }

    pub fn from_base64(encoded: &str) -> Option<Self> {
        STANDARD.decode(encoded.trim()).ok().map(Self::new)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Artwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Artwork({} bytes)", self.0.len())
    }
}

impl Serialize for Artwork {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Artwork {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Artwork::from_base64(&encoded)
            .ok_or_else(|| serde::de::Error::custom("artwork is not valid base64"))
    }
}

/// Normalized now-playing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub playing: bool,
    pub bundle_identifier: Option<String>,
    pub artwork: Option<Artwork>,
    pub track: TrackKey,
}

impl MediaInfo {
    /// Same displayed track and playback state, ignoring artwork bytes.
    /// Fields compare as published; `track` only keys the artwork cache.
    pub fn same_state(&self, other: &MediaInfo) -> bool {
        self.title == other.title
            && self.artist == other.artist
            && self.album == other.album
            && self.playing == other.playing
            && self.bundle_identifier == other.bundle_identifier
            && self.artwork.is_some() == other.artwork.is_some()
    }
}
