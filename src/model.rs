//! Common data model shared by every extractor: `Stream`, `AdaptiveStream`,
//! `CaptionStream`, and the `MediaInfo` accumulator the engine builds.

use std::collections::HashMap;

use crate::heartbeat::Heartbeat;
use crate::proxy::Proxy;

/// Container/codec envelope for a [`Stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MimeType {
    #[default]
    Unknown,
    VideoMp4,
    AudioMp4,
    VideoWebm,
    AudioWebm,
}

/// Which manifest family an [`AdaptiveStream`] was sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManifestType {
    #[default]
    Unknown,
    Dash,
    Hls,
}

bitflags::bitflags! {
    /// Derived codec classification, computed by prefix match in
    /// [`Stream::codec_flags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CodecFlags: u32 {
        const UNKNOWN_VIDEO = 1 << 0;
        const AVC           = 1 << 1;
        const HEVC          = 1 << 2;
        const VP9           = 1 << 3;
        const AV1           = 1 << 4;
        const UNKNOWN_AUDIO = 1 << 10;
        const MP4A          = 1 << 11;
        const OPUS          = 1 << 12;
    }
}

fn video_flag(codec: &str) -> Option<CodecFlags> {
    if codec.starts_with("avc") {
        Some(CodecFlags::AVC)
    } else if codec.starts_with("vp9") {
        Some(CodecFlags::VP9)
    } else if codec.starts_with("hev") {
        Some(CodecFlags::HEVC)
    } else if codec.starts_with("av01") {
        Some(CodecFlags::AV1)
    } else {
        None
    }
}

fn audio_flag(codec: &str) -> Option<CodecFlags> {
    if codec.starts_with("mp4a") {
        Some(CodecFlags::MP4A)
    } else if codec.starts_with("opus") {
        Some(CodecFlags::OPUS)
    } else {
        None
    }
}

/// A half-open byte range `[start, end)`. Present on an [`AdaptiveStream`]
/// only when `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    /// Render as the `S-E` form used in DASH `indexRange`/`range` attributes
    /// and in HTTP `Range` headers.
    pub fn as_dash_range(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }
}

/// One playable URL: a progressive file or a single adaptive-set
/// representation.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    pub uri: String,
    /// Stable identifier assigned by the extractor. `0` means "unknown",
    /// except for a deliberate singleton stream (see crate-level invariant).
    pub itag: u32,
    pub mime_type: MimeType,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
}

impl Stream {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    /// Bitset derived from `video_codec`/`audio_codec` by prefix match.
    pub fn codec_flags(&self) -> CodecFlags {
        let mut flags = CodecFlags::empty();
        if let Some(v) = self.video_codec.as_deref().filter(|s| !s.is_empty()) {
            flags |= video_flag(v).unwrap_or(CodecFlags::UNKNOWN_VIDEO);
        }
        if let Some(a) = self.audio_codec.as_deref().filter(|s| !s.is_empty()) {
            flags |= audio_flag(a).unwrap_or(CodecFlags::UNKNOWN_AUDIO);
        }
        flags
    }

    /// Joins both codec strings with a comma, or returns whichever single
    /// one is set, or `None` if neither is.
    pub fn codecs_string(&self) -> Option<String> {
        match (self.video_codec.as_deref(), self.audio_codec.as_deref()) {
            (Some(v), Some(a)) => Some(format!("{v},{a}")),
            (Some(v), None) => Some(v.to_string()),
            (None, Some(a)) => Some(a.to_string()),
            (None, None) => None,
        }
    }

    /// `true` for a stream with no video characteristics whatsoever: used by
    /// the HLS emitter to decide `TYPE=AUDIO` group membership.
    pub fn is_audio_only(&self) -> bool {
        self.width == 0 && self.height == 0 && self.fps == 0 && self.video_codec.is_none()
    }
}

/// A [`Stream`] referenced by a DASH or HLS manifest: carries a media
/// segment range and an init range instead of being a single playable file.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveStream {
    pub stream: Stream,
    pub manifest_type: ManifestType,
    pub init_range: Option<ByteRange>,
    pub index_range: Option<ByteRange>,
}

impl std::ops::Deref for AdaptiveStream {
    type Target = Stream;
    fn deref(&self) -> &Stream {
        &self.stream
    }
}

impl std::ops::DerefMut for AdaptiveStream {
    fn deref_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }
}

impl AdaptiveStream {
    pub fn new(uri: impl Into<String>, manifest_type: ManifestType) -> Self {
        Self {
            stream: Stream::new(uri),
            manifest_type,
            ..Default::default()
        }
    }
}

/// A [`Stream`] carrying subtitle/caption text rather than audio/video.
#[derive(Debug, Clone, Default)]
pub struct CaptionStream {
    pub stream: Stream,
    /// BCP-47-ish language tag, e.g. `"en"`, `"pt-BR"`.
    pub lang_code: String,
}

impl std::ops::Deref for CaptionStream {
    type Target = Stream;
    fn deref(&self) -> &Stream {
        &self.stream
    }
}

/// Header names a `MediaInfo.request_headers` map must never carry: they are
/// hop-by-hop or response-computed and make no sense for a caller to replay.
pub const HOP_BY_HOP_HEADERS: [&str; 5] = [
    "Accept-Encoding",
    "Connection",
    "Content-Length",
    "Content-Type",
    "Host",
];

/// The extraction result: a uniform description of one piece of media,
/// built incrementally by an extractor over the course of one [`crate::engine::Client`]
/// run and handed to the caller on success.
#[derive(Debug, Default)]
pub struct MediaInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub duration_seconds: u32,
    pub streams: Vec<Stream>,
    pub adaptive_streams: Vec<AdaptiveStream>,
    pub captions: Vec<CaptionStream>,
    /// start-time-milliseconds -> chapter name.
    pub chapters: HashMap<u64, String>,
    /// Headers the caller MUST reuse for any subsequent request to a stream
    /// URI. Never contains a [`HOP_BY_HOP_HEADERS`] entry.
    pub request_headers: HashMap<String, String>,
    pub heartbeat: Option<Heartbeat>,
    pub proxy: Option<Proxy>,
}

impl MediaInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crate-level invariant checked by the engine before returning success:
    /// `!streams.is_empty() || !adaptive_streams.is_empty()`.
    pub fn has_streams(&self) -> bool {
        !self.streams.is_empty() || !self.adaptive_streams.is_empty()
    }

    /// Insert a request header, rejecting hop-by-hop names. Returns `false`
    /// (and leaves the map untouched) if `name` is blocklisted.
    pub fn insert_request_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        if HOP_BY_HOP_HEADERS
            .iter()
            .any(|blocked| blocked.eq_ignore_ascii_case(&name))
        {
            return false;
        }
        self.request_headers.insert(name, value.into());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_flags_prefix_match() {
        let mut s = Stream::new("u");
        s.video_codec = Some("avc1.640028".to_string());
        s.audio_codec = Some("mp4a.40.2".to_string());
        assert_eq!(s.codec_flags(), CodecFlags::AVC | CodecFlags::MP4A);
    }

    #[test]
    fn codec_flags_unknown() {
        let mut s = Stream::new("u");
        s.video_codec = Some("weird-codec".to_string());
        assert_eq!(s.codec_flags(), CodecFlags::UNKNOWN_VIDEO);
    }

    #[test]
    fn codecs_string_variants() {
        let mut s = Stream::new("u");
        assert_eq!(s.codecs_string(), None);
        s.video_codec = Some("avc1".to_string());
        assert_eq!(s.codecs_string().as_deref(), Some("avc1"));
        s.audio_codec = Some("mp4a".to_string());
        assert_eq!(s.codecs_string().as_deref(), Some("avc1,mp4a"));
    }

    #[test]
    fn byte_range_requires_positive_span() {
        assert!(ByteRange::new(10, 5).is_none());
        assert!(ByteRange::new(5, 5).is_none());
        assert_eq!(
            ByteRange::new(5, 10),
            Some(ByteRange { start: 5, end: 10 })
        );
    }

    #[test]
    fn insert_request_header_blocks_hop_by_hop() {
        let mut info = MediaInfo::new();
        assert!(!info.insert_request_header("Host", "example.com"));
        assert!(info.insert_request_header("Authorization", "Bearer x"));
        assert_eq!(info.request_headers.len(), 1);
    }

    #[test]
    fn has_streams_invariant() {
        let mut info = MediaInfo::new();
        assert!(!info.has_streams());
        info.streams.push(Stream::new("u"));
        assert!(info.has_streams());
    }
}
