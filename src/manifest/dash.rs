//! DASH (MPD/XML) emission.

use crate::model::{AdaptiveStream, MimeType};
use crate::util::pixel_aspect_ratio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Mp4,
    Webm,
}

fn classify(mime_type: MimeType) -> Option<(ContentKind, Container)> {
    match mime_type {
        MimeType::VideoMp4 => Some((ContentKind::Video, Container::Mp4)),
        MimeType::AudioMp4 => Some((ContentKind::Audio, Container::Mp4)),
        MimeType::VideoWebm => Some((ContentKind::Video, Container::Webm)),
        MimeType::AudioWebm => Some((ContentKind::Audio, Container::Webm)),
        MimeType::Unknown => None,
    }
}

/// Prefix-match a codec string against the known DASH codec families;
/// `None` means the stream is discarded from manifest generation.
fn known_codec(codec: &str) -> bool {
    const VIDEO_PREFIXES: &[&str] = &["avc", "vp9", "hev", "av01"];
    const AUDIO_PREFIXES: &[&str] = &["mp4a", "opus"];
    VIDEO_PREFIXES.iter().any(|p| codec.starts_with(p))
        || AUDIO_PREFIXES.iter().any(|p| codec.starts_with(p))
}

struct Group<'a> {
    kind: ContentKind,
    container: Container,
    members: Vec<&'a AdaptiveStream>,
}

fn eligible_codec(stream: &AdaptiveStream) -> bool {
    match (stream.video_codec.as_deref(), stream.audio_codec.as_deref()) {
        (Some(v), _) => known_codec(v),
        (None, Some(a)) => known_codec(a),
        (None, None) => false,
    }
}

fn group_streams<'a>(streams: &[&'a AdaptiveStream]) -> Vec<Group<'a>> {
    let mut groups: Vec<Group<'a>> = Vec::new();
    for &stream in streams {
        let Some((kind, container)) = classify(stream.mime_type) else {
            continue;
        };
        if !eligible_codec(stream) {
            continue;
        }
        match groups
            .iter_mut()
            .find(|g| g.kind == kind && g.container == container)
        {
            Some(g) => g.members.push(stream),
            None => groups.push(Group {
                kind,
                container,
                members: vec![stream],
            }),
        }
    }
    groups
}

fn mime_str(kind: ContentKind, container: Container) -> &'static str {
    match (kind, container) {
        (ContentKind::Video, Container::Mp4) => "video/mp4",
        (ContentKind::Audio, Container::Mp4) => "audio/mp4",
        (ContentKind::Video, Container::Webm) => "video/webm",
        (ContentKind::Audio, Container::Webm) => "audio/webm",
    }
}

struct Writer {
    out: String,
    pretty: bool,
    indent: usize,
}

impl Writer {
    fn line(&mut self, depth: usize, text: &str) {
        if self.pretty {
            for _ in 0..depth * self.indent {
                self.out.push(' ');
            }
        }
        self.out.push_str(text);
        if self.pretty {
            self.out.push('\n');
        }
    }
}

/// Query-string-aware XML escaping for `<BaseURL>`: the base (scheme
/// through path) is written verbatim, then each query pair is reappended
/// joined by a literal `&amp;`, matching the upstream
/// `add_escaped_xml_uri` convention.
fn escape_base_url(uri: &str) -> String {
    let Ok(parsed) = url::Url::parse(uri) else {
        return uri.replace('&', "&amp;");
    };
    let mut base = parsed.clone();
    base.set_query(None);
    let mut out = base.to_string();
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if !pairs.is_empty() {
        out.push('?');
        let joined = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&amp;");
        out.push_str(&joined);
    }
    out
}

fn emit_representation(w: &mut Writer, depth: usize, stream: &AdaptiveStream, kind: ContentKind) {
    let mut attrs = format!(" id=\"{}\"", stream.itag);
    if let Some(codecs) = stream.codecs_string() {
        attrs.push_str(&format!(" codecs=\"{codecs}\""));
    }
    attrs.push_str(&format!(" bandwidth=\"{}\"", stream.bitrate));
    if kind == ContentKind::Video {
        if stream.width > 0 {
            attrs.push_str(&format!(" width=\"{}\"", stream.width));
        }
        if stream.height > 0 {
            attrs.push_str(&format!(" height=\"{}\"", stream.height));
        }
        if stream.fps > 0 {
            attrs.push_str(&format!(" frameRate=\"{}\"", stream.fps));
        }
        if stream.width > 0 && stream.height > 0 {
            attrs.push_str(" sar=\"1:1\"");
        }
    }
    w.line(depth, &format!("<Representation{attrs}>"));
    w.line(
        depth + 1,
        &format!("<BaseURL>{}</BaseURL>", escape_base_url(&stream.uri)),
    );

    let mut seg_attrs = String::new();
    if let Some(index_range) = stream.index_range {
        seg_attrs.push_str(&format!(
            " indexRange=\"{}\" indexRangeExact=\"true\"",
            index_range.as_dash_range()
        ));
    }
    w.line(depth + 1, &format!("<SegmentBase{seg_attrs}>"));
    if let Some(init_range) = stream.init_range {
        w.line(
            depth + 2,
            &format!("<Initialization range=\"{}\"/>", init_range.as_dash_range()),
        );
    }
    w.line(depth + 1, "</SegmentBase>");
    w.line(depth, "</Representation>");
}

fn emit_adaptation_set(w: &mut Writer, depth: usize, group: &Group) {
    let mime = mime_str(group.kind, group.container);
    let content_type = match group.kind {
        ContentKind::Video => "video",
        ContentKind::Audio => "audio",
    };

    let mut members = group.members.clone();
    members.sort_by_key(|s| s.bitrate);

    let mut attrs = format!(
        " contentType=\"{content_type}\" mimeType=\"{mime}\" subsegmentAlignment=\"true\" subsegmentStartsWithSAP=\"1\""
    );
    if group.kind == ContentKind::Video {
        let max_width = members.iter().map(|s| s.width).max().unwrap_or(0);
        let max_height = members.iter().map(|s| s.height).max().unwrap_or(0);
        let max_fps = members.iter().map(|s| s.fps).max().unwrap_or(0);
        if max_width > 0 {
            attrs.push_str(&format!(" maxWidth=\"{max_width}\""));
        }
        if max_height > 0 {
            attrs.push_str(&format!(" maxHeight=\"{max_height}\""));
        }
        attrs.push_str(&format!(
            " par=\"{}\"",
            pixel_aspect_ratio(max_width, max_height)
        ));
        if max_fps > 0 {
            attrs.push_str(&format!(" maxFrameRate=\"{max_fps}\""));
        }
    }

    w.line(depth, &format!("<AdaptationSet{attrs}>"));
    for stream in &members {
        emit_representation(w, depth + 1, stream, group.kind);
    }
    w.line(depth, "</AdaptationSet>");
}

/// Emit a full DASH MPD for `streams`, or `None` if no stream survives
/// grouping (the manifest generator treats this as "no data").
pub fn emit(streams: &[&AdaptiveStream], duration_seconds: u32, pretty: bool, indent: usize) -> Option<String> {
    let groups = group_streams(streams);
    if groups.is_empty() {
        return None;
    }

    let mut w = Writer {
        out: String::new(),
        pretty,
        indent,
    };

    w.line(0, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    let min_buffer = duration_seconds.min(2);
    w.line(
        0,
        &format!(
            "<MPD xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xmlns=\"urn:mpeg:dash:schema:mpd:2011\" xsi:schemaLocation=\"urn:mpeg:dash:schema:mpd:2011 DASH-MPD.xsd\" type=\"static\" mediaPresentationDuration=\"PT{duration_seconds}S\" minBufferTime=\"PT{min_buffer}S\" profiles=\"urn:mpeg:dash:profile:isoff-on-demand:2011\">"
        ),
    );
    w.line(1, "<Period>");
    for group in &groups {
        emit_adaptation_set(&mut w, 2, group);
    }
    w.line(1, "</Period>");
    w.line(0, "</MPD>");

    Some(w.out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ManifestType;

    #[test]
    fn unknown_codec_is_discarded() {
        let mut s = AdaptiveStream::new("u", ManifestType::Dash);
        s.mime_type = MimeType::VideoMp4;
        s.video_codec = Some("made-up".to_string());
        assert!(emit(&[&s], 10, false, 2).is_none());
    }

    #[test]
    fn par_falls_back_when_dims_unknown() {
        let mut s = AdaptiveStream::new("u", ManifestType::Dash);
        s.mime_type = MimeType::AudioMp4;
        s.audio_codec = Some("mp4a.40.2".to_string());
        let xml = emit(&[&s], 10, false, 2).unwrap();
        assert!(!xml.contains("par=")); // audio adaptation sets carry no par attribute
    }
}
