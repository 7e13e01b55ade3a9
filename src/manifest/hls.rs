//! HLS (M3U8) master-playlist emission.

use crate::model::AdaptiveStream;

fn group_id(stream: &AdaptiveStream) -> String {
    stream.itag.to_string()
}

fn emit_stream(out: &mut String, stream: &AdaptiveStream) {
    let audio_only = stream.is_audio_only();
    let kind = if audio_only { "AUDIO" } else { "VIDEO" };
    let group = group_id(stream);

    out.push_str(&format!(
        "#EXT-X-STREAM-INF:TYPE={kind},GROUP-ID=\"{group}\",NAME=\"{}\",AUTOSELECT={},DEFAULT={}\n",
        if audio_only { "audio_only" } else { "default" },
        if audio_only { "NO" } else { "YES" },
        if audio_only { "NO" } else { "YES" },
    ));

    let mut second = format!("#EXT-X-STREAM-INF:BANDWIDTH={}", stream.bitrate);
    if stream.width > 0 && stream.height > 0 {
        second.push_str(&format!(",RESOLUTION={}x{}", stream.width, stream.height));
    }
    if let Some(codecs) = stream.codecs_string() {
        second.push_str(&format!(",CODECS=\"{codecs}\""));
    }
    second.push_str(&format!(",{kind}=\"{group}\""));
    if stream.fps > 0 {
        second.push_str(&format!(",FRAME-RATE={}", stream.fps));
    }
    out.push_str(&second);
    out.push('\n');
    out.push_str(&stream.uri);
    out.push('\n');
}

/// Emit an `#EXTM3U` master playlist for `streams`, sorted ascending by
/// bitrate, or `None` if `streams` is empty.
pub fn emit(streams: &[&AdaptiveStream]) -> Option<String> {
    if streams.is_empty() {
        return None;
    }
    let mut sorted = streams.to_vec();
    sorted.sort_by_key(|s| s.bitrate);

    let mut out = String::from("#EXTM3U\n");
    for stream in sorted {
        emit_stream(&mut out, stream);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ManifestType;

    #[test]
    fn empty_is_none() {
        assert!(emit(&[]).is_none());
    }

    #[test]
    fn sorted_ascending_by_bitrate() {
        let mut a = AdaptiveStream::new("a", ManifestType::Hls);
        a.itag = 1;
        a.bitrate = 500_000;
        a.width = 640;
        a.height = 360;
        a.fps = 30;
        a.video_codec = Some("avc1.4d401e".to_string());
        a.audio_codec = Some("mp4a.40.2".to_string());

        let mut b = AdaptiveStream::new("b", ManifestType::Hls);
        b.itag = 2;
        b.bitrate = 200_000;

        let out = emit(&[&a, &b]).unwrap();
        let pos_b = out.find("\nb\n").unwrap();
        let pos_a = out.find("\na\n").unwrap();
        assert!(pos_b < pos_a);
    }

    #[test]
    fn hls_parsing_scenario() {
        // Reproduces the HLS variant-stream fixture's parsed values.
        let mut s = AdaptiveStream::new("https://cdn/1.m3u8", ManifestType::Hls);
        s.itag = 1;
        s.bitrate = 640_000;
        s.width = 640;
        s.height = 360;
        s.fps = 30;
        s.video_codec = Some("avc1.4d401e".to_string());
        s.audio_codec = Some("mp4a.40.2".to_string());
        let out = emit(&[&s]).unwrap();
        assert!(out.starts_with("#EXTM3U\n"));
        assert!(out.contains("BANDWIDTH=640000"));
        assert!(out.contains("RESOLUTION=640x360"));
        assert!(out.contains("FRAME-RATE=30"));
        assert!(out.contains("CODECS=\"avc1.4d401e,mp4a.40.2\""));
    }
}
