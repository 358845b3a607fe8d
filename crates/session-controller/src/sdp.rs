//! Text-level SDP transforms.
//!
//! Remote and local descriptions are rewritten before they reach the engine:
//! preferred codecs are moved to the front of the relevant media line, and a
//! configured starting bitrate is injected into the matching codec's format
//! line. Both transforms preserve every unrelated line verbatim and keep the
//! `\r\n` line terminator convention; on any mismatch (no media line, codec
//! not present, malformed media line) the input is returned unchanged.

use regex::Regex;
use tracing::{debug, warn};

/// Format parameter carrying the initial video bitrate, in kbit/s.
pub const VIDEO_CODEC_PARAM_START_BITRATE: &str = "x-google-start-bitrate";

/// Format parameter carrying the maximum average audio bitrate, in bit/s.
pub const AUDIO_CODEC_PARAM_BITRATE: &str = "maxaveragebitrate";

pub use crate::config::{AUDIO_CODEC_ISAC, AUDIO_CODEC_OPUS};

/// Which media section a transform targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    fn description_prefix(self) -> &'static str {
        match self {
            MediaKind::Audio => "m=audio ",
            MediaKind::Video => "m=video ",
        }
    }
}

/// Split SDP text into lines the way the rest of this module expects:
/// `\r\n`-separated with trailing empty segments dropped, so that a final
/// terminator neither produces a phantom line nor gets duplicated on rejoin.
fn split_lines(sdp: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = sdp.split("\r\n").collect();
    while lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// Rejoin lines with `\r\n`, including a trailing terminator.
fn join_lines(lines: &[String]) -> String {
    let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 2).sum());
    for line in lines {
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}

/// Pattern matching `a=rtpmap:<payload type> <codec>/<clock rate>[/...]`.
fn rtpmap_pattern(codec: &str) -> Option<Regex> {
    match Regex::new(&format!(
        "^a=rtpmap:(\\d+) {}(/\\d+)+[\r]?$",
        regex::escape(codec)
    )) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(target: "session.sdp", codec = codec, error = %e, "Bad rtpmap pattern");
            None
        }
    }
}

/// Inject a starting bitrate for `codec` into `sdp`.
///
/// If the codec already has an `a=fmtp` parameter line the bitrate parameter
/// is appended to it; otherwise a new `a=fmtp` line is inserted immediately
/// after the codec's rtpmap line. Audio uses `maxaveragebitrate` in bit/s,
/// video uses `x-google-start-bitrate` in kbit/s.
#[must_use]
pub fn set_start_bitrate(sdp: &str, codec: &str, kind: MediaKind, bitrate_kbps: u32) -> String {
    let lines = split_lines(sdp);

    let Some(codec_re) = rtpmap_pattern(codec) else {
        return sdp.to_string();
    };

    let mut rtpmap_line_index = None;
    let mut codec_rtpmap = None;
    for (i, line) in lines.iter().enumerate() {
        if let Some(captures) = codec_re.captures(line) {
            codec_rtpmap = captures.get(1).map(|m| m.as_str().to_string());
            rtpmap_line_index = Some(i);
            break;
        }
    }
    let (Some(payload_type), Some(rtpmap_line_index)) = (codec_rtpmap, rtpmap_line_index) else {
        warn!(target: "session.sdp", codec = codec, "No rtpmap for codec");
        return sdp.to_string();
    };

    let (param, value) = match kind {
        MediaKind::Audio => (AUDIO_CODEC_PARAM_BITRATE, u64::from(bitrate_kbps) * 1000),
        MediaKind::Video => (VIDEO_CODEC_PARAM_START_BITRATE, u64::from(bitrate_kbps)),
    };

    // An existing format-parameter line for this payload type gets the
    // bitrate appended instead of a duplicate line.
    let fmtp_re = match Regex::new(&format!("^a=fmtp:{payload_type} \\w+=\\d+.*[\r]?$")) {
        Ok(re) => re,
        Err(e) => {
            warn!(target: "session.sdp", error = %e, "Bad fmtp pattern");
            return sdp.to_string();
        }
    };

    let mut updated_existing = false;
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 1);
    for line in &lines {
        if !updated_existing && fmtp_re.is_match(line) {
            let amended = format!("{line}; {param}={value}");
            debug!(target: "session.sdp", line = %amended, "Updated SDP format line");
            out.push(amended);
            updated_existing = true;
        } else {
            out.push((*line).to_string());
        }
    }

    if !updated_existing {
        let inserted = format!("a=fmtp:{payload_type} {param}={value}");
        debug!(target: "session.sdp", line = %inserted, "Added SDP format line");
        out.insert(rtpmap_line_index + 1, inserted);
    }

    join_lines(&out)
}

/// Move all payload types mapped to `codec` to the front of the matching
/// media description line, making it the preferred codec for that section.
#[must_use]
pub fn prefer_codec(sdp: &str, codec: &str, kind: MediaKind) -> String {
    let lines = split_lines(sdp);

    let Some(m_line_index) = lines
        .iter()
        .position(|l| l.starts_with(kind.description_prefix()))
    else {
        warn!(target: "session.sdp", codec = codec, "No media description line, cannot prefer codec");
        return sdp.to_string();
    };

    let Some(codec_re) = rtpmap_pattern(codec) else {
        return sdp.to_string();
    };

    // All payload types mapped to this codec name, in rtpmap order.
    let codec_payload_types: Vec<&str> = lines
        .iter()
        .filter_map(|line| codec_re.captures(line))
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if codec_payload_types.is_empty() {
        warn!(target: "session.sdp", codec = codec, "No payload types for codec");
        return sdp.to_string();
    }

    let Some(m_line) = lines.get(m_line_index) else {
        return sdp.to_string();
    };
    let Some(new_m_line) = move_payload_types_to_front(&codec_payload_types, m_line) else {
        return sdp.to_string();
    };
    debug!(
        target: "session.sdp",
        from = %m_line,
        to = %new_m_line,
        "Changed media description"
    );

    let out: Vec<String> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            if i == m_line_index {
                new_m_line.clone()
            } else {
                (*line).to_string()
            }
        })
        .collect();
    join_lines(&out)
}

/// Rebuild `m=<media> <port> <proto> <fmt> ...` with the preferred payload
/// types first. Returns `None` when the line lacks the three header fields.
fn move_payload_types_to_front(preferred: &[&str], m_line: &str) -> Option<String> {
    let parts: Vec<&str> = m_line.split(' ').collect();
    if parts.len() <= 3 {
        warn!(target: "session.sdp", line = %m_line, "Wrong SDP media description format");
        return None;
    }
    let header = parts.iter().take(3);
    let unpreferred = parts
        .iter()
        .skip(3)
        .filter(|pt| !preferred.contains(*pt));

    let rebuilt: Vec<&str> = header
        .chain(preferred.iter())
        .chain(unpreferred)
        .copied()
        .collect();
    Some(rebuilt.join(" "))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn audio_sdp() -> String {
        [
            "v=0",
            "o=- 1 2 IN IP4 127.0.0.1",
            "s=-",
            "m=audio 9 UDP/TLS/RTP/SAVPF 111 103 9 0 8",
            "a=rtpmap:111 opus/48000/2",
            "a=fmtp:111 minptime=10; useinbandfec=1",
            "a=rtpmap:103 ISAC/16000",
            "a=rtpmap:9 G722/8000",
        ]
        .join("\r\n")
            + "\r\n"
    }

    fn video_sdp() -> String {
        [
            "v=0",
            "m=video 9 UDP/TLS/RTP/SAVPF 96 97 98",
            "a=rtpmap:96 VP8/90000",
            "a=rtpmap:97 VP9/90000",
            "a=rtpmap:98 H264/90000",
        ]
        .join("\r\n")
            + "\r\n"
    }

    #[test]
    fn test_bitrate_appends_to_existing_fmtp_line() {
        let rewritten = set_start_bitrate(&audio_sdp(), "opus", MediaKind::Audio, 32);

        assert!(rewritten.contains("a=fmtp:111 minptime=10; useinbandfec=1; maxaveragebitrate=32000\r\n"));
        // Exactly one fmtp line for the codec; nothing duplicated.
        assert_eq!(rewritten.matches("a=fmtp:111").count(), 1);
    }

    #[test]
    fn test_bitrate_inserts_fmtp_after_rtpmap() {
        let rewritten = set_start_bitrate(&video_sdp(), "VP8", MediaKind::Video, 500);

        let lines: Vec<&str> = rewritten.split("\r\n").collect();
        let rtpmap = lines.iter().position(|l| *l == "a=rtpmap:96 VP8/90000").unwrap();
        assert_eq!(lines[rtpmap + 1], "a=fmtp:96 x-google-start-bitrate=500");
    }

    #[test]
    fn test_bitrate_preserves_unrelated_lines_and_terminators() {
        let original = audio_sdp();
        let rewritten = set_start_bitrate(&original, "opus", MediaKind::Audio, 32);

        let untouched: Vec<&str> = original
            .split("\r\n")
            .filter(|l| !l.starts_with("a=fmtp:111"))
            .collect();
        for line in untouched {
            assert!(rewritten.contains(line), "line dropped: {line:?}");
        }
        assert!(rewritten.ends_with("\r\n"));
        let without_terminators = rewritten.replace("\r\n", "");
        assert!(!without_terminators.contains('\n'));
        assert!(!without_terminators.contains('\r'));
    }

    #[test]
    fn test_bitrate_unknown_codec_leaves_sdp_untouched() {
        let original = audio_sdp();
        assert_eq!(
            set_start_bitrate(&original, "AV1", MediaKind::Video, 500),
            original
        );
    }

    #[test]
    fn test_audio_bitrate_is_in_bits_per_second() {
        let rewritten = set_start_bitrate(&audio_sdp(), "opus", MediaKind::Audio, 48);
        assert!(rewritten.contains("maxaveragebitrate=48000"));
    }

    #[test]
    fn test_prefer_codec_reorders_media_line() {
        let rewritten = prefer_codec(&video_sdp(), "H264", MediaKind::Video);
        assert!(rewritten.contains("m=video 9 UDP/TLS/RTP/SAVPF 98 96 97\r\n"));
    }

    #[test]
    fn test_prefer_codec_keeps_rtpmap_lines() {
        let rewritten = prefer_codec(&video_sdp(), "VP9", MediaKind::Video);
        assert!(rewritten.contains("a=rtpmap:96 VP8/90000\r\n"));
        assert!(rewritten.contains("a=rtpmap:97 VP9/90000\r\n"));
        assert!(rewritten.contains("a=rtpmap:98 H264/90000\r\n"));
    }

    #[test]
    fn test_prefer_codec_audio_section() {
        let rewritten = prefer_codec(&audio_sdp(), "ISAC", MediaKind::Audio);
        assert!(rewritten.contains("m=audio 9 UDP/TLS/RTP/SAVPF 103 111 9 0 8\r\n"));
    }

    #[test]
    fn test_prefer_codec_absent_codec_unchanged() {
        let original = video_sdp();
        assert_eq!(prefer_codec(&original, "AV1", MediaKind::Video), original);
    }

    #[test]
    fn test_prefer_codec_no_media_line_unchanged() {
        let original = "v=0\r\ns=-\r\n";
        assert_eq!(prefer_codec(original, "VP8", MediaKind::Video), original);
    }

    #[test]
    fn test_prefer_codec_malformed_media_line_unchanged() {
        let original = "m=video 9\r\na=rtpmap:96 VP8/90000\r\n";
        assert_eq!(prefer_codec(original, "VP8", MediaKind::Video), original);
    }

    #[test]
    fn test_codec_name_must_match_whole_token() {
        // "VP8" must not match an "AVP8something" mapping.
        let sdp = "m=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 NOTVP8/90000\r\n";
        assert_eq!(prefer_codec(sdp, "VP8", MediaKind::Video), sdp);
    }

    #[test]
    fn test_missing_trailing_terminator_is_normalized() {
        let sdp = "m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\na=rtpmap:97 VP9/90000";
        let rewritten = prefer_codec(sdp, "VP9", MediaKind::Video);
        assert_eq!(rewritten, "m=video 9 UDP/TLS/RTP/SAVPF 97 96\r\na=rtpmap:97 VP9/90000\r\n");
    }
}
