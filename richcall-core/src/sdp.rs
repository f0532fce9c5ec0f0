//! SDP offer/answer handling.
//!
//! Parses bodies into a session-level part plus ordered media descriptions,
//! selects a codec from an offer and builds answers and offers. Parsing is
//! all-or-nothing: a single malformed line fails the whole body.

use crate::codec::Codec;
use crate::error::{RichcallError, RichcallResult};

/// RTP header extension carrying the sender's camera orientation.
pub const VIDEO_ORIENTATION_URI: &str = "urn:3gpp:video-orientation";

/// `c=` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub net_type: String,
    pub addr_type: String,
    pub address: String,
}

/// `a=` line, with or without a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

/// `a=extmap:<id>[/<direction>] <uri>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionMap {
    pub id: u16,
    pub direction: Option<String>,
    pub uri: String,
}

/// Media stream direction attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendRecv => "sendrecv",
            Self::SendOnly => "sendonly",
            Self::RecvOnly => "recvonly",
            Self::Inactive => "inactive",
        }
    }

    fn from_attribute(name: &str) -> Option<Self> {
        match name {
            "sendrecv" => Some(Self::SendRecv),
            "sendonly" => Some(Self::SendOnly),
            "recvonly" => Some(Self::RecvOnly),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// One `m=` section with the lines that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub media_type: String,
    pub port: u16,
    pub protocol: String,
    pub formats: Vec<String>,
    pub connection: Option<Connection>,
    pub attributes: Vec<Attribute>,
}

/// A fully parsed SDP body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedSdp {
    pub version: Option<u8>,
    pub origin: Option<String>,
    pub session_name: Option<String>,
    pub connection: Option<Connection>,
    pub attributes: Vec<Attribute>,
    pub media: Vec<MediaDescription>,
}

impl ParsedSdp {
    /// All media descriptions of a type, in body order.
    pub fn media_descriptions(&self, media_type: &str) -> Vec<&MediaDescription> {
        self.media
            .iter()
            .filter(|m| m.media_type.eq_ignore_ascii_case(media_type))
            .collect()
    }

    /// First media description of a type.
    pub fn media_description(&self, media_type: &str) -> Option<&MediaDescription> {
        self.media
            .iter()
            .find(|m| m.media_type.eq_ignore_ascii_case(media_type))
    }

    /// Address media should be sent to: media-level `c=` wins over session-level.
    pub fn remote_host<'a>(&'a self, media: &'a MediaDescription) -> Option<&'a str> {
        media
            .connection
            .as_ref()
            .or(self.connection.as_ref())
            .map(|c| c.address.as_str())
    }
}

impl MediaDescription {
    /// First value of a named attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.value.as_deref())
    }

    fn attribute_values(&self, name: &str) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.name == name)
            .filter_map(|a| a.value.as_deref())
            .collect()
    }

    /// Value of a per-payload attribute such as `a=fmtp:<pt> <value>`.
    fn format_attribute(&self, name: &str, payload_type: u8) -> Option<&str> {
        let prefix = payload_type.to_string();
        self.attribute_values(name).into_iter().find_map(|v| {
            let (pt, rest) = v.split_once(' ')?;
            (pt == prefix).then(|| rest.trim())
        })
    }

    pub fn direction(&self) -> Option<MediaDirection> {
        self.attributes
            .iter()
            .find_map(|a| MediaDirection::from_attribute(&a.name))
    }

    pub fn extension_maps(&self) -> Vec<ExtensionMap> {
        self.attribute_values("extmap")
            .into_iter()
            .filter_map(|v| parse_extmap(v).ok())
            .collect()
    }

    pub fn extension_map(&self, uri: &str) -> Option<ExtensionMap> {
        self.extension_maps().into_iter().find(|e| e.uri == uri)
    }

    /// Codecs proposed in this media description, in format order.
    ///
    /// Formats without an rtpmap are kept only for well-known static payload
    /// types; non-numeric formats (e.g. `*` for MSRP) are skipped.
    pub fn codecs(&self) -> Vec<Codec> {
        let frame_rate = self
            .attribute("framerate")
            .and_then(|v| v.trim().parse::<f32>().ok())
            .map(|r| r as u32);

        self.formats
            .iter()
            .filter_map(|f| f.parse::<u8>().ok())
            .filter_map(|pt| {
                let mut codec = match self.format_attribute("rtpmap", pt) {
                    Some(rtpmap) => {
                        let (name, clock_rate) = parse_rtpmap_encoding(rtpmap).ok()?;
                        Codec::new(name, clock_rate, pt)
                    }
                    None => static_codec(pt)?,
                };
                if let Some(fmtp) = self.format_attribute("fmtp", pt) {
                    codec.parameters = fmtp.to_string();
                }
                if let Some((w, h)) = self
                    .format_attribute("framesize", pt)
                    .and_then(|s| s.split_once('-'))
                {
                    if let (Ok(width), Ok(height)) = (w.trim().parse(), h.trim().parse()) {
                        codec = codec.with_frame_size(width, height);
                    }
                }
                codec.frame_rate = frame_rate;
                Some(codec)
            })
            .collect()
    }
}

fn static_codec(payload_type: u8) -> Option<Codec> {
    match payload_type {
        31 => Some(Codec::new("H261", 90000, 31)),
        34 => Some(Codec::new("H263", 90000, 34)),
        _ => None,
    }
}

fn malformed(line_no: usize, reason: impl std::fmt::Display) -> RichcallError {
    RichcallError::MalformedSdp(format!("line {}: {}", line_no, reason))
}

/// Parse an SDP body.
///
/// A leading `v=` line is optional so that media-only fragments can be
/// parsed; when present it must come first and carry version 0.
pub fn parse(body: &str) -> RichcallResult<ParsedSdp> {
    let mut sdp = ParsedSdp::default();
    let mut seen_any = false;

    for (idx, raw) in body.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let mut chars = line.chars();
        let kind = chars.next().ok_or_else(|| malformed(line_no, "empty line"))?;
        if !kind.is_ascii_lowercase() || chars.next() != Some('=') {
            return Err(malformed(line_no, format!("not a type=value line: {:?}", line)));
        }
        let value = &line[2..];

        match kind {
            'v' => {
                if seen_any {
                    return Err(malformed(line_no, "v= must be the first line"));
                }
                let version: u8 = value
                    .trim()
                    .parse()
                    .map_err(|_| malformed(line_no, format!("invalid version {:?}", value)))?;
                if version != 0 {
                    return Err(malformed(line_no, format!("unsupported version {}", version)));
                }
                sdp.version = Some(version);
            }
            'o' if sdp.media.is_empty() => sdp.origin = Some(value.to_string()),
            's' if sdp.media.is_empty() => sdp.session_name = Some(value.to_string()),
            'c' => {
                let connection = parse_connection(value).map_err(|e| malformed(line_no, e))?;
                match sdp.media.last_mut() {
                    Some(media) => media.connection = Some(connection),
                    None => sdp.connection = Some(connection),
                }
            }
            'm' => {
                let media = parse_media_line(value).map_err(|e| malformed(line_no, e))?;
                sdp.media.push(media);
            }
            'a' => {
                let attribute = parse_attribute(value).map_err(|e| malformed(line_no, e))?;
                match sdp.media.last_mut() {
                    Some(media) => media.attributes.push(attribute),
                    None => sdp.attributes.push(attribute),
                }
            }
            'o' | 's' | 'i' | 'u' | 'e' | 'p' | 'b' | 't' | 'r' | 'z' | 'k' => {}
            other => return Err(malformed(line_no, format!("unknown line type {:?}", other))),
        }
        seen_any = true;
    }

    if !seen_any {
        return Err(RichcallError::MalformedSdp("empty body".to_string()));
    }
    Ok(sdp)
}

fn parse_connection(value: &str) -> Result<Connection, String> {
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(net_type), Some(addr_type), Some(address)) => Ok(Connection {
            net_type: net_type.to_string(),
            addr_type: addr_type.to_string(),
            // Multicast TTL / address count suffixes are not needed here.
            address: address.split('/').next().unwrap_or(address).to_string(),
        }),
        _ => Err(format!("invalid connection line {:?}", value)),
    }
}

fn parse_media_line(value: &str) -> Result<MediaDescription, String> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(format!("media line needs type, port, proto and formats: {:?}", value));
    }
    let port_field = parts[1].split('/').next().unwrap_or(parts[1]);
    let port: u16 = port_field
        .parse()
        .map_err(|_| format!("invalid media port {:?}", parts[1]))?;

    Ok(MediaDescription {
        media_type: parts[0].to_string(),
        port,
        protocol: parts[2].to_string(),
        formats: parts[3..].iter().map(|s| s.to_string()).collect(),
        connection: None,
        attributes: Vec::new(),
    })
}

fn parse_attribute(value: &str) -> Result<Attribute, String> {
    let (name, attr_value) = match value.split_once(':') {
        Some((name, v)) => (name.trim(), Some(v.trim().to_string())),
        None => (value.trim(), None),
    };
    if name.is_empty() {
        return Err("attribute without a name".to_string());
    }

    match (name, attr_value.as_deref()) {
        ("rtpmap", Some(v)) => {
            let (pt, encoding) = v
                .split_once(' ')
                .ok_or_else(|| format!("invalid rtpmap {:?}", v))?;
            pt.parse::<u8>()
                .map_err(|_| format!("invalid rtpmap payload type {:?}", pt))?;
            parse_rtpmap_encoding(encoding)?;
        }
        ("extmap", Some(v)) => {
            parse_extmap(v)?;
        }
        ("rtpmap", None) | ("extmap", None) => {
            return Err(format!("{} attribute without a value", name));
        }
        _ => {}
    }

    Ok(Attribute {
        name: name.to_string(),
        value: attr_value,
    })
}

/// `<encoding>/<clock>[/<channels>]` part of an rtpmap.
fn parse_rtpmap_encoding(value: &str) -> Result<(String, u32), String> {
    let encoding = value.split_whitespace().last().unwrap_or(value);
    let mut parts = encoding.split('/');
    let name = parts.next().filter(|n| !n.is_empty());
    let clock = parts.next().and_then(|c| c.parse::<u32>().ok());
    match (name, clock) {
        (Some(name), Some(clock)) => Ok((name.to_string(), clock)),
        _ => Err(format!("invalid rtpmap encoding {:?}", value)),
    }
}

fn parse_extmap(value: &str) -> Result<ExtensionMap, String> {
    let mut parts = value.split_whitespace();
    let id_field = parts
        .next()
        .ok_or_else(|| format!("invalid extmap {:?}", value))?;
    let uri = parts
        .next()
        .ok_or_else(|| format!("extmap without uri {:?}", value))?;
    let (id, direction) = match id_field.split_once('/') {
        Some((id, dir)) => (id, Some(dir.to_string())),
        None => (id_field, None),
    };
    let id: u16 = id
        .parse()
        .map_err(|_| format!("invalid extmap id {:?}", id_field))?;
    Ok(ExtensionMap {
        id,
        direction,
        uri: uri.to_string(),
    })
}

/// Select the codec to use from a remote proposal.
///
/// The remote proposal order is respected: the first proposed codec that
/// the local side supports wins. The remote codec is returned so the
/// offerer's payload type is kept. `None` means the sets are disjoint.
pub fn select_codec(local_supported: &[Codec], remote_proposed: &[Codec]) -> Option<Codec> {
    remote_proposed
        .iter()
        .find(|proposed| local_supported.iter().any(|local| local.matches(proposed)))
        .cloned()
}

/// All codecs proposed across a set of media descriptions, in offer order.
pub fn extract_codecs(medias: &[&MediaDescription]) -> Vec<Codec> {
    medias.iter().flat_map(|m| m.codecs()).collect()
}

fn push_codec_lines(out: &mut String, codec: &Codec) {
    let pt = codec.payload_type;
    out.push_str(&format!("a=rtpmap:{} {}/{}\r\n", pt, codec.name, codec.clock_rate));
    if !codec.parameters.is_empty() {
        out.push_str(&format!("a=fmtp:{} {}\r\n", pt, codec.parameters));
    }
    if let Some(size) = codec.frame_size {
        out.push_str(&format!("a=framesize:{} {}-{}\r\n", pt, size.width, size.height));
    }
}

fn push_extmap(out: &mut String, ext: &ExtensionMap) {
    match &ext.direction {
        Some(dir) => out.push_str(&format!("a=extmap:{}/{} {}\r\n", ext.id, dir, ext.uri)),
        None => out.push_str(&format!("a=extmap:{} {}\r\n", ext.id, ext.uri)),
    }
}

/// Build the media section of an answer for one selected codec.
///
/// Extension maps of the offered media are echoed with their identifiers
/// unchanged.
pub fn build_answer(codec: &Codec, local_port: u16, offered: &MediaDescription) -> String {
    let mut out = format!(
        "m={} {} {} {}\r\n",
        offered.media_type, local_port, offered.protocol, codec.payload_type
    );
    push_codec_lines(&mut out, codec);
    if let Some(rate) = codec.frame_rate {
        out.push_str(&format!("a=framerate:{}\r\n", rate));
    }
    for ext in offered.extension_maps() {
        push_extmap(&mut out, &ext);
    }
    out
}

/// Build an answer media section for a service that does not pick a codec:
/// the offered formats and non-direction attributes are echoed on our port.
pub fn build_passthrough_answer(local_port: u16, offered: &MediaDescription) -> String {
    let mut out = format!(
        "m={} {} {} {}\r\n",
        offered.media_type,
        local_port,
        offered.protocol,
        offered.formats.join(" ")
    );
    for attr in &offered.attributes {
        if MediaDirection::from_attribute(&attr.name).is_some() {
            continue;
        }
        match &attr.value {
            Some(v) => out.push_str(&format!("a={}:{}\r\n", attr.name, v)),
            None => out.push_str(&format!("a={}\r\n", attr.name)),
        }
    }
    out
}

/// Build the media section of an offer listing every local codec in
/// preference order.
pub fn build_offer(
    media_type: &str,
    codecs: &[Codec],
    local_port: u16,
    orientation_extension_id: Option<u16>,
) -> String {
    let formats: Vec<String> = codecs.iter().map(|c| c.payload_type.to_string()).collect();
    let mut out = format!("m={} {} RTP/AVP {}\r\n", media_type, local_port, formats.join(" "));
    for codec in codecs {
        push_codec_lines(&mut out, codec);
    }
    if let Some(rate) = codecs.iter().find_map(|c| c.frame_rate) {
        out.push_str(&format!("a=framerate:{}\r\n", rate));
    }
    if let Some(id) = orientation_extension_id {
        push_extmap(
            &mut out,
            &ExtensionMap {
                id,
                direction: None,
                uri: VIDEO_ORIENTATION_URI.to_string(),
            },
        );
    }
    out
}

/// Build the media section of an MSRP offer for a message-based sharing.
pub fn build_message_offer(local_port: u16, mime_type: &str, file_selector: Option<&str>) -> String {
    let mut out = format!("m=message {} TCP/MSRP *\r\n", local_port);
    out.push_str(&format!("a=accept-types:{}\r\n", mime_type));
    if let Some(selector) = file_selector {
        out.push_str(&format!("a=file-selector:{}\r\n", selector));
    }
    out
}

/// Wrap a media section into a complete SDP body.
pub fn build_session(local_ip: &str, media: &str, direction: MediaDirection) -> String {
    let addr_type = if local_ip.contains(':') { "IP6" } else { "IP4" };
    let version = chrono::Utc::now().timestamp();
    format!(
        "v=0\r\no=- {v} {v} IN {at} {ip}\r\ns=-\r\nc=IN {at} {ip}\r\nt=0 0\r\n{media}a={dir}\r\n",
        v = version,
        at = addr_type,
        ip = local_ip,
        media = media,
        dir = direction.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO_OFFER: &str = "v=0\r\n\
o=- 3600 3600 IN IP4 10.0.0.5\r\n\
s=-\r\n\
c=IN IP4 10.0.0.5\r\n\
t=0 0\r\n\
m=video 40000 RTP/AVP 96 34\r\n\
a=rtpmap:96 H264/90000\r\n\
a=fmtp:96 profile-level-id=42900b\r\n\
a=rtpmap:34 H263/90000\r\n\
a=framesize:34 176-144\r\n\
a=framerate:15\r\n\
a=extmap:7 urn:3gpp:video-orientation\r\n\
a=sendonly\r\n";

    #[test]
    fn parse_offer_with_session_and_media_parts() {
        let sdp = parse(VIDEO_OFFER).unwrap();
        assert_eq!(sdp.version, Some(0));
        assert_eq!(sdp.connection.as_ref().unwrap().address, "10.0.0.5");
        assert_eq!(sdp.media.len(), 1);

        let video = sdp.media_description("video").unwrap();
        assert_eq!(video.port, 40000);
        assert_eq!(video.formats, vec!["96", "34"]);
        assert_eq!(video.direction(), Some(MediaDirection::SendOnly));
        assert_eq!(sdp.remote_host(video), Some("10.0.0.5"));
    }

    #[test]
    fn codecs_follow_offer_order() {
        let sdp = parse(VIDEO_OFFER).unwrap();
        let codecs = extract_codecs(&sdp.media_descriptions("video"));
        assert_eq!(codecs.len(), 2);
        assert_eq!(codecs[0].name, "H264");
        assert_eq!(codecs[0].parameters, "profile-level-id=42900b");
        assert_eq!(codecs[1].name, "H263");
        assert_eq!(codecs[1].frame_size.unwrap().width, 176);
        assert_eq!(codecs[1].frame_rate, Some(15));
    }

    #[test]
    fn media_connection_overrides_session_connection() {
        let body = "v=0\r\nc=IN IP4 10.0.0.5\r\nm=video 5000 RTP/AVP 34\r\nc=IN IP4 192.168.1.9/127\r\n";
        let sdp = parse(body).unwrap();
        let video = sdp.media_description("video").unwrap();
        assert_eq!(sdp.remote_host(video), Some("192.168.1.9"));
    }

    #[test]
    fn malformed_bodies_fail_as_a_whole() {
        assert!(parse("").is_err());
        assert!(parse("v=1\r\n").is_err());
        assert!(parse("v=0\r\nthis is not sdp\r\n").is_err());
        assert!(parse("v=0\r\nm=video abc RTP/AVP 96\r\n").is_err());
        assert!(parse("v=0\r\nm=video 5000 RTP/AVP\r\n").is_err());
        assert!(parse("v=0\r\nm=video 5000 RTP/AVP 96\r\na=rtpmap:96 H264\r\n").is_err());
        assert!(parse("v=0\r\nm=video 5000 RTP/AVP 96\r\na=extmap:x urn:foo\r\n").is_err());
        assert!(parse("s=-\r\nv=0\r\n").is_err());
    }

    #[test]
    fn select_codec_respects_remote_order() {
        let remote = vec![Codec::new("H264", 90000, 96), Codec::new("H263", 90000, 34)];
        let local = vec![Codec::new("H263", 90000, 34), Codec::new("H261", 90000, 31)];
        let selected = select_codec(&local, &remote).unwrap();
        assert_eq!(selected.name, "H263");

        // Local preference order does not change the outcome.
        let local = vec![Codec::new("H263", 90000, 34), Codec::new("H264", 90000, 96)];
        assert_eq!(select_codec(&local, &remote).unwrap().name, "H264");
    }

    #[test]
    fn select_codec_disjoint_sets() {
        let remote = vec![Codec::new("VP8", 90000, 100)];
        let local = vec![Codec::h263()];
        assert!(select_codec(&local, &remote).is_none());
        assert!(select_codec(&local, &[]).is_none());
    }

    #[test]
    fn answer_echoes_extension_id() {
        let sdp = parse(VIDEO_OFFER).unwrap();
        let offered = sdp.media_description("video").unwrap();
        let codec = select_codec(&[Codec::h263()], &offered.codecs()).unwrap();

        let answer = build_answer(&codec, 50000, offered);
        let reparsed = parse(&answer).unwrap();
        let media = reparsed.media_description("video").unwrap();
        assert_eq!(media.port, 50000);
        assert_eq!(media.formats, vec!["34"]);
        assert_eq!(media.extension_map(VIDEO_ORIENTATION_URI).unwrap().id, 7);
    }

    #[test]
    fn full_session_reparses() {
        let media = build_offer("video", &[Codec::h264(), Codec::h263()], 6000, Some(4));
        let body = build_session("192.168.0.10", &media, MediaDirection::SendOnly);

        let sdp = parse(&body).unwrap();
        assert_eq!(sdp.connection.as_ref().unwrap().address, "192.168.0.10");
        let video = sdp.media_description("video").unwrap();
        assert_eq!(video.codecs().len(), 2);
        assert_eq!(video.direction(), Some(MediaDirection::SendOnly));
        assert_eq!(video.extension_map(VIDEO_ORIENTATION_URI).unwrap().id, 4);
    }

    #[test]
    fn passthrough_answer_keeps_formats() {
        let body = "v=0\r\nc=IN IP4 10.0.0.5\r\nm=message 7000 TCP/MSRP *\r\na=accept-types:image/jpeg\r\na=sendonly\r\n";
        let sdp = parse(body).unwrap();
        let offered = sdp.media_description("message").unwrap();

        let answer = build_passthrough_answer(8000, offered);
        let media = parse(&answer).unwrap().media.remove(0);
        assert_eq!(media.port, 8000);
        assert_eq!(media.formats, vec!["*"]);
        assert_eq!(media.attribute("accept-types"), Some("image/jpeg"));
        assert!(media.direction().is_none());
        assert!(media.codecs().is_empty());
    }

    #[test]
    fn message_offer_carries_file_selector() {
        let media = build_message_offer(9000, "image/jpeg", Some("name:\"photo.jpg\" type:image/jpeg size:2048"));
        let body = build_session("10.0.0.1", &media, MediaDirection::SendOnly);

        let sdp = parse(&body).unwrap();
        let message = sdp.media_description("message").unwrap();
        assert_eq!(message.protocol, "TCP/MSRP");
        assert_eq!(message.attribute("accept-types"), Some("image/jpeg"));
        assert!(message.attribute("file-selector").unwrap().contains("size:2048"));
    }
}
