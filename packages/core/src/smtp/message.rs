//! Best-effort RFC 5322 / MIME decoding of a DATA payload.
//!
//! Parsing never rejects a message: anything that does not look like a
//! header block is kept verbatim as the body, and undecodable transfer
//! encodings fall back to the raw bytes.

use std::collections::BTreeMap;

use encoding_rs::{Encoding, UTF_8};

pub const DEFAULT_SUBJECT: &str = "No Subject";

const MAX_MULTIPART_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub subject: String,
    pub from: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

type HeaderList = Vec<(String, String)>;

pub fn parse_message(raw: &[u8]) -> ParsedMessage {
    let (header_bytes, body_bytes) = split_header_body(raw);
    let Some(headers) = parse_headers(header_bytes) else {
        return ParsedMessage {
            subject: DEFAULT_SUBJECT.to_string(),
            from: None,
            headers: BTreeMap::new(),
            body: String::from_utf8_lossy(raw).trim().to_string(),
        };
    };

    let subject = header(&headers, "subject")
        .map(decode_header_value)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
    let from = header(&headers, "from")
        .map(decode_header_value)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    // Repeated headers: the last occurrence wins.
    let header_map: BTreeMap<String, String> = headers
        .iter()
        .map(|(name, value)| (name.clone(), decode_header_value(value)))
        .collect();

    ParsedMessage {
        subject,
        from,
        headers: header_map,
        body: extract_body(&headers, body_bytes).trim().to_string(),
    }
}

fn extract_body(headers: &[(String, String)], body: &[u8]) -> String {
    let content_type = ContentType::parse(header(headers, "content-type"));
    if !content_type.is_multipart() {
        return decode_part_text(headers, body);
    }

    let mut plain = Vec::new();
    let mut html = Vec::new();
    collect_text(headers, body, 0, &mut plain, &mut html);

    if !plain.is_empty() {
        plain.join("\n")
    } else if !html.is_empty() {
        html.join("\n")
    } else {
        String::from_utf8_lossy(body).into_owned()
    }
}

fn collect_text(
    headers: &[(String, String)],
    body: &[u8],
    depth: usize,
    plain: &mut Vec<String>,
    html: &mut Vec<String>,
) {
    if is_attachment(headers) {
        return;
    }
    let content_type = ContentType::parse(header(headers, "content-type"));

    if content_type.is_multipart() {
        if depth >= MAX_MULTIPART_DEPTH {
            return;
        }
        let Some(boundary) = content_type.param("boundary") else {
            return;
        };
        for part in split_multipart(body, boundary) {
            let (part_headers, part_body) = split_header_body(part);
            match parse_headers(part_headers) {
                Some(part_headers) => {
                    collect_text(&part_headers, part_body, depth + 1, plain, html)
                }
                None => collect_text(&[], part, depth + 1, plain, html),
            }
        }
        return;
    }

    match content_type.mime.as_str() {
        "text/plain" => plain.push(decode_part_text(headers, body)),
        "text/html" => html.push(decode_part_text(headers, body)),
        _ => {}
    }
}

fn is_attachment(headers: &[(String, String)]) -> bool {
    header(headers, "content-disposition")
        .map(|value| ContentType::parse(Some(value)).mime == "attachment")
        .unwrap_or(false)
}

fn decode_part_text(headers: &[(String, String)], body: &[u8]) -> String {
    let encoding = header(headers, "content-transfer-encoding")
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();
    let bytes = match encoding.as_str() {
        "base64" => decode_base64_lenient(body),
        "quoted-printable" => decode_quoted_printable(body),
        _ => body.to_vec(),
    };
    let content_type = ContentType::parse(header(headers, "content-type"));
    decode_charset(&bytes, content_type.param("charset"))
}

// ---- Header block ----

/// Split at the first empty line. Input without one is all headers.
fn split_header_body(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(rest) = raw.strip_prefix(b"\r\n") {
        return (&[], rest);
    }
    if let Some(rest) = raw.strip_prefix(b"\n") {
        return (&[], rest);
    }
    let crlf = find(raw, b"\r\n\r\n").map(|i| (i, i + 4));
    let lf = find(raw, b"\n\n").map(|i| (i, i + 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((end, body_start)) => (&raw[..end], &raw[body_start..]),
        None => (raw, &[]),
    }
}

/// Unfold and split header lines. `None` when the block is not
/// header-shaped.
fn parse_headers(block: &[u8]) -> Option<HeaderList> {
    let text = String::from_utf8_lossy(block);
    let mut headers: HeaderList = Vec::new();

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            let (_, value) = headers.last_mut()?;
            value.push_str(line);
            continue;
        }
        let (name, value) = line.split_once(':')?;
        if name.is_empty() || !name.bytes().all(|b| (33..=126).contains(&b)) {
            return None;
        }
        headers.push((name.to_string(), value.trim_start().to_string()));
    }

    for (_, value) in headers.iter_mut() {
        let trimmed = value.trim_end().len();
        value.truncate(trimmed);
    }
    Some(headers)
}

fn header<'h>(headers: &'h [(String, String)], name: &str) -> Option<&'h str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Decode RFC 2047 encoded words. Whitespace between two adjacent encoded
/// words is dropped.
pub fn decode_header_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut after_encoded_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        match parse_encoded_word(candidate) {
            Some((decoded, consumed)) => {
                if !(after_encoded_word && before.trim().is_empty()) {
                    out.push_str(before);
                }
                out.push_str(&decoded);
                rest = &candidate[consumed..];
                after_encoded_word = true;
            }
            None => {
                out.push_str(before);
                out.push_str("=?");
                rest = &candidate[2..];
                after_encoded_word = false;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `=?charset?B|Q?text?=`; returns the decoded text and bytes consumed.
fn parse_encoded_word(word: &str) -> Option<(String, usize)> {
    let inner = word.strip_prefix("=?")?;
    let (charset, after_charset) = inner.split_once('?')?;
    let (encoding, after_encoding) = after_charset.split_once('?')?;
    let end = after_encoding.find("?=")?;
    let text = &after_encoding[..end];

    if charset.is_empty() || charset.contains(char::is_whitespace) || text.contains(' ') {
        return None;
    }
    let bytes = match encoding {
        "B" | "b" => base64::decode(text).ok()?,
        "Q" | "q" => {
            let spaced: Vec<u8> = text
                .bytes()
                .map(|b| if b == b'_' { b' ' } else { b })
                .collect();
            decode_quoted_printable(&spaced)
        }
        _ => return None,
    };

    // RFC 2231 language suffix: `utf-8*en`.
    let charset = charset.split('*').next().unwrap_or(charset);
    let consumed = word.len() - after_encoding.len() + end + 2;
    Some((decode_charset(&bytes, Some(charset)), consumed))
}

// ---- Content-Type / Content-Disposition ----

#[derive(Debug)]
struct ContentType {
    mime: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    fn parse(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self {
                mime: "text/plain".to_string(),
                params: Vec::new(),
            };
        };
        let mut pieces = split_params(value).into_iter();
        let mime = pieces
            .next()
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "text/plain".to_string());
        let params = pieces
            .filter_map(|piece| {
                let (key, val) = piece.split_once('=')?;
                Some((key.trim().to_ascii_lowercase(), unquote(val.trim())))
            })
            .collect();
        Self { mime, params }
    }

    fn is_multipart(&self) -> bool {
        self.mime.starts_with("multipart/")
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Split on `;` outside double quotes.
fn split_params(value: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                pieces.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&value[start..]);
    pieces
}

fn unquote(value: &str) -> String {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_string(),
    }
}

// ---- Multipart ----

fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{}", boundary);
    let mut parts = Vec::new();
    let mut open: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| pos + i + 1);
        let line = &body[pos..line_end];

        if let Some(rest) = line.strip_prefix(delimiter.as_bytes()) {
            let rest = trim_trailing_whitespace(rest);
            let closing = rest == b"--";
            if rest.is_empty() || closing {
                if let Some(start) = open.take() {
                    parts.push(strip_line_ending(&body[start..pos]));
                }
                if closing {
                    return parts;
                }
                open = Some(line_end);
            }
        }
        pos = line_end;
    }

    // Unterminated: keep whatever the last part holds.
    if let Some(start) = open {
        if start < body.len() {
            parts.push(strip_line_ending(&body[start..]));
        }
    }
    parts
}

fn trim_trailing_whitespace(mut bytes: &[u8]) -> &[u8] {
    while let [head @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = head;
    }
    bytes
}

fn strip_line_ending(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n")
        .or_else(|| part.strip_suffix(b"\n"))
        .unwrap_or(part)
}

// ---- Transfer and charset decoding ----

fn decode_base64_lenient(body: &[u8]) -> Vec<u8> {
    let compact: Vec<u8> = body
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    base64::decode(&compact).unwrap_or_else(|_| body.to_vec())
}

fn decode_quoted_printable(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] != b'=' {
            out.push(input[i]);
            i += 1;
            continue;
        }
        match (input.get(i + 1), input.get(i + 2)) {
            (Some(b'\r'), Some(b'\n')) => i += 3,
            (Some(b'\n'), _) => i += 2,
            (Some(&high), Some(&low)) if high.is_ascii_hexdigit() && low.is_ascii_hexdigit() => {
                out.push(hex_value(high) << 4 | hex_value(low));
                i += 3;
            }
            _ => {
                out.push(b'=');
                i += 1;
            }
        }
    }
    out
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        b'A'..=b'F' => digit - b'A' + 10,
        _ => 0,
    }
}

/// Unknown or missing labels decode as UTF-8. Invalid sequences become U+FFFD.
fn decode_charset(bytes: &[u8], label: Option<&str>) -> String {
    let encoding = label
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
