use crate::common::data::{Error, Error::MultipartDecodingError, RequestPart};
use bytes::Bytes;

// ===============================================================================================
// Text
// ===============================================================================================
pub fn title_case(s: &str) -> String {
    let mut result = String::new();
    let mut capitalize_next = true;

    for c in s.chars() {
        if c.is_whitespace() {
            capitalize_next = true;
            result.push(c);
        } else if capitalize_next {
            result.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            result.extend(c.to_lowercase());
        }
    }

    result
}

/// Shortens long values for single-line rendering.
pub fn abbreviate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }

    let mut result: String = s.chars().take(max_chars).collect();
    result.push_str("...");
    result
}

// ===============================================================================================
// Multipart
// ===============================================================================================

/// Extracts the boundary parameter of a `multipart/*` content type.
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    if !content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/")
    {
        return None;
    }

    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Decodes a multipart body into its parts.
pub fn decode_multipart(boundary: &str, body: &[u8]) -> Result<Vec<RequestPart>, Error> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut pos = find(body, delimiter, 0)
        .ok_or_else(|| MultipartDecodingError("opening boundary not found".to_string()))?;

    loop {
        pos += delimiter.len();

        let rest = body.get(pos..).unwrap_or_default();
        if rest.starts_with(b"--") {
            return Ok(parts);
        }

        pos = skip_line_break(body, pos);

        let next = find(body, delimiter, pos)
            .ok_or_else(|| MultipartDecodingError("closing boundary not found".to_string()))?;

        let chunk = strip_trailing_line_break(&body[pos..next]);
        parts.push(parse_part(chunk)?);

        pos = next;
    }
}

fn parse_part(chunk: &[u8]) -> Result<RequestPart, Error> {
    let (head, body) = if let Some(rest) = chunk.strip_prefix(b"\r\n") {
        (&chunk[..0], rest)
    } else {
        match find(chunk, b"\r\n\r\n", 0) {
            Some(idx) => (&chunk[..idx], &chunk[idx + 4..]),
            None => match find(chunk, b"\n\n", 0) {
                Some(idx) => (&chunk[..idx], &chunk[idx + 2..]),
                None => {
                    return Err(MultipartDecodingError(
                        "part has no header terminator".to_string(),
                    ))
                }
            },
        }
    };

    let head = std::str::from_utf8(head).map_err(|e| MultipartDecodingError(e.to_string()))?;

    let mut headers = Vec::new();
    for line in head.lines().filter(|l| !l.trim().is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| MultipartDecodingError(format!("malformed part header: {}", line)))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let name = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-disposition"))
        .and_then(|(_, v)| disposition_param(v, "name"));

    Ok(RequestPart {
        name,
        headers,
        body: Bytes::copy_from_slice(body),
    })
}

fn disposition_param(disposition: &str, param: &str) -> Option<String> {
    disposition.split(';').skip(1).find_map(|p| {
        let (key, value) = p.split_once('=')?;
        if key.trim().eq_ignore_ascii_case(param) {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }

    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn skip_line_break(body: &[u8], pos: usize) -> usize {
    let rest = body.get(pos..).unwrap_or_default();
    if rest.starts_with(b"\r\n") {
        pos + 2
    } else if rest.starts_with(b"\n") {
        pos + 1
    } else {
        pos
    }
}

fn strip_trailing_line_break(chunk: &[u8]) -> &[u8] {
    chunk
        .strip_suffix(b"\r\n")
        .or_else(|| chunk.strip_suffix(b"\n"))
        .unwrap_or(chunk)
}
