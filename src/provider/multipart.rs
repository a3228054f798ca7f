// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Provider response decoding: one image, a multipart bundle, or raw bytes

use bytes::Bytes;

/// Split a provider response body into image payloads.
///
/// - `image/*` is one image
/// - `multipart/*` is split on the boundary from the content type
/// - anything else non-empty is treated as one raw image
pub fn parse_response(content_type: Option<&str>, body: Bytes) -> Vec<Bytes> {
    let content_type = content_type.unwrap_or("").trim();

    if content_type.to_ascii_lowercase().starts_with("multipart/") {
        return match boundary(content_type) {
            Some(boundary) => split_parts(&body, &boundary),
            None => Vec::new(),
        };
    }

    if body.is_empty() {
        Vec::new()
    } else {
        vec![body]
    }
}

/// Boundary parameter of a multipart content type, unquoted
pub fn boundary(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Body bytes of every part. Headers end at the first blank line; the CRLF
/// before the next delimiter belongs to the delimiter.
pub fn split_parts(body: &[u8], boundary: &str) -> Vec<Bytes> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();

    let Some(mut cursor) = find(body, delimiter, 0) else {
        return parts;
    };

    loop {
        let start = cursor + delimiter.len();
        if body[start..].starts_with(b"--") {
            break;
        }
        let next = find(body, delimiter, start);
        let segment = &body[start..next.unwrap_or(body.len())];

        if let Some(content) = part_content(segment) {
            if !content.is_empty() {
                parts.push(Bytes::copy_from_slice(content));
            }
        }

        match next {
            Some(position) => cursor = position,
            None => break,
        }
    }
    parts
}

fn part_content(segment: &[u8]) -> Option<&[u8]> {
    let segment = segment.strip_prefix(b"\r\n").unwrap_or(segment);
    let content = match segment.strip_prefix(b"\r\n") {
        // part without headers
        Some(rest) => rest,
        None => match find(segment, b"\r\n\r\n", 0) {
            Some(at) => &segment[at + 4..],
            None => &segment[find(segment, b"\n\n", 0)? + 2..],
        },
    };
    let content = content
        .strip_suffix(b"\r\n")
        .or_else(|| content.strip_suffix(b"\n"))
        .unwrap_or(content);
    Some(content)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|position| position + from)
}
