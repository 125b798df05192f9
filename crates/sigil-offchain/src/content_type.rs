/// Best-effort content-type inference from the first bytes of a payload.
/// Callers that know better supply the type themselves.
pub fn sniff_content_type(head: &[u8]) -> &'static str {
    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png";
    }
    if head.starts_with(b"\xff\xd8\xff") {
        return "image/jpeg";
    }
    if head.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    if head.starts_with(b"\x1f\x8b") {
        return "application/gzip";
    }
    if head.starts_with(b"PK\x03\x04") {
        return "application/zip";
    }
    match std::str::from_utf8(head) {
        Ok(text) => {
            let trimmed = text.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                "application/json"
            } else if trimmed.starts_with("<?xml") || trimmed.starts_with('<') {
                "application/xml"
            } else {
                "text/plain"
            }
        }
        Err(_) => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_common_formats() {
        assert_eq!(sniff_content_type(b"\x89PNG\r\n\x1a\nrest"), "image/png");
        assert_eq!(sniff_content_type(b"%PDF-1.7"), "application/pdf");
        assert_eq!(sniff_content_type(b"  {\"k\": 1}"), "application/json");
        assert_eq!(sniff_content_type(b"plain words"), "text/plain");
        assert_eq!(
            sniff_content_type(&[0xde, 0xad, 0xbe, 0xef]),
            "application/octet-stream"
        );
    }
}
