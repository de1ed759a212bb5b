//! Response header helpers shared by the proxy and the bundle route

use hyper::header::{self, HeaderValue};
use hyper::http::response::Builder;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const ZIP: &str = "application/zip";

/// Attachment name for bundles
pub const BUNDLE_FILE_NAME: &str = "multiple_files.zip";

const FALLBACK_FILE_NAME: &str = "download";

/// `Content-Disposition: attachment` for `file_name`.
///
/// Quotes, backslashes and control characters are replaced so the value is
/// always a legal header. Non-ASCII names keep an ASCII fallback and gain an
/// RFC 5987 `filename*` parameter.
pub fn content_disposition(file_name: &str) -> String {
    let file_name = if file_name.is_empty() {
        FALLBACK_FILE_NAME
    } else {
        file_name
    };

    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() || !c.is_ascii() => '_',
            c => c,
        })
        .collect();

    if file_name.is_ascii() && !file_name.chars().any(char::is_control) {
        format!("attachment; filename=\"{}\"", fallback)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(file_name)
        )
    }
}

/// `Content-Range` covering the whole object, `None` for empty objects
pub fn content_range(total: u64) -> Option<String> {
    if total == 0 {
        None
    } else {
        Some(format!("bytes 0-{}/{}", total - 1, total))
    }
}

/// Framing headers for a single-object download.
///
/// With a known size: length, range and `Accept-Ranges`. Without one the
/// body is sent chunked.
pub fn object_headers(builder: Builder, file_name: &str, total: Option<u64>) -> Builder {
    let mut builder = builder
        .header(header::CONTENT_DISPOSITION, disposition_value(file_name))
        .header(header::CONTENT_TYPE, OCTET_STREAM);

    if let Some(total) = total {
        if let Some(range) = content_range(total) {
            builder = builder.header(header::CONTENT_RANGE, range);
        }
        builder = builder
            .header(header::CONTENT_LENGTH, total)
            .header(header::ACCEPT_RANGES, "bytes");
    }

    builder
}

/// Headers for a streamed bundle
pub fn bundle_headers(builder: Builder) -> Builder {
    builder
        .header(header::CONTENT_DISPOSITION, disposition_value(BUNDLE_FILE_NAME))
        .header(header::CONTENT_TYPE, ZIP)
}

fn disposition_value(file_name: &str) -> HeaderValue {
    HeaderValue::from_str(&content_disposition(file_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Response;

    #[test]
    fn test_content_disposition_plain() {
        assert_eq!(
            content_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\""
        );
        assert_eq!(
            content_disposition(""),
            "attachment; filename=\"download\""
        );
    }

    #[test]
    fn test_content_disposition_sanitized() {
        assert_eq!(
            content_disposition("a\"b\\c.txt"),
            "attachment; filename=\"a_b_c.txt\""
        );

        let value = content_disposition("résumé.pdf");
        assert!(value.starts_with("attachment; filename=\"r_sum_.pdf\""));
        assert!(value.ends_with("filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"));
        assert!(HeaderValue::from_str(&value).is_ok());

        assert!(HeaderValue::from_str(&content_disposition("bad\nname")).is_ok());
    }

    #[test]
    fn test_content_range() {
        assert_eq!(content_range(1024).as_deref(), Some("bytes 0-1023/1024"));
        assert_eq!(content_range(1).as_deref(), Some("bytes 0-0/1"));
        assert_eq!(content_range(0), None);
    }

    #[test]
    fn test_object_headers() {
        let response = object_headers(Response::builder(), "x.bin", Some(10))
            .body(())
            .unwrap();
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], OCTET_STREAM);
        assert_eq!(headers[header::CONTENT_LENGTH], "10");
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-9/10");
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    }

    #[test]
    fn test_object_headers_unknown_size() {
        let response = object_headers(Response::builder(), "x.bin", None)
            .body(())
            .unwrap();
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(response.headers().get(header::CONTENT_RANGE).is_none());
    }

    #[test]
    fn test_bundle_headers() {
        let response = bundle_headers(Response::builder()).body(()).unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], ZIP);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"multiple_files.zip\""
        );
    }
}
