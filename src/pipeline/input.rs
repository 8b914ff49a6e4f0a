//! Request resolution: turn an HTTP body and query string into a [`RenderRequest`].
//!
//! The body is either a JSON array of HTML strings or, with a `text/html`
//! content type, one raw HTML document. The query string carries the
//! attachment filename and the print options; a caller-supplied `path` is
//! dropped so no request can choose where the engine writes.

use crate::config::{parse_bool_flag, RenderOptions};
use crate::error::Html2PdfError;
use tracing::debug;

/// Attachment name used when the caller gives none.
pub const DEFAULT_FILENAME: &str = "document.pdf";

/// Query keys that never reach the engine.
const STRIPPED_KEYS: [&str; 2] = ["path", "filename"];

/// One request's worth of work: documents in page order plus shared options.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub documents: Vec<String>,
    pub options: RenderOptions,
    pub filename: String,
}

impl RenderRequest {
    /// Build a request, rejecting an empty document list.
    pub fn new(
        documents: Vec<String>,
        options: RenderOptions,
        filename: Option<&str>,
    ) -> Result<Self, Html2PdfError> {
        if documents.is_empty() {
            return Err(Html2PdfError::InvalidRequest(
                "expected at least one HTML document".into(),
            ));
        }
        Ok(Self {
            documents,
            options,
            filename: resolve_filename(filename),
        })
    }

    /// Resolve an inbound HTTP request.
    pub fn from_http<'a>(
        content_type: Option<&str>,
        body: &[u8],
        query: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, Html2PdfError> {
        let documents = parse_body(content_type, body)?;
        let (filename, options) = parse_query(query)?;
        debug!(
            "Resolved request: {} documents, filename={:?}, options={:?}",
            documents.len(),
            filename,
            options
        );
        Self::new(documents, options, filename.as_deref())
    }
}

/// Ensure the name ends in `.pdf`; fall back to [`DEFAULT_FILENAME`].
///
/// Only the final path component is kept and quote/backslash characters are
/// replaced, so the name is always safe inside a quoted header parameter.
pub fn resolve_filename(raw: Option<&str>) -> String {
    let name = raw
        .map(|s| s.rsplit(['/', '\\']).next().unwrap_or(s).trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("document");

    let mut name: String = name
        .chars()
        .map(|c| if c == '"' || c.is_control() { '_' } else { c })
        .collect();

    if !name.ends_with(".pdf") {
        name.push_str(".pdf");
    }
    name
}

/// Split query pairs into the filename and the render options.
///
/// Later duplicates win, the same as a plain key/value map.
pub fn parse_query<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<(Option<String>, RenderOptions), Html2PdfError> {
    let mut filename = None;
    let mut options = RenderOptions::default();

    for (key, value) in pairs {
        match key {
            "filename" => filename = Some(value.to_string()),
            "format" => options.format = value.trim().to_string(),
            "landscape" => options.landscape = parse_flag(key, value)?,
            "printBackground" => options.print_background = parse_flag(key, value)?,
            _ if STRIPPED_KEYS.contains(&key) => {
                debug!("Discarding query parameter '{}'", key);
            }
            _ => {
                options.extra.insert(key.to_string(), value.to_string());
            }
        }
    }

    Ok((filename, options))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, Html2PdfError> {
    parse_bool_flag(value).ok_or_else(|| {
        Html2PdfError::InvalidRequest(format!("'{key}' must be true or false, got '{value}'"))
    })
}

/// Decode the request body into HTML documents.
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<Vec<String>, Html2PdfError> {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase());

    if mime.as_deref() == Some("text/html") {
        let html = std::str::from_utf8(body)
            .map_err(|e| Html2PdfError::InvalidRequest(format!("HTML body is not UTF-8: {e}")))?;
        return Ok(vec![html.to_string()]);
    }

    serde_json::from_slice::<Vec<String>>(body).map_err(|e| {
        Html2PdfError::InvalidRequest(format!(
            "body must be a JSON array of HTML strings: {e}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_resolution() {
        assert_eq!(resolve_filename(Some("report")), "report.pdf");
        assert_eq!(resolve_filename(Some("report.pdf")), "report.pdf");
        assert_eq!(resolve_filename(Some("Report.PDF")), "Report.PDF.pdf");
        assert_eq!(resolve_filename(None), DEFAULT_FILENAME);
        assert_eq!(resolve_filename(Some("")), DEFAULT_FILENAME);
        assert_eq!(resolve_filename(Some("  ")), DEFAULT_FILENAME);
    }

    #[test]
    fn filename_is_header_safe() {
        assert_eq!(resolve_filename(Some("../../etc/passwd")), "passwd.pdf");
        assert_eq!(resolve_filename(Some("a\"b")), "a_b.pdf");
        assert_eq!(resolve_filename(Some("dir\\name")), "name.pdf");
    }

    #[test]
    fn query_defaults() {
        let (filename, options) = parse_query(Vec::new()).unwrap();
        assert_eq!(filename, None);
        assert_eq!(options, RenderOptions::default());
    }

    #[test]
    fn query_options_and_passthrough() {
        let (filename, options) = parse_query([
            ("filename", "invoice"),
            ("format", "Letter"),
            ("landscape", "true"),
            ("printBackground", "false"),
            ("scale", "0.9"),
            ("path", "/etc/cron.d/evil"),
        ])
        .unwrap();

        assert_eq!(filename.as_deref(), Some("invoice"));
        assert_eq!(options.format, "Letter");
        assert!(options.landscape);
        assert!(!options.print_background);
        assert_eq!(options.extra.get("scale").map(String::as_str), Some("0.9"));
        assert!(!options.extra.contains_key("path"));
        assert!(!options.extra.contains_key("filename"));
    }

    #[test]
    fn invalid_boolean_is_rejected() {
        let err = parse_query([("landscape", "sideways")]).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn json_body() {
        let docs = parse_body(Some("application/json"), br#"["<p>A</p>","<p>B</p>"]"#).unwrap();
        assert_eq!(docs, vec!["<p>A</p>", "<p>B</p>"]);
    }

    #[test]
    fn missing_content_type_is_treated_as_json() {
        let docs = parse_body(None, br#"["<p>A</p>"]"#).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn html_body_is_one_document() {
        let docs = parse_body(Some("text/html; charset=utf-8"), b"<h1>Hi</h1>").unwrap();
        assert_eq!(docs, vec!["<h1>Hi</h1>"]);
    }

    #[test]
    fn malformed_bodies_are_client_errors() {
        assert!(parse_body(Some("application/json"), b"{\"html\":1}")
            .unwrap_err()
            .is_client_error());
        assert!(parse_body(Some("application/json"), b"[1, 2]")
            .unwrap_err()
            .is_client_error());
        assert!(parse_body(Some("text/html"), &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn empty_document_list_is_rejected() {
        let err = RenderRequest::from_http(Some("application/json"), b"[]", Vec::new()).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn request_from_http() {
        let req = RenderRequest::from_http(
            Some("application/json"),
            br#"["<p>A</p>"]"#,
            [("filename", "out")],
        )
        .unwrap();
        assert_eq!(req.filename, "out.pdf");
        assert_eq!(req.documents.len(), 1);
    }
}
