//! Single left-to-right scan of one line under a compiled format.

use crate::fields;
use crate::format::{Directive, LogFormat, Step, Wrap};
use crate::{ParseOptions, Request};
use memchr::{memchr, memchr2};

impl LogFormat {
    /// Parse one line into `request`, which is reset first.
    ///
    /// Returns `false` on a structural mismatch (literal not found, wrapped
    /// field never closed); the line is then to be dropped. Field-level
    /// garbage does not fail the line, it only leaves the zero value in the
    /// affected field.
    pub fn parse_line(&self, line: &[u8], opts: ParseOptions, request: &mut Request) -> bool {
        request.reset();
        let mut pos = 0usize;
        for step in &self.steps {
            match step {
                Step::Literal(literal) => {
                    let end = pos + literal.len();
                    if line.len() < end || &line[pos..end] != literal.as_slice() {
                        return false;
                    }
                    pos = end;
                }
                Step::Field { kind, wrap, delim } => {
                    // Wrapped fields run to their closing byte; plain fields
                    // stop at the delimiter or a space, whichever is first.
                    let found = match (wrap, delim) {
                        (Wrap::Plain, Some(delim)) => memchr2(*delim, b' ', &line[pos..]),
                        (_, Some(delim)) => memchr(*delim, &line[pos..]),
                        (_, None) => Some(line.len() - pos),
                    };
                    let Some(offset) = found else { return false };
                    let end = pos + offset;
                    apply_field(*kind, &line[pos..end], opts, request);
                    pos = end;
                }
            }
        }
        true
    }
}

fn apply_field(kind: Directive, bytes: &[u8], opts: ParseOptions, request: &mut Request) {
    match kind {
        Directive::Ip => request.ip = fields::parse_ipv4(bytes),
        Directive::Skip => {}
        _ if opts.skip_non_ip_fields => {}
        Directive::Timestamp => request.timestamp = fields::parse_clf_timestamp(bytes),
        Directive::Method => request.method = fields::parse_method(bytes),
        Directive::Status => request.status = fields::parse_status(bytes),
        Directive::Bytes => request.bytes = fields::parse_bytes(bytes),
        Directive::RequestLine => {
            let (method, uri) = fields::split_request_line(bytes);
            request.method = fields::parse_method(method);
            if !opts.skip_string_fields {
                request.uri.push_str(&String::from_utf8_lossy(uri));
            }
        }
        Directive::Uri => {
            if !opts.skip_string_fields {
                request.uri.push_str(&String::from_utf8_lossy(bytes));
            }
        }
        Directive::UserAgent => {
            if !opts.skip_string_fields {
                request.user_agent.push_str(&String::from_utf8_lossy(bytes));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    const COMBINED: &str = r#"%h %^ %^ [%t] "%r" %s %b "%^" "%u""#;

    fn parse(format: &str, line: &str, opts: ParseOptions) -> Option<Request> {
        let format = LogFormat::compile(format).unwrap();
        let mut request = Request::default();
        format
            .parse_line(line.as_bytes(), opts, &mut request)
            .then_some(request)
    }

    #[test]
    fn combined_line_roundtrip() {
        let line = r#"10.20.30.40 - alice [15/Mar/2023:10:30:00 +0000] "GET /index.html HTTP/1.1" 200 1234 "-" "Mozilla/5.0""#;
        let request = parse(COMBINED, line, ParseOptions::default()).unwrap();
        assert_eq!(request.ip, 0x0A14_1E28);
        assert_eq!(request.timestamp, 1_678_876_200);
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.uri, "/index.html");
        assert_eq!(request.user_agent, "Mozilla/5.0");
        assert_eq!(request.status, 200);
        assert_eq!(request.bytes, 1234);
    }

    #[test]
    fn skip_string_fields_leaves_strings_empty() {
        let line = r#"10.20.30.40 - - [15/Mar/2023:10:30:00 +0000] "GET /x HTTP/1.1" 200 10 "-" "curl/8.0""#;
        let opts = ParseOptions {
            skip_string_fields: true,
            ..Default::default()
        };
        let request = parse(COMBINED, line, opts).unwrap();
        assert_eq!(request.ip, 0x0A14_1E28);
        assert_eq!(request.method, Method::Get);
        assert!(request.uri.is_empty());
        assert!(request.user_agent.is_empty());
    }

    #[test]
    fn skip_non_ip_fields_parses_only_the_ip() {
        let line = r#"10.20.30.40 - - [15/Mar/2023:10:30:00 +0000] "GET /x HTTP/1.1" 200 10 "-" "curl/8.0""#;
        let opts = ParseOptions {
            skip_string_fields: true,
            skip_non_ip_fields: true,
        };
        let request = parse(COMBINED, line, opts).unwrap();
        assert_eq!(request.ip, 0x0A14_1E28);
        assert_eq!(request.timestamp, 0);
        assert_eq!(request.status, 0);
        assert_eq!(request.method, Method::Unknown);
    }

    #[test]
    fn bad_ip_field_keeps_the_line() {
        let line = r#"flood - - [15/Mar/2023:10:30:00 +0000] "GET /x HTTP/1.1" 200 10 "-" "curl/8.0""#;
        let request = parse(COMBINED, line, ParseOptions::default()).unwrap();
        assert_eq!(request.ip, 0);
        assert_eq!(request.status, 200);
    }

    #[test]
    fn dash_bytes_field_is_zero() {
        let line = r#"10.0.0.1 - - [15/Mar/2023:10:30:00 +0000] "HEAD / HTTP/1.1" 304 - "-" "x""#;
        let request = parse(COMBINED, line, ParseOptions::default()).unwrap();
        assert_eq!(request.method, Method::Head);
        assert_eq!(request.status, 304);
        assert_eq!(request.bytes, 0);
    }

    #[test]
    fn structural_mismatch_fails_the_line() {
        assert!(parse(COMBINED, "", ParseOptions::default()).is_none());
        assert!(parse(COMBINED, "10.0.0.1 - -", ParseOptions::default()).is_none());
        // Unterminated quoted field.
        let line = r#"10.0.0.1 - - [15/Mar/2023:10:30:00 +0000] "GET /x HTTP/1.1"#;
        assert!(parse(COMBINED, line, ParseOptions::default()).is_none());
    }

    #[test]
    fn simple_space_separated_format() {
        let request = parse("%h %m %U %s", "1.2.3.4 POST /api 503", ParseOptions::default())
            .unwrap();
        assert_eq!(request.ip, 0x0102_0304);
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.uri, "/api");
        assert_eq!(request.status, 503);
    }

    #[test]
    fn formatted_ip_always_roundtrips() {
        let format = LogFormat::compile(COMBINED).unwrap();
        let mut request = Request::default();
        // Walk a spread of the address space, including octet boundaries.
        for ip in (0u32..=u32::MAX).step_by(0x0101_0101).chain([1, u32::MAX]) {
            let quad = std::net::Ipv4Addr::from(ip);
            let line = format!(
                r#"{quad} - - [15/Mar/2023:10:30:00 +0000] "GET / HTTP/1.1" 200 0 "-" "x""#
            );
            assert!(format.parse_line(line.as_bytes(), ParseOptions::default(), &mut request));
            assert_eq!(request.ip, ip, "{quad}");
        }
    }

    #[test]
    fn reused_request_buffer_is_fully_reset() {
        let format = LogFormat::compile("%h %U").unwrap();
        let mut request = Request::default();
        assert!(format.parse_line(b"1.2.3.4 /long/path", ParseOptions::default(), &mut request));
        assert!(format.parse_line(b"5.6.7.8 /x", ParseOptions::default(), &mut request));
        assert_eq!(request.ip, 0x0506_0708);
        assert_eq!(request.uri, "/x");
    }
}
