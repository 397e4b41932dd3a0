//! Compilation of a log format string into an executable step list.
//!
//! A format string interleaves `%`-directives with literal delimiters, e.g.
//! the combined-log layout `%h %^ %^ [%t] "%r" %s %b "%^" "%u"`. Compilation
//! yields one step per literal run and per field; each field step knows its
//! kind, whether it sits inside `"…"` or `[…]`, and the byte that terminates
//! it. Exactly one `%h` is required and non-skip directives must be unique.

use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Directive {
    Ip,
    Timestamp,
    RequestLine,
    Method,
    Uri,
    Status,
    Bytes,
    UserAgent,
    Skip,
}

impl Directive {
    fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'h' => Directive::Ip,
            't' => Directive::Timestamp,
            'r' => Directive::RequestLine,
            'm' => Directive::Method,
            'U' => Directive::Uri,
            's' => Directive::Status,
            'b' => Directive::Bytes,
            'u' => Directive::UserAgent,
            '^' => Directive::Skip,
            _ => return None,
        })
    }
}

/// Wrapping of a field in the raw line. The opening byte is consumed by the
/// preceding literal step; the closing byte is the scan terminator and is
/// left for the following literal step to match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Wrap {
    Plain,
    Quoted,
    Bracketed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    Literal(Vec<u8>),
    Field {
        kind: Directive,
        wrap: Wrap,
        /// Byte terminating the field; `None` means the field runs to the
        /// end of the line.
        delim: Option<u8>,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("log format is empty")]
    Empty,
    #[error("unknown directive `%{0}`")]
    UnknownDirective(char),
    #[error("directive `%{0}` appears more than once")]
    DuplicateDirective(char),
    #[error("log format must contain exactly one `%h`")]
    MissingIpDirective,
    #[error("dangling `%` at the end of the format string")]
    TruncatedDirective,
}

/// A compiled log format. Cheap to clone; compiled once per run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFormat {
    pub(crate) steps: Vec<Step>,
}

impl FromStr for LogFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl LogFormat {
    pub fn compile(format: &str) -> Result<Self, FormatError> {
        if format.is_empty() {
            return Err(FormatError::Empty);
        }

        // First pass: split into literal runs and directives.
        enum Token {
            Literal(Vec<u8>),
            Directive(char, Directive),
        }
        let mut tokens = Vec::new();
        let mut literal = Vec::new();
        let mut chars = format.chars();
        while let Some(ch) = chars.next() {
            if ch != '%' {
                let mut utf8 = [0u8; 4];
                literal.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
                continue;
            }
            let code = chars.next().ok_or(FormatError::TruncatedDirective)?;
            let directive =
                Directive::from_code(code).ok_or(FormatError::UnknownDirective(code))?;
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(Token::Directive(code, directive));
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        // Uniqueness: `%r` occupies both the method and the URI slot.
        let mut seen = Vec::new();
        let mut ip_count = 0usize;
        for token in &tokens {
            let Token::Directive(code, directive) = token else {
                continue;
            };
            let slots: &[Directive] = match directive {
                Directive::Skip => &[],
                Directive::Ip => {
                    ip_count += 1;
                    &[Directive::Ip]
                }
                Directive::RequestLine => &[Directive::Method, Directive::Uri],
                other => std::slice::from_ref(other),
            };
            for slot in slots {
                if seen.contains(slot) {
                    return Err(FormatError::DuplicateDirective(*code));
                }
                seen.push(*slot);
            }
        }
        if ip_count != 1 {
            return Err(FormatError::MissingIpDirective);
        }

        // Second pass: derive wrap and terminator from the neighbours.
        let mut steps = Vec::with_capacity(tokens.len());
        for (index, token) in tokens.iter().enumerate() {
            match token {
                Token::Literal(bytes) => steps.push(Step::Literal(bytes.clone())),
                Token::Directive(_, directive) => {
                    let opener = match &steps.last() {
                        Some(Step::Literal(bytes)) => bytes.last().copied(),
                        _ => None,
                    };
                    let wrap = match opener {
                        Some(b'"') => Wrap::Quoted,
                        Some(b'[') => Wrap::Bracketed,
                        _ => Wrap::Plain,
                    };
                    let delim = match wrap {
                        Wrap::Quoted => Some(b'"'),
                        Wrap::Bracketed => Some(b']'),
                        Wrap::Plain => match tokens.get(index + 1) {
                            Some(Token::Literal(bytes)) => Some(bytes[0]),
                            _ => None,
                        },
                    };
                    steps.push(Step::Field {
                        kind: *directive,
                        wrap,
                        delim,
                    });
                }
            }
        }

        Ok(Self { steps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_log_format_compiles() {
        let format = LogFormat::compile(r#"%h %^ %^ [%t] "%r" %s %b "%^" "%u""#).unwrap();
        let fields: Vec<(Directive, Wrap, Option<u8>)> = format
            .steps
            .iter()
            .filter_map(|step| match step {
                Step::Field { kind, wrap, delim } => Some((*kind, *wrap, *delim)),
                Step::Literal(_) => None,
            })
            .collect();
        assert_eq!(
            fields,
            vec![
                (Directive::Ip, Wrap::Plain, Some(b' ')),
                (Directive::Skip, Wrap::Plain, Some(b' ')),
                (Directive::Skip, Wrap::Plain, Some(b' ')),
                (Directive::Timestamp, Wrap::Bracketed, Some(b']')),
                (Directive::RequestLine, Wrap::Quoted, Some(b'"')),
                (Directive::Status, Wrap::Plain, Some(b' ')),
                (Directive::Bytes, Wrap::Plain, Some(b' ')),
                (Directive::Skip, Wrap::Quoted, Some(b'"')),
                (Directive::UserAgent, Wrap::Quoted, Some(b'"')),
            ]
        );
    }

    #[test]
    fn trailing_plain_field_runs_to_line_end() {
        let format = LogFormat::compile("%h %U").unwrap();
        assert!(matches!(
            format.steps.last(),
            Some(Step::Field {
                kind: Directive::Uri,
                wrap: Wrap::Plain,
                delim: None,
            })
        ));
    }

    #[test]
    fn rejects_missing_ip() {
        assert_eq!(
            LogFormat::compile("%t %s"),
            Err(FormatError::MissingIpDirective)
        );
    }

    #[test]
    fn rejects_double_ip() {
        assert_eq!(
            LogFormat::compile("%h %h"),
            Err(FormatError::DuplicateDirective('h'))
        );
    }

    #[test]
    fn rejects_duplicate_directive() {
        assert_eq!(
            LogFormat::compile("%h %s %s"),
            Err(FormatError::DuplicateDirective('s'))
        );
    }

    #[test]
    fn request_line_conflicts_with_standalone_method() {
        assert_eq!(
            LogFormat::compile(r#"%h "%r" %m"#),
            Err(FormatError::DuplicateDirective('m'))
        );
    }

    #[test]
    fn skips_may_repeat() {
        assert!(LogFormat::compile("%h %^ %^ %^").is_ok());
    }

    #[test]
    fn rejects_unknown_and_truncated() {
        assert_eq!(
            LogFormat::compile("%h %x"),
            Err(FormatError::UnknownDirective('x'))
        );
        assert_eq!(LogFormat::compile("%h %"), Err(FormatError::TruncatedDirective));
        assert_eq!(LogFormat::compile(""), Err(FormatError::Empty));
    }
}
