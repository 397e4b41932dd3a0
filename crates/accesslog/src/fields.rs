//! Byte-level field parsers. Every parser maps malformed input to the zero
//! value of its field instead of failing the line.

use crate::Method;
use memchr::memchr;

/// Single-pass IPv4 parse with dot counting. Returns `0` for anything that
/// is not a well-formed dotted quad (which also maps `0.0.0.0` to 0).
pub(crate) fn parse_ipv4(bytes: &[u8]) -> u32 {
    let mut packed = 0u32;
    let mut octet = 0u32;
    let mut digits = 0u8;
    let mut dots = 0u8;
    for &byte in bytes {
        match byte {
            b'0'..=b'9' => {
                digits += 1;
                if digits > 3 {
                    return 0;
                }
                octet = octet * 10 + u32::from(byte - b'0');
                if octet > 255 {
                    return 0;
                }
            }
            b'.' => {
                if digits == 0 {
                    return 0;
                }
                dots += 1;
                if dots > 3 {
                    return 0;
                }
                packed = (packed << 8) | octet;
                octet = 0;
                digits = 0;
            }
            _ => return 0,
        }
    }
    if dots != 3 || digits == 0 {
        return 0;
    }
    (packed << 8) | octet
}

fn two_digits(bytes: &[u8]) -> Option<u32> {
    let &[a, b] = bytes else { return None };
    if !a.is_ascii_digit() || !b.is_ascii_digit() {
        return None;
    }
    Some(u32::from(a - b'0') * 10 + u32::from(b - b'0'))
}

fn month_number(bytes: &[u8]) -> Option<u32> {
    let code: [u8; 3] = bytes.try_into().ok()?;
    Some(match &code {
        b"Jan" => 1,
        b"Feb" => 2,
        b"Mar" => 3,
        b"Apr" => 4,
        b"May" => 5,
        b"Jun" => 6,
        b"Jul" => 7,
        b"Aug" => 8,
        b"Sep" => 9,
        b"Oct" => 10,
        b"Nov" => 11,
        b"Dec" => 12,
        _ => return None,
    })
}

/// `DD/MMM/YYYY:HH:MM:SS` at fixed offsets; any trailing zone digits are
/// ignored and the instant is taken as UTC. Returns Unix seconds, `0` on
/// malformed input.
pub(crate) fn parse_clf_timestamp(bytes: &[u8]) -> i64 {
    fn inner(bytes: &[u8]) -> Option<i64> {
        if bytes.len() < 20 {
            return None;
        }
        if bytes[2] != b'/'
            || bytes[6] != b'/'
            || bytes[11] != b':'
            || bytes[14] != b':'
            || bytes[17] != b':'
        {
            return None;
        }
        let day = two_digits(&bytes[0..2])?;
        let month = month_number(&bytes[3..6])?;
        let year = two_digits(&bytes[7..9])? * 100 + two_digits(&bytes[9..11])?;
        let hour = two_digits(&bytes[12..14])?;
        let minute = two_digits(&bytes[15..17])?;
        let second = two_digits(&bytes[18..20])?;
        let date = chrono::NaiveDate::from_ymd_opt(year as i32, month, day)?;
        let time = date.and_hms_opt(hour, minute, second)?;
        Some(time.timestamp())
    }
    inner(bytes).unwrap_or(0)
}

/// First-byte dispatch; `P` is disambiguated by the second byte.
pub(crate) fn parse_method(bytes: &[u8]) -> Method {
    match bytes.first() {
        Some(b'G') => Method::Get,
        Some(b'D') => Method::Delete,
        Some(b'H') => Method::Head,
        Some(b'O') => Method::Options,
        Some(b'P') => match bytes.get(1) {
            Some(b'O') => Method::Post,
            Some(b'U') => Method::Put,
            Some(b'A') => Method::Patch,
            _ => Method::Unknown,
        },
        _ => Method::Unknown,
    }
}

/// Three-digit status accumulator; anything else is 0.
pub(crate) fn parse_status(bytes: &[u8]) -> u16 {
    if bytes.len() != 3 {
        return 0;
    }
    let mut status = 0u16;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return 0;
        }
        status = status * 10 + u16::from(byte - b'0');
    }
    status
}

/// Response size: up to ten digits, `-` means "no body" and yields 0.
pub(crate) fn parse_bytes(bytes: &[u8]) -> u32 {
    if bytes == b"-" {
        return 0;
    }
    if bytes.is_empty() || bytes.len() > 10 {
        return 0;
    }
    let mut value = 0u64;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return 0;
        }
        value = value * 10 + u64::from(byte - b'0');
    }
    value.min(u64::from(u32::MAX)) as u32
}

/// Split `METHOD URI HTTP/VERSION`; the version is ignored. A missing
/// second space leaves the remainder as the URI.
pub(crate) fn split_request_line(bytes: &[u8]) -> (&[u8], &[u8]) {
    match memchr(b' ', bytes) {
        Some(space) => {
            let method = &bytes[..space];
            let rest = &bytes[space + 1..];
            let uri = match memchr(b' ', rest) {
                Some(end) => &rest[..end],
                None => rest,
            };
            (method, uri)
        }
        None => (bytes, &[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_happy_path() {
        assert_eq!(parse_ipv4(b"1.2.3.4"), 0x0102_0304);
        assert_eq!(parse_ipv4(b"255.255.255.255"), u32::MAX);
        assert_eq!(parse_ipv4(b"10.20.30.40"), 0x0A14_1E28);
    }

    #[test]
    fn ipv4_rejects_malformed() {
        for bad in [
            &b"256.1.1.1"[..],
            b"1.2.3",
            b"1.2.3.4.5",
            b"1..2.3",
            b"a.b.c.d",
            b"1.2.3.4x",
            b"",
            b"1234.1.1.1",
        ] {
            assert_eq!(parse_ipv4(bad), 0, "{:?}", std::str::from_utf8(bad));
        }
    }

    #[test]
    fn clf_timestamp_epoch() {
        // date -u -d '2023-03-15 10:30:00' +%s
        assert_eq!(
            parse_clf_timestamp(b"15/Mar/2023:10:30:00 +0000"),
            1_678_876_200
        );
        // The zone digits are ignored: same instant reported for +0200.
        assert_eq!(
            parse_clf_timestamp(b"15/Mar/2023:10:30:00 +0200"),
            1_678_876_200
        );
        assert_eq!(parse_clf_timestamp(b"01/Jan/1970:00:00:00"), 0);
        assert_eq!(parse_clf_timestamp(b"02/Jan/1970:00:00:01"), 86_401);
    }

    #[test]
    fn clf_timestamp_rejects_malformed() {
        assert_eq!(parse_clf_timestamp(b"15-Mar-2023:10:30:00"), 0);
        assert_eq!(parse_clf_timestamp(b"15/Foo/2023:10:30:00"), 0);
        assert_eq!(parse_clf_timestamp(b"32/Mar/2023:10:30:00"), 0);
        assert_eq!(parse_clf_timestamp(b"15/Mar/2023"), 0);
    }

    #[test]
    fn method_dispatch() {
        assert_eq!(parse_method(b"GET"), Method::Get);
        assert_eq!(parse_method(b"POST"), Method::Post);
        assert_eq!(parse_method(b"PUT"), Method::Put);
        assert_eq!(parse_method(b"PATCH"), Method::Patch);
        assert_eq!(parse_method(b"DELETE"), Method::Delete);
        assert_eq!(parse_method(b"HEAD"), Method::Head);
        assert_eq!(parse_method(b"OPTIONS"), Method::Options);
        assert_eq!(parse_method(b"TRACE"), Method::Unknown);
        assert_eq!(parse_method(b"P"), Method::Unknown);
        assert_eq!(parse_method(b""), Method::Unknown);
    }

    #[test]
    fn status_and_bytes() {
        assert_eq!(parse_status(b"200"), 200);
        assert_eq!(parse_status(b"404"), 404);
        assert_eq!(parse_status(b"20"), 0);
        assert_eq!(parse_status(b"2000"), 0);
        assert_eq!(parse_status(b"-"), 0);

        assert_eq!(parse_bytes(b"0"), 0);
        assert_eq!(parse_bytes(b"12345"), 12345);
        assert_eq!(parse_bytes(b"-"), 0);
        assert_eq!(parse_bytes(b""), 0);
        assert_eq!(parse_bytes(b"99999999999"), 0);
        assert_eq!(parse_bytes(b"9999999999"), u32::MAX);
    }

    #[test]
    fn request_line_split() {
        let (method, uri) = split_request_line(b"GET /index.html HTTP/1.1");
        assert_eq!(method, b"GET");
        assert_eq!(uri, b"/index.html");

        let (method, uri) = split_request_line(b"POST /submit");
        assert_eq!(method, b"POST");
        assert_eq!(uri, b"/submit");

        let (method, uri) = split_request_line(b"WEIRD");
        assert_eq!(method, b"WEIRD");
        assert_eq!(uri, b"");
    }
}
