//! Registry blob parsing.
//!
//! # Format
//! ```text
//! <host> <port>\n
//! <host> <port>\n
//! ```
//! One record per line, exactly one space between fields. Blank lines are
//! skipped and CRLF endings are tolerated. Hosts must be IP addresses
//! (bare or bracketed) or DNS hostnames; anything else would end up
//! verbatim in the proxy configuration.

use thiserror::Error;

use crate::upstream::endpoint::{BackendEndpoint, RegistrationSet};

/// A record that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line_number}: {reason}: {line:?}")]
pub struct MalformedRecord {
    /// 1-based line number within the blob.
    pub line_number: usize,
    /// The offending line as read.
    pub line: String,
    pub reason: &'static str,
}

/// Parse a registry blob into its canonical registration set.
///
/// Any malformed record rejects the whole blob.
pub fn parse(content: &[u8]) -> Result<RegistrationSet, MalformedRecord> {
    let mut endpoints = Vec::new();

    for (idx, raw) in content.split(|b| *b == b'\n').enumerate() {
        let line_number = idx + 1;
        let line = std::str::from_utf8(raw).map_err(|_| MalformedRecord {
            line_number,
            line: String::from_utf8_lossy(raw).into_owned(),
            reason: "not valid UTF-8",
        })?;
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.trim().is_empty() {
            continue;
        }

        endpoints.push(parse_record(line).map_err(|reason| MalformedRecord {
            line_number,
            line: line.to_string(),
            reason,
        })?);
    }

    Ok(endpoints.into_iter().collect())
}

fn parse_record(line: &str) -> Result<BackendEndpoint, &'static str> {
    let mut fields = line.split(' ');
    let (host, port) = match (fields.next(), fields.next(), fields.next()) {
        (Some(host), Some(port), None) if !host.is_empty() && !port.is_empty() => (host, port),
        _ => return Err("expected \"<host> <port>\""),
    };

    let host = BackendEndpoint::canonical_host(host)?;
    let port: u16 = port.parse().map_err(|_| "port is not a valid port number")?;
    if port == 0 {
        return Err("port must be positive");
    }

    Ok(BackendEndpoint::new(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(set: &RegistrationSet) -> Vec<(String, u16)> {
        set.iter().map(|e| (e.host.clone(), e.port)).collect()
    }

    #[test]
    fn test_canonicalizes_input() {
        let set = parse(b"b 2\na 1\na 1").unwrap();
        assert_eq!(endpoints(&set), vec![("a".into(), 1), ("b".into(), 2)]);
    }

    #[test]
    fn test_skips_blank_lines_and_crlf() {
        let set = parse(b"\n10.0.0.2 8080\r\n\n   \n10.0.0.1 8080\n").unwrap();
        assert_eq!(
            endpoints(&set),
            vec![("10.0.0.1".into(), 8080), ("10.0.0.2".into(), 8080)]
        );
    }

    #[test]
    fn test_empty_blob_is_empty_set() {
        assert!(parse(b"").unwrap().is_empty());
        assert!(parse(b"\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_ipv6_hosts() {
        let set = parse(b"fd00::2 443\nfd00::1 443\n").unwrap();
        assert_eq!(set.iter().next().unwrap().host, "fd00::1");
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        let err = parse(b"10.0.0.1 80\n10.0.0.2\n").unwrap_err();
        assert_eq!(err.line_number, 2);
        assert_eq!(err.line, "10.0.0.2");

        let err = parse(b"10.0.0.1 80 extra").unwrap_err();
        assert_eq!(err.line_number, 1);

        // Two spaces yield an empty field.
        assert!(parse(b"10.0.0.1  80").is_err());
    }

    #[test]
    fn test_rejects_bad_ports() {
        assert!(parse(b"10.0.0.1 0").is_err());
        assert!(parse(b"10.0.0.1 -1").is_err());
        assert!(parse(b"10.0.0.1 http").is_err());
        assert!(parse(b"10.0.0.1 70000").is_err());
    }

    #[test]
    fn test_rejects_hosts_that_are_not_addresses() {
        let err = parse(b"10.0.0.1 80\nevil;} 80\n").unwrap_err();
        assert_eq!(err.line_number, 2);
        assert_eq!(err.reason, "host is not an IP address or hostname");

        assert!(parse(b"[backend] 80").is_err());
        assert!(parse(b"back_end 80").is_err());
    }

    #[test]
    fn test_spellings_of_one_address_collapse() {
        let set = parse(b"[fd00::1] 80\nfd00::1 80\nFD00:0::1 80\nWeb.Internal 80\nweb.internal 80\n")
            .unwrap();
        assert_eq!(
            endpoints(&set),
            vec![("fd00::1".into(), 80), ("web.internal".into(), 80)]
        );
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let err = parse(b"10.0.0.1 80\n\xff\xfe 80\n").unwrap_err();
        assert_eq!(err.line_number, 2);
        assert_eq!(err.reason, "not valid UTF-8");
    }

    #[test]
    fn test_error_names_line() {
        let err = parse(b"bogus").unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert!(err.to_string().contains("bogus"));
    }
}
