//! DNS-SD naming scheme for WireGuard peers
//!
//! Given a zone `Z` and an encoded key label `L`:
//!
//! * `_wireguard._udp.Z` enumerates peers through PTR records
//! * `L._wireguard._udp.Z` is the service instance, answered for SRV and
//!   for the A, AAAA and TXT records describing the same peer
//!
//! All names handled here are fully qualified, with a trailing dot.

use crate::dns::protocol::QueryType;

pub const SERVICE_PREFIX: &str = "_wireguard._udp.";
pub const SERVICE_SUB_PREFIX: &str = "._wireguard._udp.";

/// Append the root label if it is missing
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

pub fn enumeration_name(zone: &str) -> String {
    format!("{}{}", SERVICE_PREFIX, fqdn(zone))
}

pub fn instance_name(label: &str, zone: &str) -> String {
    format!("{}{}{}", label, SERVICE_SUB_PREFIX, fqdn(zone))
}

/// Split an instance name into its leading label and its zone
pub fn split_instance_name(name: &str) -> Option<(&str, String)> {
    let name_lower = name.to_ascii_lowercase();
    let idx = name_lower.find(SERVICE_SUB_PREFIX)?;
    if idx == 0 {
        return None;
    }

    let zone = &name[idx + SERVICE_SUB_PREFIX.len()..];
    Some((&name[..idx], fqdn(zone)))
}

/// Remove `zone` from the end of `name`, ignoring case
///
/// Only whole labels match, so `badexample.com.` is not under `example.com.`.
/// The remainder keeps its trailing dot, and is empty for the zone apex.
pub fn strip_zone<'a>(name: &'a str, zone: &str) -> Option<&'a str> {
    if zone == "." {
        return Some(name);
    }
    if name.len() < zone.len() {
        return None;
    }

    let split = name.len() - zone.len();
    let (remainder, suffix) = (name.get(..split)?, name.get(split..)?);
    if !suffix.eq_ignore_ascii_case(zone) {
        return None;
    }
    if !remainder.is_empty() && !remainder.ends_with('.') {
        return None;
    }

    Some(remainder)
}

/// What a query is asking for, judged from the shape of its name
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryShape<'a> {
    /// PTR on the enumeration name
    Enumeration,
    /// SRV on an instance name
    Service { label: &'a str },
    /// A, AAAA or TXT on an instance name
    Host { label: &'a str },
    Unmatched,
}

/// Classify the part of a query name left after stripping the zone
///
/// Instance names are recognized by length: the label must be exactly
/// `label_len` characters followed by the service sub-prefix.
pub fn classify(remainder: &str, qtype: QueryType, label_len: usize) -> QueryShape<'_> {
    if remainder.eq_ignore_ascii_case(SERVICE_PREFIX) {
        return if qtype == QueryType::Ptr {
            QueryShape::Enumeration
        } else {
            QueryShape::Unmatched
        };
    }

    if remainder.len() != label_len + SERVICE_SUB_PREFIX.len() {
        return QueryShape::Unmatched;
    }

    let (label, tail) = match (remainder.get(..label_len), remainder.get(label_len..)) {
        (Some(label), Some(tail)) => (label, tail),
        _ => return QueryShape::Unmatched,
    };
    if !tail.eq_ignore_ascii_case(SERVICE_SUB_PREFIX) {
        return QueryShape::Unmatched;
    }

    match qtype {
        QueryType::Srv => QueryShape::Service { label },
        QueryType::A | QueryType::Aaaa | QueryType::Txt => QueryShape::Host { label },
        _ => QueryShape::Unmatched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABEL: &str = "aiaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa====";

    #[test]
    fn test_name_building() {
        assert_eq!("example.com.", fqdn("example.com"));
        assert_eq!("example.com.", fqdn("example.com."));
        assert_eq!("_wireguard._udp.example.com.", enumeration_name("example.com"));
        assert_eq!(
            format!("{}._wireguard._udp.example.com.", LABEL),
            instance_name(LABEL, "example.com.")
        );
    }

    #[test]
    fn test_split_instance_name() {
        let name = instance_name(LABEL, "example.com.");
        assert_eq!(
            Some((LABEL, "example.com.".to_string())),
            split_instance_name(&name)
        );
        assert_eq!(
            Some(("abc", "example.com.".to_string())),
            split_instance_name("abc._WireGuard._UDP.example.com")
        );
        assert_eq!(None, split_instance_name("_wireguard._udp.example.com."));
        assert_eq!(None, split_instance_name("host.example.com."));
    }

    #[test]
    fn test_strip_zone() {
        assert_eq!(
            Some("_wireguard._udp."),
            strip_zone("_wireguard._udp.Example.COM.", "example.com.")
        );
        assert_eq!(Some(""), strip_zone("example.com.", "example.com."));
        assert_eq!(None, strip_zone("badexample.com.", "example.com."));
        assert_eq!(None, strip_zone("example.org.", "example.com."));
        assert_eq!(Some("a.example.com."), strip_zone("a.example.com.", "."));
    }

    #[test]
    fn test_classify() {
        let instance = format!("{}{}", LABEL, SERVICE_SUB_PREFIX);
        let len = LABEL.len();

        assert_eq!(
            QueryShape::Enumeration,
            classify(SERVICE_PREFIX, QueryType::Ptr, len)
        );
        assert_eq!(
            QueryShape::Unmatched,
            classify(SERVICE_PREFIX, QueryType::Srv, len)
        );
        assert_eq!(
            QueryShape::Service { label: LABEL },
            classify(&instance, QueryType::Srv, len)
        );
        for qtype in &[QueryType::A, QueryType::Aaaa, QueryType::Txt] {
            assert_eq!(
                QueryShape::Host { label: LABEL },
                classify(&instance, *qtype, len)
            );
        }
        assert_eq!(
            QueryShape::Unmatched,
            classify(&instance, QueryType::Ptr, len)
        );

        // one character short
        assert_eq!(
            QueryShape::Unmatched,
            classify(&instance[1..], QueryType::Srv, len)
        );
        // right length, wrong service
        let other = format!("{}._wireguard._tcp.", LABEL);
        assert_eq!(QueryShape::Unmatched, classify(&other, QueryType::Srv, len));
        assert_eq!(QueryShape::Unmatched, classify("", QueryType::Soa, len));
    }

    #[test]
    fn test_classify_truncated_encoder() {
        let instance = "0200aabb._wireguard._udp.";
        assert_eq!(
            QueryShape::Service { label: "0200aabb" },
            classify(instance, QueryType::Srv, 8)
        );
        assert_eq!(QueryShape::Unmatched, classify(instance, QueryType::Srv, 56));
    }
}
