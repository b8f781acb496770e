//! Scanner record types and their wire formats.
//!
//! Two dump formats are understood:
//!
//! - **rapid7-fdns**: one DNS resolution per line,
//!   `{"timestamp": "...", "name": "...", "type": "a", "value": "1.2.3.4"}`
//! - **rapid7-http**: one HTTP response per line,
//!   `{"ip": "...", "data": {"http": {"response": {"body": "...", "headers": {...}}}}}`
//!
//! HTTP header maps carry an `"unknown"` bucket holding headers the scanner
//! did not recognise, as a list of `{key, value}` entries. The bucket is
//! flattened while decoding, so a [`Headers`] value never contains it.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Header key under which the scanner stores unrecognised headers.
pub const UNKNOWN_BUCKET: &str = "unknown";

/// A single DNS resolution record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsEntry {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub record_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub value: String,
}

/// Read a string field, treating `null` like a missing one.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl DnsEntry {
    /// Create an entry with only a name and value set.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Self::default()
        }
    }
}

/// HTTP response headers, name to ordered values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append values to a header, creating it if missing.
    pub fn append(&mut self, name: impl Into<String>, values: impl IntoIterator<Item = String>) {
        self.0.entry(name.into()).or_default().extend(values);
    }

    /// Get the values of a header.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    /// Check whether a header is present.
    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterate over headers in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Vec<String>)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, Vec<String>)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, values) in iter {
            headers.append(name, values);
        }
        headers
    }
}

/// Header values on the wire are either a single string or a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

impl HeaderValues {
    fn from_value<E: de::Error>(value: serde_json::Value) -> Result<Vec<String>, E> {
        if value.is_null() {
            return Ok(Vec::new());
        }
        match serde_json::from_value(value).map_err(E::custom)? {
            HeaderValues::One(v) => Ok(vec![v]),
            HeaderValues::Many(v) => Ok(v),
        }
    }
}

/// Entry of the `"unknown"` bucket.
#[derive(Deserialize)]
struct UnknownHeader {
    key: String,
    #[serde(alias = "value", default)]
    values: serde_json::Value,
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_option(HeadersVisitor)
    }
}

/// Folds header entries in the order they appear on the wire.
struct HeadersVisitor;

impl<'de> de::Visitor<'de> for HeadersVisitor {
    type Value = Headers;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a header map or null")
    }

    fn visit_none<E: de::Error>(self) -> Result<Headers, E> {
        Ok(Headers::new())
    }

    fn visit_unit<E: de::Error>(self) -> Result<Headers, E> {
        Ok(Headers::new())
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Headers, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(HeadersVisitor)
    }

    fn visit_map<A>(self, mut map: A) -> Result<Headers, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut headers = Headers::new();

        while let Some((name, value)) = map.next_entry::<String, serde_json::Value>()? {
            if name == UNKNOWN_BUCKET {
                if value.is_null() {
                    continue;
                }
                let entries: Vec<UnknownHeader> =
                    serde_json::from_value(value).map_err(de::Error::custom)?;
                for entry in entries {
                    let values = HeaderValues::from_value::<A::Error>(entry.values)?;
                    headers.append(entry.key, values);
                }
            } else {
                let values = HeaderValues::from_value::<A::Error>(value)?;
                headers.append(name, values);
            }
        }

        Ok(headers)
    }
}

/// A single HTTP response record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HostWire")]
pub struct HostRecord {
    pub address: String,
    pub body: String,
    pub headers: Headers,
}

#[derive(Deserialize)]
struct HostWire {
    #[serde(default, deserialize_with = "null_as_empty")]
    ip: String,
    #[serde(default)]
    data: Option<HostData>,
}

#[derive(Deserialize)]
struct HostData {
    #[serde(default)]
    http: Option<HttpData>,
}

#[derive(Deserialize)]
struct HttpData {
    #[serde(default)]
    response: Option<HttpResponse>,
}

#[derive(Deserialize)]
struct HttpResponse {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    headers: Headers,
}

impl From<HostWire> for HostRecord {
    fn from(wire: HostWire) -> Self {
        let response = wire
            .data
            .and_then(|d| d.http)
            .and_then(|h| h.response);

        let (body, headers) = match response {
            Some(r) => (r.body.unwrap_or_default(), r.headers),
            None => (String::new(), Headers::new()),
        };

        Self {
            address: wire.ip,
            body,
            headers,
        }
    }
}

/// A decoded scanner record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Dns(DnsEntry),
    Host(HostRecord),
}

impl Record {
    /// Domain name carried by the record (empty for HTTP hosts).
    pub fn domain(&self) -> &str {
        match self {
            Record::Dns(entry) => &entry.name,
            Record::Host(_) => "",
        }
    }

    /// IP address carried by the record, if its value parses as one.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Record::Dns(entry) => entry.value.parse().ok(),
            Record::Host(host) => host.address.parse().ok(),
        }
    }

    /// Key written to the store's hostname column.
    pub fn hostname(&self) -> &str {
        match self {
            Record::Dns(entry) => &entry.name,
            Record::Host(host) => &host.address,
        }
    }
}

impl From<DnsEntry> for Record {
    fn from(entry: DnsEntry) -> Self {
        Record::Dns(entry)
    }
}

impl From<HostRecord> for Record {
    fn from(host: HostRecord) -> Self {
        Record::Host(host)
    }
}

/// Input dump format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputFormat {
    /// Rapid7 forward DNS dump
    Rapid7Fdns,
    /// Rapid7 HTTP GET dump
    Rapid7Http,
}

impl InputFormat {
    /// Get the name used on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            InputFormat::Rapid7Fdns => "rapid7-fdns",
            InputFormat::Rapid7Http => "rapid7-http",
        }
    }

    /// Decode one line in this format.
    pub fn decode(&self, line: &[u8]) -> serde_json::Result<Record> {
        match self {
            InputFormat::Rapid7Fdns => serde_json::from_slice::<DnsEntry>(line).map(Record::Dns),
            InputFormat::Rapid7Http => serde_json::from_slice::<HostRecord>(line).map(Record::Host),
        }
    }
}

impl FromStr for InputFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "rapid7-fdns" | "fdns" => Ok(InputFormat::Rapid7Fdns),
            "rapid7-http" | "http" => Ok(InputFormat::Rapid7Http),
            other => Err(crate::Error::Config(format!("unknown input format: {}", other))),
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_dns_entry() {
        let line = br#"{"timestamp":"1490000000","name":"a.example.com","type":"a","value":"10.0.0.5"}"#;
        let record = InputFormat::Rapid7Fdns.decode(line).unwrap();

        assert_eq!(record.domain(), "a.example.com");
        assert_eq!(record.ip(), Some("10.0.0.5".parse().unwrap()));
        match record {
            Record::Dns(entry) => assert_eq!(entry.record_type, "a"),
            Record::Host(_) => panic!("expected DNS entry"),
        }
    }

    #[test]
    fn test_dns_cname_has_no_ip() {
        let record = Record::Dns(DnsEntry::new("www.example.com", "example.com"));
        assert_eq!(record.ip(), None);
        assert_eq!(record.hostname(), "www.example.com");
    }

    #[test]
    fn test_unknown_headers_flattened() {
        let line = br#"{"ip":"192.0.2.1","data":{"http":{"response":{"body":"<html></html>","headers":{"server":["nginx"],"unknown":[{"key":"X-Custom","values":["1"]}]}}}}}"#;
        let record = InputFormat::Rapid7Http.decode(line).unwrap();

        let host = match record {
            Record::Host(host) => host,
            Record::Dns(_) => panic!("expected host record"),
        };
        assert_eq!(host.address, "192.0.2.1");
        assert_eq!(host.body, "<html></html>");
        assert_eq!(host.headers.get("X-Custom"), Some(&["1".to_string()][..]));
        assert_eq!(host.headers.get("server"), Some(&["nginx".to_string()][..]));
        assert!(!host.headers.contains_key(UNKNOWN_BUCKET));
        assert_eq!(host.headers.len(), 2);
    }

    #[test]
    fn test_unknown_header_single_value_form() {
        let json = r#"{"unknown":[{"key":"X-Powered-By","value":"PHP/7.0"}],"server":"Apache"}"#;
        let headers: Headers = serde_json::from_str(json).unwrap();

        assert_eq!(headers.get("X-Powered-By"), Some(&["PHP/7.0".to_string()][..]));
        assert_eq!(headers.get("server"), Some(&["Apache".to_string()][..]));
    }

    #[test]
    fn test_unknown_header_merges_existing_key() {
        let json = r#"{"x-a":["1"],"unknown":[{"key":"x-a","values":["2"]}]}"#;
        let headers: Headers = serde_json::from_str(json).unwrap();
        assert_eq!(headers.get("x-a").unwrap(), &["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_unknown_header_merge_follows_wire_order() {
        let json = r#"{"unknown":[{"key":"x-a","values":["2"]}],"x-a":["1"]}"#;
        let headers: Headers = serde_json::from_str(json).unwrap();
        assert_eq!(headers.get("x-a").unwrap(), &["2".to_string(), "1".to_string()]);

        let json = r#"{"Set-Cookie":["a=1"],"unknown":[{"key":"Set-Cookie","value":"b=2"}],"Server":"nginx"}"#;
        let headers: Headers = serde_json::from_str(json).unwrap();
        assert_eq!(
            headers.get("Set-Cookie").unwrap(),
            &["a=1".to_string(), "b=2".to_string()]
        );
    }

    #[test]
    fn test_null_headers_are_empty() {
        let headers: Headers = serde_json::from_str("null").unwrap();
        assert!(headers.is_empty());

        let line = br#"{"ip":"192.0.2.9","data":{"http":{"response":{"body":null,"headers":null}}}}"#;
        match InputFormat::Rapid7Http.decode(line).unwrap() {
            Record::Host(host) => {
                assert!(host.body.is_empty());
                assert!(host.headers.is_empty());
            }
            Record::Dns(_) => panic!("expected host record"),
        }
    }

    #[test]
    fn test_null_dns_fields_are_empty() {
        let line = br#"{"timestamp":null,"name":"www.example.com","type":"cname","value":null}"#;
        let record = InputFormat::Rapid7Fdns.decode(line).unwrap();

        assert_eq!(record.domain(), "www.example.com");
        assert_eq!(record.ip(), None);
        match record {
            Record::Dns(entry) => {
                assert_eq!(entry.timestamp, "");
                assert_eq!(entry.record_type, "cname");
                assert_eq!(entry.value, "");
            }
            Record::Host(_) => panic!("expected DNS entry"),
        }

        let record = InputFormat::Rapid7Http.decode(br#"{"ip":null}"#).unwrap();
        assert_eq!(record.hostname(), "");
    }

    #[test]
    fn test_host_without_response() {
        let record = InputFormat::Rapid7Http.decode(br#"{"ip":"198.51.100.7"}"#).unwrap();
        assert_eq!(record.hostname(), "198.51.100.7");
        assert_eq!(record.domain(), "");
        match record {
            Record::Host(host) => {
                assert!(host.body.is_empty());
                assert!(host.headers.is_empty());
            }
            Record::Dns(_) => panic!("expected host record"),
        }
    }

    #[test]
    fn test_host_serializes_flat_headers() {
        let line = br#"{"ip":"192.0.2.1","data":{"http":{"response":{"headers":{"unknown":[{"key":"X-Custom","values":["1"]}]}}}}}"#;
        let record = InputFormat::Rapid7Http.decode(line).unwrap();
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["address"], "192.0.2.1");
        assert_eq!(json["headers"]["X-Custom"][0], "1");
        assert!(json["headers"].get(UNKNOWN_BUCKET).is_none());
    }

    #[test]
    fn test_malformed_line_is_error() {
        assert!(InputFormat::Rapid7Fdns.decode(b"{not json").is_err());
    }

    #[test]
    fn test_input_format_from_str() {
        assert_eq!("rapid7-fdns".parse::<InputFormat>().unwrap(), InputFormat::Rapid7Fdns);
        assert_eq!("RAPID7-HTTP".parse::<InputFormat>().unwrap(), InputFormat::Rapid7Http);
        assert!("csv".parse::<InputFormat>().is_err());
    }
}
