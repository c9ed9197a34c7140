//! Signed record model for the remote append-only log.
//!
//! Every unit of state in Potsync is a **record**: an immutable, signed
//! value with a kind number, a creation timestamp, an ordered tag list and
//! an opaque payload. The current value of a logical entity (a plant pot,
//! its task queue) is always *derived* from the record set, never stored.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PotSyncError, PotSyncResult};

/// Hex-encoded public identity of a record author or owner.
///
/// Identities are 32-byte public keys in lowercase hex. The owner of a plant
/// pot (a human) and the author of its records (the IoT device) are distinct
/// identities of the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicId(String);

impl PublicId {
    /// Parse an identity from a hex string.
    ///
    /// Accepts exactly 64 lowercase hex characters.
    pub fn parse(s: &str) -> PotSyncResult<Self> {
        if s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Ok(Self(s.to_string()))
        } else {
            Err(PotSyncError::Format(format!(
                "identity must be 64 lowercase hex characters, got {:?}",
                s
            )))
        }
    }

    /// Build an identity from raw public key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Raw public key bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        // Infallible: parse() and from_bytes() both guarantee 64 hex chars.
        let decoded = hex::decode(&self.0).expect("PublicId holds valid hex");
        out.copy_from_slice(&decoded);
        out
    }

    /// The identity as a hex string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PublicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PublicId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A record tag: an ordered list of strings where the first element is the
/// tag name and the rest carry data.
///
/// Common tags:
///
/// - `d` – identifier of an addressable entity
/// - `p` – owner public identity (hex)
/// - `a` – address of an addressable entity, `kind:identity:identifier`
/// - `e` – id of another record
/// - `task` – one queued command, `["task", type, duration-seconds]`
///
/// Tags are stored verbatim so unknown tags survive a read-modify-republish
/// cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from name and values.
    pub fn new(name: &str, values: &[&str]) -> Self {
        let mut fields = Vec::with_capacity(values.len() + 1);
        fields.push(name.to_string());
        fields.extend(values.iter().map(|v| v.to_string()));
        Self(fields)
    }

    /// The tag name (first element), if present.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// The first data element (second position), if present.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// Immutable signed record as stored on the relay.
///
/// ```json
/// {
///   "id": "aa11...",
///   "identity": "deadbeef...",
///   "kind": 30000,
///   "created_at": 1700000000,
///   "tags": [["d", "tomato-1"], ["p", "cafe..."], ["task", "water", "30"]],
///   "payload": "AfY...",
///   "signature": "beef..."
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record identifier (hex SHA-256 of the canonical serialization).
    pub id: String,
    /// Author public identity (hex).
    pub identity: PublicId,
    /// Kind number, e.g. `30000` or `5`.
    pub kind: u32,
    /// Unix timestamp of creation (seconds).
    pub created_at: u64,
    /// Ordered tags carrying structured attributes.
    pub tags: Vec<Tag>,
    /// Opaque payload; ciphertext for plant pots.
    pub payload: String,
    /// Signature over the record id (hex).
    pub signature: String,
}

impl Record {
    /// First value of the first tag with the given name.
    ///
    /// Duplicate tags of non-repeatable kinds are tolerated by taking the
    /// first occurrence in tag order.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name() == Some(name))
            .and_then(Tag::value)
    }

    /// The `d`-tag identifier of an addressable record, if present.
    pub fn identifier(&self) -> Option<&str> {
        self.tag_value("d")
    }

    /// Compute the canonical record id for the given unsigned fields.
    ///
    /// The id is the SHA-256 of the JSON array
    /// `[0, identity, created_at, kind, tags, payload]`, hex-encoded.
    pub fn compute_id(
        identity: &PublicId,
        created_at: u64,
        kind: u32,
        tags: &[Tag],
        payload: &str,
    ) -> String {
        let canonical = serde_json::json!([0, identity.as_str(), created_at, kind, tags, payload]);
        let serialized = canonical.to_string();
        let digest = Sha256::digest(serialized.as_bytes());
        hex::encode(digest)
    }
}

/// Unsigned record fields, consumed by a [`Signer`](crate::signer::Signer).
///
/// The signer stamps the author identity, computes the canonical id and
/// attaches the signature, producing a [`Record`].
#[derive(Debug, Clone)]
pub struct RecordDraft {
    /// Kind number of the record to create.
    pub kind: u32,
    /// Unix timestamp of creation (seconds).
    pub created_at: u64,
    /// Ordered tags.
    pub tags: Vec<Tag>,
    /// Opaque payload.
    pub payload: String,
}

/// Address of an addressable (replaceable) entity: `kind:identity:identifier`.
///
/// The exact colon-delimited wire format, with no escaping of colons inside
/// the identifier; parsing splits on the first two colons only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    /// Kind number of the addressable entity.
    pub kind: u32,
    /// Identity component (owner or device, depending on derivation rule).
    pub identity: PublicId,
    /// The `d`-tag identifier.
    pub identifier: String,
}

impl Coordinate {
    /// Build a coordinate.
    pub fn new(kind: u32, identity: PublicId, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identity,
            identifier: identifier.into(),
        }
    }

    /// Parse a coordinate from its `kind:identity:identifier` form.
    pub fn parse(s: &str) -> PotSyncResult<Self> {
        let mut parts = s.splitn(3, ':');
        let kind = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| PotSyncError::Format(format!("invalid coordinate kind in {:?}", s)))?;
        let identity = parts
            .next()
            .ok_or_else(|| PotSyncError::Format(format!("coordinate missing identity: {:?}", s)))
            .and_then(PublicId::parse)?;
        let identifier = parts
            .next()
            .ok_or_else(|| PotSyncError::Format(format!("coordinate missing identifier: {:?}", s)))?
            .to_string();
        Ok(Self {
            kind,
            identity,
            identifier,
        })
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.identity, self.identifier)
    }
}

/// Query filter sent to the relay.
///
/// Serializes to the wire form
/// `{kinds: [...], authors?: [...], '#p'?: [...], '#d'?: [...], '#a'?: [...], limit?: n}`.
/// Tag filters (`#a`) match by prefix when the filter value ends with `:`,
/// mirroring the relay's address-prefix subscription semantics; all other
/// matches are exact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Kind numbers to match.
    pub kinds: Vec<u32>,
    /// Author identities to match (hex).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    /// `p`-tag values to match.
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
    /// `d`-tag values to match.
    #[serde(rename = "#d", skip_serializing_if = "Option::is_none")]
    pub d_tags: Option<Vec<String>>,
    /// `a`-tag values to match (exact, or prefix when ending with `:`).
    #[serde(rename = "#a", skip_serializing_if = "Option::is_none")]
    pub a_tags: Option<Vec<String>>,
    /// Maximum number of records to return, newest first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// Filter on kinds only.
    pub fn kinds(kinds: &[u32]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            ..Default::default()
        }
    }

    /// Restrict to the given authors.
    pub fn authors(mut self, authors: &[&PublicId]) -> Self {
        self.authors = Some(authors.iter().map(|a| a.as_str().to_string()).collect());
        self
    }

    /// Restrict to records carrying one of the given `p` tags.
    pub fn p_tag(mut self, id: &PublicId) -> Self {
        self.p_tags = Some(vec![id.as_str().to_string()]);
        self
    }

    /// Restrict to records carrying one of the given `d` tags.
    pub fn d_tag(mut self, identifier: &str) -> Self {
        self.d_tags = Some(vec![identifier.to_string()]);
        self
    }

    /// Restrict to records carrying a matching `a` tag.
    pub fn a_tag(mut self, address: &str) -> Self {
        self.a_tags = Some(vec![address.to_string()]);
        self
    }

    /// Cap the number of returned records.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record matches this filter.
    ///
    /// `limit` is not applied here; it bounds result sets, not single
    /// records.
    pub fn matches(&self, record: &Record) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&record.kind) {
            return false;
        }
        if let Some(authors) = &self.authors {
            if !authors.iter().any(|a| a == record.identity.as_str()) {
                return false;
            }
        }
        if let Some(values) = &self.p_tags {
            if !Self::tag_matches(record, "p", values, false) {
                return false;
            }
        }
        if let Some(values) = &self.d_tags {
            if !Self::tag_matches(record, "d", values, false) {
                return false;
            }
        }
        if let Some(values) = &self.a_tags {
            if !Self::tag_matches(record, "a", values, true) {
                return false;
            }
        }
        true
    }

    fn tag_matches(record: &Record, name: &str, values: &[String], prefix: bool) -> bool {
        record
            .tags
            .iter()
            .filter(|t| t.name() == Some(name))
            .filter_map(Tag::value)
            .any(|v| {
                values.iter().any(|wanted| {
                    if prefix && wanted.ends_with(':') {
                        v.starts_with(wanted.as_str())
                    } else {
                        v == wanted
                    }
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity(byte: u8) -> PublicId {
        PublicId::from_bytes(&[byte; 32])
    }

    fn record_with_tags(kind: u32, tags: Vec<Tag>) -> Record {
        let identity = test_identity(1);
        let id = Record::compute_id(&identity, 100, kind, &tags, "");
        Record {
            id,
            identity,
            kind,
            created_at: 100,
            tags,
            payload: String::new(),
            signature: String::new(),
        }
    }

    #[test]
    fn test_public_id_parse_rejects_bad_input() {
        assert!(PublicId::parse("abcd").is_err());
        assert!(PublicId::parse(&"A".repeat(64)).is_err());
        assert!(PublicId::parse(&"g".repeat(64)).is_err());
        assert!(PublicId::parse(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_public_id_bytes_roundtrip() {
        let id = test_identity(7);
        assert_eq!(PublicId::from_bytes(&id.to_bytes()), id);
    }

    #[test]
    fn test_tag_value_takes_first_occurrence() {
        let record = record_with_tags(
            30000,
            vec![
                Tag::new("d", &["first"]),
                Tag::new("d", &["second"]),
                Tag::new("p", &["owner"]),
            ],
        );
        assert_eq!(record.tag_value("d"), Some("first"));
        assert_eq!(record.tag_value("missing"), None);
    }

    #[test]
    fn test_compute_id_is_deterministic_and_sensitive() {
        let identity = test_identity(2);
        let tags = vec![Tag::new("d", &["basil"])];
        let a = Record::compute_id(&identity, 100, 30000, &tags, "x");
        let b = Record::compute_id(&identity, 100, 30000, &tags, "x");
        let c = Record::compute_id(&identity, 101, 30000, &tags, "x");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_coordinate_roundtrip() {
        let coord = Coordinate::new(30000, test_identity(3), "tomato-1");
        let parsed = Coordinate::parse(&coord.to_string()).unwrap();
        assert_eq!(parsed, coord);
    }

    #[test]
    fn test_coordinate_identifier_keeps_colons() {
        let identity = test_identity(4);
        let s = format!("30000:{}:herbs:kitchen", identity);
        let coord = Coordinate::parse(&s).unwrap();
        assert_eq!(coord.identifier, "herbs:kitchen");
    }

    #[test]
    fn test_coordinate_parse_rejects_malformed() {
        assert!(Coordinate::parse("not-a-kind:abc:d").is_err());
        assert!(Coordinate::parse("30000").is_err());
        assert!(Coordinate::parse("30000:short").is_err());
    }

    #[test]
    fn test_filter_matches_kind_and_tags() {
        let owner = test_identity(5);
        let record = record_with_tags(
            30000,
            vec![
                Tag::new("d", &["basil"]),
                Tag::new("p", &[owner.as_str()]),
            ],
        );

        assert!(Filter::kinds(&[30000]).matches(&record));
        assert!(!Filter::kinds(&[30001]).matches(&record));
        assert!(Filter::kinds(&[30000]).p_tag(&owner).matches(&record));
        assert!(Filter::kinds(&[30000]).d_tag("basil").matches(&record));
        assert!(!Filter::kinds(&[30000]).d_tag("mint").matches(&record));
    }

    #[test]
    fn test_filter_a_tag_prefix_match() {
        let owner = test_identity(6);
        let address = format!("30000:{}:basil", owner);
        let record = record_with_tags(30001, vec![Tag::new("a", &[&address])]);

        let prefix = format!("30000:{}:", owner);
        assert!(Filter::kinds(&[30001]).a_tag(&prefix).matches(&record));
        assert!(Filter::kinds(&[30001]).a_tag(&address).matches(&record));
        assert!(!Filter::kinds(&[30001]).a_tag("30000:other:").matches(&record));
    }

    #[test]
    fn test_filter_wire_serialization() {
        let owner = test_identity(8);
        let filter = Filter::kinds(&[30000]).p_tag(&owner).limit(10);
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["kinds"], serde_json::json!([30000]));
        assert_eq!(json["#p"], serde_json::json!([owner.as_str()]));
        assert_eq!(json["limit"], serde_json::json!(10));
        assert!(json.get("authors").is_none());
    }
}
