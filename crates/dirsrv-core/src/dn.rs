//! Distinguished names.
//!
//! A `Dn` keeps both the user-provided form and a normalized form. The
//! normalized form keys every RDN component by the attribute type's OID and
//! carries the matching-rule-normalized value, so two spellings of the same
//! name compare equal once normalized. Equality, ordering, hashing and the
//! hierarchy helpers all operate on the normalized form.
//!
//! RDNs are stored leaf first, in the same order as the string form.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DirError, Result};
use crate::schema::SchemaRegistry;

/// Escape an attribute value for the string form of a DN (RFC 4514 section 2.4).
pub fn escape_value(value: &str) -> String {
    let count = value.chars().count();
    let mut escaped = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '#' if i == 0 => escaped.push_str("\\#"),
            ' ' if i == 0 || i == count - 1 => escaped.push_str("\\ "),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// One attribute-type-and-value pair of an RDN.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ava {
    up_type: String,
    up_value: String,
    norm_type: String,
    norm_value: String,
}

impl Ava {
    /// A pair as supplied by the user. Until normalized, the comparison form
    /// is just the lowercased type and value.
    pub fn new(attr_type: &str, value: &str) -> Self {
        let up_type = attr_type.trim().to_string();
        Self {
            norm_type: up_type.to_ascii_lowercase(),
            norm_value: value.trim().to_lowercase(),
            up_type,
            up_value: value.to_string(),
        }
    }

    /// Attribute type as supplied.
    pub fn up_type(&self) -> &str {
        &self.up_type
    }

    /// Value as supplied (unescaped).
    pub fn up_value(&self) -> &str {
        &self.up_value
    }

    /// Attribute type OID once normalized.
    pub fn norm_type(&self) -> &str {
        &self.norm_type
    }

    /// Normalized value.
    pub fn norm_value(&self) -> &str {
        &self.norm_value
    }

    fn normalize(&mut self, schema: &SchemaRegistry) -> Result<()> {
        let at = schema.attribute_type(&self.up_type).ok_or_else(|| {
            DirError::InvalidDnSyntax(format!("unknown attribute type '{}' in RDN", self.up_type))
        })?;
        self.norm_value = schema.normalize_str(&at, &self.up_value)?;
        self.norm_type = at.oid.clone();
        Ok(())
    }

    fn up_string(&self) -> String {
        format!("{}={}", self.up_type, escape_value(&self.up_value))
    }

    fn norm_string(&self) -> String {
        format!("{}={}", self.norm_type, escape_value(&self.norm_value))
    }
}

/// A relative distinguished name: one or more AVAs joined by `+`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rdn {
    avas: Vec<Ava>,
    up: String,
    norm: String,
    normalized: bool,
}

impl Rdn {
    /// Single-valued RDN from a type and an unescaped value.
    pub fn new(attr_type: &str, value: &str) -> Self {
        Self::from_avas(vec![Ava::new(attr_type, value)])
    }

    fn from_avas(avas: Vec<Ava>) -> Self {
        let mut rdn = Self {
            avas,
            up: String::new(),
            norm: String::new(),
            normalized: false,
        };
        rdn.refresh();
        rdn
    }

    fn refresh(&mut self) {
        self.up = self
            .avas
            .iter()
            .map(Ava::up_string)
            .collect::<Vec<_>>()
            .join("+");
        let mut parts: Vec<String> = self.avas.iter().map(Ava::norm_string).collect();
        parts.sort();
        self.norm = parts.join("+");
    }

    /// Parse a single RDN such as `cn=foo` or `cn=foo+uid=bar`.
    pub fn parse(input: &str) -> Result<Self> {
        let mut rdns = Dn::parse(input)?.rdns;
        if rdns.len() != 1 {
            return Err(DirError::InvalidDnSyntax(format!(
                "'{}' is not a single RDN",
                input
            )));
        }
        Ok(rdns.remove(0))
    }

    /// Normalize every AVA against the schema.
    pub fn normalize(&mut self, schema: &SchemaRegistry) -> Result<()> {
        if self.normalized {
            return Ok(());
        }
        for ava in &mut self.avas {
            ava.normalize(schema)?;
        }
        self.refresh();
        self.normalized = true;
        Ok(())
    }

    /// True once normalized against a schema.
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// The AVAs in supplied order.
    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }

    /// User-provided string form.
    pub fn up_string(&self) -> &str {
        &self.up
    }

    /// Normalized string form (AVAs sorted).
    pub fn norm_string(&self) -> &str {
        &self.norm
    }
}

impl PartialEq for Rdn {
    fn eq(&self, other: &Self) -> bool {
        self.norm == other.norm
    }
}

impl Eq for Rdn {}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.up)
    }
}

/// A distinguished name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dn {
    rdns: Vec<Rdn>,
    up_name: String,
    norm_name: String,
    normalized: bool,
}

impl Dn {
    /// The root DSE name (no RDNs).
    pub fn root() -> Self {
        Self::from_rdns(Vec::new(), true)
    }

    fn from_rdns(rdns: Vec<Rdn>, normalized: bool) -> Self {
        let up_name = rdns
            .iter()
            .map(|r| r.up_string())
            .collect::<Vec<_>>()
            .join(",");
        let norm_name = rdns
            .iter()
            .map(|r| r.norm_string())
            .collect::<Vec<_>>()
            .join(",");
        Self {
            rdns,
            up_name,
            norm_name,
            normalized,
        }
    }

    /// Parse the RFC 4514 string form. An empty string is the root DSE.
    pub fn parse(input: &str) -> Result<Self> {
        let chars: Vec<char> = input.trim().chars().collect();
        if chars.is_empty() {
            return Ok(Self::root());
        }
        let mut parser = DnParser {
            input,
            chars,
            pos: 0,
        };
        let rdns = parser.parse()?;
        Ok(Self::from_rdns(rdns, false))
    }

    /// Normalize every RDN against the schema. Already-normalized names are
    /// returned untouched.
    pub fn normalize(&mut self, schema: &SchemaRegistry) -> Result<()> {
        if self.normalized {
            return Ok(());
        }
        for rdn in &mut self.rdns {
            rdn.normalize(schema)?;
        }
        *self = Self::from_rdns(std::mem::take(&mut self.rdns), true);
        Ok(())
    }

    /// Consuming variant of `normalize`.
    pub fn normalized(mut self, schema: &SchemaRegistry) -> Result<Self> {
        self.normalize(schema)?;
        Ok(self)
    }

    /// True once normalized against a schema.
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// User-provided form.
    pub fn up_name(&self) -> &str {
        &self.up_name
    }

    /// Normalized form, the key used by caches and the backend.
    pub fn norm_name(&self) -> &str {
        &self.norm_name
    }

    /// RDNs, leaf first.
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// The leaf RDN.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// Number of RDNs.
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    /// True for the root DSE.
    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Same as `is_root`.
    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// The immediate superior. The root is its own parent.
    pub fn parent(&self) -> Dn {
        if self.rdns.is_empty() {
            return self.clone();
        }
        Self::from_rdns(self.rdns[1..].to_vec(), self.normalized)
    }

    /// A name one level below this one.
    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        let normalized = self.normalized && rdns[0].normalized;
        Self::from_rdns(rdns, normalized)
    }

    /// `relative` placed below this name: `join("ou=a", "cn=b")` is `cn=b,ou=a`.
    pub fn join(&self, relative: &Dn) -> Dn {
        let mut rdns = relative.rdns.clone();
        rdns.extend(self.rdns.iter().cloned());
        Self::from_rdns(rdns, self.normalized && relative.normalized)
    }

    fn tail_matches(&self, ancestor: &Dn) -> bool {
        let offset = self.rdns.len() - ancestor.rdns.len();
        self.rdns[offset..]
            .iter()
            .zip(ancestor.rdns.iter())
            .all(|(a, b)| a == b)
    }

    /// Strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
        self.rdns.len() > ancestor.rdns.len() && self.tail_matches(ancestor)
    }

    /// Equal to or below `ancestor`.
    pub fn is_within(&self, ancestor: &Dn) -> bool {
        self.rdns.len() >= ancestor.rdns.len() && self.tail_matches(ancestor)
    }

    /// Number of levels between `ancestor` and this name, if within it.
    pub fn depth_below(&self, ancestor: &Dn) -> Option<usize> {
        if self.is_within(ancestor) {
            Some(self.rdns.len() - ancestor.rdns.len())
        } else {
            None
        }
    }

    /// Replace the `from` suffix with `to`. `None` if not within `from`.
    pub fn rebase(&self, from: &Dn, to: &Dn) -> Option<Dn> {
        if !self.is_within(from) {
            return None;
        }
        let keep = self.rdns.len() - from.rdns.len();
        let mut rdns = self.rdns[..keep].to_vec();
        rdns.extend(to.rdns.iter().cloned());
        Some(Self::from_rdns(rdns, self.normalized && to.normalized))
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.norm_name == other.norm_name
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.norm_name.hash(state);
    }
}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.norm_name.cmp(&other.norm_name)
    }
}

impl Default for Dn {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.up_name)
    }
}

impl FromStr for Dn {
    type Err = DirError;

    fn from_str(s: &str) -> Result<Self> {
        Dn::parse(s)
    }
}

struct DnParser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> DnParser<'a> {
    fn error(&self, msg: &str) -> DirError {
        DirError::InvalidDnSyntax(format!("{} at position {} in '{}'", msg, self.pos, self.input))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(' ') {
            self.pos += 1;
        }
    }

    fn parse(&mut self) -> Result<Vec<Rdn>> {
        let mut rdns = Vec::new();
        loop {
            let mut avas = Vec::new();
            loop {
                avas.push(self.parse_ava()?);
                if self.peek() == Some('+') {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            rdns.push(Rdn::from_avas(avas));
            match self.peek() {
                None => return Ok(rdns),
                Some(',') | Some(';') => {
                    self.pos += 1;
                    self.skip_spaces();
                    if self.peek().is_none() {
                        return Err(self.error("empty RDN"));
                    }
                }
                Some(_) => return Err(self.error("expected ',' or '+'")),
            }
        }
    }

    fn parse_ava(&mut self) -> Result<Ava> {
        self.skip_spaces();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '=' {
                break;
            }
            if !(c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ' ') {
                return Err(self.error("invalid character in attribute type"));
            }
            self.pos += 1;
        }
        let attr_type: String = self.chars[start..self.pos].iter().collect();
        let attr_type = attr_type.trim().to_string();
        if attr_type.is_empty() || attr_type.contains(' ') {
            return Err(self.error("missing or malformed attribute type"));
        }
        if self.peek() != Some('=') {
            return Err(self.error("expected '='"));
        }
        self.pos += 1;
        self.skip_spaces();
        let value = match self.peek() {
            Some('"') => self.parse_quoted_value()?,
            Some('#') => self.parse_hex_value(),
            _ => self.parse_string_value()?,
        };
        Ok(Ava::new(&attr_type, &value))
    }

    fn parse_quoted_value(&mut self) -> Result<String> {
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated quoted value")),
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    self.pos += 1;
                    let c = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    value.push(c);
                    self.pos += 1;
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
        self.skip_spaces();
        Ok(value)
    }

    fn parse_hex_value(&mut self) -> String {
        let start = self.pos;
        self.pos += 1;
        while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            self.pos += 1;
        }
        let value = self.chars[start..self.pos].iter().collect();
        self.skip_spaces();
        value
    }

    fn parse_string_value(&mut self) -> Result<String> {
        let mut bytes: Vec<u8> = Vec::new();
        // Length up to the last character that must be kept; unescaped
        // trailing spaces are dropped.
        let mut keep = 0;
        let mut buf = [0u8; 4];
        while let Some(c) = self.peek() {
            match c {
                ',' | ';' | '+' => break,
                '\\' => {
                    self.pos += 1;
                    let next = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    let hex_pair = self
                        .chars
                        .get(self.pos + 1)
                        .filter(|c2| next.is_ascii_hexdigit() && c2.is_ascii_hexdigit());
                    if let Some(&second) = hex_pair {
                        let byte = u8::from_str_radix(&format!("{}{}", next, second), 16)
                            .map_err(|_| self.error("bad hex escape"))?;
                        bytes.push(byte);
                        self.pos += 2;
                    } else {
                        bytes.extend_from_slice(next.encode_utf8(&mut buf).as_bytes());
                        self.pos += 1;
                    }
                    keep = bytes.len();
                }
                _ => {
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    if c != ' ' {
                        keep = bytes.len();
                    }
                    self.pos += 1;
                }
            }
        }
        bytes.truncate(keep);
        String::from_utf8(bytes).map_err(|_| self.error("escaped bytes are not valid UTF-8"))
    }
}
