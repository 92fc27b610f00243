//! Search filters (RFC 4515 string form).
//!
//! Filters are parsed into an expression tree, normalized against the schema
//! (attribute descriptions become OIDs, assertion values become normalized
//! values) and evaluated against normalized entries by the backend.
//!
//! Normalization drops every node that references an attribute type the
//! schema does not know. If nothing resolvable is left the whole filter
//! collapses to `Filter::Undefined`, which matches no entry.

use std::fmt;

use crate::entry::{Entry, Value};
use crate::error::{DirError, Result};
use crate::schema::{oids, SchemaRegistry};

/// A search filter expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    /// `(&...)`, true when empty.
    And(Vec<Filter>),
    /// `(|...)`, false when empty.
    Or(Vec<Filter>),
    /// `(!...)`
    Not(Box<Filter>),
    /// `(attr=value)`
    Equality {
        /// Attribute description (OID once normalized).
        attr: String,
        /// Assertion value.
        value: Value,
    },
    /// `(attr=ini*any*fin)`
    Substring {
        /// Attribute description.
        attr: String,
        /// Leading fragment.
        initial: Option<String>,
        /// Middle fragments, in order.
        any: Vec<String>,
        /// Trailing fragment.
        last: Option<String>,
    },
    /// `(attr>=value)`
    GreaterOrEqual {
        /// Attribute description.
        attr: String,
        /// Assertion value.
        value: Value,
    },
    /// `(attr<=value)`
    LessOrEqual {
        /// Attribute description.
        attr: String,
        /// Assertion value.
        value: Value,
    },
    /// `(attr~=value)`, evaluated as equality.
    Approx {
        /// Attribute description.
        attr: String,
        /// Assertion value.
        value: Value,
    },
    /// `(attr=*)`
    Present {
        /// Attribute description.
        attr: String,
    },
    /// Nothing resolvable; matches no entry.
    Undefined,
}

impl Filter {
    /// `(attr=*)`
    pub fn present(attr: &str) -> Self {
        Filter::Present {
            attr: attr.to_string(),
        }
    }

    /// `(attr=value)`
    pub fn equality(attr: &str, value: &str) -> Self {
        Filter::Equality {
            attr: attr.to_string(),
            value: Value::text(value),
        }
    }

    /// Parse the string form. A bare `attr=value` without parentheses is
    /// accepted.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let text = if trimmed.starts_with('(') {
            trimmed.to_string()
        } else {
            format!("({})", trimmed)
        };
        let mut parser = FilterParser {
            chars: text.chars().collect(),
            pos: 0,
            depth: 0,
        };
        let filter = parser.parse_filter()?;
        parser.skip_whitespace();
        if parser.pos != parser.chars.len() {
            return Err(DirError::InvalidFilter(format!(
                "unexpected trailing input in '{}'",
                input
            )));
        }
        Ok(filter)
    }

    /// True for the empty-result sentinel.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Filter::Undefined)
    }

    /// Resolve attribute descriptions and normalize assertion values.
    pub fn normalize(&self, schema: &SchemaRegistry) -> Filter {
        self.normalize_node(schema).unwrap_or(Filter::Undefined)
    }

    fn normalize_node(&self, schema: &SchemaRegistry) -> Option<Filter> {
        match self {
            Filter::And(children) if children.is_empty() => Some(Filter::And(Vec::new())),
            Filter::Or(children) if children.is_empty() => Some(Filter::Or(Vec::new())),
            Filter::And(children) => {
                let kept: Vec<Filter> = children
                    .iter()
                    .filter_map(|c| c.normalize_node(schema))
                    .collect();
                (!kept.is_empty()).then_some(Filter::And(kept))
            }
            Filter::Or(children) => {
                let kept: Vec<Filter> = children
                    .iter()
                    .filter_map(|c| c.normalize_node(schema))
                    .collect();
                (!kept.is_empty()).then_some(Filter::Or(kept))
            }
            Filter::Not(inner) => inner
                .normalize_node(schema)
                .map(|f| Filter::Not(Box::new(f))),
            Filter::Equality { attr, value } => {
                let (attr, value) = normalize_assertion(schema, attr, value)?;
                Some(Filter::Equality { attr, value })
            }
            Filter::GreaterOrEqual { attr, value } => {
                let (attr, value) = normalize_assertion(schema, attr, value)?;
                Some(Filter::GreaterOrEqual { attr, value })
            }
            Filter::LessOrEqual { attr, value } => {
                let (attr, value) = normalize_assertion(schema, attr, value)?;
                Some(Filter::LessOrEqual { attr, value })
            }
            Filter::Approx { attr, value } => {
                let (attr, value) = normalize_assertion(schema, attr, value)?;
                Some(Filter::Approx { attr, value })
            }
            Filter::Substring {
                attr,
                initial,
                any,
                last,
            } => {
                let at = resolve(schema, attr)?;
                let fold = |s: &String| s.to_lowercase();
                Some(Filter::Substring {
                    attr: at,
                    initial: initial.as_ref().map(fold),
                    any: any.iter().map(fold).collect(),
                    last: last.as_ref().map(fold),
                })
            }
            Filter::Present { attr } => Some(Filter::Present {
                attr: resolve(schema, attr)?,
            }),
            Filter::Undefined => None,
        }
    }

    /// Evaluate against a normalized entry.
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|c| c.matches(entry)),
            Filter::Or(children) => children.iter().any(|c| c.matches(entry)),
            Filter::Not(inner) => !inner.matches(entry),
            Filter::Equality { attr, value } | Filter::Approx { attr, value } => entry
                .get(attr)
                .is_some_and(|a| a.contains_value(value)),
            Filter::GreaterOrEqual { attr, value } => {
                compare_any(entry, attr, value, |o| o != std::cmp::Ordering::Less)
            }
            Filter::LessOrEqual { attr, value } => {
                compare_any(entry, attr, value, |o| o != std::cmp::Ordering::Greater)
            }
            Filter::Substring {
                attr,
                initial,
                any,
                last,
            } => entry.get(attr).is_some_and(|a| {
                a.values().iter().filter_map(Value::norm_str).any(|v| {
                    substring_match(&v.to_lowercase(), initial.as_deref(), any, last.as_deref())
                })
            }),
            Filter::Present { attr } => {
                entry.get(attr).is_some()
                    || attr == oids::OBJECT_CLASS
                    || attr.eq_ignore_ascii_case("objectclass")
            }
            Filter::Undefined => false,
        }
    }
}

fn resolve(schema: &SchemaRegistry, attr: &str) -> Option<String> {
    match schema.attribute_type(attr) {
        Some(at) => Some(at.oid.clone()),
        None => {
            tracing::debug!(attr = %attr, "dropping filter node with undefined attribute type");
            None
        }
    }
}

fn normalize_assertion(
    schema: &SchemaRegistry,
    attr: &str,
    value: &Value,
) -> Option<(String, Value)> {
    let at = schema.attribute_type(attr)?;
    match schema.normalize_value(&at, value) {
        Ok(value) => Some((at.oid.clone(), value)),
        Err(e) => {
            tracing::debug!(attr = %attr, "dropping filter node with invalid assertion: {}", e);
            None
        }
    }
}

fn compare_any(
    entry: &Entry,
    attr: &str,
    value: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    let Some(wanted) = value.norm_str() else {
        return false;
    };
    entry.get(attr).is_some_and(|a| {
        a.values().iter().filter_map(Value::norm_str).any(|have| {
            let ordering = match (have.parse::<i64>(), wanted.parse::<i64>()) {
                (Ok(h), Ok(w)) => h.cmp(&w),
                _ => have.cmp(wanted),
            };
            accept(ordering)
        })
    })
}

fn substring_match(value: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let mut rest = value;
    if let Some(initial) = initial {
        match rest.strip_prefix(initial) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for fragment in any {
        match rest.find(fragment.as_str()) {
            Some(idx) => rest = &rest[idx + fragment.len()..],
            None => return false,
        }
    }
    match last {
        Some(last) => rest.ends_with(last),
        None => true,
    }
}

fn escape_assertion(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(children) => {
                write!(f, "(&")?;
                for c in children {
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Filter::Or(children) => {
                write!(f, "(|")?;
                for c in children {
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Filter::Not(inner) => write!(f, "(!{})", inner),
            Filter::Equality { attr, value } => {
                write!(f, "({}={})", attr, escape_assertion(&value.to_string()))
            }
            Filter::GreaterOrEqual { attr, value } => {
                write!(f, "({}>={})", attr, escape_assertion(&value.to_string()))
            }
            Filter::LessOrEqual { attr, value } => {
                write!(f, "({}<={})", attr, escape_assertion(&value.to_string()))
            }
            Filter::Approx { attr, value } => {
                write!(f, "({}~={})", attr, escape_assertion(&value.to_string()))
            }
            Filter::Substring {
                attr,
                initial,
                any,
                last,
            } => {
                write!(f, "({}=", attr)?;
                if let Some(i) = initial {
                    write!(f, "{}", escape_assertion(i))?;
                }
                write!(f, "*")?;
                for a in any {
                    write!(f, "{}*", escape_assertion(a))?;
                }
                if let Some(l) = last {
                    write!(f, "{}", escape_assertion(l))?;
                }
                write!(f, ")")
            }
            Filter::Present { attr } => write!(f, "({}=*)", attr),
            Filter::Undefined => write!(f, "(undefined)"),
        }
    }
}

/// Deepest `&`, `|` and `!` nesting accepted by the parser.
pub const MAX_FILTER_DEPTH: usize = 64;

/// Recursive-descent parser over the RFC 4515 grammar.
struct FilterParser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl FilterParser {
    fn error(&self, msg: &str) -> DirError {
        let text: String = self.chars.iter().collect();
        DirError::InvalidFilter(format!("{} at position {} in '{}'", msg, self.pos, text))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_whitespace();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn parse_filter(&mut self) -> Result<Filter> {
        self.expect('(')?;
        self.depth += 1;
        if self.depth > MAX_FILTER_DEPTH {
            return Err(self.error(&format!("nesting deeper than {}", MAX_FILTER_DEPTH)));
        }
        self.skip_whitespace();
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some('!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.expect(')')?;
        self.depth -= 1;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>> {
        let mut list = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some('(') {
                list.push(self.parse_filter()?);
            } else {
                return Ok(list);
            }
        }
    }

    fn parse_item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '>' | '<' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let attr: String = self.chars[start..self.pos].iter().collect();
        let attr = attr.trim().to_string();
        if attr.is_empty() {
            return Err(self.error("missing attribute description"));
        }
        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                '='
            }
            Some(c @ ('~' | '>' | '<')) => {
                self.pos += 1;
                if self.peek() != Some('=') {
                    return Err(self.error("expected '=' after comparison operator"));
                }
                self.pos += 1;
                c
            }
            _ => return Err(self.error("expected filter operator")),
        };
        let segments = self.parse_value_segments()?;
        match op {
            '=' if segments.len() == 1 => Ok(Filter::Equality {
                attr,
                value: Value::text(&segments[0]),
            }),
            '=' if segments.len() == 2 && segments.iter().all(String::is_empty) => {
                Ok(Filter::Present { attr })
            }
            '=' => {
                let last_index = segments.len() - 1;
                let non_empty = |s: &String| (!s.is_empty()).then(|| s.clone());
                Ok(Filter::Substring {
                    attr,
                    initial: non_empty(&segments[0]),
                    any: segments[1..last_index]
                        .iter()
                        .filter(|s| !s.is_empty())
                        .cloned()
                        .collect(),
                    last: non_empty(&segments[last_index]),
                })
            }
            _ if segments.len() != 1 => Err(self.error("wildcard not allowed here")),
            '~' => Ok(Filter::Approx {
                attr,
                value: Value::text(&segments[0]),
            }),
            '>' => Ok(Filter::GreaterOrEqual {
                attr,
                value: Value::text(&segments[0]),
            }),
            _ => Ok(Filter::LessOrEqual {
                attr,
                value: Value::text(&segments[0]),
            }),
        }
    }

    /// Read an assertion value up to the closing parenthesis, splitting on
    /// unescaped `*` and decoding `\XX` escapes.
    fn parse_value_segments(&mut self) -> Result<Vec<String>> {
        let mut segments = Vec::new();
        let mut current: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated assertion value")),
                Some(')') => break,
                Some('(') => return Err(self.error("unescaped '(' in assertion value")),
                Some('*') => {
                    self.pos += 1;
                    segments.push(self.finish_segment(&mut current)?);
                }
                Some('\\') => {
                    let hex: String = self.chars.iter().skip(self.pos + 1).take(2).collect();
                    let byte = u8::from_str_radix(&hex, 16)
                        .ok()
                        .filter(|_| hex.len() == 2)
                        .ok_or_else(|| self.error("invalid escape"))?;
                    current.push(byte);
                    self.pos += 3;
                }
                Some(c) => {
                    current.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    self.pos += 1;
                }
            }
        }
        segments.push(self.finish_segment(&mut current)?);
        Ok(segments)
    }

    fn finish_segment(&self, current: &mut Vec<u8>) -> Result<String> {
        String::from_utf8(std::mem::take(current))
            .map_err(|_| self.error("assertion value is not valid UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> SchemaRegistry {
        SchemaRegistry::bootstrap()
    }

    fn entry() -> Entry {
        let mut e = Entry::named("cn=John Doe,ou=users,ou=system")
            .unwrap()
            .with("objectClass", ["top", "person"])
            .with("cn", ["John Doe"])
            .with("sn", ["Doe"])
            .with("telephoneNumber", ["+1 555 0100"]);
        e.normalize(&schema()).unwrap();
        e
    }

    #[test]
    fn test_parse_nested() {
        let f = Filter::parse("(&(objectClass=person)(|(cn=John*)(!(sn=Smith))))").unwrap();
        match f {
            Filter::And(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[1], Filter::Or(_)));
            }
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bare_and_present() {
        assert_eq!(
            Filter::parse("objectClass=*").unwrap(),
            Filter::present("objectClass")
        );
    }

    #[test]
    fn test_parse_substring_and_escape() {
        let f = Filter::parse("(cn=J*n\\2a*e)").unwrap();
        assert_eq!(
            f,
            Filter::Substring {
                attr: "cn".into(),
                initial: Some("J".into()),
                any: vec!["n*".into()],
                last: Some("e".into()),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["(cn=foo", "(=foo)", "(cn>foo)", "(&(cn=a)", "(cn=a))", "(cn>=a*)"] {
            match Filter::parse(bad) {
                Err(DirError::InvalidFilter(_)) => {}
                other => panic!("expected InvalidFilter for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_nesting_depth_is_bounded() {
        let nested = |n: usize| format!("{}(cn=x){}", "(!".repeat(n), ")".repeat(n));
        assert!(Filter::parse(&nested(MAX_FILTER_DEPTH - 1)).is_ok());

        match Filter::parse(&nested(50_000)) {
            Err(DirError::InvalidFilter(_)) => {}
            other => panic!("expected InvalidFilter, got {:?}", other.map(|_| ())),
        }
        let deep_and = format!("{}(cn=x){}", "(&".repeat(MAX_FILTER_DEPTH), ")".repeat(MAX_FILTER_DEPTH));
        match Filter::parse(&deep_and) {
            Err(DirError::InvalidFilter(_)) => {}
            other => panic!("expected InvalidFilter, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_normalize_drops_unknown_nodes() {
        let schema = schema();
        let f = Filter::parse("(&(cn=JOHN DOE)(shoeSize=9))").unwrap().normalize(&schema);
        assert_eq!(
            f,
            Filter::And(vec![Filter::Equality {
                attr: oids::CN.into(),
                value: Value::normalized("JOHN DOE", "john doe"),
            }])
        );
    }

    #[test]
    fn test_normalize_collapses_to_undefined() {
        let schema = schema();
        let f = Filter::parse("(|(shoeSize=9)(!(hatSize=3)))").unwrap().normalize(&schema);
        assert!(f.is_undefined());
        assert!(!f.matches(&entry()));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let schema = schema();
        let once = Filter::parse("(&(CN=John*)(telephoneNumber>=1 555)(objectClass=PERSON))")
            .unwrap()
            .normalize(&schema);
        let twice = once.normalize(&schema);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_matches() {
        let schema = schema();
        let e = entry();
        let check = |s: &str| Filter::parse(s).unwrap().normalize(&schema).matches(&e);
        assert!(check("(cn=john doe)"));
        assert!(check("(cn=Jo*Do*)"));
        assert!(check("(objectClass=PERSON)"));
        assert!(check("(telephoneNumber=+15550100)"));
        assert!(check("(&(sn=doe)(!(cn=jane*)))"));
        assert!(!check("(|(sn=smith)(mail=*))"));
        assert!(check("(&)"));
        assert!(!check("(|)"));
    }
}
