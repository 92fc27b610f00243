//! Parser for the generic string encoding of `subtreeSpecification`
//! (RFC 3672 appendix A):
//!
//! ```text
//! { base "ou=configuration",
//!   specificExclusions { chopBefore:"ou=services", chopAfter:"ou=partitions" },
//!   minimum 1, maximum 3,
//!   specificationFilter and:{ item:person, not:item:device } }
//! ```
//!
//! Components may appear in any order but at most once. DNs are normalized
//! against the schema and object class names resolved to OIDs, so a parsed
//! specification can be compared and evaluated directly.

use std::sync::Arc;

use crate::dn::Dn;
use crate::error::{DirError, Result};
use crate::schema::SchemaRegistry;
use crate::subtree::spec::{Refinement, SubtreeSpecification};

/// Parses specification strings against a schema.
#[derive(Clone)]
pub struct SubtreeSpecificationParser {
    schema: Arc<SchemaRegistry>,
}

impl SubtreeSpecificationParser {
    /// Create a parser bound to `schema`.
    pub fn new(schema: Arc<SchemaRegistry>) -> Self {
        Self { schema }
    }

    /// Parse a specification. Any syntax problem is reported as
    /// `InvalidAttributeSyntax`.
    pub fn parse(&self, input: &str) -> Result<SubtreeSpecification> {
        let mut parser = SpecParser {
            schema: &self.schema,
            input,
            chars: input.chars().collect(),
            pos: 0,
            depth: 0,
        };
        parser.parse()
    }
}

/// Deepest `and:`, `or:` and `not:` nesting accepted in a refinement.
pub const MAX_REFINEMENT_DEPTH: usize = 32;

struct SpecParser<'a> {
    schema: &'a SchemaRegistry,
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl<'a> SpecParser<'a> {
    fn error(&self, msg: impl AsRef<str>) -> DirError {
        DirError::InvalidAttributeSyntax(format!(
            "subtreeSpecification: {} at position {} in '{}'",
            msg.as_ref(),
            self.pos,
            self.input
        ))
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
            Err(self.error(format!("expected '{}'", c)))
        }
    }

    /// Consume `c` if it is the next non-blank character.
    fn accept(&mut self, c: char) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn word(&mut self) -> String {
        self.skip_whitespace();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse(&mut self) -> Result<SubtreeSpecification> {
        let mut spec = SubtreeSpecification::default();
        let mut seen: Vec<String> = Vec::new();

        self.expect('{')?;
        if !self.accept('}') {
            loop {
                let keyword = self.word();
                if seen.contains(&keyword) {
                    return Err(self.error(format!("duplicate component '{}'", keyword)));
                }
                match keyword.as_str() {
                    "base" => spec.base = self.local_name()?,
                    "specificExclusions" => self.exclusions(&mut spec)?,
                    "minimum" => spec.minimum = self.integer()?,
                    "maximum" => spec.maximum = Some(self.integer()?),
                    "specificationFilter" => spec.refinement = Some(self.refinement()?),
                    "" => return Err(self.error("expected a component name")),
                    other => return Err(self.error(format!("unknown component '{}'", other))),
                }
                seen.push(keyword);
                if self.accept(',') {
                    continue;
                }
                self.expect('}')?;
                break;
            }
        }
        self.skip_whitespace();
        if self.pos != self.chars.len() {
            return Err(self.error("trailing characters"));
        }
        Ok(spec)
    }

    fn exclusions(&mut self, spec: &mut SubtreeSpecification) -> Result<()> {
        self.expect('{')?;
        if self.accept('}') {
            return Ok(());
        }
        loop {
            let kind = self.word();
            self.expect(':')?;
            let dn = self.local_name()?;
            match kind.as_str() {
                "chopBefore" => spec.chop_before.push(dn),
                "chopAfter" => spec.chop_after.push(dn),
                other => return Err(self.error(format!("unknown exclusion '{}'", other))),
            }
            if self.accept(',') {
                continue;
            }
            return self.expect('}');
        }
    }

    /// A quoted DN; `""` inside the quotes stands for one `"`.
    fn local_name(&mut self) -> Result<Dn> {
        self.expect('"')?;
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated DN string")),
                Some('"') if self.chars.get(self.pos + 1) == Some(&'"') => {
                    text.push('"');
                    self.pos += 2;
                }
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
        Dn::parse(&text)
            .and_then(|dn| dn.normalized(self.schema))
            .map_err(|e| self.error(format!("bad DN \"{}\": {}", text, e)))
    }

    fn integer(&mut self) -> Result<u32> {
        let digits = self.word();
        digits
            .parse::<u32>()
            .map_err(|_| self.error(format!("'{}' is not a non-negative integer", digits)))
    }

    fn refinement(&mut self) -> Result<Refinement> {
        self.depth += 1;
        if self.depth > MAX_REFINEMENT_DEPTH {
            return Err(self.error(format!("refinement nested deeper than {}", MAX_REFINEMENT_DEPTH)));
        }
        let keyword = self.word();
        self.expect(':')?;
        let refinement = match keyword.as_str() {
            "item" => {
                let name = self.word();
                let oc = self
                    .schema
                    .object_class(&name)
                    .ok_or_else(|| self.error(format!("unknown object class '{}'", name)))?;
                Ok(Refinement::Item(oc.oid.clone()))
            }
            "and" => Ok(Refinement::And(self.refinement_list()?)),
            "or" => Ok(Refinement::Or(self.refinement_list()?)),
            "not" => Ok(Refinement::Not(Box::new(self.refinement()?))),
            other => Err(self.error(format!("unknown refinement '{}'", other))),
        };
        self.depth -= 1;
        refinement
    }

    fn refinement_list(&mut self) -> Result<Vec<Refinement>> {
        self.expect('{')?;
        let mut items = Vec::new();
        if self.accept('}') {
            return Ok(items);
        }
        loop {
            items.push(self.refinement()?);
            if self.accept(',') {
                continue;
            }
            self.expect('}')?;
            return Ok(items);
        }
    }
}
