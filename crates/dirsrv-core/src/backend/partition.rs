//! Partitions store entries for one or more naming contexts.
//!
//! Layout in the key-value store: `entry/{rdn}\0{rdn}\0...`, RDNs in
//! normalized form from the suffix down to the leaf. Every entry's key is a
//! prefix of its subordinates' keys, so subtree reads and renames are a
//! single prefix scan. Values are bincode-encoded `Entry` records.

use std::sync::Arc;

use tracing::debug;

use crate::backend::kvstore::{BatchOp, KvStore, MemoryKvStore};
use crate::dn::{Dn, Rdn};
use crate::entry::{Attribute, Entry, Modification, Value};
use crate::error::{DirError, Result};
use crate::filter::Filter;
use crate::schema::SchemaRegistry;

const ENTRY_PREFIX: &[u8] = b"entry/";

/// How far below the base a search reaches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchScope {
    /// The base entry only.
    Object,
    /// Immediate children of the base.
    OneLevel,
    /// The base and everything below it.
    Subtree,
}

/// Entry storage. All DNs passed in must be normalized.
pub trait Partition: Send + Sync {
    /// Naming contexts held by this partition.
    fn suffixes(&self) -> Vec<Dn>;

    /// The naming context containing `dn`, if any.
    fn find_suffix(&self, dn: &Dn) -> Option<Dn> {
        self.suffixes().into_iter().find(|s| dn.is_within(s))
    }

    /// Store a new entry. Its parent must exist unless it is a suffix.
    fn add(&self, entry: Entry) -> Result<()>;

    /// Remove a leaf entry, returning it.
    fn delete(&self, dn: &Dn) -> Result<Entry>;

    /// Apply modifications and return the altered entry.
    fn modify(&self, dn: &Dn, modifications: &[Modification]) -> Result<Entry>;

    /// Move or rename `dn` (and its subtree) to `new_dn`. The leaf RDN
    /// attribute values are updated; the old ones are dropped when
    /// `delete_old_rdn` is set. Returns the renamed entry.
    fn rename(&self, dn: &Dn, new_dn: &Dn, delete_old_rdn: bool) -> Result<Entry>;

    /// Entries in scope that match `filter`.
    fn search(&self, base: &Dn, scope: SearchScope, filter: &Filter) -> Result<Vec<Entry>>;

    /// Fetch one entry.
    fn lookup(&self, dn: &Dn) -> Result<Option<Entry>>;

    /// True if the entry exists.
    fn has_entry(&self, dn: &Dn) -> Result<bool>;

    /// True if the entry has subordinates.
    fn has_children(&self, dn: &Dn) -> Result<bool>;
}

fn entry_key(dn: &Dn) -> Vec<u8> {
    let mut key = ENTRY_PREFIX.to_vec();
    for rdn in dn.rdns().iter().rev() {
        key.extend_from_slice(rdn.norm_string().as_bytes());
        key.push(0);
    }
    key
}

fn encode(entry: &Entry) -> Result<Vec<u8>> {
    bincode::serialize(entry).map_err(DirError::backend)
}

fn decode(bytes: &[u8]) -> Result<Entry> {
    bincode::deserialize(bytes).map_err(DirError::backend)
}

/// Partition over a `KvStore`, in memory by default.
pub struct MemoryPartition {
    kv: Arc<dyn KvStore>,
    schema: Arc<SchemaRegistry>,
    suffixes: Vec<Dn>,
}

impl MemoryPartition {
    /// Partition over a fresh in-memory store.
    pub fn new(schema: Arc<SchemaRegistry>, suffixes: &[String]) -> Result<Self> {
        Self::with_store(Arc::new(MemoryKvStore::new()), schema, suffixes)
    }

    /// Partition over an existing store.
    pub fn with_store(
        kv: Arc<dyn KvStore>,
        schema: Arc<SchemaRegistry>,
        suffixes: &[String],
    ) -> Result<Self> {
        let suffixes = suffixes
            .iter()
            .map(|s| Dn::parse(s).and_then(|dn| dn.normalized(&schema)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            kv,
            schema,
            suffixes,
        })
    }

    fn load(&self, dn: &Dn) -> Result<Entry> {
        match self.kv.get(&entry_key(dn))? {
            Some(bytes) => decode(&bytes),
            None => Err(DirError::NoSuchObject(dn.up_name().to_string())),
        }
    }

    fn check_parent(&self, dn: &Dn) -> Result<()> {
        let Some(suffix) = self.find_suffix(dn) else {
            return Err(DirError::NoSuchObject(format!(
                "{} is not within any naming context",
                dn.up_name()
            )));
        };
        if *dn != suffix && !self.has_entry(&dn.parent())? {
            return Err(DirError::NoSuchObject(dn.parent().up_name().to_string()));
        }
        Ok(())
    }

    fn typed_value(&self, oid: &str, up: &str, norm: &str) -> Result<Attribute> {
        let at = self.schema.lookup_attribute_type(oid)?;
        Ok(Attribute::from_type(&at, vec![Value::normalized(up, norm)]))
    }

    /// Update the naming attribute values after an RDN change.
    fn adjust_rdn_attributes(
        &self,
        entry: &mut Entry,
        old: &Rdn,
        new: &Rdn,
        delete_old_rdn: bool,
    ) -> Result<()> {
        if delete_old_rdn {
            for ava in old.avas() {
                let kept = new
                    .avas()
                    .iter()
                    .any(|n| n.norm_type() == ava.norm_type() && n.norm_value() == ava.norm_value());
                if !kept {
                    let attr = self.typed_value(ava.norm_type(), ava.up_value(), ava.norm_value())?;
                    entry.apply(&Modification::remove(attr))?;
                }
            }
        }
        for ava in new.avas() {
            let attr = self.typed_value(ava.norm_type(), ava.up_value(), ava.norm_value())?;
            let single = self
                .schema
                .attribute_type(ava.norm_type())
                .is_some_and(|at| at.single_valued);
            if single {
                entry.apply(&Modification::replace(attr))?;
            } else {
                entry.apply(&Modification::add(attr))?;
            }
        }
        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<Entry>> {
        self.kv
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(_, v)| decode(&v))
            .collect()
    }
}

impl Partition for MemoryPartition {
    fn suffixes(&self) -> Vec<Dn> {
        self.suffixes.clone()
    }

    fn add(&self, entry: Entry) -> Result<()> {
        let dn = entry.dn().clone();
        let key = entry_key(&dn);
        if self.kv.contains_key(&key)? {
            return Err(DirError::EntryAlreadyExists(dn.up_name().to_string()));
        }
        self.check_parent(&dn)?;
        self.kv.put(key, encode(&entry)?)?;
        debug!(dn = %dn, "entry stored");
        Ok(())
    }

    fn delete(&self, dn: &Dn) -> Result<Entry> {
        let entry = self.load(dn)?;
        if self.has_children(dn)? {
            return Err(DirError::NotAllowedOnNonLeaf(dn.up_name().to_string()));
        }
        self.kv.delete(&entry_key(dn))?;
        debug!(dn = %dn, "entry removed");
        Ok(entry)
    }

    fn modify(&self, dn: &Dn, modifications: &[Modification]) -> Result<Entry> {
        let mut entry = self.load(dn)?;
        entry.apply_all(modifications)?;
        self.kv.put(entry_key(dn), encode(&entry)?)?;
        Ok(entry)
    }

    fn rename(&self, dn: &Dn, new_dn: &Dn, delete_old_rdn: bool) -> Result<Entry> {
        let old_key = entry_key(dn);
        if !self.kv.contains_key(&old_key)? {
            return Err(DirError::NoSuchObject(dn.up_name().to_string()));
        }
        if new_dn.is_descendant_of(dn) {
            return Err(DirError::UnwillingToPerform(format!(
                "cannot move {} below itself",
                dn.up_name()
            )));
        }
        if new_dn != dn && self.kv.contains_key(&entry_key(new_dn))? {
            return Err(DirError::EntryAlreadyExists(new_dn.up_name().to_string()));
        }
        self.check_parent(new_dn)?;

        let mut ops = Vec::new();
        let mut renamed = None;
        for (key, bytes) in self.kv.scan_prefix(&old_key)? {
            let mut entry = decode(&bytes)?;
            let Some(moved) = entry.dn().rebase(dn, new_dn) else {
                continue;
            };
            if entry.dn() == dn {
                if let (Some(old_rdn), Some(new_rdn)) = (dn.rdn(), new_dn.rdn()) {
                    self.adjust_rdn_attributes(&mut entry, old_rdn, new_rdn, delete_old_rdn)?;
                }
            }
            entry.set_dn(moved);
            ops.push(BatchOp::Delete { key });
            ops.push(BatchOp::Put {
                key: entry_key(entry.dn()),
                value: encode(&entry)?,
            });
            if entry.dn() == new_dn {
                renamed = Some(entry);
            }
        }
        let moved = ops.len() / 2;
        self.kv.write_batch(ops)?;
        debug!(from = %dn, to = %new_dn, entries = moved, "subtree renamed");
        renamed.ok_or_else(|| DirError::NoSuchObject(dn.up_name().to_string()))
    }

    fn search(&self, base: &Dn, scope: SearchScope, filter: &Filter) -> Result<Vec<Entry>> {
        let candidates = if base.is_root() {
            match scope {
                SearchScope::Object => Vec::new(),
                SearchScope::OneLevel => self
                    .scan(ENTRY_PREFIX)?
                    .into_iter()
                    .filter(|e| self.suffixes.contains(e.dn()))
                    .collect(),
                SearchScope::Subtree => self.scan(ENTRY_PREFIX)?,
            }
        } else {
            match scope {
                SearchScope::Object => vec![self.load(base)?],
                SearchScope::OneLevel | SearchScope::Subtree => {
                    let all = self.scan(&entry_key(base))?;
                    if all.is_empty() {
                        return Err(DirError::NoSuchObject(base.up_name().to_string()));
                    }
                    let depth = base.len() + 1;
                    all.into_iter()
                        .filter(|e| scope == SearchScope::Subtree || e.dn().len() == depth)
                        .collect()
                }
            }
        };
        Ok(candidates.into_iter().filter(|e| filter.matches(e)).collect())
    }

    fn lookup(&self, dn: &Dn) -> Result<Option<Entry>> {
        self.kv
            .get(&entry_key(dn))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn has_entry(&self, dn: &Dn) -> Result<bool> {
        if dn.is_root() {
            return Ok(true);
        }
        self.kv.contains_key(&entry_key(dn))
    }

    fn has_children(&self, dn: &Dn) -> Result<bool> {
        Ok(self.kv.scan_prefix(&entry_key(dn))?.len() > 1)
    }
}
