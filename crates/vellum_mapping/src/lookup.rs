//! Immutable name-to-field-type lookup with copy-on-add updates.
//!
//! Every merge produces a new lookup instance; readers keep whatever
//! snapshot they obtained and are never invalidated. Alias names resolve
//! to their target's field type.

use std::collections::HashMap;
use std::sync::Arc;

use crate::field::{FieldAliasMapper, FieldMapper, FieldType};

/// Snapshot lookup from full field name to its canonical field type.
#[derive(Clone, Debug, Default)]
pub struct FieldTypeLookup {
    full_name_to_type: HashMap<String, Arc<FieldType>>,
    aliases: HashMap<String, String>,
}

impl FieldTypeLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a full field name (or alias name) to its field type.
    pub fn get(&self, name: &str) -> Option<&Arc<FieldType>> {
        if let Some(target) = self.aliases.get(name) {
            return self.full_name_to_type.get(target);
        }
        self.full_name_to_type.get(name)
    }

    /// Whether the name is a concrete (non-alias) field.
    pub fn is_concrete(&self, name: &str) -> bool {
        self.full_name_to_type.contains_key(name)
    }

    /// Whether the name is an alias.
    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    /// Alias target path, if `name` is an alias.
    pub fn alias_target(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.full_name_to_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full_name_to_type.is_empty()
    }

    /// Iterate over all concrete field types.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<FieldType>)> {
        self.full_name_to_type
            .iter()
            .map(|(name, field_type)| (name.as_str(), field_type))
    }

    /// Produce a new lookup extended with one mapping's field and alias
    /// mappers. Value-equal types keep the previously interned instance so
    /// older snapshots and the new one share identity where nothing changed.
    pub fn copy_and_add_all(
        &self,
        field_mappers: &[FieldMapper],
        alias_mappers: &[FieldAliasMapper],
    ) -> Self {
        let mut next = self.clone();
        for mapper in field_mappers {
            let name = mapper.name().to_string();
            match next.full_name_to_type.get(&name) {
                Some(existing) if **existing == **mapper.field_type() => {}
                _ => {
                    next.full_name_to_type.insert(name, mapper.field_type().clone());
                }
            }
        }
        for alias in alias_mappers {
            next.aliases.insert(alias.name().to_string(), alias.path().to_string());
        }
        next
    }

    /// Expand a simple `*` glob into the matching full field names. A
    /// pattern without a wildcard is returned verbatim.
    pub fn simple_match_to_full_name(&self, pattern: &str) -> Vec<String> {
        if !pattern.contains('*') {
            return vec![pattern.to_string()];
        }
        let mut matches: Vec<String> = self
            .full_name_to_type
            .keys()
            .chain(self.aliases.keys())
            .filter(|name| simple_match(pattern, name))
            .cloned()
            .collect();
        matches.sort();
        matches
    }
}

/// Match `value` against a glob supporting `*` only.
pub fn simple_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();
    // Two-pointer glob walk with backtracking to the last star.
    let (mut p, mut v) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while v < value.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, v));
            p += 1;
        } else if p < pattern.len() && pattern[p] == value[v] {
            p += 1;
            v += 1;
        } else if let Some((star_p, star_v)) = star {
            p = star_p + 1;
            v = star_v + 1;
            star = Some((star_p, star_v + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
