// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Merging the source reference-sequence headers of two shards about to be
//! merged: a merge that observes an input shard with a reference sequence
//! not identity-mapped to the merged header is a fatal corruption error.
//!
//! The concrete text/binary header format is out of scope here; this
//! models only the ordered list of reference names a header carries, which
//! is all the merge needs to detect a non-identity translation.

use std::collections::HashSet;
use std::path::Path;

/// An ordered list of reference-sequence names, as carried by a shard's
/// source header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceHeader {
    names: Vec<String>,
}

impl ReferenceHeader {
    /// Builds a header from reference names in file order.
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// The reference names, in order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Merges two shard headers into one that both are order-preserving
/// subsequences of.
///
/// # Panics
///
/// Panics (via [`crate::error::corrupt`]) if the two headers disagree on
/// the relative order of a reference name they both carry -- this means
/// the shards were produced against incompatibly reordered references and
/// their coordinate keys are not comparable.
#[must_use]
pub fn merge_headers(a: &ReferenceHeader, b: &ReferenceHeader, source: &Path) -> ReferenceHeader {
    let common: HashSet<&str> = a
        .names
        .iter()
        .map(String::as_str)
        .filter(|n| b.names.iter().any(|x| x == n))
        .collect();

    let a_common: Vec<&str> = a.names.iter().map(String::as_str).filter(|n| common.contains(n)).collect();
    let b_common: Vec<&str> = b.names.iter().map(String::as_str).filter(|n| common.contains(n)).collect();

    if a_common != b_common {
        crate::error::corrupt(
            source,
            0,
            "shard headers disagree on the relative order of a shared reference sequence",
        );
    }

    let mut merged = Vec::with_capacity(a.names.len() + b.names.len());
    let (mut ai, mut bi) = (0usize, 0usize);

    while ai < a.names.len() || bi < b.names.len() {
        while ai < a.names.len() && !common.contains(a.names[ai].as_str()) {
            merged.push(a.names[ai].clone());
            ai += 1;
        }
        while bi < b.names.len() && !common.contains(b.names[bi].as_str()) {
            merged.push(b.names[bi].clone());
            bi += 1;
        }
        if ai < a.names.len() {
            debug_assert_eq!(a.names[ai], b.names[bi]);
            merged.push(a.names[ai].clone());
            ai += 1;
            bi += 1;
        }
    }

    ReferenceHeader::new(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn header(names: &[&str]) -> ReferenceHeader {
        ReferenceHeader::new(names.iter().map(|s| (*s).to_string()).collect())
    }

    #[test]
    fn merge_prefix_extension() {
        let a = header(&["chr1"]);
        let b = header(&["chr1", "chr2"]);
        let merged = merge_headers(&a, &b, Path::new("a"));
        assert_eq!(merged.names(), &["chr1".to_string(), "chr2".to_string()]);
    }

    #[test]
    #[should_panic(expected = "disagree on the relative order")]
    fn merge_non_identity_translation_aborts() {
        let a = header(&["chr1", "chr2"]);
        let b = header(&["chr2", "chr1"]);
        merge_headers(&a, &b, Path::new("a"));
    }

    #[test]
    fn merge_disjoint_headers_concatenates() {
        let a = header(&["chr1"]);
        let b = header(&["chr2"]);
        let merged = merge_headers(&a, &b, Path::new("a"));
        assert_eq!(merged.names(), &["chr1".to_string(), "chr2".to_string()]);
    }
}
