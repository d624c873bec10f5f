use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tracing::info;

/// A deduplication cache mapping each distinct string to a single shared
/// allocation.
///
/// GTF files repeat the same short strings millions of times (attribute keys,
/// gene names, chromosome names), so storing one `Rc<str>` per distinct
/// string instead of one `String` per cell keeps peak memory bounded by the
/// number of distinct values rather than the number of cells. The cache is
/// scoped to one parse session; it is never shared across parses.
#[derive(Default)]
pub struct Interner {
    pool: HashSet<Rc<str>>,
}

impl Interner {
    pub fn new() -> Interner {
        Interner::default()
    }

    /// Returns the canonical handle for `s`, inserting it on first sight.
    pub fn intern(&mut self, s: &str) -> Rc<str> {
        if let Some(v) = self.pool.get(s) {
            Rc::clone(v)
        } else {
            let v: Rc<str> = Rc::from(s);
            self.pool.insert(Rc::clone(&v));
            v
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

/// An insertion-ordered mapping from attribute key to a column of per-row
/// values.
///
/// The order of the columns is the order in which keys were first seen across
/// all absorbed rows. Every column has one entry per absorbed row once
/// [`AttributeTable::finish`] has run; a row that never mentioned a key holds
/// the missing-value sentinel at that position.
///
/// The ordered mapping is kept explicitly as a key sequence plus a key→index
/// map so that column ordering is deterministic and testable, rather than a
/// property of any particular map implementation.
///
/// Rows are absorbed one at a time with [`AttributeTable::push_row`], so the
/// table works the same whether the caller feeds it row by row or in chunks:
/// a key first seen on row `i` is backfilled with the sentinel for rows
/// `0..i` at registration time, and columns for keys that stop appearing are
/// padded when the table is finished.
pub struct AttributeTable {
    keys: Vec<Rc<str>>,
    index: HashMap<Rc<str>, usize>,
    // columns are extended lazily: a column's length after absorbing row r is
    // r + 1 if the key occurred in row r, at most r otherwise. finish() pads
    // every column to the final row count.
    columns: Vec<Vec<Rc<str>>>,
    n_rows: usize,
    missing_value: Rc<str>,
    quote_char: char,
    restrict: Option<HashSet<String>>,
    interner: Interner,
}

impl AttributeTable {
    pub fn new(quote_char: char, missing_value: &str) -> AttributeTable {
        let mut interner = Interner::new();
        let missing_value = interner.intern(missing_value);
        AttributeTable {
            keys: Vec::new(),
            index: HashMap::new(),
            columns: Vec::new(),
            n_rows: 0,
            missing_value,
            quote_char,
            restrict: None,
            interner,
        }
    }

    /// Restricts which keys are materialized as columns. Non-retained keys
    /// are still parsed but produce no column; the alignment and ordering of
    /// retained columns is unaffected.
    pub fn with_restriction(mut self, keys: HashSet<String>) -> AttributeTable {
        self.restrict = Some(keys);
        self
    }

    /// Absorbs the (already repaired) raw attribute string of one row.
    ///
    /// Fragments are split on `;`. A fragment survives only if its raw text
    /// is longer than 2 characters and contains a space, which drops
    /// trailing-semicolon artifacts and empty fragments. The key is the text
    /// before the first space of the trimmed fragment; the value is the
    /// remainder, kept as-is apart from quote-character removal. A key that
    /// repeats within one row has its values joined with a comma.
    pub fn push_row(&mut self, raw_attributes: &str) {
        for fragment in raw_attributes.split(';') {
            // need at least 3 chars for a minimal 'k v' entry
            if fragment.len() <= 2 || !fragment.contains(' ') {
                continue;
            }
            let Some((key, value)) = fragment.trim().split_once(' ') else {
                continue;
            };
            if key.is_empty() || value.is_empty() {
                continue;
            }
            if value.contains(self.quote_char) {
                let stripped = value.replace(self.quote_char, "");
                self.set_value(key, &stripped);
            } else {
                self.set_value(key, value);
            }
        }
        self.n_rows += 1;
    }

    fn set_value(&mut self, key: &str, value: &str) {
        if let Some(restrict) = &self.restrict {
            if !restrict.contains(key) {
                return;
            }
        }
        let row = self.n_rows;
        match self.index.get(key).copied() {
            Some(idx) => {
                if self.columns[idx].len() == row + 1 {
                    // repeated key within this row
                    let joined = format!("{},{}", self.columns[idx][row], value);
                    let joined = self.interner.intern(&joined);
                    self.columns[idx][row] = joined;
                } else {
                    let value = self.interner.intern(value);
                    let col = &mut self.columns[idx];
                    col.resize(row, Rc::clone(&self.missing_value));
                    col.push(value);
                }
            }
            None => {
                let key = self.interner.intern(key);
                let value = self.interner.intern(value);
                self.index.insert(Rc::clone(&key), self.keys.len());
                self.keys.push(key);
                let mut col = vec![Rc::clone(&self.missing_value); row];
                col.push(value);
                self.columns.push(col);
            }
        }
    }

    /// Pads every column to the final row count. Must be called once after
    /// the last row has been absorbed and before the columns are read.
    pub fn finish(&mut self) {
        for col in self.columns.iter_mut() {
            col.resize(self.n_rows, Rc::clone(&self.missing_value));
        }
        info!(
            "extracted {} attribute columns: {:?}",
            self.keys.len(),
            self.keys
        );
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of materialized columns.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Column names in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.as_ref())
    }

    pub fn column(&self, key: &str) -> Option<&[Rc<str>]> {
        self.index.get(key).map(|&idx| self.columns[idx].as_slice())
    }

    /// Iterates `(key, column)` pairs in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Rc<str>])> {
        self.keys
            .iter()
            .map(|k| k.as_ref())
            .zip(self.columns.iter().map(|c| c.as_slice()))
    }
}

/// Expands a batch of raw attribute strings into an [`AttributeTable`].
///
/// This is the one-shot form of the row-by-row absorption the reader uses.
pub fn expand_attribute_strings<T: AsRef<str>>(
    attribute_strings: &[T],
    quote_char: char,
    missing_value: &str,
) -> AttributeTable {
    let mut table = AttributeTable::new(quote_char, missing_value);
    for attrs in attribute_strings {
        table.push_row(attrs.as_ref());
    }
    table.finish();
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col_vec(table: &AttributeTable, key: &str) -> Vec<String> {
        table
            .column(key)
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect()
    }

    #[test]
    fn test_attributes_in_quotes() {
        let attributes = [
            "gene_id \"ENSG001\"; tag \"bogotron\"; version \"1\";",
            "gene_id \"ENSG002\"; tag \"wolfpuppy\"; version \"2\";",
        ];
        let table = expand_attribute_strings(&attributes, '"', "");
        assert_eq!(
            table.keys().collect::<Vec<_>>(),
            vec!["gene_id", "tag", "version"]
        );
        assert_eq!(col_vec(&table, "gene_id"), vec!["ENSG001", "ENSG002"]);
        assert_eq!(col_vec(&table, "tag"), vec!["bogotron", "wolfpuppy"]);
        assert_eq!(col_vec(&table, "version"), vec!["1", "2"]);
    }

    #[test]
    fn test_attributes_without_quotes() {
        let attributes = [
            "gene_id ENSG001; tag bogotron; version 1;",
            "gene_id ENSG002; tag wolfpuppy; version 2",
        ];
        let table = expand_attribute_strings(&attributes, '"', "");
        assert_eq!(col_vec(&table, "gene_id"), vec!["ENSG001", "ENSG002"]);
        assert_eq!(col_vec(&table, "tag"), vec!["bogotron", "wolfpuppy"]);
        assert_eq!(col_vec(&table, "version"), vec!["1", "2"]);
    }

    #[test]
    fn test_optional_attributes_get_sentinel() {
        let attributes = [
            "gene_id ENSG001; sometimes-present bogotron;",
            "gene_id ENSG002;",
            "gene_id ENSG003; sometimes-present wolfpuppy;",
        ];
        let table = expand_attribute_strings(&attributes, '"', "");
        assert_eq!(
            table.keys().collect::<Vec<_>>(),
            vec!["gene_id", "sometimes-present"]
        );
        assert_eq!(
            col_vec(&table, "gene_id"),
            vec!["ENSG001", "ENSG002", "ENSG003"]
        );
        assert_eq!(
            col_vec(&table, "sometimes-present"),
            vec!["bogotron", "", "wolfpuppy"]
        );
    }

    #[test]
    fn test_repeated_key_joined_with_comma() {
        let attributes = ["tag \"cds_end_NF\"; tag \"mRNA_end_NF\";"];
        let table = expand_attribute_strings(&attributes, '"', "");
        assert_eq!(col_vec(&table, "tag"), vec!["cds_end_NF,mRNA_end_NF"]);
    }

    #[test]
    fn test_first_seen_column_order() {
        // "zebra" sorts after "alpha" but is seen first, so it must come first
        let attributes = ["zebra z1; alpha a1;", "alpha a2; extra e2;"];
        let table = expand_attribute_strings(&attributes, '"', "");
        assert_eq!(
            table.keys().collect::<Vec<_>>(),
            vec!["zebra", "alpha", "extra"]
        );
        assert_eq!(col_vec(&table, "extra"), vec!["", "e2"]);
    }

    #[test]
    fn test_value_with_spaces_kept_whole() {
        let attributes = ["transcript_support_level \"1 (assigned to previous version 5)\";"];
        let table = expand_attribute_strings(&attributes, '"', "");
        assert_eq!(
            col_vec(&table, "transcript_support_level"),
            vec!["1 (assigned to previous version 5)"]
        );
    }

    #[test]
    fn test_short_or_spaceless_fragments_dropped() {
        let attributes = ["gene_id ENSG001;;x; v;novalue"];
        let table = expand_attribute_strings(&attributes, '"', "");
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["gene_id"]);
        assert_eq!(table.n_rows(), 1);
    }

    #[test]
    fn test_restriction_keeps_alignment() {
        let attributes = [
            "gene_id ENSG001; gene_name A;",
            "gene_name B; gene_id ENSG002;",
        ];
        let mut table = AttributeTable::new('"', "")
            .with_restriction(["gene_name".to_string()].into_iter().collect());
        for a in attributes {
            table.push_row(a);
        }
        table.finish();
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["gene_name"]);
        assert_eq!(col_vec(&table, "gene_name"), vec!["A", "B"]);
        assert_eq!(table.n_rows(), 2);
    }

    #[test]
    fn test_custom_missing_value() {
        let attributes = ["gene_id ENSG001; level 2;", "gene_id ENSG002;"];
        let table = expand_attribute_strings(&attributes, '"', "NA");
        assert_eq!(col_vec(&table, "level"), vec!["2", "NA"]);
    }

    #[test]
    fn test_interner_dedups() {
        let mut interner = Interner::new();
        let a = interner.intern("gene_id");
        let b = interner.intern("gene_id");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }
}
