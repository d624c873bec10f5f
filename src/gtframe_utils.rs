use lazy_static::lazy_static;
use std::collections::HashSet;
use std::path::Path;

/// The 8 fixed GTF columns, in file order. The 9th column (the raw attribute
/// blob) is expanded into per-key columns and therefore never appears in an
/// assembled frame under its own name unless expansion is disabled.
pub const GTF_FIELDS: [&str; 8] = [
    "seqname", "source", "feature", "start", "end", "score", "strand", "frame",
];

/// Name of the raw attribute column kept when attribute expansion is off.
pub const ATTRIBUTE_COLUMN: &str = "attribute";

lazy_static! {
    /// Fixed column names as a set, for the writer and the missing-feature
    /// reconstructor which both need to separate fixed columns from
    /// attribute columns.
    pub static ref GTF_FIELD_SET: HashSet<&'static str> =
        GTF_FIELDS.iter().copied().collect();
}

/// Whether a path refers to a gzip-compressed file.
///
/// Detection is by filename suffix (`.gz` or `.gzip`) only; the file content
/// is never sniffed.
pub fn is_gzipped_path<T: AsRef<Path>>(file_path: T) -> bool {
    match file_path.as_ref().extension().and_then(|e| e.to_str()) {
        Some("gz") | Some("gzip") => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_gzipped_path() {
        assert!(is_gzipped_path("genes.gtf.gz"));
        assert!(is_gzipped_path("genes.gtf.gzip"));
        assert!(!is_gzipped_path("genes.gtf"));
        assert!(!is_gzipped_path("genes.gz.gtf"));
    }
}
