//! Gtframe parses [GTF](https://www.ensembl.org/info/website/upload/gff.html)
//! genomic annotation files into [Polars](https://pola.rs/) data frames. Its
//! focus is the messy 9th column: the semicolon-separated attribute blob is
//! expanded into one column per distinct key, in first-seen order, with the
//! real-world malformations (repeated keys, quoted values with embedded
//! semicolons, missing keys) handled the way multiple annotation-source
//! vintages require. A frame can also be serialized back to GTF text, and
//! missing `gene`/`transcript` rows can be reconstructed from the
//! `gene_id`/`transcript_id` annotations of the rows that are present.

pub mod error;
pub mod gtframe_info;
pub mod gtframe_utils;
pub mod options;
pub mod reader;

pub use error::GtframeError;
pub use gtframe_info::GtfFrame;
pub use options::{ReaderOptions, SyntheticFeature};
