pub mod attributes;
pub mod gtf;

pub use attributes::{expand_attribute_strings, AttributeTable, Interner};
pub use gtf::{tokenize_line, GtfStruct};
