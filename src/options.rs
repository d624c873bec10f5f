use anyhow::Context;
use polars::prelude::AnyValue;
use std::collections::HashSet;

/// A per-column cell converter. The assembler calls it for every non-empty
/// cell of the target column; empty cells become null without the converter
/// being consulted.
pub type ConverterFn = fn(&str) -> anyhow::Result<AnyValue<'static>>;

/// Converter producing a 64-bit integer column.
pub fn to_int64(value: &str) -> anyhow::Result<AnyValue<'static>> {
    let v = value
        .parse::<i64>()
        .with_context(|| format!("could not convert {:?} to an integer", value))?;
    Ok(AnyValue::Int64(v))
}

/// Converter producing a 64-bit float column.
pub fn to_float64(value: &str) -> anyhow::Result<AnyValue<'static>> {
    let v = value
        .parse::<f64>()
        .with_context(|| format!("could not convert {:?} to a float", value))?;
    Ok(AnyValue::Float64(v))
}

#[derive(Clone)]
/// Configuration for reading a GTF file into a [`crate::GtfFrame`].
///
/// The defaults reproduce the plain `from_gtf` behavior: expand the attribute
/// column, keep every feature and column, no type conversion, no biotype
/// inference.
///
/// ### Fields
///
/// * `expand_attribute_column`: replace the semicolon-separated attribute
///   blob with one column per distinct key, in first-seen order. When
///   `false`, the raw string is kept in a single `attribute` column.
/// * `features`: optional filter; only rows whose `feature` value is in the
///   set are retained. Applied before attribute expansion.
/// * `usecols`: optional projection of the final frame to the named columns,
///   in the caller's order. Names absent from the frame are dropped with a
///   warning, never an error.
/// * `column_converters`: per-column cell converters applied after parsing.
/// * `infer_biotype_column`: enable the historical `source`-column biotype
///   heuristic.
/// * `chunksize`: number of rows of raw attribute text buffered before the
///   buffer is drained into the expander. Bounds peak memory on large files;
///   has no observable effect on the output.
/// * `quote_char`: quote character removed from attribute values.
/// * `missing_value`: sentinel stored for a row that lacks an attribute key.
pub struct ReaderOptions {
    pub expand_attribute_column: bool,
    pub features: Option<HashSet<String>>,
    pub usecols: Option<Vec<String>>,
    pub column_converters: Vec<(String, ConverterFn)>,
    pub infer_biotype_column: bool,
    pub chunksize: usize,
    pub quote_char: char,
    pub missing_value: String,
}

impl Default for ReaderOptions {
    fn default() -> ReaderOptions {
        ReaderOptions {
            expand_attribute_column: true,
            features: None,
            usecols: None,
            column_converters: Vec::new(),
            infer_biotype_column: false,
            chunksize: 65_536,
            quote_char: '"',
            missing_value: String::new(),
        }
    }
}

impl ReaderOptions {
    pub fn new() -> ReaderOptions {
        ReaderOptions::default()
    }

    pub fn with_expand_attribute_column(mut self, expand: bool) -> ReaderOptions {
        self.expand_attribute_column = expand;
        self
    }

    pub fn with_features<T: AsRef<str>>(mut self, features: &[T]) -> ReaderOptions {
        self.features = Some(features.iter().map(|f| f.as_ref().to_string()).collect());
        self
    }

    pub fn with_usecols<T: AsRef<str>>(mut self, usecols: &[T]) -> ReaderOptions {
        self.usecols = Some(usecols.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    pub fn with_column_converter<T: AsRef<str>>(
        mut self,
        column: T,
        converter: ConverterFn,
    ) -> ReaderOptions {
        self.column_converters
            .push((column.as_ref().to_string(), converter));
        self
    }

    pub fn with_infer_biotype_column(mut self, infer: bool) -> ReaderOptions {
        self.infer_biotype_column = infer;
        self
    }

    pub fn with_chunksize(mut self, chunksize: usize) -> ReaderOptions {
        // a zero-row chunk would never flush
        self.chunksize = chunksize.max(1);
        self
    }

    pub fn with_quote_char(mut self, quote_char: char) -> ReaderOptions {
        self.quote_char = quote_char;
        self
    }

    pub fn with_missing_value<T: AsRef<str>>(mut self, missing_value: T) -> ReaderOptions {
        self.missing_value = missing_value.as_ref().to_string();
        self
    }
}

#[derive(Clone)]
/// Description of a feature type to reconstruct from grouped rows, used by
/// [`crate::GtfFrame::create_missing_features`].
///
/// ### Fields
///
/// * `feature`: the synthetic feature name to emit (e.g. `"gene"`).
/// * `unique_key`: the column whose value identifies one instance of the
///   feature (e.g. `"gene_id"`).
/// * `extra_columns`: optional restriction of the columns propagated from
///   each group. When set, only these columns (besides the positional ones)
///   are carried onto the reconstructed rows; everything else stays null.
pub struct SyntheticFeature {
    pub feature: String,
    pub unique_key: String,
    pub extra_columns: Option<Vec<String>>,
}

impl SyntheticFeature {
    pub fn new<T: AsRef<str>>(feature: T, unique_key: T) -> SyntheticFeature {
        SyntheticFeature {
            feature: feature.as_ref().to_string(),
            unique_key: unique_key.as_ref().to_string(),
            extra_columns: None,
        }
    }

    pub fn with_extra_columns<T: AsRef<str>>(mut self, columns: &[T]) -> SyntheticFeature {
        self.extra_columns = Some(columns.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }
}
