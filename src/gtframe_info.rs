use crate::gtframe_utils::{ATTRIBUTE_COLUMN, GTF_FIELDS, GTF_FIELD_SET};
use crate::options::{ReaderOptions, SyntheticFeature};
use crate::reader::GtfStruct;
use anyhow::Context;
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;
use tracing::{info, warn};

/// A GTF annotation table backed by a Polars [`DataFrame`].
///
/// The frame holds the 8 fixed GTF columns first (`seqname`, `source`,
/// `feature`, `start`, `end`, `score`, `strand`, `frame`), followed by one
/// column per distinct attribute key in the order the keys were first seen in
/// the file. `start` and `end` are `i64` (1-based, inclusive); `score` is
/// `f32` with nulls for `.`; everything else is text. A row that lacks an
/// attribute key holds the missing-value sentinel (by default the empty
/// string) in that key's column.
///
/// When attribute expansion is disabled the frame instead keeps a single
/// `attribute` column holding the raw, repaired attribute strings.
///
/// ### Example
///
/// ```no_run
/// # fn main() -> anyhow::Result<()> {
/// use gtframe::GtfFrame;
///
/// let gr = GtfFrame::from_gtf("genes.gtf")?;
/// let genes = gr.df().column("gene_id")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GtfFrame {
    /// The underlying Polars dataframe recording all annotations
    pub df: DataFrame,
    /// Comment lines encountered while reading, verbatim (including `#`)
    pub comments: Vec<String>,
}

// IO
impl GtfFrame {
    /// Reads a GTF file with default options: attributes expanded, all
    /// features and columns kept, no conversion, no biotype inference.
    ///
    /// The path may point to a gzip-compressed file; compression is detected
    /// by the `.gz`/`.gzip` filename suffix. A path that does not exist
    /// fails with [`crate::GtframeError::FileNotFound`] before any read.
    pub fn from_gtf<P: AsRef<Path>>(file_path: P) -> anyhow::Result<GtfFrame> {
        GtfFrame::from_gtf_with(file_path, &ReaderOptions::default())
    }

    /// Reads a GTF file with the given [`ReaderOptions`].
    pub fn from_gtf_with<P: AsRef<Path>>(
        file_path: P,
        opts: &ReaderOptions,
    ) -> anyhow::Result<GtfFrame> {
        let gstruct = GtfStruct::from_path(file_path, opts)?;
        GtfFrame::from_gtf_struct(gstruct, opts)
    }

    /// Parses GTF text from any buffered reader with the given options.
    pub fn from_reader<R: BufRead>(reader: R, opts: &ReaderOptions) -> anyhow::Result<GtfFrame> {
        let gstruct = GtfStruct::from_reader(reader, opts)?;
        GtfFrame::from_gtf_struct(gstruct, opts)
    }

    /// Assembles a [`GtfFrame`] from a parsed [`GtfStruct`].
    ///
    /// The fixed columns come first, then the attribute columns in
    /// first-seen order (or the single raw `attribute` column when expansion
    /// is off). On top of the assembled frame this applies, in order: the
    /// per-column converters, the biotype inference heuristic, and the
    /// `usecols` projection. `usecols` therefore describes the final output
    /// and may name an inferred biotype column.
    pub fn from_gtf_struct(
        mut gstruct: GtfStruct,
        opts: &ReaderOptions,
    ) -> anyhow::Result<GtfFrame> {
        let mut columns: Vec<Series> = Vec::with_capacity(9 + gstruct.attributes.len());
        columns.push(Series::new("seqname", as_str_vec(&gstruct.seqname)));
        columns.push(Series::new("source", as_str_vec(&gstruct.source)));
        columns.push(Series::new("feature", as_str_vec(&gstruct.feature)));
        columns.push(Series::new("start", std::mem::take(&mut gstruct.start)));
        columns.push(Series::new("end", std::mem::take(&mut gstruct.end)));
        columns.push(Series::new("score", std::mem::take(&mut gstruct.score)));
        columns.push(Series::new("strand", as_str_vec(&gstruct.strand)));
        columns.push(Series::new(
            "frame",
            gstruct
                .frame
                .iter()
                .map(|v| v.as_deref())
                .collect::<Vec<Option<&str>>>(),
        ));

        if opts.expand_attribute_column {
            for (key, column) in gstruct.attributes.iter() {
                if GTF_FIELD_SET.contains(key) {
                    warn!(
                        "attribute key '{}' collides with a fixed column name; skipping it",
                        key
                    );
                    continue;
                }
                columns.push(Series::new(
                    key,
                    column.iter().map(|v| v.as_ref()).collect::<Vec<&str>>(),
                ));
            }
        } else {
            columns.push(Series::new(
                ATTRIBUTE_COLUMN,
                std::mem::take(&mut gstruct.raw_attributes),
            ));
        }

        let mut df = DataFrame::new(columns)?;

        for (name, converter) in &opts.column_converters {
            let Ok(series) = df.column(name) else {
                warn!("column converter target '{}' not found; skipping", name);
                continue;
            };
            let ca = series
                .str()
                .with_context(|| format!("cannot convert non-string column '{}'", name))?;
            let mut values: Vec<AnyValue> = Vec::with_capacity(ca.len());
            for cell in ca.into_iter() {
                match cell {
                    // empty cells become null without consulting the converter
                    None | Some("") => values.push(AnyValue::Null),
                    Some(cell) => values.push(
                        converter(cell)
                            .with_context(|| format!("failed converting column '{}'", name))?,
                    ),
                }
            }
            let converted = Series::from_any_values(name, &values, false)?;
            df.replace(name, converted)?;
        }

        if opts.infer_biotype_column {
            infer_biotype_columns(&mut df)?;
        }

        if let Some(usecols) = &opts.usecols {
            let present: HashSet<&str> = df.get_column_names().into_iter().collect();
            let mut selected: Vec<&str> = Vec::with_capacity(usecols.len());
            for name in usecols {
                if present.contains(name.as_str()) {
                    selected.push(name.as_str());
                } else {
                    warn!("requested column '{}' is not in the table; dropping it", name);
                }
            }
            df = df.select(selected)?;
        }

        Ok(GtfFrame {
            df,
            comments: gstruct.comments,
        })
    }
}

// accessors
impl GtfFrame {
    pub fn df(&self) -> &DataFrame {
        &self.df
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// Number of records in the frame.
    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn column<T: AsRef<str>>(&self, name: T) -> anyhow::Result<&Series> {
        self.df
            .column(name.as_ref())
            .with_context(|| format!("could not find column '{}'", name.as_ref()))
    }

    /// Renders the frame row-oriented, as one map from column name to the
    /// cell's text per row. Null cells map to [`None`]. This is an adapter
    /// for callers that do not want to work with Polars directly; the
    /// columnar frame remains the primary representation.
    pub fn to_rows(&self) -> anyhow::Result<Vec<HashMap<String, Option<String>>>> {
        let names: Vec<String> = self
            .df
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        let columns = self.df.get_columns();
        let mut rows = Vec::with_capacity(self.df.height());
        for i in 0..self.df.height() {
            let mut row = HashMap::with_capacity(names.len());
            for (name, series) in names.iter().zip(columns.iter()) {
                row.insert(name.clone(), format_cell(&series.get(i)?));
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

// missing-feature reconstruction
impl GtfFrame {
    /// Derives synthetic feature rows (e.g. `gene`, `transcript`) from
    /// groups of existing rows and appends them to the frame.
    ///
    /// Some GTF files carry only `exon` and `CDS` records but annotate each
    /// of them with `gene_id` and `transcript_id`, which is enough to
    /// rebuild the missing feature rows. For every requested
    /// [`SyntheticFeature`], rows are grouped by the feature's unique-key
    /// column and each group becomes one new row:
    ///
    /// * `start` is the group minimum, `end` the group maximum;
    /// * `seqname` is taken from the first member (groups are assumed to be
    ///   single-chromosome, this is not re-validated);
    /// * `feature` is the synthetic feature name;
    /// * every other column keeps the group's value only when all non-null
    ///   entries agree, and is null otherwise.
    ///
    /// Rows whose group key is null or the missing-value sentinel are
    /// excluded from grouping. If the feature name already exists in the
    /// frame, reconstruction proceeds anyway with a warning; the duplicate
    /// rows are the caller's to deal with.
    ///
    /// Returns a new frame; the original rows are retained unmodified, with
    /// the reconstructed rows (sorted by group key) appended after them.
    pub fn create_missing_features(
        &self,
        features: &[SyntheticFeature],
    ) -> anyhow::Result<GtfFrame> {
        let column_names: Vec<String> = self
            .df
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        let existing_features: HashSet<String> = self
            .column("feature")?
            .str()?
            .into_iter()
            .flatten()
            .map(|v| v.to_string())
            .collect();

        let mut out = self.df.clone();
        for feat in features {
            if existing_features.contains(&feat.feature) {
                warn!(
                    "feature '{}' already exists in the data; reconstruction will duplicate it",
                    feat.feature
                );
            }
            info!("creating rows for missing feature '{}'", feat.feature);

            let key = feat.unique_key.as_str();
            let key_series = self
                .column(key)
                .with_context(|| format!("grouping key column '{}' not found", key))?;

            // rows with an undefined group key cannot be reconstructed
            let mut defined = col(key).is_not_null();
            if key_series.dtype() == &DataType::String {
                defined = defined.and(col(key).neq(lit("")));
            }

            let mut agg_exprs: Vec<Expr> = vec![
                col("start").min().alias("start"),
                col("end").max().alias("end"),
                col("seqname").first().alias("seqname"),
                lit(feat.feature.clone()).alias("feature"),
            ];
            for name in &column_names {
                let name = name.as_str();
                if name == key || matches!(name, "start" | "end" | "seqname" | "feature") {
                    continue;
                }
                let dtype = self.df.column(name)?.dtype().clone();
                let propagate = match &feat.extra_columns {
                    Some(extra) => extra.iter().any(|c| c == name),
                    None => true,
                };
                let expr = if propagate {
                    // a column is defined on the new row only when the group
                    // is unanimous about it
                    when(col(name).drop_nulls().n_unique().eq(lit(1)))
                        .then(col(name).drop_nulls().first())
                        .otherwise(lit(NULL))
                } else {
                    lit(NULL)
                };
                agg_exprs.push(expr.cast(dtype).alias(name));
            }

            let sort_by: &[&str] = &[key];
            let extra = self
                .df
                .clone()
                .lazy()
                .filter(defined)
                .group_by([col(key)])
                .agg(agg_exprs)
                .collect()?
                // group_by order is not deterministic; sort for stable output
                .sort(sort_by, vec![false], false)?
                .select(column_names.iter().map(|n| n.as_str()).collect::<Vec<_>>())?;

            info!(
                "reconstructed {} '{}' rows from column '{}'",
                extra.height(),
                feat.feature,
                key
            );
            out = out.vstack(&extra)?;
        }

        Ok(GtfFrame {
            df: out,
            comments: self.comments.clone(),
        })
    }
}

// GTF output
impl GtfFrame {
    /// Writes the frame as GTF text to the given path. See
    /// [`GtfFrame::write_gtf_to`] for the format produced.
    pub fn write_gtf<T: AsRef<Path>>(&self, file_path: T) -> anyhow::Result<()> {
        self.write_gtf_with_headers(file_path, &[])
    }

    /// Writes the frame as GTF text preceded by the given header lines.
    pub fn write_gtf_with_headers<T: AsRef<Path>>(
        &self,
        file_path: T,
        headers: &[String],
    ) -> anyhow::Result<()> {
        let file_path = file_path.as_ref();
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "could not create the parent directory of the output file {:?}",
                        file_path.as_os_str()
                    )
                })?;
            }
        }
        let file = std::fs::File::create(file_path)?;
        let mut writer = BufWriter::with_capacity(4194304, file);
        self.write_gtf_to(&mut writer, headers)?;
        writer.flush()?;
        Ok(())
    }

    /// Serializes the frame as GTF text into `writer`.
    ///
    /// Header lines are emitted first, verbatim; no `#` prefix is added, so
    /// callers must pass already-formed comment lines. Each row then becomes
    /// the 8 fixed columns, tab-separated, with `.` substituted for null (a
    /// fixed column missing from the frame is written as `.` throughout),
    /// followed by the attribute field rebuilt from every other column:
    /// cells that are non-null and non-empty are emitted as `key "value";`
    /// pairs separated by single spaces, in column order. A frame parsed
    /// without attribute expansion writes its raw `attribute` column back
    /// unchanged.
    ///
    /// Round trips are semantic, not byte-exact: numeric formatting and
    /// attribute key order may differ from the source text, but re-parsing
    /// the output reproduces every populated cell.
    pub fn write_gtf_to<W: Write>(&self, writer: &mut W, headers: &[String]) -> anyhow::Result<()> {
        for header in headers {
            writeln!(writer, "{}", header)?;
        }

        let names = self.df.get_column_names();
        let columns = self.df.get_columns();
        let fixed: Vec<Option<usize>> = GTF_FIELDS
            .iter()
            .map(|f| names.iter().position(|n| n == f))
            .collect();
        let raw_attribute: Option<usize> = names.iter().position(|n| *n == ATTRIBUTE_COLUMN);
        let attribute_cols: Vec<usize> = (0..names.len())
            .filter(|&i| !GTF_FIELD_SET.contains(names[i]) && Some(i) != raw_attribute)
            .collect();

        let mut line = String::with_capacity(256);
        for i in 0..self.df.height() {
            line.clear();
            for (j, idx) in fixed.iter().enumerate() {
                if j > 0 {
                    line.push('\t');
                }
                let cell = match idx {
                    Some(c) => format_cell(&columns[*c].get(i)?),
                    None => None,
                };
                match cell {
                    Some(v) => line.push_str(&v),
                    None => line.push('.'),
                }
            }
            line.push('\t');
            if let Some(raw) = raw_attribute {
                if let Some(v) = format_cell(&columns[raw].get(i)?) {
                    line.push_str(&v);
                }
            } else {
                let mut first = true;
                for &c in &attribute_cols {
                    if let Some(v) = format_cell(&columns[c].get(i)?) {
                        if !first {
                            line.push(' ');
                        }
                        line.push_str(names[c]);
                        line.push_str(" \"");
                        line.push_str(&v);
                        line.push_str("\";");
                        first = false;
                    }
                }
            }
            writeln!(writer, "{}", line)?;
        }
        Ok(())
    }
}

fn as_str_vec(values: &[Rc<str>]) -> Vec<&str> {
    values.iter().map(|v| v.as_ref()).collect()
}

/// Renders one cell as GTF text. Null cells, NaN scores and empty strings
/// all count as absent and return [`None`].
fn format_cell(value: &AnyValue) -> Option<String> {
    match value {
        AnyValue::Null => None,
        AnyValue::String(v) => {
            if v.is_empty() {
                None
            } else {
                Some((*v).to_string())
            }
        }
        AnyValue::StringOwned(v) => {
            if v.is_empty() {
                None
            } else {
                Some(v.to_string())
            }
        }
        AnyValue::Float32(v) => {
            if v.is_nan() {
                None
            } else {
                Some(v.to_string())
            }
        }
        AnyValue::Float64(v) => {
            if v.is_nan() {
                None
            } else {
                Some(v.to_string())
            }
        }
        other => Some(format!("{}", other)),
    }
}

/// The historical biotype heuristic: across several Ensembl release
/// vintages the `source` column actually carried the gene or transcript
/// biotype. If the value `protein_coding` occurs anywhere in `source`, the
/// column is duplicated into `gene_biotype` and `transcript_biotype` unless
/// those columns already exist. Best effort only; it can mislabel and that
/// is accepted behavior.
fn infer_biotype_columns(df: &mut DataFrame) -> anyhow::Result<()> {
    let Ok(source) = df.column("source") else {
        return Ok(());
    };
    let is_biotype = source
        .str()?
        .into_iter()
        .flatten()
        .any(|v| v == "protein_coding");
    if !is_biotype {
        return Ok(());
    }
    let source = source.clone();
    let names: HashSet<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    for biotype_column in ["gene_biotype", "transcript_biotype"] {
        if !names.contains(biotype_column) {
            let mut duplicated = source.clone();
            duplicated.rename(biotype_column);
            df.with_column(duplicated)?;
            info!("inferred '{}' from the source column", biotype_column);
        }
    }
    Ok(())
}
