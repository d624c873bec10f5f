use crate::error::GtframeError;
use crate::gtframe_utils::is_gzipped_path;
use crate::options::ReaderOptions;
use crate::reader::attributes::{AttributeTable, Interner};
use anyhow::bail;
use flate2::bufread::MultiGzDecoder;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info};

/// Splits one GTF line into its 9 tab-separated fields.
///
/// The split stops after the 9th field, so tabs inside the attribute blob
/// stay part of it. A line with fewer than 9 fields is a structural error
/// for the whole file, reported with the observed field count.
pub fn tokenize_line(line: &str, line_number: usize) -> Result<[&str; 9], GtframeError> {
    let mut out = [""; 9];
    let mut n = 0usize;
    for field in line.splitn(9, '\t') {
        out[n] = field;
        n += 1;
    }
    if n != 9 {
        return Err(GtframeError::Parsing {
            n_fields: n,
            line_number,
        });
    }
    Ok(out)
}

/// Corrects the erroneous quote/semicolon sequences found in one historical
/// Ensembl release (release 78 had attribute values like `"PRAMEF6;"` and
/// `"PRAMEF6;-201"`). The two-character sequence `;"` becomes `"` and `;-`
/// becomes `-`. A narrow, lossy repair kept for compatibility, not a general
/// quoting fix.
pub(crate) fn repair_attributes(attributes: &str) -> Cow<'_, str> {
    if attributes.contains(";\"") || attributes.contains(";-") {
        Cow::Owned(attributes.replace(";\"", "\"").replace(";-", "-"))
    } else {
        Cow::Borrowed(attributes)
    }
}

/// Columnar accumulation of all records of a GTF file.
///
/// This struct holds the 8 fixed columns plus either the expanded
/// [`AttributeTable`] or the raw attribute strings, and is the intermediate
/// between the line-oriented reader and the Polars data frame built by
/// [`crate::GtfFrame`]. All column vectors have the same length.
///
/// `start`/`end` are 1-based inclusive positions. A score of `.` is stored
/// as `None`, and so is a frame of `.`; the strand column keeps the literal
/// text (`+`, `-` or `.`).
pub struct GtfStruct {
    pub seqname: Vec<Rc<str>>,
    pub source: Vec<Rc<str>>,
    pub feature: Vec<Rc<str>>,
    pub start: Vec<i64>,
    pub end: Vec<i64>,
    pub score: Vec<Option<f32>>,
    pub strand: Vec<Rc<str>>,
    pub frame: Vec<Option<Rc<str>>>,
    pub attributes: AttributeTable,
    /// Raw attribute strings, populated only when expansion is disabled.
    pub raw_attributes: Vec<String>,
    /// Comment lines (`#`-prefixed) encountered while reading, verbatim.
    pub comments: Vec<String>,
    interner: Interner,
}

impl GtfStruct {
    pub fn new(opts: &ReaderOptions) -> GtfStruct {
        let mut attributes = AttributeTable::new(opts.quote_char, &opts.missing_value);
        if opts.expand_attribute_column {
            if let Some(usecols) = &opts.usecols {
                attributes = attributes.with_restriction(usecols.iter().cloned().collect());
            }
        }
        GtfStruct {
            seqname: Vec::with_capacity(10_000),
            source: Vec::with_capacity(10_000),
            feature: Vec::with_capacity(10_000),
            start: Vec::with_capacity(10_000),
            end: Vec::with_capacity(10_000),
            score: Vec::with_capacity(10_000),
            strand: Vec::with_capacity(10_000),
            frame: Vec::with_capacity(10_000),
            attributes,
            raw_attributes: Vec::new(),
            comments: Vec::new(),
            interner: Interner::new(),
        }
    }

    /// Reads a GTF file from a path, decompressing when the filename ends in
    /// `.gz` or `.gzip`. Fails with [`GtframeError::FileNotFound`] before
    /// attempting any read if the path does not exist.
    pub fn from_path<T: AsRef<Path>>(
        file_path: T,
        opts: &ReaderOptions,
    ) -> anyhow::Result<GtfStruct> {
        let file_path = file_path.as_ref();
        if !file_path.exists() {
            bail!(GtframeError::FileNotFound {
                path: file_path.to_path_buf(),
            });
        }
        let file = File::open(file_path)?;
        if is_gzipped_path(file_path) {
            info!("input filename ends in .gz/.gzip - reading via decompression");
            let rdr = BufReader::new(MultiGzDecoder::new(BufReader::new(file)));
            GtfStruct::from_reader(rdr, opts)
        } else {
            GtfStruct::from_reader(BufReader::new(file), opts)
        }
    }

    /// Parses GTF text from any buffered reader.
    ///
    /// Blank lines and `#` comments are skipped; every other line must
    /// tokenize into 9 fields or the whole parse fails. Feature filtering
    /// happens here, before any attribute work, so discarded rows cost no
    /// expansion. Raw attribute strings are buffered and drained into the
    /// expander every `opts.chunksize` rows to bound peak memory.
    pub fn from_reader<R: BufRead>(reader: R, opts: &ReaderOptions) -> anyhow::Result<GtfStruct> {
        let mut gs = GtfStruct::new(opts);
        let mut pending: Vec<String> = Vec::new();
        let mut n_comments = 0usize;
        let mut n_records = 0usize;
        let mut n_filtered = 0usize;

        for (i, l) in reader.lines().enumerate() {
            let line = l?;
            let line_number = i + 1;
            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with('#') {
                n_comments += 1;
                gs.comments.push(line);
                continue;
            }
            let [seqname, source, feature, start, end, score, strand, frame, attributes] =
                tokenize_line(&line, line_number)?;

            if let Some(features) = &opts.features {
                if !features.contains(feature) {
                    n_filtered += 1;
                    continue;
                }
            }
            n_records += 1;

            gs.seqname.push(gs.interner.intern(seqname));
            gs.source.push(gs.interner.intern(source));
            gs.feature.push(gs.interner.intern(feature));
            gs.start.push(parse_coordinate(start, "start", line_number)?);
            gs.end.push(parse_coordinate(end, "end", line_number)?);
            gs.score.push(if score == "." {
                None
            } else {
                Some(score.parse::<f32>().map_err(|_| {
                    GtframeError::InvalidField {
                        field: "score",
                        value: score.to_string(),
                        line_number,
                    }
                })?)
            });
            gs.strand.push(gs.interner.intern(strand));
            // frame "." materializes as null, never as 0
            gs.frame.push(if frame == "." {
                None
            } else {
                Some(gs.interner.intern(frame))
            });

            let attributes = repair_attributes(attributes);
            if opts.expand_attribute_column {
                pending.push(attributes.into_owned());
                if pending.len() >= opts.chunksize {
                    gs.absorb_chunk(&mut pending);
                }
            } else {
                gs.raw_attributes.push(attributes.into_owned());
            }
        }

        if opts.expand_attribute_column {
            gs.absorb_chunk(&mut pending);
            gs.attributes.finish();
        }

        if n_filtered > 0 {
            info!("feature filter discarded {} records", n_filtered);
        }
        info!(
            "finished parsing the input. found {} comments and {} records",
            n_comments, n_records
        );
        Ok(gs)
    }

    pub fn n_rows(&self) -> usize {
        self.seqname.len()
    }

    fn absorb_chunk(&mut self, pending: &mut Vec<String>) {
        if pending.is_empty() {
            return;
        }
        debug!("expanding a chunk of {} attribute strings", pending.len());
        for attrs in pending.drain(..) {
            self.attributes.push_row(&attrs);
        }
    }
}

fn parse_coordinate(
    value: &str,
    field: &'static str,
    line_number: usize,
) -> Result<i64, GtframeError> {
    value.parse::<i64>().map_err(|_| GtframeError::InvalidField {
        field,
        value: value.to_string(),
        line_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GTF_RECORD: &[u8] = b"# sample data in the style of an Ensembl release\n1\ttranscribed_unprocessed_pseudogene\tgene\t11869\t14409\t.\t+\t.\tgene_id \"ENSG00000223972\"; gene_name \"DDX11L1\"; gene_source \"havana\"; gene_biotype \"transcribed_unprocessed_pseudogene\";\n1\tprocessed_transcript\ttranscript\t11869\t14409\t.\t+\t.\tgene_id \"ENSG00000223972\"; transcript_id \"ENST00000456328\"; gene_name \"DDX11L1\"; gene_source \"havana\"; gene_biotype \"transcribed_unprocessed_pseudogene\"; transcript_name \"DDX11L1-002\"; transcript_source \"havana\";\n\n1\thavana\texon\t11869\t12227\t5.5\t+\t0\tgene_id \"ENSG00000223972\"; transcript_id \"ENST00000456328\"; exon_number \"1\";\n";

    fn strs(v: &[Rc<str>]) -> Vec<&str> {
        v.iter().map(|s| s.as_ref()).collect()
    }

    #[test]
    fn test_tokenize_line() {
        let line = "1\thavana\texon\t1\t10\t.\t+\t.\tgene_id \"g1\";";
        let fields = tokenize_line(line, 1).unwrap();
        assert_eq!(fields[0], "1");
        assert_eq!(fields[2], "exon");
        assert_eq!(fields[8], "gene_id \"g1\";");
    }

    #[test]
    fn test_tokenize_line_rejoins_fixed_fields() {
        let line = "chr1\tHAVANA\tgene\t29554\t31109\t.\t+\t.\tgene_id \"ENSG00000243485\";";
        let fields = tokenize_line(line, 1).unwrap();
        assert_eq!(fields[..8].join("\t"), line.rsplit_once('\t').unwrap().0);
    }

    #[test]
    fn test_tokenize_line_wrong_field_count() {
        let err = tokenize_line("a\tb c\td", 7).unwrap_err();
        match err {
            GtframeError::Parsing {
                n_fields,
                line_number,
            } => {
                assert_eq!(n_fields, 3);
                assert_eq!(line_number, 7);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_tokenize_line_keeps_tabs_in_attribute_field() {
        let line = "1\ts\texon\t1\t10\t.\t+\t.\tgene_id \"g1\";\textra";
        let fields = tokenize_line(line, 1).unwrap();
        assert_eq!(fields[8], "gene_id \"g1\";\textra");
    }

    #[test]
    fn test_repair_attributes() {
        assert_eq!(
            repair_attributes("gene_name \"PRAMEF6;\"; transcript_name \"PRAMEF6;-201\";"),
            "gene_name \"PRAMEF6\"; transcript_name \"PRAMEF6-201\";"
        );
        // untouched input borrows rather than copies
        assert!(matches!(
            repair_attributes("gene_id \"ENSG001\";"),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn test_from_reader() {
        let opts = ReaderOptions::default();
        let gs = GtfStruct::from_reader(GTF_RECORD, &opts).unwrap();

        assert_eq!(gs.n_rows(), 3);
        assert_eq!(gs.comments.len(), 1);
        assert_eq!(strs(&gs.seqname), vec!["1"; 3]);
        assert_eq!(strs(&gs.feature), vec!["gene", "transcript", "exon"]);
        assert_eq!(gs.start, vec![11869, 11869, 11869]);
        assert_eq!(gs.end, vec![14409, 14409, 12227]);
        assert_eq!(gs.score, vec![None, None, Some(5.5)]);
        assert_eq!(strs(&gs.strand), vec!["+"; 3]);
        assert_eq!(gs.frame[0], None);
        assert_eq!(gs.frame[2].as_deref(), Some("0"));

        let gene_id: Vec<_> = gs
            .attributes
            .column("gene_id")
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(gene_id, vec!["ENSG00000223972"; 3]);
        let transcript_id: Vec<_> = gs
            .attributes
            .column("transcript_id")
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(
            transcript_id,
            vec!["", "ENST00000456328", "ENST00000456328"]
        );
    }

    #[test]
    fn test_from_reader_bad_line_is_fatal() {
        let data: &[u8] = b"1\thavana\texon\t1\n";
        let err = GtfStruct::from_reader(data, &ReaderOptions::default()).unwrap_err();
        let parse_err = err.downcast_ref::<GtframeError>().unwrap();
        assert!(matches!(
            parse_err,
            GtframeError::Parsing {
                n_fields: 4,
                line_number: 1
            }
        ));
    }

    #[test]
    fn test_from_reader_feature_filter() {
        let opts = ReaderOptions::default().with_features(&["exon"]);
        let gs = GtfStruct::from_reader(GTF_RECORD, &opts).unwrap();
        assert_eq!(gs.n_rows(), 1);
        assert_eq!(strs(&gs.feature), vec!["exon"]);
        // only the exon row's attributes were expanded
        assert_eq!(gs.attributes.n_rows(), 1);
        assert_eq!(
            gs.attributes.column("exon_number").unwrap()[0].as_ref(),
            "1"
        );
    }

    #[test]
    fn test_from_reader_without_expansion() {
        let opts = ReaderOptions::default().with_expand_attribute_column(false);
        let gs = GtfStruct::from_reader(GTF_RECORD, &opts).unwrap();
        assert_eq!(gs.raw_attributes.len(), 3);
        assert!(gs.attributes.is_empty());
        assert!(gs.raw_attributes[0].starts_with("gene_id \"ENSG00000223972\";"));
    }

    #[test]
    fn test_chunked_expansion_matches_unchunked() {
        let small = ReaderOptions::default().with_chunksize(1);
        let large = ReaderOptions::default();
        let a = GtfStruct::from_reader(GTF_RECORD, &small).unwrap();
        let b = GtfStruct::from_reader(GTF_RECORD, &large).unwrap();
        assert_eq!(
            a.attributes.keys().collect::<Vec<_>>(),
            b.attributes.keys().collect::<Vec<_>>()
        );
        for key in a.attributes.keys() {
            assert_eq!(
                a.attributes.column(key).unwrap(),
                b.attributes.column(key).unwrap(),
                "column {} differs between chunk sizes",
                key
            );
        }
    }

    #[test]
    fn test_invalid_start_is_reported() {
        let data: &[u8] = b"1\ts\texon\toops\t10\t.\t+\t.\tgene_id \"g1\";\n";
        let err = GtfStruct::from_reader(data, &ReaderOptions::default()).unwrap_err();
        let parse_err = err.downcast_ref::<GtframeError>().unwrap();
        assert!(matches!(
            parse_err,
            GtframeError::InvalidField { field: "start", .. }
        ));
    }
}
