//! The conversion loop
//!
//! Each input file is segmented lazily; every document is prepared, parsed
//! and extracted into the accumulator, and the accumulator is flushed to the
//! sink once the file is done. Per-document failures either stop the run or
//! are logged and skipped, depending on `continue_on_error`.

use crate::config::{expand_inputs, TabulateConfig};
use crate::dtd::DtdResolver;
use crate::error::DocumentError;
use crate::extract::{DocumentContext, Extractor, TableAccumulator};
use crate::schema::CompiledSchema;
use crate::segment::{segment_file, RawDocument, Segment, SegmenterConfig};
use crate::writer::{open_sink, TableSink};
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const PROGRESS_INTERVAL: usize = 100;

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files: usize,
    pub documents: usize,
    pub failed: usize,
    pub wrappers: usize,
    pub malformed: usize,
    /// Records written per entity
    pub records: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn total_records(&self) -> usize {
        self.records.values().sum()
    }

    /// A run fails when documents were lost and nothing was converted
    pub fn is_failure(&self) -> bool {
        self.failed + self.malformed > 0 && self.documents == 0
    }
}

pub struct Tabulator<'s> {
    extractor: Extractor<'s>,
    schema: &'s CompiledSchema,
    resolver: DtdResolver,
    segmenter: SegmenterConfig,
    continue_on_error: bool,
}

impl<'s> Tabulator<'s> {
    pub fn new(schema: &'s CompiledSchema, config: &TabulateConfig) -> Self {
        Tabulator {
            extractor: Extractor::new(schema),
            schema,
            resolver: DtdResolver::new(config.dtd_dir.clone(), config.validate),
            segmenter: config.segmenter.clone(),
            continue_on_error: config.continue_on_error,
        }
    }

    /// Prepare, parse and extract one document into the accumulator
    pub fn process_document(
        &mut self,
        raw: &RawDocument,
        file_name: &str,
        tables: &mut TableAccumulator,
    ) -> Result<(), DocumentError> {
        let prepared = self.resolver.prepare(&raw.text);
        let doc = prepared.parse()?;
        self.extractor
            .process_document(&doc, &DocumentContext { file_name }, tables)
    }

    fn document_failed(
        &self,
        path: &Path,
        raw: &RawDocument,
        err: DocumentError,
        summary: &mut RunSummary,
    ) -> Result<()> {
        summary.failed += 1;
        debug!("{}", raw.text);
        let location = format!(
            "{}, document at line {} (record {})",
            path.display(),
            raw.start_line,
            err.record_key().unwrap_or("unknown")
        );
        if !self.continue_on_error {
            return Err(anyhow::Error::new(err).context(location));
        }
        warn!("{location}: {err}");
        Ok(())
    }

    /// Extract every document of one file into `tables` without flushing
    pub fn process_file(
        &mut self,
        path: &Path,
        tables: &mut TableAccumulator,
        summary: &mut RunSummary,
    ) -> Result<usize> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let segments = segment_file(path, self.segmenter.clone())
            .with_context(|| format!("Failed to open input: {}", path.display()))?;

        let mut documents = 0;
        for segment in segments {
            let segment =
                segment.with_context(|| format!("Failed to read input: {}", path.display()))?;
            match segment {
                Segment::Document(raw) => {
                    documents += 1;
                    if documents % PROGRESS_INTERVAL == 0 {
                        debug!("Processing document {documents}...");
                    }
                    match self.process_document(&raw, &file_name, tables) {
                        Ok(()) => summary.documents += 1,
                        Err(err) => self.document_failed(path, &raw, err, summary)?,
                    }
                }
                Segment::Wrapper { start_line } => {
                    summary.wrappers += 1;
                    debug!("Skipping wrapper document at line {start_line}");
                }
                Segment::Malformed(warning) => {
                    summary.malformed += 1;
                    debug!("{}", warning.text);
                    if !self.continue_on_error {
                        return Err(anyhow::Error::new(warning))
                            .with_context(|| format!("Failed to segment {}", path.display()));
                    }
                    warn!("{}: {warning}", path.display());
                }
            }
        }
        Ok(documents)
    }

    /// Convert every file, flushing to the sink after each one
    pub fn run(&mut self, files: &[PathBuf], sink: &mut dyn TableSink) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut tables = TableAccumulator::new();

        if files.is_empty() {
            warn!("No input files to process!");
        }

        for path in files {
            info!("Processing {}...", path.display());
            let documents = self.process_file(path, &mut tables, &mut summary)?;
            summary.files += 1;

            let flushed = tables.flush();
            for table in &flushed {
                *summary.records.entry(table.entity.clone()).or_default() += table.records.len();
            }
            sink.write_tables(&flushed, self.schema.columns())
                .with_context(|| format!("Failed to write tables for {}", path.display()))?;
            info!("...{documents} records processed!");
        }

        sink.finish()?;
        info!(
            "Converted {} documents from {} files into {} records ({} failed, {} wrappers skipped)",
            summary.documents,
            summary.files,
            summary.total_records(),
            summary.failed + summary.malformed,
            summary.wrappers
        );
        Ok(summary)
    }
}

/// Run a whole conversion from a configuration
pub fn run(config: &TabulateConfig) -> Result<RunSummary> {
    let schema = CompiledSchema::load(&config.schema_path)
        .with_context(|| format!("Failed to load schema: {}", config.schema_path.display()))?;
    let files = expand_inputs(&config.inputs, config.recurse)?;
    if let Some(dir) = &config.dtd_dir {
        if !dir.is_dir() {
            bail!("DTD directory does not exist: {}", dir.display());
        }
    }
    let mut sink = open_sink(config.output_kind, &config.output_dir)?;
    Tabulator::new(&schema, config).run(&files, sink.as_mut())
}
