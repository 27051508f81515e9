//! Split a stream of concatenated XML documents into individual documents
//!
//! Bulk archives glue many documents together, each starting with its own
//! `<?xml ...?>` declaration. The stream is read one line at a time and only
//! the document being buffered is held in memory.

use crate::error::SegmentationWarning;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// DOCTYPE of the sequence-listing wrapper found in patent grant archives
pub const DEFAULT_WRAPPER_DOCTYPE: &str = "sequence-cwu";

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Documents whose DOCTYPE names one of these are dropped
    pub wrapper_doctypes: Vec<String>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        SegmenterConfig {
            wrapper_doctypes: vec![DEFAULT_WRAPPER_DOCTYPE.to_string()],
        }
    }
}

/// One document cut from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    /// 1-based line of the document's first line
    pub start_line: usize,
    pub text: String,
}

/// What the segmenter produced at a document boundary
#[derive(Debug, Clone)]
pub enum Segment {
    Document(RawDocument),
    /// A wrapper-only document that was filtered out
    Wrapper { start_line: usize },
    /// A buffer whose boundary could not be determined; it was dropped
    Malformed(SegmentationWarning),
}

#[derive(Debug)]
enum State {
    AwaitingDeclaration,
    Buffering { start_line: usize, lines: Vec<String> },
}

/// Line-driven segmentation state machine, free of any I/O
#[derive(Debug)]
pub struct Segmenter {
    state: State,
    config: SegmenterConfig,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Segmenter {
            state: State::AwaitingDeclaration,
            config,
        }
    }

    /// Feed the next line (with its line ending). Returns the previous
    /// document once a new declaration closes it.
    pub fn feed(&mut self, line_no: usize, line: String) -> Option<Segment> {
        let state = std::mem::replace(&mut self.state, State::AwaitingDeclaration);
        let (next, emitted) = match state {
            State::AwaitingDeclaration if line.trim().is_empty() => (State::AwaitingDeclaration, None),
            State::AwaitingDeclaration => (
                State::Buffering {
                    start_line: line_no,
                    lines: vec![line],
                },
                None,
            ),
            State::Buffering { start_line, lines } if is_declaration(&line) => {
                let emitted = self.close(start_line, lines, false);
                (
                    State::Buffering {
                        start_line: line_no,
                        lines: vec![line],
                    },
                    Some(emitted),
                )
            }
            State::Buffering {
                start_line,
                mut lines,
            } => {
                lines.push(line);
                (State::Buffering { start_line, lines }, None)
            }
        };
        self.state = next;
        emitted
    }

    /// Flush the last buffered document at end of stream
    pub fn finish(&mut self) -> Option<Segment> {
        match std::mem::replace(&mut self.state, State::AwaitingDeclaration) {
            State::AwaitingDeclaration => None,
            State::Buffering { start_line, lines } => Some(self.close(start_line, lines, true)),
        }
    }

    fn close(&self, start_line: usize, lines: Vec<String>, at_end: bool) -> Segment {
        // wrappers are dropped at end of stream too, not yielded as the final document
        if lines.get(1).is_some_and(|second| self.is_wrapper(second)) {
            return Segment::Wrapper { start_line };
        }
        let text = lines.concat();
        // a declaration followed directly by another one
        if !at_end && lines.len() < 2 {
            return Segment::Malformed(SegmentationWarning {
                line: start_line,
                text,
            });
        }
        Segment::Document(RawDocument { start_line, text })
    }

    fn is_wrapper(&self, line: &str) -> bool {
        let Some(rest) = line.strip_prefix("<!DOCTYPE") else {
            return false;
        };
        let name = rest
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '>' || c == '[')
            .next()
            .unwrap_or_default();
        self.config.wrapper_doctypes.iter().any(|w| w == name)
    }
}

fn is_declaration(line: &str) -> bool {
    line.trim_start_matches('\u{feff}').starts_with("<?xml ")
}

/// Lazy iterator over the segments of a reader
pub struct Segments<R: BufRead> {
    reader: R,
    machine: Segmenter,
    line_no: usize,
    buf: Vec<u8>,
    done: bool,
}

impl<R: BufRead> Segments<R> {
    pub fn new(reader: R, config: SegmenterConfig) -> Self {
        Segments {
            reader,
            machine: Segmenter::new(config),
            line_no: 0,
            buf: Vec::with_capacity(4096),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for Segments<R> {
    type Item = io::Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return self.machine.finish().map(Ok);
                }
                Ok(_) => {
                    self.line_no += 1;
                    let line = String::from_utf8_lossy(&self.buf).into_owned();
                    if let Some(segment) = self.machine.feed(self.line_no, line) {
                        return Some(Ok(segment));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Open a file and segment it lazily. Each call starts from the top.
pub fn segment_file<P: AsRef<Path>>(
    path: P,
    config: SegmenterConfig,
) -> io::Result<Segments<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(Segments::new(BufReader::new(file), config))
}
