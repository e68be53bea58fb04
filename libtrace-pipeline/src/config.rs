//! The textual pipeline-configuration front-end.
//!
//! One verb per line; indentation by tabs or multiples of 4 spaces encodes
//! the DAG (children are more-indented). An optional trailing parenthesized
//! block attaches per-node extras: a cache, or a render/export sink. Lines
//! beginning with `;` or `#` are comments.
use std::sync::Arc;

use libtrace_core::enums::{AesLeakage, AlongFilter, CryptoKind, FillOrder, Port, SummaryStat};
use libtrace_core::errors::*;

use crate::graph::TraceSet;
use crate::sink::{export, export_async, render, render_async, Export, Render};
use crate::tfm;
use crate::tfm::visualize::VizArgs;
use crate::tfm::MatchRegion;
use crate::Pipeline;

const MAX_TFM_DEPTH: usize = 64;

pub enum MainSink {
    Render { ts: Arc<TraceSet>, nthreads: usize },
    Export { ts: Arc<TraceSet>, port: u16 },
}

impl std::fmt::Debug for MainSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MainSink::Render { nthreads, .. } => {
                f.debug_struct("Render").field("nthreads", nthreads).finish()
            }
            MainSink::Export { port, .. } => {
                f.debug_struct("Export").field("port", port).finish()
            }
        }
    }
}

#[derive(Debug)]
pub enum AsyncSink {
    Render(Render),
    Export(Export),
}

#[derive(Debug)]
pub struct Parsed {
    pub main: Option<MainSink>,
    pub asyncs: Vec<AsyncSink>,
}

/// Split a line into words, quoted strings, and standalone parentheses.
fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '(' | ')' => {
                tokens.push(c.to_string());
                chars.next();
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => s.push(c),
                        None => {
                            return Err(LtError::invalid(
                                "failed to parse closing quote for string",
                            ))
                        }
                    }
                }
                tokens.push(format!("\"{}", s));
            }
            _ => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ' ' || c == '\t' || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    s.push(c);
                    chars.next();
                }
                tokens.push(s);
            }
        }
    }

    Ok(tokens)
}

struct Args<'a> {
    tokens: &'a [String],
    pos: usize,
    line: usize,
}

impl<'a> Args<'a> {
    fn next(&mut self) -> Result<&'a str> {
        let tok = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| LtError::invalid(format!("line {}: missing argument", self.line)))?;
        self.pos += 1;
        Ok(tok)
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(|s| s.as_str())
    }

    fn string(&mut self) -> Result<String> {
        let tok = self.next()?;
        tok.strip_prefix('"')
            .map(|s| s.to_string())
            .ok_or_else(|| LtError::invalid(format!("line {}: expected a string", self.line)))
    }

    fn boolean(&mut self) -> Result<bool> {
        match self.next()? {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(LtError::invalid(format!(
                "line {}: failed to parse boolean ({})",
                self.line, other
            ))),
        }
    }

    fn integer(&mut self) -> Result<usize> {
        let tok = self.next()?;
        tok.parse::<usize>().map_err(|_| {
            LtError::invalid(format!("line {}: failed to parse integer ({})", self.line, tok))
        })
    }

    fn signed(&mut self) -> Result<i64> {
        let tok = self.next()?;
        tok.parse::<i64>().map_err(|_| {
            LtError::invalid(format!("line {}: failed to parse integer ({})", self.line, tok))
        })
    }

    fn float(&mut self) -> Result<f64> {
        let tok = self.next()?;
        tok.parse::<f64>().map_err(|_| {
            LtError::invalid(format!("line {}: failed to parse float ({})", self.line, tok))
        })
    }

    fn memsize(&mut self) -> Result<usize> {
        let tok = self.next()?;
        let digits: String = tok.chars().take_while(|c| c.is_ascii_digit()).collect();
        let unit = &tok[digits.len()..];

        let base = digits.parse::<usize>().map_err(|_| {
            LtError::invalid(format!("line {}: bad memory size ({})", self.line, tok))
        })?;

        match unit {
            "G" => Ok(base * 1024 * 1024 * 1024),
            "M" => Ok(base * 1024 * 1024),
            "K" => Ok(base * 1024),
            "B" | "" => Ok(base),
            _ => Err(LtError::invalid(format!(
                "line {}: invalid size specifier ({})",
                self.line, unit
            ))),
        }
    }

    fn region(&mut self) -> Result<MatchRegion> {
        Ok(MatchRegion {
            ref_trace: self.integer()?,
            lower: self.integer()?,
            upper: self.integer()?,
            confidence: self.float()?,
        })
    }

    fn port(&mut self) -> Result<Port> {
        match self.next()? {
            "PORT_ECHO" => Ok(Port::Echo),
            "PORT_CPA_PROGRESS" => Ok(Port::CpaProgress),
            "PORT_CPA_SPLIT_PM" => Ok(Port::CpaSplitPm),
            "PORT_CPA_SPLIT_PM_PROGRESS" => Ok(Port::CpaSplitPmProgress),
            "PORT_EXTRACT_PATTERN_DEBUG" | "PORT_EXTRACT_TIMING_DEBUG" => {
                Ok(Port::ExtractTimingDebug)
            }
            other => Err(LtError::invalid(format!(
                "line {}: no matching enum found in table for {}",
                self.line, other
            ))),
        }
    }

    fn fill_order(&mut self) -> Result<FillOrder> {
        match self.next()? {
            "ROWS" => Ok(FillOrder::Rows),
            "COLS" => Ok(FillOrder::Cols),
            "PLOTS" => Ok(FillOrder::Plots),
            other => Err(LtError::invalid(format!(
                "line {}: no matching enum found in table for {}",
                self.line, other
            ))),
        }
    }

    fn crypto(&mut self) -> Result<CryptoKind> {
        match self.next()? {
            "AES128" => Ok(CryptoKind::Aes128),
            other => Err(LtError::invalid(format!(
                "line {}: no matching enum found in table for {}",
                self.line, other
            ))),
        }
    }

    fn summary(&mut self) -> Result<SummaryStat> {
        match self.next()? {
            "SUMMARY_AVG" => Ok(SummaryStat::Avg),
            "SUMMARY_DEV" => Ok(SummaryStat::Dev),
            "SUMMARY_MIN" => Ok(SummaryStat::Min),
            "SUMMARY_MAX" => Ok(SummaryStat::Max),
            other => Err(LtError::invalid(format!(
                "line {}: no matching enum found in table for {}",
                self.line, other
            ))),
        }
    }

    fn along(&mut self) -> Result<AlongFilter> {
        match self.next()? {
            "ALONG_NUM" => Ok(AlongFilter::Num),
            "ALONG_DATA" => Ok(AlongFilter::Data),
            other => Err(LtError::invalid(format!(
                "line {}: no matching enum found in table for {}",
                self.line, other
            ))),
        }
    }

    fn leakage(&mut self) -> Result<AesLeakage> {
        match self.next()? {
            "AES128_R0_R1_HD_NOMC" => Ok(AesLeakage::R0R1HdNomc),
            "AES128_R0_HW_ADDKEY_OUT" => Ok(AesLeakage::R0HwAddkeyOut),
            "AES128_R0_HW_SBOX_OUT" => Ok(AesLeakage::R0HwSboxOut),
            "AES128_R10_OUT_HD" => Ok(AesLeakage::R10OutHd),
            "AES128_R10_HW_SBOXIN" => Ok(AesLeakage::R10HwSboxIn),
            other => Err(LtError::invalid(format!(
                "line {}: no matching enum found in table for {}",
                self.line, other
            ))),
        }
    }
}

fn line_depth(line: &str, lineno: usize) -> Result<(usize, &str)> {
    let mut depth = 0usize;
    let mut nspace = 0usize;
    let mut pos = 0usize;

    for c in line.chars() {
        match c {
            '\t' => depth += 1,
            ' ' => {
                nspace += 1;
                if nspace % 4 == 0 {
                    depth += 1;
                    nspace = 0;
                }
            }
            _ => break,
        }
        pos += 1;
    }

    if nspace != 0 {
        return Err(LtError::invalid(format!(
            "line {}: invalid spacing detected: not multiple of 4 spaces",
            lineno
        )));
    }

    Ok((depth, &line[pos..]))
}

fn parse_extras(args: &mut Args<'_>, ts: &Arc<TraceSet>, parsed: &mut Parsed) -> Result<()> {
    loop {
        let tok = match args.peek() {
            Some(")") => {
                args.pos += 1;
                return Ok(());
            }
            Some(_) => args.next()?,
            None => return Ok(()),
        };

        match tok {
            "cache" => {
                let size = args.memsize()?;
                let assoc = args.integer()?;
                ts.create_cache(size, assoc)?;
            }
            "render" => {
                if parsed.main.is_some() {
                    return Err(LtError::invalid("duplicate main frontends not supported"));
                }
                parsed.main = Some(MainSink::Render {
                    ts: ts.clone(),
                    nthreads: args.integer()?,
                });
            }
            "export" => {
                if parsed.main.is_some() {
                    return Err(LtError::invalid("duplicate main frontends not supported"));
                }
                parsed.main = Some(MainSink::Export {
                    ts: ts.clone(),
                    port: args.integer()? as u16,
                });
            }
            "render_async" => {
                let nthreads = args.integer()?;
                parsed.asyncs.push(AsyncSink::Render(render_async(ts, nthreads)));
            }
            "export_async" => {
                let port = args.integer()? as u16;
                parsed.asyncs.push(AsyncSink::Export(export_async(ts, port)));
            }
            other => {
                return Err(LtError::invalid(format!(
                    "invalid extra argument: {}",
                    other
                )))
            }
        }
    }
}

fn parse_line(
    pipeline: &Arc<Pipeline>,
    args: &mut Args<'_>,
    prev: Option<&Arc<TraceSet>>,
    parsed: &mut Parsed,
) -> Result<Option<Arc<TraceSet>>> {
    let verb = args.next()?;
    let line = args.line;

    if verb == ";" || verb == "#" || verb.starts_with(';') || verb.starts_with('#') {
        return Ok(None);
    }

    let need_prev = || {
        prev.cloned()
            .ok_or_else(|| LtError::invalid(format!("line {}: transform without a source", line)))
    };

    let ts = if verb == "source" {
        let spec = args.string()?;
        pipeline.open(&spec)?
    } else {
        let prev = need_prev()?;
        let tfm = match verb {
            "save" => tfm::save::tfm_save(args.string()?),
            "synchronize" => tfm::synchronize::tfm_synchronize(args.integer()?),
            "wait_on" => {
                let port = args.port()?;
                let bufsize = args.memsize()?;
                tfm::wait_on::tfm_wait_on(port, bufsize)
            }
            "visualize" => {
                let rows = args.integer()?;
                let cols = args.integer()?;
                let plots = args.integer()?;
                let samples = args.integer()?;
                let order = [args.fill_order()?, args.fill_order()?, args.fill_order()?];
                let filename = match args.peek() {
                    Some(tok) if tok.starts_with('"') => Some(args.string()?),
                    _ => None,
                };
                tfm::visualize::tfm_visualize(VizArgs {
                    rows,
                    cols,
                    plots,
                    samples,
                    order,
                    filename,
                })
            }
            "average" => tfm::average::tfm_average(args.boolean()?),
            "verify" => tfm::verify::tfm_verify(args.crypto()?),
            "reduce_along" => {
                let stat = args.summary()?;
                let along = args.along()?;
                let num = match along {
                    AlongFilter::Num => args.integer()?,
                    AlongFilter::Data => 0,
                };
                tfm::reduce_along::tfm_reduce_along(stat, along, num)
            }
            "select_along" => {
                let stat = args.summary()?;
                let along = args.along()?;
                let num = match along {
                    AlongFilter::Num => args.integer()?,
                    AlongFilter::Data => 0,
                };
                tfm::select_along::tfm_select_along(stat, along, num)
            }
            "extract_pattern" => {
                let pattern_size = args.integer()?;
                let expecting = args.integer()?;
                let avg_len = args.integer()?;
                let max_dev = args.integer()?;
                let pattern = args.region()?;
                let crypto = args.crypto()?;
                tfm::extract::tfm_extract_timing(
                    pattern_size,
                    expecting,
                    avg_len,
                    max_dev,
                    pattern,
                    crypto,
                )
            }
            "split_tvla" => tfm::split_tvla::tfm_split_tvla(args.boolean()?),
            "narrow" => {
                let first_trace = args.signed()?.max(0) as usize;
                let num_traces = args.integer()?;
                let first_sample = args.signed()?.max(0) as usize;
                let num_samples = args.integer()?;
                tfm::narrow::tfm_narrow(first_trace, num_traces, first_sample, num_samples)
            }
            "append" => tfm::append::tfm_append(args.string()?),
            "static_align" => {
                let region = args.region()?;
                let max_shift = args.integer()?;
                tfm::static_align::tfm_static_align(
                    region.confidence,
                    max_shift,
                    region.ref_trace,
                    vec![(region.lower, region.upper)],
                )
            }
            "match" => {
                let first = args.region()?;
                let last = args.region()?;
                let pattern = args.region()?;
                let avg_len = args.integer()?;
                let max_dev = args.integer()?;
                tfm::matcher::tfm_match(first, last, pattern, avg_len, max_dev)?
            }
            "io_correlation" => {
                let verify_data = args.boolean()?;
                let granularity = args.integer()?;
                let num = args.integer()?;
                tfm::io_correlation::tfm_io_correlation(verify_data, granularity, num)?
            }
            "aes_intermediate" => tfm::aes::tfm_aes_intermediate(args.leakage()?, false),
            "aes_knownkey" => tfm::aes::tfm_aes_knownkey(),
            other => {
                return Err(LtError::invalid(format!(
                    "line {}: unknown transform: {}",
                    args.line, other
                )))
            }
        };

        pipeline.transform(&prev, tfm)?
    };

    if let Some("(") = args.peek() {
        args.pos += 1;
        parse_extras(args, &ts, parsed)?;
    }

    Ok(Some(ts))
}

/// Parse a whole configuration, building the pipeline as lines arrive.
pub fn parse_config(pipeline: &Arc<Pipeline>, text: &str) -> Result<Parsed> {
    let mut parsed = Parsed {
        main: None,
        asyncs: Vec::new(),
    };

    let mut nodes: Vec<Option<Arc<TraceSet>>> = vec![None; MAX_TFM_DEPTH];
    let mut last_depth = 0usize;

    for (lineno, raw) in text.lines().enumerate() {
        let lineno = lineno + 1;
        if raw.trim().is_empty() {
            continue;
        }

        let (depth, rest) = line_depth(raw, lineno)?;
        if depth >= MAX_TFM_DEPTH {
            return Err(LtError::invalid(format!(
                "line {}: configuration nested too deeply",
                lineno
            )));
        }
        if depth > last_depth + 1 {
            return Err(LtError::invalid(format!(
                "line {}: child skips an indentation level",
                lineno
            )));
        }

        let tokens = tokenize(rest)?;
        if tokens.is_empty() {
            continue;
        }

        let mut args = Args {
            tokens: &tokens,
            pos: 0,
            line: lineno,
        };

        let prev = if depth == 0 {
            None
        } else {
            nodes[depth - 1].as_ref()
        };

        match parse_line(pipeline, &mut args, prev, &mut parsed)? {
            Some(ts) => {
                nodes[depth] = Some(ts);
                last_depth = depth;
            }
            None => {} // comment
        }
    }

    Ok(parsed)
}

/// Parse and drive a whole configuration: run the main sink, join the
/// asynchronous ones, then tear the pipeline down.
pub fn evaluate(text: &str) -> Result<()> {
    let pipeline = Pipeline::new();
    let parsed = parse_config(&pipeline, text)?;

    match &parsed.main {
        Some(MainSink::Render { ts, nthreads }) => render(ts, *nthreads)?,
        Some(MainSink::Export { ts, port }) => export(ts, *port)?,
        None => return Err(LtError::invalid("found neither main render or export")),
    }

    for sink in parsed.asyncs {
        match sink {
            AsyncSink::Render(r) => r.join()?,
            AsyncSink::Export(e) => e.join()?,
        }
    }

    pipeline.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_handles_strings_and_parens() {
        let tokens = tokenize("save \"trs /tmp/x y.trs\" ( cache 1M 4 )").unwrap();
        assert_eq!(
            tokens,
            vec!["save", "\"trs /tmp/x y.trs", "(", "cache", "1M", "4", ")"]
        );
    }

    #[test]
    fn memsize_suffixes() {
        let tokens = vec!["64M".to_string(), "512".to_string(), "2K".to_string()];
        let mut args = Args {
            tokens: &tokens,
            pos: 0,
            line: 1,
        };
        assert_eq!(args.memsize().unwrap(), 64 * 1024 * 1024);
        assert_eq!(args.memsize().unwrap(), 512);
        assert_eq!(args.memsize().unwrap(), 2048);
    }

    #[test]
    fn depth_counts_tabs_and_spaces() {
        assert_eq!(line_depth("save", 1).unwrap().0, 0);
        assert_eq!(line_depth("\tsave", 1).unwrap().0, 1);
        assert_eq!(line_depth("        save", 1).unwrap().0, 2);
        assert!(line_depth("   save", 1).is_err());
    }

    #[test]
    fn unknown_verb_is_invalid() {
        let pipeline = Pipeline::new();
        let err = parse_config(&pipeline, "frobnicate 3\n").unwrap_err();
        assert!(matches!(err, LtError::Invalid { .. }));
    }

    #[test]
    fn transform_without_source_is_invalid() {
        let pipeline = Pipeline::new();
        assert!(parse_config(&pipeline, "average true\n").is_err());
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        let pipeline = Pipeline::new();
        let parsed = parse_config(&pipeline, "; a comment\n# another\n\n").unwrap();
        assert!(parsed.main.is_none());
    }
}
