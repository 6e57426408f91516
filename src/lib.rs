//! Reverses common JavaScript obfuscation: hex-escaped string literals,
//! rotated string pools behind decoder functions, proxy wrappers,
//! anti-tampering traps and hexadecimal control-flow arithmetic.
//!
//! The work happens in an ordered sequence of text rewriting passes plus two
//! side-channel reads that execute fragments of the input program inside an
//! isolated, budgeted evaluator (see [sandbox]) to recover the string pool
//! and the decoder functions. Transformation is best effort: a pass that
//! finds nothing leaves the buffer untouched, and an evaluation failure
//! degrades the run instead of aborting it.

use tracing::{debug, warn};

pub mod deobfuscate;
pub mod sandbox;

use deobfuscate::decoders::{self, DecoderSet};
use deobfuscate::{dead_code, format, literals, numbers, proxies, rotation, string_pool};

/// Step budget for each isolated evaluation. Generous enough for real pool
/// and decoder fragments, small enough to cut off hostile loops quickly.
pub const DEFAULT_EVAL_BUDGET: u64 = 1_000_000;

/// Byte lengths and rewrite counts for one pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub bytes_before: usize,
    pub bytes_after: usize,
    /// Rewrites applied, or entries recovered for the read-only stages.
    pub rewrites: usize,
}

/// Counters for a whole run. Created fresh per run and immutable once the
/// run returns.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Report {
    pub input_bytes: usize,
    pub output_bytes: usize,
    pub pool_entries: usize,
    pub decoders_resolved: bool,
    pub stages: Vec<StageReport>,
}

impl Report {
    /// Overall size reduction as a percentage, rounded to two decimals.
    pub fn reduction_percent(&self) -> f64 {
        if self.input_bytes == 0 {
            return 0.0;
        }
        let ratio = 1.0 - self.output_bytes as f64 / self.input_bytes as f64;
        (ratio * 100.0 * 100.0).round() / 100.0
    }
}

/// Everything a run produces.
pub struct DeobfuscationOutput {
    /// The rewritten program text.
    pub code: String,

    /// The recovered string pool, in declared (pre-rotation) order. Empty
    /// when extraction found nothing usable.
    pub pool: Vec<String>,

    /// The resolved decoder callables, when resolution succeeded. These can
    /// replay pool lookups but are not substituted back into the text.
    pub decoders: Option<DecoderSet>,

    pub report: Report,
}

/// The deobfuscation pipeline. One instance can process many inputs; no
/// state survives a [Deobfuscator::run] call.
pub struct Deobfuscator {
    eval_budget: u64,
}

impl Default for Deobfuscator {
    fn default() -> Self {
        Self::new()
    }
}

impl Deobfuscator {
    pub fn new() -> Self {
        Self {
            eval_budget: DEFAULT_EVAL_BUDGET,
        }
    }

    /// Overrides the step budget used for isolated evaluations.
    pub fn with_eval_budget(eval_budget: u64) -> Self {
        Self { eval_budget }
    }

    /// Runs every pass over `source` and returns the rewritten text along
    /// with the recovered pipeline state and the run report.
    pub fn run(&self, source: &str) -> DeobfuscationOutput {
        let mut report = Report {
            input_bytes: source.len(),
            output_bytes: 0,
            pool_entries: 0,
            decoders_resolved: false,
            stages: Vec::new(),
        };

        let code = text_stage(&mut report, "fold-hex-chains", source.to_string(), |c| {
            literals::fold_hex_chains(c)
        });
        let code = text_stage(&mut report, "decode-hex-literals", code, |c| {
            literals::decode_hex_literals(c)
        });

        // Side-channel read: the buffer is not touched.
        let pool = match string_pool::extract(&code, self.eval_budget) {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(error = %e, "string pool extraction failed, continuing with an empty pool");
                None
            }
        };
        let pool_entries = pool.as_ref().map_or(0, |p| p.entries.len());
        report.pool_entries = pool_entries;
        read_stage(&mut report, "extract-string-pool", code.len(), pool_entries);

        let code = text_stage(&mut report, "strip-rotation", code, |c| rotation::strip(c));

        let decoder_fns =
            decoders::find_decoder_functions(&code, pool.as_ref().map(|p| p.fn_name.as_str()));
        let decoder_names: Vec<String> = decoder_fns.iter().map(|d| d.name.clone()).collect();
        let code = text_stage(&mut report, "strip-proxies", code, |c| {
            proxies::strip(c, &decoder_names)
        });

        // Second side-channel read, resolving the decoder definitions found
        // before proxy stripping against the extracted pool.
        let decoder_set = match &pool {
            Some(pool) if !decoder_fns.is_empty() => {
                match decoders::resolve(&decoder_fns, &pool.entries, &pool.fn_name, self.eval_budget)
                {
                    Ok(set) => Some(set),
                    Err(e) => {
                        warn!(error = %e, "decoder resolution failed, continuing without decoders");
                        None
                    }
                }
            }
            Some(_) => {
                debug!("no decoder definitions found");
                None
            }
            None => {
                warn!("skipping decoder resolution, no string pool was recovered");
                None
            }
        };
        report.decoders_resolved = decoder_set.is_some();
        read_stage(&mut report, "resolve-decoders", code.len(), decoder_fns.len());

        let code = text_stage(&mut report, "strip-dead-code", code, |c| dead_code::strip(c));
        let code = text_stage(&mut report, "normalize-numbers", code, |c| {
            numbers::normalize(c)
        });
        let code = text_stage(&mut report, "format", code, |c| format::tidy(c));

        report.output_bytes = code.len();
        DeobfuscationOutput {
            code,
            pool: pool.map(|p| p.entries).unwrap_or_default(),
            decoders: decoder_set,
            report,
        }
    }
}

fn text_stage(
    report: &mut Report,
    stage: &'static str,
    code: String,
    f: impl FnOnce(&str) -> (String, usize),
) -> String {
    let bytes_before = code.len();
    let (next, rewrites) = f(&code);
    debug!(
        stage,
        bytes_before,
        bytes_after = next.len(),
        rewrites,
        "stage complete"
    );
    report.stages.push(StageReport {
        stage,
        bytes_before,
        bytes_after: next.len(),
        rewrites,
    });
    next
}

fn read_stage(report: &mut Report, stage: &'static str, bytes: usize, recovered: usize) {
    debug!(stage, recovered, "stage complete");
    report.stages.push(StageReport {
        stage,
        bytes_before: bytes,
        bytes_after: bytes,
        rewrites: recovered,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_hex_literals_become_plain_strings() {
        let input = "const a = '\\x68'+'\\x65'+'\\x6c'+'\\x6c'+'\\x6f';";
        let output = Deobfuscator::new().run(input);
        assert!(output.code.contains("const a = 'hello';"), "{}", output.code);
        let expected =
            (1.0 - output.report.output_bytes as f64 / input.len() as f64) * 100.0;
        assert!((output.report.reduction_percent() - expected).abs() < 0.01);
    }

    #[test]
    fn reduction_rounds_to_two_decimals() {
        let report = Report {
            input_bytes: 1000,
            output_bytes: 800,
            pool_entries: 0,
            decoders_resolved: false,
            stages: Vec::new(),
        };
        assert_eq!(format!("{:.2}", report.reduction_percent()), "20.00");

        let report = Report {
            input_bytes: 3,
            output_bytes: 2,
            pool_entries: 0,
            decoders_resolved: false,
            stages: Vec::new(),
        };
        assert_eq!(format!("{:.2}", report.reduction_percent()), "33.33");
    }

    #[test]
    fn unobfuscated_input_passes_through() {
        let input = "function add(a, b) { return a + b; }\n";
        let output = Deobfuscator::new().run(input);
        assert_eq!(output.code, input);
        assert!(output.pool.is_empty());
        assert!(output.decoders.is_none());
    }

    #[test]
    fn empty_input_reports_zero_reduction() {
        let output = Deobfuscator::new().run("");
        assert_eq!(output.code, "");
        assert_eq!(output.report.reduction_percent(), 0.0);
    }

    #[test]
    fn every_stage_is_reported() {
        let output = Deobfuscator::new().run("var x = 1;");
        let stages: Vec<&str> = output.report.stages.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![
                "fold-hex-chains",
                "decode-hex-literals",
                "extract-string-pool",
                "strip-rotation",
                "strip-proxies",
                "resolve-decoders",
                "strip-dead-code",
                "normalize-numbers",
                "format",
            ]
        );
    }

    #[test]
    fn report_serializes_to_json() {
        let output = Deobfuscator::new().run("var x = 0x10;");
        let json = serde_json::to_string(&output.report).expect("report must serialize");
        assert!(json.contains("\"normalize-numbers\""));
    }
}
