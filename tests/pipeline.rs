//! Integration tests for the conversion pipeline.
//!
//! Every test drives the public API with [`common::ScriptRuntime`] and an
//! in-memory sandbox of its own, so nothing here needs an interpreter.
//!
//! Run with:
//!   cargo test --test pipeline

mod common;

use code2pdf::pipeline::fallback::{render_fallback, FALLBACK_PDF_NAME};
use code2pdf::pipeline::resolve::{resolve, ResolveOptions, STDOUT_PDF_NAME};
use code2pdf::sandbox::{ExecutionContext, Sandbox};
use code2pdf::{
    convert, diagnose_source, normalize, Code2PdfError, ConversionConfig,
    ConversionProgressCallback, Diagnosis, ErrorKind, Outcome, Runtime, Stage,
};
use common::{sandbox, ScriptRuntime};
use lopdf::content::Content;
use lopdf::Object;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const REPORT_CODE: &str = "\
from fpdf import FPDF
pdf = FPDF()
pdf.add_page()
pdf.set_font('Helvetica', size=12)
pdf.multi_cell(0, 10, 'Quarterly report')
pdf.output('report.pdf')";

fn config(runtime: &Arc<ScriptRuntime>, sandbox: &Arc<Sandbox>) -> ConversionConfig {
    ConversionConfig::builder()
        .runtime(Arc::clone(runtime) as Arc<dyn Runtime>)
        .sandbox(Arc::clone(sandbox))
        .build()
        .unwrap()
}

fn assert_pdf(bytes: &[u8], context: &str) {
    assert!(bytes.starts_with(b"%PDF-"), "[{context}] not a PDF");
    let doc = lopdf::Document::load_mem(bytes)
        .unwrap_or_else(|e| panic!("[{context}] unparseable PDF: {e}"));
    assert!(!doc.get_pages().is_empty(), "[{context}] PDF has no pages");
}

/// Every string drawn with `Tj`, one per line.
fn shown_text(bytes: &[u8]) -> String {
    let doc = lopdf::Document::load_mem(bytes).unwrap();
    let mut out = String::new();
    for page_id in doc.get_pages().values() {
        let content = Content::decode(&doc.get_page_content(*page_id).unwrap()).unwrap();
        for op in content.operations {
            if op.operator == "Tj" {
                if let Some(Object::String(s, _)) = op.operands.first() {
                    out.extend(s.iter().map(|b| *b as char));
                    out.push('\n');
                }
            }
        }
    }
    out
}

// ── Normalizer ───────────────────────────────────────────────────────────────

#[test]
fn normalizer_strips_fences() {
    assert_eq!(normalize("```python\ncode\n```", None), "code");
}

#[test]
fn normalizer_is_idempotent_on_clean_input() {
    let once = normalize(REPORT_CODE, None);
    assert_eq!(once, REPORT_CODE);
    assert_eq!(normalize(&once, None), once);
}

#[test]
fn normalizer_rewrites_set_font_only() {
    let out = normalize("c.setFont(\"Arial\", 12)\nwidth = 12", Some(18));
    assert_eq!(out, "c.setFont(\"Arial\", 18)\nwidth = 12");
}

// ── Diagnostician ────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_colon_is_diagnosed() {
    let runtime = ScriptRuntime::new();
    let cfg = config(&runtime, &sandbox());
    let diagnosis = diagnose_source("if x == 1\n    pass", &cfg)
        .await
        .unwrap()
        .expect("should not compile");
    assert_eq!(diagnosis.type_name, "SyntaxError");
    assert_eq!(diagnosis.kind, ErrorKind::Syntax);
    assert_eq!(diagnosis.line, Some(1));
    assert!(
        diagnosis.suggestion.to_lowercase().contains("missing colon"),
        "suggestion was: {}",
        diagnosis.suggestion
    );
}

#[tokio::test]
async fn assignment_in_condition_is_diagnosed() {
    let runtime = ScriptRuntime::new();
    let cfg = ConversionConfig::builder()
        .runtime(runtime as Arc<dyn Runtime>)
        .auto_fix(false)
        .build()
        .unwrap();
    let diagnosis = diagnose_source("if x = 1:\n    pass", &cfg)
        .await
        .unwrap()
        .expect("should not compile");
    assert_eq!(diagnosis.type_name, "SyntaxError");
    assert!(diagnosis.suggestion.contains("`==`"), "{}", diagnosis.suggestion);
    assert_eq!(diagnosis.proposed_fix, None, "auto_fix is off");
}

#[tokio::test]
async fn valid_code_has_no_diagnosis() {
    let runtime = ScriptRuntime::new();
    let cfg = config(&runtime, &sandbox());
    assert_eq!(diagnose_source(REPORT_CODE, &cfg).await.unwrap(), None);
}

// ── Auto-fix ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn proposed_fix_touches_only_the_offending_line() {
    let runtime = ScriptRuntime::new();
    let cfg = config(&runtime, &sandbox());
    let source = "if x == 1\n    pass";
    let diagnosis = diagnose_source(source, &cfg).await.unwrap().unwrap();
    let fix = diagnosis.proposed_fix.expect("fix proposed");

    assert!(runtime.compile(&fix).await.is_ok(), "fix must compile: {fix}");
    let before: Vec<&str> = source.lines().collect();
    let after: Vec<&str> = fix.lines().collect();
    assert_eq!(after.len(), before.len());
    assert_eq!(after[0], "if x == 1:");
    assert_eq!(after[1], before[1], "line 2 must be byte-identical");
}

#[tokio::test]
async fn fixed_code_runs_and_input_is_untouched() {
    let runtime = ScriptRuntime::new();
    let sb = sandbox();
    let source = "x = 5\nif x > 1\n    print('big')";

    let out = convert(source, &config(&runtime, &sb)).await.unwrap();

    assert_eq!(out.outcome, Outcome::FromStdout);
    assert!(out.stats.auto_fixed);
    assert_eq!(
        out.proposed_fix.as_deref(),
        Some("x = 5\nif x > 1:\n    print('big')")
    );
    assert_eq!(out.stdout, "big\n");

    let d = out.diagnosis.as_ref().expect("the fixed error is still explained");
    assert_eq!(d.kind, ErrorKind::Syntax);
    assert_eq!(d.line, Some(2));
    assert_eq!(d.proposed_fix, out.proposed_fix);
    assert!(out.clone().into_result().is_ok(), "a fixed run is not a failure");
}

#[tokio::test]
async fn auto_fix_disabled_delivers_report() {
    let runtime = ScriptRuntime::new();
    let sb = sandbox();
    let cfg = ConversionConfig::builder()
        .runtime(Arc::clone(&runtime) as Arc<dyn Runtime>)
        .sandbox(Arc::clone(&sb))
        .auto_fix(false)
        .build()
        .unwrap();

    let out = convert("x = 5\nif x > 1\n    print('big')", &cfg).await.unwrap();

    assert_eq!(out.outcome, Outcome::Fallback);
    let d = out.diagnosis.as_ref().unwrap();
    assert_eq!(d.kind, ErrorKind::Syntax);
    assert_eq!(d.line, Some(2));
    assert_eq!(runtime.executions(), 0, "broken code must not run");
}

#[tokio::test]
async fn unfixable_indentation_goes_to_report() {
    let runtime = ScriptRuntime::new();
    let sb = sandbox();

    let out = convert("def f():\nprint('x')", &config(&runtime, &sb)).await.unwrap();

    assert!(out.is_fallback());
    assert_eq!(out.artifact, FALLBACK_PDF_NAME);
    assert_eq!(out.diagnosis.as_ref().unwrap().kind, ErrorKind::Indentation);
    assert_pdf(&out.bytes, "indentation report");
}

// ── Resolution ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn saved_pdf_is_resolved() {
    let runtime = ScriptRuntime::new();
    let sb = sandbox();
    let mut ctx = ExecutionContext::new(Arc::clone(&sb), REPORT_CODE);
    runtime.execute(REPORT_CODE, &mut ctx).await.unwrap();

    let pdfs = sb.fs().list_pdfs().unwrap();
    let options = ResolveOptions {
        font_size: None,
        auto_invoke: true,
        timeout: Duration::from_secs(5),
    };
    let resolved = resolve(runtime.as_ref(), &mut ctx, pdfs, "", options)
        .await
        .unwrap();

    assert_eq!(resolved.outcome, Outcome::Saved);
    assert_eq!(resolved.artifacts, vec!["report.pdf".to_string()]);
}

#[tokio::test]
async fn convert_delivers_saved_pdf() {
    let runtime = ScriptRuntime::new();
    let sb = sandbox();

    let out = convert(REPORT_CODE, &config(&runtime, &sb)).await.unwrap();

    assert_eq!(out.outcome, Outcome::Saved);
    assert_eq!(out.artifact, "report.pdf");
    assert_eq!(out.filename, "report.pdf");
    assert_eq!(out.stats.artifacts_found, 1);
    assert_pdf(&out.bytes, "saved");
}

#[tokio::test]
async fn print_only_code_yields_one_synthesized_artifact() {
    let runtime = ScriptRuntime::new();
    let sb = sandbox();

    let out = convert("print('hello')", &config(&runtime, &sb)).await.unwrap();

    assert_eq!(out.outcome, Outcome::FromStdout);
    assert_eq!(out.artifact, STDOUT_PDF_NAME);
    assert_eq!(out.stats.artifacts_found, 1);
    assert_eq!(sb.fs().list_pdfs().unwrap(), vec![STDOUT_PDF_NAME.to_string()]);
    assert_pdf(&out.bytes, "stdout");
}

#[tokio::test]
async fn auto_invoke_calls_the_user_function() {
    let runtime = ScriptRuntime::new();
    let sb = sandbox();
    let source = "\
from fpdf import FPDF
def build(filename):
    pdf = FPDF()
    pdf.add_page()
    pdf.set_font('Courier', size=12)
    pdf.multi_cell(0, 10, 'made by build')
    pdf.output(filename)";

    let out = convert(source, &config(&runtime, &sb)).await.unwrap();

    assert_eq!(
        out.outcome,
        Outcome::AutoInvoked {
            function: "build".into()
        }
    );
    assert_eq!(out.artifact, STDOUT_PDF_NAME);
    assert_eq!(runtime.invocations(), vec!["build()", "build(output.pdf)"]);
    assert_pdf(&out.bytes, "auto-invoked");
}

#[tokio::test]
async fn auto_invoke_does_not_repeat_a_clean_call_with_an_argument() {
    let runtime = ScriptRuntime::new();
    let sb = sandbox();

    let out = convert("def helper():\n    x = 1", &config(&runtime, &sb)).await.unwrap();

    assert!(out.is_fallback());
    assert_eq!(out.diagnosis.unwrap().kind, ErrorKind::NoOutput);
    assert_eq!(runtime.invocations(), vec!["helper()"]);
}

#[tokio::test]
async fn auto_invoke_disabled_reports_no_output() {
    let runtime = ScriptRuntime::new();
    let sb = sandbox();
    let cfg = ConversionConfig::builder()
        .runtime(Arc::clone(&runtime) as Arc<dyn Runtime>)
        .sandbox(Arc::clone(&sb))
        .auto_invoke(false)
        .build()
        .unwrap();

    let out = convert("def build():\n    print('x')", &cfg).await.unwrap();

    assert!(out.is_fallback());
    assert_eq!(out.diagnosis.unwrap().kind, ErrorKind::NoOutput);
    assert!(runtime.invocations().is_empty());
}

#[tokio::test]
async fn silent_code_reports_no_output() {
    let runtime = ScriptRuntime::new();
    let out = convert("x = 1", &config(&runtime, &sandbox())).await.unwrap();
    assert_eq!(out.outcome, Outcome::Fallback);
    assert_eq!(out.diagnosis.unwrap().kind, ErrorKind::NoOutput);
}

// ── Runtime failures ─────────────────────────────────────────────────────────

#[tokio::test]
async fn name_error_names_the_identifier() {
    let runtime = ScriptRuntime::new();
    let out = convert("print('a')\nprint(undefined_thing)", &config(&runtime, &sandbox()))
        .await
        .unwrap();

    let d = out.diagnosis.expect("diagnosis");
    assert_eq!(d.kind, ErrorKind::Name);
    assert_eq!(d.line, Some(2));
    assert!(d.explanation.contains("undefined_thing"), "{}", d.explanation);
    assert_eq!(out.stdout, "a\n", "output printed before the failure is kept");
}

#[tokio::test]
async fn missing_module_is_an_import_error() {
    let runtime = ScriptRuntime::new();
    let out = convert("import nosuchlib\nprint('x')", &config(&runtime, &sandbox()))
        .await
        .unwrap();
    let d = out.diagnosis.expect("diagnosis");
    assert_eq!(d.kind, ErrorKind::Import);
    assert!(d.explanation.contains("nosuchlib"));
}

#[tokio::test]
async fn raised_exception_is_reported_with_its_type() {
    let runtime = ScriptRuntime::new();
    let out = convert("raise KeyError('total')", &config(&runtime, &sandbox()))
        .await
        .unwrap();
    let d = out.diagnosis.expect("diagnosis");
    assert_eq!(d.type_name, "KeyError");
    assert_eq!(d.kind, ErrorKind::Key);
    assert_eq!(d.to_string(), "KeyError (line 1): total");
}

#[tokio::test]
async fn long_running_code_times_out() {
    let runtime = ScriptRuntime::new();
    let sb = sandbox();
    let cfg = ConversionConfig::builder()
        .runtime(Arc::clone(&runtime) as Arc<dyn Runtime>)
        .sandbox(Arc::clone(&sb))
        .timeout_secs(1)
        .build()
        .unwrap();

    let out = convert("import time\ntime.sleep(30)\nprint('late')", &cfg)
        .await
        .unwrap();

    assert!(out.is_fallback());
    assert_eq!(out.diagnosis.unwrap().kind, ErrorKind::Timeout);
}

// ── Fallback ─────────────────────────────────────────────────────────────────

#[test]
fn fallback_never_raises() {
    let sb = Sandbox::in_memory();
    let diagnoses = [
        Diagnosis::no_output(),
        Diagnosis::timeout(30),
        Diagnosis::system("disk on fire"),
    ];
    let sources = ["", "print('unbalanced", "\"\"\"", "x = '→ ✓ 😀'", "\n\n\n"];
    for d in &diagnoses {
        for src in sources {
            for size in [None, Some(1), Some(400)] {
                let name = render_fallback(&sb, d, src, size)
                    .unwrap_or_else(|e| panic!("{d} / {src:?} / {size:?}: {e}"));
                assert_eq!(name, FALLBACK_PDF_NAME);
                assert_pdf(&sb.fs().read(&name).unwrap(), src);
            }
        }
    }
}

#[tokio::test]
async fn unbalanced_quotes_still_deliver_a_pdf() {
    let runtime = ScriptRuntime::new();
    let cfg = ConversionConfig::builder()
        .runtime(runtime as Arc<dyn Runtime>)
        .sandbox(sandbox())
        .auto_fix(false)
        .build()
        .unwrap();

    let out = convert("print('oops)", &cfg).await.unwrap();

    assert!(out.is_fallback());
    assert_pdf(&out.bytes, "unbalanced quotes");
}

#[tokio::test]
async fn report_keeps_the_original_source() {
    let runtime = ScriptRuntime::new();
    let source = "```python\nraise ValueError('bad total')\n```";
    let out = convert(source, &config(&runtime, &sandbox())).await.unwrap();

    let text = shown_text(&out.bytes);
    assert!(text.contains("bad total"), "{text}");
    assert!(text.contains("```python"), "report shows the text as pasted: {text}");
}

#[tokio::test]
async fn empty_source_is_an_error_not_a_report() {
    let runtime = ScriptRuntime::new();
    let err = convert("```python\n```", &config(&runtime, &sandbox()))
        .await
        .unwrap_err();
    assert!(matches!(err, Code2PdfError::EmptySource));
}

// ── End to end ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn hi_with_font_and_name() {
    let runtime = ScriptRuntime::new();
    let cfg = ConversionConfig::builder()
        .runtime(runtime as Arc<dyn Runtime>)
        .sandbox(sandbox())
        .font_size(14)
        .output_name("out")
        .build()
        .unwrap();

    let out = convert("print('hi')", &cfg).await.unwrap();

    assert_eq!(out.filename, "out.pdf");
    assert_eq!(out.stats.artifacts_found, 1);
    assert_eq!(out.outcome, Outcome::FromStdout);
    assert_pdf(&out.bytes, "hi");
}

#[tokio::test]
async fn sequential_runs_do_not_leak_artifacts() {
    let runtime = ScriptRuntime::new();
    let sb = sandbox();
    let cfg = config(&runtime, &sb);

    let first = convert(REPORT_CODE, &cfg).await.unwrap();
    assert_eq!(first.outcome, Outcome::Saved);
    assert_eq!(sb.fs().list_pdfs().unwrap(), vec!["report.pdf".to_string()]);

    let second = convert(REPORT_CODE, &cfg).await.unwrap();
    assert_eq!(second.stats.artifacts_found, 1);
    assert_eq!(second.artifact, "report.pdf");

    let third = convert("print('fresh')", &cfg).await.unwrap();
    assert_eq!(
        third.outcome,
        Outcome::FromStdout,
        "a stale report.pdf must not be picked up"
    );
    assert_eq!(sb.fs().list_pdfs().unwrap(), vec![STDOUT_PDF_NAME.to_string()]);
}

#[tokio::test]
async fn concurrent_requests_are_serialised() {
    let runtime = ScriptRuntime::new();
    let sb = sandbox();
    let cfg = Arc::new(config(&runtime, &sb));

    let a = tokio::spawn({
        let cfg = Arc::clone(&cfg);
        async move { convert(REPORT_CODE, &cfg).await }
    });
    let b = tokio::spawn({
        let cfg = Arc::clone(&cfg);
        async move { convert("print('b')", &cfg).await }
    });
    let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

    assert_eq!(a.artifact, "report.pdf");
    assert_eq!(a.stats.artifacts_found, 1);
    assert_eq!(b.outcome, Outcome::FromStdout);
    assert_eq!(b.stats.artifacts_found, 1);
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Events(Mutex<Vec<String>>);

impl ConversionProgressCallback for Events {
    fn on_stage_start(&self, stage: Stage) {
        self.0.lock().unwrap().push(format!("{stage:?}"));
    }
    fn on_fix_proposed(&self, _: &Diagnosis, _: &str) {
        self.0.lock().unwrap().push("fix".into());
    }
    fn on_fallback(&self, d: &Diagnosis) {
        self.0.lock().unwrap().push(format!("fallback:{}", d.type_name));
    }
    fn on_conversion_complete(&self, _: &Outcome, filename: &str) {
        self.0.lock().unwrap().push(format!("done:{filename}"));
    }
}

#[tokio::test]
async fn progress_follows_the_stages() {
    let events = Arc::new(Events::default());
    let cfg = ConversionConfig::builder()
        .runtime(ScriptRuntime::new() as Arc<dyn Runtime>)
        .sandbox(sandbox())
        .progress_callback(events.clone())
        .build()
        .unwrap();

    convert("x = 1\nif x\n    print('y')", &cfg).await.unwrap();

    assert_eq!(
        *events.0.lock().unwrap(),
        vec![
            "Normalize",
            "Diagnose",
            "AutoFix",
            "fix",
            "Execute",
            "Resolve",
            "done:output.pdf"
        ]
    );
}

#[tokio::test]
async fn progress_reports_fallback() {
    let events = Arc::new(Events::default());
    let cfg = ConversionConfig::builder()
        .runtime(ScriptRuntime::new() as Arc<dyn Runtime>)
        .sandbox(sandbox())
        .progress_callback(events.clone())
        .build()
        .unwrap();

    convert("raise TypeError('nope')", &cfg).await.unwrap();

    let events = events.0.lock().unwrap();
    assert!(events.contains(&"Fallback".to_string()));
    assert!(events.contains(&"fallback:TypeError".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("done:error_report.pdf"));
}
