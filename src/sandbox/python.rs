//! [`Runtime`] backed by a local Python interpreter.
//!
//! Every call spawns `python -c <driver>` with the sandbox directory as its
//! working directory, sends one JSON request on stdin and reads one JSON
//! report back from the last line of stdout. A fresh process per call means
//! a fresh namespace per request, and nothing user code does to the
//! interpreter outlives the call.
//!
//! The drawing patches configured on the [`Sandbox`](super::Sandbox) are
//! re-applied inside the interpreter as wrappers around `FPDF.multi_cell`
//! and `FPDF.normalize_text`, so user code sees the same behaviour as with
//! the native backend.
//!
//! Auto-invocation happens inside the `execute` process: once the code has
//! run and left nothing behind, each function it defined is called in the
//! same namespace until one saves a PDF.

use super::{
    CompileFailure, CompileFailureKind, ExecutionContext, Frame, Runtime, RuntimeException,
    EXEC_SENTINEL, SANDBOX_ERROR_TYPE,
};
use crate::draw::PatchSet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Environment variable naming the interpreter binary.
pub const PYTHON_ENV_VAR: &str = "CODE2PDF_PYTHON";

/// Interpreter used when nothing else is configured.
pub const DEFAULT_PYTHON: &str = "python3";

const DRIVER: &str = r#"
import builtins, contextlib, glob, io, json, sys, traceback

ENCODING_MARKERS = ("outside the range", "codec can't encode", "character map")


def install_patches(flags):
    if not (flags.get("zero_width_cell") or flags.get("encoding_fallback")):
        return
    try:
        from fpdf import FPDF
    except Exception:
        return
    original = FPDF.multi_cell

    def multi_cell(self, *args, **kwargs):
        args = list(args)
        if flags.get("zero_width_cell"):
            w = args[0] if args else kwargs.get("w")
            if w == 0:
                w = self.w - self.r_margin - self.x
                if w < 5:
                    self.ln()
                    w = self.w - self.r_margin - self.x
                if args:
                    args[0] = w
                else:
                    kwargs["w"] = w
        try:
            return original(self, *args, **kwargs)
        except Exception as err:
            if not flags.get("encoding_fallback"):
                raise
            if not any(m in str(err).lower() for m in ENCODING_MARKERS):
                raise
            key = "text" if "text" in kwargs else "txt" if "txt" in kwargs else None
            text = kwargs[key] if key else (args[2] if len(args) > 2 else None)
            if not isinstance(text, str) or not text:
                raise
            safe = text.encode("latin-1", "replace").decode("latin-1")
            if key:
                kwargs[key] = safe
            else:
                args[2] = safe
            try:
                return original(self, *args, **kwargs)
            except Exception:
                raise err

    FPDF.multi_cell = multi_cell

    if flags.get("encoding_fallback") and hasattr(FPDF, "normalize_text"):
        original_normalize = FPDF.normalize_text

        def normalize_text(self, text):
            try:
                return original_normalize(self, text)
            except Exception:
                if not isinstance(text, str):
                    raise
                safe = text.encode("latin-1", "replace").decode("latin-1")
                try:
                    return original_normalize(self, safe)
                except Exception:
                    return safe

        FPDF.normalize_text = normalize_text


def auto_invoke(ns, names, arg):
    for name in names:
        for args in ((), (arg,)):
            try:
                with contextlib.redirect_stdout(io.StringIO()):
                    ns[name](*args)
            except (Exception, SystemExit):
                continue
            if glob.glob("*.pdf"):
                return name
            break
    return None


def report(out, resp):
    out.write("\n" + json.dumps(resp) + "\n")
    out.flush()


def main():
    out = sys.stdout
    req = json.loads(sys.stdin.read())
    resp = {"ok": True, "stdout": "", "error": None, "callables": [],
            "auto_invoked": False, "invoked": None}
    try:
        code = compile(req["code"], "<exec>", "exec")
    except SyntaxError as e:
        resp["ok"] = False
        resp["error"] = {"type": type(e).__name__, "message": e.msg or str(e),
                         "lineno": e.lineno, "frames": []}
        return report(out, resp)
    if req["mode"] == "compile":
        return report(out, resp)

    install_patches(req.get("patches") or {})
    ns = {"__name__": "__main__", "__builtins__": builtins}
    buf = io.StringIO()
    try:
        with contextlib.redirect_stdout(buf):
            exec(code, ns)
            if req["mode"] == "invoke":
                fn = ns[req["function"]]
                if req.get("arg") is None:
                    fn()
                else:
                    fn(req["arg"])
    except SystemExit as e:
        if e.code not in (None, 0):
            resp["ok"] = False
            resp["error"] = {"type": "SystemExit", "message": str(e.code), "lineno": None, "frames": []}
    except BaseException as e:
        resp["ok"] = False
        resp["error"] = {
            "type": type(e).__name__,
            "message": str(e),
            "lineno": e.lineno if isinstance(e, SyntaxError) else None,
            "frames": [{"filename": f.filename, "lineno": f.lineno}
                       for f in traceback.extract_tb(e.__traceback__)],
        }
    resp["stdout"] = buf.getvalue()
    resp["callables"] = [
        name for name, value in ns.items()
        if callable(value)
        and getattr(getattr(value, "__code__", None), "co_filename", None) == "<exec>"
    ]
    arg = req.get("auto_invoke_arg")
    if (req["mode"] == "exec" and resp["ok"] and arg is not None and resp["callables"]
            and not resp["stdout"].strip() and not glob.glob("*.pdf")):
        resp["auto_invoked"] = True
        resp["invoked"] = auto_invoke(ns, resp["callables"], arg)
    report(out, resp)


main()
"#;

#[derive(Debug, Serialize)]
struct DriverRequest<'a> {
    mode: &'static str,
    code: &'a str,
    function: Option<&'a str>,
    arg: Option<&'a str>,
    auto_invoke_arg: Option<&'a str>,
    patches: PatchSet,
}

#[derive(Debug, Deserialize)]
struct DriverReport {
    ok: bool,
    #[serde(default)]
    stdout: String,
    error: Option<DriverError>,
    #[serde(default)]
    callables: Vec<String>,
    #[serde(default)]
    auto_invoked: bool,
    invoked: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriverError {
    #[serde(rename = "type")]
    type_name: String,
    message: String,
    lineno: Option<usize>,
    #[serde(default)]
    frames: Vec<DriverFrame>,
}

#[derive(Debug, Deserialize)]
struct DriverFrame {
    filename: String,
    lineno: Option<usize>,
}

/// Drives an external interpreter, one process per call.
#[derive(Debug, Clone)]
pub struct PythonProcess {
    interpreter: String,
}

impl Default for PythonProcess {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PythonProcess {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    /// `$CODE2PDF_PYTHON`, else `python3`.
    pub fn from_env() -> Self {
        let interpreter = std::env::var(PYTHON_ENV_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PYTHON.to_string());
        Self::new(interpreter)
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    async fn run(&self, request: &DriverRequest<'_>, cwd: Option<&Path>) -> Result<DriverReport, String> {
        let payload = serde_json::to_vec(request).map_err(|e| e.to_string())?;

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-c")
            .arg(DRIVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("cannot start '{}': {e}", self.interpreter))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| format!("cannot send code to '{}': {e}", self.interpreter))?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("'{}' did not finish: {e}", self.interpreter))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let last = stdout.lines().rev().find(|l| !l.trim().is_empty());
        match last.map(serde_json::from_str::<DriverReport>) {
            Some(Ok(report)) => Ok(report),
            Some(Err(e)) => Err(format!("unreadable report from '{}': {e}", self.interpreter)),
            None => Err(format!(
                "'{}' exited with {} and no report: {}",
                self.interpreter,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
        }
    }

    async fn run_in(
        &self,
        request: DriverRequest<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeException> {
        let root = ctx.fs().root().map(Path::to_path_buf).ok_or_else(|| {
            RuntimeException::new(
                SANDBOX_ERROR_TYPE,
                "the python runtime needs a directory-backed sandbox",
            )
        })?;
        let report = self
            .run(&request, Some(&root))
            .await
            .map_err(|detail| RuntimeException::new(SANDBOX_ERROR_TYPE, detail))?;

        if !report.stdout.is_empty() {
            ctx.print(&report.stdout);
        }
        if request.mode == "exec" {
            ctx.namespace_mut().replace(report.callables);
        }
        if report.auto_invoked {
            warn!(
                "Experimental: no output produced, auto-invoked user functions ({})",
                report.invoked.as_deref().unwrap_or("none produced a PDF")
            );
            ctx.record_auto_invoke(report.invoked);
        }
        match report.error {
            Some(error) if !report.ok => Err(exception_from(error)),
            _ => Ok(()),
        }
    }
}

fn compile_failure_from(error: DriverError) -> CompileFailure {
    let kind = match error.type_name.as_str() {
        "IndentationError" | "TabError" => CompileFailureKind::Indentation,
        _ => CompileFailureKind::Syntax,
    };
    CompileFailure {
        kind,
        message: error.message,
        line: error.lineno,
    }
}

fn exception_from(error: DriverError) -> RuntimeException {
    let mut frames: Vec<Frame> = error
        .frames
        .into_iter()
        .map(|f| Frame {
            filename: f.filename,
            line: f.lineno,
        })
        .collect();
    // A SyntaxError raised while running carries its position on the
    // exception rather than in the traceback.
    if let Some(line) = error.lineno {
        frames.push(Frame {
            filename: EXEC_SENTINEL.to_string(),
            line: Some(line),
        });
    }
    RuntimeException {
        type_name: error.type_name,
        message: error.message,
        frames,
    }
}

#[async_trait]
impl Runtime for PythonProcess {
    fn name(&self) -> &str {
        "python"
    }

    async fn compile(&self, code: &str) -> Result<(), CompileFailure> {
        let request = DriverRequest {
            mode: "compile",
            code,
            function: None,
            arg: None,
            auto_invoke_arg: None,
            patches: PatchSet::none(),
        };
        match self.run(&request, None).await {
            Ok(DriverReport {
                ok: false,
                error: Some(error),
                ..
            }) => Err(compile_failure_from(error)),
            Ok(_) => Ok(()),
            Err(detail) => {
                // Execution will hit the same problem and report it.
                warn!("Compile check skipped: {}", detail);
                Ok(())
            }
        }
    }

    async fn execute(&self, code: &str, ctx: &mut ExecutionContext) -> Result<(), RuntimeException> {
        debug!("python: executing {} bytes", code.len());
        let auto_invoke_arg = ctx.auto_invoke_arg().map(str::to_string);
        let request = DriverRequest {
            mode: "exec",
            code,
            function: None,
            arg: None,
            auto_invoke_arg: auto_invoke_arg.as_deref(),
            patches: ctx.sandbox().patches(),
        };
        self.run_in(request, ctx).await
    }

    /// Runs the whole buffer again in a new process before the call.
    async fn invoke(
        &self,
        function: &str,
        arg: Option<&str>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeException> {
        debug!("python: invoking {}({:?})", function, arg);
        let code = ctx.code().to_string();
        let request = DriverRequest {
            mode: "invoke",
            code: &code,
            function: Some(function),
            arg,
            auto_invoke_arg: None,
            patches: ctx.sandbox().patches(),
        };
        self.run_in(request, ctx).await
    }
}
