//! The sandbox: where user code runs and where its artifacts land.
//!
//! ## Pieces
//!
//! * [`Runtime`]: the opaque "compile / execute / call" capability. The
//!   pipeline never looks inside it; it only sees [`CompileFailure`]s and
//!   [`RuntimeException`]s.
//! * [`Sandbox`]: process-wide state shared by every request: the
//!   [`SandboxFs`], the drawing patches (composed once, here) and a request
//!   lock so two conversions never interleave on one filesystem.
//! * [`ExecutionContext`]: built fresh for every request. It starts with no
//!   user names in it; whatever the runtime reports as user-defined lands in
//!   its [`Namespace`].

pub mod fs;
#[cfg(feature = "python")]
pub mod python;

use crate::draw::{DrawingBackend, PatchSet, PdfDocument};
use crate::error::Code2PdfError;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

pub use fs::{DirFs, MemoryFs, SandboxFs, PDF_EXTENSION};
#[cfg(feature = "python")]
pub use python::{PythonProcess, DEFAULT_PYTHON, PYTHON_ENV_VAR};

/// Unit name user code is compiled under. Traceback frames carrying this
/// name belong to the user's buffer.
pub const EXEC_SENTINEL: &str = "<exec>";

/// Exception type a runtime reports when it could not run the code at all
/// (interpreter missing, sandbox unusable). Diagnosed as a system failure.
pub const SANDBOX_ERROR_TYPE: &str = "SandboxError";

// ── Runtime capability ───────────────────────────────────────────────────────

/// Compile-time failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompileFailureKind {
    Syntax,
    Indentation,
}

/// Why a buffer did not compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileFailure {
    pub kind: CompileFailureKind,
    /// The runtime's own message, e.g. `expected ':'`.
    pub message: String,
    /// 1-based line, when the runtime knows it.
    pub line: Option<usize>,
}

impl CompileFailure {
    pub fn syntax(message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            kind: CompileFailureKind::Syntax,
            message: message.into(),
            line,
        }
    }

    pub fn indentation(message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            kind: CompileFailureKind::Indentation,
            message: message.into(),
            line,
        }
    }
}

/// One traceback frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Compilation unit; [`EXEC_SENTINEL`] for the user's buffer.
    pub filename: String,
    pub line: Option<usize>,
}

/// An exception that escaped user code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeException {
    /// Exception class name, e.g. `NameError`.
    pub type_name: String,
    pub message: String,
    /// Outermost first, innermost last.
    pub frames: Vec<Frame>,
}

impl RuntimeException {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            frames: Vec::new(),
        }
    }

    /// Add an innermost frame.
    pub fn with_frame(mut self, filename: impl Into<String>, line: Option<usize>) -> Self {
        self.frames.push(Frame {
            filename: filename.into(),
            line,
        });
        self
    }

    /// Line of the innermost frame in the user's buffer.
    pub fn user_line(&self) -> Option<usize> {
        self.frames
            .iter()
            .rev()
            .find(|f| f.filename == EXEC_SENTINEL)
            .and_then(|f| f.line)
    }
}

impl fmt::Display for RuntimeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

/// Something that can compile and run user code.
///
/// Implementations bind user drawing calls to [`ExecutionContext::document`],
/// route printed output through [`ExecutionContext::print`] and report the
/// functions the code defined via [`ExecutionContext::namespace_mut`].
///
/// A runtime whose `invoke` has to run the whole buffer again (one
/// interpreter per call) should auto-invoke inside `execute` instead when
/// [`ExecutionContext::auto_invoke_arg`] is set, and report the result with
/// [`ExecutionContext::record_auto_invoke`]. Top-level code then runs once.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Check that `code` compiles, without running it.
    async fn compile(&self, code: &str) -> Result<(), CompileFailure>;

    /// Run `code` top to bottom in a fresh namespace.
    async fn execute(&self, code: &str, ctx: &mut ExecutionContext)
        -> Result<(), RuntimeException>;

    /// Call a function the last `execute` defined, with no argument or with
    /// a single string argument.
    async fn invoke(
        &self,
        function: &str,
        arg: Option<&str>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeException>;
}

// ── Sandbox ──────────────────────────────────────────────────────────────────

/// Process-wide execution environment.
pub struct Sandbox {
    fs: Arc<dyn SandboxFs>,
    patches: PatchSet,
    request_lock: Mutex<()>,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("fs", &self.fs)
            .field("patches", &self.patches)
            .finish()
    }
}

static DEFAULT_SANDBOX: OnceCell<Arc<Sandbox>> = OnceCell::new();

impl Sandbox {
    /// A sandbox over `fs` with the default patches.
    pub fn new(fs: Arc<dyn SandboxFs>) -> Self {
        Self::with_patches(fs, PatchSet::default())
    }

    pub fn with_patches(fs: Arc<dyn SandboxFs>, patches: PatchSet) -> Self {
        debug!("Sandbox initialised over {:?} with {:?}", fs, patches);
        Self {
            fs,
            patches,
            request_lock: Mutex::new(()),
        }
    }

    /// In-memory sandbox.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryFs::new()))
    }

    /// The process-wide sandbox: a temporary directory created on first use.
    pub fn shared() -> Result<Arc<Sandbox>, Code2PdfError> {
        DEFAULT_SANDBOX
            .get_or_try_init(|| {
                let fs = DirFs::temp()?;
                info!("Created shared sandbox at {:?}", fs.root());
                Ok(Arc::new(Sandbox::new(Arc::new(fs))))
            })
            .cloned()
    }

    pub fn fs(&self) -> &Arc<dyn SandboxFs> {
        &self.fs
    }

    pub fn patches(&self) -> PatchSet {
        self.patches
    }

    /// A new document with this sandbox's patches applied.
    pub fn document(&self) -> Box<dyn DrawingBackend> {
        self.patches
            .apply(Box::new(PdfDocument::new(Arc::clone(&self.fs))))
    }

    /// Hold this for the whole of one request.
    pub async fn begin_request(&self) -> MutexGuard<'_, ()> {
        self.request_lock.lock().await
    }
}

// ── Execution context ────────────────────────────────────────────────────────

/// Names defined by the user's code, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace {
    functions: Vec<String>,
}

impl Namespace {
    /// Names the pipeline itself puts into a fresh namespace.
    pub const INJECTED: [&'static str; 2] = ["__name__", "__builtins__"];

    /// Record a user-defined function. Duplicates and injected names are ignored.
    pub fn define(&mut self, name: impl Into<String>) {
        let name = name.into();
        if Self::INJECTED.contains(&name.as_str()) || self.functions.contains(&name) {
            return;
        }
        self.functions.push(name);
    }

    pub fn replace(&mut self, names: impl IntoIterator<Item = String>) {
        self.functions.clear();
        for name in names {
            self.define(name);
        }
    }

    pub fn functions(&self) -> &[String] {
        &self.functions
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Auto-invocation a runtime already performed during `execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoInvocation {
    /// This function left a PDF in the sandbox.
    Produced(String),
    /// Every candidate was called; none produced a PDF.
    NothingProduced,
}

/// Where printed output goes.
#[derive(Debug, Default)]
struct StdoutSink {
    capture: Option<String>,
}

/// Token returned by [`ExecutionContext::redirect_stdout`]; hand it back to
/// [`ExecutionContext::restore_stdout`].
#[derive(Debug)]
#[must_use = "restore the previous stdout sink with ExecutionContext::restore_stdout"]
pub struct StdoutRedirect {
    previous: Option<String>,
}

/// Per-request state handed to the runtime.
pub struct ExecutionContext {
    sandbox: Arc<Sandbox>,
    code: String,
    stdout: StdoutSink,
    namespace: Namespace,
    auto_invoke_arg: Option<String>,
    auto_invoked: Option<AutoInvocation>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("code_len", &self.code.len())
            .field("capturing", &self.stdout.capture.is_some())
            .field("namespace", &self.namespace)
            .field("auto_invoke_arg", &self.auto_invoke_arg)
            .field("auto_invoked", &self.auto_invoked)
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(sandbox: Arc<Sandbox>, code: impl Into<String>) -> Self {
        Self {
            sandbox,
            code: code.into(),
            stdout: StdoutSink::default(),
            namespace: Namespace::default(),
            auto_invoke_arg: None,
            auto_invoked: None,
        }
    }

    /// The buffer being run.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    pub fn fs(&self) -> &Arc<dyn SandboxFs> {
        self.sandbox.fs()
    }

    /// A patched document for user drawing calls.
    pub fn document(&self) -> Box<dyn DrawingBackend> {
        self.sandbox.document()
    }

    /// Write to the user-visible standard output.
    pub fn print(&mut self, text: &str) {
        match self.stdout.capture.as_mut() {
            Some(buffer) => buffer.push_str(text),
            None => debug!(target: "code2pdf::stdout", "{}", text.trim_end()),
        }
    }

    /// Start capturing printed output into a fresh buffer.
    pub fn redirect_stdout(&mut self) -> StdoutRedirect {
        StdoutRedirect {
            previous: self.stdout.capture.replace(String::new()),
        }
    }

    /// Stop capturing, reinstate the previous sink and return what was captured.
    pub fn restore_stdout(&mut self, redirect: StdoutRedirect) -> String {
        let captured = self.stdout.capture.take().unwrap_or_default();
        self.stdout.capture = redirect.previous;
        captured
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn namespace_mut(&mut self) -> &mut Namespace {
        &mut self.namespace
    }

    /// Allow user functions to be called when the run saves and prints
    /// nothing; `arg` is passed when a call without arguments fails.
    pub fn allow_auto_invoke(&mut self, arg: impl Into<String>) {
        self.auto_invoke_arg = Some(arg.into());
    }

    pub fn auto_invoke_arg(&self) -> Option<&str> {
        self.auto_invoke_arg.as_deref()
    }

    /// Record that the runtime auto-invoked functions itself, and which one
    /// (if any) produced a PDF.
    pub fn record_auto_invoke(&mut self, produced_by: Option<String>) {
        self.auto_invoked = Some(match produced_by {
            Some(function) => AutoInvocation::Produced(function),
            None => AutoInvocation::NothingProduced,
        });
    }

    pub fn auto_invoked(&self) -> Option<&AutoInvocation> {
        self.auto_invoked.as_ref()
    }
}
