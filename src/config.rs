//! Configuration types for code-to-PDF conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across requests and to log exactly what a run
//! was asked to do.

use crate::draw::PatchSet;
use crate::error::Code2PdfError;
use crate::progress::ProgressCallback;
use crate::sandbox::{Runtime, Sandbox};
use std::fmt;
use std::sync::Arc;

/// Default wall-clock limit for running user code, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Accepted font sizes, in points.
pub const FONT_SIZE_RANGE: std::ops::RangeInclusive<u32> = 1..=400;

/// Configuration for a conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// Only the builder validates. Fields set by hand are clamped where they
/// are read: see [`timeout`](Self::timeout) and
/// [`effective_font_size`](Self::effective_font_size).
///
/// # Example
/// ```rust
/// use code2pdf::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .font_size(14)
///     .output_name("report")
///     .timeout_secs(10)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Font size in points. Default: unset.
    ///
    /// When set, literal sizes in recognised `set_font`/`setFont` calls are
    /// rewritten to it, and it is used for the stdout document and the
    /// error report. Unset means the code's own sizes and 12pt for
    /// documents the pipeline draws itself.
    pub font_size: Option<u32>,

    /// Download name for the delivered PDF; `.pdf` is appended if missing.
    /// If None, the sandbox file name is used.
    pub output_name: Option<String>,

    /// Wall-clock limit for one execution, and for all auto-invoked calls
    /// together. Range: ≥ 1. Default: 30.
    pub timeout_secs: u64,

    /// Try one automatic repair of a syntax error before giving up. Default: true.
    ///
    /// The user's input is never modified; a successful repair is run in its
    /// place and returned as [`crate::ConversionOutput::proposed_fix`].
    pub auto_fix: bool,

    /// Call user-defined functions when the code produced nothing. Default: true.
    ///
    /// Experimental: which function to call and with what argument is a
    /// guess, and calls can have side effects. Logged as a warning whenever
    /// it happens.
    pub auto_invoke: bool,

    /// Drawing patches for the sandbox built when `sandbox` is None.
    pub patches: PatchSet,

    /// Pre-constructed runtime. Takes precedence over `python`.
    pub runtime: Option<Arc<dyn Runtime>>,

    /// Sandbox to run in. If None, the process-wide shared sandbox is used
    /// (or a fresh one, when `patches` differ from the default).
    pub sandbox: Option<Arc<Sandbox>>,

    /// Python interpreter for the subprocess runtime.
    /// If None, `$CODE2PDF_PYTHON`, then `python3`.
    pub python: Option<String>,

    /// Optional per-stage progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            font_size: None,
            output_name: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            auto_fix: true,
            auto_invoke: true,
            patches: PatchSet::default(),
            runtime: None,
            sandbox: None,
            python: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("font_size", &self.font_size)
            .field("output_name", &self.output_name)
            .field("timeout_secs", &self.timeout_secs)
            .field("auto_fix", &self.auto_fix)
            .field("auto_invoke", &self.auto_invoke)
            .field("patches", &self.patches)
            .field("runtime", &self.runtime.as_ref().map(|r| r.name().to_string()))
            .field("sandbox", &self.sandbox)
            .field("python", &self.python)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// `timeout_secs`, never below one second.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.max(1))
    }

    /// `font_size` clamped to [`FONT_SIZE_RANGE`]. `Some(0)` counts as unset.
    pub fn effective_font_size(&self) -> Option<u32> {
        self.font_size
            .filter(|size| *size > 0)
            .map(|size| size.clamp(*FONT_SIZE_RANGE.start(), *FONT_SIZE_RANGE.end()))
    }

    /// The runtime this configuration runs code with.
    ///
    /// Resolution order: explicit `runtime`, then (with the `python`
    /// feature) a subprocess runtime on `python` / `$CODE2PDF_PYTHON` /
    /// `python3`.
    pub fn resolve_runtime(&self) -> Result<Arc<dyn Runtime>, Code2PdfError> {
        if let Some(runtime) = &self.runtime {
            return Ok(Arc::clone(runtime));
        }
        #[cfg(feature = "python")]
        {
            let process = match &self.python {
                Some(path) => crate::sandbox::PythonProcess::new(path.clone()),
                None => crate::sandbox::PythonProcess::from_env(),
            };
            Ok(Arc::new(process))
        }
        #[cfg(not(feature = "python"))]
        {
            Err(Code2PdfError::RuntimeNotConfigured {
                hint: "Pass one with ConversionConfig::builder().runtime(...), \
                       or enable the `python` feature."
                    .into(),
            })
        }
    }

    /// The sandbox this configuration runs code in.
    pub fn resolve_sandbox(&self) -> Result<Arc<Sandbox>, Code2PdfError> {
        if let Some(sandbox) = &self.sandbox {
            return Ok(Arc::clone(sandbox));
        }
        if self.patches == PatchSet::default() {
            return Sandbox::shared();
        }
        let fs = crate::sandbox::DirFs::temp()?;
        Ok(Arc::new(Sandbox::with_patches(Arc::new(fs), self.patches)))
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    /// `0` clears the size.
    pub fn font_size(mut self, size: u32) -> Self {
        self.config.font_size = (size > 0).then_some(size);
        self
    }

    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.config.output_name = (!name.trim().is_empty()).then_some(name);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn auto_fix(mut self, v: bool) -> Self {
        self.config.auto_fix = v;
        self
    }

    pub fn auto_invoke(mut self, v: bool) -> Self {
        self.config.auto_invoke = v;
        self
    }

    pub fn patches(mut self, patches: PatchSet) -> Self {
        self.config.patches = patches;
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn Runtime>) -> Self {
        self.config.runtime = Some(runtime);
        self
    }

    pub fn sandbox(mut self, sandbox: Arc<Sandbox>) -> Self {
        self.config.sandbox = Some(sandbox);
        self
    }

    pub fn python(mut self, interpreter: impl Into<String>) -> Self {
        self.config.python = Some(interpreter.into());
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Code2PdfError> {
        let c = &self.config;
        if c.timeout_secs == 0 {
            return Err(Code2PdfError::InvalidConfig(
                "Timeout must be ≥ 1 second".into(),
            ));
        }
        if let Some(size) = c.font_size {
            if !FONT_SIZE_RANGE.contains(&size) {
                return Err(Code2PdfError::InvalidConfig(format!(
                    "Font size must be 1–400, got {}",
                    size
                )));
            }
        }
        Ok(self.config)
    }
}
