//! Pipeline stages for code-to-PDF conversion.
//!
//! Each submodule implements exactly one step. Keeping stages separate makes
//! each independently testable; [`crate::convert`] is the only place that
//! knows the order.
//!
//! ## Data Flow
//!
//! ```text
//! normalize ──▶ diagnose ──▶ (autofix ─▶ diagnose) ──▶ execute ──▶ resolve
//!                  │              │                       │           │
//!                  └──────────────┴───────── fallback ◀───┴───────────┘
//! ```
//!
//! 1. [`normalize`]: strip markdown fences and citation markers, apply the
//!    requested font size
//! 2. [`diagnose`]: compile without running; classify failures
//! 3. [`autofix`]: one rewrite of the offending line, re-compiled before
//!    it is accepted
//! 4. [`execute`]: run once under a wall-clock limit, capturing stdout
//! 5. [`resolve`]: pick the deliverable: saved PDF, printed text, or an
//!    auto-invoked function's PDF
//! 6. [`fallback`]: the error report when every other step came up empty

pub mod autofix;
pub mod diagnose;
pub mod execute;
pub mod fallback;
pub mod normalize;
pub mod resolve;
