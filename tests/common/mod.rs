//! A tiny line-oriented runtime for integration tests.
//!
//! `ScriptRuntime` understands just enough of the pasted-code dialect to
//! drive the pipeline without an interpreter: `print('…')`, an FPDF-style
//! document (`pdf = FPDF()`, `add_page`, `set_font`, `multi_cell`/`cell`,
//! `output`), `raise Kind('…')`, `time.sleep(N)`, imports, and top-level
//! `def name(param):` functions called as `name()` / `name('…')`.
//! Everything else (assignments, `if`/`for` headers, `pass`) is a no-op.
//!
//! Its compile check flags the same slips a real compiler would: missing
//! colons, unterminated strings, `=` in a condition, unbalanced delimiters,
//! `print x` and missing indentation after a block opener.

#![allow(dead_code)]

use async_trait::async_trait;
use code2pdf::draw::{Cell, FontFamily};
use code2pdf::sandbox::{CompileFailure, RuntimeException, EXEC_SENTINEL};
use code2pdf::{DrawingBackend, ExecutionContext, Runtime, Sandbox};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A sandbox of its own for every test.
pub fn sandbox() -> Arc<Sandbox> {
    Arc::new(Sandbox::in_memory())
}

#[derive(Default)]
pub struct ScriptRuntime {
    /// `function(arg)` for every `invoke`, in call order.
    pub invocations: Mutex<Vec<String>>,
    /// Number of `execute` calls.
    pub executions: Mutex<usize>,
}

impl ScriptRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn executions(&self) -> usize {
        *self.executions.lock().unwrap()
    }
}

#[async_trait]
impl Runtime for ScriptRuntime {
    fn name(&self) -> &str {
        "script"
    }

    async fn compile(&self, code: &str) -> Result<(), CompileFailure> {
        check(code)
    }

    async fn execute(
        &self,
        code: &str,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeException> {
        *self.executions.lock().unwrap() += 1;
        let program = parse(code);
        for name in program.functions.keys_in_order() {
            ctx.namespace_mut().define(name);
        }
        let work = program
            .main
            .into_iter()
            .map(|(line, stmt)| (line, stmt, Bindings::new()))
            .collect();
        run(work, &program.functions, ctx).await
    }

    async fn invoke(
        &self,
        function: &str,
        arg: Option<&str>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeException> {
        self.invocations
            .lock()
            .unwrap()
            .push(format!("{function}({})", arg.unwrap_or("")));
        let program = parse(ctx.code());
        let Some(f) = program.functions.get(function) else {
            return Err(name_error(function, 0));
        };
        let bindings = bind(function, f, arg.map(str::to_string), f.line)?;
        let work = f
            .body
            .iter()
            .cloned()
            .map(|(line, stmt)| (line, stmt, bindings.clone()))
            .collect();
        run(work, &program.functions, ctx).await
    }
}

// ── Compile check ────────────────────────────────────────────────────────────

static RE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(if|elif|else|for|while|def|class|try|except|finally|with)\b").unwrap()
});
static RE_CONDITION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(if|elif|while)\b").unwrap());
static RE_LONE_EQ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^=!<>:+\-*/%&|^])=($|[^=])").unwrap());
static RE_PRINT_STMT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*print\s+[^(\s]").unwrap());

/// Split off a `#` comment and report whether a string is left open.
fn scan(line: &str) -> (&str, bool) {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '#') => return (&line[..i], false),
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            _ => {}
        }
    }
    (line, quote.is_some())
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn check(code: &str) -> Result<(), CompileFailure> {
    let mut previous: Option<(usize, usize, bool)> = None;
    for (i, raw) in code.lines().enumerate() {
        let n = i + 1;
        let (line, open_string) = scan(raw);
        let line = line.trim_end();
        if line.trim().is_empty() && !open_string {
            continue;
        }
        let indent = indent_of(line);
        if let Some((opener, opener_indent, true)) = previous {
            if indent <= opener_indent {
                return Err(CompileFailure::indentation(
                    format!("expected an indented block after statement on line {opener}"),
                    Some(n),
                ));
            }
        }
        if open_string {
            return Err(CompileFailure::syntax(
                format!("unterminated string literal (detected at line {n})"),
                Some(n),
            ));
        }
        if RE_BLOCK.is_match(line) && !line.ends_with(':') {
            return Err(CompileFailure::syntax("expected ':'", Some(n)));
        }
        if RE_CONDITION.is_match(line) && RE_LONE_EQ.is_match(line) {
            return Err(CompileFailure::syntax(
                "invalid syntax. Maybe you meant '==' or ':=' instead of '='?",
                Some(n),
            ));
        }
        for (open, close) in [('(', ')'), ('[', ']')] {
            let opens = line.matches(open).count();
            let closes = line.matches(close).count();
            if opens > closes {
                return Err(CompileFailure::syntax(
                    format!("'{open}' was never closed"),
                    Some(n),
                ));
            }
            if closes > opens {
                return Err(CompileFailure::syntax(format!("unmatched '{close}'"), Some(n)));
            }
        }
        if RE_PRINT_STMT.is_match(line) {
            return Err(CompileFailure::syntax(
                "Missing parentheses in call to 'print'. Did you mean print(...)?",
                Some(n),
            ));
        }
        previous = Some((n, indent, line.ends_with(':')));
    }
    if let Some((opener, _, true)) = previous {
        return Err(CompileFailure::syntax(
            format!("expected an indented block after statement on line {opener}"),
            Some(opener),
        ));
    }
    Ok(())
}

// ── Program model ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Lit(String),
    Var(String),
}

#[derive(Debug, Clone)]
enum Stmt {
    Print(Expr),
    NewDocument,
    AddPage,
    SetFont(FontFamily, f32),
    Cell(f32, Expr),
    Output(Expr),
    Raise(String, String),
    Call(String, Option<Expr>),
    Sleep(u64),
    Import(String),
    Nop,
}

#[derive(Debug, Clone)]
struct Function {
    line: usize,
    params: Vec<String>,
    body: Vec<(usize, Stmt)>,
}

#[derive(Debug, Default)]
struct Functions {
    order: Vec<String>,
    by_name: HashMap<String, Function>,
}

impl Functions {
    fn insert(&mut self, name: String, f: Function) {
        if !self.by_name.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.by_name.insert(name, f);
    }

    fn get(&self, name: &str) -> Option<&Function> {
        self.by_name.get(name)
    }

    fn keys_in_order(&self) -> Vec<String> {
        self.order.clone()
    }
}

struct Program {
    main: Vec<(usize, Stmt)>,
    functions: Functions,
}

type Bindings = HashMap<String, Option<String>>;

static RE_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^def\s+(\w+)\s*\(([^)]*)\)\s*:").unwrap());
static RE_PRINT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^print\((.*)\)$").unwrap());
static RE_NEW_DOC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+\s*=\s*FPDF\(\s*\)$").unwrap());
static RE_ADD_PAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+\.add_page\(\s*\)$").unwrap());
static RE_SET_FONT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\w+\.set_font\(\s*['"](\w+)['"]\s*(?:,\s*['"]\w*['"])?\s*,\s*(?:size\s*=\s*)?(\d+)\s*\)$"#)
        .unwrap()
});
static RE_CELL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\w+\.(?:multi_)?cell\(\s*(\d+(?:\.\d+)?)\s*,\s*\d+(?:\.\d+)?\s*,\s*(.+?)\s*\)$")
        .unwrap()
});
static RE_OUTPUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+\.output\((.*)\)$").unwrap());
static RE_RAISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^raise\s+(\w+)\(\s*['"](.*)['"]\s*\)$"#).unwrap());
static RE_SLEEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^time\.sleep\((\d+)\)$").unwrap());
static RE_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:import\s+(\w+)|from\s+(\w+)\s+import\b)").unwrap());
static RE_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+)\((.*)\)$").unwrap());

const KNOWN_MODULES: [&str; 5] = ["fpdf", "time", "os", "math", "reportlab"];

fn expr(text: &str) -> Option<Expr> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    for q in ['\'', '"'] {
        if text.len() >= 2 && text.starts_with(q) && text.ends_with(q) {
            return Some(Expr::Lit(text[1..text.len() - 1].to_string()));
        }
    }
    Some(Expr::Var(text.to_string()))
}

fn statement(line: &str) -> Stmt {
    let line = line.trim();
    if let Some(c) = RE_PRINT.captures(line) {
        return Stmt::Print(expr(&c[1]).unwrap_or(Expr::Lit(String::new())));
    }
    if RE_NEW_DOC.is_match(line) {
        return Stmt::NewDocument;
    }
    if RE_ADD_PAGE.is_match(line) {
        return Stmt::AddPage;
    }
    if let Some(c) = RE_SET_FONT.captures(line) {
        let family = FontFamily::from_name(&c[1]).unwrap_or_default();
        return Stmt::SetFont(family, c[2].parse().unwrap_or(12.0));
    }
    if let Some(c) = RE_CELL.captures(line) {
        let text = expr(&c[2]).unwrap_or(Expr::Lit(String::new()));
        return Stmt::Cell(c[1].parse().unwrap_or(0.0), text);
    }
    if let Some(c) = RE_OUTPUT.captures(line) {
        return Stmt::Output(expr(&c[1]).unwrap_or(Expr::Lit("doc.pdf".into())));
    }
    if let Some(c) = RE_RAISE.captures(line) {
        return Stmt::Raise(c[1].to_string(), c[2].to_string());
    }
    if let Some(c) = RE_SLEEP.captures(line) {
        return Stmt::Sleep(c[1].parse().unwrap_or(0));
    }
    if let Some(c) = RE_IMPORT.captures(line) {
        let module = c.get(1).or_else(|| c.get(2)).map_or("", |m| m.as_str());
        return Stmt::Import(module.to_string());
    }
    if let Some(c) = RE_CALL.captures(line) {
        return Stmt::Call(c[1].to_string(), expr(&c[2]));
    }
    Stmt::Nop
}

fn parse(code: &str) -> Program {
    let mut main = Vec::new();
    let mut functions = Functions::default();
    let mut current: Option<(String, usize, Function)> = None;

    for (i, raw) in code.lines().enumerate() {
        let n = i + 1;
        let (line, _) = scan(raw);
        if line.trim().is_empty() {
            continue;
        }
        let indent = indent_of(line);
        if let Some((_, def_indent, f)) = current.as_mut() {
            if indent > *def_indent {
                f.body.push((n, statement(line)));
                continue;
            }
        }
        if let Some((name, _, f)) = current.take() {
            functions.insert(name, f);
        }
        if let Some(c) = RE_DEF.captures(line.trim()) {
            let params = c[2]
                .split(',')
                .map(|p| p.split('=').next().unwrap_or("").trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            current = Some((
                c[1].to_string(),
                indent,
                Function {
                    line: n,
                    params,
                    body: Vec::new(),
                },
            ));
            continue;
        }
        main.push((n, statement(line)));
    }
    if let Some((name, _, f)) = current.take() {
        functions.insert(name, f);
    }
    Program { main, functions }
}

// ── Interpreter ──────────────────────────────────────────────────────────────

fn exception(type_name: &str, message: impl Into<String>, line: usize) -> RuntimeException {
    RuntimeException::new(type_name, message).with_frame(EXEC_SENTINEL, Some(line))
}

fn name_error(name: &str, line: usize) -> RuntimeException {
    exception("NameError", format!("name '{name}' is not defined"), line)
}

fn bind(
    name: &str,
    f: &Function,
    arg: Option<String>,
    line: usize,
) -> Result<Bindings, RuntimeException> {
    match (f.params.len(), arg) {
        (0, None) => Ok(Bindings::new()),
        (1, Some(value)) => Ok(HashMap::from([(f.params[0].clone(), Some(value))])),
        (0, Some(_)) => Err(exception(
            "TypeError",
            format!("{name}() takes 0 positional arguments but 1 was given"),
            line,
        )),
        (_, None) => Err(exception(
            "TypeError",
            format!(
                "{name}() missing 1 required positional argument: '{}'",
                f.params[0]
            ),
            line,
        )),
        (count, Some(_)) => Err(exception(
            "TypeError",
            format!("{name}() missing {} required positional arguments", count - 1),
            line,
        )),
    }
}

fn eval(e: &Expr, bindings: &Bindings, line: usize) -> Result<String, RuntimeException> {
    match e {
        Expr::Lit(s) => Ok(s.clone()),
        Expr::Var(v) => match bindings.get(v) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Ok("None".into()),
            None => Err(name_error(v, line)),
        },
    }
}

fn draw_error(e: impl ToString, line: usize) -> RuntimeException {
    exception("FPDFException", e.to_string(), line)
}

async fn run(
    mut work: VecDeque<(usize, Stmt, Bindings)>,
    functions: &Functions,
    ctx: &mut ExecutionContext,
) -> Result<(), RuntimeException> {
    let mut doc: Option<Box<dyn DrawingBackend>> = None;

    while let Some((line, stmt, bindings)) = work.pop_front() {
        match stmt {
            Stmt::Print(e) => {
                let text = eval(&e, &bindings, line)?;
                ctx.print(&format!("{text}\n"));
            }
            Stmt::NewDocument => doc = Some(ctx.document()),
            Stmt::AddPage => doc.as_mut().ok_or_else(|| name_error("pdf", line))?.add_page(),
            Stmt::SetFont(family, size) => doc
                .as_mut()
                .ok_or_else(|| name_error("pdf", line))?
                .set_font(family, size),
            Stmt::Cell(width, e) => {
                let text = eval(&e, &bindings, line)?;
                doc.as_mut()
                    .ok_or_else(|| name_error("pdf", line))?
                    .multi_cell(Cell::new(width, 10.0, text))
                    .map_err(|e| draw_error(e, line))?;
            }
            Stmt::Output(e) => {
                let name = eval(&e, &bindings, line)?;
                doc.as_mut()
                    .ok_or_else(|| name_error("pdf", line))?
                    .output(&name)
                    .map_err(|e| draw_error(e, line))?;
            }
            Stmt::Raise(kind, message) => return Err(exception(&kind, message, line)),
            Stmt::Sleep(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            Stmt::Import(module) => {
                if !KNOWN_MODULES.contains(&module.as_str()) {
                    return Err(exception(
                        "ModuleNotFoundError",
                        format!("No module named '{module}'"),
                        line,
                    ));
                }
            }
            Stmt::Call(name, arg) => {
                let Some(f) = functions.get(&name) else {
                    return Err(name_error(&name, line));
                };
                let arg = arg.map(|a| eval(&a, &bindings, line)).transpose()?;
                let inner = bind(&name, f, arg, line)?;
                for (body_line, body_stmt) in f.body.iter().rev() {
                    work.push_front((*body_line, body_stmt.clone(), inner.clone()));
                }
            }
            Stmt::Nop => {}
        }
    }
    Ok(())
}

// ── Self-checks ──────────────────────────────────────────────────────────────

#[test]
fn script_compile_flags_missing_colon() {
    let err = check("if x == 1\n    pass").unwrap_err();
    assert_eq!(err.line, Some(1));
    assert!(err.message.contains("':'"));
}

#[test]
fn script_compile_accepts_blocks() {
    assert!(check("def build(name):\n    print('x')  # note: fine\nbuild('a')").is_ok());
}

#[test]
fn script_parse_collects_functions_in_order() {
    let program = parse("def b():\n    pass\ndef a(x):\n    print(x)\nb()");
    assert_eq!(program.functions.keys_in_order(), ["b", "a"]);
    assert_eq!(program.functions.get("a").unwrap().params, ["x"]);
    assert_eq!(program.main.len(), 1);
}
