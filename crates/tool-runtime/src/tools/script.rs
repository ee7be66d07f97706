//! Sandboxed script tool.
//!
//! Scripts are minijinja templates evaluated in a fresh [`Environment`] per
//! call. The template language has no file, process or network primitives;
//! the environment has no loader, so `include`/`import`/`extends` cannot
//! reach anything, and only the filters and functions registered below
//! (date, JSON, numeric, regex) are callable. Evaluation is bounded by a
//! fuel budget and an output cap, and runs in a child process (see
//! [`super::sandbox`]) with an address-space cap and a wall-clock timeout.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use minijinja::value::Value as JinjaValue;
use minijinja::{context, Environment, Error as JinjaError, ErrorKind, UndefinedBehavior};
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::fmt::Write as _;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use maidx_core::config::ToolsConfig;
use maidx_core::dates;

use super::sandbox::{self, SandboxCommand};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError};

/// Instructions a single script may execute.
const FUEL: u64 = 200_000;
/// Compiled-regex size cap for pattern functions.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Bounds applied to each evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ScriptLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
    pub fuel: u64,
    /// Address-space cap of the evaluating process.
    pub max_memory_bytes: u64,
}

impl ScriptLimits {
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self {
            timeout: config.script_timeout(),
            max_output_bytes: config.script_max_output_bytes,
            fuel: FUEL,
            max_memory_bytes: config.script_max_memory_mb * 1024 * 1024,
        }
    }
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            max_output_bytes: 16 * 1024,
            fuel: FUEL,
            max_memory_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Evaluate model-written scripts against the current document.
pub struct RunScriptTool {
    limits: ScriptLimits,
    command: SandboxCommand,
}

impl RunScriptTool {
    pub fn new(limits: ScriptLimits, command: SandboxCommand) -> Self {
        Self { limits, command }
    }
}

#[async_trait]
impl Tool for RunScriptTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "run_script".to_string(),
            description: "Evaluate a short Jinja-style script and return its rendered output. \
                Use it for date conversion, arithmetic, JSON handling and pattern matching. \
                The document text is available as `document`. \
                Filters: parse_date(format?), parse_datetime, format_date(format), from_json, tojson, \
                round, abs, int, float, plus the standard string/list filters. \
                Functions: add_days(date, n), days_between(a, b), sqrt(x), pow(x, y), floor(x), ceil(x), \
                regex_find(pattern, text), regex_findall(pattern, text), regex_replace(pattern, repl, text). \
                Test: `is matching(pattern)`. \
                Example: {{ \"Jan 5, 2024\" | parse_date }} renders 2024-01-05. \
                There is no file, process or network access."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "script": {
                        "type": "string",
                        "description": "Template source, e.g. {{ pow(2, 10) }}"
                    }
                },
                "required": ["script"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<String, ToolError> {
        let script = input
            .get("script")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing 'script' field".to_string()))?;

        debug!(bytes = script.len(), "Evaluating script");
        sandbox::run(&self.command, script, &context.document.text, &self.limits).await
    }
}

/// Evaluate one script synchronously in the current process.
///
/// Only fuel and the output cap apply here; [`sandbox::serve`] adds the
/// memory and CPU limits around this call.
pub fn evaluate(script: &str, document: &str, limits: &ScriptLimits) -> Result<String, ToolError> {
    let env = sandbox_environment(limits.fuel);
    let template = env.template_from_str(script).map_err(classify)?;

    let overflow = Arc::new(AtomicBool::new(false));
    let mut out = CappedWriter {
        buf: Vec::new(),
        limit: limits.max_output_bytes,
        overflow: overflow.clone(),
    };
    let rendered = template.render_to_write(context! { document => document }, &mut out);
    if overflow.load(Ordering::SeqCst) {
        return Err(ToolError::OutputTooLarge {
            limit: limits.max_output_bytes,
        });
    }
    rendered.map_err(classify)?;

    Ok(String::from_utf8_lossy(&out.buf).trim().to_string())
}

fn sandbox_environment(fuel: u64) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_fuel(Some(fuel));

    env.add_filter("parse_date", parse_date);
    env.add_filter("parse_datetime", parse_datetime);
    env.add_filter("format_date", format_date);
    env.add_filter("from_json", from_json);

    env.add_function("add_days", add_days);
    env.add_function("days_between", days_between);
    env.add_function("sqrt", sqrt);
    env.add_function("pow", pow);
    env.add_function("floor", floor);
    env.add_function("ceil", ceil);
    env.add_function("from_json", from_json);
    env.add_function("regex_find", regex_find);
    env.add_function("regex_findall", regex_findall);
    env.add_function("regex_replace", regex_replace);

    env.add_test("matching", matching);
    env
}

/// Map evaluation errors onto the tool error taxonomy.
fn classify(err: JinjaError) -> ToolError {
    let detail = err.to_string();
    match err.kind() {
        ErrorKind::UnknownFunction
        | ErrorKind::UnknownFilter
        | ErrorKind::UnknownTest
        | ErrorKind::UnknownMethod
        | ErrorKind::TemplateNotFound
        | ErrorKind::BadInclude => ToolError::SandboxViolation(format!(
            "{detail} (only the listed filters and functions are available)"
        )),
        ErrorKind::UndefinedError => ToolError::SandboxViolation(format!(
            "{detail} (only `document` and the listed functions are defined)"
        )),
        ErrorKind::OutOfFuel => {
            ToolError::SandboxTimeout("script exceeded its instruction budget".to_string())
        }
        ErrorKind::SyntaxError => ToolError::ExecutionFailed(format!("syntax error: {detail}")),
        _ => ToolError::ExecutionFailed(detail),
    }
}

struct CappedWriter {
    buf: Vec<u8>,
    limit: usize,
    overflow: Arc<AtomicBool>,
}

impl io::Write for CappedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() + data.len() > self.limit {
            self.overflow.store(true, Ordering::SeqCst);
            return Err(io::Error::new(io::ErrorKind::Other, "output limit reached"));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── Facilities ────────────────────────────────────────────────

fn invalid(msg: String) -> JinjaError {
    JinjaError::new(ErrorKind::InvalidOperation, msg)
}

fn date_arg(value: &str) -> Result<chrono::NaiveDate, JinjaError> {
    dates::parse_date_lenient(value).ok_or_else(|| invalid(format!("could not parse date '{value}'")))
}

fn parse_date(value: String, format: Option<String>) -> Result<String, JinjaError> {
    let date = match format {
        Some(fmt) => dates::parse_date_with(&value, &fmt)
            .ok_or_else(|| invalid(format!("'{value}' does not match format '{fmt}'")))?,
        None => date_arg(&value)?,
    };
    Ok(dates::to_iso_date(date))
}

fn parse_datetime(value: String) -> Result<String, JinjaError> {
    dates::parse_datetime_lenient(&value)
        .map(dates::to_iso_datetime)
        .ok_or_else(|| invalid(format!("could not parse datetime '{value}'")))
}

fn format_date(value: String, format: String) -> Result<String, JinjaError> {
    let date = date_arg(&value)?;
    let mut out = String::new();
    write!(out, "{}", date.format(&format))
        .map_err(|_| invalid(format!("invalid date format '{format}'")))?;
    Ok(out)
}

fn add_days(date: String, days: i64) -> Result<String, JinjaError> {
    let start = date_arg(&date)?;
    ChronoDuration::try_days(days)
        .and_then(|d| start.checked_add_signed(d))
        .map(dates::to_iso_date)
        .ok_or_else(|| invalid(format!("date out of range: {date} + {days} days")))
}

fn days_between(from: String, to: String) -> Result<i64, JinjaError> {
    Ok((date_arg(&to)? - date_arg(&from)?).num_days())
}

fn sqrt(x: f64) -> Result<f64, JinjaError> {
    if x < 0.0 {
        return Err(invalid(format!("sqrt of negative number {x}")));
    }
    Ok(x.sqrt())
}

fn pow(base: f64, exp: f64) -> f64 {
    base.powf(exp)
}

fn floor(x: f64) -> i64 {
    x.floor() as i64
}

fn ceil(x: f64) -> i64 {
    x.ceil() as i64
}

fn from_json(raw: String) -> Result<JinjaValue, JinjaError> {
    let parsed: Value =
        serde_json::from_str(&raw).map_err(|e| invalid(format!("invalid JSON: {e}")))?;
    Ok(JinjaValue::from_serialize(&parsed))
}

fn compile(pattern: &str) -> Result<Regex, JinjaError> {
    RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| invalid(format!("invalid pattern: {e}")))
}

/// First match (or first capture group, when the pattern has one).
fn regex_find(pattern: String, text: String) -> Result<JinjaValue, JinjaError> {
    let re = compile(&pattern)?;
    let found = re.captures(&text).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().to_string())
    });
    Ok(found.map(JinjaValue::from).unwrap_or(JinjaValue::from(())))
}

fn regex_findall(pattern: String, text: String) -> Result<JinjaValue, JinjaError> {
    let re = compile(&pattern)?;
    let all: Vec<String> = re
        .captures_iter(&text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
        .map(|m| m.as_str().to_string())
        .collect();
    Ok(JinjaValue::from(all))
}

fn regex_replace(pattern: String, replacement: String, text: String) -> Result<String, JinjaError> {
    Ok(compile(&pattern)?
        .replace_all(&text, replacement.as_str())
        .into_owned())
}

fn matching(value: String, pattern: String) -> Result<bool, JinjaError> {
    Ok(compile(&pattern)?.is_match(&value))
}
