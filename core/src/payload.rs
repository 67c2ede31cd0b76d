//! Call log payload formatting
//!
//! Every intercepted call is logged as one line the controller parses with a
//! fixed grammar:
//!
//! ```text
//! TId:<thread>;objCls:'<class>';mthd:'<method>';retCls:'<ret>';params:'<T1>' '<v1>' ...;stacktrace:'<f1>-><f2>'
//! ```
//!
//! Quoted values have their single quotes escaped so the line stays parseable.

use std::fmt::Display;

/// Longest value kept verbatim by [`trim_to_log_size`]
pub const MAX_LOG_VALUE_CHARS: usize = 1024;

/// Marker appended to a truncated value
pub const TRUNCATION_SUFFIX: &str = "_TRUNCATED_TO_1000_CHARS";

const ESCAPE_CHAR: char = '\\';
const ENCLOSING_CHAR: char = '\'';
const FRAME_SEPARATOR: &str = "->";

/// Escape single quotes as `\'`
pub fn escape_enclosings(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == ENCLOSING_CHAR {
            escaped.push(ESCAPE_CHAR);
        }
        escaped.push(c);
    }
    escaped
}

/// Cap a value at [`MAX_LOG_VALUE_CHARS`] characters.
///
/// Longer values keep their first 1000 characters followed by
/// [`TRUNCATION_SUFFIX`], so the result is exactly 1024 characters.
pub fn trim_to_log_size(value: &str) -> String {
    if value.chars().count() <= MAX_LOG_VALUE_CHARS {
        return value.to_string();
    }

    let keep = MAX_LOG_VALUE_CHARS - TRUNCATION_SUFFIX.len();
    let mut trimmed: String = value.chars().take(keep).collect();
    trimmed.push_str(TRUNCATION_SUFFIX);
    trimmed
}

/// Label for the calling thread: its name, or its id when unnamed
pub fn current_thread_label() -> String {
    let current = std::thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}

/// One intercepted API call, ready to be rendered as a log payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCallRecord {
    pub thread: String,
    pub class_name: String,
    pub method: String,
    pub return_class: String,
    pub params: Vec<(String, String)>,
    pub stack_trace: Vec<String>,
}

impl ApiCallRecord {
    /// Record a call on the current thread returning `void`
    pub fn new(class_name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            thread: current_thread_label(),
            class_name: class_name.into(),
            method: method.into(),
            return_class: "void".to_string(),
            params: Vec::new(),
            stack_trace: Vec::new(),
        }
    }

    pub fn thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = thread.into();
        self
    }

    pub fn return_class(mut self, return_class: impl Into<String>) -> Self {
        self.return_class = return_class.into();
        self
    }

    /// Add a parameter with its declared type and rendered value
    pub fn param(mut self, type_name: impl Into<String>, value: impl Display) -> Self {
        self.params.push((type_name.into(), value.to_string()));
        self
    }

    /// Add a parameter whose value is absent
    pub fn null_param(mut self, type_name: impl Into<String>) -> Self {
        self.params.push((type_name.into(), "null".to_string()));
        self
    }

    /// Add a stack frame, innermost first
    pub fn frame(mut self, frame: impl Into<String>) -> Self {
        self.stack_trace.push(frame.into());
        self
    }

    /// Resources the call touches, as policy lookups see them
    pub fn resources(&self) -> Vec<String> {
        self.params.iter().map(|(_, value)| value.clone()).collect()
    }

    /// Render the payload line
    pub fn to_payload(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|(type_name, value)| {
                format!(
                    "'{}' '{}'",
                    escape_enclosings(type_name),
                    escape_enclosings(value)
                )
            })
            .collect::<Vec<_>>()
            .join(" ");

        let stack_trace = self
            .stack_trace
            .iter()
            .map(|frame| escape_enclosings(frame))
            .collect::<Vec<_>>()
            .join(FRAME_SEPARATOR);

        format!(
            "TId:{};objCls:'{}';mthd:'{}';retCls:'{}';params:{};stacktrace:'{}'",
            self.thread,
            escape_enclosings(&self.class_name),
            escape_enclosings(&self.method),
            escape_enclosings(&self.return_class),
            params,
            stack_trace
        )
    }
}

impl std::fmt::Display for ApiCallRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_payload())
    }
}
