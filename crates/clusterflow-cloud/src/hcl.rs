//! Minimal HCL2 writer used by the Terraform target
//!
//! Attributes are written in key order with aligned `=` signs, nested blocks
//! after the attributes, so the same input always produces the same bytes.

use std::collections::BTreeMap;
use std::fmt::Write as _;

/// A raw HCL expression, written without quotes.
///
/// Used for references to attributes that only exist once Terraform has
/// applied another resource, e.g. `scaleway_lb.api.ip_address`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Literal(String);

impl Literal {
    pub fn expression(expr: impl Into<String>) -> Self {
        Self(expr.into())
    }

    /// `<type>.<name>.<attribute>` with the name sanitised.
    pub fn property(resource_type: &str, name: &str, attribute: &str) -> Self {
        Self(format!(
            "{}.{}.{}",
            resource_type,
            sanitize_name(name),
            attribute
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Terraform resource names may not contain dots.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '.' | '/' | ' ' => '-',
            c => c,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum HclValue {
    String(String),
    Number(i64),
    Bool(bool),
    Literal(Literal),
    List(Vec<HclValue>),
    Map(BTreeMap<String, HclValue>),
}

impl From<&str> for HclValue {
    fn from(v: &str) -> Self {
        HclValue::String(v.to_string())
    }
}

impl From<String> for HclValue {
    fn from(v: String) -> Self {
        HclValue::String(v)
    }
}

impl From<&String> for HclValue {
    fn from(v: &String) -> Self {
        HclValue::String(v.clone())
    }
}

impl From<i64> for HclValue {
    fn from(v: i64) -> Self {
        HclValue::Number(v)
    }
}

impl From<u32> for HclValue {
    fn from(v: u32) -> Self {
        HclValue::Number(i64::from(v))
    }
}

impl From<u16> for HclValue {
    fn from(v: u16) -> Self {
        HclValue::Number(i64::from(v))
    }
}

impl From<bool> for HclValue {
    fn from(v: bool) -> Self {
        HclValue::Bool(v)
    }
}

impl From<Literal> for HclValue {
    fn from(v: Literal) -> Self {
        HclValue::Literal(v)
    }
}

impl<T: Into<HclValue>> From<Vec<T>> for HclValue {
    fn from(v: Vec<T>) -> Self {
        HclValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, String>> for HclValue {
    fn from(v: BTreeMap<String, String>) -> Self {
        HclValue::Map(v.into_iter().map(|(k, v)| (k, HclValue::String(v))).collect())
    }
}

/// Body of a block: attributes and nested blocks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HclBody {
    attributes: BTreeMap<String, HclValue>,
    blocks: Vec<(String, HclBody)>,
}

impl HclBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute.
    pub fn attr(mut self, key: &str, value: impl Into<HclValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Set an attribute when the value is present.
    pub fn attr_opt<V: Into<HclValue>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.attr(key, v),
            None => self,
        }
    }

    /// Append a nested block. Blocks keep their insertion order.
    pub fn block(mut self, name: &str, body: HclBody) -> Self {
        self.blocks.push((name.to_string(), body));
        self
    }

    pub fn get(&self, key: &str) -> Option<&HclValue> {
        self.attributes.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.blocks.is_empty()
    }

    /// Write `header { ... }` at the given indentation.
    pub fn write_block(&self, out: &mut String, indent: usize, header: &str) {
        let pad = " ".repeat(indent);
        let _ = writeln!(out, "{}{} {{", pad, header);
        self.write_body(out, indent + 2);
        let _ = writeln!(out, "{}}}", pad);
    }

    /// Write `name = { ... }` at the given indentation.
    pub fn write_object(&self, out: &mut String, indent: usize, name: &str) {
        let pad = " ".repeat(indent);
        let _ = writeln!(out, "{}{} = {{", pad, name);
        self.write_body(out, indent + 2);
        let _ = writeln!(out, "{}}}", pad);
    }

    fn write_body(&self, out: &mut String, indent: usize) {
        let pad = " ".repeat(indent);
        let width = self.attributes.keys().map(|k| k.len()).max().unwrap_or(0);
        for (key, value) in &self.attributes {
            let _ = write!(out, "{}{:<width$} = ", pad, key, width = width);
            write_value(out, value, indent);
            out.push('\n');
        }
        for (name, body) in &self.blocks {
            body.write_block(out, indent, name);
        }
    }
}

fn write_value(out: &mut String, value: &HclValue, indent: usize) {
    match value {
        HclValue::String(s) => write_string(out, s),
        HclValue::Number(n) => {
            let _ = write!(out, "{}", n);
        }
        HclValue::Bool(b) => {
            let _ = write!(out, "{}", b);
        }
        HclValue::Literal(l) => out.push_str(l.as_str()),
        HclValue::List(items) => {
            if items.iter().any(|i| matches!(i, HclValue::Map(_))) {
                let pad = " ".repeat(indent + 2);
                out.push_str("[\n");
                for item in items {
                    out.push_str(&pad);
                    write_value(out, item, indent + 2);
                    out.push_str(",\n");
                }
                out.push_str(&" ".repeat(indent));
                out.push(']');
            } else {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_value(out, item, indent);
                }
                out.push(']');
            }
        }
        HclValue::Map(map) => {
            if map.is_empty() {
                out.push_str("{}");
                return;
            }
            let pad = " ".repeat(indent + 2);
            let width = map.keys().map(|k| quote(k).len()).max().unwrap_or(0);
            out.push_str("{\n");
            for (key, item) in map {
                let _ = write!(out, "{}{:<width$} = ", pad, quote(key), width = width);
                write_value(out, item, indent + 2);
                out.push('\n');
            }
            out.push_str(&" ".repeat(indent));
            out.push('}');
        }
    }
}

/// Quote and escape a string as an HCL template literal.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    write_string(&mut out, s);
    out
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
