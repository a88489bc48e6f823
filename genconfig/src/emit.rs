//! Makefile and C header rendering.
//!
//! Both listings walk the resolved knobs in schema order and read the
//! final value at each knob's storage path. Knobs outside the resolved
//! set never show up.

use serde_json::Value;

use crate::{
    data::{
        document::get_value,
        item::{KnobType, Tristate},
        registry::{KnobEntry, KnobRegistry},
    },
    resolve::ResolvedSet,
};

/// Render the `NAME=value` listing.
///
/// Strings are quoted, `bool` and choice alternatives print `y`/`n`, `int`
/// and `tristate` print their value.
pub fn makefile(resolved: &ResolvedSet, registry: &KnobRegistry, doc: &Value) -> String {
    let mut out = String::new();
    for (entry, value) in knobs(resolved, registry, doc) {
        let rendered = match entry.ty {
            KnobType::Str => quote(value),
            KnobType::Bool | KnobType::BoolChoice => yes_no(is_on(entry, value)).to_string(),
            KnobType::Int | KnobType::Tristate => literal(value),
        };
        out.push_str(&format!("{}={}\n", entry.name, rendered));
    }
    out
}

/// Render the `#define` listing.
///
/// `makeOnly` knobs are skipped, and so are knobs that are off.
pub fn header(resolved: &ResolvedSet, registry: &KnobRegistry, doc: &Value) -> String {
    let mut out = String::new();
    for (entry, value) in knobs(resolved, registry, doc) {
        if entry.make_only {
            continue;
        }
        let rendered = match entry.ty {
            KnobType::Str => Some(quote(value)),
            KnobType::Bool | KnobType::BoolChoice => is_on(entry, value).then(|| "1".to_string()),
            KnobType::Tristate => value
                .and_then(Value::as_str)
                .and_then(Tristate::parse)
                .and_then(|t| t.c_value())
                .map(|v| v.to_string()),
            KnobType::Int => Some(literal(value)),
        };
        if let Some(rendered) = rendered {
            out.push_str(&format!("#define {} {}\n", entry.name, rendered));
        }
    }
    out
}

fn knobs<'a>(
    resolved: &'a ResolvedSet,
    registry: &'a KnobRegistry,
    doc: &'a Value,
) -> impl Iterator<Item = (&'a KnobEntry, Option<&'a Value>)> {
    resolved.iter().filter_map(move |name| {
        let Some(entry) = registry.get(name) else {
            warn!("resolved knob `{name}` is not registered");
            return None;
        };
        Some((entry, get_value(doc, &entry.path)))
    })
}

fn is_on(entry: &KnobEntry, value: Option<&Value>) -> bool {
    match (&entry.choice, value) {
        (Some(key), Some(Value::String(s))) => s == key,
        (None, Some(Value::Bool(b))) => *b,
        _ => false,
    }
}

fn yes_no(on: bool) -> &'static str {
    if on { "y" } else { "n" }
}

fn literal(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(value) => value.to_string(),
        None => String::new(),
    }
}

fn quote(value: Option<&Value>) -> String {
    let raw = literal(value);
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        match c {
            '\\' | '"' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            // Octal, so a following digit is never swallowed.
            c if c.is_ascii_control() => out.push_str(&format!("\\{:03o}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{schema::SchemaModel, schema::SchemaNode};
    use serde_json::json;

    fn setup(doc: Value) -> (ResolvedSet, KnobRegistry, Value) {
        let root = SchemaNode::compile(&SchemaModel::from_value(json!({
            "metaType": "menu",
            "properties": {
                "name": { "metaType": "str", "config": "NAME", "default": "a \"b\" \\c" },
                "hz": { "metaType": "int", "config": "HZ", "default": 100 },
                "smp": { "metaType": "bool", "config": "SMP", "default": false },
                "fs": { "metaType": "tristate", "config": "FS", "default": "m" },
                "net": { "metaType": "tristate", "config": "NET", "default": "n" },
                "arch": { "metaType": "boolChoice", "choice": { "x86": "ARCH_X86", "arm": "ARCH_ARM" } },
                "dbg": { "metaType": "bool", "config": "DBG", "default": true, "makeOnly": true }
            }
        })))
        .unwrap();
        let registry = KnobRegistry::build(&root).unwrap();
        let mut resolved = ResolvedSet::default();
        for knob in ["NAME", "HZ", "SMP", "FS", "NET", "ARCH_ARM", "DBG"] {
            resolved.insert(knob);
        }
        (resolved, registry, doc)
    }

    #[test]
    fn test_makefile() {
        let (resolved, registry, doc) = setup(json!({
            "name": "a \"b\" \\c", "hz": 100, "smp": false, "fs": "m", "net": "n",
            "arch": "arm", "dbg": true
        }));
        assert_eq!(
            makefile(&resolved, &registry, &doc),
            "NAME=\"a \\\"b\\\" \\\\c\"\nHZ=100\nSMP=n\nFS=m\nNET=n\nARCH_ARM=y\nDBG=y\n"
        );
    }

    #[test]
    fn test_header() {
        let (resolved, registry, doc) = setup(json!({
            "name": "x", "hz": 250, "smp": false, "fs": "m", "net": "n",
            "arch": "arm", "dbg": true
        }));
        assert_eq!(
            header(&resolved, &registry, &doc),
            "#define NAME \"x\"\n#define HZ 250\n#define FS 2\n#define ARCH_ARM 1\n"
        );
    }

    #[test]
    fn test_control_characters_stay_on_one_line() {
        let (resolved, registry, _) = setup(json!({}));
        let doc = json!({
            "name": "x\n#define EVIL 1\r\tz\u{1}7", "hz": 1, "smp": true, "fs": "y", "net": "n",
            "arch": "x86", "dbg": false
        });

        let header = header(&resolved, &registry, &doc);
        assert_eq!(header.lines().count(), 4);
        assert_eq!(
            header.lines().next(),
            Some("#define NAME \"x\\n#define EVIL 1\\r\\tz\\0017\"")
        );
        assert!(!header.lines().any(|l| l.starts_with("#define EVIL")));

        let makefile = makefile(&resolved, &registry, &doc);
        assert_eq!(makefile.lines().count(), resolved.len());
        assert!(!makefile.lines().any(|l| l.starts_with("#define")));
    }

    #[test]
    fn test_empty() {
        let registry = KnobRegistry::default();
        let resolved = ResolvedSet::default();
        assert_eq!(makefile(&resolved, &registry, &json!({})), "");
        assert_eq!(header(&resolved, &registry, &json!({})), "");
    }
}
