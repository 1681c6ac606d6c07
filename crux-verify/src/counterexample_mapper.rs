// Counterexample Mapper: solver model -> source-level values
//
// Model constants of sort `Unk` are read back as the values a program would
// see: None, booleans, integers, functions, tuples. Anything the mapper does
// not recognise is kept as raw model text.

use std::collections::BTreeMap;
use std::fmt;

/// A value read from a model.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    None,
    Bool(bool),
    Int(i64),
    /// Opaque function handle, by its model name.
    Func(String),
    Tuple(Vec<TypedValue>),
    /// The `undef` marker: no defined value.
    Undefined,
    Opaque(String),
}

impl TypedValue {
    pub fn display(&self, indent: usize) -> String {
        let pad = " ".repeat(indent);
        match self {
            TypedValue::Tuple(elems) if elems.len() > 5 => {
                let mut result = format!("{pad}(\n");
                for e in elems {
                    result.push_str(&format!("{pad}  {},\n", e.display_compact()));
                }
                result.push_str(&format!("{pad})"));
                result
            }
            TypedValue::Opaque(raw) => format!("{pad}<unrecognised: {raw}>"),
            other => format!("{pad}{}", other.display_compact()),
        }
    }

    /// Single line, in source syntax where there is one.
    pub fn display_compact(&self) -> String {
        match self {
            TypedValue::None => "None".to_string(),
            TypedValue::Bool(true) => "True".to_string(),
            TypedValue::Bool(false) => "False".to_string(),
            TypedValue::Int(n) => n.to_string(),
            TypedValue::Func(name) => format!("<function {name}>"),
            TypedValue::Tuple(elems) if elems.len() == 1 => format!("({},)", elems[0].display_compact()),
            TypedValue::Tuple(elems) => {
                let vals = elems.iter().map(|e| e.display_compact()).collect::<Vec<_>>().join(", ");
                format!("({vals})")
            }
            TypedValue::Undefined => "<undefined>".to_string(),
            TypedValue::Opaque(raw) => raw.clone(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            TypedValue::None | TypedValue::Undefined => false,
            TypedValue::Bool(b) => *b,
            TypedValue::Int(n) => *n != 0,
            TypedValue::Tuple(elems) => !elems.is_empty(),
            TypedValue::Func(_) | TypedValue::Opaque(_) => true,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display(0))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexp::Atom(a) => f.write_str(a),
            Sexp::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '(' | ')' | '{' | '}' => {
                if !cur.is_empty() {
                    tokens.push(std::mem::take(&mut cur));
                }
                tokens.push(c.to_string());
            }
            '|' => {
                // Quoted symbol, kept without the bars.
                for q in chars.by_ref() {
                    if q == '|' {
                        break;
                    }
                    cur.push(q);
                }
            }
            c if c.is_whitespace() => {
                if !cur.is_empty() {
                    tokens.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    tokens
}

/// Braces become atoms; unbalanced input yields what was read so far.
fn parse_sexps(tokens: &[String]) -> Vec<Sexp> {
    fn go(tokens: &[String], pos: &mut usize) -> Vec<Sexp> {
        let mut out = Vec::new();
        while let Some(tok) = tokens.get(*pos) {
            *pos += 1;
            match tok.as_str() {
                "(" => out.push(Sexp::List(go(tokens, pos))),
                ")" => return out,
                _ => out.push(Sexp::Atom(tok.clone())),
            }
        }
        out
    }
    go(tokens, &mut 0)
}

/// Maps solver models to [`TypedValue`]s.
#[derive(Debug, Default)]
pub struct CounterexampleMapper {
    /// When non-empty, only these constants are reported.
    interesting: Vec<String>,
    /// Never reported.
    hidden: Vec<String>,
}

impl CounterexampleMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report only `names` (in that order of preference).
    pub fn only(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            interesting: names.into_iter().map(Into::into).collect(),
            hidden: Vec::new(),
        }
    }

    /// Leave `names` out of the report, e.g. constants standing for known
    /// functions.
    pub fn hiding(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.hidden.extend(names.into_iter().map(Into::into));
        self
    }

    /// Constant interpretations from a model, in either of the textual forms
    /// Z3 prints: `(define-fun x () Unk v)` or `x -> v`. Function
    /// interpretations and non-`Unk` constants are skipped.
    pub fn map_model(&self, model: &str) -> BTreeMap<String, TypedValue> {
        let mut items = parse_sexps(&tokenize(model));
        if let [Sexp::List(inner)] = items.as_slice() {
            if matches!(inner.first(), Some(Sexp::Atom(a)) if a == "model") {
                items = inner[1..].to_vec();
            }
        }

        let mut out = BTreeMap::new();
        let mut i = 0;
        while i < items.len() {
            match &items[i] {
                Sexp::List(def) => {
                    if let [Sexp::Atom(kw), Sexp::Atom(name), Sexp::List(params), Sexp::Atom(sort), value] =
                        def.as_slice()
                    {
                        if kw == "define-fun" && params.is_empty() && sort == "Unk" {
                            self.insert(&mut out, name, value);
                        }
                    }
                    i += 1;
                }
                Sexp::Atom(name) if matches!(items.get(i + 1), Some(Sexp::Atom(a)) if a == "->") => {
                    match items.get(i + 2) {
                        Some(Sexp::Atom(open)) if open == "{" => {
                            i += 3;
                            while i < items.len() && items[i] != Sexp::Atom("}".into()) {
                                i += 1;
                            }
                            i += 1;
                        }
                        Some(value) => {
                            if looks_like_unk(value) {
                                self.insert(&mut out, name, value);
                            }
                            i += 3;
                        }
                        None => i += 2,
                    }
                }
                Sexp::Atom(_) => i += 1,
            }
        }
        out
    }

    fn insert(&self, out: &mut BTreeMap<String, TypedValue>, name: &str, value: &Sexp) {
        if self.hidden.iter().any(|n| n == name) {
            return;
        }
        if self.interesting.is_empty() || self.interesting.iter().any(|n| n == name) {
            out.insert(name.to_string(), map_value(value));
        }
    }

    /// Render as `name = value` lines.
    pub fn describe(&self, values: &BTreeMap<String, TypedValue>) -> String {
        values
            .iter()
            .map(|(k, v)| format!("{k} = {}", v.display_compact()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// In `x -> v` form there are no sorts; keep values built from `Unk`
/// constructors.
fn looks_like_unk(value: &Sexp) -> bool {
    match value {
        Sexp::Atom(a) => matches!(a.as_str(), "none" | "empty" | "undef"),
        Sexp::List(items) => matches!(
            items.first(),
            Some(Sexp::Atom(h)) if matches!(h.as_str(), "bool" | "int" | "func" | "cons")
        ),
    }
}

fn map_value(value: &Sexp) -> TypedValue {
    let opaque = || TypedValue::Opaque(value.to_string());
    match value {
        Sexp::Atom(a) => match a.as_str() {
            "none" => TypedValue::None,
            "empty" => TypedValue::Tuple(Vec::new()),
            "undef" => TypedValue::Undefined,
            _ => opaque(),
        },
        Sexp::List(items) => match items.as_slice() {
            [Sexp::Atom(h), Sexp::Atom(b)] if h == "bool" => match b.as_str() {
                "true" => TypedValue::Bool(true),
                "false" => TypedValue::Bool(false),
                _ => opaque(),
            },
            [Sexp::Atom(h), n] if h == "int" => parse_int(n).map_or_else(opaque, TypedValue::Int),
            [Sexp::Atom(h), f] if h == "func" => TypedValue::Func(f.to_string()),
            [Sexp::Atom(h), tl, hd] if h == "cons" => match map_value(tl) {
                TypedValue::Tuple(mut elems) => {
                    elems.push(map_value(hd));
                    TypedValue::Tuple(elems)
                }
                _ => opaque(),
            },
            _ => opaque(),
        },
    }
}

fn parse_int(n: &Sexp) -> Option<i64> {
    match n {
        Sexp::Atom(a) => a.parse().ok(),
        Sexp::List(items) => match items.as_slice() {
            [Sexp::Atom(minus), Sexp::Atom(a)] if minus == "-" => a.parse::<i64>().ok().map(|v| -v),
            _ => None,
        },
    }
}
