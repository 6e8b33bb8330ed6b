// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Fact lists in the solver's input language.
//!
//! A chart specification is a tree of entities (view, mark, encoding, facet,
//! field, ...) with scalar attributes. [`dict_to_facts`] flattens such a tree
//! into `entity(kind,parent,id).` and `attribute(name,owner,value).` facts;
//! [`answer_set_to_spec`] rebuilds the tree from the atoms of a solver model.

use crate::error::{FactError, FactResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

pub type Fact = String;

pub const ROOT: &str = "root";
/// Object key that pins the identifier of an entity instead of a generated one.
pub const ENTITY_ID_KEY: &str = "__id__";

/// True for strings usable as bare solver constants.
pub fn is_constant(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Renders a symbol, quoting it when it is not a bare constant.
pub fn symbol(s: &str) -> String {
    if is_constant(s) {
        s.to_string()
    } else {
        quote(s)
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(symbol(s)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(i.to_string()),
            None => n.as_f64().map(|f| (f.round() as i64).to_string()),
        },
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

pub fn entity(kind: &str, parent: &str, id: &str) -> Fact {
    format!("entity({kind},{parent},{id}).")
}

/// `path` is `[key]` for root attributes and `[kind, key]` below entities.
pub fn attribute(path: &[&str], owner: &str, value: &str) -> Fact {
    let name = match path {
        [single] => (*single).to_string(),
        _ => format!("({})", path.join(",")),
    };
    format!("attribute({name},{owner},{value}).")
}

/// Flattens a nested specification into facts, depth first, keeping key order.
pub fn dict_to_facts(data: &Value) -> Vec<Fact> {
    let mut facts = Vec::new();
    let mut next_id = 0usize;
    if let Value::Object(obj) = data {
        collect_facts(obj, None, ROOT, &mut next_id, &mut facts);
    } else {
        warn!("dict_to_facts expects an object at the root, got {data}");
    }
    facts
}

fn collect_facts(
    obj: &Map<String, Value>,
    kind: Option<&str>,
    owner: &str,
    next_id: &mut usize,
    facts: &mut Vec<Fact>,
) {
    for (key, value) in obj {
        if key == ENTITY_ID_KEY {
            continue;
        }
        match value {
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::Object(child) => {
                            push_entity(key, owner, child, next_id, facts);
                        }
                        other => {
                            debug!(key = %key, value = %other, "Skipping non-object list item");
                        }
                    }
                }
            }
            Value::Object(child) => push_entity(key, owner, child, next_id, facts),
            _ => match scalar(value) {
                Some(rendered) => {
                    let path: Vec<&str> = match kind {
                        Some(k) => vec![k, key.as_str()],
                        None => vec![key.as_str()],
                    };
                    facts.push(attribute(&path, owner, &rendered));
                }
                None => debug!(key = %key, "Skipping null attribute"),
            },
        }
    }
}

fn push_entity(
    kind: &str,
    parent: &str,
    child: &Map<String, Value>,
    next_id: &mut usize,
    facts: &mut Vec<Fact>,
) {
    let id = match child.get(ENTITY_ID_KEY).and_then(scalar) {
        Some(id) => id,
        None => {
            let id = next_id.to_string();
            *next_id += 1;
            id
        }
    };
    facts.push(entity(kind, parent, &id));
    collect_facts(child, Some(kind), &id, next_id, facts);
}

/// A ground term as printed by the solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Number(i64),
    Symbol(String),
    Str(String),
    Tuple(Vec<Term>),
    Function { name: String, args: Vec<Term> },
}

impl Term {
    fn key(&self) -> Option<String> {
        match self {
            Term::Symbol(s) | Term::Str(s) => Some(s.clone()),
            Term::Number(n) => Some(n.to_string()),
            Term::Tuple(items) => items.last().and_then(Term::key),
            Term::Function { .. } => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Term::Number(n) => Value::from(*n),
            Term::Symbol(s) | Term::Str(s) => Value::String(s.clone()),
            Term::Tuple(items) => Value::Array(items.iter().map(Term::to_json).collect()),
            Term::Function { .. } => Value::String(self.to_string()),
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let join = |items: &[Term]| {
            items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        match self {
            Term::Number(n) => write!(f, "{n}"),
            Term::Symbol(s) => f.write_str(s),
            Term::Str(s) => f.write_str(&quote(s)),
            Term::Tuple(items) => write!(f, "({})", join(items)),
            Term::Function { name, args } => write!(f, "{name}({})", join(args)),
        }
    }
}

struct TermParser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> TermParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> FactError {
        FactError::Parse {
            input: self.input.to_string(),
            position: self.pos,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> FactResult<()> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{expected}', found '{c}'"))),
            None => Err(self.error(format!("expected '{expected}', found end of input"))),
        }
    }

    fn parse_complete(mut self) -> FactResult<Term> {
        let term = self.term()?;
        self.skip_ws();
        if self.peek() == Some('.') {
            self.pos += 1;
            self.skip_ws();
        }
        if self.pos < self.chars.len() {
            return Err(self.error("trailing input"));
        }
        Ok(term)
    }

    fn term(&mut self) -> FactResult<Term> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                let items = self.arguments()?;
                Ok(match items.len() {
                    1 => items.into_iter().next().unwrap_or(Term::Tuple(Vec::new())),
                    _ => Term::Tuple(items),
                })
            }
            Some('"') => self.string(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_lowercase() || c == '_' => {
                let name = self.identifier();
                self.skip_ws();
                if self.peek() == Some('(') {
                    let args = self.arguments()?;
                    Ok(Term::Function { name, args })
                } else {
                    Ok(Term::Symbol(name))
                }
            }
            Some(c) => Err(self.error(format!("unexpected character '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn arguments(&mut self) -> FactResult<Vec<Term>> {
        self.expect('(')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.term()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(')') => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
    }

    fn identifier(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '\'')
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn number(&mut self) -> FactResult<Term> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<i64>()
            .map(Term::Number)
            .map_err(|e| self.error(format!("invalid number '{text}': {e}")))
    }

    fn string(&mut self) -> FactResult<Term> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.pos += 1;
                    return Ok(Term::Str(out));
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some('n') => out.push('\n'),
                        Some(c) => out.push(c),
                        None => return Err(self.error("unterminated escape")),
                    }
                    self.pos += 1;
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
                None => return Err(self.error("unterminated string")),
            }
        }
    }
}

pub fn parse_atom(input: &str) -> FactResult<Term> {
    TermParser::new(input).parse_complete()
}

#[derive(Debug, Default)]
struct Node {
    attributes: Map<String, Value>,
    children: Vec<(String, usize)>,
}

/// Rebuilds the nested specification from the `entity/3` and `attribute/3`
/// atoms of a model. Entity identifiers are dropped; other atoms are ignored.
pub fn answer_set_to_spec<S: AsRef<str>>(atoms: &[S]) -> FactResult<Value> {
    let parsed = atoms
        .iter()
        .map(|a| parse_atom(a.as_ref()))
        .collect::<FactResult<Vec<_>>>()?;

    let mut nodes = vec![Node::default()];
    let mut index: HashMap<String, usize> = HashMap::from([(ROOT.to_string(), 0)]);

    let mut pending: Vec<(String, String, String)> = Vec::new();
    for term in &parsed {
        if let Term::Function { name, args } = term {
            if name == "entity" && args.len() == 3 {
                let (kind, parent, id) = (
                    args[0].key().unwrap_or_default(),
                    args[1].to_string(),
                    args[2].to_string(),
                );
                pending.push((kind, parent, id));
            }
        }
    }
    // Parents may appear after their children in solver output.
    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|(kind, parent, id)| match index.get(parent).copied() {
            Some(parent_idx) => {
                let idx = nodes.len();
                nodes.push(Node::default());
                nodes[parent_idx].children.push((kind.clone(), idx));
                index.insert(id.clone(), idx);
                false
            }
            None => true,
        });
        if pending.len() == before {
            let (_, parent, id) = &pending[0];
            return Err(FactError::DanglingEntity {
                id: id.clone(),
                parent: parent.clone(),
            });
        }
    }

    for term in &parsed {
        match term {
            Term::Function { name, args } if name == "attribute" && args.len() == 3 => {
                let key = args[0].key().ok_or_else(|| FactError::UnexpectedAtom {
                    atom: term.to_string(),
                })?;
                let owner = args[1].to_string();
                let idx = *index.get(&owner).ok_or_else(|| FactError::DanglingEntity {
                    id: format!("attribute {key}"),
                    parent: owner.clone(),
                })?;
                nodes[idx].attributes.insert(key, args[2].to_json());
            }
            Term::Function { name, .. } if name == "entity" => {}
            other => debug!(atom = %other, "Ignoring atom outside the specification"),
        }
    }

    Ok(assemble(&nodes, 0))
}

fn assemble(nodes: &[Node], idx: usize) -> Value {
    let node = &nodes[idx];
    let mut obj = node.attributes.clone();
    for (kind, child) in &node.children {
        let value = assemble(nodes, *child);
        match obj.get_mut(kind) {
            Some(Value::Array(items)) => items.push(value),
            _ => {
                obj.insert(kind.clone(), Value::Array(vec![value]));
            }
        }
    }
    Value::Object(obj)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacetChannel {
    Col,
    Row,
}

impl FacetChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacetChannel::Col => "col",
            FacetChannel::Row => "row",
        }
    }
}

impl std::str::FromStr for FacetChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "col" | "column" => Ok(FacetChannel::Col),
            "row" => Ok(FacetChannel::Row),
            other => Err(format!("unknown facet channel '{other}'")),
        }
    }
}

/// Partial chart specification: schema facts, root view `v0`, one mark `m0`,
/// then any number of fixed encodings and facets.
#[derive(Debug, Clone)]
pub struct PartialSpec {
    facts: Vec<Fact>,
    encodings: usize,
    facets: usize,
}

impl PartialSpec {
    pub const VIEW: &'static str = "v0";
    pub const MARK: &'static str = "m0";

    pub fn new(schema_facts: &[Fact]) -> Self {
        let mut facts = schema_facts.to_vec();
        facts.push(entity("view", ROOT, Self::VIEW));
        facts.push(entity("mark", Self::VIEW, Self::MARK));
        Self {
            facts,
            encodings: 0,
            facets: 0,
        }
    }

    pub fn mark_type(mut self, mark: &str) -> Self {
        self.facts
            .push(attribute(&["mark", "type"], Self::MARK, &symbol(mark)));
        self
    }

    pub fn encode(mut self, field: &str) -> Self {
        let id = format!("e{}", self.encodings);
        self.encodings += 1;
        self.facts.push(entity("encoding", Self::MARK, &id));
        self.facts
            .push(attribute(&["encoding", "field"], &id, &symbol(field)));
        self
    }

    pub fn facet(mut self, channel: FacetChannel) -> Self {
        let id = format!("f{}", self.facets);
        self.facets += 1;
        self.facts.push(entity("facet", Self::VIEW, &id));
        self.facts
            .push(attribute(&["facet", "channel"], &id, channel.as_str()));
        self
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    pub fn into_facts(self) -> Vec<Fact> {
        self.facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constants_and_quoting() {
        assert!(is_constant("temp_max"));
        assert!(!is_constant("Temp"));
        assert!(!is_constant("temp max"));
        assert_eq!(symbol("temp max"), "\"temp max\"");
        assert_eq!(symbol("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn test_dict_to_facts_schema() {
        let facts = dict_to_facts(&json!({
            "number_rows": 100,
            "field": [
                {"name": "temperature", "type": "number", "unique": 100},
                {"name": "weather", "type": "string"}
            ]
        }));
        assert_eq!(
            facts,
            vec![
                "attribute(number_rows,root,100).",
                "entity(field,root,0).",
                "attribute((field,name),0,temperature).",
                "attribute((field,type),0,number).",
                "attribute((field,unique),0,100).",
                "entity(field,root,1).",
                "attribute((field,name),1,weather).",
                "attribute((field,type),1,string).",
            ]
        );
    }

    #[test]
    fn test_dict_to_facts_pinned_ids() {
        let facts = dict_to_facts(&json!({
            "view": [{"__id__": "v0", "mark": [{"type": "point"}]}]
        }));
        assert_eq!(
            facts,
            vec![
                "entity(view,root,v0).",
                "entity(mark,v0,0).",
                "attribute((mark,type),0,point).",
            ]
        );
    }

    #[test]
    fn test_parse_atoms() {
        assert_eq!(
            parse_atom("attribute((encoding,field),e0,temp_max)").unwrap(),
            Term::Function {
                name: "attribute".into(),
                args: vec![
                    Term::Tuple(vec![
                        Term::Symbol("encoding".into()),
                        Term::Symbol("field".into())
                    ]),
                    Term::Symbol("e0".into()),
                    Term::Symbol("temp_max".into()),
                ]
            }
        );
        assert_eq!(
            parse_atom("attribute(number_rows,root,-3).").unwrap().to_string(),
            "attribute(number_rows,root,-3)"
        );
        assert_eq!(
            parse_atom("attribute((field,name),0,\"temp max\")")
                .unwrap()
                .to_string(),
            "attribute((field,name),0,\"temp max\")"
        );
        assert!(matches!(
            parse_atom("entity(view,root"),
            Err(FactError::Parse { .. })
        ));
        assert!(parse_atom("entity(view,root,v0) junk").is_err());
    }

    #[test]
    fn test_answer_set_to_spec() {
        let atoms = [
            "attribute(number_rows,root,1461)",
            "entity(view,root,v0)",
            "attribute((view,coordinates),v0,cartesian)",
            "entity(mark,v0,m0)",
            "attribute((mark,type),m0,point)",
            "entity(encoding,m0,e0)",
            "attribute((encoding,channel),e0,x)",
            "attribute((encoding,field),e0,temp_max)",
            "entity(encoding,m0,e1)",
            "attribute((encoding,channel),e1,y)",
            "attribute((encoding,field),e1,wind)",
            "entity(scale,v0,s0)",
            "attribute((scale,channel),s0,x)",
            "attribute((scale,type),s0,linear)",
            "soft(some_rule,v0)",
        ];
        let spec = answer_set_to_spec(&atoms).unwrap();
        assert_eq!(
            spec,
            json!({
                "number_rows": 1461,
                "view": [{
                    "coordinates": "cartesian",
                    "mark": [{
                        "type": "point",
                        "encoding": [
                            {"channel": "x", "field": "temp_max"},
                            {"channel": "y", "field": "wind"}
                        ]
                    }],
                    "scale": [{"channel": "x", "type": "linear"}]
                }]
            })
        );
    }

    #[test]
    fn test_children_before_parents() {
        let atoms = [
            "attribute((mark,type),m0,bar)",
            "entity(mark,v0,m0)",
            "entity(view,root,v0)",
        ];
        let spec = answer_set_to_spec(&atoms).unwrap();
        assert_eq!(spec["view"][0]["mark"][0]["type"], "bar");
    }

    #[test]
    fn test_dangling_entity() {
        let atoms = ["entity(mark,v9,m0)"];
        assert!(matches!(
            answer_set_to_spec(&atoms),
            Err(FactError::DanglingEntity { .. })
        ));
    }

    #[test]
    fn test_facts_round_trip_structure() {
        let spec = json!({
            "number_rows": 10,
            "field": [{"name": "wind", "type": "number"}],
            "view": [{"coordinates": "cartesian", "mark": [{"type": "tick"}]}]
        });
        let facts = dict_to_facts(&spec);
        let atoms: Vec<&str> = facts.iter().map(|f| f.trim_end_matches('.')).collect();
        assert_eq!(answer_set_to_spec(&atoms).unwrap(), spec);
    }

    #[test]
    fn test_partial_spec() {
        let facts = PartialSpec::new(&["attribute(number_rows,root,3).".to_string()])
            .encode("temp_max")
            .encode("wind")
            .facet(FacetChannel::Col)
            .into_facts();
        assert_eq!(
            facts,
            vec![
                "attribute(number_rows,root,3).",
                "entity(view,root,v0).",
                "entity(mark,v0,m0).",
                "entity(encoding,m0,e0).",
                "attribute((encoding,field),e0,temp_max).",
                "entity(encoding,m0,e1).",
                "attribute((encoding,field),e1,wind).",
                "entity(facet,v0,f0).",
                "attribute((facet,channel),f0,col).",
            ]
        );
    }

    #[test]
    fn test_facet_channel_parse() {
        assert_eq!("column".parse::<FacetChannel>().unwrap(), FacetChannel::Col);
        assert_eq!("ROW".parse::<FacetChannel>().unwrap(), FacetChannel::Row);
        assert!("z".parse::<FacetChannel>().is_err());
    }
}
