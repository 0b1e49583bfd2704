use itertools::Itertools;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::document::Document;
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::validation::{AllowedFeatures, FeatureVersion, Predicate, PredicateCompiler};

const TYPE_NAMES: [&str; 9] = [
    "string", "number", "double", "int", "long", "bool", "object", "array", "null",
];

/// Compiler for the match language used by collection validators.
///
/// Supported: field equality, `$eq $ne $gt $gte $lt $lte $in $nin $exists
/// $type $size $regex $encrypt` on fields and `$and $or` at the top level.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchCompiler;

impl MatchCompiler {
    pub fn new() -> Self {
        MatchCompiler
    }
}

impl PredicateCompiler for MatchCompiler {
    fn compile(
        &self,
        spec: &Document,
        allowed: AllowedFeatures,
        max_version: Option<FeatureVersion>,
    ) -> QuarryResult<Arc<dyn Predicate>> {
        let context = CompileContext {
            allowed,
            max_version,
        };
        let root = context.compile_document(spec.as_map())?;
        Ok(Arc::new(MatchPredicate { root }))
    }
}

struct CompileContext {
    allowed: AllowedFeatures,
    max_version: Option<FeatureVersion>,
}

impl CompileContext {
    fn require_feature(&self, feature: AllowedFeatures, name: &str) -> QuarryResult<()> {
        if self.allowed.contains(feature) {
            Ok(())
        } else {
            Err(invalid(&format!("{} is not allowed in this context", name)))
        }
    }

    fn require_version(&self, version: FeatureVersion, name: &str) -> QuarryResult<()> {
        match self.max_version {
            Some(ceiling) if ceiling < version => Err(invalid(&format!(
                "{} requires feature version {:?} but the ceiling is {:?}",
                name, version, ceiling
            ))),
            _ => Ok(()),
        }
    }

    fn compile_document(&self, spec: &Map<String, Value>) -> QuarryResult<MatchExpr> {
        let mut clauses = Vec::with_capacity(spec.len());
        for (key, value) in spec {
            let clause = match key.strip_prefix('$') {
                Some("and") => MatchExpr::And(self.compile_list(key, value)?),
                Some("or") => MatchExpr::Or(self.compile_list(key, value)?),
                Some(other) => {
                    return Err(invalid(&format!("unknown top level operator: ${}", other)))
                }
                None => MatchExpr::Field {
                    path: key.clone(),
                    op: self.compile_field(value)?,
                    spec: value.clone(),
                },
            };
            clauses.push(clause);
        }

        if clauses.len() == 1 {
            Ok(clauses.remove(0))
        } else {
            Ok(MatchExpr::And(clauses))
        }
    }

    fn compile_list(&self, name: &str, value: &Value) -> QuarryResult<Vec<MatchExpr>> {
        match value {
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => self.compile_document(map),
                    _ => Err(invalid(&format!("{} argument's entries must be objects", name))),
                })
                .collect(),
            _ => Err(invalid(&format!("{} must be a nonempty array", name))),
        }
    }

    fn compile_field(&self, value: &Value) -> QuarryResult<FieldOp> {
        let operators = match value {
            Value::Object(map) if map.keys().any(|key| key.starts_with('$')) => map,
            _ => return Ok(FieldOp::Eq(value.clone())),
        };

        let regex_options = operators.get("$options").and_then(Value::as_str).unwrap_or("");
        let mut ops = Vec::with_capacity(operators.len());
        for (name, argument) in operators {
            let op = match name.as_str() {
                "$eq" => FieldOp::Eq(argument.clone()),
                "$ne" => FieldOp::Ne(argument.clone()),
                "$gt" => FieldOp::Cmp(Comparison::Gt, argument.clone()),
                "$gte" => FieldOp::Cmp(Comparison::Gte, argument.clone()),
                "$lt" => FieldOp::Cmp(Comparison::Lt, argument.clone()),
                "$lte" => FieldOp::Cmp(Comparison::Lte, argument.clone()),
                "$in" => FieldOp::In(array_argument(name, argument)?),
                "$nin" => FieldOp::Nin(array_argument(name, argument)?),
                "$exists" => FieldOp::Exists(truthy(argument)),
                "$type" => FieldOp::Type(type_argument(argument)?),
                "$size" => {
                    self.require_version(FeatureVersion::V2, "$size")?;
                    match argument.as_u64() {
                        Some(size) => FieldOp::Size(size as usize),
                        None => return Err(invalid("$size needs a non-negative integer")),
                    }
                }
                "$regex" => {
                    self.require_feature(AllowedFeatures::REGEX, "$regex")?;
                    let pattern = argument
                        .as_str()
                        .ok_or_else(|| invalid("$regex needs a string"))?;
                    let pattern = if regex_options.contains('i') {
                        format!("(?i){}", pattern)
                    } else {
                        pattern.to_string()
                    };
                    let regex = Regex::new(&pattern)
                        .map_err(|err| invalid(&format!("invalid $regex: {}", err)))?;
                    FieldOp::Regex(regex)
                }
                "$options" => continue,
                "$encrypt" => {
                    self.require_feature(AllowedFeatures::ENCRYPT_KEYWORDS, "$encrypt")?;
                    FieldOp::Encrypt
                }
                other if other.starts_with('$') => {
                    return Err(invalid(&format!("unknown operator: {}", other)))
                }
                other => {
                    return Err(invalid(&format!(
                        "cannot mix operators and field {} in one clause",
                        other
                    )))
                }
            };
            ops.push(op);
        }

        if ops.len() == 1 {
            Ok(ops.remove(0))
        } else {
            Ok(FieldOp::All(ops))
        }
    }
}

#[derive(Debug)]
struct MatchPredicate {
    root: MatchExpr,
}

impl Predicate for MatchPredicate {
    fn matches(&self, doc: &Document) -> QuarryResult<bool> {
        self.root.matches(doc)
    }

    fn explain_failure(&self, doc: &Document) -> Option<Value> {
        let details = self.root.describe_failure(doc)?;
        Some(json!({
            "failingDocumentId": doc.id().cloned().unwrap_or(Value::Null),
            "details": details,
        }))
    }
}

#[derive(Debug)]
enum MatchExpr {
    And(Vec<MatchExpr>),
    Or(Vec<MatchExpr>),
    Field {
        path: String,
        op: FieldOp,
        spec: Value,
    },
}

impl MatchExpr {
    fn matches(&self, doc: &Document) -> QuarryResult<bool> {
        match self {
            MatchExpr::And(children) => {
                for child in children {
                    if !child.matches(doc)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            MatchExpr::Or(children) => {
                for child in children {
                    if child.matches(doc)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            MatchExpr::Field { path, op, .. } => Ok(op.matches(doc.get_path(path))),
        }
    }

    fn describe_failure(&self, doc: &Document) -> Option<Value> {
        if self.matches(doc).unwrap_or(false) {
            return None;
        }
        let description = match self {
            MatchExpr::And(children) => json!({
                "operatorName": "$and",
                "clausesNotSatisfied": children
                    .iter()
                    .filter_map(|child| child.describe_failure(doc))
                    .collect::<Vec<_>>(),
            }),
            MatchExpr::Or(children) => json!({
                "operatorName": "$or",
                "clausesNotSatisfied": children
                    .iter()
                    .filter_map(|child| child.describe_failure(doc))
                    .collect::<Vec<_>>(),
            }),
            MatchExpr::Field { path, op, spec } => json!({
                "operatorName": op.name(),
                "specifiedAs": { path.as_str(): spec },
                "consideredValue": doc.get_path(path).cloned().unwrap_or(Value::Null),
            }),
        };
        Some(description)
    }
}

#[derive(Debug, Clone, Copy)]
enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Gte => ordering != Ordering::Less,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Lte => ordering != Ordering::Greater,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Comparison::Gt => "$gt",
            Comparison::Gte => "$gte",
            Comparison::Lt => "$lt",
            Comparison::Lte => "$lte",
        }
    }
}

#[derive(Debug)]
enum FieldOp {
    Eq(Value),
    Ne(Value),
    Cmp(Comparison, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Type(Vec<String>),
    Size(usize),
    Regex(Regex),
    Encrypt,
    All(Vec<FieldOp>),
}

impl FieldOp {
    fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            FieldOp::Eq(expected) => equals(value, expected),
            FieldOp::Ne(expected) => !equals(value, expected),
            FieldOp::Cmp(comparison, expected) => value
                .map(|value| {
                    any_element(value, |v| {
                        compare(v, expected)
                            .map(|ordering| comparison.accepts(ordering))
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false),
            FieldOp::In(candidates) => candidates.iter().any(|c| equals(value, c)),
            FieldOp::Nin(candidates) => !candidates.iter().any(|c| equals(value, c)),
            FieldOp::Exists(expected) => value.is_some() == *expected,
            FieldOp::Type(names) => value
                .map(|value| names.iter().any(|name| has_type(value, name)))
                .unwrap_or(false),
            FieldOp::Size(size) => matches!(value, Some(Value::Array(items)) if items.len() == *size),
            FieldOp::Regex(regex) => value
                .map(|value| any_element(value, |v| v.as_str().map(|s| regex.is_match(s)).unwrap_or(false)))
                .unwrap_or(false),
            // encrypted payloads are stored as ciphertext strings
            FieldOp::Encrypt => value.map(Value::is_string).unwrap_or(true),
            FieldOp::All(ops) => ops.iter().all(|op| op.matches(value)),
        }
    }

    fn name(&self) -> String {
        match self {
            FieldOp::Eq(_) => "$eq".to_string(),
            FieldOp::Ne(_) => "$ne".to_string(),
            FieldOp::Cmp(comparison, _) => comparison.name().to_string(),
            FieldOp::In(_) => "$in".to_string(),
            FieldOp::Nin(_) => "$nin".to_string(),
            FieldOp::Exists(_) => "$exists".to_string(),
            FieldOp::Type(_) => "$type".to_string(),
            FieldOp::Size(_) => "$size".to_string(),
            FieldOp::Regex(_) => "$regex".to_string(),
            FieldOp::Encrypt => "$encrypt".to_string(),
            FieldOp::All(ops) => ops.iter().map(FieldOp::name).join(","),
        }
    }
}

fn invalid(message: &str) -> QuarryError {
    QuarryError::new(message, ErrorKind::InvalidValidator)
}

fn array_argument(name: &str, argument: &Value) -> QuarryResult<Vec<Value>> {
    argument
        .as_array()
        .cloned()
        .ok_or_else(|| invalid(&format!("{} needs an array", name)))
}

fn type_argument(argument: &Value) -> QuarryResult<Vec<String>> {
    let names: Vec<&str> = match argument {
        Value::String(name) => vec![name.as_str()],
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().ok_or_else(|| invalid("type names must be strings")))
            .collect::<QuarryResult<_>>()?,
        _ => return Err(invalid("type must be a string or an array of strings")),
    };
    for name in &names {
        if !TYPE_NAMES.contains(name) {
            return Err(invalid(&format!("unknown type name alias: {}", name)));
        }
    }
    Ok(names.into_iter().map(str::to_string).collect())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Null => false,
        _ => true,
    }
}

fn has_type(value: &Value, name: &str) -> bool {
    match (name, value) {
        ("string", Value::String(_)) => true,
        ("number", Value::Number(_)) => true,
        ("double", Value::Number(n)) => n.is_f64(),
        ("int" | "long", Value::Number(n)) => n.is_i64() || n.is_u64(),
        ("bool", Value::Bool(_)) => true,
        ("object", Value::Object(_)) => true,
        ("array", Value::Array(_)) => true,
        ("null", Value::Null) => true,
        _ => false,
    }
}

// arrays match when the array itself or any element matches
fn any_element(value: &Value, test: impl Fn(&Value) -> bool) -> bool {
    match value {
        Value::Array(items) => test(value) || items.iter().any(&test),
        _ => test(value),
    }
}

fn equals(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        Some(value) => any_element(value, |v| numeric_equal(v, expected)),
        None => expected.is_null(),
    }
}

fn numeric_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
