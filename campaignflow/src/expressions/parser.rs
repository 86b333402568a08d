//! Scanner, parser and evaluator for `${{ ... }}` templates.

use crate::core::{StageOutputs, ValueMap};
use crate::errors::ExpressionError;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static TEMPLATE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*\$\{\{(.*)\}\}\s*$").ok());

type EvalResult = Result<Value, ExpressionError>;

/// The data an expression can read.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// Inputs visible to `$input()`.
    pub inputs: &'a ValueMap,
    /// Per-stage outputs visible to `$output()`.
    pub outputs: &'a StageOutputs,
}

impl<'a> EvaluationContext<'a> {
    /// Creates a context over inputs and outputs.
    #[must_use]
    pub fn new(inputs: &'a ValueMap, outputs: &'a StageOutputs) -> Self {
        Self { inputs, outputs }
    }
}

/// Returns the inner expression if `text` is a `${{ ... }}` template.
#[must_use]
pub fn template_body(text: &str) -> Option<&str> {
    TEMPLATE
        .as_ref()?
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Evaluates a value that may hold templates.
///
/// Strings that are not templates, numbers, booleans and null are returned
/// as they are. Arrays and objects are evaluated element by element.
pub fn evaluate_template(value: &Value, ctx: &EvaluationContext<'_>) -> EvalResult {
    match value {
        Value::String(text) => match template_body(text) {
            Some(body) => evaluate(body, ctx),
            None => Ok(value.clone()),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate_template(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(fields) => fields
            .iter()
            .map(|(k, v)| evaluate_template(v, ctx).map(|v| (k.clone(), v)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        _ => Ok(value.clone()),
    }
}

/// Evaluates every value of a map.
pub fn evaluate_map(
    map: &ValueMap,
    ctx: &EvaluationContext<'_>,
) -> Result<ValueMap, ExpressionError> {
    map.iter()
        .map(|(k, v)| evaluate_template(v, ctx).map(|v| (k.clone(), v)))
        .collect()
}

/// Evaluates a bare expression (without the `${{ }}` wrapper).
pub fn evaluate(expression: &str, ctx: &EvaluationContext<'_>) -> EvalResult {
    let tokens = scan(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.expression()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(ExpressionError::UnexpectedToken(extra.to_string()));
    }
    node.eval(ctx)
}

/// Evaluates a selector-style expression.
///
/// The `${{ }}` wrapper is optional here. Unwrapped text that does not
/// parse as an expression is taken literally, so `next-stage` and
/// `${{ next-stage }}` both yield `"next-stage"`.
pub fn evaluate_expression(text: &str, ctx: &EvaluationContext<'_>) -> EvalResult {
    if let Some(body) = template_body(text) {
        return evaluate(body, ctx);
    }
    match evaluate(text, ctx) {
        Err(ExpressionError::UnexpectedToken(_) | ExpressionError::UnexpectedEnd) => {
            Ok(Value::String(text.trim().to_string()))
        }
        other => other,
    }
}

/// Formats a value the way comparisons see it.
#[must_use]
pub fn as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Dollar,
    OpenParen,
    CloseParen,
    Comma,
    Str(String),
    Number(Value),
    Ident(String),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dollar => f.write_str("$"),
            Self::OpenParen => f.write_str("("),
            Self::CloseParen => f.write_str(")"),
            Self::Comma => f.write_str(","),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Ident(s) => f.write_str(s),
        }
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '$' | '(' | ')' | ',' | '\'' | '"')
}

fn parse_number(text: &str) -> Option<Value> {
    let first = text.chars().next()?;
    if !(first.is_ascii_digit() || first == '-' || first == '.') {
        return None;
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::from(n));
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

fn scan(text: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '$' => tokens.push(Token::Dollar),
            '(' => tokens.push(Token::OpenParen),
            ')' => tokens.push(Token::CloseParen),
            ',' => tokens.push(Token::Comma),
            '\'' | '"' => {
                let mut literal = String::new();
                let mut closed = false;
                for (_, next) in chars.by_ref() {
                    if next == c {
                        closed = true;
                        break;
                    }
                    literal.push(next);
                }
                if !closed {
                    return Err(ExpressionError::UnexpectedEnd);
                }
                tokens.push(Token::Str(literal));
            }
            _ => {
                let mut end = start + c.len_utf8();
                while let Some(&(idx, next)) = chars.peek() {
                    if is_delimiter(next) {
                        break;
                    }
                    end = idx + next.len_utf8();
                    chars.next();
                }
                let word = &text[start..end];
                tokens.push(
                    parse_number(word).map_or_else(|| Token::Ident(word.to_string()), Token::Number),
                );
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Node {
    Literal(Value),
    Call { name: String, args: Vec<Node> },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expression(&mut self) -> Result<Node, ExpressionError> {
        match self.next() {
            Some(Token::Dollar) => self.call(),
            Some(Token::Str(s)) => Ok(Node::Literal(Value::String(s))),
            Some(Token::Number(n)) => Ok(Node::Literal(n)),
            Some(Token::Ident(s)) => Ok(Node::Literal(Value::String(s))),
            Some(other) => Err(ExpressionError::UnexpectedToken(other.to_string())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn call(&mut self) -> Result<Node, ExpressionError> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(other) => return Err(ExpressionError::UnexpectedToken(other.to_string())),
            None => return Err(ExpressionError::UnexpectedEnd),
        };
        match self.next() {
            Some(Token::OpenParen) => {}
            Some(other) => return Err(ExpressionError::UnexpectedToken(other.to_string())),
            None => return Err(ExpressionError::UnexpectedEnd),
        }

        let mut args = Vec::new();
        if self.peek() == Some(&Token::CloseParen) {
            self.pos += 1;
            return Ok(Node::Call { name, args });
        }
        loop {
            args.push(self.expression()?);
            match self.next() {
                Some(Token::Comma) => {}
                Some(Token::CloseParen) => break,
                Some(other) => return Err(ExpressionError::UnexpectedToken(other.to_string())),
                None => return Err(ExpressionError::UnexpectedEnd),
            }
        }
        Ok(Node::Call { name, args })
    }
}

fn arity(name: &str, expected: usize, args: &[Node]) -> Result<(), ExpressionError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ExpressionError::Arity {
            name: name.to_string(),
            expected: expected.to_string(),
            found: args.len(),
        })
    }
}

fn to_number(value: &Value) -> Result<f64, ExpressionError> {
    if let Some(n) = value.as_f64() {
        return Ok(n);
    }
    let text = as_text(value);
    text.trim()
        .parse::<f64>()
        .map_err(|_| ExpressionError::NotANumber(text))
}

fn to_bool(value: &Value) -> Result<bool, ExpressionError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.as_str() {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
            _ => Err(ExpressionError::NotABool(s.clone())),
        },
        other => Err(ExpressionError::NotABool(as_text(other))),
    }
}

impl Node {
    fn eval(&self, ctx: &EvaluationContext<'_>) -> EvalResult {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Call { name, args } => call_function(name, args, ctx),
        }
    }
}

fn numeric(
    name: &str,
    args: &[Node],
    ctx: &EvaluationContext<'_>,
    cmp: fn(f64, f64) -> bool,
) -> EvalResult {
    arity(name, 2, args)?;
    let left = to_number(&args[0].eval(ctx)?)?;
    let right = to_number(&args[1].eval(ctx)?)?;
    Ok(Value::Bool(cmp(left, right)))
}

fn call_function(name: &str, args: &[Node], ctx: &EvaluationContext<'_>) -> EvalResult {
    match name {
        "input" => {
            arity(name, 1, args)?;
            if ctx.inputs.is_empty() {
                return Err(ExpressionError::Lookup(
                    "an input collection is needed to evaluate $input()".to_string(),
                ));
            }
            let key = as_text(&args[0].eval(ctx)?);
            ctx.inputs
                .get(&key)
                .cloned()
                .ok_or_else(|| ExpressionError::Lookup(format!("input {key} is not found")))
        }
        "output" => {
            arity(name, 2, args)?;
            if ctx.outputs.is_empty() {
                return Ok(Value::String(String::new()));
            }
            let stage = as_text(&args[0].eval(ctx)?);
            let key = as_text(&args[1].eval(ctx)?);
            let outputs = ctx.outputs.get(&stage).ok_or_else(|| {
                ExpressionError::Lookup(format!("stage {stage} is not found in output collection"))
            })?;
            outputs.get(&key).cloned().ok_or_else(|| {
                ExpressionError::Lookup(format!("output {key} is not found on stage {stage}"))
            })
        }
        "equal" => {
            arity(name, 2, args)?;
            let left = as_text(&args[0].eval(ctx)?);
            let right = as_text(&args[1].eval(ctx)?);
            Ok(Value::Bool(left == right))
        }
        "and" | "or" => {
            arity(name, 2, args)?;
            let left = to_bool(&args[0].eval(ctx)?)?;
            let right = to_bool(&args[1].eval(ctx)?)?;
            Ok(Value::Bool(if name == "and" {
                left && right
            } else {
                left || right
            }))
        }
        "not" => {
            arity(name, 1, args)?;
            Ok(Value::Bool(!to_bool(&args[0].eval(ctx)?)?))
        }
        "gt" => numeric(name, args, ctx, |a, b| a > b),
        "ge" => numeric(name, args, ctx, |a, b| a >= b),
        "lt" => numeric(name, args, ctx, |a, b| a < b),
        "le" => numeric(name, args, ctx, |a, b| a <= b),
        "between" => {
            arity(name, 3, args)?;
            let value = to_number(&args[0].eval(ctx)?)?;
            let low = to_number(&args[1].eval(ctx)?)?;
            let high = to_number(&args[2].eval(ctx)?)?;
            Ok(Value::Bool(value >= low && value <= high))
        }
        "if" => {
            arity(name, 3, args)?;
            let condition = as_text(&args[0].eval(ctx)?);
            if condition == "true" {
                args[1].eval(ctx)
            } else {
                args[2].eval(ctx)
            }
        }
        "in" => {
            if args.len() < 2 {
                return Err(ExpressionError::Arity {
                    name: name.to_string(),
                    expected: "at least 2".to_string(),
                    found: args.len(),
                });
            }
            let needle = as_text(&args[0].eval(ctx)?);
            for candidate in &args[1..] {
                if as_text(&candidate.eval(ctx)?) == needle {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        other => Err(ExpressionError::UnknownFunction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn inputs() -> ValueMap {
        let mut map = ValueMap::new();
        map.insert("foo".to_string(), json!(3));
        map.insert("name".to_string(), json!("alpha"));
        map.insert("flag".to_string(), json!(true));
        map
    }

    fn outputs() -> StageOutputs {
        let mut stage = ValueMap::new();
        stage.insert("status".to_string(), json!(200));
        let mut outputs = StageOutputs::new();
        outputs.insert("deploy".to_string(), stage);
        outputs
    }

    fn eval(expr: &str) -> EvalResult {
        let inputs = inputs();
        let outputs = outputs();
        evaluate(expr, &EvaluationContext::new(&inputs, &outputs))
    }

    #[test]
    fn test_template_detection() {
        assert_eq!(template_body("${{ $input(foo) }}"), Some(" $input(foo) "));
        assert_eq!(template_body("  ${{x}}  "), Some("x"));
        assert_eq!(template_body("plain"), None);
        assert_eq!(template_body("prefix ${{x}}"), None);
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("stage-b").unwrap(), json!("stage-b"));
        assert_eq!(eval("'quoted value'").unwrap(), json!("quoted value"));
        assert_eq!(eval("''").unwrap(), json!(""));
        assert_eq!(eval("42").unwrap(), json!(42));
        assert_eq!(eval("1.5").unwrap(), json!(1.5));
    }

    #[test]
    fn test_input_and_output_lookup() {
        assert_eq!(eval("$input(foo)").unwrap(), json!(3));
        assert_eq!(eval("$output(deploy, status)").unwrap(), json!(200));
        assert!(matches!(
            eval("$input(missing)"),
            Err(ExpressionError::Lookup(_))
        ));
        assert!(matches!(
            eval("$output(unknown, status)"),
            Err(ExpressionError::Lookup(_))
        ));
    }

    #[test]
    fn test_output_on_empty_collection_is_blank() {
        let inputs = ValueMap::new();
        let outputs = StageOutputs::new();
        let ctx = EvaluationContext::new(&inputs, &outputs);
        assert_eq!(evaluate("$output(a, b)", &ctx).unwrap(), json!(""));
    }

    #[test]
    fn test_input_on_empty_collection_errors() {
        let inputs = ValueMap::new();
        let outputs = StageOutputs::new();
        let ctx = EvaluationContext::new(&inputs, &outputs);
        assert!(evaluate("$input(a)", &ctx).is_err());
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("$gt($input(foo), 2)").unwrap(), json!(true));
        assert_eq!(eval("$le($input(foo), 2)").unwrap(), json!(false));
        assert_eq!(eval("$between($input(foo), 1, 3)").unwrap(), json!(true));
        assert_eq!(eval("$equal($input(name), alpha)").unwrap(), json!(true));
        assert_eq!(eval("$in($input(name), beta, alpha)").unwrap(), json!(true));
        assert_eq!(eval("$in(gamma, beta, alpha)").unwrap(), json!(false));
    }

    #[test]
    fn test_boolean_operators() {
        assert_eq!(eval("$and($input(flag), true)").unwrap(), json!(true));
        assert_eq!(eval("$or(false, F)").unwrap(), json!(false));
        assert_eq!(eval("$not($input(flag))").unwrap(), json!(false));
        assert_eq!(
            eval("$and(maybe, true)"),
            Err(ExpressionError::NotABool("maybe".to_string()))
        );
    }

    #[test]
    fn test_if_selects_branch() {
        assert_eq!(
            eval("$if($gt($input(foo), 2), next, '')").unwrap(),
            json!("next")
        );
        assert_eq!(
            eval("$if($lt($input(foo), 2), next, '')").unwrap(),
            json!("")
        );
    }

    #[test]
    fn test_if_does_not_evaluate_other_branch() {
        assert_eq!(
            eval("$if(true, ok, $input(missing))").unwrap(),
            json!("ok")
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            eval("$gt(1)"),
            Err(ExpressionError::Arity {
                name: "gt".to_string(),
                expected: "2".to_string(),
                found: 1,
            })
        );
        assert_eq!(
            eval("$nope(1)"),
            Err(ExpressionError::UnknownFunction("nope".to_string()))
        );
        assert_eq!(
            eval("$gt(abc, 1)"),
            Err(ExpressionError::NotANumber("abc".to_string()))
        );
        assert_eq!(eval("$input(foo"), Err(ExpressionError::UnexpectedEnd));
        assert!(matches!(
            eval("a b"),
            Err(ExpressionError::UnexpectedToken(_))
        ));
    }

    #[test]
    fn test_evaluate_template_passes_literals_through() {
        let inputs = inputs();
        let outputs = outputs();
        let ctx = EvaluationContext::new(&inputs, &outputs);

        assert_eq!(
            evaluate_template(&json!("no template here"), &ctx).unwrap(),
            json!("no template here")
        );
        assert_eq!(evaluate_template(&json!(7), &ctx).unwrap(), json!(7));
        assert_eq!(
            evaluate_template(&json!(["${{ $input(name) }}", "x"]), &ctx).unwrap(),
            json!(["alpha", "x"])
        );
    }

    #[test]
    fn test_evaluate_expression_without_wrapper() {
        let inputs = inputs();
        let outputs = outputs();
        let ctx = EvaluationContext::new(&inputs, &outputs);

        assert_eq!(evaluate_expression("stage-b", &ctx).unwrap(), json!("stage-b"));
        assert_eq!(
            evaluate_expression("$if($gt($input(foo), 1), b, '')", &ctx).unwrap(),
            json!("b")
        );
        assert_eq!(
            evaluate_expression("${{ $input(name) }}", &ctx).unwrap(),
            json!("alpha")
        );
        assert_eq!(evaluate_expression("two words", &ctx).unwrap(), json!("two words"));
        assert!(evaluate_expression("$input(missing)", &ctx).is_err());
    }

    #[test]
    fn test_evaluate_map() {
        let inputs = inputs();
        let outputs = outputs();
        let ctx = EvaluationContext::new(&inputs, &outputs);
        let mut map = ValueMap::new();
        map.insert("next".to_string(), json!("${{ $input(foo) }}"));
        map.insert("fixed".to_string(), json!("value"));

        let evaluated = evaluate_map(&map, &ctx).unwrap();
        assert_eq!(evaluated["next"], json!(3));
        assert_eq!(evaluated["fixed"], json!("value"));
    }
}
