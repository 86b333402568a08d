//! Expression templates used by stage inputs, selectors and contexts.
//!
//! A string of the form `${{ expr }}` is evaluated; any other value is a
//! literal. Expressions are function calls (`$input(foo)`,
//! `$if($gt($input(n), 2), next, '')`), quoted strings, numbers, or bare
//! identifiers, which evaluate to themselves.

mod parser;

pub use parser::{
    as_text, evaluate, evaluate_expression, evaluate_map, evaluate_template, template_body,
    EvaluationContext,
};
