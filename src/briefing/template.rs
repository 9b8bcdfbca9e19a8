//! Template engine for briefing and command rendering.
//!
//! Performs `{variable}` substitution in strings. `{{` and `}}` render as
//! literal braces. The engine is fail-safe: an undefined variable is an
//! error rather than a silent empty substitution, so typos in command
//! templates surface immediately.

use std::collections::HashMap;
use std::fmt;

/// Error type for template rendering failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// A variable was referenced but not provided.
    UndefinedVariable {
        /// Name of the undefined variable.
        name: String,
        /// Byte position of the opening brace.
        position: usize,
    },
    /// A `{` was found without a matching `}`.
    UnmatchedBrace {
        /// Byte position of the unmatched `{`.
        position: usize,
    },
    /// An empty variable name was found (`{}`).
    EmptyVariableName {
        /// Byte position of the empty variable.
        position: usize,
    },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::UndefinedVariable { name, position } => write!(
                f,
                "undefined variable '{}' at position {} in template",
                name, position
            ),
            TemplateError::UnmatchedBrace { position } => {
                write!(f, "unmatched '{{' at position {} in template", position)
            }
            TemplateError::EmptyVariableName { position } => {
                write!(f, "empty variable name at position {} in template", position)
            }
        }
    }
}

impl std::error::Error for TemplateError {}

/// Render a template, substituting `{name}` with values from `variables`.
pub fn render_template(
    template: &str,
    variables: &HashMap<String, String>,
) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                output.push('{');
                i += 2;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                output.push('}');
                i += 2;
            }
            b'{' => {
                let start = i;
                let close = template[i + 1..]
                    .find('}')
                    .map(|offset| i + 1 + offset)
                    .ok_or(TemplateError::UnmatchedBrace { position: start })?;
                let name = &template[i + 1..close];
                if name.is_empty() {
                    return Err(TemplateError::EmptyVariableName { position: start });
                }
                let value =
                    variables
                        .get(name)
                        .ok_or_else(|| TemplateError::UndefinedVariable {
                            name: name.to_string(),
                            position: start,
                        })?;
                output.push_str(value);
                i = close + 1;
            }
            _ => {
                // Advance one full UTF-8 character.
                let ch_len = template[i..]
                    .chars()
                    .next()
                    .map(char::len_utf8)
                    .unwrap_or(1);
                output.push_str(&template[i..i + ch_len]);
                i += ch_len;
            }
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_basic_substitution() {
        let result =
            render_template("run {agent} in {worktree}", &vars(&[("agent", "qa"), ("worktree", "/tmp/wt")]));
        assert_eq!(result.unwrap(), "run qa in /tmp/wt");
    }

    #[test]
    fn test_no_variables() {
        assert_eq!(render_template("plain text", &vars(&[])).unwrap(), "plain text");
    }

    #[test]
    fn test_escaped_braces() {
        let result = render_template("literal {{braces}} and {v}", &vars(&[("v", "x")]));
        assert_eq!(result.unwrap(), "literal {braces} and x");
    }

    #[test]
    fn test_undefined_variable_errors() {
        let err = render_template("{missing}", &vars(&[])).unwrap_err();
        assert_eq!(
            err,
            TemplateError::UndefinedVariable {
                name: "missing".to_string(),
                position: 0
            }
        );
    }

    #[test]
    fn test_unmatched_brace_errors() {
        let err = render_template("open { brace", &vars(&[])).unwrap_err();
        assert!(matches!(err, TemplateError::UnmatchedBrace { position: 5 }));
    }

    #[test]
    fn test_empty_variable_name_errors() {
        let err = render_template("empty {}", &vars(&[])).unwrap_err();
        assert!(matches!(err, TemplateError::EmptyVariableName { .. }));
    }

    #[test]
    fn test_repeated_variable() {
        let result = render_template("{x} and {x}", &vars(&[("x", "twice")]));
        assert_eq!(result.unwrap(), "twice and twice");
    }

    #[test]
    fn test_multibyte_text_passthrough() {
        let result = render_template("naïve café {v} ✓", &vars(&[("v", "ok")]));
        assert_eq!(result.unwrap(), "naïve café ok ✓");
    }
}
