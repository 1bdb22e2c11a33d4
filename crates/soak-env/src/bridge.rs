//! Variable bridge: bind values into an environment, evaluate scripts in it,
//! and read values back out.

use tracing::debug;

use crate::environment::Environment;
use crate::error::{BridgeError, BridgeResult};
use crate::script::{ScriptArgs, ScriptContext, ScriptRef};
use crate::value::{Origin, ResultHandle, Value};

/// Bind `value` under `name` in `env`, replacing any earlier binding.
///
/// Reference values must originate outside every environment or inside
/// `env` itself; anything else is rejected with
/// [`BridgeError::ForeignReference`].
pub fn set_variable(env: &Environment, name: &str, value: impl Into<Value>) -> BridgeResult<()> {
    env.ensure_live()?;
    validate_name(name)?;
    let value = value.into();

    if let Some(Origin::Environment(owner)) = value.origin() {
        if owner != env.id() {
            return Err(BridgeError::ForeignReference {
                tag: env.tag().to_string(),
                name: name.to_string(),
                owner,
            });
        }
    }

    debug!(version = %env.tag(), name, kind = value.kind(), "variable bound");
    env.bind(name, value);
    Ok(())
}

/// Read a binding.
pub fn get_variable(env: &Environment, name: &str) -> BridgeResult<Value> {
    env.ensure_live()?;
    env.binding(name).ok_or_else(|| BridgeError::VariableNotFound {
        tag: env.tag().to_string(),
        name: name.to_string(),
    })
}

/// Run `script` inside `env` with positional string arguments.
pub fn evaluate<S: AsRef<str>>(
    env: &Environment,
    script: &ScriptRef,
    args: &[S],
) -> BridgeResult<ResultHandle> {
    env.ensure_live()?;
    let resolved = env
        .resolve_script(script)
        .ok_or_else(|| BridgeError::ScriptNotFound {
            tag: env.tag().to_string(),
            script: script.to_string(),
        })?;

    let args = ScriptArgs::new(args.iter().map(|a| a.as_ref().to_string()).collect());
    debug!(version = %env.tag(), script = %script, args = ?args.as_slice(), "evaluating script");

    let mut ctx = ScriptContext::new(env, script);
    resolved
        .run(&mut ctx, &args)
        .map_err(|source| BridgeError::Script {
            tag: env.tag().to_string(),
            script: script.to_string(),
            source,
        })
}

/// Run an ad hoc statement in `env`.
///
/// Supported statements are `return <name>` and `<name>`, with an optional
/// trailing `;`. The named binding must be a counter or void.
pub fn execute(env: &Environment, statement: &str) -> BridgeResult<ResultHandle> {
    env.ensure_live()?;
    let Statement::Lookup(name) = Statement::parse(statement)?;
    match get_variable(env, &name)? {
        Value::Counter(counter) => Ok(ResultHandle::Counter(counter)),
        Value::Void => Ok(ResultHandle::Void),
        other => Err(BridgeError::UnexpectedType {
            tag: env.tag().to_string(),
            name,
            expected: "counter",
            found: other.kind(),
        }),
    }
}

/// Current value behind a handle.
pub fn get(handle: &ResultHandle) -> Option<i64> {
    handle.get()
}

/// A parsed ad hoc statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Lookup(String),
}

impl Statement {
    pub fn parse(raw: &str) -> BridgeResult<Self> {
        let invalid = |reason: &str| BridgeError::InvalidStatement {
            statement: raw.to_string(),
            reason: reason.to_string(),
        };

        let body = raw.trim();
        let body = body.strip_suffix(';').unwrap_or(body).trim();
        let name = match body.strip_prefix("return") {
            Some(rest) if rest.starts_with(char::is_whitespace) => rest.trim(),
            Some("") => return Err(invalid("return needs a variable name")),
            _ => body,
        };

        if name.is_empty() {
            return Err(invalid("empty statement"));
        }
        if !is_identifier(name) {
            return Err(invalid("only variable lookups are supported"));
        }
        Ok(Statement::Lookup(name.to_string()))
    }
}

fn validate_name(name: &str) -> BridgeResult<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(BridgeError::InvalidName(name.to_string()))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_return_statement() {
        assert_eq!(
            Statement::parse("return errorsProducer").unwrap(),
            Statement::Lookup("errorsProducer".into())
        );
        assert_eq!(
            Statement::parse("  errorsConsumer; ").unwrap(),
            Statement::Lookup("errorsConsumer".into())
        );
        assert_eq!(
            Statement::parse("returnValue").unwrap(),
            Statement::Lookup("returnValue".into())
        );
    }

    #[test]
    fn test_parse_rejects_expressions() {
        assert!(Statement::parse("").is_err());
        assert!(Statement::parse("return").is_err());
        assert!(Statement::parse("return a + b").is_err());
        assert!(Statement::parse("counter.get()").is_err());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("reusableLatch"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }
}
