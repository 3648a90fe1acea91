//! Placeholder substitution for build-step commands.
//!
//! # Syntax
//!
//! - `$NAME` or `${NAME}` expands to the value bound to `NAME`, where a name
//!   is `[A-Za-z_][A-Za-z0-9_]*`
//! - `$$` produces a literal `$` (write `$$ORIGIN` to pass `$ORIGIN` through)
//! - a `$` not followed by a name, `{` or `$` is kept literally
//!
//! Names with no binding are an error rather than being passed through, so a
//! typo in a command never reaches the shell.
//!
//! # Example
//!
//! ```
//! use prereq_schema::{substitute, TemplateVars};
//!
//! let mut vars = TemplateVars::new();
//! vars.insert("PREFIX".to_owned(), "/opt/ofi".to_owned());
//! assert_eq!(
//!     substitute("--prefix=${PREFIX} -Wl,-rpath,$$ORIGIN", &vars).unwrap(),
//!     "--prefix=/opt/ofi -Wl,-rpath,$ORIGIN"
//! );
//! ```

use std::collections::BTreeMap;
use thiserror::Error;

pub type TemplateVars = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder '${0}'")]
    UnknownPlaceholder(String),
    #[error("unclosed placeholder at position {0}")]
    Unclosed(usize),
    #[error("malformed placeholder '${{{0}}}'")]
    Malformed(String),
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lookup<'a>(vars: &'a TemplateVars, name: &str) -> Result<&'a str, TemplateError> {
    vars.get(name)
        .map(String::as_str)
        .ok_or_else(|| TemplateError::UnknownPlaceholder(name.to_owned()))
}

pub fn substitute(input: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        match chars.peek() {
            Some(&(_, '$')) => {
                chars.next();
                out.push('$');
            }
            Some(&(_, '{')) => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(TemplateError::Unclosed(pos));
                }
                let valid = name.chars().next().is_some_and(is_name_start)
                    && name.chars().all(is_name_char);
                if !valid {
                    return Err(TemplateError::Malformed(name));
                }
                out.push_str(lookup(vars, &name)?);
            }
            Some(&(_, c)) if is_name_start(c) => {
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !is_name_char(c) {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                out.push_str(lookup(vars, &name)?);
            }
            _ => out.push('$'),
        }
    }

    Ok(out)
}

/// Substitute every argument of an argv list.
pub fn substitute_all(argv: &[String], vars: &TemplateVars) -> Result<Vec<String>, TemplateError> {
    argv.iter().map(|arg| substitute(arg, vars)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> TemplateVars {
        let mut v = TemplateVars::new();
        v.insert("PREFIX".to_owned(), "/opt/prereq/ofi".to_owned());
        v.insert("JOBS_OPT".to_owned(), "-j8".to_owned());
        v.insert("MERCURY_PREFIX".to_owned(), "/opt/prereq/mercury".to_owned());
        v
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(substitute("make install", &vars()).unwrap(), "make install");
    }

    #[test]
    fn bare_and_braced_names() {
        assert_eq!(
            substitute("--prefix=$PREFIX", &vars()).unwrap(),
            "--prefix=/opt/prereq/ofi"
        );
        assert_eq!(
            substitute("${MERCURY_PREFIX}/lib", &vars()).unwrap(),
            "/opt/prereq/mercury/lib"
        );
    }

    #[test]
    fn name_stops_at_non_identifier() {
        assert_eq!(
            substitute("$PREFIX/include:$JOBS_OPT", &vars()).unwrap(),
            "/opt/prereq/ofi/include:-j8"
        );
    }

    #[test]
    fn double_dollar_is_literal() {
        assert_eq!(
            substitute("-Wl,-rpath=$$ORIGIN/../lib", &vars()).unwrap(),
            "-Wl,-rpath=$ORIGIN/../lib"
        );
    }

    #[test]
    fn lone_dollar_kept() {
        assert_eq!(substitute("cost: 5$ or $1", &vars()).unwrap(), "cost: 5$ or $1");
    }

    #[test]
    fn unknown_placeholder_rejected() {
        let err = substitute("--with-foo=$FOO_PREFIX", &vars()).unwrap_err();
        assert_eq!(err, TemplateError::UnknownPlaceholder("FOO_PREFIX".to_owned()));
    }

    #[test]
    fn unclosed_brace_rejected() {
        let err = substitute("x ${PREFIX", &vars()).unwrap_err();
        assert_eq!(err, TemplateError::Unclosed(2));
    }

    #[test]
    fn malformed_brace_rejected() {
        assert!(matches!(
            substitute("${1abc}", &vars()),
            Err(TemplateError::Malformed(_))
        ));
        assert!(matches!(
            substitute("${}", &vars()),
            Err(TemplateError::Malformed(_))
        ));
    }

    #[test]
    fn substitute_all_stops_at_first_error() {
        let argv = vec!["make".to_owned(), "$JOBS_OPT".to_owned(), "$NOPE".to_owned()];
        assert!(substitute_all(&argv, &vars()).is_err());

        let argv = vec!["make".to_owned(), "$JOBS_OPT".to_owned()];
        assert_eq!(substitute_all(&argv, &vars()).unwrap(), vec!["make", "-j8"]);
    }
}
