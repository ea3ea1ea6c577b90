//! Assembly of the full script text sent to the interpreter.
//!
//! Layout:
//!
//! 1. `joinList` helper;
//! 2. `runBody` handler holding the caller's body inside `with timeout` and
//!    `tell application`;
//! 3. a top-level `try` with the optional wake stanza, one assignment per
//!    parameter and the call into `runBody`;
//! 4. the result-encoding wrapper for the payload kind;
//! 5. the error trap printing an `ERR` envelope.
//!
//! Output is a pure function of the request.

use std::fmt::Write as _;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};

use super::marshal::quote_string;
use super::MarshalledParam;
use crate::protocol::{codes, ActionCode, PayloadKind};

// `delimiter` would collide with `text item delimiters`.
const JOIN_LIST_HELPER: &str = "\
on joinList(theList, theSeparator)
\tset savedDelimiters to AppleScript's text item delimiters
\tset AppleScript's text item delimiters to theSeparator
\tset joinedText to theList as text
\tset AppleScript's text item delimiters to savedDelimiters
\treturn joinedText
end joinList
";

/// Everything needed to assemble one script.
#[derive(Debug, Clone)]
pub struct AssembleRequest<'a> {
    /// Application addressed by `tell application`.
    pub target: &'a str,
    /// Payload kind, selecting the result wrapper.
    pub kind: PayloadKind,
    /// Caller's script body with `${name}` placeholders.
    pub body: &'a str,
    /// Marshalled parameters, already sorted by name.
    pub params: &'a [MarshalledParam],
    /// Inner `with timeout` duration, rounded up to whole seconds.
    pub script_timeout: Duration,
    /// Launch the target and pause this long before running the body.
    pub wake_delay: Option<Duration>,
}

/// Literal for `tell application`. A name holding `"` quotes as a
/// concatenation, which must be parenthesized to read as one expression.
fn application_expr(name: &str) -> String {
    let literal = quote_string(name);
    if name.contains('"') {
        format!("({literal})")
    } else {
        literal
    }
}

/// Assemble the script text for `request`.
pub fn assemble(request: &AssembleRequest<'_>) -> String {
    let mut script = String::with_capacity(request.body.len() + 2048);
    let target = application_expr(request.target);
    let var_names: Vec<&str> = request.params.iter().map(|p| p.var_name.as_str()).collect();
    let arg_list = var_names.join(", ");

    script.push_str(JOIN_LIST_HELPER);
    script.push('\n');

    let _ = writeln!(script, "on runBody({arg_list})");
    let _ = writeln!(
        script,
        "\twith timeout of {} seconds",
        timeout_secs(request.script_timeout)
    );
    let _ = writeln!(script, "\t\ttell application {target}");
    script.push_str(&substitute_placeholders(request.body, request.params));
    if !request.body.ends_with('\n') {
        script.push('\n');
    }
    script.push_str("\t\tend tell\n\tend timeout\nend runBody\n\n");

    script.push_str("set groupSep to character id 29\n");
    script.push_str("set recordSep to character id 30\n");
    script.push_str("set unitSep to character id 31\n");
    script.push_str("try\n");
    if let Some(delay) = request.wake_delay {
        let _ = writeln!(script, "\ttell application {target} to launch");
        let _ = writeln!(script, "\tdelay {}", delay.as_secs_f64());
    }
    for param in request.params {
        let _ = writeln!(script, "\tset {} to {}", param.var_name, param.literal);
    }
    let _ = writeln!(script, "\tset scriptResult to runBody({arg_list})");
    script.push_str(&result_wrapper(request.kind));
    script.push_str("on error errMsg number errNum\n");
    let _ = writeln!(
        script,
        "\tif errNum is {} then set errNum to {}",
        codes::APPLESCRIPT_TIMEOUT,
        codes::TIMEOUT
    );
    let _ = writeln!(
        script,
        "\tif errNum is {} then set errNum to {}",
        codes::APPLESCRIPT_NO_RESULT,
        codes::MISSING_RETURN
    );
    script.push_str(
        "\treturn \"ERR\" & groupSep & (errNum as text) & groupSep & errMsg\nend try\n",
    );
    script
}

fn timeout_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    secs.max(1)
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"))
}

/// Replace every `${name}` whose name is a parameter with its variable.
/// Unknown placeholders are left as they are.
pub fn substitute_placeholders(body: &str, params: &[MarshalledParam]) -> String {
    placeholder_pattern()
        .replace_all(body, |caps: &Captures<'_>| {
            let name = &caps[1];
            match params.iter().find(|p| p.source == name) {
                Some(param) => param.var_name.clone(),
                None => {
                    tracing::debug!(placeholder = name, "unknown placeholder left in script body");
                    caps[0].to_string()
                },
            }
        })
        .into_owned()
}

fn missing_return_guard() -> String {
    format!(
        "\tif scriptResult is missing value then error \"{}\" number {}\n",
        codes::canonical_message(codes::MISSING_RETURN).unwrap_or_default(),
        codes::MISSING_RETURN
    )
}

fn result_wrapper(kind: PayloadKind) -> String {
    let mut out = missing_return_guard();
    match kind {
        PayloadKind::Scalar => {
            let _ = write!(
                out,
                "\ttry\n\
                 \t\tset resultText to scriptResult as text\n\
                 \ton error\n\
                 \t\terror \"{}\" number {}\n\
                 \tend try\n\
                 \treturn \"OK\" & groupSep & resultText\n",
                codes::canonical_message(codes::INVALID_SCALAR_TYPE).unwrap_or_default(),
                codes::INVALID_SCALAR_TYPE
            );
        },
        PayloadKind::Action => {
            let allowed = ActionCode::ALL
                .iter()
                .map(|c| format!("\"{}\"", c.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = write!(
                out,
                "\ttry\n\
                 \t\tset resultText to scriptResult as text\n\
                 \ton error\n\
                 \t\terror \"\" number {code}\n\
                 \tend try\n\
                 \tif {{{allowed}}} does not contain resultText then error resultText number {code}\n\
                 \treturn \"OK\" & groupSep & resultText\n",
                code = codes::INVALID_ACTION_CODE
            );
        },
        PayloadKind::Rows => {
            let _ = write!(
                out,
                "\tif class of scriptResult is not list then error \"{}\" number {}\n\
                 \tset encodedRows to {{}}\n\
                 \trepeat with rowRef in scriptResult\n\
                 \t\tset theRow to contents of rowRef\n\
                 \t\tif class of theRow is list then\n\
                 \t\t\tset end of encodedRows to my joinList(theRow, unitSep)\n\
                 \t\telse\n\
                 \t\t\tset end of encodedRows to theRow as text\n\
                 \t\tend if\n\
                 \tend repeat\n\
                 \treturn \"OK\" & groupSep & my joinList(encodedRows, recordSep)\n",
                codes::canonical_message(codes::INVALID_ROW_TYPE).unwrap_or_default(),
                codes::INVALID_ROW_TYPE
            );
        },
        PayloadKind::Sections => {
            let _ = write!(
                out,
                "\tif class of scriptResult is not list then error \"{msg}\" number {code}\n\
                 \tset encodedSections to {{}}\n\
                 \trepeat with sectionRef in scriptResult\n\
                 \t\tset theSection to contents of sectionRef\n\
                 \t\tif class of theSection is not list or (count of theSection) is 0 then error \"{msg}\" number {code}\n\
                 \t\tset sectionFields to {{item 1 of theSection as text}}\n\
                 \t\trepeat with itemRef in rest of theSection\n\
                 \t\t\tset theItem to contents of itemRef\n\
                 \t\t\tif class of theItem is list then\n\
                 \t\t\t\trepeat with nestedRef in theItem\n\
                 \t\t\t\t\tset end of sectionFields to (contents of nestedRef) as text\n\
                 \t\t\t\tend repeat\n\
                 \t\t\telse\n\
                 \t\t\t\tset end of sectionFields to theItem as text\n\
                 \t\t\tend if\n\
                 \t\tend repeat\n\
                 \t\tset end of encodedSections to my joinList(sectionFields, unitSep)\n\
                 \tend repeat\n\
                 \treturn \"OK\" & groupSep & my joinList(encodedSections, groupSep)\n",
                msg = codes::canonical_message(codes::INVALID_SECTION_TYPE).unwrap_or_default(),
                code = codes::INVALID_SECTION_TYPE
            );
        },
    }
    out
}
