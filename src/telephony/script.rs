//! Call-control script compiler.
//!
//! Turns an ordered DTMF sequence into the provider's markup. The structure is
//! fixed: answer pause, one play+pause pair per tone, optional record, trailing
//! pause, hangup. Same input, same bytes.

use std::fmt;

use thiserror::Error;

/// Lets the remote IVR answer and start its greeting.
pub const INITIAL_PAUSE_SECS: u32 = 3;
/// Gap after each tone while the IVR reacts.
pub const INTER_TONE_PAUSE_SECS: u32 = 2;
pub const TRAILING_PAUSE_SECS: u32 = 2;
pub const MAX_RECORDING_SECS: u32 = 120;
/// Relative callback the provider posts transcripts to.
pub const TRANSCRIPTION_CALLBACK_PATH: &str = "/telephony/transcription";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Pause { secs: u32 },
    PlayDigits(String),
    Record {
        max_length_secs: u32,
        transcribe: bool,
        transcribe_callback: String,
    },
    Hangup,
}

/// A compiled script, rendered with [`ScriptDocument::to_xml`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDocument {
    directives: Vec<Directive>,
}

impl ScriptDocument {
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// Render as provider markup.
    pub fn to_xml(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ScriptDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#)?;
        for d in &self.directives {
            match d {
                Directive::Pause { secs } => write!(f, r#"<Pause length="{secs}"/>"#)?,
                Directive::PlayDigits(digits) => {
                    write!(f, r#"<Play digits="{}"/>"#, escape_attr(digits))?
                }
                Directive::Record {
                    max_length_secs,
                    transcribe,
                    transcribe_callback,
                } => write!(
                    f,
                    r#"<Record maxLength="{max_length_secs}" transcribe="{transcribe}" transcribeCallback="{}"/>"#,
                    escape_attr(transcribe_callback)
                )?,
                Directive::Hangup => f.write_str("<Hangup/>")?,
            }
        }
        f.write_str("</Response>")
    }
}

/// Compile a DTMF sequence into a call script.
pub fn compile<S: AsRef<str>>(digits: &[S], recording_enabled: bool) -> ScriptDocument {
    let mut directives = Vec::with_capacity(digits.len() * 2 + 4);
    directives.push(Directive::Pause {
        secs: INITIAL_PAUSE_SECS,
    });

    for digit in digits {
        directives.push(Directive::PlayDigits(digit.as_ref().to_string()));
        directives.push(Directive::Pause {
            secs: INTER_TONE_PAUSE_SECS,
        });
    }

    if recording_enabled {
        directives.push(Directive::Record {
            max_length_secs: MAX_RECORDING_SECS,
            transcribe: true,
            transcribe_callback: TRANSCRIPTION_CALLBACK_PATH.to_string(),
        });
    }

    directives.push(Directive::Pause {
        secs: TRAILING_PAUSE_SECS,
    });
    directives.push(Directive::Hangup);

    ScriptDocument { directives }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("dtmf parameter is not a JSON array: {0}")]
    NotAnArray(String),
    #[error("dtmf entry {index} is neither a string nor a number")]
    BadEntry { index: usize },
}

/// Parse the `dtmf` query parameter: a JSON array of tone symbols. Numeric
/// entries are accepted and rendered as their decimal text.
pub fn parse_dtmf_param(raw: Option<&str>) -> Result<Vec<String>, ScriptError> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(Vec::new()),
        Some(r) => r,
    };

    let values: Vec<serde_json::Value> =
        serde_json::from_str(raw).map_err(|e| ScriptError::NotAnArray(e.to_string()))?;

    values
        .into_iter()
        .enumerate()
        .map(|(index, v)| match v {
            serde_json::Value::String(s) => Ok(s),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            _ => Err(ScriptError::BadEntry { index }),
        })
        .collect()
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
