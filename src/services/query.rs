//! One-shot subprocess queries that answer with a single JSON document on stdout.

use serde::de::DeserializeOwned;
use thiserror::Error;

use super::toolchain::CommandSpec;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The query ran but did not print the expected JSON. `output` holds
    /// everything it wrote so callers can show it as a diagnostic.
    #[error("Query returned unparsable output ({status}): {output}")]
    Parse {
        status: String,
        output: String,
        #[source]
        source: serde_json::Error,
    },
}

impl QueryError {
    /// Raw text the query produced, if it got that far.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            QueryError::Parse { output, .. } => Some(output),
            QueryError::Spawn { .. } => None,
        }
    }
}

/// Run `command` to completion and decode its stdout as `T`.
///
/// A non-zero exit is only an error when stdout does not parse; some tools
/// print the answer and then exit noisily.
pub fn run_json_query<T: DeserializeOwned>(command: &CommandSpec) -> Result<T, QueryError> {
    log::debug!("Running query: {}", command);
    let output = command
        .to_std_command()
        .output()
        .map_err(|source| QueryError::Spawn {
            program: command.program.display().to_string(),
            source,
        })?;

    serde_json::from_slice::<T>(&output.stdout).map_err(|source| {
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        log::warn!(
            "Query {} produced unparsable output ({}): {}",
            command.program.display(),
            output.status,
            source
        );
        QueryError::Parse {
            status: output.status.to_string(),
            output: text,
            source,
        }
    })
}
