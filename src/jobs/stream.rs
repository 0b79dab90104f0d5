//! Line splitting and progress detection for a job's output.
//!
//! Chunks arrive in whatever pieces the pipes hand out. Bytes are held per
//! source until a newline completes the line, so a progress marker split
//! across reads is still recognised and stdout/stderr fragments never merge
//! into one line.

use super::types::ProgressSignal;

pub const PROGRESS_MARKER: &str = "PROGRESS";

/// Longest partial line held per source. Past this the fragment is passed
/// on as unterminated log text and buffering starts over.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Progress(ProgressSignal),
    Log(LogLine),
}

impl OutputLine {
    pub fn as_log(&self) -> Option<&LogLine> {
        match self {
            OutputLine::Log(line) => Some(line),
            OutputLine::Progress(_) => None,
        }
    }
}

/// A non-progress line, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    /// False for a trailing fragment flushed when the stream ended.
    pub terminated: bool,
}

impl LogLine {
    /// Append to an accumulated log, restoring the newline if the line had one.
    pub fn append_to(&self, log: &mut String) {
        log.push_str(&self.text);
        if self.terminated {
            log.push('\n');
        }
    }
}

/// Parse `PROGRESS <fraction> [<remaining>]`.
///
/// Returns `None` for anything else, including a marker followed by
/// non-numeric, non-finite or out-of-range fields, or by extra fields.
pub fn parse_progress(line: &str) -> Option<ProgressSignal> {
    let rest = line.strip_prefix(PROGRESS_MARKER)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let mut fields = rest.split_whitespace();

    let fraction: f64 = fields.next()?.parse().ok()?;
    if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
        return None;
    }
    let remaining_seconds = match fields.next() {
        Some(field) => {
            let value: f64 = field.parse().ok()?;
            if !value.is_finite() || value < 0.0 {
                return None;
            }
            Some(value)
        }
        None => None,
    };
    if fields.next().is_some() {
        return None;
    }

    Some(ProgressSignal {
        fraction,
        remaining_seconds,
    })
}

/// Scoped to one job; create a fresh one per launch.
#[derive(Debug, Default)]
pub struct OutputClassifier {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    latest: Option<ProgressSignal>,
}

impl OutputClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify every line `chunk` completes, in order.
    pub fn feed(&mut self, source: StreamSource, chunk: &[u8]) -> Vec<OutputLine> {
        let buffer = self.buffer_mut(source);
        buffer.extend_from_slice(chunk);

        let mut complete = Vec::new();
        while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            complete.push(line);
        }
        let overflow = (buffer.len() > MAX_LINE_BYTES).then(|| std::mem::take(buffer));

        let mut lines: Vec<OutputLine> = complete
            .into_iter()
            .map(|line| self.classify(&line, true))
            .collect();
        if let Some(fragment) = overflow {
            log::debug!("Flushing {} bytes of {:?} without a newline", fragment.len(), source);
            lines.push(OutputLine::Log(LogLine {
                text: String::from_utf8_lossy(&fragment).into_owned(),
                terminated: false,
            }));
        }
        lines
    }

    /// Flush partial lines once both streams have closed, stdout first.
    pub fn finish(&mut self) -> Vec<OutputLine> {
        let mut lines = Vec::new();
        for source in [StreamSource::Stdout, StreamSource::Stderr] {
            let rest = std::mem::take(self.buffer_mut(source));
            if !rest.is_empty() {
                lines.push(self.classify(&rest, false));
            }
        }
        lines
    }

    /// Most recent progress seen; each signal supersedes the previous one.
    pub fn latest_progress(&self) -> Option<ProgressSignal> {
        self.latest
    }

    fn buffer_mut(&mut self, source: StreamSource) -> &mut Vec<u8> {
        match source {
            StreamSource::Stdout => &mut self.stdout,
            StreamSource::Stderr => &mut self.stderr,
        }
    }

    fn classify(&mut self, line: &[u8], terminated: bool) -> OutputLine {
        let text = String::from_utf8_lossy(line);
        if let Some(progress) = parse_progress(&text) {
            self.latest = Some(progress);
            return OutputLine::Progress(progress);
        }
        OutputLine::Log(LogLine {
            text: text.into_owned(),
            terminated,
        })
    }
}
