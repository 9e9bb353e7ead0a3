//! Tool output parser
//!
//! The wrapped tool prints one status line per event on standard output.
//! Only a few of them carry progress:
//! - `[download]  42.5% of 3.20MiB at 1.10MiB/s ETA 00:02`
//! - `[ExtractAudio] Destination: song.mp3` (conversion phase)
//! - `Deleting original file song.webm` (final cleanup)
//! - `[download] Destination: song.webm`

use regex::Regex;

use crate::version::probe::decode_output;

/// Percentage reported while the tool cleans up after conversion
pub const FINALIZING_PERCENT: f64 = 99.5;

#[derive(Debug, Clone, PartialEq)]
pub enum ToolProgress {
    /// Download percentage, 0 to 100
    Downloading(f64),
    Converting,
    Finalizing,
    /// File the tool is writing to
    Destination(String),
}

impl ToolProgress {
    /// Percentage to show for this event, if it has one
    pub fn percent(&self) -> Option<f64> {
        match self {
            ToolProgress::Downloading(pct) => Some(*pct),
            ToolProgress::Finalizing => Some(FINALIZING_PERCENT),
            ToolProgress::Converting | ToolProgress::Destination(_) => None,
        }
    }
}

/// Parser for the wrapped tool's status lines
pub struct ToolOutputParser {
    /// Regex for download progress: `[download]  42.5%`
    progress_re: Regex,
}

impl ToolOutputParser {
    pub fn new() -> Self {
        Self {
            progress_re: Regex::new(r"\[download\]\s+(\d+\.?\d*)%").unwrap(),
        }
    }

    /// Classify one line of output; lines without progress yield `None`
    pub fn parse_line(&self, line: &str) -> Option<ToolProgress> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(caps) = self.progress_re.captures(line) {
            return caps
                .get(1)
                .and_then(|pct| pct.as_str().parse::<f64>().ok())
                .map(|pct| ToolProgress::Downloading(pct.clamp(0.0, 100.0)));
        }
        if line.contains("[ExtractAudio]") {
            return Some(ToolProgress::Converting);
        }
        if line.contains("Deleting original") {
            return Some(ToolProgress::Finalizing);
        }
        line.split_once("[download] Destination:")
            .map(|(_, path)| ToolProgress::Destination(path.trim().to_string()))
    }

    /// Same as [`Self::parse_line`] for raw output that may not be valid UTF-8
    pub fn parse_bytes(&self, line: &[u8]) -> Option<ToolProgress> {
        self.parse_line(&decode_output(line))
    }
}

impl Default for ToolOutputParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a single line with a throwaway parser
pub fn parse_tool_line(line: &str) -> Option<ToolProgress> {
    ToolOutputParser::new().parse_line(line)
}
