use core::fmt::{self, Display, Formatter};
use std::error::Error;

use clap::ValueEnum;

use crate::{engine::Status, stat::Summary};

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    Json,
    Yaml,
}

/// Renders the summary of a finished run.
pub fn render(summary: &Summary, status: Status, format: Format) -> Result<String, Box<dyn Error>> {
    let out = match format {
        Format::Text => Text { summary, status }.to_string(),
        Format::Json => serde_json::to_string_pretty(summary)?,
        Format::Yaml => serde_yaml::to_string(summary)?,
    };

    Ok(out)
}

struct Text<'a> {
    summary: &'a Summary,
    status: Status,
}

impl Display for Text<'_> {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        let s = self.summary;

        if self.status == Status::Interrupted {
            writeln!(f, "Run interrupted, results are partial.")?;
        }
        writeln!(f, "Total requests:  {}", s.total_requests)?;
        writeln!(f, "Failed requests: {}", s.num_errors)?;
        writeln!(f, "Start time:      {:.6}", s.start_time)?;
        writeln!(f, "End time:        {:.6}", s.end_time)?;
        writeln!(f, "Total time:      {:.6} s", s.total_time)?;
        writeln!(f, "Mean latency:    {:.6} s", s.avg_latency)?;
        writeln!(f, "Status codes:")?;
        for (code, count) in &s.code_counts {
            writeln!(f, "  {code}: {count}")?;
        }
        if !s.error_counts.is_empty() {
            writeln!(f, "Errors:")?;
            for (err, count) in &s.error_counts {
                writeln!(f, "  {count} x {err}")?;
            }
        }
        write!(f, "Requests/sec:    {:.6}", s.rps)
    }
}
