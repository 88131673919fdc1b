use core::{num::NonZero, time::Duration};
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use http::Method;

use crate::report::Format;

/// Concurrent HTTP load generator.
///
/// Drives requests against the target URL either for a fixed number of
/// requests or for a fixed time, then prints latency and status code
/// statistics.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Cmd {
    /// HTTP method.
    #[clap(short, long, value_enum, ignore_case = true, default_value_t = MethodCmd::Get)]
    pub method: MethodCmd,
    /// Target URL, including the "http://" or "https://" scheme.
    #[clap(short, long, required = true)]
    pub url: String,
    /// Number of requests.
    ///
    /// If not given, or not positive, the run is limited by time instead.
    #[clap(short, long, allow_negative_numbers = true)]
    pub number: Option<i64>,
    /// Testing time in seconds, used when no request number is given.
    #[clap(short, long, default_value_t = 5)]
    pub timeout: u64,
    /// Number of concurrent requests.
    ///
    /// This is a hard cap on requests in flight.
    #[clap(short, long, default_value_t = NonZero::<usize>::MIN)]
    pub concurrency: NonZero<usize>,
    /// Basic authentication credentials in "user:passwd" format.
    #[clap(short, long)]
    pub auth: Option<String>,
    /// Cookie in "key:value" format.
    #[clap(short = 'C', long)]
    pub cookie: Option<String>,
    /// HTTP proxy, for example "http://10.0.0.1:8080".
    #[clap(short, long)]
    pub proxy: Option<String>,
    /// Request body, only accepted for POST and PUT.
    #[clap(short, long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Content type of the request body.
    #[clap(long, default_value = "text/plain")]
    pub content_type: String,
    /// Custom header in "name:value" format. May be repeated.
    #[clap(long = "header", value_name = "HEADER", action = ArgAction::Append)]
    pub headers: Vec<String>,
    /// File to upload as a "multipart/form-data" field named "file".
    #[clap(long, value_name = "PATH")]
    pub file: Option<PathBuf>,
    /// Per-request timeout, for example "500ms" or "2s".
    ///
    /// Requests exceeding it are counted as failed. Disabled by default.
    #[clap(long, value_parser = humantime::parse_duration)]
    pub request_timeout: Option<Duration>,
    /// Number of worker threads.
    #[clap(long, default_value_t = std::thread::available_parallelism().unwrap_or(NonZero::<usize>::MIN))]
    pub threads: NonZero<usize>,
    /// Report format.
    #[clap(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,
    /// Also write debug logs to this file.
    #[clap(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
    /// Be verbose in terms of logging.
    #[clap(short, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodCmd {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
}

impl From<MethodCmd> for Method {
    fn from(v: MethodCmd) -> Self {
        match v {
            MethodCmd::Get => Method::GET,
            MethodCmd::Head => Method::HEAD,
            MethodCmd::Post => Method::POST,
            MethodCmd::Put => Method::PUT,
            MethodCmd::Delete => Method::DELETE,
            MethodCmd::Options => Method::OPTIONS,
        }
    }
}
