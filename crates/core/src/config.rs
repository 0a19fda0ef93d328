//! Engine and analyzer configuration, read from the environment

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_ENGINE_PATH: &str = "engines/YaneuraOu-by-gcc";
const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DEPTH: u32 = 15;
const DEFAULT_BATCH_DEPTH: u32 = 12;

/// A `setoption name <name> value <value>` pair sent during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOption {
    pub name: String,
    pub value: String,
}

impl EngineOption {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl FromStr for EngineOption {
    type Err = Error;

    /// Parses `Name=Value`
    fn from_str(s: &str) -> Result<Self> {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("expected Name=Value, got '{}'", s)))?;
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(Error::Config(format!("invalid option name in '{}'", s)));
        }
        Ok(Self::new(name, value))
    }
}

/// How to launch the engine subprocess
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the engine binary
    pub path: PathBuf,
    /// Extra command line arguments
    pub args: Vec<String>,
    /// Options applied between `usiok` and `isready`
    pub options: Vec<EngineOption>,
}

impl EngineConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push(EngineOption::new(name, value));
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE_PATH)
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub engine: EngineConfig,
    /// Per-request deadline, measured from submission
    pub analysis_timeout: Duration,
    /// Deadline for `usi` .. `readyok`
    pub startup_timeout: Duration,
    /// Depth used by single-position analysis when the caller gives none
    pub default_depth: u32,
    /// Depth used by batch analysis when the caller gives none
    pub batch_depth: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            analysis_timeout: DEFAULT_ANALYSIS_TIMEOUT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            default_depth: DEFAULT_DEPTH,
            batch_depth: DEFAULT_BATCH_DEPTH,
        }
    }
}

impl AnalyzerConfig {
    /// Builds a config from `ENGINE_PATH`, `ENGINE_OPTIONS`,
    /// `ANALYSIS_TIMEOUT_SECS`, `STARTUP_TIMEOUT_SECS`, `DEFAULT_DEPTH` and
    /// `BATCH_DEPTH`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("ENGINE_PATH").filter(|p| !p.trim().is_empty()) {
            config.engine.path = PathBuf::from(path);
        }
        if let Some(options) = lookup("ENGINE_OPTIONS") {
            config.engine.options = parse_options(&options)?;
        }
        if let Some(secs) = parse_positive::<u64>(&lookup, "ANALYSIS_TIMEOUT_SECS")? {
            config.analysis_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_positive::<u64>(&lookup, "STARTUP_TIMEOUT_SECS")? {
            config.startup_timeout = Duration::from_secs(secs);
        }
        if let Some(depth) = parse_positive::<u32>(&lookup, "DEFAULT_DEPTH")? {
            config.default_depth = depth;
        }
        if let Some(depth) = parse_positive::<u32>(&lookup, "BATCH_DEPTH")? {
            config.batch_depth = depth;
        }

        Ok(config)
    }
}

fn parse_options(raw: &str) -> Result<Vec<EngineOption>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<T>() {
        Ok(v) if v != T::default() => Ok(Some(v)),
        _ => Err(Error::Config(format!(
            "{} must be a positive integer, got '{}'",
            key, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = AnalyzerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.engine.path, PathBuf::from(DEFAULT_ENGINE_PATH));
        assert_eq!(config.analysis_timeout, Duration::from_secs(30));
        assert_eq!(config.default_depth, 15);
        assert_eq!(config.batch_depth, 12);
        assert!(config.engine.options.is_empty());
    }

    #[test]
    fn test_reads_overrides() {
        let config = AnalyzerConfig::from_lookup(lookup(&[
            ("ENGINE_PATH", "/opt/yaneuraou"),
            ("ENGINE_OPTIONS", "USI_Hash=256, Threads=4"),
            ("ANALYSIS_TIMEOUT_SECS", "5"),
            ("DEFAULT_DEPTH", "20"),
        ]))
        .unwrap();

        assert_eq!(config.engine.path, PathBuf::from("/opt/yaneuraou"));
        assert_eq!(
            config.engine.options,
            vec![
                EngineOption::new("USI_Hash", "256"),
                EngineOption::new("Threads", "4"),
            ]
        );
        assert_eq!(config.analysis_timeout, Duration::from_secs(5));
        assert_eq!(config.default_depth, 20);
    }

    #[test]
    fn test_rejects_zero_and_garbage() {
        assert!(AnalyzerConfig::from_lookup(lookup(&[("DEFAULT_DEPTH", "0")])).is_err());
        assert!(AnalyzerConfig::from_lookup(lookup(&[("ANALYSIS_TIMEOUT_SECS", "soon")])).is_err());
        assert!(AnalyzerConfig::from_lookup(lookup(&[("ENGINE_OPTIONS", "Threads")])).is_err());
    }

    #[test]
    fn test_option_value_may_be_empty() {
        let opt: EngineOption = "EvalDir=".parse().unwrap();
        assert_eq!(opt, EngineOption::new("EvalDir", ""));
    }
}
