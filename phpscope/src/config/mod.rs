//! Validated runtime configuration built from [`Args`]

use std::path::PathBuf;
use std::time::Duration;

use crate::aggregation::correlation::DEFAULT_PENDING_CAPACITY;
use crate::aggregation::histogram::{DEFAULT_MAX_SLOT, MAX_SUPPORTED_SLOT};
use crate::aggregation::key::KeyNormalizer;
use crate::cli::Args;
use crate::domain::{ConfigError, Pid};

pub const DEFAULT_PHP_LIB: &str = "/usr/lib/apache2/modules/libphp8.1.so";
pub const DEFAULT_MEMCACHED_LIB: &str = "/usr/lib/x86_64-linux-gnu/libmemcached.so.11";

pub const DEFAULT_COMPILED_FILES_CAPACITY: usize = 65_536;
pub const DEFAULT_EXCEPTIONS_CAPACITY: usize = 100;
pub const DEFAULT_PENDING_REQUESTS_CAPACITY: usize = DEFAULT_PENDING_CAPACITY;

/// Sizes and granularity of the aggregation tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub compiled_files_capacity: usize,
    /// Applies to thrown and caught tables separately
    pub exceptions_capacity: usize,
    pub pending_requests_capacity: usize,
    pub max_slot: u32,
    pub normalizer: KeyNormalizer,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compiled_files_capacity: DEFAULT_COMPILED_FILES_CAPACITY,
            exceptions_capacity: DEFAULT_EXCEPTIONS_CAPACITY,
            pending_requests_capacity: DEFAULT_PENDING_REQUESTS_CAPACITY,
            max_slot: DEFAULT_MAX_SLOT,
            normalizer: KeyNormalizer::Directory,
        }
    }
}

impl EngineConfig {
    /// Reject capacities the tables would otherwise silently clamp
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("compiled files", self.compiled_files_capacity),
            ("exceptions", self.exceptions_capacity),
            ("pending requests", self.pending_requests_capacity),
        ];
        if let Some(&(name, _)) = capacities.iter().find(|(_, cap)| *cap == 0) {
            return Err(ConfigError::ZeroCapacity { name });
        }
        if self.max_slot > MAX_SUPPORTED_SLOT {
            return Err(ConfigError::MaxSlotTooLarge(self.max_slot));
        }
        Ok(())
    }
}

/// Where to attach and whom to watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub php_lib: PathBuf,
    /// `None` when the libmemcached uprobe is disabled
    pub memcached_lib: Option<PathBuf>,
    pub target_pid: Option<Pid>,
}

/// How results are presented
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    pub headless: bool,
    pub trace: bool,
    pub quiet: bool,
    pub summary_interval: Duration,
    pub duration_limit: Option<Duration>,
    pub export: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub engine: EngineConfig,
    pub probes: ProbeConfig,
    pub report: ReportConfig,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let engine = EngineConfig {
            compiled_files_capacity: args.files_capacity,
            exceptions_capacity: args.exceptions_capacity,
            pending_requests_capacity: args.requests_capacity,
            max_slot: args.max_slot,
            normalizer: if args.full_paths {
                KeyNormalizer::FullPath
            } else {
                KeyNormalizer::Directory
            },
        };
        engine.validate()?;

        if args.interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        // Trace lines would be written over the dashboard
        if args.trace && !args.headless {
            return Err(ConfigError::TraceRequiresHeadless);
        }

        let probes = ProbeConfig {
            php_lib: args.php_lib.clone(),
            memcached_lib: (!args.no_memcached).then(|| args.memcached_lib.clone()),
            target_pid: args.pid.map(Pid),
        };

        let report = ReportConfig {
            headless: args.headless,
            trace: args.trace,
            quiet: args.quiet,
            summary_interval: Duration::from_secs(args.interval),
            duration_limit: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
            export: args.export.clone(),
        };

        Ok(Self { engine, probes, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("phpscope").chain(argv.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_args(&parse(&[])).expect("defaults are valid");

        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.probes.php_lib, PathBuf::from(DEFAULT_PHP_LIB));
        assert_eq!(config.probes.memcached_lib, Some(PathBuf::from(DEFAULT_MEMCACHED_LIB)));
        assert_eq!(config.probes.target_pid, None);
        assert_eq!(config.report.duration_limit, None);
        assert_eq!(config.report.summary_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_flags_map_to_config() {
        let args = parse(&[
            "--pid",
            "4242",
            "--no-memcached",
            "--full-paths",
            "--duration",
            "30",
            "--max-slot",
            "16",
        ]);
        let config = Config::from_args(&args).expect("valid flags");

        assert_eq!(config.probes.target_pid, Some(Pid(4242)));
        assert_eq!(config.probes.memcached_lib, None);
        assert_eq!(config.engine.normalizer, KeyNormalizer::FullPath);
        assert_eq!(config.engine.max_slot, 16);
        assert_eq!(config.report.duration_limit, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = Config::from_args(&parse(&["--exceptions-capacity", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCapacity { name: "exceptions" }));
    }

    #[test]
    fn test_max_slot_bound() {
        let err = Config::from_args(&parse(&["--max-slot", "65"])).unwrap_err();
        assert!(matches!(err, ConfigError::MaxSlotTooLarge(65)));
        assert!(Config::from_args(&parse(&["--max-slot", "64"])).is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = Config::from_args(&parse(&["--interval", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroInterval));
    }

    #[test]
    fn test_trace_requires_headless() {
        let err = Config::from_args(&parse(&["--trace"])).unwrap_err();
        assert!(matches!(err, ConfigError::TraceRequiresHeadless));

        let config = Config::from_args(&parse(&["--trace", "--headless"])).expect("valid flags");
        assert!(config.report.trace);
        assert!(config.report.headless);
    }
}
