mod rules;
mod spec;

pub use rules::{parse_failover_spec, parse_filter_spec, RuleParseError};
pub use spec::{ChecksumSpec, CommonOptions, Config, DirectionSpec, GlobalConfig, InterfaceSpec};
