use crate::error::TrackingError;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::Figment;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::ffi::OsStr;
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CONFIG: &str = include_str!("../default.toml");

fn load_config(paths: &[PathBuf]) -> Figment {
    // Priority (from highest--overriding--to lowest--overridden) is:
    //   1. EDDY__* environment variables
    //   2. The config files specified in <paths>, later files first
    //   3. eddy.toml in the current directory
    //   4. ../default.toml
    let mut figment = Figment::from(Toml::string(DEFAULT_CONFIG));

    figment = figment.admerge(Toml::file("eddy.toml"));

    for path in paths {
        match path.extension().and_then(OsStr::to_str) {
            Some("yaml") => {
                figment = figment.admerge(Yaml::file(path));
            }
            Some("json") => {
                figment = figment.admerge(Json::file(path));
            }
            _ => {
                figment = figment.admerge(Toml::file(path));
            }
        }
    }

    figment.admerge(
        Env::prefixed("EDDY__").map(|p| p.as_str().replace("__", ".").replace('_', "-").into()),
    )
}

/// Settings for a keyed state operator that can be supplied from files or the
/// environment. The tracking function itself is provided in code; see
/// [`crate::TrackingConfigBuilder::from_config`].
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OperatorConfig {
    /// Name reported in logs and metrics
    pub operator_name: String,

    /// Number of state partitions; fixed for the lifetime of the operator
    pub partitions: usize,

    /// Keys that receive no input for this long are visited one last time as
    /// timing out, then evicted. Unset disables timeouts.
    #[serde(default)]
    pub idle_timeout: Option<HumanReadableDuration>,

    /// What to do when a key receives more than one value in a batch
    #[serde(default)]
    pub duplicate_values: DuplicateValues,
}

impl OperatorConfig {
    pub fn load(paths: &[PathBuf]) -> Result<Self, TrackingError> {
        load_config(paths)
            .extract()
            .map_err(|e| TrackingError::config(e.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateValues {
    /// Fail the batch; upstream is expected to pre-aggregate
    #[default]
    Reject,
    KeepFirst,
    KeepLast,
}

#[derive(Clone, PartialEq, Eq)]
pub struct HumanReadableDuration {
    duration: Duration,
    original: String,
}

impl From<Duration> for HumanReadableDuration {
    fn from(value: Duration) -> Self {
        Self {
            duration: value,
            original: format!("{}ns", value.as_nanos()),
        }
    }
}

impl Deref for HumanReadableDuration {
    type Target = Duration;

    fn deref(&self) -> &Self::Target {
        &self.duration
    }
}

impl Debug for HumanReadableDuration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.original.fmt(f)
    }
}

impl FromStr for HumanReadableDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let r = Regex::new(r"^(\d+)\s*([a-zA-Zµ]+)$").map_err(|e| e.to_string())?;
        let captures = r
            .captures(s.trim())
            .ok_or_else(|| format!("invalid duration specification '{s}'"))?;

        let out_of_range = || format!("duration '{s}' is out of range");
        let n: u64 = captures[1].parse().map_err(|_| out_of_range())?;

        let duration = match &captures[2] {
            "ns" | "nanos" => Duration::from_nanos(n),
            "µs" | "micros" => Duration::from_micros(n),
            "ms" | "millis" => Duration::from_millis(n),
            "s" | "secs" | "seconds" => Duration::from_secs(n),
            "m" | "mins" | "minutes" => {
                Duration::from_secs(n.checked_mul(60).ok_or_else(out_of_range)?)
            }
            "h" | "hrs" | "hours" => {
                Duration::from_secs(n.checked_mul(60 * 60).ok_or_else(out_of_range)?)
            }
            x => return Err(format!("unknown time unit '{x}'")),
        };

        Ok(HumanReadableDuration {
            duration,
            original: s.to_string(),
        })
    }
}

impl Serialize for HumanReadableDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.original)
    }
}

impl<'de> Deserialize<'de> for HumanReadableDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(de::Error::custom)
    }
}
