//! Configuration for the settlement engine

use crate::gas::{GasOp, GasSchedule};
use crate::types::{min_frequency, EntryPoint};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Settlement engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Typed-data signing domain
    pub domain: DomainConfig,

    /// Usage-based billing configuration
    pub usage_based: UsageBasedConfig,

    /// Committed event log
    pub events: EventLogConfig,

    /// Gas reimbursement configuration
    pub gas: GasConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "settlement-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            domain: DomainConfig::default(),
            usage_based: UsageBasedConfig::default(),
            events: EventLogConfig::default(),
            gas: GasConfig::default(),
        }
    }
}

/// Signing domain configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    /// Domain name
    pub name: String,

    /// Domain version
    pub version: String,

    /// Chain / context id
    pub chain_id: u64,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: "RecurringSettlement".to_string(),
            version: "1".to_string(),
            chain_id: 1,
        }
    }
}

/// Usage-based billing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageBasedConfig {
    /// Subtracted from the next due date after each usage-based execution,
    /// absorbing drift of the external trigger
    pub grace_period_secs: i64,
}

impl UsageBasedConfig {
    /// Grace period as a duration
    pub fn grace_period(&self) -> crate::Result<Duration> {
        Duration::try_seconds(self.grace_period_secs).ok_or_else(|| {
            crate::Error::Config(format!(
                "usage-based grace period {}s is out of range",
                self.grace_period_secs
            ))
        })
    }
}

impl Default for UsageBasedConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 3_600, // 1 hour
        }
    }
}

/// Committed event log configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// Undrained events kept before the oldest are evicted
    pub capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// Gas reimbursement configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    /// Cost model
    pub schedule: GasSchedule,

    /// Fixed gas added to every measured window (intrinsic call cost)
    pub base_overhead: u64,

    /// Per-entry-point gas covering the reimbursement bookkeeping itself
    pub calibration: GasCalibration,
}

impl Default for GasConfig {
    fn default() -> Self {
        let schedule = GasSchedule::default();
        Self {
            base_overhead: schedule.cost(GasOp::Intrinsic),
            calibration: GasCalibration::from_schedule(&schedule),
            schedule,
        }
    }
}

/// Per-entry-point calibration constants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasCalibration {
    /// One-shot asset payment (direct mode)
    pub pay_token: u64,
    /// Create regular authorization
    pub create_subscription: u64,
    /// Execute regular authorization
    pub execute_subscription: u64,
    /// Create usage-based authorization
    pub create_usage_based: u64,
    /// Execute usage-based authorization
    pub execute_usage_based: u64,
    /// Raise reservation
    pub increase_allowance: u64,
}

impl GasCalibration {
    /// Calibration matching the bookkeeping a schedule charges for reimbursement
    pub fn from_schedule(schedule: &GasSchedule) -> Self {
        let reservation = schedule.reservation_reimbursement_cost();
        Self {
            pay_token: schedule.direct_reimbursement_cost(),
            create_subscription: reservation,
            execute_subscription: reservation,
            create_usage_based: reservation,
            execute_usage_based: reservation,
            increase_allowance: reservation,
        }
    }

    /// Constant for an entry point (0 for entry points that are not reimbursed)
    pub fn for_entry(&self, entry: EntryPoint) -> u64 {
        match entry {
            EntryPoint::PayToken => self.pay_token,
            EntryPoint::CreateSubscription => self.create_subscription,
            EntryPoint::ExecuteSubscription => self.execute_subscription,
            EntryPoint::CreateUsageBased => self.create_usage_based,
            EntryPoint::ExecuteUsageBased => self.execute_usage_based,
            EntryPoint::IncreaseAllowance => self.increase_allowance,
            _ => 0,
        }
    }
}

impl Default for GasCalibration {
    fn default() -> Self {
        Self::from_schedule(&GasSchedule::default())
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(chain_id) = std::env::var("SETTLEMENT_CHAIN_ID") {
            config.domain.chain_id = chain_id
                .parse()
                .map_err(|e| crate::Error::Config(format!("SETTLEMENT_CHAIN_ID: {}", e)))?;
        }

        if let Ok(name) = std::env::var("SETTLEMENT_DOMAIN_NAME") {
            config.domain.name = name;
        }

        if let Ok(capacity) = std::env::var("SETTLEMENT_EVENT_LOG_CAPACITY") {
            config.events.capacity = capacity
                .parse()
                .map_err(|e| crate::Error::Config(format!("SETTLEMENT_EVENT_LOG_CAPACITY: {}", e)))?;
        }

        if let Ok(grace) = std::env::var("SETTLEMENT_USAGE_GRACE_SECS") {
            config.usage_based.grace_period_secs = grace
                .parse()
                .map_err(|e| crate::Error::Config(format!("SETTLEMENT_USAGE_GRACE_SECS: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.domain.name.is_empty() {
            return Err(crate::Error::Config("domain name is empty".to_string()));
        }
        if self.events.capacity == 0 {
            return Err(crate::Error::Config("event log capacity is zero".to_string()));
        }
        let grace = self.usage_based.grace_period()?;
        if grace < Duration::zero() || grace >= min_frequency() {
            return Err(crate::Error::Config(format!(
                "usage-based grace period {}s must be within [0, {}s)",
                self.usage_based.grace_period_secs,
                min_frequency().num_seconds()
            )));
        }
        Ok(())
    }
}
