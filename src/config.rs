use std::collections::HashSet;
use std::time::Duration;

use anyhow::bail;
use clap::Args;

use crate::diary::DEFAULT_DIARY_BASE_URL;
use crate::models::Tier;

#[derive(Debug, Clone, Args)]
pub struct RunConfig {
    /// Base URL of the diary REST API
    #[arg(long, env = "DIARY_BASE_URL", default_value = DEFAULT_DIARY_BASE_URL)]
    pub diary_base_url: String,

    /// Upper bound for a single grade fetch
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 10)]
    pub fetch_timeout_secs: u64,

    /// Peer that receives operator alerts (malformed diary data, startup summary)
    #[arg(long, env = "OPERATOR_PEER")]
    pub operator_peer: Option<i64>,

    /// Checks allowed in flight at once within one tier cycle
    #[arg(long, env = "MAX_CONCURRENT_CHECKS", default_value_t = 8)]
    pub max_concurrent_checks: usize,

    /// Tier cadence as NAME=SECONDS; repeat or comma-separate for several tiers
    #[arg(
        long = "tier",
        env = "TIERS",
        value_delimiter = ',',
        value_parser = parse_tier,
        default_values = ["default=300", "elevated=120", "priority=60", "admin=30"]
    )]
    pub tiers: Vec<Tier>,
}

impl RunConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tiers.is_empty() {
            bail!("at least one tier must be configured");
        }
        let mut names = HashSet::new();
        for tier in &self.tiers {
            if !names.insert(tier.name.as_str()) {
                bail!("tier {:?} is configured more than once", tier.name);
            }
        }
        Ok(())
    }
}

pub fn parse_tier(raw: &str) -> Result<Tier, String> {
    let (name, secs) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=SECONDS, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("tier name is empty in {raw:?}"));
    }
    let secs: u64 = secs
        .trim()
        .parse()
        .map_err(|_| format!("invalid cadence in {raw:?}"))?;
    if secs == 0 {
        return Err(format!("cadence for tier {name:?} must be positive"));
    }
    Ok(Tier::new(name, Duration::from_secs(secs)))
}
