//! Telemetry model for mining rigs.
//!
//! Plain data describing a rig's hardware snapshot. Agents report it through
//! `stats` frames, the hub caches and persists it, dashboards receive it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Health of a rig as seen by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RigStatus {
    Online,
    Warning,
    Error,
    #[default]
    Offline,
    Rebooting,
}

impl RigStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Offline => "OFFLINE",
            Self::Rebooting => "REBOOTING",
        }
    }
}

impl fmt::Display for RigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RigStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(Self::Online),
            "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "OFFLINE" => Ok(Self::Offline),
            "REBOOTING" => Ok(Self::Rebooting),
            other => Err(crate::Error::MalformedFrame(format!(
                "unknown rig status: {other}"
            ))),
        }
    }
}

/// Per-GPU readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GpuStats {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub name: String,
    /// Core temperature in degrees Celsius.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Fan duty in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_speed: Option<u32>,
    /// Hashrate in H/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashrate: Option<f64>,
    /// Board power draw in watts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_clock: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_clock: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Load in percent across all cores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<f32>,
}

/// Miner process state as reported by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MinerState {
    #[serde(default)]
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of an agent `stats` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    #[serde(default)]
    pub gpus: Vec<GpuStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner: Option<MinerState>,
}

impl StatsReport {
    /// Hottest GPU reading in the report, if any GPU reports a temperature.
    pub fn max_gpu_temperature(&self) -> Option<f32> {
        self.gpus
            .iter()
            .filter_map(|g| g.temperature)
            .fold(None, |acc, t| Some(acc.map_or(t, |a: f32| a.max(t))))
    }

    /// Status an agent reporting these stats should be shown with.
    ///
    /// A miner error wins over temperature; otherwise any GPU at or above
    /// `gpu_temp_limit` degrades the rig to `Warning`.
    pub fn derived_status(&self, gpu_temp_limit: f32) -> RigStatus {
        if self.miner.as_ref().is_some_and(|m| m.error.is_some()) {
            return RigStatus::Error;
        }
        if self
            .max_gpu_temperature()
            .is_some_and(|t| t >= gpu_temp_limit)
        {
            return RigStatus::Warning;
        }
        RigStatus::Online
    }
}

/// Latest known state of one rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub rig_id: String,
    #[serde(default)]
    pub rig_name: String,
    pub status: RigStatus,
    /// Unix seconds of the last frame that proved the rig alive.
    #[serde(default)]
    pub last_seen: Option<i64>,
    #[serde(default)]
    pub gpus: Vec<GpuStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner: Option<MinerState>,
}

impl TelemetrySnapshot {
    /// Snapshot for a rig that has never reported.
    pub fn offline(rig_id: impl Into<String>, rig_name: impl Into<String>) -> Self {
        Self {
            rig_id: rig_id.into(),
            rig_name: rig_name.into(),
            status: RigStatus::Offline,
            last_seen: None,
            gpus: Vec::new(),
            cpu: None,
            miner: None,
        }
    }

    /// Merge a stats report into this snapshot.
    ///
    /// Hardware readings are replaced wholesale; a report without `cpu` or
    /// `miner` keeps the previous value so older agents do not blank them.
    pub fn merge_stats(&mut self, report: StatsReport, seen_at: i64) {
        self.gpus = report.gpus;
        if report.cpu.is_some() {
            self.cpu = report.cpu;
        }
        if report.miner.is_some() {
            self.miner = report.miner;
        }
        self.last_seen = Some(seen_at);
    }

    /// Total hashrate across GPUs in H/s.
    pub fn total_hashrate(&self) -> f64 {
        self.gpus.iter().filter_map(|g| g.hashrate).sum()
    }
}
