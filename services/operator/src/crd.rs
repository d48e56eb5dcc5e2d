//! The `HpaScaler` custom resource.
//!
//! Every spec field is optional at the schema level: a resource missing a
//! field is still delivered by the watch and rejected with a status message,
//! rather than failing to decode.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired schedule for one autoscaler.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[kube(
    group = "example.com",
    version = "v1",
    kind = "HpaScaler",
    plural = "hpascalers",
    shortname = "hpas",
    namespaced,
    status = "HpaScalerStatus",
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.hpaName"}"#,
    printcolumn = r#"{"name":"Initialized","type":"boolean","jsonPath":".status.initialized"}"#,
    printcolumn = r#"{"name":"Regime","type":"string","jsonPath":".status.regime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HpaScalerSpec {
    /// Namespace of the target autoscaler; defaults to the resource's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Name of the target autoscaler.
    #[serde(default, alias = "target", skip_serializing_if = "Option::is_none")]
    pub hpa_name: Option<String>,

    /// Window opened by the start trigger (scale-up bounds).
    #[serde(default, alias = "cronStart", skip_serializing_if = "Option::is_none")]
    pub schedule_start: Option<WindowSpec>,

    /// Window opened by the end trigger (scale-down bounds).
    #[serde(default, alias = "cronEnd", skip_serializing_if = "Option::is_none")]
    pub schedule_end: Option<WindowSpec>,
}

/// One cron trigger and the bounds it applies.
#[derive(Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WindowSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i64>,
}

/// Observed state written by the operator.
///
/// Absent fields serialize as `null` so a merge patch of the whole status
/// clears stale values.
#[derive(Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HpaScalerStatus {
    /// True while a scheduling task owns the resource.
    #[serde(default)]
    pub initialized: bool,

    /// Why the resource is not being scheduled.
    #[serde(default)]
    pub error: Option<String>,

    /// Last regime applied to the target.
    #[serde(default)]
    pub regime: Option<String>,

    /// Hash of the spec the running task was started with.
    #[serde(default)]
    pub observed_spec_hash: Option<String>,
}

impl HpaScalerStatus {
    /// Status of a resource whose task is running.
    pub fn running(spec_hash: impl Into<String>, regime: Option<String>) -> Self {
        Self {
            initialized: true,
            error: None,
            regime,
            observed_spec_hash: Some(spec_hash.into()),
        }
    }

    /// Status of a resource that is not (or no longer) scheduled.
    pub fn stopped(error: Option<String>) -> Self {
        Self {
            initialized: false,
            error,
            regime: None,
            observed_spec_hash: None,
        }
    }
}
