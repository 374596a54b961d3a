use crate::error::{AppError, AppResult};
use crate::models::learning_config::{
    defaults_for_section, validate_config_value, CONFIG_DEFINITIONS, SYSTEM_STATUS_KEY,
};
use crate::models::{ConfigSection, ConfigValueType, LearningSettings};
use crate::repository::ConfigRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// One tunable as shown to administrators
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub key: &'static str,
    pub value: Value,
    pub default_value: Value,
    pub description: &'static str,
    pub category: ConfigSection,
    #[serde(rename = "type")]
    pub value_type: ConfigValueType,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub unit: Option<&'static str>,
    #[serde(skip_serializing_if = "has_no_options")]
    pub options: &'static [&'static str],
    pub is_active: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

fn has_no_options(options: &&'static [&'static str]) -> bool {
    options.is_empty()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub config_key: String,
    pub config_value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdateResult {
    pub config_key: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkConfigUpdateResponse {
    pub success: bool,
    pub message: String,
    pub results: Vec<ConfigUpdateResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetConfig {
    pub key: String,
    pub old_value: Value,
    pub new_value: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetSectionResponse {
    pub success: bool,
    pub message: String,
    pub reset_configs: Vec<ResetConfig>,
}

/// Outcome of the most recent pipeline run, kept in the config table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub last_run_at: DateTime<Utc>,
    pub last_run_status: String,
    pub last_run_processed: usize,
    pub last_run_new_faqs: usize,
    pub last_run_duration_ms: u64,
    /// End of the window covered by the last completed scheduled run
    #[serde(default)]
    pub scheduled_through: Option<DateTime<Utc>>,
}

/// Reads and writes the runtime tunables. Nothing is cached: every call sees
/// the table as it is now.
pub struct LearningConfigService {
    repo: Arc<dyn ConfigRepository>,
}

impl LearningConfigService {
    pub fn new(repo: Arc<dyn ConfigRepository>) -> Self {
        Self { repo }
    }

    pub async fn list_configs(&self) -> AppResult<Vec<ConfigView>> {
        let rows: HashMap<String, _> = self
            .repo
            .list_config()
            .await?
            .into_iter()
            .map(|row| (row.config_key.clone(), row))
            .collect();

        Ok(CONFIG_DEFINITIONS
            .iter()
            .map(|def| {
                let row = rows.get(def.key);
                ConfigView {
                    key: def.key,
                    value: row
                        .map(|r| r.config_value.clone())
                        .unwrap_or_else(|| def.default.to_value()),
                    default_value: def.default.to_value(),
                    description: def.description,
                    category: def.section,
                    value_type: def.value_type,
                    min: def.min,
                    max: def.max,
                    step: def.step,
                    unit: def.unit,
                    options: def.options,
                    is_active: true,
                    updated_at: row.map(|r| r.updated_at),
                }
            })
            .collect())
    }

    /// Validation failures surface as 400s with the validator's message
    pub async fn update_config(&self, key: &str, value: &Value) -> AppResult<Value> {
        let normalized = validate_config_value(key, value).map_err(AppError::BadRequest)?;
        self.repo.upsert_config(key, &normalized).await?;
        info!(config_key = %key, value = %normalized, "Configuration updated");
        Ok(normalized)
    }

    pub async fn bulk_update_configs(
        &self,
        updates: Vec<ConfigUpdate>,
    ) -> AppResult<BulkConfigUpdateResponse> {
        let total = updates.len();
        let mut results = Vec::with_capacity(total);

        for update in updates {
            let outcome = match validate_config_value(&update.config_key, &update.config_value) {
                Ok(normalized) => self
                    .repo
                    .upsert_config(&update.config_key, &normalized)
                    .await
                    .map_err(|e| e.to_string()),
                Err(message) => Err(message),
            };
            if let Err(error) = &outcome {
                warn!(config_key = %update.config_key, error = %error, "Configuration rejected");
            }
            results.push(ConfigUpdateResult {
                config_key: update.config_key,
                success: outcome.is_ok(),
                error: outcome.err(),
            });
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(succeeded, total, "Bulk configuration update finished");
        Ok(BulkConfigUpdateResponse {
            success: succeeded == total,
            message: format!("{succeeded}/{total} configurations updated successfully"),
            results,
        })
    }

    pub async fn reset_section(&self, section: &str) -> AppResult<ResetSectionResponse> {
        let parsed = ConfigSection::parse(section)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown configuration section: {section}")))?;

        let mut reset_configs = Vec::new();
        for (key, default) in defaults_for_section(parsed) {
            let old_value = self
                .repo
                .get_config(key)
                .await?
                .map(|row| row.config_value)
                .unwrap_or_else(|| default.clone());
            self.repo.upsert_config(key, &default).await?;
            reset_configs.push(ResetConfig {
                key: key.to_string(),
                old_value,
                new_value: default,
            });
        }

        info!(section = parsed.as_str(), "Configuration section reset to defaults");
        Ok(ResetSectionResponse {
            success: true,
            message: format!("Configuration section {} reset to defaults", parsed.as_str()),
            reset_configs,
        })
    }

    pub async fn settings(&self) -> AppResult<LearningSettings> {
        let values: HashMap<String, Value> = self
            .repo
            .list_config()
            .await?
            .into_iter()
            .map(|row| (row.config_key, row.config_value))
            .collect();
        Ok(LearningSettings::from_values(&values))
    }

    pub async fn record_pipeline_run(&self, status: &SystemStatus) -> AppResult<()> {
        let value = serde_json::to_value(status)?;
        self.repo.upsert_config(SYSTEM_STATUS_KEY, &value).await
    }

    pub async fn system_status(&self) -> AppResult<Option<SystemStatus>> {
        let Some(row) = self.repo.get_config(SYSTEM_STATUS_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_value(row.config_value) {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable system status row");
                Ok(None)
            }
        }
    }
}
