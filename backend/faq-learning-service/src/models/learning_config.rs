use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;
use std::collections::HashMap;

/// Reserved rows that live in the same table but are not user tunables
pub const AI_PROVIDER_KEY: &str = "ai_provider";
pub const SYSTEM_STATUS_KEY: &str = "system_status";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FaqLearningConfig {
    pub config_key: String,
    pub config_value: Value,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigValueType {
    Number,
    Range,
    Boolean,
    Multiselect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSection {
    Thresholds,
    Recognition,
    Processing,
    Quality,
    Sources,
    Categories,
    Ai,
    Advanced,
}

impl ConfigSection {
    pub const ALL: [ConfigSection; 8] = [
        ConfigSection::Thresholds,
        ConfigSection::Recognition,
        ConfigSection::Processing,
        ConfigSection::Quality,
        ConfigSection::Sources,
        ConfigSection::Categories,
        ConfigSection::Ai,
        ConfigSection::Advanced,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSection::Thresholds => "thresholds",
            ConfigSection::Recognition => "recognition",
            ConfigSection::Processing => "processing",
            ConfigSection::Quality => "quality",
            ConfigSection::Sources => "sources",
            ConfigSection::Categories => "categories",
            ConfigSection::Ai => "ai",
            ConfigSection::Advanced => "advanced",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    List(&'static [&'static str]),
}

impl DefaultValue {
    pub fn to_value(&self) -> Value {
        match self {
            DefaultValue::Int(v) => json!(v),
            DefaultValue::Float(v) => json!(v),
            DefaultValue::Bool(v) => json!(v),
            DefaultValue::List(v) => json!(v),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConfigDefinition {
    pub key: &'static str,
    pub section: ConfigSection,
    pub description: &'static str,
    pub value_type: ConfigValueType,
    pub default: DefaultValue,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub unit: Option<&'static str>,
    pub options: &'static [&'static str],
}

const fn number(
    key: &'static str,
    section: ConfigSection,
    description: &'static str,
    default: i64,
    min: f64,
    max: f64,
    step: f64,
    unit: Option<&'static str>,
) -> ConfigDefinition {
    ConfigDefinition {
        key,
        section,
        description,
        value_type: ConfigValueType::Number,
        default: DefaultValue::Int(default),
        min: Some(min),
        max: Some(max),
        step: Some(step),
        unit,
        options: &[],
    }
}

const fn range(
    key: &'static str,
    section: ConfigSection,
    description: &'static str,
    default: DefaultValue,
    min: f64,
    max: f64,
    step: f64,
) -> ConfigDefinition {
    ConfigDefinition {
        key,
        section,
        description,
        value_type: ConfigValueType::Range,
        default,
        min: Some(min),
        max: Some(max),
        step: Some(step),
        unit: None,
        options: &[],
    }
}

const fn boolean(
    key: &'static str,
    section: ConfigSection,
    description: &'static str,
    default: bool,
) -> ConfigDefinition {
    ConfigDefinition {
        key,
        section,
        description,
        value_type: ConfigValueType::Boolean,
        default: DefaultValue::Bool(default),
        min: None,
        max: None,
        step: None,
        unit: None,
        options: &[],
    }
}

use ConfigSection::*;

pub static CONFIG_DEFINITIONS: &[ConfigDefinition] = &[
    number(
        "minConfidenceForReview",
        Thresholds,
        "Minimum confidence score for an FAQ to enter the review queue",
        60,
        0.0,
        100.0,
        1.0,
        Some("%"),
    ),
    number(
        "minConfidenceForAutoPublish",
        Thresholds,
        "Minimum confidence score for automatic publishing",
        85,
        0.0,
        100.0,
        1.0,
        Some("%"),
    ),
    number(
        "minPatternFrequency",
        Recognition,
        "Occurrences before a question shape counts as a recurring pattern",
        3,
        1.0,
        50.0,
        1.0,
        Some("occurrences"),
    ),
    range(
        "similarityThreshold",
        Recognition,
        "Similarity at which questions are grouped into one pattern",
        DefaultValue::Float(0.8),
        0.0,
        1.0,
        0.01,
    ),
    number(
        "batchSize",
        Processing,
        "Maximum records pulled per source in one run",
        100,
        10.0,
        1000.0,
        10.0,
        Some("items"),
    ),
    number(
        "processingInterval",
        Processing,
        "Interval between scheduled learning runs",
        3600,
        300.0,
        86400.0,
        300.0,
        Some("seconds"),
    ),
    boolean(
        "enableRealTimeProcessing",
        Processing,
        "Process chats and tickets as soon as they close",
        false,
    ),
    boolean(
        "enableAutoPublishing",
        Processing,
        "Publish high-confidence FAQs without human review",
        false,
    ),
    number(
        "maxDailyProcessingLimit",
        Processing,
        "Maximum items processed per day",
        1000,
        100.0,
        10000.0,
        100.0,
        Some("items"),
    ),
    number(
        "minQuestionLength",
        Quality,
        "Shortest acceptable question",
        10,
        5.0,
        100.0,
        1.0,
        Some("characters"),
    ),
    number(
        "maxQuestionLength",
        Quality,
        "Longest acceptable question",
        500,
        100.0,
        2000.0,
        50.0,
        Some("characters"),
    ),
    number(
        "minAnswerLength",
        Quality,
        "Shortest acceptable answer",
        20,
        10.0,
        200.0,
        5.0,
        Some("characters"),
    ),
    number(
        "chatSessionMinDuration",
        Sources,
        "Minimum chat session duration to consider",
        300,
        60.0,
        3600.0,
        30.0,
        Some("seconds"),
    ),
    number(
        "ticketMinResolutionTime",
        Sources,
        "Minimum ticket resolution time to consider",
        1800,
        300.0,
        86400.0,
        300.0,
        Some("seconds"),
    ),
    range(
        "requiredSatisfactionScore",
        Sources,
        "Minimum customer satisfaction score",
        DefaultValue::Int(4),
        1.0,
        5.0,
        1.0,
    ),
    ConfigDefinition {
        key: "excludedCategories",
        section: Categories,
        description: "Categories never used for learning",
        value_type: ConfigValueType::Multiselect,
        default: DefaultValue::List(&[]),
        min: None,
        max: None,
        step: None,
        unit: None,
        options: &["spam", "test", "internal", "billing", "technical"],
    },
    boolean(
        "autoCategorizationEnabled",
        Categories,
        "Infer a category when the source has none",
        true,
    ),
    range(
        "temperature",
        Ai,
        "Sampling temperature for answer generation",
        DefaultValue::Float(0.7),
        0.0,
        2.0,
        0.1,
    ),
    number(
        "maxTokens",
        Ai,
        "Maximum tokens per generated answer",
        1000,
        100.0,
        4000.0,
        100.0,
        Some("tokens"),
    ),
    number(
        "retentionPeriodDays",
        Advanced,
        "How far back extraction may look",
        365,
        30.0,
        1095.0,
        30.0,
        Some("days"),
    ),
];

pub fn find_definition(key: &str) -> Option<&'static ConfigDefinition> {
    CONFIG_DEFINITIONS.iter().find(|d| d.key == key)
}

pub fn defaults_for_section(section: ConfigSection) -> Vec<(&'static str, Value)> {
    CONFIG_DEFINITIONS
        .iter()
        .filter(|d| d.section == section)
        .map(|d| (d.key, d.default.to_value()))
        .collect()
}

fn format_bound(value: f64) -> String {
    format!("{}", value)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

/// Checks a submitted value against its definition and returns the value to store
pub fn validate_config_value(key: &str, value: &Value) -> Result<Value, String> {
    let definition =
        find_definition(key).ok_or_else(|| format!("Unknown configuration key: {key}"))?;

    match definition.value_type {
        ConfigValueType::Number => {
            let n = as_number(value).ok_or_else(|| format!("{key} must be a valid number"))?;
            if let Some(min) = definition.min {
                if n < min {
                    return Err(format!("{key} must be at least {}", format_bound(min)));
                }
            }
            if let Some(max) = definition.max {
                if n > max {
                    return Err(format!("{key} must be at most {}", format_bound(max)));
                }
            }
            if definition.step.is_some_and(|s| s.fract() == 0.0) && n.fract() != 0.0 {
                return Err(format!("{key} must be a whole number"));
            }
            Ok(number_value(n))
        }
        ConfigValueType::Range => {
            let n = as_number(value).ok_or_else(|| format!("{key} must be a valid number"))?;
            let (min, max) = (
                definition.min.unwrap_or(f64::MIN),
                definition.max.unwrap_or(f64::MAX),
            );
            if n < min || n > max {
                return Err(format!(
                    "{key} must be between {} and {}",
                    format_bound(min),
                    format_bound(max)
                ));
            }
            Ok(number_value(n))
        }
        ConfigValueType::Boolean => match value {
            Value::Bool(b) => Ok(json!(b)),
            Value::String(s) if s == "true" || s == "false" => Ok(json!(s == "true")),
            _ => Err(format!("{key} must be true or false")),
        },
        ConfigValueType::Multiselect => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("{key} must be an array"))?;
            let mut selected = Vec::with_capacity(items.len());
            for item in items {
                let option = item
                    .as_str()
                    .ok_or_else(|| format!("{key} must be an array"))?;
                if !definition.options.contains(&option) {
                    return Err(format!("{key} contains unsupported option {option}"));
                }
                if !selected.iter().any(|s: &String| s == option) {
                    selected.push(option.to_string());
                }
            }
            Ok(json!(selected))
        }
    }
}

/// Typed view over the tunables, defaults filled in for missing rows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningSettings {
    pub min_confidence_for_review: i32,
    pub min_confidence_for_auto_publish: i32,
    pub min_pattern_frequency: i32,
    pub similarity_threshold: f64,
    pub batch_size: i64,
    pub processing_interval: i64,
    pub enable_real_time_processing: bool,
    pub enable_auto_publishing: bool,
    pub max_daily_processing_limit: i64,
    pub min_question_length: usize,
    pub max_question_length: usize,
    pub min_answer_length: usize,
    pub chat_session_min_duration: i64,
    pub ticket_min_resolution_time: i64,
    pub required_satisfaction_score: f64,
    pub excluded_categories: Vec<String>,
    pub auto_categorization_enabled: bool,
    pub temperature: f64,
    pub max_tokens: u32,
    pub retention_period_days: i64,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self::from_values(&HashMap::new())
    }
}

impl LearningSettings {
    pub fn from_values(values: &HashMap<String, Value>) -> Self {
        let get = |key: &str| -> Value {
            values
                .get(key)
                .filter(|v| validate_config_value(key, v).is_ok())
                .cloned()
                .or_else(|| find_definition(key).map(|d| d.default.to_value()))
                .unwrap_or(Value::Null)
        };
        let float = |key: &str| as_number(&get(key)).unwrap_or_default();
        let int = |key: &str| float(key).round() as i64;
        let flag = |key: &str| match get(key) {
            Value::Bool(b) => b,
            Value::String(s) => s == "true",
            _ => false,
        };

        Self {
            min_confidence_for_review: int("minConfidenceForReview") as i32,
            min_confidence_for_auto_publish: int("minConfidenceForAutoPublish") as i32,
            min_pattern_frequency: int("minPatternFrequency") as i32,
            similarity_threshold: float("similarityThreshold"),
            batch_size: int("batchSize"),
            processing_interval: int("processingInterval"),
            enable_real_time_processing: flag("enableRealTimeProcessing"),
            enable_auto_publishing: flag("enableAutoPublishing"),
            max_daily_processing_limit: int("maxDailyProcessingLimit"),
            min_question_length: int("minQuestionLength").max(0) as usize,
            max_question_length: int("maxQuestionLength").max(0) as usize,
            min_answer_length: int("minAnswerLength").max(0) as usize,
            chat_session_min_duration: int("chatSessionMinDuration"),
            ticket_min_resolution_time: int("ticketMinResolutionTime"),
            required_satisfaction_score: float("requiredSatisfactionScore"),
            excluded_categories: get("excludedCategories")
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            auto_categorization_enabled: flag("autoCategorizationEnabled"),
            temperature: float("temperature"),
            max_tokens: int("maxTokens").max(1) as u32,
            retention_period_days: int("retentionPeriodDays"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_every_section() {
        assert_eq!(CONFIG_DEFINITIONS.len(), 20);
        for section in ConfigSection::ALL {
            assert!(
                !defaults_for_section(section).is_empty(),
                "section {} has no keys",
                section.as_str()
            );
        }
    }

    #[test]
    fn test_threshold_defaults() {
        let defaults = defaults_for_section(ConfigSection::Thresholds);
        assert_eq!(
            defaults,
            vec![
                ("minConfidenceForReview", json!(60)),
                ("minConfidenceForAutoPublish", json!(85)),
            ]
        );
    }

    #[test]
    fn test_number_bounds_messages() {
        assert_eq!(
            validate_config_value("minConfidenceForReview", &json!(150)).unwrap_err(),
            "minConfidenceForReview must be at most 100"
        );
        assert_eq!(
            validate_config_value("batchSize", &json!(5)).unwrap_err(),
            "batchSize must be at least 10"
        );
        assert_eq!(
            validate_config_value("maxTokens", &json!("lots")).unwrap_err(),
            "maxTokens must be a valid number"
        );
        assert_eq!(
            validate_config_value("batchSize", &json!(12.5)).unwrap_err(),
            "batchSize must be a whole number"
        );
    }

    #[test]
    fn test_range_bounds_message() {
        let err = validate_config_value("similarityThreshold", &json!(1.5)).unwrap_err();
        assert_eq!(err, "similarityThreshold must be between 0 and 1");
        let err = validate_config_value("temperature", &json!(-0.1)).unwrap_err();
        assert_eq!(err, "temperature must be between 0 and 2");
        assert_eq!(
            validate_config_value("similarityThreshold", &json!(0.65)).unwrap(),
            json!(0.65)
        );
    }

    #[test]
    fn test_numeric_strings_are_normalized() {
        assert_eq!(
            validate_config_value("batchSize", &json!("200")).unwrap(),
            json!(200)
        );
    }

    #[test]
    fn test_boolean_and_multiselect() {
        assert_eq!(
            validate_config_value("enableAutoPublishing", &json!("true")).unwrap(),
            json!(true)
        );
        assert_eq!(
            validate_config_value("enableAutoPublishing", &json!(1)).unwrap_err(),
            "enableAutoPublishing must be true or false"
        );
        assert_eq!(
            validate_config_value("excludedCategories", &json!("spam")).unwrap_err(),
            "excludedCategories must be an array"
        );
        assert_eq!(
            validate_config_value("excludedCategories", &json!(["spam", "sales"])).unwrap_err(),
            "excludedCategories contains unsupported option sales"
        );
        assert_eq!(
            validate_config_value("excludedCategories", &json!(["spam", "spam", "test"]))
                .unwrap(),
            json!(["spam", "test"])
        );
    }

    #[test]
    fn test_unknown_key() {
        assert_eq!(
            validate_config_value("ai_provider", &json!("openai")).unwrap_err(),
            "Unknown configuration key: ai_provider"
        );
    }

    #[test]
    fn test_settings_fall_back_on_invalid_rows() {
        let mut values = HashMap::new();
        values.insert("enableAutoPublishing".to_string(), json!(true));
        values.insert("minConfidenceForAutoPublish".to_string(), json!(90));
        values.insert("batchSize".to_string(), json!(-4));

        let settings = LearningSettings::from_values(&values);
        assert!(settings.enable_auto_publishing);
        assert_eq!(settings.min_confidence_for_auto_publish, 90);
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.min_confidence_for_review, 60);
        assert_eq!(settings.required_satisfaction_score, 4.0);
        assert!(settings.excluded_categories.is_empty());
        assert!(settings.auto_categorization_enabled);
    }
}
