//! The typed settings document.
//!
//! Field names serialize to the camelCase keys the automation service reads
//! from the `settings` table. Every struct is `#[serde(default)]`, so a partial
//! object deserializes with the missing keys taken from [`Default`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CATEGORIES: [&str; 8] = [
    "general",
    "racing",
    "training",
    "trainingEvent",
    "trainingStatTarget",
    "ocr",
    "debug",
    "misc",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub racing: RacingSettings,
    pub training: TrainingSettings,
    pub training_event: TrainingEventSettings,
    pub training_stat_target: TrainingStatTargetSettings,
    pub ocr: OcrSettings,
    pub debug: DebugSettings,
    pub misc: MiscSettings,
}

impl Settings {
    /// A scenario must be picked before the bot can start.
    pub fn has_scenario(&self) -> bool {
        !self.general.scenario.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneralSettings {
    pub scenario: String,
    pub enable_skill_point_check: bool,
    pub skill_point_check: i64,
    pub enable_popup_check: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            scenario: String::new(),
            enable_skill_point_check: false,
            skill_point_check: 750,
            enable_popup_check: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RacingSettings {
    pub enable_farming_fans: bool,
    pub days_to_run_extra_races: i64,
    pub disable_race_retries: bool,
    pub enable_stop_on_mandatory_races: bool,
    pub enable_force_racing: bool,
}

impl Default for RacingSettings {
    fn default() -> Self {
        Self {
            enable_farming_fans: false,
            days_to_run_extra_races: 4,
            disable_race_retries: false,
            enable_stop_on_mandatory_races: false,
            enable_force_racing: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainingSettings {
    pub training_blacklist: Vec<String>,
    pub stat_prioritization: Vec<String>,
    pub maximum_failure_chance: i64,
    pub disable_training_on_maxed_stat: bool,
    pub focus_on_spark_stat_target: bool,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            training_blacklist: Vec::new(),
            stat_prioritization: ["Speed", "Stamina", "Power", "Wit", "Guts"]
                .into_iter()
                .map(String::from)
                .collect(),
            maximum_failure_chance: 20,
            disable_training_on_maxed_stat: true,
            focus_on_spark_stat_target: false,
        }
    }
}

/// Event option choices keyed by character or support card name. The inner
/// shape belongs to the automation service and is kept opaque here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainingEventSettings {
    pub character_event_data: BTreeMap<String, Value>,
    pub select_all_characters: bool,
    pub support_event_data: BTreeMap<String, Value>,
    pub select_all_support_cards: bool,
    pub enable_prioritize_energy_options: bool,
}

impl Default for TrainingEventSettings {
    fn default() -> Self {
        Self {
            character_event_data: BTreeMap::new(),
            select_all_characters: true,
            support_event_data: BTreeMap::new(),
            select_all_support_cards: true,
            enable_prioritize_energy_options: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingStatTargetSettings {
    #[serde(rename = "trainingSprintStatTarget_speedStatTarget")]
    pub sprint_speed: i64,
    #[serde(rename = "trainingSprintStatTarget_staminaStatTarget")]
    pub sprint_stamina: i64,
    #[serde(rename = "trainingSprintStatTarget_powerStatTarget")]
    pub sprint_power: i64,
    #[serde(rename = "trainingSprintStatTarget_gutsStatTarget")]
    pub sprint_guts: i64,
    #[serde(rename = "trainingSprintStatTarget_witStatTarget")]
    pub sprint_wit: i64,

    #[serde(rename = "trainingMileStatTarget_speedStatTarget")]
    pub mile_speed: i64,
    #[serde(rename = "trainingMileStatTarget_staminaStatTarget")]
    pub mile_stamina: i64,
    #[serde(rename = "trainingMileStatTarget_powerStatTarget")]
    pub mile_power: i64,
    #[serde(rename = "trainingMileStatTarget_gutsStatTarget")]
    pub mile_guts: i64,
    #[serde(rename = "trainingMileStatTarget_witStatTarget")]
    pub mile_wit: i64,

    #[serde(rename = "trainingMediumStatTarget_speedStatTarget")]
    pub medium_speed: i64,
    #[serde(rename = "trainingMediumStatTarget_staminaStatTarget")]
    pub medium_stamina: i64,
    #[serde(rename = "trainingMediumStatTarget_powerStatTarget")]
    pub medium_power: i64,
    #[serde(rename = "trainingMediumStatTarget_gutsStatTarget")]
    pub medium_guts: i64,
    #[serde(rename = "trainingMediumStatTarget_witStatTarget")]
    pub medium_wit: i64,

    #[serde(rename = "trainingLongStatTarget_speedStatTarget")]
    pub long_speed: i64,
    #[serde(rename = "trainingLongStatTarget_staminaStatTarget")]
    pub long_stamina: i64,
    #[serde(rename = "trainingLongStatTarget_powerStatTarget")]
    pub long_power: i64,
    #[serde(rename = "trainingLongStatTarget_gutsStatTarget")]
    pub long_guts: i64,
    #[serde(rename = "trainingLongStatTarget_witStatTarget")]
    pub long_wit: i64,
}

impl Default for TrainingStatTargetSettings {
    fn default() -> Self {
        Self {
            sprint_speed: 900,
            sprint_stamina: 300,
            sprint_power: 600,
            sprint_guts: 300,
            sprint_wit: 300,

            mile_speed: 900,
            mile_stamina: 300,
            mile_power: 600,
            mile_guts: 300,
            mile_wit: 300,

            medium_speed: 800,
            medium_stamina: 450,
            medium_power: 550,
            medium_guts: 300,
            medium_wit: 300,

            long_speed: 700,
            long_stamina: 600,
            long_power: 450,
            long_guts: 300,
            long_wit: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OcrSettings {
    pub ocr_threshold: i64,
    #[serde(rename = "enableAutomaticOCRRetry")]
    pub enable_automatic_ocr_retry: bool,
    pub ocr_confidence: i64,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            ocr_threshold: 230,
            enable_automatic_ocr_retry: true,
            ocr_confidence: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebugSettings {
    pub enable_debug_mode: bool,
    pub template_match_confidence: i64,
    pub template_match_custom_scale: i64,
    #[serde(rename = "debugMode_startTemplateMatchingTest")]
    pub start_template_matching_test: bool,
    #[serde(rename = "debugMode_startSingleTrainingFailureOCRTest")]
    pub start_single_training_failure_ocr_test: bool,
    #[serde(rename = "debugMode_startComprehensiveTrainingFailureOCRTest")]
    pub start_comprehensive_training_failure_ocr_test: bool,
    #[serde(rename = "enableHideOCRComparisonResults")]
    pub enable_hide_ocr_comparison_results: bool,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            enable_debug_mode: false,
            template_match_confidence: 80,
            template_match_custom_scale: 100,
            start_template_matching_test: false,
            start_single_training_failure_ocr_test: false,
            start_comprehensive_training_failure_ocr_test: false,
            enable_hide_ocr_comparison_results: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MiscSettings {
    pub formatted_settings_string: String,
}
