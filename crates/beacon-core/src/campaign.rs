//! Campaign definitions and the trigger-condition vocabulary.
//!
//! Campaigns are immutable values fetched from the campaign endpoint; the
//! trigger condition is an OR-of-AND-groups tree over typed property
//! conditions.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::value::PropertyValue;

/// Condition comparison operator. The set is fixed and closed; unknown
/// operator/data-type combinations evaluate to false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    In,
    NotIn,
    Between,
    NotBetween,
    Like,
    NotLike,
    ArrayLike,
    ArrayNotLike,
    IsNull,
    IsNotNull,
    YearEqual,
    MonthEqual,
    YearMonthEqual,
    Contains,
    NotContains,
    Any,
    None,
    Before,
    Past,
    WithinPast,
    After,
    Remaining,
    WithinRemaining,
}

impl Operator {
    /// The negative family. For ITEM-path aggregation these require every
    /// item to satisfy the clause; all other operators require at least one.
    pub fn is_negative(self) -> bool {
        matches!(
            self,
            Self::NotEqual
                | Self::NotIn
                | Self::NotBetween
                | Self::NotLike
                | Self::ArrayNotLike
                | Self::IsNotNull
                | Self::NotContains
                | Self::None
        )
    }
}

/// Declared type of the property a condition inspects; comparison semantics
/// are dispatched on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    String,
    Int,
    Bigint,
    Double,
    Boolean,
    Datetime,
    Date,
    Object,
    ArrayString,
}

/// Where the property is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyPath {
    Event,
    Device,
    Item,
}

/// A single typed clause inside an AND group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyCondition {
    pub property_name: String,
    pub data_type: DataType,
    #[serde(default = "default_path")]
    pub path: PropertyPath,
    pub operator: Operator,
    #[serde(default)]
    pub target_values: Vec<PropertyValue>,
}

fn default_path() -> PropertyPath {
    PropertyPath::Event
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    pub event_name: String,
}

/// Sliding-window display limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyCap {
    pub limit: u32,
    pub duration_minutes: i64,
}

/// The full trigger rule attached to a campaign. The outer list of
/// `property_conditions` is OR-of-AND-groups: the condition matches if any
/// inner group's every clause matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerCondition {
    pub event_filter: EventFilter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_conditions: Option<Vec<Vec<PropertyCondition>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_cap: Option<FrequencyCap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_minutes: Option<i64>,
}

impl TriggerCondition {
    /// Name-only condition with no property clauses.
    pub fn for_event(event_name: impl Into<String>) -> Self {
        Self {
            event_filter: EventFilter {
                event_name: event_name.into(),
            },
            property_conditions: None,
            frequency_cap: None,
            delay_minutes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    pub layout_type: String,
    pub layout_sub_type: String,
    #[serde(default)]
    pub orientations: Vec<String>,
}

/// A server-authored campaign: trigger rule plus renderable payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub layout: Layout,
    pub trigger_condition: TriggerCondition,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub updated_at: String,
}

/// How the user dismissed a campaign; carries the suppression duration.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::AsRefStr,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HideKind {
    HideForOneDay,
    HideForSevenDays,
    HideForever,
    Close,
}

impl HideKind {
    /// Suppression window persisted as `hide_until`. `Close` clears the
    /// display lock without any future suppression.
    pub fn hide_duration(self) -> Duration {
        match self {
            Self::HideForOneDay => Duration::days(1),
            Self::HideForSevenDays => Duration::days(7),
            // Effectively forever on a device's lifetime.
            Self::HideForever => Duration::days(365 * 100),
            Self::Close => Duration::zero(),
        }
    }
}
