//! Trigger-rule evaluation.
//!
//! Pure functions matching an incoming event against a campaign's trigger
//! condition: exact event-name filter, OR-of-AND property groups, per-item
//! aggregation for ITEM-path clauses, and typed operator dispatch.

mod compare;

pub use compare::{
    compare, compare_array, compare_boolean, compare_date, compare_datetime, compare_number,
    compare_string,
};

use chrono::{DateTime, Utc};

use crate::campaign::{PropertyCondition, PropertyPath, TriggerCondition};
use crate::device::DeviceSnapshot;
use crate::event::{keys, Event};
use crate::value::PropertyValue;

/// Whether `event` fires `condition`.
///
/// The event name must match exactly; with no property conditions the
/// name match alone triggers. Otherwise any inner group whose every clause
/// matches is sufficient.
pub fn is_triggered(
    condition: &TriggerCondition,
    event: &Event,
    device: &DeviceSnapshot,
    now: DateTime<Utc>,
) -> bool {
    if condition.event_filter.event_name != event.name {
        return false;
    }

    let Some(groups) = &condition.property_conditions else {
        return true;
    };
    if groups.is_empty() {
        return true;
    }

    groups
        .iter()
        .any(|group| is_event_triggered(group, event, device, now))
}

/// AND over a single clause group.
pub fn is_event_triggered(
    group: &[PropertyCondition],
    event: &Event,
    device: &DeviceSnapshot,
    now: DateTime<Utc>,
) -> bool {
    group
        .iter()
        .all(|clause| is_property_condition_matched(clause, event, device, now))
}

/// Resolve and evaluate a single clause.
///
/// ITEM-path clauses evaluate the named field of every entry in the event's
/// `mkt_items` list independently; negative-family operators require all
/// items to satisfy the clause, the rest require at least one. A missing
/// property or item field evaluates as null and matches only IS_NULL.
pub fn is_property_condition_matched(
    clause: &PropertyCondition,
    event: &Event,
    device: &DeviceSnapshot,
    now: DateTime<Utc>,
) -> bool {
    match clause.path {
        PropertyPath::Item => {
            let Some(items) = event.property(keys::ITEMS).and_then(|v| v.as_array()) else {
                tracing::trace!(property = %clause.property_name, "item condition without item list");
                return false;
            };

            let results = items.iter().map(|item| {
                let field = item
                    .as_map()
                    .and_then(|m| m.get(&clause.property_name))
                    .cloned()
                    .unwrap_or(PropertyValue::Null);
                compare(
                    clause.data_type,
                    clause.operator,
                    &field,
                    &clause.target_values,
                    now,
                )
            });

            if clause.operator.is_negative() {
                results.into_iter().all(|matched| matched)
            } else {
                results.into_iter().any(|matched| matched)
            }
        }
        PropertyPath::Event => {
            let source = event
                .property(&clause.property_name)
                .cloned()
                .unwrap_or(PropertyValue::Null);
            compare(
                clause.data_type,
                clause.operator,
                &source,
                &clause.target_values,
                now,
            )
        }
        PropertyPath::Device => {
            let source = device
                .property(&clause.property_name)
                .cloned()
                .unwrap_or(PropertyValue::Null);
            compare(
                clause.data_type,
                clause.operator,
                &source,
                &clause.target_values,
                now,
            )
        }
    }
}
