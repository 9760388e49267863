//! Schedule triggers → pipeline schedule payloads.

use crate::core::migration::diagnostics::{Diagnostics, MigrationIssue};
use crate::core::migration::schema::{
    ComponentKind, ComponentPayload, ParsedTemplate, TriggerDefinition,
};
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Timelike, Utc};
use serde::Serialize;
use serde_json::{json, Value};

const SCHEDULE_TRIGGER: &str = "ScheduleTrigger";
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const DEFAULT_WINDOW_DAYS: i64 = 365;

/// One schedule to create on one deployed pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleBinding {
    pub trigger: String,
    pub pipeline: String,
    pub payload: Value,
}

/// Convert every trigger in the template. Non-schedule triggers and
/// unsupported recurrences are reported and skipped.
pub fn convert_triggers(
    template: &ParsedTemplate,
    now: DateTime<Utc>,
    diagnostics: &mut Diagnostics,
) -> Vec<ScheduleBinding> {
    let mut bindings = Vec::new();
    for component in template.of_kind(ComponentKind::Trigger) {
        let ComponentPayload::Trigger(definition) = &component.payload else {
            continue;
        };
        let Some(payload) = schedule_payload(&component.name, definition, now, diagnostics) else {
            continue;
        };
        for target in &definition.pipelines {
            let pipeline = target.pipeline_reference.reference_name.clone();
            if template.pipeline(&pipeline).is_none() {
                diagnostics.at(
                    component.name.clone(),
                    MigrationIssue::MissingPipelineReference { pipeline },
                );
                continue;
            }
            bindings.push(ScheduleBinding {
                trigger: component.name.clone(),
                pipeline,
                payload: payload.clone(),
            });
        }
    }
    bindings.sort_by(|a, b| (&a.pipeline, &a.trigger).cmp(&(&b.pipeline, &b.trigger)));
    bindings
}

fn unsupported(name: &str, detail: &str, diagnostics: &mut Diagnostics) -> Option<Value> {
    diagnostics.at(
        name,
        MigrationIssue::UnsupportedTrigger {
            trigger: name.to_string(),
            trigger_type: detail.to_string(),
        },
    );
    None
}

/// Build the schedule request body for a ScheduleTrigger.
pub fn schedule_payload(
    name: &str,
    definition: &TriggerDefinition,
    now: DateTime<Utc>,
    diagnostics: &mut Diagnostics,
) -> Option<Value> {
    if definition.trigger_type != SCHEDULE_TRIGGER {
        return unsupported(name, &definition.trigger_type, diagnostics);
    }
    let Some(recurrence) = definition.type_properties.get("recurrence") else {
        return unsupported(name, "ScheduleTrigger without recurrence", diagnostics);
    };

    let frequency = recurrence
        .get("frequency")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let interval = recurrence
        .get("interval")
        .and_then(Value::as_u64)
        .unwrap_or(1)
        .max(1);
    let start = recurrence
        .get("startTime")
        .and_then(Value::as_str)
        .and_then(parse_time)
        .unwrap_or_else(|| now.naive_utc());
    let end = recurrence
        .get("endTime")
        .and_then(Value::as_str)
        .and_then(parse_time)
        .unwrap_or_else(|| start + Duration::days(DEFAULT_WINDOW_DAYS));
    let time_zone = recurrence
        .get("timeZone")
        .and_then(Value::as_str)
        .unwrap_or("UTC");
    let schedule = recurrence.get("schedule");

    let mut configuration = match frequency {
        "Minute" => json!({"type": "Cron", "interval": interval}),
        "Hour" => json!({"type": "Cron", "interval": interval * 60}),
        "Day" if schedule.is_none() && interval > 1 => {
            json!({"type": "Cron", "interval": interval * 24 * 60})
        }
        "Day" => json!({"type": "Daily", "times": times(schedule, &start)}),
        "Week" => json!({
            "type": "Weekly",
            "weekdays": weekdays(schedule, &start),
            "times": times(schedule, &start),
        }),
        other => {
            let detail = format!("ScheduleTrigger with {} recurrence", other);
            return unsupported(name, &detail, diagnostics);
        }
    };
    if let Value::Object(map) = &mut configuration {
        map.insert("startDateTime".into(), json!(start.format(DATE_FORMAT).to_string()));
        map.insert("endDateTime".into(), json!(end.format(DATE_FORMAT).to_string()));
        map.insert("localTimeZoneId".into(), json!(time_zone));
    }

    Some(json!({
        "enabled": definition.runtime_state.as_deref() == Some("Started"),
        "configuration": configuration,
    }))
}

fn parse_time(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, DATE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

fn numbers(schedule: Option<&Value>, key: &str) -> Vec<u64> {
    let mut values: Vec<u64> = schedule
        .and_then(|s| s.get(key))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default();
    values.sort_unstable();
    values.dedup();
    values
}

/// `HH:MM` slots from schedule hours × minutes, else the start time.
fn times(schedule: Option<&Value>, start: &NaiveDateTime) -> Vec<String> {
    let hours = numbers(schedule, "hours");
    let minutes = numbers(schedule, "minutes");
    if hours.is_empty() {
        return vec![format!("{:02}:{:02}", start.hour(), start.minute())];
    }
    let minutes = if minutes.is_empty() { vec![0] } else { minutes };
    hours
        .iter()
        .flat_map(|h| minutes.iter().map(move |m| format!("{:02}:{:02}", h, m)))
        .collect()
}

fn weekdays(schedule: Option<&Value>, start: &NaiveDateTime) -> Vec<String> {
    let days: Vec<String> = schedule
        .and_then(|s| s.get("weekDays"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if days.is_empty() {
        vec![weekday_name(start.weekday()).to_string()]
    } else {
        days
    }
}

fn weekday_name(day: chrono::Weekday) -> &'static str {
    match day {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    }
}
