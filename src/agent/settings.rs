//! Per-node settings (`Settings.xml`, §6): XML parsing into [`NodeSettings`], with the
//! defaults and validation rules from §6/§7 ("invalid `WUFrequency` strings or numeric
//! parameters are rejected at load; the previous known-good settings remain in effect").

use crate::error::{CoordError, Result};
use crate::types::{FrequencySpec, NodeSettings};
use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

const SECTION_NAME: &str = "NTServiceSettings";

/// Maps directly onto the document root (§6: "one `Section Name="NTServiceSettings"` with
/// `Parameter` children") — quick-xml deserializes a struct from the root element's own
/// attributes/children, so this must not be wrapped in another level of nesting.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename = "Section")]
struct Section {
    #[serde(rename = "@Name")]
    name: String,
    #[serde(rename = "Parameter", default)]
    parameters: Vec<Parameter>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Parameter {
    #[serde(rename = "@Name")]
    name: String,
    #[serde(rename = "@Value")]
    value: String,
}

/// Parse `Settings.xml` content into validated [`NodeSettings`], applying the documented
/// defaults for any parameter not present. Returns an error — rather than a partially
/// defaulted struct — if any recognized parameter's value fails to parse, so the caller can
/// keep the previous known-good settings in effect instead of adopting a half-valid config.
pub fn parse(xml: &str) -> Result<NodeSettings> {
    let section: Section = quick_xml::de::from_str(xml)?;
    let params: HashMap<String, String> =
        section.parameters.into_iter().map(|p| (p.name, p.value)).collect();
    from_parameters(&params)
}

/// Render `settings` back into the `Settings.xml` document shape.
pub fn render(settings: &NodeSettings) -> Result<String> {
    let section = Section {
        name: SECTION_NAME.to_string(),
        parameters: to_parameters(settings)
            .into_iter()
            .map(|(name, value)| Parameter { name, value })
            .collect(),
    };
    Ok(quick_xml::se::to_string(&section)?)
}

/// A stable content hash used to detect a live-file change without a full reparse
/// (§4.2 scheduling-loop step f, "content hash of live file != saved copy").
pub fn content_hash(content: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

fn get<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str)
}

fn parse_bool(value: &str) -> Result<bool> {
    value.parse::<bool>().map_err(|_| CoordError::Config(format!("invalid boolean {value:?}")))
}

fn parse_u32(value: &str) -> Result<u32> {
    value.parse::<u32>().map_err(|_| CoordError::Config(format!("invalid integer {value:?}")))
}

fn from_parameters(params: &HashMap<String, String>) -> Result<NodeSettings> {
    let defaults = NodeSettings::default();

    let wu_query = get(params, "WUQuery").unwrap_or(&defaults.wu_query).to_string();
    let wu_operation_retry_count = match get(params, "WUOperationRetryCount") {
        Some(v) => parse_u32(v)?,
        None => defaults.wu_operation_retry_count,
    };
    let wu_delay_between_retries_in_minutes = match get(params, "WUDelayBetweenRetriesInMinutes") {
        Some(v) => parse_u32(v)?,
        None => defaults.wu_delay_between_retries_in_minutes,
    };
    let wu_operation_timeout_in_minutes = match get(params, "WUOperationTimeOutInMinutes") {
        Some(v) => parse_u32(v)?,
        None => defaults.wu_operation_timeout_in_minutes,
    };
    let wu_reschedule_time_in_minutes = match get(params, "WURescheduleTimeInMinutes") {
        Some(v) => parse_u32(v)?,
        None => defaults.wu_reschedule_time_in_minutes,
    };
    let wu_reschedule_count = match get(params, "WURescheduleCount") {
        Some(v) => parse_u32(v)?,
        None => defaults.wu_reschedule_count,
    };
    let wu_frequency = match get(params, "WUFrequency") {
        Some(v) => parse_frequency(v)?,
        None => defaults.wu_frequency,
    };
    let disable_auto_update_setting_in_os = match get(params, "DisableAutoUpdateSettingInOS") {
        Some(v) => parse_bool(v)?,
        None => defaults.disable_auto_update_setting_in_os,
    };
    let operation_timeout_in_minutes = match get(params, "OperationTimeOutInMinutes") {
        Some(v) => parse_u32(v)?,
        None => defaults.operation_timeout_in_minutes,
    };
    let install_windows_os_only_updates = match get(params, "InstallWindowsOSOnlyUpdates") {
        Some(v) => parse_bool(v)?,
        None => defaults.install_windows_os_only_updates,
    };
    let wu_query_category_ids = match get(params, "WUQueryCategoryIds") {
        Some(v) if !v.trim().is_empty() => v.split(',').map(|s| s.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    let accept_windows_update_eula = match get(params, "AcceptWindowsUpdateEula") {
        Some(v) => parse_bool(v)?,
        None => defaults.accept_windows_update_eula,
    };

    Ok(NodeSettings {
        wu_query,
        wu_operation_retry_count,
        wu_delay_between_retries_in_minutes,
        wu_operation_timeout_in_minutes,
        wu_reschedule_time_in_minutes,
        wu_reschedule_count,
        wu_frequency,
        disable_auto_update_setting_in_os,
        operation_timeout_in_minutes,
        install_windows_os_only_updates,
        wu_query_category_ids,
        accept_windows_update_eula,
    })
}

fn to_parameters(settings: &NodeSettings) -> Vec<(String, String)> {
    vec![
        ("WUQuery".to_string(), settings.wu_query.clone()),
        ("WUOperationRetryCount".to_string(), settings.wu_operation_retry_count.to_string()),
        (
            "WUDelayBetweenRetriesInMinutes".to_string(),
            settings.wu_delay_between_retries_in_minutes.to_string(),
        ),
        (
            "WUOperationTimeOutInMinutes".to_string(),
            settings.wu_operation_timeout_in_minutes.to_string(),
        ),
        (
            "WURescheduleTimeInMinutes".to_string(),
            settings.wu_reschedule_time_in_minutes.to_string(),
        ),
        ("WURescheduleCount".to_string(), settings.wu_reschedule_count.to_string()),
        ("WUFrequency".to_string(), format_frequency(&settings.wu_frequency)),
        (
            "DisableAutoUpdateSettingInOS".to_string(),
            settings.disable_auto_update_setting_in_os.to_string(),
        ),
        ("OperationTimeOutInMinutes".to_string(), settings.operation_timeout_in_minutes.to_string()),
        (
            "InstallWindowsOSOnlyUpdates".to_string(),
            settings.install_windows_os_only_updates.to_string(),
        ),
        ("WUQueryCategoryIds".to_string(), settings.wu_query_category_ids.join(",")),
        ("AcceptWindowsUpdateEula".to_string(), settings.accept_windows_update_eula.to_string()),
    ]
}

/// Parse a `WUFrequency` value, e.g. `"Weekly,Wednesday,7:00:00"` (§6).
fn parse_frequency(value: &str) -> Result<FrequencySpec> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let invalid = || CoordError::Config(format!("invalid WUFrequency {value:?}"));
    match parts.as_slice() {
        ["None"] => Ok(FrequencySpec::None),
        ["Once", date, time] => Ok(FrequencySpec::Once {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?,
            time: parse_time(time).ok_or_else(invalid)?,
        }),
        ["Daily", time] => Ok(FrequencySpec::Daily { time: parse_time(time).ok_or_else(invalid)? }),
        ["Weekly", day, time] => Ok(FrequencySpec::Weekly {
            day_of_week: parse_weekday(day).ok_or_else(invalid)?,
            time: parse_time(time).ok_or_else(invalid)?,
        }),
        ["Monthly", day, time] => Ok(FrequencySpec::Monthly {
            day: if day.eq_ignore_ascii_case("Last") {
                0
            } else {
                day.parse().map_err(|_| invalid())?
            },
            time: parse_time(time).ok_or_else(invalid)?,
        }),
        ["MonthlyByWeekAndDay", occurrence, day, time] => Ok(FrequencySpec::MonthlyByWeekAndDay {
            occurrence: occurrence.parse().map_err(|_| invalid())?,
            day_of_week: parse_weekday(day).ok_or_else(invalid)?,
            time: parse_time(time).ok_or_else(invalid)?,
        }),
        ["Hourly", minutes] => {
            Ok(FrequencySpec::Hourly { minutes: minutes.parse().map_err(|_| invalid())? })
        }
        _ => Err(invalid()),
    }
}

pub(crate) fn format_frequency(freq: &FrequencySpec) -> String {
    match freq {
        FrequencySpec::None => "None".to_string(),
        FrequencySpec::Once { date, time } => format!("Once,{},{time}", date.format("%Y-%m-%d")),
        FrequencySpec::Daily { time } => format!("Daily,{time}"),
        FrequencySpec::Weekly { day_of_week, time } => {
            format!("Weekly,{},{time}", weekday_name(*day_of_week))
        }
        FrequencySpec::Monthly { day, time } => {
            let day_str = if *day == 0 { "Last".to_string() } else { day.to_string() };
            format!("Monthly,{day_str},{time}")
        }
        FrequencySpec::MonthlyByWeekAndDay { occurrence, day_of_week, time } => {
            format!("MonthlyByWeekAndDay,{occurrence},{},{time}", weekday_name(*day_of_week))
        }
        FrequencySpec::Hourly { minutes } => format!("Hourly,{minutes}"),
    }
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S").ok()
}

fn parse_weekday(value: &str) -> Option<Weekday> {
    match value {
        "Sunday" => Some(Weekday::Sun),
        "Monday" => Some(Weekday::Mon),
        "Tuesday" => Some(Weekday::Tue),
        "Wednesday" => Some(Weekday::Wed),
        "Thursday" => Some(Weekday::Thu),
        "Friday" => Some(Weekday::Fri),
        "Saturday" => Some(Weekday::Sat),
        _ => None,
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "Sunday",
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"<Section Name="NTServiceSettings">
  <Parameter Name="WUQuery" Value="IsInstalled=0"/>
  <Parameter Name="WUOperationRetryCount" Value="3"/>
  <Parameter Name="WUFrequency" Value="Daily,03:00:00"/>
  <Parameter Name="InstallWindowsOSOnlyUpdates" Value="true"/>
</Section>"#;

    #[test]
    fn parses_recognized_parameters_over_defaults() {
        let settings = parse(SAMPLE_XML).unwrap();
        assert_eq!(settings.wu_operation_retry_count, 3);
        assert_eq!(
            settings.wu_frequency,
            FrequencySpec::Daily { time: NaiveTime::from_hms_opt(3, 0, 0).unwrap() }
        );
        assert!(settings.install_windows_os_only_updates);
        // Not present in the XML: falls back to the documented default.
        assert_eq!(settings.wu_reschedule_count, NodeSettings::default().wu_reschedule_count);
    }

    #[test]
    fn empty_section_yields_all_defaults() {
        let xml = r#"<Section Name="NTServiceSettings"></Section>"#;
        assert_eq!(parse(xml).unwrap(), NodeSettings::default());
    }

    #[test]
    fn invalid_numeric_parameter_is_rejected() {
        let xml = r#"<Section Name="NTServiceSettings">
  <Parameter Name="WUOperationRetryCount" Value="not-a-number"/>
</Section>"#;
        assert!(parse(xml).is_err());
    }

    #[test]
    fn invalid_frequency_is_rejected() {
        let xml = r#"<Section Name="NTServiceSettings">
  <Parameter Name="WUFrequency" Value="Whenever"/>
</Section>"#;
        assert!(parse(xml).is_err());
    }

    #[test]
    fn render_then_parse_round_trips() {
        let mut settings = NodeSettings::default();
        settings.wu_operation_retry_count = 7;
        settings.wu_query_category_ids = vec!["cat-a".to_string(), "cat-b".to_string()];
        let xml = render(&settings).unwrap();
        assert_eq!(parse(&xml).unwrap(), settings);
    }

    #[test]
    fn content_hash_changes_when_content_changes() {
        let a = content_hash(SAMPLE_XML);
        let b = content_hash("different");
        assert_ne!(a, b);
        assert_eq!(a, content_hash(SAMPLE_XML));
    }
}
