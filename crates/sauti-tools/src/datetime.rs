//! Date and time arithmetic without any network dependency.

use async_trait::async_trait;
use chrono::{Datelike, Duration, FixedOffset, Timelike, Utc};
use serde_json::{json, Value};

use crate::{Result, Tool, ToolContext, ToolError};

/// Answers "what time is it" style questions, optionally shifted by a UTC
/// offset and a day delta so the model can resolve phrases like "next
/// Tuesday" itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &'static str {
        "get_date_time"
    }

    fn description(&self) -> &'static str {
        "Returns the current date and time, optionally offset from UTC and shifted by a number of days."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "utcOffsetMinutes": {
                    "type": "integer",
                    "description": "Minutes east of UTC for the caller's locale (e.g. 330 for IST)."
                },
                "addDays": {
                    "type": "integer",
                    "description": "Days to add to today (negative for the past)."
                }
            }
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let offset_minutes = params
            .get("utcOffsetMinutes")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if !(-18 * 60..=18 * 60).contains(&offset_minutes) {
            return Err(ToolError::InvalidParams(format!(
                "utcOffsetMinutes out of range: {offset_minutes}"
            )));
        }
        let add_days = params.get("addDays").and_then(Value::as_i64).unwrap_or(0);

        let offset = FixedOffset::east_opt(offset_minutes as i32 * 60)
            .ok_or_else(|| ToolError::InvalidParams("invalid utcOffsetMinutes".to_string()))?;
        let now = Utc::now().with_timezone(&offset) + Duration::days(add_days);

        Ok(json!({
            "iso8601": now.to_rfc3339(),
            "date": now.format("%Y-%m-%d").to_string(),
            "time": now.format("%H:%M:%S").to_string(),
            "weekday": now.weekday().to_string(),
            "dayOfMonth": now.day(),
            "month": now.month(),
            "year": now.year(),
            "hour24": now.hour(),
            "utcOffsetMinutes": offset_minutes,
        }))
    }
}
