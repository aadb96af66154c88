// Builtin tools offered to the model when `chat.builtin_tools` is on.

use async_trait::async_trait;
use chrono::{FixedOffset, Local, Utc};
use serde_json::{json, Value};

use gede_llm::tools::{Tool, ToolFunctions};
use gede_llm::ToolParam;

pub fn builtin_tools() -> ToolFunctions {
    ToolFunctions::new().register(CurrentTime)
}

/// Current date and time, local or at a fixed UTC offset.
pub struct CurrentTime;

#[async_trait]
impl Tool for CurrentTime {
    fn param(&self) -> ToolParam {
        ToolParam {
            name: "get_current_time".into(),
            description: "Get the current date, time and weekday. Uses the user's local time \
                          zone unless a UTC offset in hours is given."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "utc_offset_hours": {
                        "type": "number",
                        "description": "Offset from UTC in hours, e.g. 8 or -5.5"
                    }
                }
            }),
        }
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        let now = match args.get("utc_offset_hours").and_then(Value::as_f64) {
            Some(hours) => {
                let offset = FixedOffset::east_opt((hours * 3600.0).round() as i32)
                    .ok_or_else(|| anyhow::anyhow!("invalid UTC offset: {hours}"))?;
                Utc::now().with_timezone(&offset)
            }
            None => Local::now().fixed_offset(),
        };
        Ok(json!({
            "datetime": now.to_rfc3339(),
            "weekday": now.format("%A").to_string(),
            "timezone": now.format("%:z").to_string(),
        }))
    }
}
