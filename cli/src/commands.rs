//! Command execution. Every command yields one JSON document for stdout.

use anyhow::{Result, bail};
use chrono::Utc;
use relaybridge_engine::{Bridge, RequestId, RequestRecord};
use serde_json::{Value, json};

use crate::args::Command;

pub async fn run(bridge: &Bridge, command: Command) -> Result<Value> {
    match command {
        Command::Send {
            url,
            body,
            method,
            headers,
            no_wait,
        } => {
            let mut call = bridge
                .call_data(&url)?
                .with_method(method)
                .with_headers(headers);
            if let Some(body) = body {
                call = call.with_body(parse_body(&body));
            }

            if no_wait {
                return Ok(serde_json::to_value(bridge.enqueue(call))?);
            }

            let record = bridge.submit(call).await?;
            let record = if record.is_terminal() {
                record
            } else {
                // Identical call queued or in flight elsewhere.
                bridge.follow(&record).await?;
                bridge.get(record.id()).unwrap_or(record)
            };
            Ok(serde_json::to_value(record)?)
        }
        Command::List => Ok(Value::Array(bridge.list().iter().map(summary).collect())),
        Command::Show { id } => {
            let id = RequestId::from_raw(id);
            match bridge.get(&id) {
                Some(record) => Ok(serde_json::to_value(record)?),
                None => bail!("unknown request {id}"),
            }
        }
        Command::Resume => {
            let outcomes = bridge.resume_all().await;
            Ok(Value::Array(
                outcomes
                    .into_iter()
                    .map(|(id, outcome)| {
                        let status = bridge.get(&id).map(|record| record.status().as_str());
                        match outcome {
                            Ok(result) => json!({"id": id, "status": status, "result": result}),
                            Err(e) => json!({"id": id, "status": status, "error": e.to_string()}),
                        }
                    })
                    .collect(),
            ))
        }
        Command::Clear { id: Some(id), .. } => {
            let cleared = bridge.clear(&RequestId::from_raw(id));
            Ok(json!({"cleared": u32::from(cleared)}))
        }
        Command::Clear { id: None, all: true } => {
            Ok(json!({"cleared": bridge.clear_all()}))
        }
        Command::Clear { id: None, all: false } => bail!("pass a request id or --all"),
    }
}

/// JSON if it parses, otherwise the raw text as a string.
fn parse_body(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn summary(record: &RequestRecord) -> Value {
    json!({
        "id": record.id(),
        "status": record.status(),
        "url": record.call().url(),
        "method": record.call().method(),
        "lastUpdated": record.last_updated(),
        "ageSecs": record.age(Utc::now()).num_seconds(),
        "pollAttempt": record.poll_attempt(),
        "pollAttemptLimit": record.poll_attempt_limit(),
    })
}
