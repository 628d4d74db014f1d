// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Message templates for notifications

use serde::Serialize;
use thiserror::Error;

use super::AlertType;

const RECORD_FIELDS: usize = 7;

/// Rendered notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("alarm payload has {0} fields")]
    AlarmFields(usize),

    #[error("{0:?} payload needs two fields")]
    Pair(AlertType),
}

/// Render `payload` of an event raised at `time`.
pub fn render(alert: AlertType, payload: &str, time: &str) -> Result<Message, TemplateError> {
    let subject = match alert {
        AlertType::PowerOn => "POWER ON notification",
        AlertType::PowerOff => "POWER OFF notification",
        AlertType::PowerChange => "POWER CHANGE notification",
        AlertType::LowBattery => "BATTERY LOW notification",
        AlertType::SessionRestart => "SESSION RESTART notification",
        AlertType::SessionResume => "SESSION RESUME notification",
        AlertType::SessionNew => "SESSION NEW notification",
        AlertType::SessionStop => "SESSION STOP notification",
        AlertType::A1Alarms => "ALARM A1 notification",
        AlertType::A2Alarms => "ALARM A2 notification",
        AlertType::IfaceChange => "NETWORK INTERFACE CHANGE notification",
        AlertType::DiskFull => "DISK FULL notification",
    };

    let mut body = format!("Date/time of event: {}\n", time);
    match alert {
        AlertType::PowerOn | AlertType::DiskFull | AlertType::SessionStop => {}
        AlertType::PowerOff => body.push_str(&format!("Cause of shutdown: {}\n", payload)),
        AlertType::LowBattery => body.push_str(&format!("Battery capacity: {} %\n", payload)),
        AlertType::PowerChange | AlertType::IfaceChange => {
            let (from, to) = pair(alert, payload)?;
            body.push_str(&format!("Change from {} to {}\n", from, to));
        }
        AlertType::SessionNew | AlertType::SessionRestart | AlertType::SessionResume => {
            let (number, alias) = pair(alert, payload)?;
            body.push_str(&format!("Session number: {}\nSession alias: {}\n", number, alias));
        }
        AlertType::A1Alarms | AlertType::A2Alarms => body.push_str(&alarm_table(payload)?),
    }

    Ok(Message {
        subject: subject.to_string(),
        body,
    })
}

fn pair(alert: AlertType, payload: &str) -> Result<(&str, &str), TemplateError> {
    payload.split_once(',').ok_or(TemplateError::Pair(alert))
}

// Payload: global label, then seven fields per sensor:
// position, alias, temperature, A1, A2, state, transition.
fn alarm_table(payload: &str) -> Result<String, TemplateError> {
    let fields: Vec<&str> = payload.split(',').collect();
    if fields.len() < RECORD_FIELDS + 1 || (fields.len() - 1) % RECORD_FIELDS != 0 {
        return Err(TemplateError::AlarmFields(fields.len()));
    }

    let mut table = format!(
        "Device alarm status: {}\nSensor alarm status:\n{:<5}{:<16}{:<14}{:<9}{:<9}{:<9}{}\n",
        fields[0], "POS", "NAME", "TRIGGER", "TEMP", "A1", "A2", "STATUS"
    );
    for record in fields[1..].chunks(RECORD_FIELDS) {
        table.push_str(&format!(
            "{:<5}{:<16}{:<14}{:<9}{:<9}{:<9}{}\n",
            record[0],
            record[1],
            record[6],
            format!("{}C", record[2]),
            format!("{}C", record[3]),
            format!("{}C", record[4]),
            record[5]
        ));
    }
    Ok(table)
}
