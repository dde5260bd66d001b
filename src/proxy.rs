use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::{LedgerError, LedgerResult};
use crate::service::LedgerService;
use crate::store::LedgerStore;
use crate::subject::Subject;
use crate::upsert::{Measurement, WriteInstruction};

pub const MISSING_FIELDS_MESSAGE: &str = "Missing required fields: date, cat, or weight";

#[derive(Debug, Default, Deserialize)]
pub struct SaveWeightRequest {
    pub date: Option<String>,
    pub cat: Option<String>,
    /// Number or numeric string; HTML forms send the latter.
    pub weight: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct SavedWeight {
    pub date: String,
    pub cat: Subject,
    pub weight: f64,
    pub instruction: WriteInstruction,
    pub range: String,
}

#[derive(Debug, Serialize)]
pub struct SaveWeightResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<SavedWeight>,
}

impl SaveWeightResponse {
    fn failed(err: &LedgerError) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(err.to_string()),
            category: Some(err.kind()),
            data: None,
        }
    }
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn weight_value(raw: Option<&Value>) -> LedgerResult<Option<f64>> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => crate::sheet::parse_decimal(s)
            .map(Some)
            .ok_or_else(|| LedgerError::InvalidMeasurement(format!("weight is not a number: {s}"))),
        Some(other) => Err(LedgerError::InvalidMeasurement(format!(
            "weight is not a number: {other}"
        ))),
    }
}

/// Validate a boundary request into a measurement. A zero weight counts as
/// missing; any other non-positive weight is rejected.
pub fn measurement_from_request(req: &SaveWeightRequest) -> LedgerResult<Measurement> {
    let date = non_blank(req.date.as_deref());
    let cat = non_blank(req.cat.as_deref());
    let weight = weight_value(req.weight.as_ref())?.filter(|w| *w != 0.0);
    let (Some(date), Some(cat), Some(weight)) = (date, cat, weight) else {
        return Err(LedgerError::InvalidMeasurement(MISSING_FIELDS_MESSAGE.to_string()));
    };
    if weight < 0.0 {
        return Err(LedgerError::InvalidMeasurement(format!(
            "weight must be positive, got {weight}"
        )));
    }
    Measurement::from_parts(date, cat, weight)
}

pub fn save_weight<S: LedgerStore>(
    service: &LedgerService<S>,
    req: &SaveWeightRequest,
) -> SaveWeightResponse {
    let outcome = measurement_from_request(req).and_then(|measurement| {
        let instruction = service.record_measurement(&measurement)?;
        Ok((measurement, instruction))
    });
    match outcome {
        Ok((measurement, instruction)) => {
            let message = if instruction.is_append() {
                format!("Added {} for {}", measurement.subject, measurement.date_key)
            } else {
                format!("Updated {} for {}", measurement.subject, measurement.date_key)
            };
            SaveWeightResponse {
                success: true,
                message: Some(message),
                error: None,
                category: None,
                data: Some(SavedWeight {
                    range: instruction.a1_range(service.config()),
                    date: measurement.date_key,
                    cat: measurement.subject,
                    weight: measurement.weight,
                    instruction,
                }),
            }
        }
        Err(err) => {
            warn!(error = %err, category = err.kind(), "save-weight rejected");
            SaveWeightResponse::failed(&err)
        }
    }
}

/// Map an upstream `{success, error}` reply onto the local error taxonomy.
/// Client-side mistakes reported upstream come back as validation errors.
pub fn parse_upstream_reply(status: u16, body: &str) -> LedgerResult<()> {
    let reply = serde_json::from_str::<Value>(body).map_err(|e| {
        LedgerError::StoreIo(format!("upstream replied with status {status} and non-JSON body: {e}"))
    })?;
    let success = reply.get("success").and_then(Value::as_bool);
    let error = reply
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string);

    if (200..300).contains(&status) && success != Some(false) && error.is_none() {
        return Ok(());
    }

    let message = error.unwrap_or_else(|| format!("upstream request failed with status {status}"));
    if message.contains("Invalid cat name") {
        let cat = message
            .split_once(':')
            .map(|(_, name)| name.trim().to_string())
            .unwrap_or_default();
        return Err(LedgerError::InvalidSubject(cat));
    }
    if status == 400 || message.contains("Missing required fields") {
        return Err(LedgerError::InvalidMeasurement(message));
    }
    Err(LedgerError::StoreIo(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::errors::{STORE_IO_ERROR, VALIDATION_ERROR};
    use crate::sheet::CellValue;
    use crate::store::MemorySheetStore;
    use serde_json::json;

    fn service() -> LedgerService<MemorySheetStore> {
        let header = ["Fecha", "Gaudí", "Maite", "Benito", "Cleopatra"]
            .into_iter()
            .map(CellValue::text)
            .collect();
        LedgerService::new(MemorySheetStore::new(vec![header]), LedgerConfig::default())
    }

    fn req(date: &str, cat: &str, weight: Value) -> SaveWeightRequest {
        SaveWeightRequest {
            date: Some(date.to_string()),
            cat: Some(cat.to_string()),
            weight: Some(weight),
        }
    }

    #[test]
    fn saves_then_updates_the_same_day() {
        let svc = service();
        let first = save_weight(&svc, &req("2025-01-08", "Maite", json!(4.2)));
        assert!(first.success);
        assert_eq!(first.message.as_deref(), Some("Added Maite for 08/01/2025"));
        let data = first.data.expect("saved data");
        assert_eq!(data.range, "Hoja 1!A:E");

        let second = save_weight(&svc, &req("08/01/2025", "gaudi", json!("5,3")));
        assert!(second.success);
        let data = second.data.expect("saved data");
        assert_eq!(data.range, "Hoja 1!B2");
        assert_eq!(data.weight, 5.3);

        let rows = svc.store().read_rows().expect("rows");
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn missing_or_zero_fields_are_rejected_before_the_store() {
        let svc = service();
        for bad in [
            SaveWeightRequest::default(),
            req("08/01/2025", "Maite", json!(0)),
            req("  ", "Maite", json!(4.0)),
            req("08/01/2025", "Maite", json!("")),
        ] {
            let resp = save_weight(&svc, &bad);
            assert!(!resp.success);
            assert_eq!(resp.category, Some(VALIDATION_ERROR));
            assert!(resp
                .error
                .as_deref()
                .unwrap_or_default()
                .contains(MISSING_FIELDS_MESSAGE));
        }
        assert_eq!(svc.store().read_rows().expect("rows").len(), 1);
    }

    #[test]
    fn negative_weight_and_unknown_cat_fail_validation() {
        let svc = service();
        let negative = save_weight(&svc, &req("08/01/2025", "Maite", json!(-1.0)));
        assert_eq!(negative.category, Some(VALIDATION_ERROR));

        let unknown = save_weight(&svc, &req("08/01/2025", "Garfield", json!(4.0)));
        assert_eq!(unknown.category, Some(VALIDATION_ERROR));
        assert_eq!(unknown.error.as_deref(), Some("invalid cat: Garfield"));
    }

    #[test]
    fn upstream_replies_map_to_error_kinds() {
        assert!(parse_upstream_reply(200, r#"{"success":true,"message":"ok"}"#).is_ok());
        assert_eq!(
            parse_upstream_reply(400, r#"{"error":"Invalid cat name: Tom"}"#),
            Err(LedgerError::InvalidSubject("Tom".to_string()))
        );
        assert!(parse_upstream_reply(400, r#"{"error":"Missing required fields: date, cat, or weight"}"#)
            .expect_err("missing")
            .is_validation());
        let err = parse_upstream_reply(
            500,
            r#"{"success":false,"error":"Failed to save weight"}"#,
        )
        .expect_err("upstream failure");
        assert_eq!(err.kind(), STORE_IO_ERROR);
        assert_eq!(
            parse_upstream_reply(200, r#"{"success":false,"error":"quota exceeded"}"#),
            Err(LedgerError::StoreIo("quota exceeded".to_string()))
        );
        assert_eq!(
            parse_upstream_reply(502, "<html>").expect_err("html").kind(),
            STORE_IO_ERROR
        );
    }
}
