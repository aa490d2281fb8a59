//! `ArcGIS` REST API fetcher.
//!
//! Pages through a `FeatureServer` or `MapServer` layer with
//! `resultOffset`/`resultRecordCount`. The record count comes from a
//! `returnCountOnly` query and the change token from the layer's
//! `editingInfo.lastEditDate`. Features are kept whole
//! (`attributes` + `geometry`) with coordinates requested in WGS84.

use async_trait::async_trait;
use serde_json::Value;

use crate::SourceError;
use crate::fetch::{Page, PageFetcher};
use crate::retry::send_json;

/// Pages over one `ArcGIS` layer.
pub struct ArcgisFetcher {
    client: reqwest::Client,
    label: String,
    query_url: String,
    page_size: u64,
    where_clause: String,
}

impl ArcgisFetcher {
    /// A fetcher over the layer whose query endpoint is `query_url`.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        label: impl Into<String>,
        query_url: impl Into<String>,
        page_size: u64,
        where_clause: Option<&str>,
    ) -> Self {
        Self {
            client,
            label: label.into(),
            query_url: query_url.into(),
            page_size: page_size.max(1),
            where_clause: where_clause.unwrap_or("1=1").to_string(),
        }
    }

    /// The layer URL (the query URL without its trailing `/query`).
    #[must_use]
    pub fn layer_url(&self) -> &str {
        let trimmed = self.query_url.trim_end_matches('/');
        trimmed.strip_suffix("/query").unwrap_or(trimmed)
    }

    async fn get(&self, url: &str, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let body = send_json(self.client.get(url).query(params)).await?;
        check_error_body(&body)?;
        Ok(body)
    }
}

#[async_trait]
impl PageFetcher for ArcgisFetcher {
    fn label(&self) -> &str {
        &self.label
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }

    async fn total_count(&self) -> Result<Option<u64>, SourceError> {
        let body = self
            .get(
                &self.query_url,
                &[
                    ("where", self.where_clause.clone()),
                    ("returnCountOnly", "true".to_string()),
                    ("f", "json".to_string()),
                ],
            )
            .await?;
        Ok(body.get("count").and_then(Value::as_u64))
    }

    async fn change_token(&self) -> Result<Option<String>, SourceError> {
        let body = self
            .get(self.layer_url(), &[("f", "json".to_string())])
            .await?;
        Ok(last_edit_date(&body))
    }

    async fn fetch_page(&self, offset: u64, limit: u64) -> Result<Page, SourceError> {
        let body = self
            .get(
                &self.query_url,
                &[
                    ("where", self.where_clause.clone()),
                    ("outFields", "*".to_string()),
                    ("f", "json".to_string()),
                    ("outSR", "4326".to_string()),
                    ("resultOffset", offset.to_string()),
                    ("resultRecordCount", limit.to_string()),
                ],
            )
            .await?;
        page_from_body(body)
    }
}

/// `ArcGIS` reports many failures as HTTP 200 with an `error` object.
fn check_error_body(body: &Value) -> Result<(), SourceError> {
    let Some(error) = body.get("error") else {
        return Ok(());
    };
    let code = error.get("code").and_then(Value::as_i64);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    // Gateway-style codes are worth retrying like their HTTP equivalents.
    if let Some(code @ (429 | 500..=599)) = code {
        return Err(SourceError::Status {
            status: u16::try_from(code).unwrap_or(500),
            url: message.to_string(),
        });
    }
    Err(SourceError::Protocol {
        message: format!("ArcGIS error {}: {message}", code.unwrap_or_default()),
    })
}

fn last_edit_date(layer: &Value) -> Option<String> {
    let info = layer.get("editingInfo")?;
    info.get("lastEditDate")
        .or_else(|| info.get("dataLastEditDate"))
        .and_then(|v| match v {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
}

fn page_from_body(mut body: Value) -> Result<Page, SourceError> {
    let has_more = body
        .get("exceededTransferLimit")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let spatial_reference = body.get("spatialReference").cloned();
    let Some(Value::Array(mut features)) = body.get_mut("features").map(Value::take) else {
        return Err(SourceError::Protocol {
            message: "ArcGIS response has no features array".to_string(),
        });
    };
    if let Some(sr) = spatial_reference {
        for feature in &mut features {
            if let Some(f) = feature.as_object_mut() {
                f.entry("spatialReference").or_insert_with(|| sr.clone());
            }
        }
    }
    Ok(Page {
        records: features,
        has_more,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn layer_url_strips_query_suffix() {
        let fetcher = ArcgisFetcher::new(
            reqwest::Client::new(),
            "test",
            "https://example.com/arcgis/rest/services/Parcels/FeatureServer/0/query",
            1000,
            None,
        );
        assert_eq!(
            fetcher.layer_url(),
            "https://example.com/arcgis/rest/services/Parcels/FeatureServer/0"
        );
        assert_eq!(fetcher.where_clause, "1=1");
    }

    #[test]
    fn page_keeps_whole_features() {
        let page = page_from_body(json!({
            "spatialReference": {"wkid": 4326},
            "exceededTransferLimit": true,
            "features": [
                {"attributes": {"OBJECTID": 1}, "geometry": {"x": -122.0, "y": 37.0}},
            ],
        }))
        .unwrap();
        assert!(page.has_more);
        assert_eq!(page.records[0]["attributes"]["OBJECTID"], 1);
        assert_eq!(page.records[0]["spatialReference"]["wkid"], 4326);
    }

    #[test]
    fn last_page_has_no_more() {
        let page = page_from_body(json!({"features": []})).unwrap();
        assert!(!page.has_more);
        assert!(page.records.is_empty());
    }

    #[test]
    fn error_bodies_are_classified() {
        let invalid = check_error_body(&json!({"error": {"code": 400, "message": "Invalid query"}}));
        assert!(matches!(invalid, Err(SourceError::Protocol { .. })));

        let busy = check_error_body(&json!({"error": {"code": 503, "message": "busy"}})).unwrap_err();
        assert!(busy.is_transient());

        assert!(check_error_body(&json!({"count": 3})).is_ok());
    }

    #[test]
    fn reads_last_edit_date() {
        let layer = json!({"editingInfo": {"lastEditDate": 1_700_000_000_000_i64}});
        assert_eq!(last_edit_date(&layer).as_deref(), Some("1700000000000"));
        assert_eq!(last_edit_date(&json!({})), None);
    }
}
