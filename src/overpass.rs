//! Overpass API adapter for walkable trail geometry.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::geo::{BoundingBox, GeoPoint};
use crate::traits::{TrailProvider, TrailSegment};

/// Boxes wider or taller than this many degrees often time out upstream.
pub const MAX_AREA_DEG: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverpassConfig {
    /// Interpreter endpoints, tried in order.
    pub mirrors: Vec<String>,
    pub timeout_secs: u64,
    /// Server-side query timeout passed in the query header.
    pub query_timeout_secs: u64,
}

impl Default for OverpassConfig {
    fn default() -> Self {
        Self {
            mirrors: vec![
                "https://overpass-api.de/api/interpreter".to_string(),
                "https://overpass.kumi.systems/api/interpreter".to_string(),
                "https://overpass.openstreetmap.ru/api/interpreter".to_string(),
            ],
            timeout_secs: 120,
            query_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverpassClient {
    config: OverpassConfig,
    client: reqwest::blocking::Client,
}

impl OverpassClient {
    pub fn new(config: OverpassConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OverpassConfig {
        &self.config
    }

    fn fetch_from(&self, url: &str, query: &str) -> Result<Vec<TrailSegment>, ProviderError> {
        let body = self
            .client
            .post(url)
            .form(&[("data", query)])
            .send()
            .and_then(|resp| resp.error_for_status())?
            .text()?;
        parse_response(&body)
    }
}

impl TrailProvider for OverpassClient {
    fn fetch_trails(&self, bbox: &BoundingBox) -> Result<Vec<TrailSegment>, ProviderError> {
        if bbox.width_deg() > MAX_AREA_DEG || bbox.height_deg() > MAX_AREA_DEG {
            tracing::warn!(
                width_deg = bbox.width_deg(),
                height_deg = bbox.height_deg(),
                max_deg = MAX_AREA_DEG,
                "large bounding box, request may time out"
            );
        }

        let query = build_query(bbox, self.config.query_timeout_secs);
        let mut last_error = ProviderError::Unavailable("no overpass mirrors configured".to_string());

        for (i, url) in self.config.mirrors.iter().enumerate() {
            tracing::info!(mirror = %url, attempt = i + 1, of = self.config.mirrors.len(), "querying overpass");
            match self.fetch_from(url, &query) {
                Ok(segments) => {
                    tracing::info!(segments = segments.len(), "downloaded trail segments");
                    return Ok(segments);
                }
                Err(err) => {
                    tracing::warn!(mirror = %url, error = %err, "overpass mirror failed");
                    last_error = err;
                }
            }
        }

        tracing::error!(error = %last_error, "all overpass mirrors failed");
        Err(last_error)
    }
}

/// Overpass QL selecting paths, footways and well-surfaced tracks.
pub fn build_query(bbox: &BoundingBox, timeout_secs: u64) -> String {
    let area = format!(
        "{},{},{},{}",
        bbox.min_lat, bbox.min_lon, bbox.max_lat, bbox.max_lon
    );
    format!(
        "[out:json][timeout:{timeout}][maxsize:536870912];\n\
         (\n\
         way[\"highway\"=\"path\"]({area});\n\
         way[\"highway\"=\"footway\"]({area});\n\
         way[\"highway\"=\"track\"][\"tracktype\"~\"grade[1-3]\"]({area});\n\
         );\n\
         out geom;\n",
        timeout = timeout_secs,
        area = area,
    )
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: u64,
    #[serde(default)]
    geometry: Vec<OverpassNode>,
}

#[derive(Debug, Deserialize)]
struct OverpassNode {
    lat: f64,
    lon: f64,
}

/// Turn an `out geom` response into one segment per way.
pub fn parse_response(body: &str) -> Result<Vec<TrailSegment>, ProviderError> {
    let response: OverpassResponse =
        serde_json::from_str(body).map_err(|err| ProviderError::Decode(err.to_string()))?;

    Ok(response
        .elements
        .into_iter()
        .filter(|element| element.kind == "way" && element.geometry.len() >= 2)
        .map(|element| {
            TrailSegment::new(
                element.id,
                element
                    .geometry
                    .into_iter()
                    .map(|node| GeoPoint::new(node.lat, node.lon))
                    .collect(),
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_selects_walkable_ways() {
        let bbox = BoundingBox::new(GeoPoint::new(41.38, 2.17), GeoPoint::new(41.40, 2.19));
        let query = build_query(&bbox, 90);
        assert!(query.starts_with("[out:json][timeout:90]"));
        assert!(query.contains("way[\"highway\"=\"footway\"](41.38,2.17,41.4,2.19);"));
        assert!(query.contains("[\"tracktype\"~\"grade[1-3]\"]"));
        assert!(query.trim_end().ends_with("out geom;"));
    }

    #[test]
    fn test_parse_ways() {
        let body = r#"{
            "elements": [
                {"type": "way", "id": 11, "geometry": [{"lat": 41.0, "lon": 2.0}, {"lat": 41.001, "lon": 2.001}]},
                {"type": "way", "id": 12, "geometry": [{"lat": 41.0, "lon": 2.0}]},
                {"type": "node", "id": 13, "lat": 41.0, "lon": 2.0}
            ]
        }"#;
        let segments = parse_response(body).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].trail_id, 11);
        assert_eq!(segments[0].points[1], GeoPoint::new(41.001, 2.001));
    }

    #[test]
    fn test_parse_empty_and_malformed() {
        assert!(parse_response(r#"{"elements": []}"#).unwrap().is_empty());
        assert!(matches!(parse_response("<html>busy</html>"), Err(ProviderError::Decode(_))));
    }

    #[test]
    fn test_no_mirrors_is_unavailable() {
        let client = OverpassClient::new(OverpassConfig {
            mirrors: Vec::new(),
            ..OverpassConfig::default()
        })
        .unwrap();
        let bbox = BoundingBox::new(GeoPoint::new(41.38, 2.17), GeoPoint::new(41.40, 2.19));
        assert!(matches!(client.fetch_trails(&bbox), Err(ProviderError::Unavailable(_))));
    }
}
