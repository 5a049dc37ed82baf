//! Nominatim lookups for facility addresses and the `locations.csv` they produce.

use std::io::Write;

use anyhow::{Context, Result};
use farmdir_core::Address;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::HttpFetcher;

pub const NOMINATIM_SEARCH_URL: &str = "https://nominatim.openstreetmap.org/search";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub nickname: String,
    pub point: GeoPoint,
}

/// One-line query: `address_1 address_2 suite city state postal`, skipping blanks.
/// The postal code is only included alongside a state.
pub fn geocode_query(address: &Address) -> String {
    let mut parts: Vec<String> = Vec::new();
    for part in [&address.address_1, &address.address_2, &address.suite, &address.city]
        .into_iter()
        .flatten()
    {
        parts.push(part.trim().to_string());
    }
    if let Some(state) = &address.state {
        parts.push(state.trim().to_string());
        if let Some(postal) = &address.postal {
            parts.push(postal_display(postal));
        }
    }
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

/// Spreadsheet exports sometimes render zip codes as floats ("11215.0").
fn postal_display(postal: &str) -> String {
    let trimmed = postal.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && trimmed.contains('.') => {
            format!("{}", v.floor() as i64)
        }
        _ => trimmed.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

pub fn parse_nominatim(body: &[u8]) -> Result<Option<GeoPoint>> {
    let places: Vec<NominatimPlace> =
        serde_json::from_slice(body).context("parsing nominatim response")?;
    let Some(first) = places.first() else {
        return Ok(None);
    };
    let latitude = first
        .lat
        .parse()
        .with_context(|| format!("invalid latitude {:?}", first.lat))?;
    let longitude = first
        .lon
        .parse()
        .with_context(|| format!("invalid longitude {:?}", first.lon))?;
    Ok(Some(GeoPoint {
        latitude,
        longitude,
    }))
}

pub struct Geocoder<'a> {
    http: &'a HttpFetcher,
    search_url: String,
}

impl<'a> Geocoder<'a> {
    /// Pass an `HttpFetcher` built with a `min_interval`; Nominatim allows one request per second at most.
    pub fn new(http: &'a HttpFetcher) -> Self {
        Self {
            http,
            search_url: NOMINATIM_SEARCH_URL.to_string(),
        }
    }

    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }

    pub async fn locate(&self, query: &str) -> Result<Option<GeoPoint>> {
        let url = reqwest::Url::parse_with_params(
            &self.search_url,
            &[("format", "json"), ("limit", "1"), ("q", query)],
        )
        .with_context(|| format!("building geocode url for {query:?}"))?;
        let response = self
            .http
            .fetch_bytes(url.as_str())
            .await
            .with_context(|| format!("geocoding {query:?}"))?;
        parse_nominatim(&response.body)
    }

    /// Geocode each `(nickname, address)`; addresses without a hit are skipped.
    pub async fn locate_all<'b>(
        &self,
        addresses: impl IntoIterator<Item = (&'b str, &'b Address)>,
    ) -> Result<Vec<Location>> {
        let mut out = Vec::new();
        for (nickname, address) in addresses {
            let query = geocode_query(address);
            if query.is_empty() {
                warn!(nickname, "address has no geocodable parts");
                continue;
            }
            match self.locate(&query).await? {
                Some(point) => {
                    debug!(nickname, %query, latitude = point.latitude, longitude = point.longitude, "geocoded");
                    out.push(Location {
                        nickname: nickname.to_string(),
                        point,
                    });
                }
                None => warn!(nickname, %query, "no geocode result"),
            }
        }
        Ok(out)
    }
}

pub fn write_locations_csv<W: Write>(writer: W, locations: &[Location]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::NonNumeric)
        .from_writer(writer);
    wtr.write_record(["nickname", "latitude", "longitude"])
        .context("writing locations header")?;
    for location in locations {
        wtr.write_record([
            location.nickname.clone(),
            location.point.latitude.to_string(),
            location.point.longitude.to_string(),
        ])
        .with_context(|| format!("writing location for {}", location.nickname))?;
    }
    wtr.flush().context("flushing locations csv")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(parts: [Option<&str>; 6]) -> Address {
        let [address_1, address_2, suite, city, state, postal] = parts.map(|p| p.map(String::from));
        Address {
            address_1,
            address_2,
            suite,
            city,
            state,
            postal,
            country: None,
            latitude: None,
            longitude: None,
            make_default: false,
        }
    }

    #[test]
    fn query_joins_present_parts_and_floors_float_zip_codes() {
        let a = address([
            Some("100 Main Street"),
            None,
            Some("Unit 4"),
            Some("Brooklyn"),
            Some("NY"),
            Some("11215.0"),
        ]);
        assert_eq!(geocode_query(&a), "100 Main Street Unit 4 Brooklyn NY 11215");
    }

    #[test]
    fn postal_code_needs_a_state() {
        let a = address([Some("1 Farm Rd"), None, None, Some("Newark"), None, Some("07102")]);
        assert_eq!(geocode_query(&a), "1 Farm Rd Newark");
    }

    #[test]
    fn leading_zero_zip_codes_are_kept() {
        assert_eq!(postal_display("07102"), "07102");
        assert_eq!(postal_display("K1A 0B1"), "K1A 0B1");
    }

    #[test]
    fn nominatim_first_hit_is_used() {
        let body = br#"[{"lat":"40.6782","lon":"-73.9442","display_name":"Brooklyn"},{"lat":"0","lon":"0"}]"#;
        let point = parse_nominatim(body).expect("parse").expect("hit");
        assert_eq!(point.latitude, 40.6782);
        assert_eq!(point.longitude, -73.9442);
        assert_eq!(parse_nominatim(b"[]").expect("parse"), None);
    }

    #[test]
    fn locations_csv_quotes_only_text() {
        let mut buf = Vec::new();
        write_locations_csv(
            &mut buf,
            &[Location {
                nickname: "Acme HQ".into(),
                point: GeoPoint {
                    latitude: 40.5,
                    longitude: -74.25,
                },
            }],
        )
        .expect("write");
        assert_eq!(
            String::from_utf8(buf).expect("utf8"),
            "\"nickname\",\"latitude\",\"longitude\"\n\"Acme HQ\",40.5,-74.25\n"
        );
    }
}
