//! Upstream pricing API client
//!
//! Batch-oriented: one POST carries any number of tuple requests, and the
//! single-rate lookup is just a one-element batch, so every upstream call
//! goes through the same code path and the same quota accounting.
//!
//! The client never returns an error. Transport failures, non-success
//! statuses and undecodable bodies are logged and collapse to an empty
//! [`RateMap`]; tuples the upstream does not recognize are simply absent
//! from the map. Callers treat absence as "no rate known".

use crate::types::RateQuery;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Rates keyed `period → hotel → room`, exactly as the upstream nests them.
#[derive(Debug, Default)]
pub struct RateMap(HashMap<String, HashMap<String, HashMap<String, String>>>);

impl RateMap {
    pub fn insert(&mut self, period: String, hotel: String, room: String, rate: String) {
        self.0
            .entry(period)
            .or_default()
            .entry(hotel)
            .or_default()
            .insert(room, rate);
    }

    pub fn lookup(&self, query: &RateQuery) -> Option<&str> {
        self.0
            .get(query.period.as_str())?
            .get(query.hotel.as_str())?
            .get(query.room.as_str())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Serialize)]
struct PricingRequest<'a> {
    attributes: &'a [RateQuery],
}

#[derive(Deserialize)]
struct PricingResponse {
    rates: Vec<RateRecord>,
}

#[derive(Deserialize)]
struct RateRecord {
    period: String,
    hotel: String,
    room: String,
    rate: RateScalar,
}

/// The upstream serializes rates as either a JSON string or a bare number;
/// both are preserved as their textual form so cached values round-trip
/// unchanged.
#[derive(Deserialize)]
#[serde(untagged)]
enum RateScalar {
    Text(String),
    Number(serde_json::Number),
}

impl RateScalar {
    fn into_string(self) -> String {
        match self {
            RateScalar::Text(text) => text,
            RateScalar::Number(number) => number.to_string(),
        }
    }
}

pub struct RateApiClient {
    http: reqwest::Client,
    pricing_url: String,
    token: String,
}

impl RateApiClient {
    /// Build a client for the upstream at `base_url`.
    ///
    /// `timeout` bounds every upstream call and must stay below the lock
    /// TTL so a stuck upstream cannot outlive the critical section that
    /// issued it.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build upstream HTTP client")?;
        Ok(Self {
            http,
            pricing_url: format!("{}/pricing", base_url.trim_end_matches('/')),
            token: token.to_string(),
        })
    }

    /// Fetch rates for `requests` in one POST.
    ///
    /// The returned map contains only the tuples the upstream recognized;
    /// on any failure it is empty.
    pub async fn fetch_batch(&self, requests: &[RateQuery]) -> RateMap {
        let mut rates = RateMap::default();
        if requests.is_empty() {
            return rates;
        }

        let response = match self
            .http
            .post(&self.pricing_url)
            .bearer_auth(&self.token)
            .json(&PricingRequest {
                attributes: requests,
            })
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "upstream pricing request failed");
                return rates;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "upstream pricing returned non-success");
            return rates;
        }

        let body: PricingResponse = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "undecodable upstream pricing response");
                return rates;
            }
        };

        debug!(
            requested = requests.len(),
            returned = body.rates.len(),
            "upstream pricing batch answered"
        );
        for record in body.rates {
            rates.insert(
                record.period,
                record.hotel,
                record.room,
                record.rate.into_string(),
            );
        }
        rates
    }

    /// Fetch a single tuple's rate as a one-element batch.
    pub async fn fetch_single(&self, query: &RateQuery) -> Option<String> {
        let rates = self.fetch_batch(std::slice::from_ref(query)).await;
        rates.lookup(query).map(str::to_owned)
    }
}
