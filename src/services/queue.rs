//! Queue publishing through the RabbitMQ HTTP API.
//!
//! The broker is only reachable through a tunnel that is set up outside the
//! harvester; an unreachable endpoint is treated as a transient failure.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{HttpConfig, Listing, QueueConfig};
use crate::utils::http::{StatusClass, classify_status};

#[derive(Debug, Serialize)]
struct MessageProperties {
    content_type: &'static str,
    /// 2 = persistent
    delivery_mode: u8,
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    properties: MessageProperties,
    routing_key: &'a str,
    payload: String,
    payload_encoding: &'static str,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(default)]
    routed: bool,
}

/// Publishes normalized listings onto an exchange.
#[derive(Debug, Clone)]
pub struct QueuePublisher {
    client: Client,
    publish_url: String,
    routing_key: String,
    username: String,
    password: String,
}

impl QueuePublisher {
    pub fn new(config: &QueueConfig, http: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            publish_url: publish_url(&config.api_url, &config.vhost, &config.exchange)?,
            routing_key: config.routing_key.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn publish_url(&self) -> &str {
        &self.publish_url
    }

    /// Publish one listing; an unrouted message counts as a transient failure.
    pub async fn publish(&self, listing: &Listing) -> Result<()> {
        let context = format!("publish {}", listing.offer_id);
        let request = PublishRequest {
            properties: MessageProperties {
                content_type: "application/json",
                delivery_mode: 2,
            },
            routing_key: &self.routing_key,
            payload: serde_json::to_string(listing)?,
            payload_encoding: "string",
        };

        let response = self
            .client
            .post(&self.publish_url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::transient_delivery(&context, e))?;

        let status = response.status();
        match classify_status(status) {
            StatusClass::Success => {}
            StatusClass::Transient => {
                return Err(AppError::transient_delivery(&context, format!("HTTP {status}")));
            }
            StatusClass::Permanent => {
                return Err(AppError::rejected(&context, format!("HTTP {status}")));
            }
        }

        let body: PublishResponse = response
            .json()
            .await
            .map_err(|e| AppError::transient_delivery(&context, e))?;
        if !body.routed {
            return Err(AppError::transient_delivery(&context, "message was not routed"));
        }
        Ok(())
    }
}

/// `{api_url}/api/exchanges/{vhost}/{exchange}/publish` with encoded segments.
fn publish_url(api_url: &str, vhost: &str, exchange: &str) -> Result<String> {
    let mut url = url::Url::parse(api_url)?;
    url.path_segments_mut()
        .map_err(|_| AppError::config(format!("queue.api_url cannot be a base: {api_url}")))?
        .pop_if_empty()
        .extend(["api", "exchanges", vhost, exchange, "publish"]);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_url_encodes_default_vhost() {
        assert_eq!(
            publish_url("http://127.0.0.1:15672", "/", "amq.default").unwrap(),
            "http://127.0.0.1:15672/api/exchanges/%2F/amq.default/publish"
        );
        assert_eq!(
            publish_url("http://localhost:15672/", "listings", "offers").unwrap(),
            "http://localhost:15672/api/exchanges/listings/offers/publish"
        );
    }

    #[test]
    fn test_publish_request_shape() {
        let request = PublishRequest {
            properties: MessageProperties {
                content_type: "application/json",
                delivery_mode: 2,
            },
            routing_key: "listings",
            payload: "{}".into(),
            payload_encoding: "string",
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["payload_encoding"], "string");
        assert_eq!(value["properties"]["delivery_mode"], 2);
    }

    #[test]
    fn test_unrouted_response_defaults_false() {
        let body: PublishResponse = serde_json::from_str("{}").unwrap();
        assert!(!body.routed);
    }
}
