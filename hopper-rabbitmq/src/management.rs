//! Read-mostly client for the RabbitMQ management HTTP API.
//!
//! Every call is bounded by a 10 second timeout and fails closed: the caller
//! gets a `Management` error (or `None` for a missing queue) and decides how
//! far the degradation spreads.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use hopper_core::config::encode_vhost;
use hopper_core::{BrokerConfig, HopperError, PeekedMessage, QueueStat, Result};

const API_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ManagementClient {
    base_url: String,
    vhost: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl ManagementClient {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| HopperError::Management(e.to_string()))?;

        Ok(Self {
            base_url: config.management_url(),
            vhost: config.vhost_path(),
            username: config.username.clone(),
            password: config.password.clone(),
            client,
        })
    }

    /// All queues in the configured vhost.
    pub async fn list_queues(&self) -> Result<Vec<QueueStat>> {
        let url = format!("{}/queues/{}", self.base_url, self.vhost);
        debug!(%url, "listing queues");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| HopperError::Management(e.to_string()))?
            .error_for_status()
            .map_err(|e| HopperError::Management(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| HopperError::Management(e.to_string()))
    }

    /// Detail for one queue; `None` when the queue does not exist.
    pub async fn queue(&self, name: &str) -> Result<Option<QueueStat>> {
        let url = format!(
            "{}/queues/{}/{}",
            self.base_url,
            self.vhost,
            encode_vhost(name)
        );

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| HopperError::Management(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response
            .error_for_status()
            .map_err(|e| HopperError::Management(e.to_string()))?;

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| HopperError::Management(e.to_string()))
    }

    /// Peek up to `count` messages without consuming them (`ack_requeue_true`).
    pub async fn peek(&self, queue: &str, count: u32) -> Result<Vec<PeekedMessage>> {
        let url = format!(
            "{}/queues/{}/{}/get",
            self.base_url,
            self.vhost,
            encode_vhost(queue)
        );
        let body = json!({
            "count": count,
            "ackmode": "ack_requeue_true",
            "encoding": "auto",
        });

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| HopperError::Management(e.to_string()))?
            .error_for_status()
            .map_err(|e| HopperError::Management(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| HopperError::Management(e.to_string()))
    }
}
