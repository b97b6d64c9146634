//! Philips Hue bridge client
//!
//! Thin reqwest client for the Hue REST API: pairing, light
//! enumeration, state reads, and state updates.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Capabilities, LightBridge, LightInfo, LightState, LightUpdate};
use crate::{Error, Result};

/// Hue error type for "link button not pressed"
const LINK_BUTTON_ERROR: u32 = 101;

/// Client for one paired Hue bridge
pub struct HueBridge {
    client: reqwest::Client,
    address: String,
    username: String,
}

/// Pairing request body
#[derive(Serialize)]
struct PairRequest<'a> {
    devicetype: &'a str,
}

/// One element of the bridge's pairing response array
#[derive(Deserialize)]
struct PairResponse {
    success: Option<PairSuccess>,
    error: Option<HueError>,
}

#[derive(Deserialize)]
struct PairSuccess {
    username: String,
}

#[derive(Deserialize)]
struct HueError {
    #[serde(rename = "type")]
    kind: u32,
    description: String,
}

/// Light record as reported by `GET /api/{user}/lights`
#[derive(Deserialize)]
struct WireLight {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    state: WireState,
}

#[derive(Deserialize)]
struct WireState {
    on: bool,
    bri: Option<u8>,
    xy: Option<(f64, f64)>,
}

/// Update body for `PUT /api/{user}/lights/{id}/state`
#[derive(Serialize)]
struct WireUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bri: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    xy: Option<(f64, f64)>,
}

impl HueBridge {
    /// Connect to an already-paired bridge
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(address: impl Into<String>, username: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Bridge(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            address: address.into(),
            username: username.into(),
        })
    }

    /// Register this daemon with the bridge
    ///
    /// The person must press the bridge's link button first; until
    /// then the bridge answers with error 101.
    ///
    /// # Errors
    ///
    /// Returns `Error::Bridge` if the link button has not been
    /// pressed, the bridge is unreachable, or the response is
    /// malformed
    pub async fn pair(address: &str) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Bridge(format!("failed to build HTTP client: {e}")))?;

        let hostname = hostname();
        let devicetype = format!("candela#{hostname}");

        let url = format!("http://{address}/api");
        let responses: Vec<PairResponse> = client
            .post(&url)
            .json(&PairRequest {
                devicetype: &devicetype,
            })
            .send()
            .await
            .map_err(|e| Error::Bridge(format!("bridge unreachable at {address}: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Bridge(format!("malformed pairing response: {e}")))?;

        let first = responses
            .into_iter()
            .next()
            .ok_or_else(|| Error::Bridge("empty pairing response".to_string()))?;

        if let Some(success) = first.success {
            tracing::info!(address, "paired with bridge");
            return Ok(success.username);
        }

        match first.error {
            Some(e) if e.kind == LINK_BUTTON_ERROR => Err(Error::Bridge(
                "link button not pressed; press it and retry".to_string(),
            )),
            Some(e) => Err(Error::Bridge(format!(
                "pairing rejected ({}): {}",
                e.kind, e.description
            ))),
            None => Err(Error::Bridge("unrecognized pairing response".to_string())),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "http://{}/api/{}/{path}",
            self.address, self.username
        )
    }
}

/// Capabilities implied by the Hue device type string
fn capabilities_for(kind: &str) -> Capabilities {
    let kind = kind.to_lowercase();
    Capabilities {
        brightness: kind.contains("dimmable")
            || kind.contains("color")
            || kind.contains("extended")
            || kind.contains("ambiance"),
        color: kind.contains("color") || kind.contains("extended"),
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "daemon".to_string())
}

#[async_trait::async_trait]
impl LightBridge for HueBridge {
    async fn list_lights(&self) -> Result<HashMap<String, LightInfo>> {
        let lights: HashMap<String, WireLight> = self
            .client
            .get(self.url("lights"))
            .send()
            .await
            .map_err(|e| Error::Bridge(format!("failed to list lights: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Bridge(format!("bridge rejected list: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Bridge(format!("malformed lights response: {e}")))?;

        let handles = lights
            .into_iter()
            .map(|(id, light)| {
                let info = LightInfo {
                    id,
                    name: light.name.clone(),
                    capabilities: capabilities_for(&light.kind),
                };
                (light.name, info)
            })
            .collect::<HashMap<_, _>>();

        tracing::debug!(count = handles.len(), "enumerated lights");
        Ok(handles)
    }

    async fn get_state(&self, id: &str) -> Result<LightState> {
        let light: WireLight = self
            .client
            .get(self.url(&format!("lights/{id}")))
            .send()
            .await
            .map_err(|e| Error::Bridge(format!("failed to fetch light {id}: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Bridge(format!("bridge rejected fetch of {id}: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Bridge(format!("malformed state for {id}: {e}")))?;

        Ok(LightState {
            on: light.state.on,
            brightness: light.state.bri,
            color: light.state.xy,
        })
    }

    async fn apply(&self, id: &str, update: &LightUpdate) -> Result<()> {
        let body = WireUpdate {
            on: update.on,
            bri: update.brightness,
            xy: update.color,
        };

        self.client
            .put(self.url(&format!("lights/{id}/state")))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Bridge(format!("failed to update light {id}: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Bridge(format!("bridge rejected update of {id}: {e}")))?;

        tracing::debug!(id, ?update, "applied light update");
        Ok(())
    }
}
