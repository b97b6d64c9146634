//! Shared test doubles
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use candela::bridge::{Capabilities, LightBridge, LightInfo, LightState, LightUpdate};
use candela::events::AudioClip;
use candela::voice::stt::{Alternative, SpeechService};
use candela::{Error, Result};

/// In-memory bridge with scripted lights and an op log
pub struct MockBridge {
    lights: Mutex<HashMap<String, (LightInfo, LightState)>>,
    fail: Mutex<bool>,
    applied: Mutex<Vec<(String, LightUpdate)>>,
}

impl MockBridge {
    pub fn new() -> Self {
        Self {
            lights: Mutex::new(HashMap::new()),
            fail: Mutex::new(false),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Add a dimmable light
    pub fn add_light(&self, id: &str, name: &str, on: bool, brightness: Option<u8>) {
        let info = LightInfo {
            id: id.to_string(),
            name: name.to_string(),
            capabilities: Capabilities {
                brightness: true,
                color: false,
            },
        };
        let state = LightState {
            on,
            brightness,
            color: None,
        };
        self.lights
            .lock()
            .expect("lock")
            .insert(id.to_string(), (info, state));
    }

    pub fn state(&self, id: &str) -> LightState {
        self.lights.lock().expect("lock")[id].1.clone()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().expect("lock") = fail;
    }

    pub fn applied(&self) -> Vec<(String, LightUpdate)> {
        self.applied.lock().expect("lock").clone()
    }

    fn check(&self) -> Result<()> {
        if *self.fail.lock().expect("lock") {
            return Err(Error::Bridge("mock bridge down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LightBridge for MockBridge {
    async fn list_lights(&self) -> Result<HashMap<String, LightInfo>> {
        self.check()?;
        Ok(self
            .lights
            .lock()
            .expect("lock")
            .values()
            .map(|(info, _)| (info.name.clone(), info.clone()))
            .collect())
    }

    async fn get_state(&self, id: &str) -> Result<LightState> {
        self.check()?;
        self.lights
            .lock()
            .expect("lock")
            .get(id)
            .map(|(_, state)| state.clone())
            .ok_or_else(|| Error::Bridge(format!("no such light {id}")))
    }

    async fn apply(&self, id: &str, update: &LightUpdate) -> Result<()> {
        self.check()?;
        let mut lights = self.lights.lock().expect("lock");
        let (_, state) = lights
            .get_mut(id)
            .ok_or_else(|| Error::Bridge(format!("no such light {id}")))?;

        if let Some(on) = update.on {
            state.on = on;
        }
        if let Some(brightness) = update.brightness {
            state.brightness = Some(brightness);
        }
        if let Some(color) = update.color {
            state.color = Some(color);
        }

        self.applied
            .lock()
            .expect("lock")
            .push((id.to_string(), update.clone()));
        Ok(())
    }
}

/// Speech service returning a scripted queue of outcomes
pub struct MockSpeechService {
    script: Mutex<Vec<Result<Vec<Alternative>>>>,
}

impl MockSpeechService {
    pub fn new(script: Vec<Result<Vec<Alternative>>>) -> Self {
        Self {
            script: Mutex::new(script),
        }
    }

    pub fn hearing(text: &str, confidence: f32) -> Result<Vec<Alternative>> {
        Ok(vec![Alternative {
            text: text.to_string(),
            confidence,
        }])
    }
}

#[async_trait]
impl SpeechService for MockSpeechService {
    async fn recognize(&self, _clip: &AudioClip) -> Result<Vec<Alternative>> {
        let mut script = self.script.lock().expect("lock");
        if script.is_empty() {
            return Err(Error::NotUnderstood);
        }
        script.remove(0)
    }
}

/// A clip of silence, long enough to be plausible
pub fn silent_clip() -> AudioClip {
    AudioClip::new(vec![0; 16_000], 16_000)
}
