//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the three devices a node owns:
//!     the tag reader, the RGB light and the start button.
//!     abstracts away the difference between running on a real Raspberry Pi
//!     (using `rppal`) and a development machine (using mocks).
//!
//! design philosophy:
//!     - "Compile Anywhere": The host should compile on Windows/Mac/Linux.
//!     - "Keep Running": A device that fails to open is logged once and
//!       replaced by a disabled device whose operations are no-ops.
//!
//! relationships:
//!     - used by: runtime.rs (opens devices), feedback.rs, sensor.rs, trigger.rs
//!     - uses: rppal (on feature="hardware")
//!     - uses: gpio.rs (python MFRC522 reader subprocess)
//!
//! ==============================================================================

use crate::config::HostConfig;
use crate::domain::{Rgb, TagReading};
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// proximity tag reader
pub trait TagSensor: Send {
    fn poll_once(&mut self) -> Result<TagReading>;
}

/// single RGB light, channels normalized to [0, 1]
pub trait Light: Send {
    fn set_rgb(&mut self, color: Rgb) -> Result<()>;
    fn off(&mut self) -> Result<()>;
}

/// digital input level (true = high)
pub trait DigitalInput: Send {
    fn read(&mut self) -> Result<bool>;
}

// ==============================================================================================
// DISABLED DEVICES (init failed, keep the node running)
// ==============================================================================================

pub struct DisabledSensor;

impl TagSensor for DisabledSensor {
    fn poll_once(&mut self) -> Result<TagReading> {
        Ok(TagReading::empty())
    }
}

pub struct DisabledLight;

impl Light for DisabledLight {
    fn set_rgb(&mut self, _color: Rgb) -> Result<()> {
        Ok(())
    }

    fn off(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct DisabledInput;

impl DigitalInput for DisabledInput {
    fn read(&mut self) -> Result<bool> {
        Ok(false)
    }
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For WSL / Non-Hardware Build, and tests)
// ==============================================================================================

/// tag reader whose current tag is set from outside
#[derive(Clone, Default)]
pub struct MockTagSensor {
    current: Arc<Mutex<Option<String>>>,
}

impl MockTagSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn present(&self, id: impl Into<String>) {
        *self.current.lock() = Some(id.into());
    }

    pub fn remove(&self) {
        *self.current.lock() = None;
    }
}

impl TagSensor for MockTagSensor {
    fn poll_once(&mut self) -> Result<TagReading> {
        Ok(TagReading { tag_id: self.current.lock().clone(), captured_at: None })
    }
}

/// light that remembers what it was told
#[derive(Clone, Default)]
pub struct MockLight {
    state: Arc<Mutex<MockLightState>>,
}

#[derive(Default)]
struct MockLightState {
    current: Option<Rgb>,
    writes: usize,
}

impl MockLight {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the light is off
    pub fn current(&self) -> Option<Rgb> {
        self.state.lock().current
    }

    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }
}

impl Light for MockLight {
    fn set_rgb(&mut self, color: Rgb) -> Result<()> {
        let mut state = self.state.lock();
        state.current = if color.is_off() { None } else { Some(color) };
        state.writes += 1;
        tracing::trace!("[MOCK LED] {:?}", color);
        Ok(())
    }

    fn off(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.current = None;
        state.writes += 1;
        Ok(())
    }
}

/// input whose level is set from outside
#[derive(Clone, Default)]
pub struct MockInput {
    level: Arc<Mutex<bool>>,
}

impl MockInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: bool) {
        *self.level.lock() = level;
    }
}

impl DigitalInput for MockInput {
    fn read(&mut self) -> Result<bool> {
        Ok(*self.level.lock())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================

#[cfg(feature = "hardware")]
mod pi {
    use super::{DigitalInput, Light};
    use crate::domain::Rgb;
    use anyhow::Result;
    use rppal::gpio::{Gpio, InputPin, OutputPin};

    const PWM_HZ: f64 = 200.0;

    /// common-cathode RGB LED on three pins, dimmed with software PWM
    pub struct PwmRgbLight {
        red: OutputPin,
        green: OutputPin,
        blue: OutputPin,
    }

    impl PwmRgbLight {
        pub fn open(red: u8, green: u8, blue: u8) -> Result<Self> {
            let gpio = Gpio::new()?;
            let mut light = Self {
                red: gpio.get(red)?.into_output(),
                green: gpio.get(green)?.into_output(),
                blue: gpio.get(blue)?.into_output(),
            };
            light.off()?;
            Ok(light)
        }

        fn drive(pin: &mut OutputPin, level: f32) -> Result<()> {
            if level <= 0.0 {
                pin.clear_pwm()?;
                pin.set_low();
            } else if level >= 1.0 {
                pin.clear_pwm()?;
                pin.set_high();
            } else {
                pin.set_pwm_frequency(PWM_HZ, level as f64)?;
            }
            Ok(())
        }
    }

    impl Light for PwmRgbLight {
        fn set_rgb(&mut self, color: Rgb) -> Result<()> {
            Self::drive(&mut self.red, color.r)?;
            Self::drive(&mut self.green, color.g)?;
            Self::drive(&mut self.blue, color.b)?;
            Ok(())
        }

        fn off(&mut self) -> Result<()> {
            self.set_rgb(Rgb::OFF)
        }
    }

    pub struct GpioButton {
        pin: InputPin,
    }

    impl GpioButton {
        pub fn open(pin: u8) -> Result<Self> {
            let gpio = Gpio::new()?;
            Ok(Self { pin: gpio.get(pin)?.into_input_pulldown() })
        }
    }

    impl DigitalInput for GpioButton {
        fn read(&mut self) -> Result<bool> {
            Ok(self.pin.is_high())
        }
    }
}

// ==============================================================================================
// DEVICE OPENING
// ==============================================================================================

/// open the node's light; never fails, falls back to a disabled light
#[cfg(feature = "hardware")]
pub fn open_light(config: &HostConfig) -> Box<dyn Light> {
    let leds = &config.leds;
    match pi::PwmRgbLight::open(leds.red_pin, leds.green_pin, leds.blue_pin) {
        Ok(light) => {
            tracing::info!(red = leds.red_pin, green = leds.green_pin, blue = leds.blue_pin, "RGB light ready");
            Box::new(light)
        }
        Err(e) => {
            tracing::error!("failed to initialize light, running without it: {:#}", e);
            Box::new(DisabledLight)
        }
    }
}

#[cfg(not(feature = "hardware"))]
pub fn open_light(_config: &HostConfig) -> Box<dyn Light> {
    tracing::info!("Using MOCK light (No hardware access)");
    Box::new(MockLight::new())
}

/// open the start button; never fails, falls back to a disabled input
#[cfg(feature = "hardware")]
pub fn open_button(config: &HostConfig) -> Box<dyn DigitalInput> {
    match pi::GpioButton::open(config.buzzer.gpio_pin) {
        Ok(button) => {
            tracing::info!(pin = config.buzzer.gpio_pin, "start button ready");
            Box::new(button)
        }
        Err(e) => {
            tracing::error!("failed to initialize start button, running without it: {:#}", e);
            Box::new(DisabledInput)
        }
    }
}

#[cfg(not(feature = "hardware"))]
pub fn open_button(_config: &HostConfig) -> Box<dyn DigitalInput> {
    tracing::info!("Using MOCK start button (No hardware access)");
    Box::new(MockInput::new())
}

/// open the tag reader selected by `[sensor].driver`
pub fn open_tag_sensor(config: &HostConfig) -> Box<dyn TagSensor> {
    match config.sensor.driver.as_str() {
        "mock" => {
            tracing::info!("Using MOCK tag sensor");
            Box::new(MockTagSensor::new())
        }
        "mfrc522" => match crate::gpio::Mfrc522Reader::spawn(&config.sensor.python, config.polling.sensor_interval_ms) {
            Ok(reader) => {
                tracing::info!("MFRC522 reader ready");
                Box::new(reader)
            }
            Err(e) => {
                tracing::error!("failed to initialize tag reader, running without it: {:#}", e);
                Box::new(DisabledSensor)
            }
        },
        other => {
            tracing::error!(driver = other, "unknown sensor driver, running without a tag reader");
            Box::new(DisabledSensor)
        }
    }
}
