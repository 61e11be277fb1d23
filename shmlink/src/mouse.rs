//! Relative mouse motion from a pointer channel.
//!
//! The producer publishes absolute per-update deltas (`x`, `y`) and raises
//! `changed`. [`MouseSource::poll`] consumes the update and turns it into
//! relative motion reports. A report carries at most
//! [`MOTION_DELTA_LIMIT`] per axis; the excess is kept and drained on later
//! polls, one report per poll.
//!
//! A delta is only picked up when it differs from the previous one on that
//! axis, so a producer repeating the same value publishes nothing new.

use crate::channel::SharedStructChannel;
use crate::error::ShmResult;
use serde::{Deserialize, Serialize};
use shmlink_common::config::ConfigError;
use shmlink_common::consts::{DEFAULT_POLL_INTERVAL_MS, MOTION_DELTA_LIMIT};
use std::time::Duration;
use tracing::{debug, trace};

/// Consumer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MouseConfig {
    /// Delay between polls in milliseconds
    pub poll_interval_ms: u64,
    /// Horizontal delta field
    pub x_field: String,
    /// Vertical delta field
    pub y_field: String,
    /// Update flag field
    pub flag_field: String,
    /// Optional button mask field
    pub buttons_field: Option<String>,
    /// Largest per-axis motion in one report
    pub motion_limit: i64,
}

impl Default for MouseConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            x_field: "x".to_string(),
            y_field: "y".to_string(),
            flag_field: "changed".to_string(),
            buttons_field: None,
            motion_limit: MOTION_DELTA_LIMIT as i64,
        }
    }
}

impl MouseConfig {
    /// Poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `poll_interval_ms` or
    /// `motion_limit` is not positive, or a field name is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.motion_limit <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "motion_limit must be positive, got {}",
                self.motion_limit
            )));
        }
        let names = [&self.x_field, &self.y_field, &self.flag_field];
        if names.iter().any(|n| n.is_empty()) || self.buttons_field.as_deref() == Some("") {
            return Err(ConfigError::ValidationError(
                "mouse field names cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Relative pointer motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionEvent {
    /// Horizontal motion, within the motion limit
    pub xrel: i64,
    /// Vertical motion, within the motion limit
    pub yrel: i64,
}

/// Event produced by [`MouseSource::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEvent {
    /// Pointer moved
    Motion(MotionEvent),
    /// Button mask changed to the given value
    Buttons(i64),
}

/// Take up to `limit` from `remaining` toward zero.
pub fn drain_axis(remaining: &mut i64, limit: i64) -> i64 {
    let step = (*remaining).clamp(-limit, limit);
    *remaining -= step;
    step
}

/// Consumer side of a pointer channel.
pub struct MouseSource {
    channel: SharedStructChannel,
    config: MouseConfig,
    last_x: i64,
    last_y: i64,
    last_buttons: i64,
    remaining_x: i64,
    remaining_y: i64,
}

impl MouseSource {
    /// Wrap `channel` and discard any update pending from before we started.
    ///
    /// # Errors
    ///
    /// `UnknownField` if the channel's layout lacks a configured field.
    pub fn new(channel: SharedStructChannel, config: MouseConfig) -> ShmResult<Self> {
        config.validate()?;
        let layout = channel.layout();
        layout.field(&config.x_field)?;
        layout.field(&config.y_field)?;
        if let Some(buttons) = &config.buttons_field {
            layout.field(buttons)?;
        }

        channel.write_field(&config.flag_field, 0)?;
        debug!(key = channel.key(), "cleared pending pointer update");

        Ok(Self {
            channel,
            config,
            last_x: 0,
            last_y: 0,
            last_buttons: 0,
            remaining_x: 0,
            remaining_y: 0,
        })
    }

    /// Underlying channel
    pub fn channel(&self) -> &SharedStructChannel {
        &self.channel
    }

    /// Release the channel.
    pub fn into_channel(self) -> SharedStructChannel {
        self.channel
    }

    /// Settings in use
    pub fn config(&self) -> &MouseConfig {
        &self.config
    }

    /// Motion still owed on each axis.
    pub fn pending(&self) -> (i64, i64) {
        (self.remaining_x, self.remaining_y)
    }

    /// Consume any pending update and emit at most one button and one
    /// motion event.
    pub fn poll(&mut self) -> ShmResult<Vec<MouseEvent>> {
        let mut events = Vec::with_capacity(2);

        if let Some(update) = self.channel.take_update(&self.config.flag_field)? {
            if let Some(buttons_field) = &self.config.buttons_field {
                let buttons = update.get(buttons_field)?;
                if buttons != self.last_buttons {
                    self.last_buttons = buttons;
                    events.push(MouseEvent::Buttons(buttons));
                }
            }

            let x = update.get(&self.config.x_field)?;
            if x != self.last_x {
                self.remaining_x = x;
                self.last_x = x;
            }
            let y = update.get(&self.config.y_field)?;
            if y != self.last_y {
                self.remaining_y = y;
                self.last_y = y;
            }
            trace!(x, y, "pointer update consumed");
        }

        if self.remaining_x != 0 || self.remaining_y != 0 {
            let limit = self.config.motion_limit;
            events.push(MouseEvent::Motion(MotionEvent {
                xrel: drain_axis(&mut self.remaining_x, limit),
                yrel: drain_axis(&mut self.remaining_y, limit),
            }));
        }

        Ok(events)
    }
}
