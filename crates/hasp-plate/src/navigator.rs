//! Page navigation and idle dimming
//!
//! Both halves are plain state: they decide what the plate should look like
//! and leave the publishing to [`Plate`](crate::Plate).

use crate::error::{PlateError, PlateResult};
use hasp_config::{BrightnessRange, PagesConfig, PlateConfig};
use hasp_core::message::IdleState;
use hasp_core::ObjectId;

/// Page the panel shows after `clear_page` or an out of range restore
pub const HOME_PAGE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavButton {
    Prev,
    Home,
    Next,
}

#[derive(Debug)]
pub struct PageNavigator {
    current: u32,
    num_pages: u32,
    buttons: Vec<(ObjectId, NavButton)>,
}

impl PageNavigator {
    pub fn new(pages: &PagesConfig) -> Self {
        let buttons = [
            (pages.prev_obj, NavButton::Prev),
            (pages.home_obj, NavButton::Home),
            (pages.next_obj, NavButton::Next),
        ]
        .into_iter()
        .filter_map(|(obj, button)| obj.map(|obj| (obj, button)))
        .collect();

        Self {
            current: HOME_PAGE,
            num_pages: pages.max.max(1),
            buttons,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Configured navigation widgets
    pub fn buttons(&self) -> impl Iterator<Item = (ObjectId, NavButton)> + '_ {
        self.buttons.iter().copied()
    }

    pub fn validate(&self, page: u32) -> PlateResult<u32> {
        if (HOME_PAGE..=self.num_pages).contains(&page) {
            Ok(page)
        } else {
            Err(PlateError::InvalidPage {
                page,
                max: self.num_pages,
            })
        }
    }

    /// Move to `page`; the current page is untouched on error
    pub fn change_page(&mut self, page: u32) -> PlateResult<u32> {
        self.current = self.validate(page)?;
        Ok(self.current)
    }

    /// Page a navigation button leads to, possibly out of range
    pub fn target(&self, button: NavButton) -> u32 {
        match button {
            NavButton::Prev => self.current.saturating_sub(1),
            NavButton::Home => HOME_PAGE,
            NavButton::Next => self.current.saturating_add(1),
        }
    }

    /// Adopt the page count a plate reported; zero is ignored
    pub fn set_num_pages(&mut self, num_pages: u32) {
        if num_pages >= HOME_PAGE {
            self.num_pages = num_pages;
        }
    }

    /// Go back home if the current page no longer exists
    pub fn revalidate(&mut self) -> bool {
        if self.current > self.num_pages {
            self.current = HOME_PAGE;
            true
        } else {
            false
        }
    }
}

/// Dim level and backlight flag driven by the panel's idle state
#[derive(Debug)]
pub struct IdleDim {
    idle: IdleState,
    dim: u32,
    backlight: bool,
    idle_brightness: u32,
    awake_brightness: u32,
    range: BrightnessRange,
}

impl IdleDim {
    pub fn new(config: &PlateConfig) -> Self {
        Self {
            idle: IdleState::Off,
            dim: config.awake_brightness,
            backlight: true,
            idle_brightness: config.idle_brightness,
            awake_brightness: config.awake_brightness,
            range: config.brightness_range,
        }
    }

    pub fn idle(&self) -> IdleState {
        self.idle
    }

    pub fn dim(&self) -> u32 {
        self.dim
    }

    pub fn backlight(&self) -> bool {
        self.backlight
    }

    pub fn awake_brightness(&self) -> u32 {
        self.awake_brightness
    }

    /// Restore a persisted level, clamped into the configured range
    pub fn restore(&mut self, dim: u32, backlight: bool) {
        self.dim = dim.clamp(self.range.min, self.range.max);
        self.backlight = backlight;
    }

    /// Apply an idle report, returning the (dim, backlight) pair to publish
    pub fn on_idle(&mut self, idle: IdleState) -> (u32, bool) {
        self.idle = idle;
        match idle {
            IdleState::Off => {
                self.dim = self.awake_brightness;
                self.backlight = true;
            }
            IdleState::Short => {
                self.dim = self.idle_brightness;
                self.backlight = true;
            }
            IdleState::Long => {
                self.backlight = false;
            }
        }
        (self.dim, self.backlight)
    }

    /// The `backlight` service: switch the light and optionally set the awake level
    pub fn set_backlight(&mut self, on: bool, brightness: Option<u32>) -> PlateResult<(u32, bool)> {
        if let Some(brightness) = brightness {
            if !self.range.contains(brightness) {
                return Err(PlateError::InvalidCommand {
                    service: "backlight".to_string(),
                    reason: format!(
                        "brightness {brightness} is outside {}..={}",
                        self.range.min, self.range.max
                    ),
                });
            }
            self.awake_brightness = brightness;
        }

        self.backlight = on;
        if on {
            self.dim = self.awake_brightness;
        }
        Ok((self.dim, self.backlight))
    }
}

/// Payload of `<base>/command/light`
pub fn light_payload(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}
