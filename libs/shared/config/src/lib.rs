use std::env;
use std::str::FromStr;

use chrono::{FixedOffset, Local, NaiveTime, Offset, Utc, Weekday};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub frontend_url: String,
    pub email_relay_url: Option<String>,
    pub directory_seed_path: Option<String>,
    pub port: u16,
    pub lifecycle: LifecycleConfig,
    pub scheduler: SchedulerSettings,
}

/// Upper bound for any minute-valued lifecycle threshold (one week).
pub const MAX_THRESHOLD_MINUTES: i64 = 7 * 24 * 60;

/// Upper bound for the booking lead-day range (two years).
pub const MAX_LEAD_DAYS: i64 = 2 * 366;

/// Thresholds and windows handed to the lifecycle engine at construction.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub max_distance_meters: u32,
    pub min_cancel_lead_minutes: i64,
    pub no_show_grace_minutes: i64,
    pub reminder_one_hour_window_minutes: i64,
    pub reminder_fifteen_min_window_minutes: i64,
    /// Zone in which `appointment_date` and `appointment_time` are interpreted.
    pub booking_timezone: FixedOffset,
    pub closed_weekdays: Vec<Weekday>,
    pub booking_lead_days_min: i64,
    pub booking_lead_days_max: i64,
    /// Inclusive start of the bookable time-of-day window.
    pub booking_window_start: NaiveTime,
    /// Exclusive end of the bookable time-of-day window.
    pub booking_window_end: NaiveTime,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_distance_meters: 500,
            min_cancel_lead_minutes: 15,
            no_show_grace_minutes: 15,
            reminder_one_hour_window_minutes: 60,
            reminder_fifteen_min_window_minutes: 15,
            booking_timezone: Local::now().offset().fix(),
            closed_weekdays: vec![Weekday::Sun],
            booking_lead_days_min: 1,
            booking_lead_days_max: 30,
            booking_window_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            booking_window_end: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or_default(),
        }
    }
}

impl LifecycleConfig {
    /// Defaults pinned to UTC instead of the host's local offset.
    pub fn utc() -> Self {
        Self {
            booking_timezone: Utc.fix(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();

        let booking_timezone = match env::var("BOOKING_TZ_OFFSET_MINUTES") {
            Ok(raw) => match raw.trim().parse::<i32>().ok().and_then(parse_offset_minutes) {
                Some(offset) => offset,
                None => {
                    warn!("BOOKING_TZ_OFFSET_MINUTES is not a valid offset ({}), using system-local", raw);
                    defaults.booking_timezone
                }
            },
            Err(_) => defaults.booking_timezone,
        };

        let closed_weekdays = match env::var("CLOSED_WEEKDAYS") {
            Ok(raw) => parse_weekdays(&raw).unwrap_or_else(|| {
                warn!("CLOSED_WEEKDAYS could not be parsed ({}), using default", raw);
                defaults.closed_weekdays.clone()
            }),
            Err(_) => defaults.closed_weekdays.clone(),
        };

        Self {
            max_distance_meters: env_parse("MAX_DISTANCE_METERS", defaults.max_distance_meters),
            min_cancel_lead_minutes: env_parse("MIN_CANCEL_LEAD_MINUTES", defaults.min_cancel_lead_minutes),
            no_show_grace_minutes: env_parse("NO_SHOW_GRACE_MINUTES", defaults.no_show_grace_minutes),
            reminder_one_hour_window_minutes: env_parse(
                "REMINDER_ONE_HOUR_WINDOW_MINUTES",
                defaults.reminder_one_hour_window_minutes,
            ),
            reminder_fifteen_min_window_minutes: env_parse(
                "REMINDER_FIFTEEN_MIN_WINDOW_MINUTES",
                defaults.reminder_fifteen_min_window_minutes,
            ),
            booking_timezone,
            closed_weekdays,
            booking_lead_days_min: env_parse("BOOKING_LEAD_DAYS_MIN", defaults.booking_lead_days_min),
            booking_lead_days_max: env_parse("BOOKING_LEAD_DAYS_MAX", defaults.booking_lead_days_max),
            booking_window_start: env_time("BOOKING_WINDOW_START", defaults.booking_window_start),
            booking_window_end: env_time("BOOKING_WINDOW_END", defaults.booking_window_end),
        }
        .clamped()
    }

    /// Pull every minute and day threshold into a range the date arithmetic
    /// cannot overflow on. Negative values become zero.
    pub fn clamped(mut self) -> Self {
        let minutes = |key: &str, value: i64| {
            let bounded = value.clamp(0, MAX_THRESHOLD_MINUTES);
            if bounded != value {
                warn!("{} = {} is out of range, using {}", key, value, bounded);
            }
            bounded
        };
        self.min_cancel_lead_minutes = minutes("MIN_CANCEL_LEAD_MINUTES", self.min_cancel_lead_minutes);
        self.no_show_grace_minutes = minutes("NO_SHOW_GRACE_MINUTES", self.no_show_grace_minutes);
        self.reminder_one_hour_window_minutes =
            minutes("REMINDER_ONE_HOUR_WINDOW_MINUTES", self.reminder_one_hour_window_minutes);
        self.reminder_fifteen_min_window_minutes =
            minutes("REMINDER_FIFTEEN_MIN_WINDOW_MINUTES", self.reminder_fifteen_min_window_minutes);

        let lead_max = self.booking_lead_days_max.clamp(0, MAX_LEAD_DAYS);
        let lead_min = self.booking_lead_days_min.clamp(0, lead_max);
        if (lead_min, lead_max) != (self.booking_lead_days_min, self.booking_lead_days_max) {
            warn!(
                "Booking lead days {}..{} out of range, using {}..{}",
                self.booking_lead_days_min, self.booking_lead_days_max, lead_min, lead_max
            );
        }
        self.booking_lead_days_min = lead_min;
        self.booking_lead_days_max = lead_max;
        self
    }
}

/// Cadences and batch size for the background sweeps.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub reminder_interval_seconds: u64,
    pub no_show_interval_seconds: u64,
    pub batch_size: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            reminder_interval_seconds: 300,
            no_show_interval_seconds: 900,
            batch_size: 100,
        }
    }
}

impl SchedulerSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reminder_interval_seconds: env_parse(
                "REMINDER_SWEEP_INTERVAL_SECONDS",
                defaults.reminder_interval_seconds,
            ),
            no_show_interval_seconds: env_parse(
                "NO_SHOW_SWEEP_INTERVAL_SECONDS",
                defaults.no_show_interval_seconds,
            ),
            batch_size: env_parse("SWEEP_BATCH_SIZE", defaults.batch_size),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| {
                    warn!("FRONTEND_URL not set, using default");
                    "http://localhost:3000".to_string()
                }),
            email_relay_url: env::var("EMAIL_RELAY_URL").ok().filter(|url| !url.is_empty()),
            directory_seed_path: env::var("DIRECTORY_SEED_PATH").ok().filter(|p| !p.is_empty()),
            port: env_parse("PORT", 3000),
            lifecycle: LifecycleConfig::from_env(),
            scheduler: SchedulerSettings::from_env(),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        if config.email_relay_url.is_none() {
            warn!("EMAIL_RELAY_URL not set, notifications will only be logged");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.jwt_secret.is_empty() && !self.frontend_url.is_empty()
    }

    /// Public link a patient can follow to cancel without signing in.
    pub fn cancel_url(&self, appointment_id: impl std::fmt::Display, token: &str) -> String {
        format!(
            "{}/cancel-appointment/{}?token={}",
            self.frontend_url.trim_end_matches('/'),
            appointment_id,
            token
        )
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {:?}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn env_time(key: &str, default: NaiveTime) -> NaiveTime {
    match env::var(key) {
        Ok(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").unwrap_or_else(|_| {
            warn!("{} is not HH:MM ({}), using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn parse_offset_minutes(minutes: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(minutes.checked_mul(60)?)
}

fn parse_weekdays(raw: &str) -> Option<Vec<Weekday>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Weekday::from_str(s).ok())
        .collect()
}
