use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Datelike, Local, Timelike};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::types::{DeclaredType, RegisterValue};

/// A tagged value producer. Replaces the source implementation's map of
/// closures (Design Note §9): each variant owns exactly the mutable state it
/// needs (`Ramp`/`RandomIncrement`'s running `current`), so reconstructing a
/// generator from a persisted descriptor never needs to sniff a closure's
/// captured cells the way the Python GUI inspects `__closure__`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Generator {
    Constant(RegisterValue),
    RandomUniform { lo: f64, hi: f64 },
    RandomBool,
    RandomList { values: Vec<RegisterValue> },
    PeriodicBool { period: f64 },
    Ramp { step: f64, modulus: f64, current: f64 },
    RandomIncrement {
        step_lo: f64,
        step_hi: f64,
        max_cap: f64,
        current: f64,
    },
    Sine { amplitude: f64, offset: f64, frequency: f64 },
    TimeFull,
    TimeHms,
    TimeYmd,
    TimeHmOrMdhm { max: i64 },
    WeekdayFlag,
    BitComposite,
}

impl Generator {
    pub fn ramp(start: f64, step: f64, modulus: f64) -> Generator {
        Generator::Ramp {
            step,
            modulus,
            current: start,
        }
    }

    pub fn random_increment(start: f64, step_lo: f64, step_hi: f64, max_cap: f64) -> Generator {
        Generator::RandomIncrement {
            step_lo,
            step_hi,
            max_cap,
            current: start,
        }
    }

    fn is_integer_declared(declared: &DeclaredType) -> bool {
        !matches!(
            declared,
            DeclaredType::Float32 | DeclaredType::Float64 | DeclaredType::String { .. }
        )
    }

    /// Invoke the producer once. `now` drives both the interval comparison
    /// performed by the caller (`RegisterStore`) and the wall-clock reading
    /// generators named in §4.3a; it is not consulted for comparison here.
    pub fn tick(&mut self, now: SystemTime, declared: &DeclaredType) -> RegisterValue {
        match self {
            Generator::Constant(value) => value.clone(),
            Generator::RandomUniform { lo, hi } => {
                let mut rng = rand::thread_rng();
                let raw = if Self::is_integer_declared(declared) {
                    rng.gen_range(lo.round() as i64..=hi.round() as i64) as f64
                } else {
                    rng.gen_range(*lo..=*hi)
                };
                RegisterValue::coerce(raw, declared)
            }
            Generator::RandomBool => {
                let v = rand::thread_rng().gen_bool(0.5);
                RegisterValue::coerce(if v { 1.0 } else { 0.0 }, declared)
            }
            Generator::RandomList { values } => {
                let idx = rand::thread_rng().gen_range(0..values.len());
                values[idx].clone()
            }
            Generator::PeriodicBool { period } => {
                let secs = now
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs_f64()
                    .floor();
                let phase = secs.rem_euclid(*period);
                RegisterValue::coerce(if phase < period / 2.0 { 1.0 } else { 0.0 }, declared)
            }
            Generator::Ramp {
                step,
                modulus,
                current,
            } => {
                *current = (*current + *step).rem_euclid(*modulus);
                RegisterValue::coerce(*current, declared)
            }
            Generator::RandomIncrement {
                step_lo,
                step_hi,
                max_cap,
                current,
            } => {
                let step = rand::thread_rng().gen_range(*step_lo..=*step_hi);
                *current = (*current + step).min(*max_cap);
                RegisterValue::coerce(*current, declared)
            }
            Generator::Sine {
                amplitude,
                offset,
                frequency,
            } => {
                let secs = now
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs_f64();
                let raw = amplitude * (secs * frequency).sin() + offset;
                let raw = if Self::is_integer_declared(declared) {
                    raw.round()
                } else {
                    raw
                };
                RegisterValue::coerce(raw, declared)
            }
            Generator::TimeFull => {
                let secs = now
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs_f64()
                    .floor();
                RegisterValue::coerce(secs, declared)
            }
            Generator::TimeHms => {
                let local = Local::now();
                let raw = (local.hour() * 10000 + local.minute() * 100 + local.second()) as f64;
                RegisterValue::coerce(raw, declared)
            }
            Generator::TimeYmd => {
                let local = Local::now();
                let raw = (local.year() as u32 * 10000 + local.month() * 100 + local.day()) as f64;
                RegisterValue::coerce(raw, declared)
            }
            Generator::TimeHmOrMdhm { max } => {
                let local = Local::now();
                let raw = if *max <= 2359 {
                    (local.hour() * 100 + local.minute()) as f64
                } else if *max <= 12312359 {
                    (local.month() * 1_000_000 + local.day() * 10000 + local.hour() * 100 + local.minute())
                        as f64
                } else {
                    let secs = now
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs() as i64;
                    (secs.rem_euclid(*max + 1)) as f64
                };
                RegisterValue::coerce(raw, declared)
            }
            Generator::WeekdayFlag => {
                let is_weekday = Local::now().weekday().num_days_from_monday() < 5;
                RegisterValue::coerce(if is_weekday { 1.0 } else { 0.0 }, declared)
            }
            // The real value is synthesised by RegisterStore from the
            // entry's BitOverlay; the base entry contributes a literal 0.
            Generator::BitComposite => RegisterValue::coerce(0.0, declared),
        }
    }
}
