//! Literal arguments for the date and time functions.
//!
//! See <https://sqlite.org/lang_datefunc.html> for the grammar.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::schema::{ModifierShape, TimeValueShape};

/// Julian day numbers the engine accepts (0000-01-01 to 9999-12-31).
const MAX_JULIAN_DAY: u32 = 5_373_484;

/// A day that exists in `month` of a non-leap year.
pub fn day_of<R: Rng + ?Sized>(rng: &mut R, month: u32) -> u32 {
    let last = match month {
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    };
    rng.gen_range(1..=last)
}

fn date<R: Rng + ?Sized>(rng: &mut R) -> String {
    let month = rng.gen_range(1..=12);
    format!(
        "{:04}-{:02}-{:02}",
        rng.gen_range(1..=9999),
        month,
        day_of(rng, month)
    )
}

fn hm<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{:02}:{:02}", rng.gen_range(0..24), rng.gen_range(0..60))
}

fn hms<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{}:{:02}", hm(rng), rng.gen_range(0..60))
}

fn hms_ms<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{}.{:03}", hms(rng), rng.gen_range(0..1000))
}

fn sign<R: Rng + ?Sized>(rng: &mut R) -> char {
    if rng.gen_bool(0.5) {
        '+'
    } else {
        '-'
    }
}

/// A random time value and the shape it was drawn from.
pub fn time_value<R: Rng + ?Sized>(rng: &mut R) -> (String, TimeValueShape) {
    let shape = *TimeValueShape::ALL
        .choose(rng)
        .unwrap_or(&TimeValueShape::Now);
    let value = match shape {
        TimeValueShape::Date => format!("'{}'", date(rng)),
        TimeValueShape::DateHm => format!("'{} {}'", date(rng), hm(rng)),
        TimeValueShape::DateHms => format!("'{} {}'", date(rng), hms(rng)),
        TimeValueShape::DateHmsMs => format!("'{} {}'", date(rng), hms_ms(rng)),
        TimeValueShape::DateTHm => format!("'{}T{}'", date(rng), hm(rng)),
        TimeValueShape::DateTHms => format!("'{}T{}'", date(rng), hms(rng)),
        TimeValueShape::DateTHmsMs => format!("'{}T{}'", date(rng), hms_ms(rng)),
        TimeValueShape::Hm => format!("'{}'", hm(rng)),
        TimeValueShape::Hms => format!("'{}'", hms(rng)),
        TimeValueShape::HmsMs => format!("'{}'", hms_ms(rng)),
        TimeValueShape::Now => "'now'".to_string(),
        TimeValueShape::JulianDay => rng.gen_range(0..=MAX_JULIAN_DAY).to_string(),
    };
    (value, shape)
}

/// A random modifier valid after a time value of shape `after`.
pub fn modifier<R: Rng + ?Sized>(rng: &mut R, after: TimeValueShape) -> String {
    let candidates: &[ModifierShape] = if after == TimeValueShape::JulianDay {
        &ModifierShape::NUMERIC_ONLY
    } else {
        &ModifierShape::ALL
    };
    let shape = *candidates.choose(rng).unwrap_or(&ModifierShape::Auto);
    let n: i32 = rng.gen_range(-1000..=1000);
    match shape {
        ModifierShape::Days => format!("'{n} day'"),
        ModifierShape::Hours => format!("'{n} hour'"),
        ModifierShape::Minutes => format!("'{n} minute'"),
        ModifierShape::Seconds => format!("'{n} second'"),
        ModifierShape::Months => format!("'{n} month'"),
        ModifierShape::Years => format!("'{n} year'"),
        ModifierShape::ShiftHm => format!("'{}{}'", sign(rng), hm(rng)),
        ModifierShape::ShiftHms => format!("'{}{}'", sign(rng), hms(rng)),
        ModifierShape::ShiftHmsMs => format!("'{}{}'", sign(rng), hms_ms(rng)),
        ModifierShape::ShiftDate => format!("'{}{}'", sign(rng), date(rng)),
        ModifierShape::ShiftDateHm => format!("'{}{} {}'", sign(rng), date(rng), hm(rng)),
        ModifierShape::ShiftDateHms => format!("'{}{} {}'", sign(rng), date(rng), hms(rng)),
        ModifierShape::ShiftDateHmsMs => {
            format!("'{}{} {}'", sign(rng), date(rng), hms_ms(rng))
        }
        ModifierShape::Weekday => format!("'weekday {}'", rng.gen_range(0..7)),
        _ => shape.keyword().unwrap_or("'auto'").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn days_exist_in_their_month() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..2_000 {
            let month = rng.gen_range(1..=12);
            let day = day_of(&mut rng, month);
            assert!(day >= 1);
            match month {
                2 => assert!(day <= 28),
                4 | 6 | 9 | 11 => assert!(day <= 30),
                _ => assert!(day <= 31),
            }
        }
    }

    #[test]
    fn julian_day_values_are_bare_numbers() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..2_000 {
            let (value, shape) = time_value(&mut rng);
            if shape == TimeValueShape::JulianDay {
                assert!(value.parse::<u32>().is_ok(), "{value}");
            } else {
                assert!(value.starts_with('\'') && value.ends_with('\''), "{value}");
            }
        }
    }

    #[test]
    fn numeric_time_values_only_take_numeric_modifiers() {
        let mut rng = StdRng::seed_from_u64(5);
        let allowed = ["'julianday'", "'auto'", "'localtime'", "'utc'"];
        for _ in 0..500 {
            let m = modifier(&mut rng, TimeValueShape::JulianDay);
            assert!(allowed.contains(&m.as_str()), "{m}");
        }
    }

    #[test]
    fn modifiers_are_quoted() {
        let mut rng = StdRng::seed_from_u64(6);
        for _ in 0..2_000 {
            let m = modifier(&mut rng, TimeValueShape::Date);
            assert!(m.len() > 2 && m.starts_with('\'') && m.ends_with('\''), "{m}");
        }
    }
}
