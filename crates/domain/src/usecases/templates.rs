//! Title and intro templates for recurring bonuses
//!
//! Dates are rendered in French, upper-cased, in Paris local time.

use time::macros::{offset, time};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Weekday};

use crate::model::BonusKind;

const DAYS_FR: [&str; 7] = [
    "lundi", "mardi", "mercredi", "jeudi", "vendredi", "samedi", "dimanche",
];

const MONTHS_FR: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];

/// Title and intro text with `{DATE}`, `{MONTH}` and `{RANK_MIN}` tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BonusTemplate {
    pub title: &'static str,
    pub intro: &'static str,
}

/// Template for a recurring bonus kind; drops have none
pub fn template_for(kind: BonusKind) -> Option<BonusTemplate> {
    let template = match kind {
        BonusKind::Drop => return None,
        BonusKind::Weekly => BonusTemplate {
            title: "BONUS HEBDOMADAIRE | {DATE}",
            intro: "Le bonus hebdomadaire est disponible à partir du rang {RANK_MIN}.",
        },
        BonusKind::Monthly => BonusTemplate {
            title: "BONUS MENSUEL | {MONTH}",
            intro: "Le bonus mensuel de {MONTH} est disponible à partir du rang {RANK_MIN}.",
        },
        BonusKind::PreMonthly => BonusTemplate {
            title: "BONUS PRÉ-MENSUEL | {MONTH}",
            intro: "Le bonus pré-mensuel est disponible à partir du rang {RANK_MIN}.",
        },
        BonusKind::PostMonthly => BonusTemplate {
            title: "BONUS POST-MENSUEL | {MONTH}",
            intro: "Le bonus post-mensuel est disponible à partir du rang {RANK_MIN}.",
        },
    };
    Some(template)
}

/// Substitute date, month and rank tokens
pub fn render_template(template: &str, now: OffsetDateTime, rank_min: &str) -> String {
    let local = paris_time(now);
    template
        .replace("{DATE}", &french_date(local))
        .replace("{MONTH}", &french_month(local))
        .replace("{RANK_MIN}", &rank_min.to_uppercase())
}

/// Convert a UTC instant to Paris local time (CET/CEST, EU daylight-saving rules)
pub fn paris_time(now: OffsetDateTime) -> OffsetDateTime {
    let utc = now.to_offset(offset!(UTC));
    if in_eu_summer_time(utc) {
        utc.to_offset(offset!(+2))
    } else {
        utc.to_offset(offset!(+1))
    }
}

// Summer time runs from 01:00 UTC on the last Sunday of March to 01:00 UTC
// on the last Sunday of October.
fn in_eu_summer_time(utc: OffsetDateTime) -> bool {
    let year = utc.year();
    let (Some(start), Some(end)) = (
        last_sunday(year, Month::March),
        last_sunday(year, Month::October),
    ) else {
        return false;
    };
    let start = PrimitiveDateTime::new(start, time!(1:00)).assume_utc();
    let end = PrimitiveDateTime::new(end, time!(1:00)).assume_utc();
    utc >= start && utc < end
}

fn last_sunday(year: i32, month: Month) -> Option<Date> {
    let last_day = Date::from_calendar_date(year, month, 31).ok()?;
    let back = last_day.weekday().number_days_from_sunday();
    last_day.checked_sub(time::Duration::days(i64::from(back)))
}

fn french_date(local: OffsetDateTime) -> String {
    let day = DAYS_FR[day_index(local.weekday())];
    let month = MONTHS_FR[usize::from(u8::from(local.month())) - 1];
    format!("{} {:02} {} {}", day, local.day(), month, local.year()).to_uppercase()
}

fn french_month(local: OffsetDateTime) -> String {
    let month = MONTHS_FR[usize::from(u8::from(local.month())) - 1];
    format!("{} {}", month, local.year()).to_uppercase()
}

fn day_index(weekday: Weekday) -> usize {
    usize::from(weekday.number_days_from_monday())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_summer_and_winter_offsets() {
        let summer = paris_time(datetime!(2026-07-14 12:00 UTC));
        assert_eq!(summer.offset(), offset!(+2));
        assert_eq!(summer.hour(), 14);

        let winter = paris_time(datetime!(2026-01-10 12:00 UTC));
        assert_eq!(winter.offset(), offset!(+1));
    }

    #[test]
    fn test_dst_boundaries() {
        // 2026: last Sunday of March is the 29th, of October the 25th
        assert_eq!(paris_time(datetime!(2026-03-29 00:59 UTC)).offset(), offset!(+1));
        assert_eq!(paris_time(datetime!(2026-03-29 01:00 UTC)).offset(), offset!(+2));
        assert_eq!(paris_time(datetime!(2026-10-25 00:59 UTC)).offset(), offset!(+2));
        assert_eq!(paris_time(datetime!(2026-10-25 01:00 UTC)).offset(), offset!(+1));
    }

    #[test]
    fn test_last_sunday_on_the_31st() {
        // October 2027 ends on a Sunday
        assert_eq!(
            last_sunday(2027, Month::October),
            Some(time::macros::date!(2027 - 10 - 31))
        );
        assert_eq!(
            last_sunday(2027, Month::March),
            Some(time::macros::date!(2027 - 03 - 28))
        );
        assert_eq!(paris_time(datetime!(2027-10-31 00:59 UTC)).offset(), offset!(+2));
        assert_eq!(paris_time(datetime!(2027-10-31 01:00 UTC)).offset(), offset!(+1));
    }

    #[test]
    fn test_render_weekly_template() {
        let template = template_for(BonusKind::Weekly).unwrap();
        let now = datetime!(2026-10-15 10:00 UTC);
        assert_eq!(
            render_template(template.title, now, "Bronze"),
            "BONUS HEBDOMADAIRE | JEUDI 15 OCTOBRE 2026"
        );
        assert!(render_template(template.intro, now, "Gold").contains("rang GOLD"));
    }

    #[test]
    fn test_month_rolls_over_in_paris_time() {
        // 23:30 UTC on the last day of February is already March in Paris
        let template = template_for(BonusKind::Monthly).unwrap();
        let now = datetime!(2026-02-28 23:30 UTC);
        assert_eq!(
            render_template(template.title, now, "Bronze"),
            "BONUS MENSUEL | MARS 2026"
        );
    }

    #[test]
    fn test_accented_month_is_uppercased() {
        let template = template_for(BonusKind::PostMonthly).unwrap();
        let now = datetime!(2026-02-03 09:00 UTC);
        assert_eq!(
            render_template(template.title, now, "Bronze"),
            "BONUS POST-MENSUEL | FÉVRIER 2026"
        );
    }

    #[test]
    fn test_drop_has_no_template() {
        assert!(template_for(BonusKind::Drop).is_none());
    }
}
