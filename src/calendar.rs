//! Local-time rules for the date picker and the schedule views.
//!
//! All day boundaries are taken in the admin's configured UTC offset.
use crate::action::{Action, Menu, MenuButton};
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, SubsecRound, TimeZone, Utc,
};

/// Days offered by the date picker, starting with today.
pub const PICKER_DAYS: i64 = 14;
pub const MINUTES: [u32; 4] = [0, 15, 30, 45];

pub fn local_today(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Target of the "+2 minutes" fast path, truncated to the second.
pub fn quick_target(now: DateTime<Utc>) -> DateTime<Utc> {
    (now + Duration::minutes(2)).trunc_subsecs(0)
}

/// The UTC instant of a local wall-clock time.
pub fn resolve_local(
    date: NaiveDate,
    hour: u32,
    minute: u32,
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn local_midnight(date: NaiveDate, offset: FixedOffset) -> Option<DateTime<Utc>> {
    resolve_local(date, 0, 0, offset)
}

pub fn date_menu(today: NaiveDate) -> Menu {
    let days: Vec<MenuButton> = (0..PICKER_DAYS)
        .filter_map(|i| today.checked_add_signed(Duration::days(i)))
        .map(|d| MenuButton::new(d.format("%a %d %b").to_string(), Action::Date(d)))
        .collect();
    let mut menu: Menu = days.chunks(4).map(|row| row.to_vec()).collect();
    menu.push(vec![MenuButton::new("Cancel", Action::Cancel)]);
    menu
}

pub fn hour_menu() -> Menu {
    let hours: Vec<MenuButton> = (0..24)
        .map(|h| MenuButton::new(format!("{:02}", h), Action::Hour(h)))
        .collect();
    let mut menu: Menu = hours.chunks(6).map(|row| row.to_vec()).collect();
    menu.push(vec![MenuButton::new("Cancel", Action::Cancel)]);
    menu
}

pub fn minute_menu(hour: Option<u32>) -> Menu {
    let row = MINUTES
        .iter()
        .map(|m| {
            let label = match hour {
                Some(h) => format!("{:02}:{:02}", h, m),
                None => format!(":{:02}", m),
            };
            MenuButton::new(label, Action::Minute(*m))
        })
        .collect();
    vec![row, vec![MenuButton::new("Cancel", Action::Cancel)]]
}

/// Width of a schedule browsing view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSpan {
    Day,
    Week,
    Month,
}

impl ViewSpan {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewSpan::Day => "day",
            ViewSpan::Week => "week",
            ViewSpan::Month => "month",
        }
    }

    pub fn parse_span(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Some(ViewSpan::Day),
            "week" => Some(ViewSpan::Week),
            "month" => Some(ViewSpan::Month),
            _ => None,
        }
    }

    /// First local day of the period containing `date`. Weeks start on Monday.
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            ViewSpan::Day => date,
            ViewSpan::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            ViewSpan::Month => date.with_day(1).unwrap_or(date),
        }
    }

    /// First local day of the following period.
    pub fn next(&self, date: NaiveDate) -> NaiveDate {
        let start = self.period_start(date);
        match self {
            ViewSpan::Day => start + Duration::days(1),
            ViewSpan::Week => start + Duration::days(7),
            ViewSpan::Month => start.checked_add_months(Months::new(1)).unwrap_or(start),
        }
    }

    /// First local day of the preceding period.
    pub fn prev(&self, date: NaiveDate) -> NaiveDate {
        let start = self.period_start(date);
        match self {
            ViewSpan::Day => start - Duration::days(1),
            ViewSpan::Week => start - Duration::days(7),
            ViewSpan::Month => start.checked_sub_months(Months::new(1)).unwrap_or(start),
        }
    }

    /// Half-open UTC range `[from, to)` of the period containing `date`.
    pub fn range(&self, date: NaiveDate, offset: FixedOffset) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let from = local_midnight(self.period_start(date), offset)?;
        let to = local_midnight(self.next(date), offset)?;
        Some((from, to))
    }

    pub fn title(&self, date: NaiveDate) -> String {
        let start = self.period_start(date);
        match self {
            ViewSpan::Day => start.format("%A, %d %B %Y").to_string(),
            ViewSpan::Week => {
                let end = self.next(date) - Duration::days(1);
                format!("{} – {}", start.format("%d %b"), end.format("%d %b %Y"))
            }
            ViewSpan::Month => start.format("%B %Y").to_string(),
        }
    }

    pub fn navigation(&self, date: NaiveDate) -> Menu {
        let start = self.period_start(date);
        vec![
            vec![
                MenuButton::new("« Prev", Action::Schedule(*self, self.prev(date))),
                MenuButton::new("Next »", Action::Schedule(*self, self.next(date))),
            ],
            vec![
                MenuButton::new("Day", Action::Schedule(ViewSpan::Day, start)),
                MenuButton::new("Week", Action::Schedule(ViewSpan::Week, start)),
                MenuButton::new("Month", Action::Schedule(ViewSpan::Month, start)),
            ],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Offset;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn local_day_follows_the_offset() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let late_utc = Utc.with_ymd_and_hms(2026, 10, 16, 22, 30, 0).unwrap();
        assert_eq!(local_today(late_utc, offset), d(2026, 10, 17));
        assert_eq!(local_today(late_utc, Utc.fix()), d(2026, 10, 16));
    }

    #[test]
    fn resolve_local_converts_to_utc() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(
            resolve_local(d(2026, 3, 1), 23, 45, offset),
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 4, 45, 0).unwrap())
        );
        assert_eq!(resolve_local(d(2026, 3, 1), 24, 0, offset), None);
    }

    #[test]
    fn date_menu_offers_two_weeks_from_today() {
        let menu = date_menu(d(2026, 12, 25));
        let dates: Vec<Action> = menu.iter().flatten().map(|b| b.action).collect();
        assert_eq!(dates.first(), Some(&Action::Date(d(2026, 12, 25))));
        assert_eq!(dates[13], Action::Date(d(2027, 1, 7)));
        assert_eq!(dates.last(), Some(&Action::Cancel));
        assert_eq!(dates.len(), 15);
    }

    #[test]
    fn week_view_starts_on_monday() {
        // 2026-10-16 is a Friday.
        let (from, to) = ViewSpan::Week.range(d(2026, 10, 16), Utc.fix()).unwrap();
        assert_eq!(from, Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap());
        assert_eq!(ViewSpan::Week.prev(d(2026, 10, 16)), d(2026, 10, 5));
    }

    #[test]
    fn month_view_wraps_the_year() {
        assert_eq!(ViewSpan::Month.next(d(2026, 12, 31)), d(2027, 1, 1));
        assert_eq!(ViewSpan::Month.prev(d(2026, 1, 15)), d(2025, 12, 1));
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let (from, to) = ViewSpan::Month.range(d(2026, 2, 10), offset).unwrap();
        assert_eq!(from, Utc.with_ymd_and_hms(2026, 1, 31, 22, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2026, 2, 28, 22, 0, 0).unwrap());
    }
}
