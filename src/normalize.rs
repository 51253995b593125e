use crate::classify::SyncError;
use dash_types::{KeyDefault, Record, Scalar, Table};
use lazy_regex::regex_captures;
use std::collections::BTreeSet;
use time::{Date, Duration, Month};

/// Largest day serial a spreadsheet can hold (9999-12-31).
const MAX_SHEET_SERIAL: f64 = 2_958_465.0;

/// Prepares records for transport to `table`.
///
/// Every returned record carries the same set of fields (absent ones become `Null`), fact
/// records lose their `id`, date fields become `YYYY-MM-DD` and natural-key fields are
/// non-empty. A record whose key cannot be completed fails the whole call before anything
/// is written.
pub fn normalize_all(table: Table, records: Vec<Record>) -> Result<Vec<Record>, SyncError> {
    let mut records = records
        .into_iter()
        .enumerate()
        .map(|(row, record)| normalize(table, record, row))
        .collect::<Result<Vec<_>, _>>()?;
    let fields: BTreeSet<String> = records
        .iter()
        .flat_map(|r| r.keys().cloned())
        .collect();
    for record in records.iter_mut() {
        for field in fields.iter() {
            if !record.contains_key(field) {
                record.insert(field.clone(), Scalar::Null);
            }
        }
    }
    Ok(records)
}

/// Normalizes one record; `row` is only used to position errors.
pub fn normalize(table: Table, mut record: Record, row: usize) -> Result<Record, SyncError> {
    if table.is_append_only() {
        record.remove("id");
    }
    for field in table.date_fields() {
        let Some(value) = record.get(*field) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let day = calendar_day(value).ok_or_else(|| SyncError::Validation {
            table,
            row: Some(row),
            message: format!("{field} {value} is not a recognisable date"),
        })?;
        record.insert(field.to_string(), Scalar::Text(day));
    }
    for field in table.conflict_key().fields() {
        let value = match record.value(field) {
            Scalar::Text(t) if !t.trim().is_empty() => Scalar::Text(t.trim().to_string()),
            v if !v.is_empty() => v.clone(),
            _ => match table.key_default(field) {
                Some(KeyDefault::Sentinel(s)) => Scalar::Text(s.to_string()),
                Some(KeyDefault::Generated) => Scalar::Text(uuid::Uuid::new_v4().to_string()),
                None => {
                    return Err(SyncError::Validation {
                        table,
                        row: Some(row),
                        message: format!("required key field {field} is empty"),
                    })
                }
            },
        };
        record.insert(field.to_string(), value);
    }
    Ok(record)
}

/// Calendar day of a date-like value as `YYYY-MM-DD`.
///
/// Accepts `Y-M-D`, `Y/M/D` and `Y.M.D` texts with an optional trailing time part, and
/// spreadsheet day serials (days since 1899-12-30, fraction is the time of day).
pub fn calendar_day(value: &Scalar) -> Option<String> {
    let date = match value {
        Scalar::Text(text) => {
            let (_, year, month, day) = regex_captures!(
                r"^\s*(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})(?:[T ].*)?\s*$",
                text
            )?;
            Date::from_calendar_date(
                year.parse().ok()?,
                Month::try_from(month.parse::<u8>().ok()?).ok()?,
                day.parse().ok()?,
            )
            .ok()?
        }
        Scalar::Number(n) => {
            let serial = n.as_f64()?;
            if !(1.0..=MAX_SHEET_SERIAL).contains(&serial) {
                return None;
            }
            Date::from_calendar_date(1899, Month::December, 30)
                .ok()?
                .checked_add(Duration::days(serial.floor() as i64))?
        }
        _ => return None,
    };
    let (year, month, day) = date.to_calendar_date();
    Some(format!("{year:04}-{:02}-{day:02}", month as u8))
}
