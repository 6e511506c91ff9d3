// 🎓 Student Entity - raw rows from the source store and their cleansed form
//
// Cleansing order per row:
//   1. dob → age, age_group          (relative to the injected as-of date)
//   2. contact_info → email          (mapping, JSON or Python-literal;
//                                     keys other than email/mailing_address
//                                     have no merged column and are skipped)
//   3. mailing_address → street, city, state, zipcode
//   4. numeric references → f64
//   5. drop rows without num_course_taken / job_id   (identity gap)
//   6. fill current_career_path_id / time_spent_hrs with 0
//
// Pure: no I/O, no clock reads. Same input + same as-of = same output.

use crate::error::MalformedInput;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// contact_info keys that land in merged columns.
const CONTACT_KEYS: [&str; 2] = ["email", "mailing_address"];

// ============================================================================
// RAW RECORD
// ============================================================================

/// A student row exactly as read from the source store.
///
/// Numeric references are kept in their textual form: the source stores them
/// as integers, reals or text depending on how the row was loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStudentRecord {
    pub uuid: String,
    pub name: Option<String>,
    pub dob: String,
    pub sex: Option<String>,
    pub contact_info: String,
    /// Composite "street, city, state, zipcode". When the source has no such
    /// column the address is read from `contact_info.mailing_address`.
    pub mailing_address: Option<String>,
    pub job_id: Option<String>,
    pub num_course_taken: Option<String>,
    pub current_career_path_id: Option<String>,
    pub time_spent_hrs: Option<String>,
}

// ============================================================================
// CLEAN RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanStudentRecord {
    pub uuid: String,
    pub name: Option<String>,
    pub dob: NaiveDate,
    pub sex: Option<String>,
    pub job_id: f64,
    pub num_course_taken: f64,
    pub current_career_path_id: f64,
    pub time_spent_hrs: f64,
    pub age: i64,
    pub age_group: i64,
    pub email: Option<String>,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zipcode: String,
}

/// A row dropped because a linkage field could not be resolved.
/// Policy decision, not an error: the row is simply left out of this run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityGap {
    pub uuid: String,
    pub missing: Vec<String>,
}

/// Output of `cleanse_students`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentCleanse {
    pub records: Vec<CleanStudentRecord>,
    pub identity_gaps: Vec<IdentityGap>,
}

enum RowOutcome {
    Kept(CleanStudentRecord),
    Dropped(IdentityGap),
}

// ============================================================================
// CLEANSER
// ============================================================================

/// Cleanse a batch of raw students. The first malformed row aborts the batch.
pub fn cleanse_students(
    raw: &[RawStudentRecord],
    as_of: NaiveDate,
) -> Result<StudentCleanse, MalformedInput> {
    let mut out = StudentCleanse::default();

    for row in raw {
        match cleanse_student(row, as_of)? {
            RowOutcome::Kept(record) => out.records.push(record),
            RowOutcome::Dropped(gap) => out.identity_gaps.push(gap),
        }
    }

    Ok(out)
}

fn cleanse_student(raw: &RawStudentRecord, as_of: NaiveDate) -> Result<RowOutcome, MalformedInput> {
    let uuid = raw.uuid.as_str();

    // 1. age
    let dob = parse_dob(uuid, &raw.dob)?;
    let age = age_on(dob, as_of).ok_or_else(|| MalformedInput::Dob {
        uuid: uuid.to_string(),
        value: format!("{} (after as-of date {})", raw.dob, as_of),
    })?;
    let age_group = age / 10 * 10;

    // 2. contact info
    let contact = parse_contact_info(uuid, &raw.contact_info)?;
    let email = contact_text(&contact, "email");
    let ignored = ignored_contact_keys(&contact);
    if !ignored.is_empty() {
        debug!(uuid, ignored = ?ignored, "skipping contact_info keys without a merged column");
    }

    // 3. address
    let address = raw
        .mailing_address
        .clone()
        .or_else(|| contact_text(&contact, "mailing_address"))
        .unwrap_or_default();
    let [street, city, state, zipcode] = split_address(uuid, &address)?;

    // 4. numeric coercion
    let job_id = coerce_float(uuid, "job_id", raw.job_id.as_deref())?;
    let num_course_taken = coerce_float(uuid, "num_course_taken", raw.num_course_taken.as_deref())?;
    let current_career_path_id = coerce_float(
        uuid,
        "current_career_path_id",
        raw.current_career_path_id.as_deref(),
    )?;
    let time_spent_hrs = coerce_float(uuid, "time_spent_hrs", raw.time_spent_hrs.as_deref())?;

    // 5. unrecoverable linkage
    let (num_course_taken, job_id) = match (num_course_taken, job_id) {
        (Some(courses), Some(job)) => (courses, job),
        (courses, job) => {
            let mut missing = Vec::new();
            if courses.is_none() {
                missing.push("num_course_taken".to_string());
            }
            if job.is_none() {
                missing.push("job_id".to_string());
            }
            return Ok(RowOutcome::Dropped(IdentityGap {
                uuid: uuid.to_string(),
                missing,
            }));
        }
    };

    // 6. recoverable defaults
    Ok(RowOutcome::Kept(CleanStudentRecord {
        uuid: uuid.to_string(),
        name: raw.name.clone(),
        dob,
        sex: raw.sex.clone(),
        job_id,
        num_course_taken,
        current_career_path_id: current_career_path_id.unwrap_or(0.0),
        time_spent_hrs: time_spent_hrs.unwrap_or(0.0),
        age,
        age_group,
        email,
        street,
        city,
        state,
        zipcode,
    }))
}

// ============================================================================
// FIELD HELPERS
// ============================================================================

/// Accepts `YYYY-MM-DD`, optionally followed by a time part.
pub fn parse_dob(uuid: &str, raw: &str) -> Result<NaiveDate, MalformedInput> {
    let trimmed = raw.trim();
    let date_part = trimmed
        .split_once(|c: char| c == ' ' || c == 'T')
        .map(|(date, _)| date)
        .unwrap_or(trimmed);

    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| MalformedInput::Dob {
        uuid: uuid.to_string(),
        value: raw.to_string(),
    })
}

/// Completed years between `dob` and `as_of`; `None` if born after `as_of`.
pub fn age_on(dob: NaiveDate, as_of: NaiveDate) -> Option<i64> {
    if dob > as_of {
        return None;
    }

    let mut years = i64::from(as_of.year() - dob.year());
    if (as_of.month(), as_of.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    Some(years)
}

pub fn parse_contact_info(uuid: &str, raw: &str) -> Result<Map<String, Value>, MalformedInput> {
    let parsed: Value = serde_json::from_str(raw)
        .or_else(|err| {
            // Python-literal dicts: {'email': 'x@y.com'}
            serde_json::from_str(&python_literal_to_json(raw)).map_err(|_| err)
        })
        .map_err(|err| MalformedInput::ContactInfo {
            uuid: uuid.to_string(),
            reason: err.to_string(),
        })?;

    match parsed {
        Value::Object(map) => Ok(map),
        other => Err(MalformedInput::ContactInfo {
            uuid: uuid.to_string(),
            reason: format!("expected a mapping, found {}", json_kind(&other)),
        }),
    }
}

/// Rewrite a Python literal (`repr` of a dict) as JSON.
///
/// Strings may use either quote style; a `"` string can hold apostrophes and
/// vice versa. Outside strings, `None`/`True`/`False` become JSON keywords and
/// everything else is copied through.
pub fn python_literal_to_json(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let mut text = String::new();
                while let Some(next) = chars.next() {
                    match next {
                        '\\' => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some('r') => text.push('\r'),
                            Some(escaped) => text.push(escaped),
                            None => text.push('\\'),
                        },
                        q if q == c => break,
                        other => text.push(other),
                    }
                }
                // serializing a String cannot fail
                out.push_str(&serde_json::to_string(&text).unwrap_or_default());
            }
            c if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !next.is_ascii_alphanumeric() && next != '_' {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                out.push_str(match word.as_str() {
                    "None" => "null",
                    "True" => "true",
                    "False" => "false",
                    other => other,
                });
            }
            other => out.push(other),
        }
    }

    out
}

/// Keys of a contact mapping that no merged column takes, sorted.
pub fn ignored_contact_keys(contact: &Map<String, Value>) -> Vec<String> {
    let mut keys: Vec<String> = contact
        .keys()
        .filter(|k| !CONTACT_KEYS.contains(&k.as_str()))
        .cloned()
        .collect();
    keys.sort();
    keys
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

fn contact_text(contact: &Map<String, Value>, key: &str) -> Option<String> {
    match contact.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Split "street, city, state, zipcode" into its four trimmed parts.
pub fn split_address(uuid: &str, raw: &str) -> Result<[String; 4], MalformedInput> {
    let parts: Vec<String> = raw.split(',').map(|p| p.trim().to_string()).collect();

    <[String; 4]>::try_from(parts).map_err(|parts| MalformedInput::Address {
        uuid: uuid.to_string(),
        value: raw.to_string(),
        parts: parts.len(),
    })
}

/// Nullable float coercion. Empty text and the usual null spellings map to
/// `None`; anything else must parse as a number.
pub fn coerce_float(
    uuid: &str,
    column: &'static str,
    raw: Option<&str>,
) -> Result<Option<f64>, MalformedInput> {
    let Some(text) = raw.map(str::trim) else {
        return Ok(None);
    };

    if text.is_empty()
        || text.eq_ignore_ascii_case("nan")
        || text.eq_ignore_ascii_case("none")
        || text.eq_ignore_ascii_case("null")
    {
        return Ok(None);
    }

    match text.parse::<f64>() {
        Ok(value) if value.is_nan() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(MalformedInput::Numeric {
            uuid: uuid.to_string(),
            column,
            value: text.to_string(),
        }),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::fingerprint;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn raw_student(uuid: &str) -> RawStudentRecord {
        RawStudentRecord {
            uuid: uuid.to_string(),
            name: Some("Annabelle Avery".to_string()),
            dob: "1990-07-01".to_string(),
            sex: Some("F".to_string()),
            contact_info: r#"{"mailing_address": "303 N Timber Key, Irondale, Wisconsin, 84736", "email": "annabelle_avery9376@woohaa.com"}"#.to_string(),
            mailing_address: None,
            job_id: Some("7.0".to_string()),
            num_course_taken: Some("6.0".to_string()),
            current_career_path_id: Some("1.0".to_string()),
            time_spent_hrs: Some("4.99".to_string()),
        }
    }

    #[test]
    fn test_cleanse_complete_row() {
        let result = cleanse_students(&[raw_student("1")], as_of()).unwrap();

        assert_eq!(result.records.len(), 1);
        assert!(result.identity_gaps.is_empty());

        let s = &result.records[0];
        assert_eq!(s.age, 33); // birthday not reached yet on 2024-06-15
        assert_eq!(s.age_group, 30);
        assert_eq!(s.email.as_deref(), Some("annabelle_avery9376@woohaa.com"));
        assert_eq!(s.street, "303 N Timber Key");
        assert_eq!(s.city, "Irondale");
        assert_eq!(s.state, "Wisconsin");
        assert_eq!(s.zipcode, "84736");
        assert_eq!(s.job_id, 7.0);
        assert_eq!(s.num_course_taken, 6.0);
        assert_eq!(s.current_career_path_id, 1.0);
        assert_eq!(s.time_spent_hrs, 4.99);
    }

    #[test]
    fn test_null_num_course_taken_is_dropped() {
        let mut raw = raw_student("gap");
        raw.num_course_taken = None;

        let result = cleanse_students(&[raw, raw_student("ok")], as_of()).unwrap();

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].uuid, "ok");
        assert_eq!(
            result.identity_gaps,
            vec![IdentityGap {
                uuid: "gap".to_string(),
                missing: vec!["num_course_taken".to_string()],
            }]
        );
    }

    #[test]
    fn test_null_job_id_is_dropped() {
        let mut raw = raw_student("gap");
        raw.job_id = Some("".to_string());
        raw.num_course_taken = Some("nan".to_string());

        let result = cleanse_students(&[raw], as_of()).unwrap();

        assert!(result.records.is_empty());
        assert_eq!(result.identity_gaps[0].missing, vec!["num_course_taken", "job_id"]);
    }

    #[test]
    fn test_recoverable_nulls_filled_with_zero() {
        let mut raw = raw_student("1");
        raw.current_career_path_id = None;
        raw.time_spent_hrs = Some("None".to_string());

        let result = cleanse_students(&[raw], as_of()).unwrap();

        assert_eq!(result.records[0].current_career_path_id, 0.0);
        assert_eq!(result.records[0].time_spent_hrs, 0.0);
    }

    #[test]
    fn test_python_literal_contact_info() {
        let mut raw = raw_student("1");
        raw.contact_info =
            "{'mailing_address': '1 Main St, Springfield, Ohio, 12345', 'email': 'a@b.com'}".to_string();

        let result = cleanse_students(&[raw], as_of()).unwrap();

        assert_eq!(result.records[0].email.as_deref(), Some("a@b.com"));
        assert_eq!(result.records[0].city, "Springfield");
    }

    #[test]
    fn test_python_literal_with_apostrophe_in_double_quotes() {
        let mut raw = raw_student("p1");
        raw.contact_info = r#"{'mailing_address': "12 O'Hara St, Boston, Massachusetts, 02110", 'email': 'a@b.com'}"#.to_string();

        let result = cleanse_students(&[raw], as_of()).unwrap();

        assert_eq!(result.records[0].street, "12 O'Hara St");
        assert_eq!(result.records[0].city, "Boston");
        assert_eq!(result.records[0].email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn test_python_literal_escapes_and_keywords() {
        let json = python_literal_to_json(r#"{'note': 'it\'s "fine"', 'phone': None, 'verified': True}"#);

        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["note"], "it's \"fine\"");
        assert_eq!(parsed["phone"], Value::Null);
        assert_eq!(parsed["verified"], Value::Bool(true));
    }

    #[test]
    fn test_ignored_contact_keys() {
        let contact = parse_contact_info(
            "1",
            r#"{"phone": "555", "email": "a@b.com", "mailing_address": "x", "alt_email": "c@d.com"}"#,
        )
        .unwrap();

        assert_eq!(ignored_contact_keys(&contact), vec!["alt_email", "phone"]);
    }

    #[test]
    fn test_mailing_address_column_takes_precedence() {
        let mut raw = raw_student("1");
        raw.mailing_address = Some("9 Elm Rd, Dover, Delaware, 19901".to_string());

        let result = cleanse_students(&[raw], as_of()).unwrap();

        assert_eq!(result.records[0].street, "9 Elm Rd");
        assert_eq!(result.records[0].state, "Delaware");
    }

    #[test]
    fn test_malformed_contact_info_fails() {
        let mut raw = raw_student("bad");
        raw.contact_info = "[1, 2, 3]".to_string();

        let err = cleanse_students(&[raw], as_of()).unwrap_err();

        assert!(matches!(err, MalformedInput::ContactInfo { ref uuid, .. } if uuid == "bad"));
    }

    #[test]
    fn test_unparseable_contact_info_fails() {
        let mut raw = raw_student("bad");
        raw.contact_info = "not a mapping".to_string();

        assert!(matches!(
            cleanse_students(&[raw], as_of()),
            Err(MalformedInput::ContactInfo { .. })
        ));
    }

    #[test]
    fn test_malformed_address_fails() {
        let mut raw = raw_student("bad");
        raw.mailing_address = Some("1 Main St, Springfield, Ohio".to_string());

        let err = cleanse_students(&[raw], as_of()).unwrap_err();

        assert_eq!(
            err,
            MalformedInput::Address {
                uuid: "bad".to_string(),
                value: "1 Main St, Springfield, Ohio".to_string(),
                parts: 3,
            }
        );
    }

    #[test]
    fn test_malformed_row_aborts_whole_batch() {
        let mut bad = raw_student("bad");
        bad.dob = "01/02/1990".to_string();

        let result = cleanse_students(&[raw_student("ok"), bad], as_of());

        assert!(matches!(result, Err(MalformedInput::Dob { .. })));
    }

    #[test]
    fn test_non_numeric_reference_fails() {
        let mut raw = raw_student("bad");
        raw.job_id = Some("seven".to_string());

        let err = cleanse_students(&[raw], as_of()).unwrap_err();

        assert!(matches!(err, MalformedInput::Numeric { column: "job_id", .. }));
    }

    #[test]
    fn test_age_and_group_boundaries() {
        let dob = NaiveDate::from_ymd_opt(2004, 6, 15).unwrap();
        assert_eq!(age_on(dob, as_of()), Some(20));

        let dob = NaiveDate::from_ymd_opt(2004, 6, 16).unwrap();
        assert_eq!(age_on(dob, as_of()), Some(19));

        let future = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        assert_eq!(age_on(future, as_of()), None);
    }

    #[test]
    fn test_dob_with_time_component() {
        let date = parse_dob("1", "1990-07-01 00:00:00").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(1990, 7, 1).unwrap());
    }

    #[test]
    fn test_cleansing_is_deterministic() {
        let raw: Vec<_> = (0..5).map(|i| raw_student(&i.to_string())).collect();

        let first = cleanse_students(&raw, as_of()).unwrap();
        let second = cleanse_students(&raw, as_of()).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            fingerprint(&first.records).unwrap(),
            fingerprint(&second.records).unwrap()
        );
    }
}
