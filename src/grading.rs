use chrono::{Datelike, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Grade {
    pub grade: &'static str,
    pub remark: &'static str,
}

/// Inclusive lower bounds, evaluated high to low.
const GRADE_BANDS: [(f64, Grade); 8] = [
    (80.0, Grade { grade: "A1", remark: "Excellent" }),
    (75.0, Grade { grade: "B2", remark: "Very Good" }),
    (70.0, Grade { grade: "B3", remark: "Good" }),
    (64.0, Grade { grade: "C4", remark: "Credit" }),
    (60.0, Grade { grade: "C5", remark: "Credit" }),
    (55.0, Grade { grade: "C6", remark: "Credit" }),
    (50.0, Grade { grade: "D7", remark: "Pass" }),
    (45.0, Grade { grade: "E8", remark: "Pass" }),
];

const FAIL: Grade = Grade {
    grade: "F9",
    remark: "Fail",
};

/// Out-of-range totals are not rejected: above 100 is still A1, below 0 is F9.
pub fn grade_for(total: f64) -> Grade {
    GRADE_BANDS
        .iter()
        .find(|(min, _)| total >= *min)
        .map(|(_, g)| *g)
        .unwrap_or(FAIL)
}

pub fn ordinal_suffix(n: u32) -> &'static str {
    let j = n % 10;
    let k = n % 100;
    if j == 1 && k != 11 {
        "st"
    } else if j == 2 && k != 12 {
        "nd"
    } else if j == 3 && k != 13 {
        "rd"
    } else {
        "th"
    }
}

pub fn ordinal(n: u32) -> String {
    format!("{}{}", n, ordinal_suffix(n))
}

/// `2024-08-05` -> `August 5th, 2024`. Blank or unparseable input yields `missing`.
pub fn format_report_date(raw: &str, missing: &str) -> String {
    let t = raw.trim();
    if t.is_empty() {
        return missing.to_string();
    }
    let parsed = NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(t, "%Y/%m/%d"));
    match parsed {
        Ok(d) => format!(
            "{} {}, {}",
            d.format("%B"),
            ordinal(d.day()),
            d.year()
        ),
        Err(_) => missing.to_string(),
    }
}
