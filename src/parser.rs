// 🧾 Ledger Line Parser
// Turns pasted wallet-journal lines from the game client into transaction candidates.
//
// Expected shape (tab separated):
//   Date  Quantity  ItemName  UnitPrice  TotalPrice  Buyer  [Location  [Corporation  [Wallet]]]
//   2025.07.04 10:58  357  Isogen  699 ISK  -249,543 ISK  Shocker Killer  Some Station

use chrono::{NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entities::NewTransaction;

/// Minimum number of tab-separated fields for a usable line
pub const MIN_FIELDS: usize = 6;

/// Largest quantity storage can hold
pub const MAX_QUANTITY: u64 = i64::MAX as u64;

/// Source date format of the game client export
const SOURCE_DATE_FORMAT: &str = "%Y.%m.%d %H:%M";

// ============================================================================
// TRANSACTION CANDIDATE
// ============================================================================

/// TransactionCandidate - one parsed (not yet persisted) ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCandidate {
    /// ISO-8601, UTC (`2025-07-04T10:58:00.000Z`)
    pub date: String,
    pub quantity: u64,
    pub item_name: String,
    /// Sign preserved from the source until consolidation
    pub unit_price: f64,
    pub total_price: f64,
    pub buyer: String,
    pub location: String,
    pub corporation: String,
    pub wallet: String,

    // Pipeline state (never persisted)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_job_id: Option<String>,
    pub is_duplicate: bool,
}

impl TransactionCandidate {
    /// Projection written through the repository
    pub fn to_new_transaction(&self) -> NewTransaction {
        NewTransaction {
            date: self.date.clone(),
            quantity: self.quantity,
            item_name: self.item_name.clone(),
            unit_price: self.unit_price,
            total_price: self.total_price,
            buyer: self.buyer.clone(),
            location: self.location.clone(),
            corporation: self.corporation.clone(),
            wallet: self.wallet.clone(),
        }
        .normalized()
    }

    /// Submittable = assigned to a job and not already stored
    pub fn is_submittable(&self) -> bool {
        !self.is_duplicate && self.assigned_job_id.is_some()
    }
}

// ============================================================================
// FIELD PARSERS
// ============================================================================

/// Parse an ISK amount like `-249,543 ISK` or `1,250.50 isk`
///
/// Strips the currency suffix, whitespace and thousands separators and keeps
/// a leading minus sign. Returns `None` when what is left is not a number.
pub fn parse_isk_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let without_unit = match trimmed.len().checked_sub(3).and_then(|at| trimmed.get(at..)) {
        Some(suffix) if suffix.eq_ignore_ascii_case("isk") => &trimmed[..trimmed.len() - 3],
        _ => trimmed,
    };

    let cleaned: String = without_unit
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();

    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.as_str()),
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let value: f64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Parse a quantity with thousands separators; zero and values above
/// `MAX_QUANTITY` are rejected
pub fn parse_quantity(raw: &str) -> Option<u64> {
    raw.trim()
        .replace(',', "")
        .parse::<u64>()
        .ok()
        .filter(|quantity| (1..=MAX_QUANTITY).contains(quantity))
}

/// Convert `YYYY.MM.DD HH:MM` (game time, UTC) into an ISO-8601 string
pub fn parse_game_date(raw: &str) -> Option<String> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), SOURCE_DATE_FORMAT).ok()?;
    Some(
        Utc.from_utc_datetime(&naive)
            .to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

/// `2400` → `2,400`
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

/// Format an amount the way the game client shows it: `-1,234.5 ISK`
pub fn format_isk(amount: f64) -> String {
    let sign = if amount < 0.0 { "-" } else { "" };
    let rounded = (amount.abs() * 100.0).round() / 100.0;
    let whole = rounded.trunc() as u64;
    let cents = ((rounded - rounded.trunc()) * 100.0).round() as u64;

    let grouped = group_thousands(whole);

    let fraction = match cents {
        0 => String::new(),
        c if c % 10 == 0 => format!(".{}", c / 10),
        c => format!(".{:02}", c),
    };

    format!("{}{}{} ISK", sign, grouped, fraction)
}

// ============================================================================
// LINE PARSER
// ============================================================================

/// Parse one pasted line. Malformed lines yield `None`, never an error.
pub fn parse_line(line: &str) -> Option<TransactionCandidate> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }

    let text = |index: usize| -> String {
        fields
            .get(index)
            .map(|value| value.trim().to_string())
            .unwrap_or_default()
    };

    let date = parse_game_date(fields[0])?;
    let quantity = parse_quantity(fields[1])?;
    let item_name = fields[2].trim().to_string();
    if item_name.is_empty() {
        return None;
    }
    let unit_price = parse_isk_amount(fields[3])?;
    let total_price = parse_isk_amount(fields[4])?;

    Some(TransactionCandidate {
        date,
        quantity,
        item_name,
        unit_price,
        total_price,
        buyer: text(5),
        location: text(6),
        corporation: text(7),
        wallet: text(8),
        assigned_job_id: None,
        is_duplicate: false,
    })
}

/// Result of parsing a whole paste
#[derive(Debug, Clone, Default)]
pub struct PasteParse {
    pub candidates: Vec<TransactionCandidate>,
    /// 1-based line numbers that could not be parsed
    pub skipped_lines: Vec<usize>,
}

/// Parse every non-blank line independently, keeping track of skipped ones
pub fn parse_paste_with_report(text: &str) -> PasteParse {
    let mut report = PasteParse::default();

    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(candidate) => report.candidates.push(candidate),
            None => {
                debug!(line_number = index + 1, "Skipping unparseable ledger line");
                report.skipped_lines.push(index + 1);
            }
        }
    }

    report
}

/// Parse a paste, dropping malformed lines
pub fn parse_paste(text: &str) -> Vec<TransactionCandidate> {
    parse_paste_with_report(text).candidates
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ISOGEN_LINE: &str =
        "2025.07.04 10:58\t357\tIsogen\t699 ISK\t-249,543 ISK\tShocker Killer\tSome Station";

    #[test]
    fn test_parse_line_example() {
        let tx = parse_line(ISOGEN_LINE).expect("line should parse");

        assert_eq!(tx.date, "2025-07-04T10:58:00.000Z");
        assert_eq!(tx.quantity, 357);
        assert_eq!(tx.item_name, "Isogen");
        assert_eq!(tx.unit_price, 699.0);
        assert_eq!(tx.total_price, -249543.0);
        assert_eq!(tx.buyer, "Shocker Killer");
        assert_eq!(tx.location, "Some Station");
        assert_eq!(tx.corporation, "");
        assert_eq!(tx.wallet, "");
        assert!(!tx.is_duplicate);
        assert!(tx.assigned_job_id.is_none());
    }

    #[test]
    fn test_parse_line_full_width() {
        let line = "2025.07.04 10:58\t1,000\t Tritanium \t5.50 ISK\t5,500 ISK\tBuyer\tJita IV\tPrimorium\tMaster Wallet\r";
        let tx = parse_line(line).unwrap();

        assert_eq!(tx.quantity, 1000);
        assert_eq!(tx.item_name, "Tritanium");
        assert_eq!(tx.unit_price, 5.5);
        assert_eq!(tx.corporation, "Primorium");
        assert_eq!(tx.wallet, "Master Wallet");
    }

    #[test]
    fn test_parse_line_rejects_short_lines() {
        assert!(parse_line("2025.07.04 10:58\t357\tIsogen\t699 ISK").is_none());
        assert!(parse_line("").is_none());
    }

    #[test]
    fn test_parse_line_rejects_bad_fields() {
        // Non-numeric date
        assert!(parse_line("2025.xx.04 10:58\t357\tIsogen\t699 ISK\t249,543 ISK\tB").is_none());
        // Non-numeric quantity
        assert!(parse_line("2025.07.04 10:58\tmany\tIsogen\t699 ISK\t249,543 ISK\tB").is_none());
        // Zero quantity
        assert!(parse_line("2025.07.04 10:58\t0\tIsogen\t699 ISK\t0 ISK\tB").is_none());
        // Quantity too large to store
        assert!(parse_line("2025.07.04 10:58\t18446744073709551615\tIsogen\t1 ISK\t-5 ISK\tB").is_none());
        // Non-numeric price
        assert!(parse_line("2025.07.04 10:58\t357\tIsogen\tfree\t249,543 ISK\tB").is_none());
        // Empty item name
        assert!(parse_line("2025.07.04 10:58\t357\t  \t699 ISK\t249,543 ISK\tB").is_none());
    }

    #[test]
    fn test_parse_isk_amount() {
        assert_eq!(parse_isk_amount("-249,543 ISK"), Some(-249543.0));
        assert_eq!(parse_isk_amount("1,250.50 isk"), Some(1250.5));
        assert_eq!(parse_isk_amount("  699  "), Some(699.0));
        assert_eq!(parse_isk_amount("ISK"), None);
        assert_eq!(parse_isk_amount("12a ISK"), None);
        assert_eq!(parse_isk_amount("--5 ISK"), None);
    }

    #[test]
    fn test_malformed_line_tolerance() {
        let paste = format!(
            "{}\n2025.07.04 11:00\t10\tPyerite\t12 ISK\n{}",
            ISOGEN_LINE,
            ISOGEN_LINE.replace("357", "12")
        );

        let report = parse_paste_with_report(&paste);

        assert_eq!(report.candidates.len(), 2);
        assert_eq!(report.skipped_lines, vec![2]);
        assert_eq!(parse_paste(&paste).len(), 2);
    }

    #[test]
    fn test_parse_paste_ignores_blank_lines() {
        let paste = format!("\n{}\n\n   \n", ISOGEN_LINE);
        let report = parse_paste_with_report(&paste);
        assert_eq!(report.candidates.len(), 1);
        assert!(report.skipped_lines.is_empty());
    }

    #[test]
    fn test_new_transaction_projection_is_positive() {
        let tx = parse_line(ISOGEN_LINE).unwrap().to_new_transaction();
        assert_eq!(tx.total_price, 249543.0);
        assert_eq!(tx.unit_price, 699.0);
    }

    #[test]
    fn test_format_isk() {
        assert_eq!(format_isk(-1234.5), "-1,234.5 ISK");
        assert_eq!(format_isk(249543.0), "249,543 ISK");
        assert_eq!(format_isk(0.0), "0 ISK");
        assert_eq!(format_isk(1000000.25), "1,000,000.25 ISK");
        assert_eq!(format_isk(999.999), "1,000 ISK");
    }
}
