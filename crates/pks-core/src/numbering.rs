use chrono::{Datelike, NaiveDate};
use uuid::Uuid;

use crate::models::SourceType;
use crate::stock::DocumentKind;

/// A per-company numbering window such as `JU/2024/05/` or `20240515-`.
///
/// `scope` names the counter row that serializes allocation; `window` is the
/// textual prefix every number in the series starts with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberSeries {
    pub company_id: Uuid,
    pub scope: String,
    pub window: String,
    pub width: usize,
}

impl NumberSeries {
    /// `PREFIX/YYYY/MM/seq`, sequence zero-padded to 4 digits.
    pub fn journal(company_id: Uuid, source_type: SourceType, date: NaiveDate) -> Self {
        let window = format!(
            "{}/{:04}/{:02}/",
            source_type.entry_prefix(),
            date.year(),
            date.month()
        );
        Self::new(company_id, "JE", window, 4)
    }

    /// `YYYYMMDD-NNN` per company per day.
    pub fn weighbridge(company_id: Uuid, date: NaiveDate) -> Self {
        let window = format!("{}-", date.format("%Y%m%d"));
        Self::new(company_id, "WB", window, 3)
    }

    /// `GR-YYYYMM-NNNN` and friends, per company per month.
    pub fn stock_document(company_id: Uuid, kind: DocumentKind, date: NaiveDate) -> Self {
        let window = format!("{}-{}-", kind.number_prefix(), date.format("%Y%m"));
        Self::new(company_id, "DOC", window, 4)
    }

    pub fn item_request(company_id: Uuid, date: NaiveDate) -> Self {
        let window = format!("IR-{}-", date.format("%Y%m"));
        Self::new(company_id, "DOC", window, 4)
    }

    fn new(company_id: Uuid, family: &str, window: String, width: usize) -> Self {
        Self {
            company_id,
            scope: format!("{family}:{company_id}:{window}"),
            window,
            width,
        }
    }

    pub fn format(&self, sequence: i64) -> String {
        format!("{}{:0width$}", self.window, sequence, width = self.width)
    }

    /// Numeric suffix of `number` if it belongs to this window.
    pub fn suffix_of(&self, number: &str) -> Option<i64> {
        number
            .strip_prefix(self.window.as_str())
            .filter(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|suffix| suffix.parse::<i64>().ok())
    }

    /// Highest suffix among existing numbers, zero for an empty window.
    pub fn max_suffix<'a, I>(&self, numbers: I) -> i64
    where
        I: IntoIterator<Item = &'a str>,
    {
        numbers
            .into_iter()
            .filter_map(|number| self.suffix_of(number))
            .max()
            .unwrap_or(0)
    }
}
