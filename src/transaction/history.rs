//! Transaction history query

use chrono::{DateTime, Utc};

use super::error::TransactionError;
use super::store::TransactionStore;
use super::types::{Transaction, TransactionType};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Largest page the service returns
pub const MAX_PAGE_SIZE: u32 = 50;
/// Largest page size accepted on the wire
pub const MAX_WIRE_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Page {
    /// Clamp to the service bounds: page `0 -> 1`, size `0 -> 50`, `> 50 -> 50`
    pub fn normalize(page: u32, page_size: u32) -> Self {
        let page = page.max(DEFAULT_PAGE);
        let page_size = match page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        Self { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.page_size as i64
    }

    pub fn limit(&self) -> i64 {
        self.page_size as i64
    }

    pub fn total_pages(&self, total_count: i64) -> i64 {
        let size = self.page_size as i64;
        (total_count + size - 1) / size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Result<Self, TransactionError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "desc" => Ok(SortOrder::Desc),
            "asc" => Ok(SortOrder::Asc),
            other => Err(TransactionError::InvalidRequest(format!(
                "invalid sort order: {other}"
            ))),
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Validated history filter
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub account_id: Option<String>,
    pub customer_id: Option<String>,
    pub types: Vec<TransactionType>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub sort_order: SortOrder,
    pub page: Page,
}

/// Raw filter as received from a caller
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub account_id: Option<String>,
    pub customer_id: Option<String>,
    pub types: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub sort_order: String,
    pub page: u32,
    pub page_size: u32,
}

impl HistoryFilter {
    pub fn into_query(self) -> Result<HistoryQuery, TransactionError> {
        let non_blank = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let account_id = non_blank(self.account_id);
        let customer_id = non_blank(self.customer_id);

        if account_id.is_none() && customer_id.is_none() {
            return Err(TransactionError::MissingRequiredData(
                "account_id or customer_id".into(),
            ));
        }
        if self.page_size > MAX_WIRE_PAGE_SIZE {
            return Err(TransactionError::InvalidRequest(format!(
                "page_size must not exceed {MAX_WIRE_PAGE_SIZE}"
            )));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date)
            && start > end
        {
            return Err(TransactionError::InvalidRequest(
                "start_date must not be after end_date".into(),
            ));
        }

        let types = self
            .types
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| t.parse::<TransactionType>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(HistoryQuery {
            account_id,
            customer_id,
            types,
            start_date: self.start_date,
            end_date: self.end_date,
            sort_order: SortOrder::parse(&self.sort_order)?,
            page: Page::normalize(self.page, self.page_size),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub transactions: Vec<Transaction>,
    pub page: Page,
    pub total_count: i64,
    pub total_pages: i64,
}

pub async fn get_transaction_history(
    store: &dyn TransactionStore,
    filter: HistoryFilter,
) -> Result<HistoryPage, TransactionError> {
    let query = filter.into_query()?;
    let (transactions, total_count) = store.history(&query).await?;

    Ok(HistoryPage {
        transactions,
        page: query.page,
        total_count,
        total_pages: query.page.total_pages(total_count),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filter(page: u32, page_size: u32) -> HistoryFilter {
        HistoryFilter {
            account_id: Some("acc-A".into()),
            page,
            page_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_defaults() {
        assert_eq!(Page::normalize(0, 0), Page { page: 1, page_size: 50 });
        assert_eq!(Page::normalize(3, 10), Page { page: 3, page_size: 10 });
        assert_eq!(Page::normalize(1, 80), Page { page: 1, page_size: 50 });
    }

    #[test]
    fn test_offset_and_total_pages() {
        let page = Page::normalize(3, 20);
        assert_eq!(page.offset(), 40);
        assert_eq!(page.total_pages(0), 0);
        assert_eq!(page.total_pages(20), 1);
        assert_eq!(page.total_pages(41), 3);
    }

    #[test]
    fn test_requires_account_or_customer() {
        let err = HistoryFilter::default().into_query().unwrap_err();
        assert!(matches!(err, TransactionError::MissingRequiredData(_)));

        let q = HistoryFilter {
            customer_id: Some("c-1".into()),
            ..Default::default()
        }
        .into_query()
        .unwrap();
        assert_eq!(q.customer_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn test_wire_page_size_limit() {
        assert!(filter(1, 100).into_query().is_ok());
        assert!(matches!(
            filter(1, 101).into_query(),
            Err(TransactionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_types_and_sort() {
        let q = HistoryFilter {
            account_id: Some("acc-A".into()),
            types: vec!["transfer".into(), "add_amount".into()],
            sort_order: "ASC".into(),
            ..Default::default()
        }
        .into_query()
        .unwrap();
        assert_eq!(q.types, vec![TransactionType::Transfer, TransactionType::AddAmount]);
        assert_eq!(q.sort_order, SortOrder::Asc);

        assert!(matches!(
            HistoryFilter {
                account_id: Some("acc-A".into()),
                types: vec!["refund".into()],
                ..Default::default()
            }
            .into_query(),
            Err(TransactionError::InvalidTransactionType(_))
        ));
        assert!(SortOrder::parse("sideways").is_err());
    }

    #[test]
    fn test_date_range_order() {
        let now = Utc::now();
        let result = HistoryFilter {
            account_id: Some("acc-A".into()),
            start_date: Some(now),
            end_date: Some(now - chrono::Duration::days(1)),
            ..Default::default()
        }
        .into_query();
        assert!(matches!(result, Err(TransactionError::InvalidRequest(_))));
    }

    #[test]
    fn test_zero_paging_matches_first_default_page() {
        assert_eq!(
            filter(0, 0).into_query().unwrap(),
            filter(1, 50).into_query().unwrap()
        );
    }

    proptest! {
        #[test]
        fn prop_normalized_page_in_bounds(page in 0u32..10_000, size in 0u32..=100) {
            let p = Page::normalize(page, size);
            prop_assert!(p.page >= 1);
            prop_assert!((1..=MAX_PAGE_SIZE).contains(&p.page_size));
            prop_assert!(p.offset() >= 0);
        }

        #[test]
        fn prop_normalize_is_idempotent(page in 0u32..10_000, size in 0u32..=100) {
            let p = Page::normalize(page, size);
            prop_assert_eq!(Page::normalize(p.page, p.page_size), p);
        }
    }
}
