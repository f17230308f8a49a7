//! PostgREST query-string builder.

/// Sort direction for `order=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Filters, ordering and paging for a PostgREST request.
///
/// Values are percent-encoded; column names are trusted (they come from code).
#[derive(Debug, Clone, Default)]
pub struct Query {
    select: Option<String>,
    filters: Vec<(String, String)>,
    order: Option<(String, Order)>,
    limit: Option<u32>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns to return (`select=`). Defaults to `*` when unset.
    pub fn select(mut self, columns: &str) -> Self {
        self.select = Some(columns.to_string());
        self
    }

    /// `column=eq.value`
    pub fn eq(mut self, column: &str, value: impl AsRef<str>) -> Self {
        self.filters.push((
            column.to_string(),
            format!("eq.{}", urlencoding::encode(value.as_ref())),
        ));
        self
    }

    /// `column=in.(a,b,c)`
    pub fn in_list<I, S>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = values
            .into_iter()
            .map(|v| urlencoding::encode(v.as_ref()).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        self.filters.push((column.to_string(), format!("in.({})", joined)));
        self
    }

    pub fn order(mut self, column: &str, order: Order) -> Self {
        self.order = Some((column.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True when no row filter is set (used to refuse unbounded writes).
    pub fn is_unfiltered(&self) -> bool {
        self.filters.is_empty()
    }

    /// Render the query string (without the leading `?`).
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.filters.len() + 3);
        parts.push(format!(
            "select={}",
            urlencoding::encode(self.select.as_deref().unwrap_or("*"))
        ));
        for (column, expr) in &self.filters {
            parts.push(format!("{}={}", column, expr));
        }
        if let Some((column, order)) = &self.order {
            let dir = match order {
                Order::Asc => "asc",
                Order::Desc => "desc",
            };
            parts.push(format!("order={}.{}", column, dir));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("limit={}", limit));
        }
        parts.join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selects_everything() {
        assert_eq!(Query::new().to_query_string(), "select=%2A");
    }

    #[test]
    fn test_filters_order_and_limit() {
        let q = Query::new()
            .eq("user_id", "u 1")
            .order("created_at", Order::Desc)
            .limit(20);
        assert_eq!(
            q.to_query_string(),
            "select=%2A&user_id=eq.u%201&order=created_at.desc&limit=20"
        );
        assert!(!q.is_unfiltered());
    }

    #[test]
    fn test_in_list() {
        let q = Query::new().select("id,status").in_list("status", ["pending", "processing"]);
        assert_eq!(
            q.to_query_string(),
            "select=id%2Cstatus&status=in.(pending,processing)"
        );
    }
}
