use axum::Json;
use serde::Serialize;

/// Success envelope: `{ "data": <value> }`.
#[derive(Debug, Serialize)]
pub struct ApiData<T> {
    pub data: T,
}

/// Paginated envelope: `{ "data": [...], "meta": {...} }`.
#[derive(Debug, Serialize)]
pub struct ApiPage<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

#[derive(Debug, Serialize)]
pub struct PageMeta {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

pub fn data<T: Serialize>(value: T) -> Json<ApiData<T>> {
    Json(ApiData { data: value })
}

pub fn page<T: Serialize>(items: Vec<T>, total: i64, page: i64, page_size: i64) -> Json<ApiPage<T>> {
    Json(ApiPage {
        data: items,
        meta: PageMeta {
            total,
            page,
            page_size,
        },
    })
}

/// Normalise `?page=&page_size=` query values: page is 1-based, page size
/// capped at 200.
pub fn clamp_paging(page: Option<i64>, page_size: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let page_size = page_size.unwrap_or(50).clamp(1, 200);
    (page, page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_is_clamped() {
        assert_eq!(clamp_paging(None, None), (1, 50));
        assert_eq!(clamp_paging(Some(0), Some(0)), (1, 1));
        assert_eq!(clamp_paging(Some(-4), Some(10_000)), (1, 200));
        assert_eq!(clamp_paging(Some(3), Some(25)), (3, 25));
    }

    #[test]
    fn envelope_shape() {
        let Json(body) = data(vec![1, 2, 3]);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["data"], serde_json::json!([1, 2, 3]));

        let Json(body) = page(vec!["a"], 7, 2, 1);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["meta"]["total"], 7);
        assert_eq!(json["meta"]["page"], 2);
        assert_eq!(json["meta"]["page_size"], 1);
    }
}
