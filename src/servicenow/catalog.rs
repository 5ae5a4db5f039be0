use super::client::ServiceNowClient;
use super::error::ApiError;
use super::models::CatalogItem;
use super::query::{Filter, Params};
use super::table_path;
use reqwest::{Method, StatusCode};

const TABLE_CATALOG_ITEM: &str = "sc_cat_item";

impl ServiceNowClient {
    /// Active catalog items whose name or short description contains `term`.
    pub async fn search_catalog_items(
        &self,
        term: &str,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<CatalogItem>, StatusCode), ApiError> {
        let term = self.check_search_term(term)?;

        let filter = Filter::new()
            .eq("active", "true")
            .like("name", term)
            .or_like("short_description", term)
            .order_by("name");
        let params = Params::new()
            .query(&filter)
            .fields(&["sys_id", "name", "short_description", "price"])
            .limit(limit)
            .offset(offset);

        self.call_result::<(), _>(
            Method::GET,
            &table_path(TABLE_CATALOG_ITEM),
            None,
            &params,
        )
        .await
    }
}
