use axum::{extract::Query, http::Uri};
use chrono::NaiveDate;
use marketplace_api::{
    models::AccountType,
    routes::params::AdminProductQuery,
    services::{admin_service::admin_product_select, product_service::contains_pattern},
};
use sea_orm::{
    QueryTrait,
    sea_query::{PostgresQueryBuilder, QueryStatementWriter},
};
use uuid::Uuid;

fn render(query: &AdminProductQuery) -> String {
    admin_product_select(query)
        .into_query()
        .to_string(PostgresQueryBuilder)
}

fn parse(uri: &str) -> AdminProductQuery {
    let uri: Uri = uri.parse().unwrap();
    Query::<AdminProductQuery>::try_from_uri(&uri).unwrap().0
}

#[test]
fn no_filters_means_no_where_clause() {
    let sql = render(&AdminProductQuery::default());
    assert!(sql.contains(r#"INNER JOIN "users""#));
    assert!(sql.contains(r#"LEFT JOIN "seller_profiles""#));
    assert!(!sql.contains("WHERE"));
    assert!(sql.contains(r#"ORDER BY "products"."created_at" DESC"#));
}

#[test]
fn search_spans_product_and_uploader_fields() {
    let sql = render(&AdminProductQuery {
        q: Some("  lamp ".into()),
        ..Default::default()
    });
    assert_eq!(sql.matches("ILIKE '%lamp%'").count(), 4);
    assert!(sql.contains(r#""products"."name" ILIKE"#));
    assert!(sql.contains(r#""products"."description" ILIKE"#));
    assert!(sql.contains(r#""users"."email" ILIKE"#));
    assert!(sql.contains(r#""seller_profiles"."business_name" ILIKE"#));
    assert!(sql.contains(" OR "));

    let blank = render(&AdminProductQuery {
        q: Some("   ".into()),
        ..Default::default()
    });
    assert!(!blank.contains("WHERE"));
}

#[test]
fn search_wildcards_are_escaped() {
    assert_eq!(contains_pattern("lamp"), "%lamp%");
    assert_eq!(contains_pattern("%"), r"%\%%");
    assert_eq!(contains_pattern("50%_off"), r"%50\%\_off%");
    assert_eq!(contains_pattern(r"a\b"), r"%a\\b%");

    let sql = render(&AdminProductQuery {
        q: Some("%".into()),
        ..Default::default()
    });
    assert!(!sql.contains("'%%%'"));
}

#[test]
fn enterprise_uploaders_are_active_with_registration_or_type() {
    let sql = render(&AdminProductQuery {
        account_type: Some(AccountType::Enterprise),
        ..Default::default()
    });
    assert!(sql.contains(r#""seller_profiles"."account_type" = 'enterprise'"#));
    assert!(sql.contains(r#""seller_profiles"."company_registration" IS NOT NULL"#));
    assert!(sql.contains(r#""users"."is_active" = TRUE"#));
}

#[test]
fn individual_uploaders_include_sellers_without_profile() {
    let sql = render(&AdminProductQuery {
        account_type: Some(AccountType::Individual),
        ..Default::default()
    });
    assert!(sql.contains(r#""seller_profiles"."account_type" = 'individual'"#));
    assert!(sql.contains(r#""seller_profiles"."id" IS NULL"#));
    assert!(sql.contains(r#""users"."is_active" = TRUE"#));
}

#[test]
fn scalar_filters_and_inclusive_date_range() {
    let uploader = Uuid::new_v4();
    let category = Uuid::new_v4();
    let sql = render(&AdminProductQuery {
        uploader_id: Some(uploader),
        category_id: Some(category),
        is_active: Some(false),
        date_from: NaiveDate::from_ymd_opt(2024, 1, 1),
        date_to: NaiveDate::from_ymd_opt(2024, 1, 31),
        ..Default::default()
    });
    assert!(sql.contains(&format!(r#""products"."seller_id" = '{uploader}'"#)));
    assert!(sql.contains(&format!(r#""products"."category_id" = '{category}'"#)));
    assert!(sql.contains(r#""products"."is_active" = FALSE"#));
    assert!(sql.contains(r#""products"."created_at" >= '2024-01-01 00:00:00"#));
    assert!(sql.contains(r#""products"."created_at" < '2024-02-01 00:00:00"#));
}

#[test]
fn query_string_uses_camel_case_names() {
    let uploader = Uuid::new_v4();
    let query = parse(&format!(
        "/api/admin/products?q=mug&uploaderId={uploader}&accountType=enterprise\
         &isActive=true&dateFrom=2024-03-01&dateTo=2024-03-31&page=2&limit=5"
    ));
    assert_eq!(query.q.as_deref(), Some("mug"));
    assert_eq!(query.uploader_id, Some(uploader));
    assert_eq!(query.account_type, Some(AccountType::Enterprise));
    assert_eq!(query.is_active, Some(true));
    assert_eq!(query.date_from, NaiveDate::from_ymd_opt(2024, 3, 1));
    assert_eq!(query.date_to, NaiveDate::from_ymd_opt(2024, 3, 31));
    assert_eq!(query.pagination().normalize(), (2, 5, 5));

    let uri: Uri = "/api/admin/products?accountType=corporate".parse().unwrap();
    assert!(Query::<AdminProductQuery>::try_from_uri(&uri).is_err());
}
