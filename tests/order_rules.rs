use chrono::Utc;
use marketplace_api::{
    dto::{
        admin::{AdminProduct, Uploader},
        auth::RegisterRequest,
        orders::{CheckoutItem, CheckoutRequest, ShippingAddress},
        reviews::CreateReviewRequest,
        seller::UpsertSellerProfileRequest,
    },
    error::AppError,
    models::{AccountType, Order, OrderItem, OrderStatus, Product, Role},
    routes::params::Pagination,
    services::{
        admin_service::{CSV_HEADER, csv_field, render_products_csv},
        auth_service::validate_registration,
        category_service::slugify,
        order_service::{build_invoice, build_invoice_number, validate_checkout},
        product_service::validate_product_fields,
        review_service::validate_review,
        seller_service::validate_profile,
    },
};
use uuid::Uuid;

fn address() -> ShippingAddress {
    ShippingAddress {
        full_name: "Ada Lovelace".into(),
        phone: "+44 20 7946 0000".into(),
        line1: "12 Analytical St".into(),
        line2: None,
        city: "London".into(),
        state: None,
        postal_code: "N1 9GU".into(),
        country: "UK".into(),
    }
}

fn checkout(items: Vec<(Uuid, i32)>) -> CheckoutRequest {
    CheckoutRequest {
        items: items
            .into_iter()
            .map(|(product_id, quantity)| CheckoutItem {
                product_id,
                quantity,
            })
            .collect(),
        shipping_address: address(),
        payment_method: "card".into(),
    }
}

fn bad_request_message<T: std::fmt::Debug>(result: Result<T, AppError>) -> String {
    match result {
        Err(AppError::BadRequest(message)) => message,
        other => panic!("expected bad request, got {other:?}"),
    }
}

#[test]
fn status_transitions_follow_the_lifecycle() {
    use OrderStatus::*;

    assert!(Pending.can_transition_to(Confirmed));
    assert!(Pending.can_transition_to(Cancelled));
    assert!(Confirmed.can_transition_to(Shipped));
    assert!(Confirmed.can_transition_to(Cancelled));
    assert!(Shipped.can_transition_to(Delivered));

    assert!(!Pending.can_transition_to(Shipped));
    assert!(!Pending.can_transition_to(Pending));
    assert!(!Shipped.can_transition_to(Cancelled));
    for next in [Pending, Confirmed, Shipped, Delivered, Cancelled] {
        assert!(!Delivered.can_transition_to(next));
        assert!(!Cancelled.can_transition_to(next));
    }

    assert!(Delivered.is_terminal());
    assert!(Cancelled.is_terminal());
    assert!(!Shipped.is_terminal());
    assert_eq!(OrderStatus::parse("shipped"), Some(Shipped));
    assert_eq!(OrderStatus::parse("Shipped"), None);
    assert_eq!(Confirmed.to_string(), "confirmed");
}

#[test]
fn checkout_merges_repeated_products() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let mut lines = validate_checkout(&checkout(vec![(a, 2), (b, 1), (a, 3)])).unwrap();
    lines.sort();
    let mut expected = vec![(a, 5), (b, 1)];
    expected.sort();
    assert_eq!(lines, expected);
}

#[test]
fn checkout_rejects_bad_carts() {
    let id = Uuid::new_v4();

    assert_eq!(bad_request_message(validate_checkout(&checkout(vec![]))), "Cart is empty");
    bad_request_message(validate_checkout(&checkout(vec![(id, 0)])));
    bad_request_message(validate_checkout(&checkout(vec![(id, -1)])));
    bad_request_message(validate_checkout(&checkout(vec![(id, 60), (id, 41)])));
    assert!(validate_checkout(&checkout(vec![(id, 60), (id, 40)])).is_ok());
    bad_request_message(validate_checkout(&checkout(vec![(id, 101)])));
    bad_request_message(validate_checkout(&checkout(vec![(id, 1), (id, i32::MAX)])));
    bad_request_message(validate_checkout(&checkout(vec![(id, 100), (id, i32::MAX)])));

    let many: Vec<_> = (0..51).map(|_| (Uuid::new_v4(), 1)).collect();
    bad_request_message(validate_checkout(&checkout(many)));

    let mut request = checkout(vec![(id, 1)]);
    request.payment_method = "barter".into();
    assert!(bad_request_message(validate_checkout(&request)).contains("barter"));

    let mut request = checkout(vec![(id, 1)]);
    request.shipping_address.city = "  ".into();
    assert_eq!(
        bad_request_message(validate_checkout(&request)),
        "shipping_address.city is required"
    );
}

fn order(total_amount: i64) -> Order {
    let id = Uuid::new_v4();
    Order {
        id,
        user_id: Uuid::new_v4(),
        total_amount,
        status: "pending".into(),
        payment_status: "unpaid".into(),
        payment_method: "card".into(),
        invoice_number: build_invoice_number(id),
        shipping_address: serde_json::to_value(address()).unwrap(),
        paid_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn item(order_id: Uuid, name: &str, quantity: i32, price: i64) -> OrderItem {
    OrderItem {
        id: Uuid::new_v4(),
        order_id,
        product_id: Uuid::new_v4(),
        seller_id: Uuid::new_v4(),
        product_name: name.into(),
        quantity,
        price,
        created_at: Utc::now(),
    }
}

#[test]
fn invoice_lines_add_up() {
    let order = order(1_340_000);
    let items = vec![
        item(order.id, "Ferris Mug", 3, 120_000),
        item(order.id, "Axum Hoodie", 2, 490_000),
    ];
    let invoice = build_invoice(&order, &items);

    assert_eq!(invoice.invoice_number, order.invoice_number);
    assert_eq!(invoice.order_id, order.id);
    assert_eq!(invoice.lines.len(), 2);
    assert_eq!(invoice.lines[0].line_total, 360_000);
    assert_eq!(invoice.lines[1].line_total, 980_000);
    assert_eq!(invoice.subtotal, 1_340_000);
    assert_eq!(invoice.total, 1_340_000);
    assert_eq!(invoice.bill_to["city"], "London");
}

#[test]
fn invoice_number_has_date_and_short_id() {
    let id = Uuid::parse_str("3f2a9c1e-0000-4000-8000-000000000000").unwrap();
    let number = build_invoice_number(id);
    let date = Utc::now().format("%Y%m%d").to_string();
    assert_eq!(number, format!("INV-{date}-3F2A9C1E"));
}

#[test]
fn pagination_is_clamped() {
    assert_eq!(Pagination::default().normalize(), (1, 20, 0));
    assert_eq!(Pagination::new(Some(3), Some(10)).normalize(), (3, 10, 20));
    assert_eq!(Pagination::new(Some(0), Some(0)).normalize(), (1, 1, 0));
    assert_eq!(Pagination::new(Some(-4), Some(500)).normalize(), (1, 100, 0));
}

#[test]
fn huge_page_numbers_do_not_overflow() {
    let (page, per_page, offset) = Pagination::new(Some(i64::MAX), Some(100)).normalize();
    assert_eq!(page, i64::MAX);
    assert_eq!(per_page, 100);
    assert_eq!(offset, i64::MAX);
}

#[test]
fn slugs_are_lowercase_and_dashed() {
    assert_eq!(slugify("Home & Garden"), "home-garden");
    assert_eq!(slugify("  E-Books!  "), "e-books");
    assert_eq!(slugify("Café 2024"), "caf-2024");
    assert_eq!(slugify("***"), "");
}

fn product(name: &str) -> Product {
    Product {
        id: Uuid::new_v4(),
        seller_id: Uuid::new_v4(),
        category_id: None,
        name: name.into(),
        description: None,
        price: 120_000,
        stock: 3,
        images: vec![],
        specifications: None,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[test]
fn csv_fields_are_quoted_when_needed() {
    assert_eq!(csv_field("plain"), "plain");
    assert_eq!(csv_field("a,b"), "\"a,b\"");
    assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    assert_eq!(csv_field(""), "");
}

#[test]
fn products_csv_has_header_and_one_row_per_product() {
    let with_uploader = product("Mug, large");
    let uploader = Uploader {
        id: with_uploader.seller_id,
        email: "seller@example.com".into(),
        name: "Demo Seller".into(),
        is_active: true,
        business_name: Some("Ferris \"Supplies\"".into()),
        account_type: "enterprise".into(),
        company_registration: Some("REG-1".into()),
    };
    let items = vec![
        AdminProduct {
            product: with_uploader,
            uploader: Some(uploader),
        },
        AdminProduct {
            product: product("Lamp"),
            uploader: None,
        },
    ];

    let csv = render_products_csv(&items);
    let rows: Vec<&str> = csv.split_terminator("\r\n").collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], CSV_HEADER.join(","));
    assert!(rows[1].contains("\"Mug, large\""));
    assert!(rows[1].contains("seller@example.com,\"Ferris \"\"Supplies\"\"\",enterprise"));
    assert!(rows[2].contains(",Lamp,120000,3,true,,"));
    assert!(csv.ends_with("\r\n"));
}

#[test]
fn review_rules() {
    let review = |rating: i32, comment: &str| CreateReviewRequest {
        rating,
        title: None,
        comment: comment.into(),
    };
    assert!(validate_review(&review(5, "Great mug")).is_ok());
    assert!(validate_review(&review(1, "meh")).is_ok());
    bad_request_message(validate_review(&review(0, "too low")));
    bad_request_message(validate_review(&review(6, "too high")));
    bad_request_message(validate_review(&review(4, "   ")));
    bad_request_message(validate_review(&review(4, &"x".repeat(2001))));
}

#[test]
fn enterprise_profiles_need_registration() {
    let profile = |account_type, registration: Option<&str>| UpsertSellerProfileRequest {
        business_name: "Ferris Supplies".into(),
        account_type,
        company_registration: registration.map(str::to_string),
        phone: None,
    };
    assert!(validate_profile(&profile(AccountType::Individual, None)).is_ok());
    assert!(validate_profile(&profile(AccountType::Enterprise, Some("REG-1"))).is_ok());
    bad_request_message(validate_profile(&profile(AccountType::Enterprise, None)));
    bad_request_message(validate_profile(&profile(AccountType::Enterprise, Some("  "))));

    let mut blank = profile(AccountType::Individual, None);
    blank.business_name = " ".into();
    bad_request_message(validate_profile(&blank));
}

#[test]
fn registration_rules() {
    let request = |email: &str, password: &str, role| RegisterRequest {
        email: email.into(),
        password: password.into(),
        name: "Ada".into(),
        role,
    };
    assert!(validate_registration(&request("ada@example.com", "secret123", None)).is_ok());
    assert!(validate_registration(&request("ada@example.com", "secret123", Some(Role::Seller))).is_ok());
    bad_request_message(validate_registration(&request("not-an-email", "secret123", None)));
    bad_request_message(validate_registration(&request("ada@example.com", "short", None)));
    bad_request_message(validate_registration(&request(
        "ada@example.com",
        "secret123",
        Some(Role::Admin),
    )));
}

#[test]
fn product_field_rules() {
    let no_images: Vec<String> = Vec::new();
    assert!(validate_product_fields(Some("Mug"), Some(0), Some(0), Some(no_images.as_slice())).is_ok());
    assert!(validate_product_fields(None, None, None, None).is_ok());
    bad_request_message(validate_product_fields(Some(" "), None, None, None));
    bad_request_message(validate_product_fields(None, Some(-1), None, None));
    bad_request_message(validate_product_fields(None, None, Some(-1), None));
    let too_many: Vec<String> = (0..11).map(|i| format!("https://img/{i}.png")).collect();
    bad_request_message(validate_product_fields(None, None, None, Some(too_many.as_slice())));
}
