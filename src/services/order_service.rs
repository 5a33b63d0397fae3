use std::collections::BTreeMap;

use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{
        CancelOrderRequest, CheckoutRequest, Invoice, InvoiceLine, MessageList, OrderList,
        OrderWithItems, PayOrderRequest, PostMessageRequest, ShippingAddress,
        UpdateOrderStatusRequest,
    },
    entity::{
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems},
        order_messages::{
            ActiveModel as MessageActive, Column as MessageCol, Entity as OrderMessages,
        },
        order_status_history::{
            ActiveModel as HistoryActive, Column as HistoryCol, Entity as OrderStatusHistory,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderMessage, OrderStatus, OrderStatusEvent, Role},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

pub const PAYMENT_METHODS: [&str; 4] = ["cash_on_delivery", "card", "bank_transfer", "upi"];
const MAX_CHECKOUT_LINES: usize = 50;
const MAX_LINE_QUANTITY: i32 = 100;
const MAX_MESSAGE_LEN: usize = 2000;

/// How the caller is related to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAccess {
    Buyer,
    Seller,
    Admin,
}

/// Validates a checkout body and merges repeated products into one line.
pub fn validate_checkout(payload: &CheckoutRequest) -> AppResult<Vec<(Uuid, i32)>> {
    if payload.items.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }
    if payload.items.len() > MAX_CHECKOUT_LINES {
        return Err(AppError::BadRequest(format!(
            "At most {MAX_CHECKOUT_LINES} items per order"
        )));
    }
    if !PAYMENT_METHODS.contains(&payload.payment_method.as_str()) {
        return Err(AppError::BadRequest(format!(
            "Unsupported payment method '{}'",
            payload.payment_method
        )));
    }
    validate_address(&payload.shipping_address)?;

    let mut lines: BTreeMap<Uuid, i32> = BTreeMap::new();
    for item in &payload.items {
        if item.quantity <= 0 {
            return Err(AppError::BadRequest("Cart has invalid quantity".into()));
        }
        let too_many = || {
            AppError::BadRequest(format!(
                "At most {MAX_LINE_QUANTITY} units of product {}",
                item.product_id
            ))
        };
        if item.quantity > MAX_LINE_QUANTITY {
            return Err(too_many());
        }
        let quantity = lines.entry(item.product_id).or_insert(0);
        *quantity = quantity
            .checked_add(item.quantity)
            .filter(|total| *total <= MAX_LINE_QUANTITY)
            .ok_or_else(too_many)?;
    }
    Ok(lines.into_iter().collect())
}

fn validate_address(address: &ShippingAddress) -> AppResult<()> {
    let required = [
        ("full_name", &address.full_name),
        ("phone", &address.phone),
        ("line1", &address.line1),
        ("city", &address.city),
        ("postal_code", &address.postal_code),
        ("country", &address.country),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(AppError::BadRequest(format!(
            "shipping_address.{field} is required"
        )));
    }
    Ok(())
}

pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let lines = validate_checkout(&payload)?;
    let product_ids: Vec<Uuid> = lines.iter().map(|(id, _)| *id).collect();

    let txn = state.orm.begin().await?;

    let products = Products::find()
        .filter(ProdCol::Id.is_in(product_ids))
        .lock(LockType::Update)
        .all(&txn)
        .await?;

    let mut total_amount: i64 = 0;
    let mut priced = Vec::with_capacity(lines.len());
    for (product_id, quantity) in &lines {
        let product = products
            .iter()
            .find(|p| p.id == *product_id && p.is_active)
            .ok_or_else(|| {
                AppError::BadRequest(format!("Product {product_id} is not available"))
            })?;
        if product.seller_id == user.user_id {
            return Err(AppError::BadRequest(
                "You cannot order your own product".into(),
            ));
        }
        if product.stock < *quantity {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for product {}",
                product.id
            )));
        }
        let line_total = product
            .price
            .checked_mul(i64::from(*quantity))
            .and_then(|line| total_amount.checked_add(line))
            .ok_or_else(|| AppError::BadRequest("Order total is too large".into()))?;
        total_amount = line_total;
        priced.push((product, *quantity));
    }

    let order_id = Uuid::new_v4();
    let shipping_address = serde_json::to_value(&payload.shipping_address)
        .map_err(anyhow::Error::from)?;

    let order = OrderActive {
        id: Set(order_id),
        user_id: Set(user.user_id),
        total_amount: Set(total_amount),
        status: Set(OrderStatus::Pending.as_str().into()),
        payment_status: Set("unpaid".into()),
        payment_method: Set(payload.payment_method.clone()),
        invoice_number: Set(build_invoice_number(order_id)),
        shipping_address: Set(shipping_address),
        paid_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut order_items: Vec<OrderItem> = Vec::with_capacity(priced.len());
    for (product, quantity) in priced {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(product.id),
            seller_id: Set(product.seller_id),
            product_name: Set(product.name.clone()),
            quantity: Set(quantity),
            price: Set(product.price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        order_items.push(OrderItem::from(item));

        // reduce stock
        Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(quantity))
            .filter(ProdCol::Id.eq(product.id))
            .exec(&txn)
            .await?;
    }

    append_history(
        &txn,
        order.id,
        OrderStatus::Pending,
        Some("Order placed"),
        Some(user.user_id),
    )
    .await?;

    txn.commit().await?;

    state.cache.invalidate_catalog();
    audit::record(
        &state.pool,
        user.user_id,
        "checkout",
        "orders",
        serde_json::json!({ "order_id": order.id, "total_amount": order.total_amount }),
    )
    .await;
    tracing::info!(order_id = %order.id, total = order.total_amount, "order placed");

    let timeline = load_timeline(&state.orm, order.id).await?;
    Ok(ApiResponse::success(
        "Checkout success",
        OrderWithItems {
            order: Order::from(order),
            items: order_items,
            timeline,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let mut finder = Orders::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Loads an order the caller may see. Orders of other users read as missing.
pub async fn load_accessible_order<C: ConnectionTrait>(
    conn: &C,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<(OrderModel, OrderAccess)> {
    let order = match Orders::find_by_id(id).one(conn).await? {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    if user.is_admin() {
        return Ok((order, OrderAccess::Admin));
    }
    if order.user_id == user.user_id {
        return Ok((order, OrderAccess::Buyer));
    }
    if user.role == Role::Seller.as_str() {
        let owned = OrderItems::find()
            .filter(OrderItemCol::OrderId.eq(order.id))
            .filter(OrderItemCol::SellerId.eq(user.user_id))
            .count(conn)
            .await?;
        if owned > 0 {
            return Ok((order, OrderAccess::Seller));
        }
    }
    Err(AppError::NotFound)
}

async fn load_items<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
    Ok(OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(conn)
        .await?
        .into_iter()
        .map(OrderItem::from)
        .collect())
}

async fn load_timeline<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> AppResult<Vec<OrderStatusEvent>> {
    Ok(OrderStatusHistory::find()
        .filter(HistoryCol::OrderId.eq(order_id))
        .order_by_asc(HistoryCol::CreatedAt)
        .all(conn)
        .await?
        .into_iter()
        .map(OrderStatusEvent::from)
        .collect())
}

async fn append_history(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    status: OrderStatus,
    note: Option<&str>,
    changed_by: Option<Uuid>,
) -> AppResult<()> {
    HistoryActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(status.as_str().to_string()),
        note: Set(note.map(str::to_string)),
        changed_by: Set(changed_by),
        created_at: NotSet,
    }
    .insert(txn)
    .await?;
    Ok(())
}

async fn restock(txn: &DatabaseTransaction, order_id: Uuid) -> AppResult<()> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .all(txn)
        .await?;
    for item in items {
        Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).add(item.quantity))
            .filter(ProdCol::Id.eq(item.product_id))
            .exec(txn)
            .await?;
    }
    Ok(())
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let (order, _) = load_accessible_order(&state.orm, user, id).await?;
    let items = load_items(&state.orm, order.id).await?;
    let timeline = load_timeline(&state.orm, order.id).await?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: Order::from(order),
            items,
            timeline,
        },
        Some(Meta::empty()),
    ))
}

pub async fn pay_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: PayOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    if order.invoice_number != payload.invoice_number {
        return Err(AppError::BadRequest("Invoice number does not match".into()));
    }
    if order.payment_status == "paid" {
        return Err(AppError::BadRequest("Order already paid".into()));
    }
    if order.status == OrderStatus::Cancelled.as_str() {
        return Err(AppError::BadRequest("Order is cancelled".into()));
    }

    let mut active: OrderActive = order.into();
    active.payment_status = Set("paid".into());
    active.paid_at = Set(Some(Utc::now().into()));
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    let items = load_items(&txn, order.id).await?;
    let timeline = load_timeline(&txn, order.id).await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        user.user_id,
        "order_paid",
        "orders",
        serde_json::json!({ "order_id": order.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Payment recorded",
        OrderWithItems {
            order: Order::from(order),
            items,
            timeline,
        },
        Some(Meta::empty()),
    ))
}

/// Applies a status transition on behalf of a seller or admin.
pub async fn change_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    let txn = state.orm.begin().await?;
    let (order, access) = load_accessible_order(&txn, user, id).await?;
    if access == OrderAccess::Buyer {
        return Err(AppError::Forbidden);
    }

    let order = transition(
        &txn,
        order.id,
        payload.status,
        payload.note.as_deref(),
        user.user_id,
    )
    .await?;
    txn.commit().await?;

    if payload.status == OrderStatus::Cancelled {
        state.cache.invalidate_catalog();
    }
    audit::record(
        &state.pool,
        user.user_id,
        "order_status_update",
        "orders",
        serde_json::json!({ "order_id": order.id, "status": order.status }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        Order::from(order),
        Some(Meta::empty()),
    ))
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: CancelOrderRequest,
) -> AppResult<ApiResponse<Order>> {
    let txn = state.orm.begin().await?;
    let (order, access) = load_accessible_order(&txn, user, id).await?;
    if access == OrderAccess::Seller {
        return Err(AppError::Forbidden);
    }

    let note = payload.reason.as_deref().unwrap_or("Cancelled by customer");
    let order =
        transition(&txn, order.id, OrderStatus::Cancelled, Some(note), user.user_id).await?;
    txn.commit().await?;

    state.cache.invalidate_catalog();
    audit::record(
        &state.pool,
        user.user_id,
        "order_cancel",
        "orders",
        serde_json::json!({ "order_id": order.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order cancelled",
        Order::from(order),
        Some(Meta::empty()),
    ))
}

async fn transition(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    next: OrderStatus,
    note: Option<&str>,
    actor: Uuid,
) -> AppResult<OrderModel> {
    // Re-read under lock so concurrent transitions serialize.
    let order = Orders::find_by_id(order_id)
        .lock(LockType::Update)
        .one(txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let current = OrderStatus::parse(&order.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("order {} has unknown status {}", order.id, order.status))
    })?;
    if !current.can_transition_to(next) {
        return Err(AppError::BadRequest(format!(
            "Cannot change order status from {current} to {next}"
        )));
    }

    if next == OrderStatus::Cancelled {
        restock(txn, order.id).await?;
    }

    let cash_on_delivery = order.payment_method == "cash_on_delivery";
    let mut active: OrderActive = order.into();
    active.status = Set(next.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    if next == OrderStatus::Delivered && cash_on_delivery {
        active.payment_status = Set("paid".into());
        active.paid_at = Set(Some(Utc::now().into()));
    }
    let order = active.update(txn).await?;

    append_history(txn, order.id, next, note, Some(actor)).await?;
    Ok(order)
}

pub async fn list_messages(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<MessageList>> {
    let (order, _) = load_accessible_order(&state.orm, user, id).await?;
    let items: Vec<OrderMessage> = OrderMessages::find()
        .filter(MessageCol::OrderId.eq(order.id))
        .order_by_asc(MessageCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(OrderMessage::from)
        .collect();
    let total = items.len() as i64;
    Ok(ApiResponse::success(
        "Messages",
        MessageList { items },
        Some(Meta::new(1, total, total)),
    ))
}

pub async fn post_message(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: PostMessageRequest,
) -> AppResult<ApiResponse<OrderMessage>> {
    let body = payload.body.trim();
    if body.is_empty() {
        return Err(AppError::BadRequest("Message body is required".into()));
    }
    if body.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::BadRequest(format!(
            "Message must be at most {MAX_MESSAGE_LEN} characters"
        )));
    }

    let (order, _) = load_accessible_order(&state.orm, user, id).await?;
    let message = MessageActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        sender_id: Set(user.user_id),
        body: Set(body.to_string()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(ApiResponse::success(
        "Message sent",
        OrderMessage::from(message),
        Some(Meta::empty()),
    ))
}

pub async fn get_invoice(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Invoice>> {
    let (order, _) = load_accessible_order(&state.orm, user, id).await?;
    let items = load_items(&state.orm, order.id).await?;
    let invoice = build_invoice(&Order::from(order), &items);
    Ok(ApiResponse::success("Invoice", invoice, Some(Meta::empty())))
}

pub fn build_invoice(order: &Order, items: &[OrderItem]) -> Invoice {
    let lines: Vec<InvoiceLine> = items
        .iter()
        .map(|item| InvoiceLine {
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price: item.price,
            line_total: item.price * i64::from(item.quantity),
        })
        .collect();
    let subtotal = lines.iter().map(|line| line.line_total).sum();

    Invoice {
        invoice_number: order.invoice_number.clone(),
        order_id: order.id,
        issued_at: order.created_at,
        status: order.status.clone(),
        payment_status: order.payment_status.clone(),
        payment_method: order.payment_method.clone(),
        bill_to: order.shipping_address.clone(),
        lines,
        subtotal,
        total: order.total_amount,
    }
}

pub fn build_invoice_number(order_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = order_id.simple().to_string();
    let short = &suffix[..8];
    format!("INV-{}-{}", date, short.to_uppercase())
}
