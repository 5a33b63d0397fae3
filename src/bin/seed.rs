use marketplace_api::{
    db::{create_pool, orm_from_pool, run_migrations},
    models::{AccountType, Role},
    services::{auth_service::hash_password, category_service::slugify},
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")?;
    let admin_email = std::env::var("ADMIN_EMAIL")
        .map_err(|_| anyhow::anyhow!("ADMIN_EMAIL is not set"))?;
    let admin_password = std::env::var("ADMIN_PASSWORD")
        .map_err(|_| anyhow::anyhow!("ADMIN_PASSWORD is not set"))?;

    let pool = create_pool(&database_url).await?;
    // Ensure migrations are applied.
    run_migrations(&orm_from_pool(&pool)).await?;

    let admin_id = ensure_user(&pool, &admin_email, &admin_password, "Admin", Role::Admin).await?;
    let seller_id = ensure_user(
        &pool,
        "seller@example.com",
        "seller12345",
        "Demo Seller",
        Role::Seller,
    )
    .await?;
    let buyer_id = ensure_user(
        &pool,
        "buyer@example.com",
        "buyer12345",
        "Demo Buyer",
        Role::Buyer,
    )
    .await?;
    ensure_profile(&pool, seller_id, "Ferris Supplies", AccountType::Enterprise).await?;

    seed_categories(&pool).await?;
    seed_products(&pool, seller_id).await?;

    println!("Seed completed. Admin: {admin_id}, seller: {seller_id}, buyer: {buyer_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    email: &str,
    password: &str,
    name: &str,
    role: Role,
) -> anyhow::Result<Uuid> {
    let email = email.trim().to_lowercase();
    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, name, role)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&email)
    .bind(password_hash)
    .bind(name)
    .bind(role.as_str())
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={})", role.as_str());
    Ok(id)
}

async fn ensure_profile(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    business_name: &str,
    account_type: AccountType,
) -> anyhow::Result<()> {
    let registration = (account_type == AccountType::Enterprise).then_some("REG-0001");
    sqlx::query(
        r#"
        INSERT INTO seller_profiles (id, user_id, business_name, account_type, company_registration)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(business_name)
    .bind(account_type.as_str())
    .bind(registration)
    .execute(pool)
    .await?;
    Ok(())
}

async fn seed_categories(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let categories = [
        ("Apparel", "Clothing for Rustaceans"),
        ("Home", "Mugs, lamps and desk gear"),
        ("Books", "Printed and digital reading"),
    ];

    for (name, description) in categories {
        sqlx::query(
            r#"
            INSERT INTO categories (id, name, slug, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (slug) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(slugify(name))
        .bind(description)
        .execute(pool)
        .await?;
    }

    println!("Seeded categories");
    Ok(())
}

async fn seed_products(pool: &sqlx::PgPool, seller_id: Uuid) -> anyhow::Result<()> {
    let products = vec![
        ("Axum Hoodie", "Warm hoodie for Rustaceans", "apparel", 550000_i64, 50_i32),
        ("Ferris Mug", "Coffee tastes better with Ferris", "home", 120000, 100),
        ("Desk Lamp", "Warm light for late compiles", "home", 310000, 4),
        ("E-book: Async Rust", "Learn async Rust patterns", "books", 250000, 75),
    ];

    for (name, desc, category, price, stock) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, seller_id, category_id, name, description, price, stock)
            SELECT $1, $2, c.id, $4, $5, $6, $7
            FROM categories c
            WHERE c.slug = $3
              AND NOT EXISTS (
                SELECT 1 FROM products p WHERE p.seller_id = $2 AND p.name = $4
              )
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(seller_id)
        .bind(category)
        .bind(name)
        .bind(desc)
        .bind(price)
        .bind(stock)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
