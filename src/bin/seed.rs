use rust_decimal::Decimal;
use sea_orm::{ActiveValue::NotSet, DatabaseConnection, EntityTrait, Set, sea_query::OnConflict};
use shop_orders::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    entity::products::{ActiveModel as ProductActive, Column as ProdCol, Entity as Products},
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url, 1).await?;
    // Ensure migrations are applied.
    run_migrations(&orm).await?;

    let inserted = seed_products(&orm).await?;

    println!("Seed completed. {inserted} new products");
    Ok(())
}

async fn seed_products(orm: &DatabaseConnection) -> anyhow::Result<usize> {
    // (name, description, price in cents)
    let products = [
        ("Axum Hoodie", "Warm hoodie for Rustaceans", 5500),
        ("Ferris Mug", "Coffee tastes better with Ferris", 1200),
        ("Rust Sticker Pack", "Decorate your laptop", 500),
        ("E-book: Async Rust", "Learn async Rust patterns", 2550),
    ];

    let mut inserted = 0;
    for (name, desc, cents) in products {
        let product = ProductActive {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(Some(desc.to_string())),
            price: Set(Decimal::new(cents, 2)),
            created_at: NotSet,
        };
        let rows = Products::insert(product)
            .on_conflict(OnConflict::column(ProdCol::Name).do_nothing().to_owned())
            .exec_without_returning(orm)
            .await?;
        inserted += rows as usize;
    }

    println!("Seeded products");
    Ok(inserted)
}
