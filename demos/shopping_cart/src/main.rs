use std::sync::Arc;

use keel_sdk::prelude::*;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    cart::{CartsByCustomer, LineItem, ShoppingCart},
    checkout::{CartReminder, Checkout},
};

mod cart;
mod checkout;

fn registry() -> Result<ComponentRegistry, InvalidComponentDefinition> {
    let mut registry = ComponentRegistry::builder();
    registry.register_key_value_entity(ShoppingCart::new)?;
    registry.register_view(|_| CartsByCustomer)?;
    registry.register_action(Checkout::new)?;
    registry.register_timed_action(|_| CartReminder)?;
    Ok(registry.build())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let router = ComponentRouter::new(Arc::new(registry()?));
    let client = router.client();
    let customer_id = "ari".to_string();

    let mut cart_ids = Vec::new();
    for items in [
        vec![
            LineItem::new("tv", "Super TV", 1),
            LineItem::new("akku", "Super Battery", 2),
            LineItem::new("tv", "Super TV", 1),
        ],
        vec![LineItem::new("cable", "HDMI Cable", 3)],
    ] {
        let cart_id = uuid::Uuid::new_v4().to_string();
        let add_item = client
            .for_key_value_entity(cart_id.clone())
            .method(ShoppingCart::add_item)?;
        for item in items {
            add_item.invoke_async((customer_id.clone(), item)).await?;
        }
        client
            .for_action()
            .method(Checkout::watch)?
            .invoke_async(cart_id.clone())
            .await?;
        cart_ids.push(cart_id);
    }

    let cart = client
        .for_key_value_entity(cart_ids[0].clone())
        .method(ShoppingCart::get_cart)?
        .invoke_async(())
        .await?;
    info!(cart_id = %cart.cart_id, items = ?cart.items, "cart filled");

    if let Err(err) = client
        .for_key_value_entity(cart_ids[0].clone())
        .method(ShoppingCart::remove_item)?
        .invoke_async("phone".to_string())
        .await
    {
        info!(error = %err, "removing an unknown item was rejected");
    }

    let receipt = client
        .for_action()
        .method(Checkout::check_out)?
        .invoke_async(cart_ids[0].clone())
        .await?;
    info!(order_id = %receipt.order_id, items = receipt.item_count, "checked out");

    let open = client
        .for_view()
        .method(CartsByCustomer::get_open_carts)?
        .invoke_async(customer_id.clone())
        .await?;
    for summary in &open.carts {
        info!(cart_id = %summary.cart_id, items = summary.item_count, "open cart");
    }

    let all = client
        .for_view()
        .method(CartsByCustomer::get_carts)?
        .invoke_async(customer_id)
        .await?;
    info!(carts = all.carts.len(), open = open.carts.len(), "carts by customer");

    Ok(())
}
