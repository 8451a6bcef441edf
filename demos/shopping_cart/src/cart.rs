use keel_sdk::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(product_id: &str, name: &str, quantity: u32) -> Self {
        LineItem {
            product_id: product_id.to_string(),
            name: name.to_string(),
            quantity,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub cart_id: String,
    pub customer_id: String,
    pub items: Vec<LineItem>,
    pub checked_out: bool,
}

impl Cart {
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

pub struct ShoppingCart {
    cart_id: String,
}

impl ShoppingCart {
    pub fn new(ctx: &ComponentContext) -> Self {
        ShoppingCart {
            cart_id: ctx.entity_id().to_string(),
        }
    }

    pub fn add_item(&self, cart: &Cart, customer_id: String, item: LineItem) -> Effect<(), Cart> {
        if cart.checked_out {
            return Effect::error(format!("Cart {} is already checked out.", self.cart_id));
        }
        if item.quantity == 0 {
            return Effect::error_with_code(
                format!("Quantity for item {} must be greater than zero.", item.product_id),
                ErrorCode::BadRequest,
            );
        }

        let mut cart = cart.clone();
        cart.cart_id = self.cart_id.clone();
        cart.customer_id = customer_id;
        match cart
            .items
            .iter_mut()
            .find(|existing| existing.product_id == item.product_id)
        {
            Some(existing) => existing.quantity += item.quantity,
            None => cart.items.push(item),
        }
        cart.items
            .sort_by(|a, b| a.product_id.cmp(&b.product_id));

        update_state(cart).then_reply(())
    }

    pub fn remove_item(&self, cart: &Cart, product_id: String) -> Effect<(), Cart> {
        if !cart.items.iter().any(|item| item.product_id == product_id) {
            return Effect::error(format!(
                "Cannot remove item {product_id} because it is not in the cart."
            ));
        }

        let mut cart = cart.clone();
        cart.items.retain(|item| item.product_id != product_id);
        update_state(cart).then_reply(())
    }

    pub fn checkout(&self, cart: &Cart) -> Effect<Cart, Cart> {
        if cart.checked_out {
            return Effect::error(format!("Cart {} is already checked out.", self.cart_id));
        }
        if cart.items.is_empty() {
            return Effect::error(format!("Cart {} is empty.", self.cart_id));
        }

        let cart = Cart {
            checked_out: true,
            ..cart.clone()
        };
        update_state(cart.clone()).then_reply(cart)
    }

    pub fn get_cart(&self, cart: &Cart) -> Effect<Cart, Cart> {
        Effect::reply(cart.clone())
    }

    pub fn discard(&self, _cart: &Cart) -> Effect<(), Cart> {
        delete_entity().then_reply(())
    }
}

impl KeyValueEntity for ShoppingCart {
    const COMPONENT_ID: &'static str = "shopping-cart";
    type State = Cart;

    fn empty_state(&self) -> Cart {
        Cart::default()
    }

    fn describe(methods: &mut EntityMethods<Self, Cart, Cart>) {
        methods
            .command(ShoppingCart::add_item)
            .command(ShoppingCart::remove_item)
            .command(ShoppingCart::checkout)
            .command(ShoppingCart::get_cart)
            .command(ShoppingCart::discard);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSummary {
    pub cart_id: String,
    pub customer_id: String,
    pub item_count: u32,
    pub checked_out: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Message, Serialize, Deserialize)]
pub struct CartSummaries {
    pub carts: Vec<CartSummary>,
}

pub struct CartsByCustomer;

impl CartsByCustomer {
    pub fn get_carts(&self, _customer_id: String) -> QueryEffect<CartSummaries> {
        QueryEffect::query_result()
    }

    pub fn get_open_carts(&self, _customer_id: String) -> QueryEffect<CartSummaries> {
        QueryEffect::query_result()
    }
}

impl View for CartsByCustomer {
    const COMPONENT_ID: &'static str = "carts-by-customer";

    fn describe(methods: &mut ViewMethods<Self>) {
        methods
            .table("carts_by_customer")
            .query(
                "SELECT * AS carts FROM carts_by_customer WHERE customerId = :customer_id",
                CartsByCustomer::get_carts,
            )
            .query(
                "SELECT * AS carts FROM carts_by_customer \
                 WHERE customerId = :customer_id AND checkedOut = false",
                CartsByCustomer::get_open_carts,
            );
        methods
            .consume_key_value_entity::<ShoppingCart, CartSummary>(|cart| {
                if cart.customer_id.is_empty() {
                    return RowEffect::ignore();
                }
                RowEffect::update_row(CartSummary {
                    cart_id: cart.cart_id.clone(),
                    customer_id: cart.customer_id.clone(),
                    item_count: cart.item_count(),
                    checked_out: cart.checked_out,
                })
            })
            .handle_deletes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> ShoppingCart {
        ShoppingCart {
            cart_id: "cart-1".into(),
        }
    }

    fn updated<R: std::fmt::Debug>(effect: Effect<R, Cart>) -> Cart {
        match effect {
            Effect::UpdateStateAndReply { update, .. } => update,
            other => panic!("expected a state update, got {other:?}"),
        }
    }

    fn rejected<R: std::fmt::Debug>(effect: Effect<R, Cart>) -> ErrorReply {
        match effect {
            Effect::Error(err) => err,
            other => panic!("expected an error, got {other:?}"),
        }
    }

    #[test]
    fn adding_an_item_twice_merges_quantities() {
        let cart = updated(entity().add_item(
            &Cart::default(),
            "ari".into(),
            LineItem::new("tv", "Super TV", 1),
        ));
        let cart = updated(entity().add_item(&cart, "ari".into(), LineItem::new("akku", "Battery", 1)));
        let cart = updated(entity().add_item(&cart, "ari".into(), LineItem::new("tv", "Super TV", 2)));

        assert_eq!(cart.cart_id, "cart-1");
        assert_eq!(
            cart.items,
            vec![
                LineItem::new("akku", "Battery", 1),
                LineItem::new("tv", "Super TV", 3),
            ]
        );
        assert_eq!(cart.item_count(), 4);
    }

    #[test]
    fn zero_quantity_is_a_bad_request() {
        let err = rejected(entity().add_item(
            &Cart::default(),
            "ari".into(),
            LineItem::new("tv", "Super TV", 0),
        ));
        assert_eq!(err.code, ErrorCode::BadRequest);
    }

    #[test]
    fn removing_an_unknown_item_is_rejected() {
        let err = rejected(entity().remove_item(&Cart::default(), "tv".into()));
        assert_eq!(err.code, ErrorCode::Rejected);
        assert_eq!(
            err.message,
            "Cannot remove item tv because it is not in the cart."
        );
    }

    #[test]
    fn checkout_requires_items_and_happens_once() {
        rejected(entity().checkout(&Cart::default()));

        let cart = updated(entity().add_item(
            &Cart::default(),
            "ari".into(),
            LineItem::new("tv", "Super TV", 1),
        ));
        let cart = updated(entity().checkout(&cart));
        assert!(cart.checked_out);

        rejected(entity().checkout(&cart));
        rejected(entity().add_item(&cart, "ari".into(), LineItem::new("tv", "Super TV", 1)));
    }
}
